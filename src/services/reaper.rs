//! LocalFileReaper: removes the local files of an object once its cloud
//! copy is confirmed.

use crate::config::SyncSettings;
use crate::models::{ObjectId, object::file_name_of, report::ReapReport};
use crate::services::{
    error::{SyncError, SyncResult},
    registry::AttachmentRegistry,
};
use std::{collections::HashSet, io::ErrorKind, path::PathBuf, sync::Arc};
use tracing::{debug, info, instrument, warn};

#[derive(Clone)]
pub struct LocalFileReaper {
    settings: Arc<SyncSettings>,
    registry: AttachmentRegistry,
}

impl LocalFileReaper {
    pub fn new(settings: Arc<SyncSettings>, registry: AttachmentRegistry) -> Self {
        Self { settings, registry }
    }

    /// Delete the primary file and every declared variant of `id`.
    ///
    /// Refuses to touch the filesystem unless local copies are not to be
    /// kept, a cloud URL is recorded and the primary file exists. Each file
    /// is deleted independently; failures are reported, never rolled back.
    #[instrument(skip(self))]
    pub async fn reap(&self, id: ObjectId) -> SyncResult<ReapReport> {
        let precondition = |reason: &str| SyncError::LocalDeletePrecondition {
            id,
            reason: reason.to_string(),
        };

        if self.settings.keep_local {
            return Err(precondition("local files are configured to be kept"));
        }
        let record = self.registry.get(id).await?;
        if !record.is_synced() {
            return Err(precondition("no confirmed cloud url"));
        }
        let object = self.registry.get_object(id).await?;
        if !tokio::fs::try_exists(object.primary_path()).await? {
            return Err(precondition("local file does not exist"));
        }

        let mut seen = HashSet::new();
        let paths: Vec<PathBuf> = std::iter::once(object.primary_path().to_path_buf())
            .chain(object.resolved_variant_paths())
            .filter(|path| seen.insert(path.clone()))
            .collect();

        let mut report = ReapReport::default();
        for path in paths {
            let name = file_name_of(&path);
            match tokio::fs::remove_file(&path).await {
                Ok(()) => {
                    debug!(path = %path.display(), "deleted local file");
                    report.deleted.push(name);
                }
                Err(err) if err.kind() == ErrorKind::NotFound => {
                    debug!(path = %path.display(), "variant already absent");
                }
                Err(err) => {
                    warn!(path = %path.display(), "failed to delete local file: {}", err);
                    report.failed.push(name);
                }
            }
        }

        if !report.deleted.is_empty() || !report.failed.is_empty() {
            self.registry
                .mark_local_deleted(id, &report.deleted, &report.failed)
                .await?;
        }
        info!(
            deleted = report.deleted.len(),
            failed = report.failed.len(),
            "local files reaped"
        );
        Ok(report)
    }
}
