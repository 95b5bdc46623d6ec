//! SyncOrchestrator: the per-object upload state machine.
//!
//! ```text
//! UNSYNCED ──lease──▶ LOCKED ──transfer──▶ SYNCED
//!     ▲                 │  │
//!     └──── released ───┘  └── failure: lease released, error returned
//! ```
//!
//! The lease is released on every exit path once it has been taken, including
//! when the caller stops polling `sync` halfway through a transfer.

use crate::config::SyncSettings;
use crate::models::{
    ObjectId,
    object::{MediaObject, NewMediaObject},
    report::ReapReport,
};
use crate::services::{
    error::{SyncError, SyncResult},
    gateway::CloudGateway,
    lock_manager::UploadLockManager,
    media_types,
    reaper::LocalFileReaper,
    registry::AttachmentRegistry,
};
use serde::Serialize;
use std::{collections::HashSet, sync::Arc};
use tokio::sync::Mutex;
use tracing::{Instrument, debug, info, instrument, warn};

/// Result of one `sync` call.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum SyncOutcome {
    /// The object has a cloud URL. `already_synced` is set when no transfer
    /// happened in this call.
    Synced {
        cloud_url: String,
        already_synced: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        reap: Option<ReapReport>,
    },
    /// Another worker holds the lease; try again later.
    Locked,
    /// Not eligible for upload.
    Skipped { reason: String },
}

impl SyncOutcome {
    pub fn cloud_url(&self) -> Option<&str> {
        match self {
            SyncOutcome::Synced { cloud_url, .. } => Some(cloud_url),
            _ => None,
        }
    }
}

/// Ids already handled during one trigger pass.
///
/// Only saves redundant work within a pass; exclusion across workers is the
/// lease's job.
#[derive(Debug, Default)]
pub struct SyncPass {
    seen: Mutex<HashSet<ObjectId>>,
}

impl SyncPass {
    pub fn new() -> Self {
        Self::default()
    }

    /// True the first time `id` is offered.
    pub async fn first_visit(&self, id: ObjectId) -> bool {
        self.seen.lock().await.insert(id)
    }
}

#[derive(Clone)]
pub struct SyncOrchestrator {
    settings: Arc<SyncSettings>,
    registry: AttachmentRegistry,
    locks: UploadLockManager,
    gateway: Arc<dyn CloudGateway>,
    reaper: LocalFileReaper,
}

impl SyncOrchestrator {
    pub fn new(
        settings: Arc<SyncSettings>,
        registry: AttachmentRegistry,
        locks: UploadLockManager,
        gateway: Arc<dyn CloudGateway>,
        reaper: LocalFileReaper,
    ) -> Self {
        Self {
            settings,
            registry,
            locks,
            gateway,
            reaper,
        }
    }

    #[instrument(skip(self))]
    pub async fn sync(&self, id: ObjectId) -> SyncResult<SyncOutcome> {
        if !self.settings.enabled {
            return Err(SyncError::Disabled);
        }

        let record = self.registry.get(id).await?;
        if let Some(cloud_url) = record.cloud_url {
            debug!("already synced");
            return Ok(SyncOutcome::Synced {
                cloud_url,
                already_synced: true,
                reap: None,
            });
        }

        let object = self.registry.get_object(id).await?;
        if let Some(reason) = self.ineligibility(&object).await? {
            info!(%reason, "skipping object");
            return Ok(SyncOutcome::Skipped { reason });
        }

        let Some(guard) = self.locks.try_acquire(id).await? else {
            info!("upload lease held elsewhere");
            return Ok(SyncOutcome::Locked);
        };

        // the leased section runs as its own task so a dropped caller cannot
        // abandon the lease mid-transfer
        let this = self.clone();
        let leased = tokio::spawn(
            async move {
                let transfer = this.transfer(&object).await;
                let released = this.locks.release_guard(guard).await;
                (transfer, released)
            }
            .in_current_span(),
        );
        let (transfer, released) = match leased.await {
            Ok(done) => done,
            Err(err) => {
                warn!("leased upload task aborted: {}", err);
                self.locks.release(id).await?;
                return Err(err.into());
            }
        };

        let (cloud_url, already_synced) = match (transfer, released) {
            (Ok(done), Ok(())) => done,
            (Ok(done), Err(err)) => {
                warn!("upload finished but releasing the lease failed: {}", err);
                done
            }
            (Err(err), released) => {
                if let Err(release_err) = released {
                    warn!("releasing the lease failed: {}", release_err);
                }
                warn!("upload failed: {}", err);
                return Err(err);
            }
        };

        let reap = if self.settings.keep_local || already_synced {
            None
        } else {
            match self.reaper.reap(id).await {
                Ok(report) => Some(report),
                Err(err) => {
                    warn!("local cleanup after upload failed: {}", err);
                    None
                }
            }
        };

        Ok(SyncOutcome::Synced {
            cloud_url,
            already_synced,
            reap,
        })
    }

    /// Runs under the lease. Returns the cloud URL and whether another worker
    /// had already completed the upload.
    async fn transfer(&self, object: &MediaObject) -> SyncResult<(String, bool)> {
        // another worker may have finished between the first read and the lease
        if let Some(cloud_url) = self.registry.get(object.id).await?.cloud_url {
            debug!("synced by another worker while acquiring the lease");
            return Ok((cloud_url, true));
        }

        let auth = self.gateway.authorize().await?;
        let target = self.gateway.resolve_upload_target(&auth).await?;
        let cloud_url = self.gateway.upload(object.primary_path(), &target).await?;

        self.registry.mark_uploaded(object.id, &cloud_url).await?;
        info!(cloud_url = %cloud_url, "object synced");
        Ok((cloud_url, false))
    }

    async fn ineligibility(&self, object: &MediaObject) -> SyncResult<Option<String>> {
        let path = object.primary_path();
        if !tokio::fs::try_exists(path).await? {
            return Ok(Some(format!("local file `{}` does not exist", path.display())));
        }

        let mime = match &object.mime_type {
            Some(mime) => mime.clone(),
            None => media_types::detect_mime(path).await,
        };
        if !media_types::is_supported(Some(&mime), path) {
            return Ok(Some(format!("unsupported file type `{}`", mime)));
        }
        Ok(None)
    }

    /// Creation trigger: register the object, then upload it right away when
    /// automatic replacement is on.
    pub async fn on_object_created(
        &self,
        new: NewMediaObject,
        pass: &SyncPass,
    ) -> SyncResult<Option<SyncOutcome>> {
        let object = self.registry.register_object(new).await?;
        if !(self.settings.enabled && self.settings.auto_replace) {
            return Ok(None);
        }
        if !pass.first_visit(object.id).await {
            debug!(object_id = object.id, "already handled in this pass");
            return Ok(None);
        }
        self.sync(object.id).await.map(Some)
    }
}
