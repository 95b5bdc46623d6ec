//! SyncEngine: one handle over every engine component, built from an
//! explicit configuration value and a database pool.

use crate::config::SyncSettings;
use crate::models::{
    ObjectId,
    checkpoint::BatchCheckpoint,
    object::{MediaObject, NewMediaObject},
    report::{ReapReport, StatusSummary},
    sync_record::SyncRecord,
};
use crate::services::{
    batch::{BatchControl, BatchCoordinator, BatchReport, BatchSettings, LocalCleanupReport, PageFailurePolicy},
    error::SyncResult,
    gateway::{CloudGateway, ConnectionCheck, HttpCloudGateway, check_connection},
    lock_manager::UploadLockManager,
    orchestrator::{SyncOrchestrator, SyncOutcome, SyncPass},
    reaper::LocalFileReaper,
    registry::AttachmentRegistry,
    rewriter::{Readable, UrlRewriter},
};
use chrono::Utc;
use serde::Serialize;
use sqlx::SqlitePool;
use std::{collections::BTreeMap, sync::Arc, time::Duration};

/// An object together with its sync state.
#[derive(Debug, Clone, Serialize)]
pub struct ObjectDetails {
    pub object: MediaObject,
    pub record: SyncRecord,
    pub locked: bool,
}

#[derive(Clone)]
pub struct SyncEngine {
    settings: Arc<SyncSettings>,
    registry: AttachmentRegistry,
    locks: UploadLockManager,
    gateway: Arc<dyn CloudGateway>,
    orchestrator: SyncOrchestrator,
    rewriter: UrlRewriter,
    reaper: LocalFileReaper,
    coordinator: BatchCoordinator,
}

impl SyncEngine {
    pub fn new(settings: SyncSettings, db: Arc<SqlitePool>, gateway: Arc<dyn CloudGateway>) -> Self {
        Self::with_batch_settings(settings, db, gateway, BatchSettings::default())
    }

    pub fn with_batch_settings(
        settings: SyncSettings,
        db: Arc<SqlitePool>,
        gateway: Arc<dyn CloudGateway>,
        batch: BatchSettings,
    ) -> Self {
        let settings = Arc::new(settings);
        let registry = AttachmentRegistry::new(db.clone());
        let locks = UploadLockManager::new(db, settings.lease_ttl);
        let reaper = LocalFileReaper::new(settings.clone(), registry.clone());
        let orchestrator = SyncOrchestrator::new(
            settings.clone(),
            registry.clone(),
            locks.clone(),
            gateway.clone(),
            reaper.clone(),
        );
        let rewriter = UrlRewriter::new(settings.clone(), registry.clone());
        let coordinator =
            BatchCoordinator::new(registry.clone(), orchestrator.clone(), reaper.clone(), batch);

        Self {
            settings,
            registry,
            locks,
            gateway,
            orchestrator,
            rewriter,
            reaper,
            coordinator,
        }
    }

    /// Engine talking to the cloud API configured in `settings`.
    pub fn connect(settings: SyncSettings, db: Arc<SqlitePool>) -> SyncResult<Self> {
        let gateway = HttpCloudGateway::from_settings(&settings)?;
        Ok(Self::new(settings, db, Arc::new(gateway)))
    }

    pub fn settings(&self) -> &SyncSettings {
        &self.settings
    }

    pub fn registry(&self) -> &AttachmentRegistry {
        &self.registry
    }

    pub fn locks(&self) -> &UploadLockManager {
        &self.locks
    }

    pub fn rewriter(&self) -> &UrlRewriter {
        &self.rewriter
    }

    pub async fn register(&self, new: NewMediaObject) -> SyncResult<MediaObject> {
        self.registry.register_object(new).await
    }

    pub async fn on_object_created(
        &self,
        new: NewMediaObject,
        pass: &SyncPass,
    ) -> SyncResult<Option<SyncOutcome>> {
        self.orchestrator.on_object_created(new, pass).await
    }

    pub async fn sync(&self, id: ObjectId) -> SyncResult<SyncOutcome> {
        self.orchestrator.sync(id).await
    }

    pub async fn sync_batch(
        &self,
        resume: Option<BatchCheckpoint>,
        control: &BatchControl,
        policy: &dyn PageFailurePolicy,
    ) -> SyncResult<BatchReport> {
        self.coordinator.run(resume, control, policy).await
    }

    pub async fn rewrite(&self, id: Option<ObjectId>, value: Readable) -> SyncResult<Readable> {
        self.rewriter.rewrite(id, value).await
    }

    pub async fn rewrite_url(&self, id: ObjectId, value: &str) -> SyncResult<String> {
        self.rewriter.rewrite_url(id, value).await
    }

    pub async fn delete_local(&self, id: ObjectId) -> SyncResult<ReapReport> {
        self.reaper.reap(id).await
    }

    pub async fn delete_local_all(&self, control: &BatchControl) -> SyncResult<LocalCleanupReport> {
        self.coordinator.run_local_cleanup(control).await
    }

    pub async fn object_details(&self, id: ObjectId) -> SyncResult<ObjectDetails> {
        let object = self.registry.get_object(id).await?;
        let record = self.registry.get(id).await?;
        let locked = self.locks.is_locked(id).await?;
        Ok(ObjectDetails {
            object,
            record,
            locked,
        })
    }

    pub async fn test_connection(&self) -> SyncResult<ConnectionCheck> {
        check_connection(self.gateway.as_ref()).await
    }

    /// Authenticated download link of a stored remote file.
    pub async fn download_link(&self, file: &str) -> SyncResult<String> {
        let auth = self.gateway.authorize().await?;
        self.gateway.download_link(&auth, file).await
    }

    pub async fn cleanup_locks(&self, older_than: Duration) -> SyncResult<u64> {
        self.locks.cleanup_abandoned(older_than).await
    }

    /// Administrative reset: the object becomes unsynced again. Local files
    /// and the remote copy are left alone.
    pub async fn reset(&self, id: ObjectId) -> SyncResult<()> {
        self.registry.get_object(id).await?;
        self.registry.clear(id).await
    }

    /// Every recorded cloud URL keyed by object id.
    pub async fn cloud_urls(&self) -> SyncResult<BTreeMap<ObjectId, String>> {
        Ok(self.registry.all_cloud_urls().await?.into_iter().collect())
    }

    pub async fn cleanup_duplicates(&self) -> SyncResult<u64> {
        self.registry.cleanup_duplicates().await
    }

    pub async fn status(&self) -> SyncResult<StatusSummary> {
        self.registry
            .status_summary(Utc::now(), self.settings.lease_ttl)
            .await
    }
}
