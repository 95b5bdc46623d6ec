//! Upload synchronization and URL rewriting for locally stored media.
//!
//! Objects registered with the [`AttachmentRegistry`] are uploaded at most
//! once to cloud storage by the [`SyncOrchestrator`], optionally in resumable
//! batches by the [`BatchCoordinator`]. Reads are then redirected to the
//! cloud copy by the [`UrlRewriter`].

pub mod config;
pub mod db;
pub mod errors;
pub mod handlers;
pub mod models;
pub mod routes;
pub mod services;

pub use config::{AppConfig, Credentials, SyncSettings};
pub use models::{
    ObjectId,
    checkpoint::BatchCheckpoint,
    object::{MediaObject, NewMediaObject},
    report::{ObjectResult, ObjectStatus, ReapReport, StatusSummary},
    sync_record::SyncRecord,
};
pub use services::{
    batch::{
        BatchControl, BatchCoordinator, BatchOutcome, BatchReport, BatchSettings, FixedPolicy,
        PageDecision, PageFailurePolicy,
    },
    engine::SyncEngine,
    error::{SyncError, SyncResult},
    gateway::{CloudGateway, HttpCloudGateway},
    lock_manager::UploadLockManager,
    orchestrator::{SyncOrchestrator, SyncOutcome, SyncPass},
    registry::AttachmentRegistry,
    rewriter::{Readable, UrlRewriter},
    supervisor::BatchSupervisor,
};
