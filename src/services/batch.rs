//! BatchCoordinator: drives the orchestrator over every unsynced object,
//! one keyset page at a time.
//!
//! Progress lives in a [`BatchCheckpoint`] held by the caller. Pause and
//! cancel are cooperative and only observed between pages; both end the
//! run with the checkpoint of the last completed page, from which a later
//! run resumes.

use crate::models::{
    ObjectId,
    checkpoint::BatchCheckpoint,
    report::{ObjectResult, ObjectStatus},
};
use crate::services::{
    error::{SyncError, SyncResult},
    orchestrator::{SyncOrchestrator, SyncOutcome},
    reaper::LocalFileReaper,
    registry::AttachmentRegistry,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::{
    sync::atomic::{AtomicBool, Ordering},
    time::Duration,
};
use tokio::sync::watch;
use tracing::{debug, error, info, instrument, warn};

pub const DEFAULT_PAGE_SIZE: usize = 10;
pub const DEFAULT_MAX_RETRIES: u32 = 3;
pub const DEFAULT_RETRY_BASE_DELAY: Duration = Duration::from_secs(5);
pub const DEFAULT_COOLDOWN: Duration = Duration::from_secs(2);

#[derive(Debug, Clone)]
pub struct BatchSettings {
    pub page_size: usize,
    /// Retries of a failed page; attempt `n` waits `retry_base_delay * n`.
    pub max_retries: u32,
    pub retry_base_delay: Duration,
    /// Pause between successful pages.
    pub cooldown: Duration,
}

impl Default for BatchSettings {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            max_retries: DEFAULT_MAX_RETRIES,
            retry_base_delay: DEFAULT_RETRY_BASE_DELAY,
            cooldown: DEFAULT_COOLDOWN,
        }
    }
}

/// Operator switches observed by a running batch, plus its latest
/// checkpoint for observers.
#[derive(Debug)]
pub struct BatchControl {
    paused: AtomicBool,
    cancelled: AtomicBool,
    progress: watch::Sender<Option<BatchCheckpoint>>,
}

impl Default for BatchControl {
    fn default() -> Self {
        Self {
            paused: AtomicBool::new(false),
            cancelled: AtomicBool::new(false),
            progress: watch::Sender::new(None),
        }
    }
}

impl BatchControl {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pause(&self) {
        self.paused.store(true, Ordering::SeqCst);
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// Clear both switches before a resumed run.
    pub fn reset(&self) {
        self.paused.store(false, Ordering::SeqCst);
        self.cancelled.store(false, Ordering::SeqCst);
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    pub fn latest_checkpoint(&self) -> Option<BatchCheckpoint> {
        self.progress.borrow().clone()
    }

    /// Receives every checkpoint the run publishes.
    pub fn subscribe(&self) -> watch::Receiver<Option<BatchCheckpoint>> {
        self.progress.subscribe()
    }

    fn publish(&self, checkpoint: &BatchCheckpoint) {
        self.progress.send_replace(Some(checkpoint.clone()));
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PageDecision {
    /// Give up on the page and continue with the next one.
    Skip,
    /// End the run, keeping the checkpoint.
    Stop,
}

/// Decides what happens to a page that still fails after every retry.
#[async_trait]
pub trait PageFailurePolicy: Send + Sync {
    async fn decide(&self, page: u64, error: &SyncError) -> PageDecision;
}

/// Always answers the same way.
#[derive(Debug, Clone, Copy)]
pub struct FixedPolicy(pub PageDecision);

#[async_trait]
impl PageFailurePolicy for FixedPolicy {
    async fn decide(&self, _page: u64, _error: &SyncError) -> PageDecision {
        self.0
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum BatchOutcome {
    Completed,
    Paused,
    Cancelled,
    Stopped { error: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchReport {
    pub outcome: BatchOutcome,
    pub checkpoint: BatchCheckpoint,
    pub results: Vec<ObjectResult>,
}

impl BatchReport {
    pub fn count(&self, status: ObjectStatus) -> usize {
        self.results.iter().filter(|r| r.status == status).count()
    }
}

/// Result of a sweep deleting local copies of already synced objects.
#[derive(Debug, Clone, Default, Serialize)]
pub struct LocalCleanupReport {
    pub processed: u64,
    pub results: Vec<ObjectResult>,
}

/// A page that could not be completed.
struct PageFailure {
    error: SyncError,
    /// Last id fetched for the page, when the fetch itself succeeded.
    last_seen: Option<ObjectId>,
}

#[derive(Clone)]
pub struct BatchCoordinator {
    registry: AttachmentRegistry,
    orchestrator: SyncOrchestrator,
    reaper: LocalFileReaper,
    settings: BatchSettings,
}

impl BatchCoordinator {
    pub fn new(
        registry: AttachmentRegistry,
        orchestrator: SyncOrchestrator,
        reaper: LocalFileReaper,
        settings: BatchSettings,
    ) -> Self {
        Self {
            registry,
            orchestrator,
            reaper,
            settings,
        }
    }

    /// Run until every unsynced object was visited, or until paused,
    /// cancelled or stopped on a failed page.
    pub async fn run(
        &self,
        resume: Option<BatchCheckpoint>,
        control: &BatchControl,
        policy: &dyn PageFailurePolicy,
    ) -> SyncResult<BatchReport> {
        let mut checkpoint = match resume {
            Some(checkpoint) => {
                info!(
                    page = checkpoint.current_page,
                    processed = checkpoint.processed_count,
                    "resuming batch"
                );
                checkpoint
            }
            None => {
                let total = self.registry.count_unsynced().await?;
                info!(total, "starting batch");
                BatchCheckpoint::start(total)
            }
        };
        control.publish(&checkpoint);

        let mut results = Vec::new();
        let outcome = loop {
            if control.is_cancelled() {
                info!(page = checkpoint.current_page, "batch cancelled");
                break BatchOutcome::Cancelled;
            }
            if control.is_paused() {
                info!(page = checkpoint.current_page, "batch paused");
                break BatchOutcome::Paused;
            }

            match self.page_with_retries(&checkpoint, control, &mut results).await {
                Ok(None) => break BatchOutcome::Completed,
                Ok(Some((count, last_id))) => {
                    checkpoint.advance(count as u64, Some(last_id));
                    control.publish(&checkpoint);
                    if count < self.settings.page_size {
                        break BatchOutcome::Completed;
                    }
                    if !self.settings.cooldown.is_zero() {
                        tokio::time::sleep(self.settings.cooldown).await;
                    }
                }
                Err(_) if control.is_cancelled() => {
                    info!(page = checkpoint.current_page, "batch cancelled during retries");
                    break BatchOutcome::Cancelled;
                }
                Err(failure) => {
                    error!(
                        page = checkpoint.current_page,
                        "page failed after retries: {}", failure.error
                    );
                    match (
                        policy.decide(checkpoint.current_page, &failure.error).await,
                        failure.last_seen,
                    ) {
                        (PageDecision::Skip, Some(last_id)) => {
                            warn!(page = checkpoint.current_page, "skipping failed page");
                            checkpoint.advance(0, Some(last_id));
                            control.publish(&checkpoint);
                        }
                        (PageDecision::Skip, None) => {
                            warn!("page contents unknown, cannot skip; stopping");
                            break BatchOutcome::Stopped {
                                error: failure.error.to_string(),
                            };
                        }
                        (PageDecision::Stop, _) => {
                            break BatchOutcome::Stopped {
                                error: failure.error.to_string(),
                            };
                        }
                    }
                }
            }
        };

        info!(
            ?outcome,
            page = checkpoint.current_page,
            processed = checkpoint.processed_count,
            total = checkpoint.total_count,
            "batch finished"
        );
        Ok(BatchReport {
            outcome,
            checkpoint,
            results,
        })
    }

    /// `Ok(None)` when nothing is left; otherwise the number of objects
    /// handled and the last id of the page. A cancel ends the retries early.
    async fn page_with_retries(
        &self,
        checkpoint: &BatchCheckpoint,
        control: &BatchControl,
        results: &mut Vec<ObjectResult>,
    ) -> Result<Option<(usize, ObjectId)>, PageFailure> {
        let mut attempt = 0;
        loop {
            match self.process_page(checkpoint, results).await {
                Ok(done) => return Ok(done),
                Err(failure) if control.is_cancelled() => return Err(failure),
                Err(failure) if attempt < self.settings.max_retries => {
                    attempt += 1;
                    let delay = self.settings.retry_base_delay * attempt;
                    warn!(
                        page = checkpoint.current_page,
                        attempt,
                        ?delay,
                        "page failed, retrying: {}",
                        failure.error
                    );
                    tokio::time::sleep(delay).await;
                    if control.is_cancelled() {
                        return Err(failure);
                    }
                }
                Err(failure) => return Err(failure),
            }
        }
    }

    #[instrument(skip_all, fields(page = checkpoint.current_page))]
    async fn process_page(
        &self,
        checkpoint: &BatchCheckpoint,
        results: &mut Vec<ObjectResult>,
    ) -> Result<Option<(usize, ObjectId)>, PageFailure> {
        let objects = self
            .registry
            .list_unsynced_after(checkpoint.cursor, self.settings.page_size)
            .await
            .map_err(|error| PageFailure {
                error,
                last_seen: None,
            })?;
        let Some(last_id) = objects.last().map(|object| object.id) else {
            return Ok(None);
        };
        debug!(objects = objects.len(), "processing page");

        for object in &objects {
            let result = match self.orchestrator.sync(object.id).await {
                Ok(SyncOutcome::Synced {
                    cloud_url,
                    already_synced: true,
                    ..
                }) => ObjectResult {
                    cloud_url: Some(cloud_url),
                    ..ObjectResult::skipped(object.id, "already synced")
                },
                Ok(SyncOutcome::Synced {
                    cloud_url, reap, ..
                }) => {
                    let local_deleted = reap.is_some_and(|report| !report.deleted.is_empty());
                    ObjectResult::success(object.id, cloud_url, local_deleted)
                }
                Ok(SyncOutcome::Locked) => {
                    ObjectResult::skipped(object.id, "upload in progress elsewhere")
                }
                Ok(SyncOutcome::Skipped { reason }) => ObjectResult::skipped(object.id, reason),
                Err(error) if error.is_page_level() => {
                    return Err(PageFailure {
                        error,
                        last_seen: Some(last_id),
                    });
                }
                Err(error) => ObjectResult::failed(object.id, error.to_string()),
            };
            results.push(result);
        }
        Ok(Some((objects.len(), last_id)))
    }

    /// Delete the local files of every synced object that still has them.
    pub async fn run_local_cleanup(&self, control: &BatchControl) -> SyncResult<LocalCleanupReport> {
        let mut report = LocalCleanupReport::default();
        let mut cursor = None;
        while !control.is_cancelled() {
            let objects = self
                .registry
                .list_pending_local_deletion(cursor, self.settings.page_size)
                .await?;
            let Some(last) = objects.last() else {
                break;
            };
            cursor = Some(last.id);

            for object in &objects {
                let result = match self.reaper.reap(object.id).await {
                    Ok(reap) => ObjectResult::reaped(object.id, &reap),
                    Err(err) => ObjectResult::failed(object.id, err.to_string()),
                };
                report.results.push(result);
                report.processed += 1;
            }
        }
        info!(processed = report.processed, "local cleanup finished");
        Ok(report)
    }
}
