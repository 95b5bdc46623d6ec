//! Background batch runs driven over HTTP.
//!
//! At most one run exists at a time. A page that keeps failing parks the
//! run until an operator answers through [`BatchSupervisor::decide`].

use crate::models::checkpoint::BatchCheckpoint;
use crate::services::{
    batch::{BatchControl, BatchOutcome, BatchReport, PageDecision, PageFailurePolicy},
    engine::SyncEngine,
    error::SyncError,
};
use async_trait::async_trait;
use serde::Serialize;
use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};
use tokio::sync::{Mutex, oneshot};
use tracing::{error, info, warn};

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct AwaitingDecision {
    pub page: u64,
    pub error: String,
}

/// Snapshot served by `GET /batch`.
#[derive(Debug, Clone, Serialize)]
pub struct BatchStatus {
    pub running: bool,
    pub checkpoint: Option<BatchCheckpoint>,
    /// The checkpoint in the opaque form accepted by `POST /batch`.
    pub checkpoint_token: Option<String>,
    pub percent: u64,
    pub awaiting_decision: Option<AwaitingDecision>,
    pub last_report: Option<BatchReport>,
    pub last_error: Option<String>,
}

struct Pending {
    question: AwaitingDecision,
    reply: oneshot::Sender<PageDecision>,
}

#[derive(Default)]
struct SupervisorState {
    control: BatchControl,
    running: AtomicBool,
    pending: Mutex<Option<Pending>>,
    last_report: Mutex<Option<BatchReport>>,
    last_error: Mutex<Option<String>>,
}

#[derive(Clone, Default)]
pub struct BatchSupervisor {
    state: Arc<SupervisorState>,
}

/// Parks the run until the operator decides.
struct OperatorPolicy {
    state: Arc<SupervisorState>,
}

#[async_trait]
impl PageFailurePolicy for OperatorPolicy {
    async fn decide(&self, page: u64, error: &SyncError) -> PageDecision {
        if self.state.control.is_cancelled() {
            return PageDecision::Stop;
        }
        let (reply, answer) = oneshot::channel();
        let question = AwaitingDecision {
            page,
            error: error.to_string(),
        };
        warn!(page, "batch waiting for operator decision");
        *self.state.pending.lock().await = Some(Pending { question, reply });

        // `cancel` sets the flag before it looks for a parked question
        if self.state.control.is_cancelled() {
            self.state.pending.lock().await.take();
            return PageDecision::Stop;
        }
        answer.await.unwrap_or(PageDecision::Stop)
    }
}

impl BatchSupervisor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_running(&self) -> bool {
        self.state.running.load(Ordering::SeqCst)
    }

    /// Start a run in the background. Without an explicit checkpoint a
    /// run that ended early resumes where it stopped. Returns `false` when
    /// a run is already active.
    pub async fn start(&self, engine: SyncEngine, resume: Option<BatchCheckpoint>) -> bool {
        if self.state.running.swap(true, Ordering::SeqCst) {
            return false;
        }

        let resume = match resume {
            Some(checkpoint) => Some(checkpoint),
            None => self
                .state
                .last_report
                .lock()
                .await
                .as_ref()
                .filter(|report| report.outcome != BatchOutcome::Completed)
                .map(|report| report.checkpoint.clone()),
        };
        self.state.control.reset();
        *self.state.last_error.lock().await = None;

        let state = self.state.clone();
        tokio::spawn(async move {
            let policy = OperatorPolicy {
                state: state.clone(),
            };
            match engine.sync_batch(resume, &state.control, &policy).await {
                Ok(report) => {
                    info!(outcome = ?report.outcome, "background batch ended");
                    *state.last_report.lock().await = Some(report);
                }
                Err(err) => {
                    error!("background batch failed: {}", err);
                    *state.last_error.lock().await = Some(err.to_string());
                }
            }
            state.pending.lock().await.take();
            state.running.store(false, Ordering::SeqCst);
        });
        true
    }

    pub fn pause(&self) {
        self.state.control.pause();
    }

    /// Stop the run at the next page boundary. A run parked on a decision
    /// is stopped right away.
    pub async fn cancel(&self) {
        self.state.control.cancel();
        if let Some(pending) = self.state.pending.lock().await.take() {
            let _ = pending.reply.send(PageDecision::Stop);
        }
    }

    /// Answer a parked run. Returns `false` when no run is waiting.
    pub async fn decide(&self, decision: PageDecision) -> bool {
        match self.state.pending.lock().await.take() {
            Some(pending) => {
                info!(page = pending.question.page, ?decision, "operator decided");
                pending.reply.send(decision).is_ok()
            }
            None => false,
        }
    }

    pub async fn status(&self) -> BatchStatus {
        let checkpoint = self.state.control.latest_checkpoint();
        BatchStatus {
            running: self.is_running(),
            checkpoint_token: checkpoint.as_ref().map(BatchCheckpoint::to_token),
            percent: checkpoint.as_ref().map_or(0, BatchCheckpoint::percent),
            checkpoint,
            awaiting_decision: self
                .state
                .pending
                .lock()
                .await
                .as_ref()
                .map(|pending| pending.question.clone()),
            last_report: self.state.last_report.lock().await.clone(),
            last_error: self.state.last_error.lock().await.clone(),
        }
    }
}
