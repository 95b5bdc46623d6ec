//! HTTP handlers of the admin API.

pub mod batch_handlers;
pub mod health_handlers;
pub mod object_handlers;

use crate::services::{engine::SyncEngine, supervisor::BatchSupervisor};

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub engine: SyncEngine,
    pub batch: BatchSupervisor,
}

impl AppState {
    pub fn new(engine: SyncEngine) -> Self {
        Self {
            engine,
            batch: BatchSupervisor::new(),
        }
    }
}
