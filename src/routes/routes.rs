//! Defines routes of the admin API.
//!
//! ## Structure
//! - **Health**
//!   - `GET  /healthz`, `GET /readyz`, `GET /status`
//!
//! - **Objects**
//!   - `POST /objects`: register (and auto-sync when enabled)
//!   - `GET  /objects/{id}`: object and sync record
//!   - `POST /objects/{id}/sync`: upload once
//!   - `POST /objects/{id}/delete-local`: remove local copies
//!   - `POST /objects/{id}/rewrite`: rewrite a read value
//!   - `POST /objects/{id}/reset`: forget the sync state
//!   - `GET  /cloud-urls`: cloud URL of every synced object
//!   - `POST /content/rewrite`: rewrite free text
//!
//! - **Batch**
//!   - `POST /batch`, `GET /batch`, `POST /batch/pause`, `POST /batch/cancel`,
//!     `POST /batch/decision`
//!
//! - **Maintenance**
//!   - `POST /maintenance/cleanup-locks`, `POST /maintenance/cleanup-duplicates`,
//!     `POST /connection/test`

use crate::handlers::{
    AppState,
    batch_handlers::{batch_status, cancel_batch, decide_batch, pause_batch, start_batch},
    health_handlers::{healthz, readyz, status},
    object_handlers::{
        cleanup_duplicates, cleanup_locks, cloud_urls, create_object, delete_local, get_object,
        reset_object, rewrite_content, rewrite_for_object, sync_object, test_connection,
    },
};
use axum::{
    Router,
    routing::{get, post},
};

/// Build the admin router. Handlers share [`AppState`].
pub fn routes() -> Router<AppState> {
    Router::new()
        // health endpoints (mounted at root)
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/status", get(status))
        // object-level routes
        .route("/objects", post(create_object))
        .route("/objects/{id}", get(get_object))
        .route("/objects/{id}/sync", post(sync_object))
        .route("/objects/{id}/delete-local", post(delete_local))
        .route("/objects/{id}/rewrite", post(rewrite_for_object))
        .route("/objects/{id}/reset", post(reset_object))
        .route("/cloud-urls", get(cloud_urls))
        .route("/content/rewrite", post(rewrite_content))
        // batch
        .route("/batch", get(batch_status).post(start_batch))
        .route("/batch/pause", post(pause_batch))
        .route("/batch/cancel", post(cancel_batch))
        .route("/batch/decision", post(decide_batch))
        // maintenance
        .route("/maintenance/cleanup-locks", post(cleanup_locks))
        .route("/maintenance/cleanup-duplicates", post(cleanup_duplicates))
        .route("/connection/test", post(test_connection))
}
