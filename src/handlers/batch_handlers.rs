//! Batch control handlers.

use crate::{
    errors::AppError,
    handlers::AppState,
    models::checkpoint::BatchCheckpoint,
    services::{batch::PageDecision, supervisor::BatchStatus},
};
use axum::{Json, extract::State, http::StatusCode};
use serde::Deserialize;

#[derive(Debug, Default, Deserialize)]
pub struct StartBatchReq {
    /// Checkpoint token from a previous `GET /batch`.
    pub checkpoint: Option<String>,
    /// Ignore any remembered progress and start over.
    #[serde(default)]
    pub restart: bool,
}

/// `POST /batch`: start, or resume, the background run.
pub async fn start_batch(
    State(state): State<AppState>,
    body: Option<Json<StartBatchReq>>,
) -> Result<(StatusCode, Json<BatchStatus>), AppError> {
    let req = body.map(|Json(req)| req).unwrap_or_default();
    if !state.engine.settings().enabled {
        return Err(AppError::conflict("cloud sync is disabled"));
    }

    let resume = match (&req.checkpoint, req.restart) {
        (Some(token), _) => Some(
            BatchCheckpoint::from_token(token)
                .ok_or_else(|| AppError::bad_request("invalid checkpoint token"))?,
        ),
        (None, true) => Some(BatchCheckpoint::start(
            state.engine.registry().count_unsynced().await?,
        )),
        (None, false) => None,
    };

    if !state.batch.start(state.engine.clone(), resume).await {
        return Err(AppError::conflict("a batch run is already active"));
    }
    Ok((StatusCode::ACCEPTED, Json(state.batch.status().await)))
}

/// `GET /batch`
pub async fn batch_status(State(state): State<AppState>) -> Json<BatchStatus> {
    Json(state.batch.status().await)
}

/// `POST /batch/pause`
pub async fn pause_batch(State(state): State<AppState>) -> Json<BatchStatus> {
    state.batch.pause();
    Json(state.batch.status().await)
}

/// `POST /batch/cancel`
pub async fn cancel_batch(State(state): State<AppState>) -> Json<BatchStatus> {
    state.batch.cancel().await;
    Json(state.batch.status().await)
}

#[derive(Debug, Deserialize)]
pub struct DecisionReq {
    pub decision: PageDecision,
}

/// `POST /batch/decision`: answer a run waiting on a failed page.
pub async fn decide_batch(
    State(state): State<AppState>,
    Json(req): Json<DecisionReq>,
) -> Result<Json<BatchStatus>, AppError> {
    if !state.batch.decide(req.decision).await {
        return Err(AppError::conflict("no batch run is waiting for a decision"));
    }
    Ok(Json(state.batch.status().await))
}
