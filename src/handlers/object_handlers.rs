//! Per-object handlers: registration, sync, local deletion, rewriting and
//! maintenance.

use crate::{
    errors::AppError,
    handlers::AppState,
    models::{
        ObjectId,
        object::{MediaObject, NewMediaObject},
        report::ReapReport,
    },
    services::{
        engine::ObjectDetails,
        gateway::ConnectionCheck,
        orchestrator::{SyncOutcome, SyncPass},
        rewriter::Readable,
    },
};
use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::{collections::BTreeMap, time::Duration};

/// `POST /objects`: register an object; uploads it right away when
/// automatic replacement is on.
pub async fn create_object(
    State(state): State<AppState>,
    Json(new): Json<NewMediaObject>,
) -> Result<(StatusCode, Json<CreatedObject>), AppError> {
    let id = new.id;
    let sync = state
        .engine
        .on_object_created(new, &SyncPass::new())
        .await?;
    let object = state.engine.registry().get_object(id).await?;
    Ok((StatusCode::CREATED, Json(CreatedObject { object, sync })))
}

#[derive(Serialize)]
pub struct CreatedObject {
    pub object: MediaObject,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sync: Option<SyncOutcome>,
}

/// `GET /objects/{id}`
pub async fn get_object(
    State(state): State<AppState>,
    Path(id): Path<ObjectId>,
) -> Result<Json<ObjectDetails>, AppError> {
    Ok(Json(state.engine.object_details(id).await?))
}

/// `POST /objects/{id}/sync`
pub async fn sync_object(
    State(state): State<AppState>,
    Path(id): Path<ObjectId>,
) -> Result<Json<SyncOutcome>, AppError> {
    Ok(Json(state.engine.sync(id).await?))
}

/// `POST /objects/{id}/delete-local`
pub async fn delete_local(
    State(state): State<AppState>,
    Path(id): Path<ObjectId>,
) -> Result<Json<ReapReport>, AppError> {
    Ok(Json(state.engine.delete_local(id).await?))
}

/// `POST /objects/{id}/rewrite`: body is a tagged [`Readable`].
pub async fn rewrite_for_object(
    State(state): State<AppState>,
    Path(id): Path<ObjectId>,
    Json(value): Json<Readable>,
) -> Result<Json<Readable>, AppError> {
    Ok(Json(state.engine.rewrite(Some(id), value).await?))
}

/// `POST /objects/{id}/reset`: forget the object's sync state.
pub async fn reset_object(
    State(state): State<AppState>,
    Path(id): Path<ObjectId>,
) -> Result<Json<ObjectDetails>, AppError> {
    state.engine.reset(id).await?;
    Ok(Json(state.engine.object_details(id).await?))
}

/// `GET /cloud-urls`: id to cloud URL map of every synced object.
pub async fn cloud_urls(
    State(state): State<AppState>,
) -> Result<Json<BTreeMap<ObjectId, String>>, AppError> {
    Ok(Json(state.engine.cloud_urls().await?))
}

#[derive(Debug, Deserialize)]
pub struct ContentRewriteReq {
    pub content: String,
}

/// `POST /content/rewrite`
pub async fn rewrite_content(
    State(state): State<AppState>,
    Json(req): Json<ContentRewriteReq>,
) -> Result<Json<Value>, AppError> {
    let content = match state.engine.rewrite(None, Readable::Content(req.content)).await? {
        Readable::Content(content) => content,
        _ => return Err(AppError::internal("content rewrite returned another kind")),
    };
    Ok(Json(json!({ "content": content })))
}

#[derive(Debug, Deserialize)]
pub struct CleanupLocksReq {
    pub older_than_secs: Option<u64>,
}

/// `POST /maintenance/cleanup-locks`: defaults to leases older than an hour.
pub async fn cleanup_locks(
    State(state): State<AppState>,
    body: Option<Json<CleanupLocksReq>>,
) -> Result<Json<Value>, AppError> {
    let secs = body.and_then(|Json(req)| req.older_than_secs).unwrap_or(3600);
    let cleaned = state
        .engine
        .cleanup_locks(Duration::from_secs(secs))
        .await?;
    Ok(Json(json!({ "cleaned": cleaned })))
}

/// `POST /maintenance/cleanup-duplicates`
pub async fn cleanup_duplicates(State(state): State<AppState>) -> Result<Json<Value>, AppError> {
    let cleaned = state.engine.cleanup_duplicates().await?;
    Ok(Json(json!({ "cleaned": cleaned })))
}

/// `POST /connection/test`
pub async fn test_connection(
    State(state): State<AppState>,
) -> Result<Json<ConnectionCheck>, AppError> {
    Ok(Json(state.engine.test_connection().await?))
}
