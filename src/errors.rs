use crate::services::error::SyncError;
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use std::fmt;

/// HTTP-facing error: a status code and a message for the JSON body.
#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub message: String,
}

impl AppError {
    /// Create a new AppError with a specific status and message.
    pub fn new(status: StatusCode, msg: impl Into<String>) -> Self {
        Self {
            status,
            message: msg.into(),
        }
    }

    /// Shortcut for a 500 Internal Server Error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, msg)
    }

    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, msg)
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::CONFLICT, msg)
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for AppError {}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "error": self.message,
            "status": self.status.as_u16()
        }));

        (self.status, body).into_response()
    }
}

impl From<SyncError> for AppError {
    fn from(err: SyncError) -> Self {
        let status = match &err {
            SyncError::ObjectNotFound(_) => StatusCode::NOT_FOUND,
            SyncError::AlreadySynced { .. } | SyncError::LocalDeletePrecondition { .. } => {
                StatusCode::CONFLICT
            }
            SyncError::SizeLimit { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            SyncError::Disabled => StatusCode::SERVICE_UNAVAILABLE,
            SyncError::Auth(_)
            | SyncError::Endpoint(_)
            | SyncError::Transport(_)
            | SyncError::Upload { .. } => StatusCode::BAD_GATEWAY,
            SyncError::Sqlx(_) | SyncError::Io(_) | SyncError::Json(_) | SyncError::Task(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        Self::new(status, err.to_string())
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::internal(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sync_errors_map_to_http_statuses() {
        assert_eq!(
            AppError::from(SyncError::ObjectNotFound(3)).status,
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            AppError::from(SyncError::LocalDeletePrecondition {
                id: 3,
                reason: "no cloud url".into()
            })
            .status,
            StatusCode::CONFLICT
        );
        assert_eq!(
            AppError::from(SyncError::Auth("bad key".into())).status,
            StatusCode::BAD_GATEWAY
        );
    }
}
