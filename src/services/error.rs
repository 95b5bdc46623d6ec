//! Error taxonomy shared by every engine component.

use crate::models::ObjectId;
use std::io;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("cloud sync is disabled")]
    Disabled,
    #[error("object `{0}` not found")]
    ObjectNotFound(ObjectId),
    #[error("authorization failed: {0}")]
    Auth(String),
    #[error("upload endpoint resolution failed: {0}")]
    Endpoint(String),
    #[error("file `{path}` is {size} bytes, above the {limit} byte upload limit")]
    SizeLimit { path: String, size: u64, limit: u64 },
    #[error("upload rejected (status {status}): {snippet}")]
    Upload { status: u16, snippet: String },
    #[error("object `{id}` is already synced to `{existing}`")]
    AlreadySynced { id: ObjectId, existing: String },
    #[error("local files of object `{id}` cannot be deleted: {reason}")]
    LocalDeletePrecondition { id: ObjectId, reason: String },
    #[error("transport error: {0}")]
    Transport(String),
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error("upload task failed: {0}")]
    Task(String),
}

pub type SyncResult<T> = Result<T, SyncError>;

impl SyncError {
    /// True for systemic failures that would affect every object of a batch
    /// page alike (remote API unreachable or rejecting credentials, registry
    /// unavailable). Everything else is scoped to a single object.
    pub fn is_page_level(&self) -> bool {
        matches!(
            self,
            SyncError::Auth(_)
                | SyncError::Endpoint(_)
                | SyncError::Transport(_)
                | SyncError::Sqlx(_)
        )
    }
}

impl From<tokio::task::JoinError> for SyncError {
    fn from(err: tokio::task::JoinError) -> Self {
        SyncError::Task(err.to_string())
    }
}

impl From<reqwest::Error> for SyncError {
    fn from(err: reqwest::Error) -> Self {
        SyncError::Transport(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_page_level_failures() {
        assert!(SyncError::Auth("bad key".into()).is_page_level());
        assert!(SyncError::Transport("timeout".into()).is_page_level());
        assert!(
            !SyncError::Upload {
                status: 500,
                snippet: "boom".into()
            }
            .is_page_level()
        );
        assert!(
            !SyncError::SizeLimit {
                path: "/a".into(),
                size: 2,
                limit: 1
            }
            .is_page_level()
        );
    }

    #[test]
    fn error_display() {
        let err = SyncError::AlreadySynced {
            id: 3,
            existing: "https://cdn/x".into(),
        };
        assert_eq!(
            err.to_string(),
            "object `3` is already synced to `https://cdn/x`"
        );
    }
}
