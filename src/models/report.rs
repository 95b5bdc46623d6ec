//! Structured results returned to the admin API and the CLI.

use super::ObjectId;
use serde::{Deserialize, Serialize};

/// Per-object result tag of a batch page.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ObjectStatus {
    Success,
    Skipped,
    Failed,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ObjectResult {
    pub id: ObjectId,
    pub status: ObjectStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cloud_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default)]
    pub local_deleted: bool,
}

impl ObjectResult {
    pub fn success(id: ObjectId, cloud_url: String, local_deleted: bool) -> Self {
        Self {
            id,
            status: ObjectStatus::Success,
            cloud_url: Some(cloud_url),
            message: None,
            local_deleted,
        }
    }

    pub fn skipped(id: ObjectId, message: impl Into<String>) -> Self {
        Self {
            id,
            status: ObjectStatus::Skipped,
            cloud_url: None,
            message: Some(message.into()),
            local_deleted: false,
        }
    }

    pub fn failed(id: ObjectId, message: impl Into<String>) -> Self {
        Self {
            id,
            status: ObjectStatus::Failed,
            cloud_url: None,
            message: Some(message.into()),
            local_deleted: false,
        }
    }

    /// Result of deleting the local copies of an already synced object.
    pub fn reaped(id: ObjectId, report: &ReapReport) -> Self {
        let (status, message) = if report.is_complete() {
            (ObjectStatus::Success, None)
        } else {
            (
                ObjectStatus::Failed,
                Some(format!("could not delete: {}", report.failed.join(", "))),
            )
        };
        Self {
            id,
            status,
            cloud_url: None,
            message,
            local_deleted: !report.deleted.is_empty(),
        }
    }
}

/// Outcome of deleting the local variants of one object.
///
/// Entries are file basenames. A variant that was already absent appears in
/// neither list.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct ReapReport {
    pub deleted: Vec<String>,
    pub failed: Vec<String>,
}

impl ReapReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Population-wide counters shown on the status page.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct StatusSummary {
    pub total_objects: i64,
    pub synced: i64,
    pub unsynced: i64,
    pub local_deleted: i64,
    pub in_flight: i64,
}
