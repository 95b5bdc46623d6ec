//! Per-object synchronization state owned by the registry.

use super::ObjectId;
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Synchronization state of one object.
///
/// - `cloud_url` is set exactly when an upload completed, and never changes
///   afterwards.
/// - `lock_holder_since` is set only while an upload attempt holds the lease.
/// - `local_deleted_at` is only ever set after `cloud_url`.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Default)]
pub struct SyncRecord {
    pub object_id: ObjectId,
    pub cloud_url: Option<String>,
    pub uploaded_at: Option<DateTime<Utc>>,
    pub lock_holder_since: Option<DateTime<Utc>>,
    pub local_deleted_at: Option<DateTime<Utc>>,
    pub deleted_variants: Vec<String>,
    pub failed_variants: Vec<String>,
}

impl SyncRecord {
    /// The implicit record of an object nothing has happened to yet.
    pub fn empty(object_id: ObjectId) -> Self {
        Self {
            object_id,
            ..Self::default()
        }
    }

    pub fn is_synced(&self) -> bool {
        self.cloud_url.is_some()
    }
}

/// Raw `sync_records` row. The lease start is kept as Unix milliseconds so
/// that expiry can be compared numerically inside a single statement.
#[derive(FromRow, Debug)]
pub(crate) struct SyncRecordRow {
    pub object_id: ObjectId,
    pub cloud_url: Option<String>,
    pub uploaded_at: Option<DateTime<Utc>>,
    pub lock_holder_since: Option<i64>,
    pub local_deleted_at: Option<DateTime<Utc>>,
    #[sqlx(json)]
    pub deleted_variants: Vec<String>,
    #[sqlx(json)]
    pub failed_variants: Vec<String>,
}

impl From<SyncRecordRow> for SyncRecord {
    fn from(row: SyncRecordRow) -> Self {
        Self {
            object_id: row.object_id,
            cloud_url: row.cloud_url,
            uploaded_at: row.uploaded_at,
            lock_holder_since: row
                .lock_holder_since
                .and_then(|millis| Utc.timestamp_millis_opt(millis).single()),
            local_deleted_at: row.local_deleted_at,
            deleted_variants: row.deleted_variants,
            failed_variants: row.failed_variants,
        }
    }
}
