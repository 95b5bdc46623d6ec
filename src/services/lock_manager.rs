//! Per-object upload leases.
//!
//! A lease is the `lock_holder_since` column of the object's `SyncRecord`.
//! Acquisition is a single conditional upsert, so two workers racing for the
//! same object (in this process or another one sharing the database) can never
//! both win. Expiry is evaluated lazily at acquisition time.

use crate::models::ObjectId;
use crate::services::error::SyncResult;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use std::{sync::Arc, time::Duration};
use tracing::{debug, info};

#[derive(Clone)]
pub struct UploadLockManager {
    db: Arc<SqlitePool>,
    ttl: Duration,
}

/// Proof of a held lease. Hand it back to [`UploadLockManager::release_guard`].
#[derive(Debug)]
#[must_use = "a held lease must be released"]
pub struct LeaseGuard {
    pub object_id: ObjectId,
    pub acquired_at: DateTime<Utc>,
}

impl UploadLockManager {
    pub fn new(db: Arc<SqlitePool>, ttl: Duration) -> Self {
        Self { db, ttl }
    }

    fn ttl_millis(&self) -> i64 {
        self.ttl.as_millis() as i64
    }

    pub async fn try_acquire(&self, object_id: ObjectId) -> SyncResult<Option<LeaseGuard>> {
        self.try_acquire_at(object_id, Utc::now()).await
    }

    /// Claim the lease as of `now`. Succeeds when no lease exists or the
    /// existing one started at least one TTL before `now`.
    pub async fn try_acquire_at(
        &self,
        object_id: ObjectId,
        now: DateTime<Utc>,
    ) -> SyncResult<Option<LeaseGuard>> {
        let now_millis = now.timestamp_millis();
        let result = sqlx::query(
            r#"
            INSERT INTO sync_records (object_id, lock_holder_since)
            VALUES (?, ?)
            ON CONFLICT(object_id) DO UPDATE SET
                lock_holder_since = excluded.lock_holder_since
            WHERE sync_records.lock_holder_since IS NULL
               OR sync_records.lock_holder_since <= ?
            "#,
        )
        .bind(object_id)
        .bind(now_millis)
        .bind(now_millis - self.ttl_millis())
        .execute(&*self.db)
        .await?;

        if result.rows_affected() == 1 {
            debug!(object_id, "lease acquired");
            Ok(Some(LeaseGuard {
                object_id,
                acquired_at: now,
            }))
        } else {
            debug!(object_id, "lease held by another worker");
            Ok(None)
        }
    }

    /// Clear the lease unconditionally. Safe to call when nothing is held.
    pub async fn release(&self, object_id: ObjectId) -> SyncResult<()> {
        sqlx::query("UPDATE sync_records SET lock_holder_since = NULL WHERE object_id = ?")
            .bind(object_id)
            .execute(&*self.db)
            .await?;
        debug!(object_id, "lease released");
        Ok(())
    }

    pub async fn release_guard(&self, guard: LeaseGuard) -> SyncResult<()> {
        self.release(guard.object_id).await
    }

    pub async fn is_locked(&self, object_id: ObjectId) -> SyncResult<bool> {
        self.is_locked_at(object_id, Utc::now()).await
    }

    /// True when a lease exists and started less than one TTL before `now`.
    pub async fn is_locked_at(&self, object_id: ObjectId, now: DateTime<Utc>) -> SyncResult<bool> {
        let since: Option<i64> = sqlx::query_scalar(
            "SELECT lock_holder_since FROM sync_records WHERE object_id = ?",
        )
        .bind(object_id)
        .fetch_optional(&*self.db)
        .await?
        .flatten();

        Ok(matches!(since, Some(since) if now.timestamp_millis() - since < self.ttl_millis()))
    }

    /// Bulk-clear leases that started more than `older_than` ago. Returns the
    /// number of leases cleared.
    pub async fn cleanup_abandoned(&self, older_than: Duration) -> SyncResult<u64> {
        let cutoff = Utc::now().timestamp_millis() - older_than.as_millis() as i64;
        let result = sqlx::query(
            "UPDATE sync_records SET lock_holder_since = NULL \
             WHERE lock_holder_since IS NOT NULL AND lock_holder_since < ?",
        )
        .bind(cutoff)
        .execute(&*self.db)
        .await?;

        let cleaned = result.rows_affected();
        if cleaned > 0 {
            info!(cleaned, "cleared abandoned upload leases");
        }
        Ok(cleaned)
    }
}
