//! AttachmentRegistry: the persistent object population and the per-object
//! `SyncRecord`s, backed by SQLite. The registry is the source of truth for
//! idempotence: an object with a `cloud_url` is never uploaded again.

use crate::models::{
    ObjectId,
    object::{MediaObject, NewMediaObject},
    report::StatusSummary,
    sync_record::{SyncRecord, SyncRecordRow},
};
use crate::services::error::{SyncError, SyncResult};
use chrono::{DateTime, Utc};
use sqlx::{SqlitePool, types::Json};
use std::{collections::BTreeSet, sync::Arc};
use tracing::{debug, info, warn};

const OBJECT_COLUMNS: &str =
    "o.id, o.local_path, o.variant_paths, o.mime_type, o.size_bytes, o.created_at";

const RECORD_COLUMNS: &str = "object_id, cloud_url, uploaded_at, lock_holder_since, \
     local_deleted_at, deleted_variants, failed_variants";

#[derive(Clone)]
pub struct AttachmentRegistry {
    /// Shared SQLite connection pool.
    pub db: Arc<SqlitePool>,
}

impl AttachmentRegistry {
    pub fn new(db: Arc<SqlitePool>) -> Self {
        Self { db }
    }

    /// Lightweight connectivity probe used by readiness checks.
    pub async fn ping(&self) -> SyncResult<()> {
        sqlx::query_scalar::<_, i64>("SELECT 1")
            .fetch_one(&*self.db)
            .await?;
        Ok(())
    }

    /// Insert or refresh an object of the local population.
    ///
    /// Re-registering an id updates its paths and type but never touches its
    /// `SyncRecord`.
    pub async fn register_object(&self, new: NewMediaObject) -> SyncResult<MediaObject> {
        let size_bytes = match new.size_bytes {
            Some(size) => size,
            None => tokio::fs::metadata(&new.local_path)
                .await
                .map(|meta| meta.len() as i64)
                .unwrap_or(0),
        };

        let object = sqlx::query_as::<_, MediaObject>(
            r#"
            INSERT INTO objects (id, local_path, variant_paths, mime_type, size_bytes, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                local_path = excluded.local_path,
                variant_paths = excluded.variant_paths,
                mime_type = excluded.mime_type,
                size_bytes = excluded.size_bytes
            RETURNING id, local_path, variant_paths, mime_type, size_bytes, created_at
            "#,
        )
        .bind(new.id)
        .bind(&new.local_path)
        .bind(Json(&new.variant_paths))
        .bind(&new.mime_type)
        .bind(size_bytes)
        .bind(Utc::now())
        .fetch_one(&*self.db)
        .await?;

        debug!(object_id = object.id, path = %object.local_path, "registered object");
        Ok(object)
    }

    /// Fetch an object of the population. Returns ObjectNotFound if missing.
    pub async fn get_object(&self, id: ObjectId) -> SyncResult<MediaObject> {
        sqlx::query_as::<_, MediaObject>(&format!(
            "SELECT {OBJECT_COLUMNS} FROM objects o WHERE o.id = ?"
        ))
        .bind(id)
        .fetch_one(&*self.db)
        .await
        .map_err(|err| match err {
            sqlx::Error::RowNotFound => SyncError::ObjectNotFound(id),
            other => SyncError::Sqlx(other),
        })
    }

    /// Current sync state of an object. Objects nothing has happened to yet
    /// yield an empty record.
    pub async fn get(&self, id: ObjectId) -> SyncResult<SyncRecord> {
        let row = sqlx::query_as::<_, SyncRecordRow>(&format!(
            "SELECT {RECORD_COLUMNS} FROM sync_records WHERE object_id = ?"
        ))
        .bind(id)
        .fetch_optional(&*self.db)
        .await?;

        Ok(row.map(SyncRecord::from).unwrap_or_else(|| SyncRecord::empty(id)))
    }

    /// Record the canonical remote URL of an object.
    ///
    /// - unset → set, `uploaded_at = now`
    /// - already set to the same URL → no-op
    /// - already set to another URL → AlreadySynced
    pub async fn mark_uploaded(&self, id: ObjectId, url: &str) -> SyncResult<()> {
        let result = sqlx::query(
            r#"
            INSERT INTO sync_records (object_id, cloud_url, uploaded_at)
            VALUES (?, ?, ?)
            ON CONFLICT(object_id) DO UPDATE SET
                cloud_url = excluded.cloud_url,
                uploaded_at = excluded.uploaded_at
            WHERE sync_records.cloud_url IS NULL
            "#,
        )
        .bind(id)
        .bind(url)
        .bind(Utc::now())
        .execute(&*self.db)
        .await?;

        if result.rows_affected() == 1 {
            info!(object_id = id, cloud_url = %url, "recorded cloud url");
            return Ok(());
        }

        match self.get(id).await?.cloud_url {
            Some(existing) if existing == url => {
                debug!(object_id = id, "cloud url already recorded");
                Ok(())
            }
            Some(existing) => Err(SyncError::AlreadySynced { id, existing }),
            // the conditional update only skips rows that already hold a url
            None => Err(SyncError::Sqlx(sqlx::Error::RowNotFound)),
        }
    }

    /// Record the outcome of a local-file deletion pass.
    ///
    /// Deleted names accumulate across passes; a name deleted now is dropped
    /// from the failed list. `local_deleted_at` keeps its first value and is
    /// only set once something was actually removed.
    pub async fn mark_local_deleted(
        &self,
        id: ObjectId,
        deleted: &[String],
        failed: &[String],
    ) -> SyncResult<()> {
        let record = self.get(id).await?;
        if record.cloud_url.is_none() {
            return Err(SyncError::LocalDeletePrecondition {
                id,
                reason: "no cloud url recorded".into(),
            });
        }

        let mut all_deleted: BTreeSet<String> = record.deleted_variants.into_iter().collect();
        all_deleted.extend(deleted.iter().cloned());
        let still_failed: Vec<String> = failed
            .iter()
            .filter(|name| !all_deleted.contains(*name))
            .cloned()
            .collect();
        let deleted_at: Option<DateTime<Utc>> = if deleted.is_empty() {
            None
        } else {
            Some(Utc::now())
        };

        sqlx::query(
            r#"
            UPDATE sync_records SET
                local_deleted_at = COALESCE(local_deleted_at, ?),
                deleted_variants = ?,
                failed_variants = ?
            WHERE object_id = ? AND cloud_url IS NOT NULL
            "#,
        )
        .bind(deleted_at)
        .bind(Json(all_deleted.into_iter().collect::<Vec<_>>()))
        .bind(Json(&still_failed))
        .bind(id)
        .execute(&*self.db)
        .await?;

        if !still_failed.is_empty() {
            warn!(object_id = id, failed = ?still_failed, "some local files could not be deleted");
        }
        Ok(())
    }

    /// Administrative reset: forget everything about an object's sync state.
    pub async fn clear(&self, id: ObjectId) -> SyncResult<()> {
        sqlx::query("DELETE FROM sync_records WHERE object_id = ?")
            .bind(id)
            .execute(&*self.db)
            .await?;
        info!(object_id = id, "cleared sync record");
        Ok(())
    }

    /// Keyset page of objects without a cloud URL, ordered by id.
    pub async fn list_unsynced_after(
        &self,
        after: Option<ObjectId>,
        limit: usize,
    ) -> SyncResult<Vec<MediaObject>> {
        let rows = sqlx::query_as::<_, MediaObject>(&format!(
            "SELECT {OBJECT_COLUMNS} FROM objects o \
             LEFT JOIN sync_records r ON r.object_id = o.id \
             WHERE r.cloud_url IS NULL AND o.id > ? \
             ORDER BY o.id ASC LIMIT ?"
        ))
        .bind(after.unwrap_or(ObjectId::MIN))
        .bind(limit as i64)
        .fetch_all(&*self.db)
        .await?;
        Ok(rows)
    }

    pub async fn count_unsynced(&self) -> SyncResult<u64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM objects o \
             LEFT JOIN sync_records r ON r.object_id = o.id \
             WHERE r.cloud_url IS NULL",
        )
        .fetch_one(&*self.db)
        .await?;
        Ok(count.max(0) as u64)
    }

    /// Keyset page of synced objects whose local files are still present.
    pub async fn list_pending_local_deletion(
        &self,
        after: Option<ObjectId>,
        limit: usize,
    ) -> SyncResult<Vec<MediaObject>> {
        let rows = sqlx::query_as::<_, MediaObject>(&format!(
            "SELECT {OBJECT_COLUMNS} FROM objects o \
             JOIN sync_records r ON r.object_id = o.id \
             WHERE r.cloud_url IS NOT NULL AND r.local_deleted_at IS NULL AND o.id > ? \
             ORDER BY o.id ASC LIMIT ?"
        ))
        .bind(after.unwrap_or(ObjectId::MIN))
        .bind(limit as i64)
        .fetch_all(&*self.db)
        .await?;
        Ok(rows)
    }

    /// Objects whose primary file has exactly this basename.
    pub async fn find_ids_by_file_name(&self, file_name: &str) -> SyncResult<Vec<ObjectId>> {
        if file_name.is_empty() {
            return Ok(Vec::new());
        }
        let ids = sqlx::query_scalar::<_, ObjectId>(
            "SELECT id FROM objects \
             WHERE local_path = ? OR local_path LIKE ? ESCAPE '\\' \
             ORDER BY id ASC",
        )
        .bind(file_name)
        .bind(format!("%/{}", escape_like(file_name)))
        .fetch_all(&*self.db)
        .await?;
        Ok(ids)
    }

    /// Objects declaring a variant whose basename is exactly this name.
    pub async fn find_ids_by_variant_name(&self, file_name: &str) -> SyncResult<Vec<ObjectId>> {
        if file_name.is_empty() {
            return Ok(Vec::new());
        }
        // variant_paths is a JSON array; match the quoted entry or its tail
        let ids = sqlx::query_scalar::<_, ObjectId>(
            "SELECT id FROM objects \
             WHERE variant_paths LIKE ? ESCAPE '\\' OR variant_paths LIKE ? ESCAPE '\\' \
             ORDER BY id ASC",
        )
        .bind(format!("%\"{}\"%", escape_like(file_name)))
        .bind(format!("%/{}\"%", escape_like(file_name)))
        .fetch_all(&*self.db)
        .await?;
        Ok(ids)
    }

    /// Every object id with its recorded cloud URL.
    pub async fn all_cloud_urls(&self) -> SyncResult<Vec<(ObjectId, String)>> {
        let rows = sqlx::query_as::<_, (ObjectId, String)>(
            "SELECT object_id, cloud_url FROM sync_records \
             WHERE cloud_url IS NOT NULL AND cloud_url != '' ORDER BY object_id ASC",
        )
        .fetch_all(&*self.db)
        .await?;
        Ok(rows)
    }

    /// Cloud URLs recorded for more than one object, with their use count.
    pub async fn find_duplicate_cloud_urls(&self) -> SyncResult<Vec<(String, i64)>> {
        let rows = sqlx::query_as::<_, (String, i64)>(
            "SELECT cloud_url, COUNT(*) AS uses FROM sync_records \
             WHERE cloud_url IS NOT NULL \
             GROUP BY cloud_url HAVING uses > 1 ORDER BY cloud_url ASC",
        )
        .fetch_all(&*self.db)
        .await?;
        Ok(rows)
    }

    /// Administrative repair: for every duplicated cloud URL keep the record
    /// of the lowest object id and reset the others. Returns the number of
    /// records reset.
    pub async fn cleanup_duplicates(&self) -> SyncResult<u64> {
        let mut cleaned = 0;
        for (url, uses) in self.find_duplicate_cloud_urls().await? {
            warn!(cloud_url = %url, uses, "found duplicated cloud url");
            let result = sqlx::query(
                "DELETE FROM sync_records WHERE cloud_url = ? AND object_id > \
                 (SELECT MIN(object_id) FROM sync_records WHERE cloud_url = ?)",
            )
            .bind(&url)
            .bind(&url)
            .execute(&*self.db)
            .await?;
            cleaned += result.rows_affected();
        }
        if cleaned > 0 {
            info!(cleaned, "reset duplicated upload records");
        }
        Ok(cleaned)
    }

    /// Population-wide counters. `in_flight` counts leases younger than
    /// `lease_ttl` as of `now`.
    pub async fn status_summary(
        &self,
        now: DateTime<Utc>,
        lease_ttl: std::time::Duration,
    ) -> SyncResult<StatusSummary> {
        let cutoff = now.timestamp_millis() - lease_ttl.as_millis() as i64;
        let (total_objects, synced, local_deleted, in_flight) =
            sqlx::query_as::<_, (i64, i64, i64, i64)>(
                "SELECT \
                    (SELECT COUNT(*) FROM objects), \
                    (SELECT COUNT(*) FROM sync_records WHERE cloud_url IS NOT NULL), \
                    (SELECT COUNT(*) FROM sync_records WHERE local_deleted_at IS NOT NULL), \
                    (SELECT COUNT(*) FROM sync_records \
                        WHERE lock_holder_since IS NOT NULL AND lock_holder_since > ?)",
            )
            .bind(cutoff)
            .fetch_one(&*self.db)
            .await?;

        Ok(StatusSummary {
            total_objects,
            synced,
            unsynced: self.count_unsynced().await? as i64,
            local_deleted,
            in_flight,
        })
    }
}

/// Escape `%`, `_` and the escape character itself for a LIKE pattern.
fn escape_like(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}
