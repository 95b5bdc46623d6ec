//! Shared fixtures: a scratch database, a scriptable gateway and helpers to
//! lay out local media files.
#![allow(dead_code)]

use async_trait::async_trait;
use media_cloud_sync::{
    BatchControl, BatchSettings, Credentials, NewMediaObject, SyncEngine, SyncError, SyncResult,
    SyncSettings, db,
    services::{auth::AuthCode, endpoint::UploadTarget, gateway::CloudGateway},
};
use sqlx::SqlitePool;
use std::{
    path::{Path, PathBuf},
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};
use tempfile::TempDir;

// ============================================================================
// Database
// ============================================================================

/// A migrated SQLite database file inside a temp directory.
pub struct TestDb {
    pub dir: TempDir,
    pub pool: Arc<SqlitePool>,
}

pub async fn test_db() -> TestDb {
    let dir = tempfile::tempdir().expect("tempdir");
    let url = format!("sqlite://{}", dir.path().join("sync.db").display());
    let pool = db::connect(&url).await.expect("connect");
    db::run_migrations(&pool).await.expect("migrate");
    TestDb {
        dir,
        pool: Arc::new(pool),
    }
}

pub fn settings() -> SyncSettings {
    SyncSettings {
        enabled: true,
        auto_replace: false,
        keep_local: true,
        credentials: Credentials {
            account_id: "1001".into(),
            secret_key: "good".into(),
        },
        local_base_url: Some("https://site.example/uploads/".into()),
        ..SyncSettings::default()
    }
}

pub fn fast_batch() -> BatchSettings {
    BatchSettings {
        page_size: 10,
        max_retries: 3,
        retry_base_delay: Duration::from_millis(5),
        cooldown: Duration::ZERO,
    }
}

pub fn engine(db: &TestDb, settings: SyncSettings, gateway: Arc<FakeGateway>) -> SyncEngine {
    SyncEngine::with_batch_settings(settings, db.pool.clone(), gateway, fast_batch())
}

// ============================================================================
// Local files
// ============================================================================

/// Write `name` under `dir` and return its path.
pub fn write_file(dir: &Path, name: &str, contents: &[u8]) -> PathBuf {
    let path = dir.join(name);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).expect("mkdir");
    }
    std::fs::write(&path, contents).expect("write file");
    path
}

/// Register a plain text object `obj-<id>.txt` backed by a real file.
pub async fn register_text_object(engine: &SyncEngine, dir: &Path, id: i64) {
    let path = write_file(dir, &format!("obj-{id}.txt"), format!("object {id}").as_bytes());
    engine
        .register(NewMediaObject {
            id,
            local_path: path.display().to_string(),
            variant_paths: Vec::new(),
            mime_type: Some("text/plain".into()),
            size_bytes: None,
        })
        .await
        .expect("register");
}

/// The image of the reap scenario: `img/a.jpg` with two thumbnails.
pub async fn register_image(engine: &SyncEngine, dir: &Path, id: i64) -> PathBuf {
    let primary = write_file(dir, "img/a.jpg", b"\xFF\xD8\xFFjpeg");
    write_file(dir, "img/a-150x150.jpg", b"\xFF\xD8\xFFthumb");
    write_file(dir, "img/a-300x300.jpg", b"\xFF\xD8\xFFmedium");
    engine
        .register(NewMediaObject {
            id,
            local_path: primary.display().to_string(),
            variant_paths: vec!["a-150x150.jpg".into(), "a-300x300.jpg".into()],
            mime_type: Some("image/jpeg".into()),
            size_bytes: None,
        })
        .await
        .expect("register image");
    primary
}

// ============================================================================
// Gateway
// ============================================================================

/// Scriptable in-memory cloud API.
#[derive(Default)]
pub struct FakeGateway {
    uploads: Mutex<Vec<PathBuf>>,
    authorize_calls: AtomicUsize,
    /// The first N authorize calls fail with an auth error.
    failing_authorizations: AtomicUsize,
    upload_delay: Duration,
    fixed_url: Option<String>,
    /// Cancel this control once the given number of uploads completed.
    cancel_after: Option<(usize, Arc<BatchControl>)>,
}

impl FakeGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_url(mut self, url: &str) -> Self {
        self.fixed_url = Some(url.to_string());
        self
    }

    pub fn with_upload_delay(mut self, delay: Duration) -> Self {
        self.upload_delay = delay;
        self
    }

    pub fn failing_first(self, authorizations: usize) -> Self {
        self.failing_authorizations
            .store(authorizations, Ordering::SeqCst);
        self
    }

    pub fn cancel_after(mut self, uploads: usize, control: Arc<BatchControl>) -> Self {
        self.cancel_after = Some((uploads, control));
        self
    }

    pub fn upload_count(&self) -> usize {
        self.uploads.lock().unwrap().len()
    }

    pub fn uploaded_paths(&self) -> Vec<PathBuf> {
        self.uploads.lock().unwrap().clone()
    }

    pub fn authorize_calls(&self) -> usize {
        self.authorize_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CloudGateway for FakeGateway {
    async fn authorize(&self) -> SyncResult<AuthCode> {
        self.authorize_calls.fetch_add(1, Ordering::SeqCst);
        let failing = self
            .failing_authorizations
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1));
        if failing.is_ok() {
            return Err(SyncError::Auth("remote api unavailable".into()));
        }
        Ok(AuthCode("AUTH".into()))
    }

    async fn resolve_upload_target(&self, _auth: &AuthCode) -> SyncResult<UploadTarget> {
        Ok(UploadTarget {
            base_url: "https://up.example".into(),
            signed_query: "sig=1".into(),
        })
    }

    async fn upload(&self, path: &Path, _target: &UploadTarget) -> SyncResult<String> {
        if !self.upload_delay.is_zero() {
            tokio::time::sleep(self.upload_delay).await;
        }
        let count = {
            let mut uploads = self.uploads.lock().unwrap();
            uploads.push(path.to_path_buf());
            uploads.len()
        };
        if let Some((after, control)) = &self.cancel_after {
            if count == *after {
                control.cancel();
            }
        }
        Ok(match &self.fixed_url {
            Some(url) => url.clone(),
            None => format!(
                "https://cdn.example/{}",
                path.file_name().unwrap().to_string_lossy()
            ),
        })
    }

    async fn download_link(&self, _auth: &AuthCode, file: &str) -> SyncResult<String> {
        Ok(format!("https://dl.example/{file}?sig=1"))
    }
}
