//! Represents a local media object (one uploaded file plus its renditions).

use super::ObjectId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::path::{Path, PathBuf};

/// A syncable unit: a primary file and zero or more secondary variants
/// (for images, the resized thumbnails generated next to the original).
///
/// The `id` is assigned by the caller and never changes for the lifetime of
/// the object.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug, PartialEq)]
pub struct MediaObject {
    /// Stable identifier, unique across the population.
    pub id: ObjectId,

    /// Absolute path of the primary variant on local disk.
    pub local_path: String,

    /// Secondary variants. Relative entries are resolved against the
    /// directory of `local_path`.
    #[sqlx(json)]
    pub variant_paths: Vec<String>,

    /// MIME type recorded at registration, if known.
    pub mime_type: Option<String>,

    /// Size of the primary variant in bytes.
    pub size_bytes: i64,

    /// When this object was registered.
    pub created_at: DateTime<Utc>,
}

impl MediaObject {
    pub fn primary_path(&self) -> &Path {
        Path::new(&self.local_path)
    }

    /// Basename of the primary file (`a.jpg` for `/img/a.jpg`).
    pub fn file_name(&self) -> String {
        file_name_of(self.primary_path())
    }

    /// Resolve every declared variant to a concrete path.
    pub fn resolved_variant_paths(&self) -> Vec<PathBuf> {
        let base = self
            .primary_path()
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();
        self.variant_paths
            .iter()
            .map(|variant| base.join(variant))
            .collect()
    }
}

/// Payload accepted when registering a new object.
#[derive(Deserialize, Serialize, Clone, Debug)]
pub struct NewMediaObject {
    pub id: ObjectId,
    pub local_path: String,
    #[serde(default)]
    pub variant_paths: Vec<String>,
    pub mime_type: Option<String>,
    #[serde(default)]
    pub size_bytes: Option<i64>,
}

pub(crate) fn file_name_of(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default()
}
