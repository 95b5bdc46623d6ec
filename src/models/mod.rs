//! Core data models for the media sync engine.
//!
//! These entities describe the local object population, the per-object
//! synchronization state and the advisory progress marker of a batch run.
//! Rows map to SQLite via `sqlx::FromRow` and serialize as JSON via `serde`
//! for the admin API and the CLI.

pub mod checkpoint;
pub mod object;
pub mod report;
pub mod sync_record;

/// Stable identifier of a syncable object.
pub type ObjectId = i64;
