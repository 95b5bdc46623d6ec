//! Client-held progress marker of a batch run.

use super::ObjectId;
use base64::{Engine as _, engine::general_purpose};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Advisory snapshot used to resume an interrupted batch run.
///
/// The checkpoint is never authoritative: whether an object still needs an
/// upload is always decided by its `SyncRecord`. `cursor` is the id of the
/// last object of the last completed page; the next page starts after it.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct BatchCheckpoint {
    /// The next page to process (1-based).
    pub current_page: u64,
    pub processed_count: u64,
    pub total_count: u64,
    pub cursor: Option<ObjectId>,
    pub timestamp: DateTime<Utc>,
}

impl BatchCheckpoint {
    /// Checkpoint of a run that has not processed anything yet.
    pub fn start(total_count: u64) -> Self {
        Self {
            current_page: 1,
            processed_count: 0,
            total_count,
            cursor: None,
            timestamp: Utc::now(),
        }
    }

    /// Record a finished page whose last object was `last_id`.
    pub fn advance(&mut self, processed_in_page: u64, last_id: Option<ObjectId>) {
        self.current_page += 1;
        self.processed_count += processed_in_page;
        if last_id.is_some() {
            self.cursor = last_id;
        }
        self.timestamp = Utc::now();
    }

    /// Whole-number completion percentage, as shown in progress displays.
    pub fn percent(&self) -> u64 {
        if self.total_count == 0 {
            return 0;
        }
        (self.processed_count * 100 / self.total_count).min(100)
    }

    /// Opaque token form, handed to HTTP clients that hold the checkpoint.
    pub fn to_token(&self) -> String {
        // serializing a plain struct of numbers and a timestamp cannot fail
        let json = serde_json::to_vec(self).unwrap_or_default();
        general_purpose::STANDARD.encode(json)
    }

    pub fn from_token(token: &str) -> Option<Self> {
        general_purpose::STANDARD
            .decode(token)
            .ok()
            .and_then(|bytes| serde_json::from_slice(&bytes).ok())
    }
}
