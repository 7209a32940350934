use super::result::RetryAbleError;
use crate::storage::{KeyValueStore, RETRY_METADATA};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

pub const RETRY_ATTEMPT_HEADER: &str = "Rsa-Retry-Attempt";
pub const SINCE_LAST_ATTEMPT_HEADER: &str = "Rsa-Since-Last-Attempt";
pub const RETRY_REASON_HEADER: &str = "Rsa-Retry-Reason";

/// The single persisted retry record. At most one exists at any time; the
/// `batchId` field names the batch it was recorded for, which guards against
/// reading state left over from a batch that has since been removed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryMetadata {
    #[serde(rename = "batchId")]
    pub batch_id: u64,
    pub attempt: u32,
    #[serde(rename = "lastAttemptTimestampMs")]
    pub last_attempt_timestamp_ms: i64,
    pub reason: String,
}

impl RetryMetadata {
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }

    /// Any parse failure, including missing required fields, yields `None`.
    /// Unknown fields are tolerated.
    pub fn from_json(raw: &str) -> Option<Self> {
        serde_json::from_str(raw).ok()
    }
}

/// Derives the three retry headers for the batch currently being uploaded
/// and keeps the backing record current across attempts and restarts.
pub struct RetryHeadersProvider {
    kv: Arc<dyn KeyValueStore>,
}

impl RetryHeadersProvider {
    pub fn new(kv: Arc<dyn KeyValueStore>) -> Self {
        Self { kv }
    }

    /// Headers for the next attempt of `batch_id`, or an empty map on the
    /// first attempt. A record for a different batch is stale: it yields no
    /// headers but is left in place, since a later call for its own batch id
    /// must still see it.
    pub fn get_headers(&self, batch_id: u64, now_ms: i64) -> HashMap<String, String> {
        let raw = self.kv.read_string(RETRY_METADATA, "");
        let Some(record) = RetryMetadata::from_json(&raw) else {
            return HashMap::new();
        };
        if record.batch_id != batch_id {
            debug!(
                "retry metadata is for batch {} not {batch_id}, ignoring",
                record.batch_id
            );
            return HashMap::new();
        }

        // Clock skew across restarts can make `now` precede the recorded
        // attempt; the elapsed time is clamped to zero.
        let elapsed = (now_ms - record.last_attempt_timestamp_ms).max(0);

        HashMap::from([
            (RETRY_ATTEMPT_HEADER.to_string(), record.attempt.to_string()),
            (SINCE_LAST_ATTEMPT_HEADER.to_string(), elapsed.to_string()),
            (RETRY_REASON_HEADER.to_string(), record.reason),
        ])
    }

    /// Records a failed attempt. A prior record for the same batch bumps the
    /// attempt count; anything else starts over at 1.
    pub fn record_failure(&self, batch_id: u64, now_ms: i64, error: RetryAbleError) {
        let raw = self.kv.read_string(RETRY_METADATA, "");
        let attempt = match RetryMetadata::from_json(&raw) {
            Some(prev) if prev.batch_id == batch_id => prev.attempt + 1,
            _ => 1,
        };

        let record = RetryMetadata {
            batch_id,
            attempt,
            last_attempt_timestamp_ms: now_ms,
            reason: error.reason(),
        };
        self.kv.write_string(RETRY_METADATA, &record.to_json());
    }

    /// Removes the record entirely, on success or terminal failure.
    pub fn clear(&self) {
        self.kv.remove(RETRY_METADATA);
    }
}
