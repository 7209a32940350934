use super::StorageError;
use async_trait::async_trait;

#[cfg(test)]
use mockall::automock;

/// Literal opening frame of every batch payload.
pub const BATCH_PREFIX: &str = "{\"batch\":[";

/// Placeholder written at rollover; rewritten with the current UTC timestamp
/// immediately before each upload attempt.
pub const SENT_AT_PLACEHOLDER: &str = "{{_sentAt_}}";

/// Literal appended before the placeholder when a batch is finalised.
pub const BATCH_SUFFIX_OPEN: &str = "],\"sentAt\":\"";

/// Literal appended after the placeholder when a batch is finalised.
pub const BATCH_SUFFIX_CLOSE: &str = "\"}";

/// Suffix marking an open (not yet finalised) batch.
pub const TMP_SUFFIX: &str = ".tmp";

/// Key/value store key holding the batch index counter for a write key.
pub fn batch_index_key(write_key: &str) -> String {
    format!("rudderstack.event.batch.index.{write_key}")
}

/// Life-cycle of persisted batches: append events to the single open batch,
/// finalise it on demand, enumerate and drain the closed ones.
///
/// At most one open batch exists per write key. All mutating operations are
/// serialised internally; reads are snapshots and may race with writes.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait BatchManager: Send + Sync {
    /// Appends an event payload to the open batch, creating one if none is
    /// open. An open batch that has already reached the size threshold is
    /// finalised before the append.
    async fn store_event(&self, payload: &str) -> Result<(), StorageError>;

    /// Identifiers of all closed batches, in upload order.
    async fn read(&self) -> Vec<String>;

    /// Raw content of a closed batch, or `None` if it is absent.
    async fn read_content(&self, id: &str) -> Option<String>;

    /// Deletes a closed batch. Returns whether something was removed.
    async fn remove(&self, id: &str) -> bool;

    /// Finalises the open batch and advances the index counter. No-op when
    /// nothing is open.
    async fn rollover(&self) -> Result<(), StorageError>;

    /// Drops the open batch without finalising it.
    async fn close_and_reset(&self);

    /// Removes every closed batch and drops the open batch.
    async fn delete(&self) -> Result<(), StorageError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn batch_framing_literals_compose_into_valid_json() {
        let framed = format!(
            "{BATCH_PREFIX}{{\"event\":\"a\"}}{BATCH_SUFFIX_OPEN}{SENT_AT_PLACEHOLDER}{BATCH_SUFFIX_CLOSE}"
        );
        let rewritten = framed.replace(SENT_AT_PLACEHOLDER, "2020-01-01T00:00:00.000Z");
        let parsed: serde_json::Value = serde_json::from_str(&rewritten).unwrap();
        assert_eq!(parsed["sentAt"], "2020-01-01T00:00:00.000Z");
        assert!(parsed["batch"].is_array());
    }

    #[test]
    fn batch_index_key_is_scoped_by_write_key() {
        assert_eq!(
            batch_index_key("wk-1"),
            "rudderstack.event.batch.index.wk-1"
        );
        assert_ne!(batch_index_key("a"), batch_index_key("b"));
    }
}
