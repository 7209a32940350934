use super::StorageError;
use super::batch::{
    BATCH_PREFIX, BATCH_SUFFIX_CLOSE, BATCH_SUFFIX_OPEN, BatchManager, SENT_AT_PLACEHOLDER,
    batch_index_key,
};
use super::kv::KeyValueStore;
use crate::config::PlatformType;
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;

struct OpenBatch {
    index: u64,
    buf: String,
}

/// In-memory batch manager mirroring the file backend's contract. Closed
/// batches live in a map keyed by index; the counter goes through the same
/// key/value store protocol so both backends are interchangeable.
pub struct MemoryBatchManager {
    batches: RwLock<HashMap<u64, String>>,
    open: Mutex<Option<OpenBatch>>,
    index_key: String,
    kv: Arc<dyn KeyValueStore>,
    platform: PlatformType,
    max_batch_size: usize,
}

impl MemoryBatchManager {
    pub fn new(
        write_key: &str,
        platform: PlatformType,
        max_batch_size: usize,
        kv: Arc<dyn KeyValueStore>,
    ) -> Self {
        Self {
            batches: RwLock::new(HashMap::new()),
            open: Mutex::new(None),
            index_key: batch_index_key(write_key),
            kv,
            platform,
            max_batch_size,
        }
    }

    fn finalize(&self, batch: OpenBatch) {
        let OpenBatch { index, mut buf } = batch;
        buf.push_str(BATCH_SUFFIX_OPEN);
        buf.push_str(SENT_AT_PLACEHOLDER);
        buf.push_str(BATCH_SUFFIX_CLOSE);

        let len = buf.len();
        self.batches.write().insert(index, buf);
        self.kv.write_long(&self.index_key, index as i64 + 1);
        debug!("finalised batch {index} ({len} bytes)");
    }
}

#[async_trait]
impl BatchManager for MemoryBatchManager {
    async fn store_event(&self, payload: &str) -> Result<(), StorageError> {
        let mut open = self.open.lock().await;

        let mut batch = match open.take() {
            Some(batch) => batch,
            None => OpenBatch {
                index: self.kv.read_long(&self.index_key, 0).max(0) as u64,
                buf: String::new(),
            },
        };

        if batch.buf.len() > self.max_batch_size {
            let next_index = batch.index + 1;
            self.finalize(batch);
            batch = OpenBatch {
                index: next_index,
                buf: String::new(),
            };
        }

        if batch.buf.is_empty() {
            batch.buf.push_str(BATCH_PREFIX);
        } else {
            batch.buf.push(',');
        }
        batch.buf.push_str(payload);

        *open = Some(batch);
        Ok(())
    }

    async fn read(&self) -> Vec<String> {
        let mut indices: Vec<u64> = self.batches.read().keys().copied().collect();
        if self.platform == PlatformType::Server {
            indices.sort_unstable();
        }
        indices.iter().map(u64::to_string).collect()
    }

    async fn read_content(&self, id: &str) -> Option<String> {
        let index: u64 = id.parse().ok()?;
        self.batches.read().get(&index).cloned()
    }

    async fn remove(&self, id: &str) -> bool {
        let Ok(index) = id.parse::<u64>() else {
            return false;
        };
        self.batches.write().remove(&index).is_some()
    }

    async fn rollover(&self) -> Result<(), StorageError> {
        let mut open = self.open.lock().await;
        if let Some(batch) = open.take() {
            self.finalize(batch);
        }
        Ok(())
    }

    async fn close_and_reset(&self) {
        let mut open = self.open.lock().await;
        *open = None;
    }

    async fn delete(&self) -> Result<(), StorageError> {
        let mut open = self.open.lock().await;
        *open = None;
        self.batches.write().clear();
        Ok(())
    }
}
