pub mod batch;
pub mod file;
pub mod kv;
pub mod memory;

pub use batch::{
    BATCH_PREFIX, BatchManager, SENT_AT_PLACEHOLDER, TMP_SUFFIX, batch_index_key,
};
pub use file::FileBatchManager;
pub use kv::{InMemoryKeyValueStore, KeyValueStore, PropertiesFile};
pub use memory::MemoryBatchManager;

use crate::config::Config;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

/// The key routed to the batch manager instead of the key/value store.
pub const EVENT: &str = "event";

/// The key/value store key holding the persisted retry metadata record.
pub const RETRY_METADATA: &str = "RETRY_METADATA";

/// Separator used when joining closed-batch identifiers for `read(EVENT)`.
/// Callers split on this to recover the list.
pub const BATCH_LIST_SEPARATOR: &str = ", ";

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("payload of {size} bytes exceeds the {limit} byte limit")]
    PayloadTooLarge { size: usize, limit: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LibraryVersion {
    pub name: &'static str,
    pub version: &'static str,
}

/// Façade over the batch manager and the typed key/value store.
///
/// String writes against [`EVENT`] are routed to the batch manager behind the
/// payload size cap; every other key goes to the key/value store. Typed
/// non-string operations never touch the batch path.
pub struct Storage {
    batch_manager: Arc<dyn BatchManager>,
    kv: Arc<dyn KeyValueStore>,
    max_payload_size: usize,
}

impl Storage {
    pub fn new(
        batch_manager: Arc<dyn BatchManager>,
        kv: Arc<dyn KeyValueStore>,
        max_payload_size: usize,
    ) -> Self {
        Self {
            batch_manager,
            kv,
            max_payload_size,
        }
    }

    /// File-backed storage rooted at `config.storage_dir`, namespaced by the
    /// write key. Batches become files; the counter and retry metadata live
    /// in a properties file next to the batch directory.
    pub async fn file(config: &Config) -> Result<Self, StorageError> {
        tokio::fs::create_dir_all(&config.storage_dir).await?;
        let kv: Arc<dyn KeyValueStore> = Arc::new(PropertiesFile::open(
            config
                .storage_dir
                .join(format!("{}.properties", config.write_key)),
        ));
        let batch_manager = Arc::new(
            FileBatchManager::new(
                &config.storage_dir,
                &config.write_key,
                config.platform_type,
                config.max_batch_size,
                Arc::clone(&kv),
            )
            .await?,
        );
        Ok(Self::new(batch_manager, kv, config.max_payload_size))
    }

    /// Volatile storage for embedded and test use.
    pub fn in_memory(config: &Config) -> Self {
        let kv: Arc<dyn KeyValueStore> = Arc::new(InMemoryKeyValueStore::new());
        let batch_manager = Arc::new(MemoryBatchManager::new(
            &config.write_key,
            config.platform_type,
            config.max_batch_size,
            Arc::clone(&kv),
        ));
        Self::new(batch_manager, kv, config.max_payload_size)
    }

    /// Writes a string value. The [`EVENT`] key appends the payload to the
    /// open batch; any other key goes to the key/value store.
    pub async fn write_string(&self, key: &str, value: &str) -> Result<(), StorageError> {
        if key == EVENT {
            if value.len() >= self.max_payload_size {
                return Err(StorageError::PayloadTooLarge {
                    size: value.len(),
                    limit: self.max_payload_size,
                });
            }
            return self.batch_manager.store_event(value).await;
        }
        self.kv.write_string(key, value);
        Ok(())
    }

    /// Reads a string value. The [`EVENT`] key yields the closed-batch
    /// identifiers joined by [`BATCH_LIST_SEPARATOR`].
    pub async fn read_string(&self, key: &str, default: &str) -> String {
        if key == EVENT {
            let ids = self.batch_manager.read().await;
            if ids.is_empty() {
                return default.to_string();
            }
            return ids.join(BATCH_LIST_SEPARATOR);
        }
        self.kv.read_string(key, default)
    }

    // Typed non-string operations. Writes against the event key are ignored:
    // only string payloads can become events.

    pub fn write_int(&self, key: &str, value: i32) {
        if key == EVENT {
            return;
        }
        self.kv.write_int(key, value);
    }

    pub fn read_int(&self, key: &str, default: i32) -> i32 {
        self.kv.read_int(key, default)
    }

    pub fn write_long(&self, key: &str, value: i64) {
        if key == EVENT {
            return;
        }
        self.kv.write_long(key, value);
    }

    pub fn read_long(&self, key: &str, default: i64) -> i64 {
        self.kv.read_long(key, default)
    }

    pub fn write_bool(&self, key: &str, value: bool) {
        if key == EVENT {
            return;
        }
        self.kv.write_bool(key, value);
    }

    pub fn read_bool(&self, key: &str, default: bool) -> bool {
        self.kv.read_bool(key, default)
    }

    /// Removes a key from the key/value store.
    pub fn remove_key(&self, key: &str) {
        self.kv.remove(key);
    }

    /// Identifiers of all closed batches, in upload order.
    pub async fn read_file_list(&self) -> Vec<String> {
        self.batch_manager.read().await
    }

    pub async fn read_batch_content(&self, id: &str) -> Option<String> {
        self.batch_manager.read_content(id).await
    }

    /// Finalises the open batch so pending events become uploadable.
    pub async fn rollover(&self) -> Result<(), StorageError> {
        self.batch_manager.rollover().await
    }

    /// Removes a closed batch. Returns whether something was removed.
    pub async fn remove(&self, id: &str) -> bool {
        self.batch_manager.remove(id).await
    }

    /// Drops the open batch without finalising it.
    pub async fn close(&self) {
        self.batch_manager.close_and_reset().await;
    }

    /// Clears every key and every batch.
    pub async fn delete(&self) -> Result<(), StorageError> {
        self.kv.clear();
        self.batch_manager.delete().await?;
        debug!("storage wiped");
        Ok(())
    }

    pub fn get_library_version(&self) -> LibraryVersion {
        LibraryVersion {
            name: env!("CARGO_PKG_NAME"),
            version: env!("CARGO_PKG_VERSION"),
        }
    }

    /// Shared handle to the underlying key/value store, for components that
    /// persist their own records (retry metadata).
    pub fn key_value_store(&self) -> Arc<dyn KeyValueStore> {
        Arc::clone(&self.kv)
    }
}
