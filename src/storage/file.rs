use super::StorageError;
use super::batch::{
    BATCH_PREFIX, BATCH_SUFFIX_CLOSE, BATCH_SUFFIX_OPEN, BatchManager, SENT_AT_PLACEHOLDER,
    TMP_SUFFIX, batch_index_key,
};
use super::kv::KeyValueStore;
use crate::config::PlatformType;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::debug;

/// The open batch as tracked in memory: its index and its current byte
/// length on disk.
#[derive(Debug, Clone, Copy)]
struct OpenBatch {
    index: u64,
    len: u64,
}

/// File-backed batch manager. Closed batches are files named by their index
/// under `<base>/<write_key>/`; the open batch carries a `.tmp` suffix; the
/// index counter lives in the key/value store under a write-key-scoped key.
pub struct FileBatchManager {
    dir: PathBuf,
    index_key: String,
    kv: Arc<dyn KeyValueStore>,
    platform: PlatformType,
    max_batch_size: usize,
    open: Mutex<Option<OpenBatch>>,
}

impl FileBatchManager {
    pub async fn new(
        base_dir: &Path,
        write_key: &str,
        platform: PlatformType,
        max_batch_size: usize,
        kv: Arc<dyn KeyValueStore>,
    ) -> Result<Self, StorageError> {
        let dir = base_dir.join(write_key);
        fs::create_dir_all(&dir).await?;

        Ok(Self {
            dir,
            index_key: batch_index_key(write_key),
            kv,
            platform,
            max_batch_size,
            open: Mutex::new(None),
        })
    }

    fn tmp_path(&self, index: u64) -> PathBuf {
        self.dir.join(format!("{index}{TMP_SUFFIX}"))
    }

    fn closed_path(&self, index: u64) -> PathBuf {
        self.dir.join(index.to_string())
    }

    /// Resumes the `.tmp` file left behind by an earlier process (or by
    /// `close_and_reset`), or starts a fresh open batch at the counter value.
    async fn resume_or_create(&self) -> OpenBatch {
        let index = self.kv.read_long(&self.index_key, 0).max(0) as u64;
        let len = match fs::metadata(self.tmp_path(index)).await {
            Ok(meta) => meta.len(),
            Err(_) => 0,
        };
        OpenBatch { index, len }
    }

    /// Appends the closing frame, strips the `.tmp` suffix and advances the
    /// index counter.
    async fn finalize(&self, batch: OpenBatch) -> Result<(), StorageError> {
        let tmp = self.tmp_path(batch.index);
        let mut file = fs::OpenOptions::new().append(true).open(&tmp).await?;
        file.write_all(
            format!("{BATCH_SUFFIX_OPEN}{SENT_AT_PLACEHOLDER}{BATCH_SUFFIX_CLOSE}").as_bytes(),
        )
        .await?;
        file.sync_all().await?;
        drop(file);

        fs::rename(&tmp, self.closed_path(batch.index)).await?;
        self.kv.write_long(&self.index_key, batch.index as i64 + 1);

        debug!("finalised batch {} ({} bytes)", batch.index, batch.len);
        Ok(())
    }
}

#[async_trait]
impl BatchManager for FileBatchManager {
    async fn store_event(&self, payload: &str) -> Result<(), StorageError> {
        let mut open = self.open.lock().await;

        let mut batch = match *open {
            Some(batch) => batch,
            None => self.resume_or_create().await,
        };

        // Size is checked at the start of the append: a batch that already
        // crossed the threshold is finalised before this event goes in.
        if batch.len as usize > self.max_batch_size {
            self.finalize(batch).await?;
            batch = OpenBatch {
                index: batch.index + 1,
                len: 0,
            };
        }

        let chunk = if batch.len == 0 {
            format!("{BATCH_PREFIX}{payload}")
        } else {
            format!(",{payload}")
        };

        let path = self.tmp_path(batch.index);
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;
        file.write_all(chunk.as_bytes()).await?;
        file.flush().await?;

        batch.len += chunk.len() as u64;
        *open = Some(batch);
        Ok(())
    }

    async fn read(&self) -> Vec<String> {
        let mut ids = Vec::new();
        let Ok(mut entries) = fs::read_dir(&self.dir).await else {
            return ids;
        };

        while let Ok(Some(entry)) = entries.next_entry().await {
            if let Some(name) = entry.file_name().to_str()
                && name.parse::<u64>().is_ok()
            {
                ids.push(name.to_string());
            }
        }

        // Server deployments need strict creation order; mobile deployments
        // tolerate filesystem order and skip the sort.
        if self.platform == PlatformType::Server {
            ids.sort_by_key(|id| id.parse::<u64>().unwrap_or(u64::MAX));
        }
        ids
    }

    async fn read_content(&self, id: &str) -> Option<String> {
        fs::read_to_string(self.dir.join(id)).await.ok()
    }

    async fn remove(&self, id: &str) -> bool {
        let removed = fs::remove_file(self.dir.join(id)).await.is_ok();
        if removed {
            debug!("removed batch {id}");
        }
        removed
    }

    async fn rollover(&self) -> Result<(), StorageError> {
        let mut open = self.open.lock().await;
        if let Some(batch) = *open {
            self.finalize(batch).await?;
            *open = None;
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

        let mut entries = fs::read_dir(&self.dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            if let Some(name) = entry.file_name().to_str()
                && (name.parse::<u64>().is_ok() || name.ends_with(TMP_SUFFIX))
            {
                fs::remove_file(entry.path()).await?;
            }
        }
        debug!("deleted all batches under {}", self.dir.display());
        Ok(())
    }
}
