pub mod anonymous_id;
pub mod backoff;
pub mod result;
pub mod retry_headers;

pub use backoff::{Backoff, BackoffConfig, MaxAttemptsPolicy};
pub use result::{EventUploadResult, NonRetryAbleError, RetryAbleError};
pub use retry_headers::{
    RETRY_ATTEMPT_HEADER, RETRY_REASON_HEADER, RetryHeadersProvider, RetryMetadata,
    SINCE_LAST_ATTEMPT_HEADER,
};

use crate::sender::EventSender;
use crate::storage::{BATCH_LIST_SEPARATOR, EVENT, SENT_AT_PLACEHOLDER, Storage};
use anonymous_id::extract_anonymous_id;
use chrono::{SecondsFormat, Utc};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Sentinel pushed onto the signal channel by `flush()`.
pub const UPLOAD_SIGNAL: &str = "#!upload";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploaderState {
    Idle,
    Running,
    Cancelled,
}

/// Host notifications for the two fatal-for-stream errors. Defaults log and
/// nothing else.
pub struct UploaderCallbacks {
    pub on_invalid_write_key: Box<dyn Fn() + Send + Sync>,
    pub on_source_disabled: Box<dyn Fn() + Send + Sync>,
}

impl Default for UploaderCallbacks {
    fn default() -> Self {
        Self {
            on_invalid_write_key: Box::new(|| warn!("write key rejected by the data plane")),
            on_source_disabled: Box::new(|| warn!("source disabled on the data plane")),
        }
    }
}

/// Whether the worker keeps going after a batch or a signal.
enum Flow {
    Continue,
    Stop,
}

struct UploaderInner {
    state: UploaderState,
    signal_tx: Option<mpsc::UnboundedSender<String>>,
    cancel: CancellationToken,
}

/// Everything the worker task needs, shared between it and the handle.
struct UploaderCore {
    storage: Arc<Storage>,
    sender: Arc<dyn EventSender>,
    retry_headers: RetryHeadersProvider,
    backoff_config: BackoffConfig,
    callbacks: UploaderCallbacks,
}

/// Drains the signal channel and uploads every closed batch sequentially,
/// in creation order, with backoff between retries and per-class terminal
/// handling. At most one worker task is live at a time.
pub struct Uploader {
    core: Arc<UploaderCore>,
    inner: Arc<Mutex<UploaderInner>>,
}

impl Uploader {
    pub fn new(
        storage: Arc<Storage>,
        sender: Arc<dyn EventSender>,
        backoff_config: BackoffConfig,
        callbacks: UploaderCallbacks,
    ) -> Self {
        let retry_headers = RetryHeadersProvider::new(storage.key_value_store());
        Self {
            core: Arc::new(UploaderCore {
                storage,
                sender,
                retry_headers,
                backoff_config,
                callbacks,
            }),
            inner: Arc::new(Mutex::new(UploaderInner {
                state: UploaderState::Idle,
                signal_tx: None,
                cancel: CancellationToken::new(),
            })),
        }
    }

    pub fn state(&self) -> UploaderState {
        self.inner.lock().state
    }

    /// Spawns the worker task. Idempotent while running; from `Idle` or
    /// `Cancelled` the signal channel and cancellation token are recreated.
    pub fn start(&self) {
        let mut inner = self.inner.lock();
        if inner.state == UploaderState::Running {
            return;
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        inner.signal_tx = Some(tx);
        inner.cancel = cancel.clone();
        inner.state = UploaderState::Running;

        let core = Arc::clone(&self.core);
        let control = Arc::clone(&self.inner);
        tokio::spawn(async move {
            run_worker(core, control, rx, cancel).await;
        });
        debug!("upload worker started");
    }

    /// Non-blocking request to upload everything currently stored. Lost
    /// sends (no live channel) are silently dropped.
    pub fn flush(&self) {
        let inner = self.inner.lock();
        if let Some(tx) = &inner.signal_tx {
            let _ = tx.send(UPLOAD_SIGNAL.to_string());
        }
    }

    /// Cancels the worker and closes the signal channel. `start()` may be
    /// called again afterwards.
    pub fn cancel(&self) {
        cancel_inner(&self.inner);
    }
}

fn cancel_inner(inner: &Mutex<UploaderInner>) {
    let mut inner = inner.lock();
    if inner.state == UploaderState::Cancelled {
        return;
    }
    inner.cancel.cancel();
    inner.signal_tx = None;
    inner.state = UploaderState::Cancelled;
    debug!("upload worker cancelled");
}

async fn run_worker(
    core: Arc<UploaderCore>,
    control: Arc<Mutex<UploaderInner>>,
    mut rx: mpsc::UnboundedReceiver<String>,
    cancel: CancellationToken,
) {
    let mut backoff = Backoff::new(core.backoff_config.clone());
    let mut last_anonymous_id: Option<String> = None;

    loop {
        let signal = tokio::select! {
            _ = cancel.cancelled() => break,
            signal = rx.recv() => signal,
        };
        let Some(_signal) = signal else {
            break;
        };

        let flow = core
            .process_signal(&control, &cancel, &mut backoff, &mut last_anonymous_id)
            .await;
        if matches!(flow, Flow::Stop) {
            break;
        }
    }
    debug!("upload worker stopped");
}

impl UploaderCore {
    /// One flush cycle: finalise pending events, then upload each closed
    /// batch in enumeration order.
    async fn process_signal(
        &self,
        control: &Mutex<UploaderInner>,
        cancel: &CancellationToken,
        backoff: &mut Backoff,
        last_anonymous_id: &mut Option<String>,
    ) -> Flow {
        if let Err(e) = self.storage.rollover().await {
            warn!("rollover failed: {e}");
        }

        let joined = self.storage.read_string(EVENT, "").await;
        if joined.is_empty() {
            return Flow::Continue;
        }
        let ids: Vec<String> = joined
            .split(BATCH_LIST_SEPARATOR)
            .map(str::to_string)
            .collect();
        debug!("uploading {} closed batches", ids.len());

        for id in &ids {
            if cancel.is_cancelled() {
                return Flow::Stop;
            }
            let flow = self
                .upload_batch(control, id, cancel, backoff, last_anonymous_id)
                .await;
            if matches!(flow, Flow::Stop) {
                return Flow::Stop;
            }
        }
        Flow::Continue
    }

    async fn upload_batch(
        &self,
        control: &Mutex<UploaderInner>,
        id: &str,
        cancel: &CancellationToken,
        backoff: &mut Backoff,
        last_anonymous_id: &mut Option<String>,
    ) -> Flow {
        let Some(content) = self.storage.read_batch_content(id).await else {
            debug!("batch {id} is gone, skipping");
            return Flow::Continue;
        };
        let Ok(batch_id) = id.parse::<u64>() else {
            warn!("batch identifier {id} is not numeric, removing");
            self.storage.remove(id).await;
            return Flow::Continue;
        };

        let anonymous_id =
            extract_anonymous_id(&content).unwrap_or_else(|| Uuid::new_v4().to_string());
        if last_anonymous_id.as_deref() != Some(anonymous_id.as_str()) {
            self.sender.set_anonymous_id(&anonymous_id);
            *last_anonymous_id = Some(anonymous_id);
        }

        loop {
            if cancel.is_cancelled() {
                return Flow::Stop;
            }

            let now = Utc::now();
            let now_ms = now.timestamp_millis();
            let headers = self.retry_headers.get_headers(batch_id, now_ms);
            let payload = content.replace(
                SENT_AT_PLACEHOLDER,
                &now.to_rfc3339_opts(SecondsFormat::Millis, true),
            );

            let result = tokio::select! {
                _ = cancel.cancelled() => return Flow::Stop,
                result = self.sender.send(&payload, &headers) => result,
            };

            match result {
                EventUploadResult::Success(_) => {
                    info!("batch {batch_id} uploaded");
                    self.retry_headers.clear();
                    backoff.reset();
                    self.storage.remove(id).await;
                    return Flow::Continue;
                }
                EventUploadResult::RetryAble(err) => {
                    warn!("batch {batch_id} upload failed, will retry: {err}");
                    self.retry_headers.record_failure(batch_id, now_ms, err);
                    tokio::select! {
                        _ = cancel.cancelled() => return Flow::Stop,
                        _ = backoff.delay_with_backoff() => {}
                    }
                }
                EventUploadResult::NonRetryAble(err) => {
                    self.retry_headers.clear();
                    backoff.reset();
                    return self.handle_terminal(control, id, batch_id, err).await;
                }
            }
        }
    }

    async fn handle_terminal(
        &self,
        control: &Mutex<UploaderInner>,
        id: &str,
        batch_id: u64,
        err: NonRetryAbleError,
    ) -> Flow {
        match err {
            NonRetryAbleError::BadRequest | NonRetryAbleError::PayloadTooLarge => {
                warn!("batch {batch_id} rejected ({err}), dropping it");
                self.storage.remove(id).await;
                Flow::Continue
            }
            NonRetryAbleError::InvalidWriteKey => {
                error!("aborting uploads: {err}");
                cancel_inner(control);
                (self.callbacks.on_invalid_write_key)();
                Flow::Stop
            }
            NonRetryAbleError::SourceDisabled => {
                error!("aborting uploads: {err}");
                cancel_inner(control);
                (self.callbacks.on_source_disabled)();
                Flow::Stop
            }
        }
    }
}
