use async_trait::async_trait;
use rudder_uploader::config::Config;
use rudder_uploader::sender::EventSender;
use rudder_uploader::storage::{self, RETRY_METADATA, SENT_AT_PLACEHOLDER, Storage};
use rudder_uploader::upload::{
    BackoffConfig, EventUploadResult, NonRetryAbleError, RetryAbleError, Uploader,
    UploaderCallbacks, UploaderState,
};
use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

#[derive(Debug, Clone)]
struct SendCall {
    payload: String,
    headers: HashMap<String, String>,
}

/// Sender double that replays a scripted result per call and records what it
/// was asked to send. An exhausted script answers with success.
struct ScriptedSender {
    script: Mutex<VecDeque<EventUploadResult>>,
    calls: Mutex<Vec<SendCall>>,
    anonymous_ids: Mutex<Vec<String>>,
}

impl ScriptedSender {
    fn new(script: Vec<EventUploadResult>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            calls: Mutex::new(Vec::new()),
            anonymous_ids: Mutex::new(Vec::new()),
        }
    }

    fn calls(&self) -> Vec<SendCall> {
        self.calls.lock().unwrap().clone()
    }

    fn anonymous_ids(&self) -> Vec<String> {
        self.anonymous_ids.lock().unwrap().clone()
    }
}

#[async_trait]
impl EventSender for ScriptedSender {
    async fn send(
        &self,
        payload: &str,
        extra_headers: &HashMap<String, String>,
    ) -> EventUploadResult {
        self.calls.lock().unwrap().push(SendCall {
            payload: payload.to_string(),
            headers: extra_headers.clone(),
        });
        self.script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| EventUploadResult::Success(String::new()))
    }

    fn set_anonymous_id(&self, anonymous_id: &str) {
        self.anonymous_ids
            .lock()
            .unwrap()
            .push(anonymous_id.to_string());
    }
}

fn test_config() -> Config {
    let mut config = Config {
        write_key: "test-write-key".to_string(),
        backoff: BackoffConfig {
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            multiplier: 2,
            jitter: false,
        },
        ..Config::default()
    };
    config.post_process();
    config
}

fn build(
    script: Vec<EventUploadResult>,
    callbacks: UploaderCallbacks,
) -> (Arc<Storage>, Arc<ScriptedSender>, Arc<Uploader>) {
    let config = test_config();
    let storage = Arc::new(Storage::in_memory(&config));
    let sender = Arc::new(ScriptedSender::new(script));
    let uploader = Arc::new(Uploader::new(
        Arc::clone(&storage),
        sender.clone() as Arc<dyn EventSender>,
        config.backoff.clone(),
        callbacks,
    ));
    (storage, sender, uploader)
}

async fn wait_for<F, Fut>(mut condition: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    tokio::time::timeout(Duration::from_secs(5), async move {
        loop {
            if condition().await {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

async fn store_event(storage: &Storage, payload: &str) {
    storage.write_string(storage::EVENT, payload).await.unwrap();
}

fn metadata_absent(storage: &Storage) -> bool {
    storage.key_value_store().read_string(RETRY_METADATA, "") == ""
}

#[tokio::test]
async fn first_attempt_success_uploads_once_and_cleans_up() {
    let (storage, sender, uploader) =
        build(vec![EventUploadResult::Success("Ok".to_string())], UploaderCallbacks::default());

    store_event(&storage, "{\"event\":\"a\"}").await;
    store_event(&storage, "{\"event\":\"b\"}").await;

    uploader.start();
    uploader.flush();

    wait_for(|| async { storage.read_file_list().await.is_empty() }).await;

    let calls = sender.calls();
    assert_eq!(calls.len(), 1);
    assert!(calls[0].headers.is_empty());
    assert!(metadata_absent(&storage));
    assert_eq!(uploader.state(), UploaderState::Running);
}

#[tokio::test]
async fn transient_failure_then_success_carries_retry_headers() {
    let (storage, sender, uploader) = build(
        vec![
            EventUploadResult::RetryAble(RetryAbleError::Server { status: Some(500) }),
            EventUploadResult::Success("Ok".to_string()),
        ],
        UploaderCallbacks::default(),
    );

    store_event(&storage, "{\"event\":\"a\"}").await;
    uploader.start();
    uploader.flush();

    wait_for(|| async { storage.read_file_list().await.is_empty() }).await;

    let calls = sender.calls();
    assert_eq!(calls.len(), 2);
    assert!(calls[0].headers.is_empty());
    assert_eq!(calls[1].headers["Rsa-Retry-Attempt"], "1");
    assert_eq!(calls[1].headers["Rsa-Retry-Reason"], "server-500");
    assert!(
        calls[1].headers["Rsa-Since-Last-Attempt"]
            .parse::<i64>()
            .unwrap()
            >= 0
    );
    assert!(metadata_absent(&storage));
}

#[tokio::test]
async fn mixed_retry_chain_reports_each_reason_in_turn() {
    let (storage, sender, uploader) = build(
        vec![
            EventUploadResult::RetryAble(RetryAbleError::Server { status: Some(500) }),
            EventUploadResult::RetryAble(RetryAbleError::NetworkUnavailable),
            EventUploadResult::RetryAble(RetryAbleError::Timeout),
            EventUploadResult::RetryAble(RetryAbleError::Unknown),
            EventUploadResult::Success("Ok".to_string()),
        ],
        UploaderCallbacks::default(),
    );

    store_event(&storage, "{\"event\":\"a\"}").await;
    uploader.start();
    uploader.flush();

    wait_for(|| async { storage.read_file_list().await.is_empty() }).await;

    let calls = sender.calls();
    assert_eq!(calls.len(), 5);

    let expected = [
        ("1", "server-500"),
        ("2", "client-network"),
        ("3", "client-timeout"),
        ("4", "client-unknown"),
    ];
    for (call, (attempt, reason)) in calls[1..].iter().zip(expected) {
        assert_eq!(call.headers["Rsa-Retry-Attempt"], attempt);
        assert_eq!(call.headers["Rsa-Retry-Reason"], reason);
    }
    assert!(metadata_absent(&storage));
}

#[tokio::test]
async fn invalid_write_key_cancels_and_keeps_the_batch() {
    let invalid_write_key = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&invalid_write_key);
    let callbacks = UploaderCallbacks {
        on_invalid_write_key: Box::new(move || flag.store(true, Ordering::SeqCst)),
        ..Default::default()
    };

    let (storage, sender, uploader) = build(
        vec![EventUploadResult::NonRetryAble(
            NonRetryAbleError::InvalidWriteKey,
        )],
        callbacks,
    );

    store_event(&storage, "{\"event\":\"a\"}").await;
    uploader.start();
    uploader.flush();

    wait_for(|| async { uploader.state() == UploaderState::Cancelled }).await;

    assert!(invalid_write_key.load(Ordering::SeqCst));
    assert_eq!(sender.calls().len(), 1);
    // Fatal-for-stream: the batch stays for future reactivation.
    assert_eq!(storage.read_file_list().await, vec!["0"]);
    assert!(metadata_absent(&storage));
}

#[tokio::test]
async fn source_disabled_cancels_and_notifies() {
    let disabled = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&disabled);
    let callbacks = UploaderCallbacks {
        on_source_disabled: Box::new(move || flag.store(true, Ordering::SeqCst)),
        ..Default::default()
    };

    let (storage, _sender, uploader) = build(
        vec![EventUploadResult::NonRetryAble(
            NonRetryAbleError::SourceDisabled,
        )],
        callbacks,
    );

    store_event(&storage, "{\"event\":\"a\"}").await;
    uploader.start();
    uploader.flush();

    wait_for(|| async { uploader.state() == UploaderState::Cancelled }).await;
    assert!(disabled.load(Ordering::SeqCst));
    assert_eq!(storage.read_file_list().await, vec!["0"]);
}

#[tokio::test]
async fn poison_batch_is_dropped_and_the_worker_moves_on() {
    let (storage, sender, uploader) = build(
        vec![
            EventUploadResult::NonRetryAble(NonRetryAbleError::PayloadTooLarge),
            EventUploadResult::Success("Ok".to_string()),
        ],
        UploaderCallbacks::default(),
    );

    // Two closed batches before the worker starts.
    store_event(&storage, "{\"event\":\"poison\"}").await;
    storage.rollover().await.unwrap();
    store_event(&storage, "{\"event\":\"good\"}").await;
    storage.rollover().await.unwrap();

    uploader.start();
    uploader.flush();

    wait_for(|| async { storage.read_file_list().await.is_empty() }).await;

    assert_eq!(sender.calls().len(), 2);
    assert_eq!(uploader.state(), UploaderState::Running);
    assert!(metadata_absent(&storage));
}

#[tokio::test]
async fn bad_request_batch_is_dropped_too() {
    let (storage, sender, uploader) = build(
        vec![EventUploadResult::NonRetryAble(NonRetryAbleError::BadRequest)],
        UploaderCallbacks::default(),
    );

    store_event(&storage, "{\"event\":\"a\"}").await;
    uploader.start();
    uploader.flush();

    wait_for(|| async { storage.read_file_list().await.is_empty() }).await;
    assert_eq!(sender.calls().len(), 1);
    assert_eq!(uploader.state(), UploaderState::Running);
}

#[tokio::test]
async fn batches_upload_in_creation_index_order() {
    let (storage, sender, uploader) = build(Vec::new(), UploaderCallbacks::default());

    // Eleven batches so that 2 and 10 would collide under a string sort.
    for n in 0..11 {
        store_event(&storage, &format!("{{\"n\":{n}}}")).await;
        storage.rollover().await.unwrap();
    }

    uploader.start();
    uploader.flush();

    wait_for(|| async { storage.read_file_list().await.is_empty() }).await;

    let payloads: Vec<String> = sender.calls().iter().map(|c| c.payload.clone()).collect();
    assert_eq!(payloads.len(), 11);
    for (n, payload) in payloads.iter().enumerate() {
        assert!(
            payload.contains(&format!("{{\"n\":{n}}}")),
            "batch {n} uploaded out of order: {payload}"
        );
    }
}

#[tokio::test]
async fn sent_at_placeholder_is_rewritten_before_each_send() {
    let (storage, sender, uploader) = build(Vec::new(), UploaderCallbacks::default());

    store_event(&storage, "{\"event\":\"a\"}").await;
    uploader.start();
    uploader.flush();

    wait_for(|| async { storage.read_file_list().await.is_empty() }).await;

    let payload = &sender.calls()[0].payload;
    assert!(!payload.contains(SENT_AT_PLACEHOLDER));

    let parsed: serde_json::Value = serde_json::from_str(payload).unwrap();
    let sent_at = parsed["sentAt"].as_str().unwrap();
    assert!(chrono::DateTime::parse_from_rfc3339(sent_at).is_ok());
}

#[tokio::test]
async fn anonymous_id_is_forwarded_once_per_distinct_value() {
    let (storage, sender, uploader) = build(Vec::new(), UploaderCallbacks::default());

    store_event(&storage, "{\"event\":\"a\",\"anonymousId\":\"user-1\"}").await;
    storage.rollover().await.unwrap();
    store_event(&storage, "{\"event\":\"b\",\"anonymousId\":\"user-1\"}").await;
    storage.rollover().await.unwrap();
    store_event(&storage, "{\"event\":\"c\",\"anonymousId\":\"user-2\"}").await;

    uploader.start();
    uploader.flush();

    wait_for(|| async { storage.read_file_list().await.is_empty() }).await;

    assert_eq!(sender.anonymous_ids(), vec!["user-1", "user-2"]);
}

#[tokio::test]
async fn missing_anonymous_id_falls_back_to_a_generated_uuid() {
    let (storage, sender, uploader) = build(Vec::new(), UploaderCallbacks::default());

    store_event(&storage, "{\"event\":\"a\"}").await;
    uploader.start();
    uploader.flush();

    wait_for(|| async { storage.read_file_list().await.is_empty() }).await;

    let ids = sender.anonymous_ids();
    assert_eq!(ids.len(), 1);
    assert!(uuid::Uuid::parse_str(&ids[0]).is_ok());
}

#[tokio::test]
async fn start_is_idempotent_while_running() {
    let (storage, sender, uploader) = build(Vec::new(), UploaderCallbacks::default());

    uploader.start();
    uploader.start();
    assert_eq!(uploader.state(), UploaderState::Running);

    store_event(&storage, "{\"event\":\"a\"}").await;
    uploader.flush();

    wait_for(|| async { storage.read_file_list().await.is_empty() }).await;
    assert_eq!(sender.calls().len(), 1);
}

#[tokio::test]
async fn cancel_then_start_recreates_the_signal_channel() {
    let (storage, sender, uploader) = build(Vec::new(), UploaderCallbacks::default());

    uploader.start();
    uploader.cancel();
    assert_eq!(uploader.state(), UploaderState::Cancelled);

    // A flush while cancelled is silently dropped.
    uploader.flush();
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(sender.calls().is_empty());

    store_event(&storage, "{\"event\":\"a\"}").await;
    uploader.start();
    uploader.flush();

    wait_for(|| async { storage.read_file_list().await.is_empty() }).await;
    assert_eq!(uploader.state(), UploaderState::Running);
}

#[tokio::test]
async fn every_flush_signal_is_processed_in_order() {
    let (storage, sender, uploader) = build(Vec::new(), UploaderCallbacks::default());

    uploader.start();

    store_event(&storage, "{\"n\":0}").await;
    uploader.flush();
    wait_for(|| async { storage.read_file_list().await.is_empty() }).await;

    store_event(&storage, "{\"n\":1}").await;
    uploader.flush();
    wait_for(|| async { storage.read_file_list().await.is_empty() }).await;

    let payloads: Vec<String> = sender.calls().iter().map(|c| c.payload.clone()).collect();
    assert_eq!(payloads.len(), 2);
    assert!(payloads[0].contains("{\"n\":0}"));
    assert!(payloads[1].contains("{\"n\":1}"));
}
