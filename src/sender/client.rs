use super::EventSender;
use crate::config::Config;
use crate::upload::{EventUploadResult, NonRetryAbleError, RetryAbleError};
use async_trait::async_trait;
use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use flate2::{Compression, write::GzEncoder};
use parking_lot::Mutex;
use reqwest::header::{
    AUTHORIZATION, CONTENT_ENCODING, CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue,
};
use reqwest::{Client, ClientBuilder};
use std::collections::HashMap;
use std::io::Write;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};
use url::Url;

const BATCH_PATH: &str = "/v1/batch";

#[derive(Error, Debug)]
pub enum SenderError {
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),
    #[error("Invalid header value: {0}")]
    InvalidHeaderValue(String),
}

#[derive(Debug, Clone)]
pub struct SenderConfig {
    pub data_plane_url: String,
    pub write_key: String,
    pub gzip: bool,
    pub timeout: Duration,
    pub connection_timeout: Duration,
    pub max_connections: usize,
    pub user_agent: String,
}

impl Default for SenderConfig {
    fn default() -> Self {
        Self {
            data_plane_url: "https://hosted.rudderlabs.com".to_string(),
            write_key: String::new(),
            gzip: true,
            timeout: Duration::from_secs(30),
            connection_timeout: Duration::from_secs(10),
            max_connections: 10,
            user_agent: concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"))
                .to_string(),
        }
    }
}

impl SenderConfig {
    pub fn from_config(config: &Config) -> Self {
        Self {
            data_plane_url: config.data_plane_url.clone(),
            write_key: config.write_key.clone(),
            gzip: config.gzip_enabled,
            timeout: config.upload_timeout,
            connection_timeout: config.connection_timeout,
            ..Self::default()
        }
    }
}

#[derive(Debug, Default)]
struct SenderStats {
    total_requests: AtomicU64,
    successful_requests: AtomicU64,
    failed_requests: AtomicU64,
}

impl SenderStats {
    fn record(&self, success: bool) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        if success {
            self.successful_requests.fetch_add(1, Ordering::Relaxed);
        } else {
            self.failed_requests.fetch_add(1, Ordering::Relaxed);
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SenderStatsSnapshot {
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
}

/// `reqwest`-backed sender posting batches to `<dataPlaneUrl>/v1/batch` with
/// basic auth derived from the write key, optional gzip request bodies and
/// the per-worker anonymous-id header.
pub struct HttpEventSender {
    client: Client,
    config: SenderConfig,
    batch_url: Url,
    auth_header: HeaderValue,
    anonymous_id: Mutex<Option<HeaderValue>>,
    stats: Arc<SenderStats>,
}

impl HttpEventSender {
    pub fn new(config: SenderConfig) -> Result<Self, SenderError> {
        let mut batch_url: Url = config.data_plane_url.parse().map_err(|e| {
            SenderError::InvalidConfiguration(format!(
                "Invalid data plane URL '{}': {e}",
                config.data_plane_url
            ))
        })?;
        if !batch_url.path().ends_with(BATCH_PATH) {
            let path = batch_url.path().trim_end_matches('/').to_string();
            batch_url.set_path(&format!("{path}{BATCH_PATH}"));
        }

        let credentials = BASE64.encode(format!("{}:", config.write_key));
        let auth_header = HeaderValue::from_str(&format!("Basic {credentials}"))
            .map_err(|e| SenderError::InvalidConfiguration(format!("Invalid write key: {e}")))?;

        let mut builder = ClientBuilder::new()
            .timeout(config.timeout)
            .connect_timeout(config.connection_timeout)
            .pool_max_idle_per_host(config.max_connections)
            .user_agent(&config.user_agent);
        if config.gzip {
            builder = builder.gzip(true);
        }
        let client = builder.build().map_err(|e| {
            SenderError::InvalidConfiguration(format!("Failed to build HTTP client: {e}"))
        })?;

        Ok(Self {
            client,
            config,
            batch_url,
            auth_header,
            anonymous_id: Mutex::new(None),
            stats: Arc::new(SenderStats::default()),
        })
    }

    pub fn stats(&self) -> SenderStatsSnapshot {
        SenderStatsSnapshot {
            total_requests: self.stats.total_requests.load(Ordering::Relaxed),
            successful_requests: self.stats.successful_requests.load(Ordering::Relaxed),
            failed_requests: self.stats.failed_requests.load(Ordering::Relaxed),
        }
    }

    pub fn batch_url(&self) -> &Url {
        &self.batch_url
    }

    fn build_headers(
        &self,
        extra_headers: &HashMap<String, String>,
    ) -> Result<HeaderMap, SenderError> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(AUTHORIZATION, self.auth_header.clone());
        if self.config.gzip {
            headers.insert(CONTENT_ENCODING, HeaderValue::from_static("gzip"));
        }
        if let Some(anonymous_id) = self.anonymous_id.lock().clone() {
            headers.insert(HeaderName::from_static("anonymousid"), anonymous_id);
        }

        for (name, value) in extra_headers {
            let name = HeaderName::from_bytes(name.as_bytes()).map_err(|e| {
                SenderError::InvalidHeaderValue(format!("Invalid header name '{name}': {e}"))
            })?;
            let value = HeaderValue::from_str(value).map_err(|e| {
                SenderError::InvalidHeaderValue(format!("Invalid header value: {e}"))
            })?;
            headers.insert(name, value);
        }
        Ok(headers)
    }

    fn prepare_body(&self, payload: &str) -> std::io::Result<Vec<u8>> {
        if !self.config.gzip {
            return Ok(payload.as_bytes().to_vec());
        }
        let mut encoder = GzEncoder::new(Vec::new(), Compression::fast());
        encoder.write_all(payload.as_bytes())?;
        encoder.finish()
    }

    fn classify_status(status: u16) -> EventUploadResult {
        match status {
            400 => EventUploadResult::NonRetryAble(NonRetryAbleError::BadRequest),
            401 => EventUploadResult::NonRetryAble(NonRetryAbleError::InvalidWriteKey),
            404 => EventUploadResult::NonRetryAble(NonRetryAbleError::SourceDisabled),
            413 => EventUploadResult::NonRetryAble(NonRetryAbleError::PayloadTooLarge),
            status => EventUploadResult::RetryAble(RetryAbleError::Server {
                status: Some(status),
            }),
        }
    }

    fn classify_transport(error: &reqwest::Error) -> RetryAbleError {
        if error.is_timeout() {
            RetryAbleError::Timeout
        } else if error.is_connect() {
            RetryAbleError::NetworkUnavailable
        } else {
            RetryAbleError::Unknown
        }
    }
}

#[async_trait]
impl EventSender for HttpEventSender {
    async fn send(
        &self,
        payload: &str,
        extra_headers: &HashMap<String, String>,
    ) -> EventUploadResult {
        let headers = match self.build_headers(extra_headers) {
            Ok(headers) => headers,
            Err(e) => {
                warn!("failed to build request headers: {e}");
                return EventUploadResult::RetryAble(RetryAbleError::Unknown);
            }
        };
        let body = match self.prepare_body(payload) {
            Ok(body) => body,
            Err(e) => {
                warn!("failed to compress request body: {e}");
                return EventUploadResult::RetryAble(RetryAbleError::Unknown);
            }
        };

        debug!("POST {} ({} bytes)", self.batch_url, body.len());
        let response = self
            .client
            .post(self.batch_url.clone())
            .headers(headers)
            .body(body)
            .send()
            .await;

        match response {
            Ok(response) => {
                let status = response.status();
                self.stats.record(status.is_success());
                if status.is_success() {
                    let body = response.text().await.unwrap_or_default();
                    EventUploadResult::Success(body)
                } else {
                    Self::classify_status(status.as_u16())
                }
            }
            Err(e) => {
                self.stats.record(false);
                warn!("transport failure posting batch: {e}");
                EventUploadResult::RetryAble(Self::classify_transport(&e))
            }
        }
    }

    fn set_anonymous_id(&self, anonymous_id: &str) {
        let encoded = BASE64.encode(anonymous_id);
        match HeaderValue::from_str(&encoded) {
            Ok(value) => {
                *self.anonymous_id.lock() = Some(value);
            }
            Err(e) => warn!("unusable anonymous id, keeping previous: {e}"),
        }
    }
}
