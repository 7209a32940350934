pub mod client;

pub use client::{HttpEventSender, SenderConfig, SenderError, SenderStatsSnapshot};

use crate::upload::EventUploadResult;
use async_trait::async_trait;
use std::collections::HashMap;

#[cfg(test)]
use mockall::automock;

/// Boundary to the ingestion endpoint. The uploader owns the retry loop;
/// implementations perform exactly one attempt per `send` and classify the
/// outcome.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait EventSender: Send + Sync {
    /// Posts one batch payload. `extra_headers` carries the retry state
    /// headers, or is empty on a first attempt.
    async fn send(
        &self,
        payload: &str,
        extra_headers: &HashMap<String, String>,
    ) -> EventUploadResult;

    /// Updates the anonymous-id header attached to subsequent sends.
    fn set_anonymous_id(&self, anonymous_id: &str);
}
