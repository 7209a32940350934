use thiserror::Error;

/// Outcome of one upload attempt, as classified from the HTTP response (or
/// the transport fault that prevented one).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventUploadResult {
    /// 2xx response; carries the response body.
    Success(String),
    /// The attempt failed but a later one may succeed.
    RetryAble(RetryAbleError),
    /// The attempt failed and retrying the same batch cannot help.
    NonRetryAble(NonRetryAbleError),
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryAbleError {
    /// A retryable status outside the terminal set (or no status at all).
    #[error("retryable server error (status {status:?})")]
    Server { status: Option<u16> },
    #[error("network unavailable")]
    NetworkUnavailable,
    #[error("request timed out")]
    Timeout,
    #[error("unknown transport failure")]
    Unknown,
}

impl RetryAbleError {
    /// Categorised reason token sent back to the server in the
    /// `Rsa-Retry-Reason` header.
    pub fn reason(&self) -> String {
        match self {
            Self::Server {
                status: Some(status),
            } => format!("server-{status}"),
            Self::Server { status: None } | Self::NetworkUnavailable => {
                "client-network".to_string()
            }
            Self::Timeout => "client-timeout".to_string(),
            Self::Unknown => "client-unknown".to_string(),
        }
    }
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum NonRetryAbleError {
    /// 400: the server rejected the batch as malformed.
    #[error("server rejected the batch (HTTP 400)")]
    BadRequest,
    /// 401: the write key is invalid.
    #[error("invalid write key (HTTP 401)")]
    InvalidWriteKey,
    /// 404: the source has been disabled.
    #[error("source disabled (HTTP 404)")]
    SourceDisabled,
    /// 413: the batch is too large for the server.
    #[error("batch too large (HTTP 413)")]
    PayloadTooLarge,
}

impl NonRetryAbleError {
    pub fn status(&self) -> u16 {
        match self {
            Self::BadRequest => 400,
            Self::InvalidWriteKey => 401,
            Self::SourceDisabled => 404,
            Self::PayloadTooLarge => 413,
        }
    }
}
