use std::time::Duration;

use thiserror::Error;

/// Errors surfaced by the bridge to host code.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum BridgeError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("invalid payload: {0}")]
    InvalidPayload(String),
    #[error("bridge is closed")]
    Closed,
    #[error("bridge page changed before a response was received")]
    PageChanged,
    #[error("outbound queue is full (capacity {capacity})")]
    QueueFull { capacity: usize },
    #[error("request {id} was discarded by the full outbound queue (capacity {capacity})")]
    Dropped { id: String, capacity: usize },
    #[error("request {id} on channel '{channel}' timed out after {}ms", timeout.as_millis())]
    Timeout {
        id: String,
        channel: String,
        timeout: Duration,
    },
    #[error("{code}: {message}")]
    Remote {
        code: String,
        message: String,
        id: String,
        channel: Option<String>,
    },
    #[error("no tokio runtime available")]
    NoAsyncRuntime,
    #[error("internal error: {0}")]
    Internal(String),
}

pub type BridgeResult<T> = Result<T, BridgeError>;

impl BridgeError {
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        BridgeError::InvalidArgument(message.into())
    }

    pub fn invalid_payload(message: impl Into<String>) -> Self {
        BridgeError::InvalidPayload(message.into())
    }

    /// Stable snake_case code, suitable for logs and metrics labels.
    pub fn code(&self) -> &str {
        match self {
            BridgeError::InvalidArgument(_) => "invalid_argument",
            BridgeError::InvalidPayload(_) => "invalid_payload",
            BridgeError::Closed => "bridge_closed",
            BridgeError::PageChanged => "page_changed",
            BridgeError::QueueFull { .. } => "queue_full",
            BridgeError::Dropped { .. } => "queue_overflow",
            BridgeError::Timeout { .. } => "timeout",
            BridgeError::Remote { code, .. } => code,
            BridgeError::NoAsyncRuntime => "no_async_runtime",
            BridgeError::Internal(_) => "internal",
        }
    }

    /// True for the bulk invalidations issued on navigation or close.
    pub fn is_invalidation(&self) -> bool {
        matches!(self, BridgeError::PageChanged | BridgeError::Closed)
    }
}
