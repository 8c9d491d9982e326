//! Bifrost error types
//!
//! Two layers:
//!
//! - [`BackendError`]: the raw failure an adapter returns. Never crosses the
//!   dispatcher boundary on its own.
//! - [`BifrostError`]: what callers see. Backend failures arrive wrapped in a
//!   [`ClassifiedError`]; configuration and routing problems have their own
//!   variants so they can be told apart from transient backend trouble.

use std::time::Duration;

use crate::classify::ClassifiedError;

/// Raw failure reported by a backend adapter.
#[derive(Debug, Clone, thiserror::Error)]
pub enum BackendError {
    // Provider/network errors
    #[error("HTTP error: {0}")]
    Http(String),

    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("rate limited, retry after {retry_after:?}")]
    RateLimited { retry_after: Option<Duration> },

    #[error("authentication failed")]
    AuthenticationFailed,

    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("model not found: {0}")]
    ModelNotFound(String),

    // Streaming errors
    #[error("stream error: {0}")]
    Stream(String),

    // Data errors
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("content filtered: {reason}")]
    ContentFiltered { reason: String },

    #[error("context length exceeded: {limit} tokens")]
    ContextLengthExceeded { limit: usize },

    #[error("operation not supported: {0}")]
    Unsupported(String),

    /// The admission queue for this backend shut down before the work ran.
    #[error("admission queue closed")]
    AdmissionClosed,

    #[error("{0}")]
    Other(String),
}

impl BackendError {
    /// Provider-supplied wait hint, if any.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            BackendError::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }

    /// HTTP-ish status code carried by the error, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            BackendError::Api { status, .. } => Some(*status),
            BackendError::RateLimited { .. } => Some(429),
            BackendError::AuthenticationFailed => Some(401),
            BackendError::ModelNotFound(_) => Some(404),
            _ => None,
        }
    }
}

/// Errors surfaced by the dispatcher.
#[derive(Debug, thiserror::Error)]
pub enum BifrostError {
    /// A backend failed and retries (if any) were exhausted.
    #[error("{0}")]
    Classified(Box<ClassifiedError>),

    /// No registered, available backend supports the operation.
    #[error("no backend available for operation '{operation}'")]
    NoBackendAvailable { operation: String },

    /// Every usable backend refused the request's token estimate.
    #[error("token budget exceeded for operation '{operation}' ({requested} tokens, denied by {denied:?})")]
    BudgetExceeded {
        operation: String,
        requested: u64,
        denied: Vec<String>,
    },

    /// The caller's cancellation token fired.
    #[error("operation cancelled")]
    Cancelled,

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl BifrostError {
    /// Whether the underlying failure belongs to a retryable category.
    ///
    /// Only classified backend failures can be transient; routing, budget and
    /// configuration failures never are.
    pub fn is_transient(&self) -> bool {
        match self {
            BifrostError::Classified(e) => e.retryable,
            _ => false,
        }
    }

    /// The classified error, if this is a backend failure.
    pub fn classified(&self) -> Option<&ClassifiedError> {
        match self {
            BifrostError::Classified(e) => Some(e),
            _ => None,
        }
    }
}

impl From<ClassifiedError> for BifrostError {
    fn from(err: ClassifiedError) -> Self {
        BifrostError::Classified(Box::new(err))
    }
}

/// Result type alias for Bifrost operations
pub type Result<T> = std::result::Result<T, BifrostError>;
