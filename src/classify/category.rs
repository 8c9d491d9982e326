//! Canonical error categories and the classified error record.

use std::fmt;
use std::time::{Duration, SystemTime};

use serde::{Deserialize, Serialize};

use crate::error::BackendError;

/// Closed set of failure categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorCategory {
    Authentication,
    RateLimit,
    Billing,
    InvalidRequest,
    NotFound,
    Permission,
    ServerError,
    Network,
    Timeout,
    Unknown,
}

impl ErrorCategory {
    /// All categories, in declaration order.
    pub const ALL: [ErrorCategory; 10] = [
        ErrorCategory::Authentication,
        ErrorCategory::RateLimit,
        ErrorCategory::Billing,
        ErrorCategory::InvalidRequest,
        ErrorCategory::NotFound,
        ErrorCategory::Permission,
        ErrorCategory::ServerError,
        ErrorCategory::Network,
        ErrorCategory::Timeout,
        ErrorCategory::Unknown,
    ];

    /// Stable label used in logs, metrics and events.
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCategory::Authentication => "authentication",
            ErrorCategory::RateLimit => "rate-limit",
            ErrorCategory::Billing => "billing",
            ErrorCategory::InvalidRequest => "invalid-request",
            ErrorCategory::NotFound => "not-found",
            ErrorCategory::Permission => "permission",
            ErrorCategory::ServerError => "server-error",
            ErrorCategory::Network => "network",
            ErrorCategory::Timeout => "timeout",
            ErrorCategory::Unknown => "unknown",
        }
    }

    /// Default retryability. Only transient categories are retried.
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            ErrorCategory::RateLimit
                | ErrorCategory::ServerError
                | ErrorCategory::Network
                | ErrorCategory::Timeout
        )
    }

    /// Human-readable summary shown to end users.
    pub fn user_message(self) -> &'static str {
        match self {
            ErrorCategory::Authentication => {
                "The AI service rejected the credentials. Check the configured API key."
            }
            ErrorCategory::RateLimit => {
                "Too many requests were sent to the AI service. Please wait a moment and try again."
            }
            ErrorCategory::Billing => {
                "The AI service account has a billing or quota problem."
            }
            ErrorCategory::InvalidRequest => {
                "The request was rejected as invalid by the AI service."
            }
            ErrorCategory::NotFound => "The requested model or resource does not exist.",
            ErrorCategory::Permission => {
                "The account is not permitted to use this model or feature."
            }
            ErrorCategory::ServerError => {
                "The AI service is experiencing problems. Please try again later."
            }
            ErrorCategory::Network => {
                "Could not reach the AI service. Check the network connection."
            }
            ErrorCategory::Timeout => "The AI service took too long to respond.",
            ErrorCategory::Unknown => "An unexpected error occurred while calling the AI service.",
        }
    }

    /// Short list of things the user or operator can do about it.
    pub fn remediation(self) -> &'static [&'static str] {
        match self {
            ErrorCategory::Authentication => &[
                "verify the API key is set and has not been revoked",
                "check that the key belongs to the configured backend",
            ],
            ErrorCategory::RateLimit => &[
                "implement client-side throttling",
                "lower the configured requests per minute",
                "upgrade the plan for higher limits",
            ],
            ErrorCategory::Billing => &[
                "check the account's billing status",
                "add credits or raise the spending limit",
            ],
            ErrorCategory::InvalidRequest => &[
                "check request parameters against the backend's API",
                "shorten the input if it exceeds the context window",
            ],
            ErrorCategory::NotFound => &[
                "verify the model name",
                "check that the model is available in this region or plan",
            ],
            ErrorCategory::Permission => &[
                "request access to the model",
                "check the key's scopes and organisation",
            ],
            ErrorCategory::ServerError => &[
                "retry later",
                "configure a fallback backend",
            ],
            ErrorCategory::Network => &[
                "check connectivity and proxy settings",
                "configure a fallback backend",
            ],
            ErrorCategory::Timeout => &[
                "raise the backend timeout",
                "reduce the request size",
            ],
            ErrorCategory::Unknown => &["inspect the logged cause", "report the issue if it persists"],
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A normalised, immutable failure record.
///
/// Wraps the original [`BackendError`] (available through
/// [`std::error::Error::source`]) together with the call context it happened
/// in.
#[derive(Debug, Clone, thiserror::Error)]
#[error(
    "{category} error from backend '{}' during '{}' (attempt {attempt}): {message}",
    .backend.as_deref().unwrap_or("unknown"),
    .operation.as_deref().unwrap_or("unknown")
)]
pub struct ClassifiedError {
    pub category: ErrorCategory,
    pub retryable: bool,
    pub status: Option<u16>,
    /// User-facing message.
    pub message: String,
    pub remediation: Vec<String>,
    pub timestamp: SystemTime,
    pub backend: Option<String>,
    pub operation: Option<String>,
    pub model: Option<String>,
    /// Attempt number (1-based) on which this failure happened.
    pub attempt: u32,
    /// Provider wait hint carried over from the raw error.
    pub retry_after: Option<Duration>,
    #[source]
    pub cause: BackendError,
}

impl ClassifiedError {
    /// Return a copy with a different attempt number.
    pub fn with_attempt(mut self, attempt: u32) -> Self {
        self.attempt = attempt;
        self
    }
}
