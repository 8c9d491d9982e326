//! Error classification.
//!
//! [`ErrorClassifier`] maps a raw [`BackendError`] onto one [`ErrorCategory`]
//! and produces a [`ClassifiedError`] carrying retryability, a user-facing
//! message and remediation hints.
//!
//! # Rules
//!
//! Rules are applied in a fixed order, first match wins:
//!
//! 1. numeric status code (`Api { status }`, plus the implicit codes of
//!    `RateLimited`, `AuthenticationFailed` and `ModelNotFound`)
//! 2. the error variant itself (`Timeout`, `Http`, `InvalidInput`, ...)
//! 3. substring heuristics over the lower-cased error text
//! 4. [`ErrorCategory::Unknown`]
//!
//! Classification is a pure function of the raw error and context apart
//! from the timestamp, so classifying the same error twice yields the same
//! category and retryability.

mod category;
mod history;

pub use category::{ClassifiedError, ErrorCategory};
pub use history::{DEFAULT_HISTORY_CAPACITY, ErrorFrequency, ErrorHistory};

use std::time::SystemTime;

use crate::error::BackendError;

/// Substring heuristics, checked in order against the lower-cased message.
const MESSAGE_RULES: &[(&[&str], ErrorCategory)] = &[
    (
        &["rate limit", "rate_limit", "too many requests", "throttl"],
        ErrorCategory::RateLimit,
    ),
    (
        &["insufficient_quota", "billing", "payment", "credit balance", "quota"],
        ErrorCategory::Billing,
    ),
    (
        &["api key", "api_key", "unauthorized", "authentication", "invalid token"],
        ErrorCategory::Authentication,
    ),
    (
        &["forbidden", "permission", "access denied", "not allowed"],
        ErrorCategory::Permission,
    ),
    (
        &["not found", "does not exist", "unknown model", "no such model"],
        ErrorCategory::NotFound,
    ),
    (
        &["timeout", "timed out", "deadline exceeded"],
        ErrorCategory::Timeout,
    ),
    (
        &[
            "econnrefused",
            "econnreset",
            "connection",
            "network",
            "dns",
            "socket",
            "unreachable",
        ],
        ErrorCategory::Network,
    ),
    (
        &[
            "internal server error",
            "bad gateway",
            "service unavailable",
            "overloaded",
            "server error",
        ],
        ErrorCategory::ServerError,
    ),
    (
        &["invalid", "bad request", "malformed", "validation", "context length"],
        ErrorCategory::InvalidRequest,
    ),
];

/// Call-site context attached to a classified error.
#[derive(Debug, Clone, Default)]
pub struct ErrorContext {
    pub backend: Option<String>,
    pub operation: Option<String>,
    pub model: Option<String>,
    /// 1-based attempt number.
    pub attempt: u32,
}

impl ErrorContext {
    pub fn new(backend: impl Into<String>, operation: impl Into<String>) -> Self {
        Self {
            backend: Some(backend.into()),
            operation: Some(operation.into()),
            model: None,
            attempt: 1,
        }
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn attempt(mut self, attempt: u32) -> Self {
        self.attempt = attempt;
        self
    }
}

/// Classifies raw backend failures and keeps a bounded history of them.
#[derive(Debug, Default)]
pub struct ErrorClassifier {
    history: ErrorHistory,
}

impl ErrorClassifier {
    /// Create a classifier with the default history capacity.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a classifier retaining at most `capacity` history records.
    pub fn with_history_capacity(capacity: usize) -> Self {
        Self {
            history: ErrorHistory::new(capacity),
        }
    }

    /// Classify a raw failure. Does not touch the history.
    pub fn classify(&self, raw: &BackendError, context: &ErrorContext) -> ClassifiedError {
        let category = categorize(raw);
        ClassifiedError {
            category,
            retryable: category.is_retryable(),
            status: raw.status(),
            message: category.user_message().to_owned(),
            remediation: category
                .remediation()
                .iter()
                .map(|s| (*s).to_owned())
                .collect(),
            timestamp: SystemTime::now(),
            backend: context.backend.clone(),
            operation: context.operation.clone(),
            model: context.model.clone(),
            attempt: context.attempt.max(1),
            retry_after: raw.retry_after(),
            cause: raw.clone(),
        }
    }

    /// Classify and append the result to the history.
    pub fn classify_and_record(&self, raw: &BackendError, context: &ErrorContext) -> ClassifiedError {
        let classified = self.classify(raw, context);
        self.history.record(classified.clone());
        classified
    }

    pub fn history(&self) -> &ErrorHistory {
        &self.history
    }
}

/// Assign a category to a raw error.
pub fn categorize(raw: &BackendError) -> ErrorCategory {
    if let Some(category) = raw.status().and_then(category_for_status) {
        return category;
    }
    if let Some(category) = category_for_variant(raw) {
        return category;
    }
    category_for_message(&raw.to_string()).unwrap_or(ErrorCategory::Unknown)
}

fn category_for_status(status: u16) -> Option<ErrorCategory> {
    match status {
        400 | 413 | 422 => Some(ErrorCategory::InvalidRequest),
        401 => Some(ErrorCategory::Authentication),
        402 => Some(ErrorCategory::Billing),
        403 => Some(ErrorCategory::Permission),
        404 => Some(ErrorCategory::NotFound),
        408 | 504 => Some(ErrorCategory::Timeout),
        429 => Some(ErrorCategory::RateLimit),
        500..=599 => Some(ErrorCategory::ServerError),
        _ => None,
    }
}

fn category_for_variant(raw: &BackendError) -> Option<ErrorCategory> {
    match raw {
        BackendError::Timeout(_) => Some(ErrorCategory::Timeout),
        BackendError::Http(msg) => {
            Some(category_for_message(msg).unwrap_or(ErrorCategory::Network))
        }
        BackendError::InvalidInput(_)
        | BackendError::ContentFiltered { .. }
        | BackendError::ContextLengthExceeded { .. }
        | BackendError::Unsupported(_) => Some(ErrorCategory::InvalidRequest),
        BackendError::AdmissionClosed => Some(ErrorCategory::Unknown),
        // Status-bearing variants are handled by the status rule.
        BackendError::Api { .. }
        | BackendError::RateLimited { .. }
        | BackendError::AuthenticationFailed
        | BackendError::ModelNotFound(_)
        | BackendError::Stream(_)
        | BackendError::Other(_) => None,
    }
}

fn category_for_message(message: &str) -> Option<ErrorCategory> {
    let lower = message.to_lowercase();
    MESSAGE_RULES
        .iter()
        .find(|(needles, _)| needles.iter().any(|n| lower.contains(n)))
        .map(|(_, category)| *category)
}
