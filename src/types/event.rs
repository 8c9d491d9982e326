//! Usage events published by the dispatcher

use serde::Serialize;

use super::capabilities::Operation;
use crate::classify::ErrorCategory;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Success,
    Error,
    CacheHit,
    /// A backend's token budget denied the call.
    RateLimited,
}

/// One observation for analytics sinks.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UsageEvent {
    pub kind: EventKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backend_id: Option<String>,
    pub operation: Operation,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cost: f64,
    pub latency_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_category: Option<ErrorCategory>,
    pub streamed: bool,
}

impl UsageEvent {
    pub(crate) fn new(kind: EventKind, operation: Operation) -> Self {
        Self {
            kind,
            backend_id: None,
            operation,
            model: None,
            input_tokens: 0,
            output_tokens: 0,
            cost: 0.0,
            latency_ms: 0,
            error_category: None,
            streamed: false,
        }
    }

    pub fn tokens(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }
}
