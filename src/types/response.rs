//! Backend outputs and dispatcher responses

use std::pin::Pin;
use std::time::Duration;

use futures_util::Stream;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::Result;
use crate::error::BackendError;

/// Token usage statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

impl Usage {
    pub fn new(input_tokens: u64, output_tokens: u64) -> Self {
        Self {
            input_tokens,
            output_tokens,
        }
    }

    pub fn total(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }
}

/// What a backend returns for a non-streaming call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackendOutput {
    pub value: Value,
    /// Reported usage; estimated by the dispatcher when absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
    /// Model that actually served the call.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

impl BackendOutput {
    pub fn new(value: Value) -> Self {
        Self {
            value,
            usage: None,
            model: None,
        }
    }

    pub fn usage(mut self, usage: Usage) -> Self {
        self.usage = Some(usage);
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }
}

/// Result of [`Dispatcher::perform`](crate::Dispatcher::perform).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DispatchResponse {
    pub value: Value,
    /// Backend id that served the call; `None` for cache hits.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backend: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    pub usage: Usage,
    /// Estimated cost in USD.
    pub cost: f64,
    pub latency: Duration,
    pub from_cache: bool,
    /// Attempts made against the serving backend.
    pub attempts: u32,
}

/// Events emitted during a streamed call
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// Text content chunk
    Content(String),
    /// Structured fragment
    Data(Value),
    /// Usage statistics (typically at end of stream)
    Usage(Usage),
    /// Stream complete
    Done,
}

/// Stream produced by a backend adapter.
pub type FragmentStream =
    Pin<Box<dyn Stream<Item = std::result::Result<StreamEvent, BackendError>> + Send>>;

/// Stream handed to callers of
/// [`Dispatcher::perform_stream`](crate::Dispatcher::perform_stream).
pub type DispatchStream = Pin<Box<dyn Stream<Item = Result<StreamEvent>> + Send>>;
