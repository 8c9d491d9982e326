//! Operation requests

use std::fmt;
use std::sync::Arc;

use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;

use super::capabilities::Operation;
use crate::classify::ClassifiedError;

/// Per-call override of the classifier's retry decision.
pub type ShouldRetry = dyn Fn(&ClassifiedError) -> bool + Send + Sync;

/// One call to the dispatcher.
///
/// Only `operation`, `args` and `options` participate in the cache key; the
/// remaining fields steer how the call is made.
///
/// ```rust
/// # use bifrost::{Operation, OperationRequest};
/// # use serde_json::json;
/// let request = OperationRequest::new(Operation::Generate)
///     .arg(json!("Write a haiku about bridges"))
///     .option("model", json!("gpt-4o-mini"))
///     .option("temperature", json!(0.2))
///     .estimated_tokens(64);
/// assert_eq!(request.model(), Some("gpt-4o-mini"));
/// ```
#[derive(Clone)]
pub struct OperationRequest {
    pub operation: Operation,
    pub args: Vec<Value>,
    pub options: Map<String, Value>,
    /// Explicit cache key; overrides the derived one.
    pub cache_key: Option<String>,
    pub skip_cache: bool,
    /// Pre-flight token estimate checked against backend token budgets.
    pub estimated_tokens: Option<u64>,
    /// Admission priority (higher runs first). Default: 0.
    pub priority: i32,
    pub cancel: Option<CancellationToken>,
    pub should_retry: Option<Arc<ShouldRetry>>,
}

impl OperationRequest {
    pub fn new(operation: Operation) -> Self {
        Self {
            operation,
            args: Vec::new(),
            options: Map::new(),
            cache_key: None,
            skip_cache: false,
            estimated_tokens: None,
            priority: crate::admission::DEFAULT_PRIORITY,
            cancel: None,
            should_retry: None,
        }
    }

    /// Shorthand for a generate request with a single prompt argument.
    pub fn generate(prompt: impl Into<String>) -> Self {
        Self::new(Operation::Generate).arg(Value::String(prompt.into()))
    }

    /// Shorthand for an embed request with a single text argument.
    pub fn embed(text: impl Into<String>) -> Self {
        Self::new(Operation::Embed).arg(Value::String(text.into()))
    }

    pub fn arg(mut self, value: Value) -> Self {
        self.args.push(value);
        self
    }

    pub fn args(mut self, values: impl IntoIterator<Item = Value>) -> Self {
        self.args.extend(values);
        self
    }

    pub fn option(mut self, key: impl Into<String>, value: Value) -> Self {
        self.options.insert(key.into(), value);
        self
    }

    /// Set the `model` option.
    pub fn with_model(self, model: impl Into<String>) -> Self {
        self.option("model", Value::String(model.into()))
    }

    pub fn cache_key(mut self, key: impl Into<String>) -> Self {
        self.cache_key = Some(key.into());
        self
    }

    pub fn skip_cache(mut self, skip: bool) -> Self {
        self.skip_cache = skip;
        self
    }

    pub fn estimated_tokens(mut self, tokens: u64) -> Self {
        self.estimated_tokens = Some(tokens);
        self
    }

    pub fn priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn cancel_token(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    pub fn should_retry(
        mut self,
        predicate: impl Fn(&ClassifiedError) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.should_retry = Some(Arc::new(predicate));
        self
    }

    /// The `model` option, if set.
    pub fn model(&self) -> Option<&str> {
        self.options.get("model").and_then(Value::as_str)
    }

    /// All string arguments joined with newlines; used for token estimates.
    pub fn input_text(&self) -> String {
        let mut parts = Vec::with_capacity(self.args.len());
        for arg in &self.args {
            match arg {
                Value::String(s) => parts.push(s.clone()),
                other => parts.push(other.to_string()),
            }
        }
        parts.join("\n")
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.as_ref().is_some_and(CancellationToken::is_cancelled)
    }
}

impl fmt::Debug for OperationRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OperationRequest")
            .field("operation", &self.operation)
            .field("args", &self.args.len())
            .field("options", &self.options)
            .field("cache_key", &self.cache_key)
            .field("skip_cache", &self.skip_cache)
            .field("estimated_tokens", &self.estimated_tokens)
            .field("priority", &self.priority)
            .finish_non_exhaustive()
    }
}
