//! Retry configuration, delay calculation, and the retry controller.
//!
//! [`RetryController::execute`] runs one unit of work, classifies every raw
//! [`BackendError`] it fails with, and retries the retryable ones with
//! backoff until the attempt budget is spent. Only the final
//! [`ClassifiedError`] leaves the controller.
//!
//! The controller does not log; callers observe retries through
//! [`RetryHooks::on_retry`].

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;

use crate::classify::{ClassifiedError, ErrorClassifier, ErrorContext};
use crate::error::BackendError;
use crate::types::ShouldRetry;
use crate::{BifrostError, Result};

/// Called before each backoff with the error that triggered it and the
/// attempt number that failed.
pub type OnRetry<'a> = dyn Fn(&ClassifiedError, u32) + Send + Sync + 'a;

/// How the delay grows between attempts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackoffKind {
    /// Always `initial_delay`.
    Fixed,
    /// `initial_delay * attempt`.
    Linear,
    /// `initial_delay * 2^(attempt - 1)`.
    #[default]
    Exponential,
}

/// Configuration for retry behaviour on transient errors.
///
/// ```rust
/// # use bifrost::{BackoffKind, RetryConfig};
/// # use std::time::Duration;
/// let config = RetryConfig::new()
///     .max_attempts(5)
///     .backoff(BackoffKind::Linear)
///     .initial_delay(Duration::from_millis(200))
///     .jitter(false);
/// assert_eq!(config.delay_for_attempt(3), Duration::from_millis(600));
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    /// Maximum number of attempts (including the initial request).
    /// 1 = no retry. Default: 3.
    pub max_attempts: u32,
    /// Default: exponential.
    pub backoff: BackoffKind,
    /// Base delay before the first retry. Default: 500ms.
    pub initial_delay: Duration,
    /// Maximum delay between retries. Default: 30s.
    pub max_delay: Duration,
    /// Whether to scale delays by a random factor in `[0.8, 1.2]`. Default: true.
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: BackoffKind::Exponential,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            jitter: true,
        }
    }
}

impl RetryConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a config that disables retries (single attempt).
    pub fn disabled() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    pub fn max_attempts(mut self, n: u32) -> Self {
        self.max_attempts = n;
        self
    }

    pub fn backoff(mut self, kind: BackoffKind) -> Self {
        self.backoff = kind;
        self
    }

    pub fn initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    pub fn max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    pub fn jitter(mut self, enabled: bool) -> Self {
        self.jitter = enabled;
        self
    }

    /// Delay after the given failed attempt (1-based), capped at `max_delay`.
    ///
    /// Does NOT include jitter; see [`effective_delay()`](Self::effective_delay).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let attempt = attempt.max(1);
        let delay = match self.backoff {
            BackoffKind::Fixed => self.initial_delay,
            BackoffKind::Linear => self.initial_delay.saturating_mul(attempt),
            BackoffKind::Exponential => self
                .initial_delay
                .saturating_mul(2u32.saturating_pow(attempt - 1)),
        };
        delay.min(self.max_delay)
    }

    /// The delay actually slept after `attempt`.
    ///
    /// A provider `retry_after` hint replaces the computed backoff. Jitter is
    /// ±20% on computed delays and +0..20% on hints, so a hint is never
    /// undercut. Both are capped at `max_delay`.
    pub fn effective_delay(&self, attempt: u32, retry_after: Option<Duration>) -> Duration {
        let (delay, range) = match retry_after {
            Some(hint) => (hint.min(self.max_delay), 1.0..=1.2),
            None => (self.delay_for_attempt(attempt), 0.8..=1.2),
        };
        if !self.jitter || delay.is_zero() {
            return delay;
        }
        let factor = rand::thread_rng().gen_range(range);
        delay.mul_f64(factor).min(self.max_delay)
    }
}

/// Where a retried call currently is.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RetryState {
    #[default]
    Pending,
    Executing,
    Backoff,
    Success,
    Failed,
}

/// Mutable record of one retried call.
#[derive(Debug, Clone, Serialize)]
pub struct RetryContext {
    pub backend: String,
    pub operation: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// Current attempt, 1-based. 0 until the first attempt starts.
    pub attempt: u32,
    pub state: RetryState,
    pub metadata: Map<String, Value>,
    pub total_backoff: Duration,
}

impl RetryContext {
    pub fn new(backend: impl Into<String>, operation: impl Into<String>) -> Self {
        Self {
            backend: backend.into(),
            operation: operation.into(),
            model: None,
            attempt: 0,
            state: RetryState::Pending,
            metadata: Map::new(),
            total_backoff: Duration::ZERO,
        }
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    fn error_context(&self) -> ErrorContext {
        let mut ctx = ErrorContext::new(&self.backend, &self.operation).attempt(self.attempt);
        if let Some(model) = &self.model {
            ctx = ctx.model(model);
        }
        ctx
    }
}

/// Optional per-call hooks for [`RetryController::execute`].
#[derive(Default, Clone, Copy)]
pub struct RetryHooks<'a> {
    /// Overrides the classifier's retryable flag.
    pub should_retry: Option<&'a ShouldRetry>,
    pub on_retry: Option<&'a OnRetry<'a>>,
    /// Aborts the call during an attempt or a backoff.
    pub cancel: Option<&'a CancellationToken>,
}

impl<'a> RetryHooks<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn should_retry(mut self, predicate: &'a ShouldRetry) -> Self {
        self.should_retry = Some(predicate);
        self
    }

    pub fn on_retry(mut self, hook: &'a OnRetry<'a>) -> Self {
        self.on_retry = Some(hook);
        self
    }

    pub fn cancel(mut self, token: &'a CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }
}

/// Runs work under a [`RetryConfig`], classifying failures.
#[derive(Debug, Clone)]
pub struct RetryController {
    classifier: Arc<ErrorClassifier>,
}

impl RetryController {
    pub fn new(classifier: Arc<ErrorClassifier>) -> Self {
        Self { classifier }
    }

    pub fn classifier(&self) -> &Arc<ErrorClassifier> {
        &self.classifier
    }

    /// Run `work` until it succeeds, fails permanently, or runs out of
    /// attempts. `work` receives the 1-based attempt number.
    ///
    /// Every failure is recorded in the classifier's history. On return
    /// `ctx.state` is `Success` or `Failed` and `ctx.attempt` is the number
    /// of attempts made.
    pub async fn execute<F, Fut, T>(
        &self,
        ctx: &mut RetryContext,
        config: &RetryConfig,
        hooks: RetryHooks<'_>,
        mut work: F,
    ) -> Result<T>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = std::result::Result<T, BackendError>>,
    {
        let max_attempts = config.max_attempts.max(1);
        loop {
            if hooks.cancel.is_some_and(CancellationToken::is_cancelled) {
                ctx.state = RetryState::Failed;
                return Err(BifrostError::Cancelled);
            }

            ctx.attempt += 1;
            ctx.state = RetryState::Executing;
            let outcome = match hooks.cancel {
                Some(token) => tokio::select! {
                    biased;
                    _ = token.cancelled() => {
                        ctx.state = RetryState::Failed;
                        return Err(BifrostError::Cancelled);
                    }
                    outcome = work(ctx.attempt) => outcome,
                },
                None => work(ctx.attempt).await,
            };

            let raw = match outcome {
                Ok(value) => {
                    ctx.state = RetryState::Success;
                    return Ok(value);
                }
                Err(raw) => raw,
            };

            let classified = self.classifier.classify_and_record(&raw, &ctx.error_context());
            let retryable = hooks
                .should_retry
                .map_or(classified.retryable, |predicate| predicate(&classified));
            if !retryable || ctx.attempt >= max_attempts {
                ctx.state = RetryState::Failed;
                return Err(classified.into());
            }

            let delay = config.effective_delay(ctx.attempt, classified.retry_after);
            if let Some(hook) = hooks.on_retry {
                hook(&classified, ctx.attempt);
            }

            ctx.state = RetryState::Backoff;
            match hooks.cancel {
                Some(token) => tokio::select! {
                    biased;
                    _ = token.cancelled() => {
                        ctx.state = RetryState::Failed;
                        return Err(BifrostError::Cancelled);
                    }
                    _ = tokio::time::sleep(delay) => {}
                },
                None => tokio::time::sleep(delay).await,
            }
            ctx.total_backoff += delay;
        }
    }
}
