//! Admission control: per-backend rate limiting and token budgets.
//!
//! Each registered backend gets one limiter combining
//!
//! - a request-rate gate, one of [`RateStrategy::SlidingWindow`],
//!   [`RateStrategy::FixedWindow`] or [`RateStrategy::TokenBucket`];
//! - a concurrency cap (`max_concurrent` in-flight units of work);
//! - an optional token-budget gate ([`TokenBudget`]).
//!
//! [`AdmissionController::schedule`] delays work until the rate gate and the
//! concurrency cap allow it; it never rejects. Queued work is released
//! highest priority first and in submission order within a priority.
//!
//! [`AdmissionController::consume_token_budget`] is the opposite: it never
//! waits. A denial means "try another backend", not "try again later".
//!
//! Backends that were never registered are not limited.
//!
//! # Cancellation
//!
//! Dropping the future returned by `schedule` while it is queued removes the
//! waiter without consuming a rate slot and without running the work.

mod budget;
mod config;
mod limiter;
mod strategy;

pub use budget::TokenBudget;
pub use config::{RateLimitConfig, RateStrategy};
pub use limiter::AdmissionSnapshot;

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::time::Instant;
use tracing::debug;

use crate::Result;
use crate::error::BackendError;
use crate::telemetry;
use limiter::BackendLimiter;

/// Priority used when the caller does not specify one.
pub const DEFAULT_PRIORITY: i32 = 0;

/// Registry of per-backend limiters.
#[derive(Default)]
pub struct AdmissionController {
    limiters: RwLock<HashMap<String, Arc<BackendLimiter>>>,
}

impl AdmissionController {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) the limiter for `backend_id`.
    ///
    /// Work already queued on a replaced limiter still drains through it.
    pub fn register(&self, backend_id: impl Into<String>, config: RateLimitConfig) -> Result<()> {
        config.validate()?;
        let backend_id = backend_id.into();
        let limiter = Arc::new(BackendLimiter::new(backend_id.clone(), config));
        self.limiters.write().insert(backend_id, limiter);
        Ok(())
    }

    /// Remove a backend's limiter. Returns whether one existed.
    pub fn unregister(&self, backend_id: &str) -> bool {
        self.limiters.write().remove(backend_id).is_some()
    }

    pub fn is_registered(&self, backend_id: &str) -> bool {
        self.limiters.read().contains_key(backend_id)
    }

    /// Run `work` once `backend_id`'s limiter admits it.
    ///
    /// The concurrency slot is held until `work` completes.
    pub async fn schedule<F, Fut, T>(
        &self,
        backend_id: &str,
        priority: i32,
        work: F,
    ) -> std::result::Result<T, BackendError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<T, BackendError>>,
    {
        let Some(limiter) = self.limiter(backend_id) else {
            return work().await;
        };

        let queued_at = Instant::now();
        let _permit = limiter.acquire(priority).await?;
        let waited = queued_at.elapsed();
        metrics::histogram!(telemetry::ADMISSION_WAIT_SECONDS,
            "backend" => backend_id.to_owned(),
        )
        .record(waited.as_secs_f64());
        if !waited.is_zero() {
            debug!(
                backend = backend_id,
                priority,
                waited_ms = waited.as_millis() as u64,
                "admitted after queueing"
            );
        }

        work().await
    }

    /// Take `amount` tokens from `backend_id`'s budget.
    ///
    /// Returns `false` without side effects when the budget cannot cover the
    /// amount. Backends without a budget gate always grant.
    pub fn consume_token_budget(&self, backend_id: &str, amount: u64) -> bool {
        self.limiter(backend_id)
            .is_none_or(|limiter| limiter.try_consume_budget(amount))
    }

    pub fn snapshot(&self, backend_id: &str) -> Option<AdmissionSnapshot> {
        self.limiter(backend_id).map(|limiter| limiter.snapshot())
    }

    fn limiter(&self, backend_id: &str) -> Option<Arc<BackendLimiter>> {
        self.limiters.read().get(backend_id).cloned()
    }
}

impl std::fmt::Debug for AdmissionController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut ids: Vec<String> = self.limiters.read().keys().cloned().collect();
        ids.sort();
        f.debug_struct("AdmissionController")
            .field("backends", &ids)
            .finish()
    }
}
