//! Running usage counters per backend and per model.

use std::collections::HashMap;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;

use crate::types::Usage;

/// EWMA smoothing factor for latency.
const LATENCY_ALPHA: f64 = 0.2;

/// Counters for one backend or one model.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct UsageCounters {
    pub requests: u64,
    pub errors: u64,
    pub input_tokens: u64,
    pub output_tokens: u64,
    /// USD.
    pub cost: f64,
    pub cache_hits: u64,
    /// Exponentially weighted average of request latency in milliseconds.
    pub avg_latency_ms: Option<f64>,
}

impl UsageCounters {
    pub fn total_tokens(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }

    /// Share of requests that ended in an error; 0.0 without requests.
    pub fn error_rate(&self) -> f64 {
        if self.requests == 0 {
            0.0
        } else {
            self.errors as f64 / self.requests as f64
        }
    }

    pub fn avg_latency(&self) -> Option<Duration> {
        self.avg_latency_ms
            .map(|ms| Duration::from_secs_f64(ms / 1_000.0))
    }

    fn observe_latency(&mut self, latency: Duration) {
        let ms = latency.as_secs_f64() * 1_000.0;
        self.avg_latency_ms = Some(match self.avg_latency_ms {
            None => ms,
            Some(avg) => LATENCY_ALPHA * ms + (1.0 - LATENCY_ALPHA) * avg,
        });
    }

    fn record_success(&mut self, usage: &Usage, cost: f64, latency: Duration) {
        self.requests += 1;
        self.input_tokens += usage.input_tokens;
        self.output_tokens += usage.output_tokens;
        self.cost += cost;
        self.observe_latency(latency);
    }

    fn record_error(&mut self, latency: Duration) {
        self.requests += 1;
        self.errors += 1;
        self.observe_latency(latency);
    }
}

#[derive(Debug, Default)]
struct LedgerState {
    backends: HashMap<String, UsageCounters>,
    models: HashMap<String, UsageCounters>,
    cache_hits: u64,
}

impl LedgerState {
    fn each(&mut self, backend: Option<&str>, model: Option<&str>, f: impl Fn(&mut UsageCounters)) {
        if let Some(backend) = backend {
            f(self.backends.entry(backend.to_owned()).or_default());
        }
        if let Some(model) = model {
            f(self.models.entry(model.to_owned()).or_default());
        }
    }
}

/// Additive usage accounting. Counters only grow until [`reset`](Self::reset).
#[derive(Debug, Default)]
pub struct UsageLedger {
    state: Mutex<LedgerState>,
}

impl UsageLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_success(
        &self,
        backend: &str,
        model: Option<&str>,
        usage: &Usage,
        cost: f64,
        latency: Duration,
    ) {
        self.state
            .lock()
            .each(Some(backend), model, |c| c.record_success(usage, cost, latency));
    }

    pub fn record_error(&self, backend: &str, model: Option<&str>, latency: Duration) {
        self.state
            .lock()
            .each(Some(backend), model, |c| c.record_error(latency));
    }

    /// Cache hits never reach a backend; they are counted globally and per
    /// model when the request named one.
    pub fn record_cache_hit(&self, model: Option<&str>) {
        let mut state = self.state.lock();
        state.cache_hits += 1;
        state.each(None, model, |c| c.cache_hits += 1);
    }

    pub fn backend(&self, backend: &str) -> Option<UsageCounters> {
        self.state.lock().backends.get(backend).cloned()
    }

    pub fn model(&self, model: &str) -> Option<UsageCounters> {
        self.state.lock().models.get(model).cloned()
    }

    pub fn backends(&self) -> HashMap<String, UsageCounters> {
        self.state.lock().backends.clone()
    }

    pub fn models(&self) -> HashMap<String, UsageCounters> {
        self.state.lock().models.clone()
    }

    pub fn cache_hits(&self) -> u64 {
        self.state.lock().cache_hits
    }

    /// Sum over all backends. Latency is not aggregated.
    pub fn totals(&self) -> UsageCounters {
        let state = self.state.lock();
        let mut totals = UsageCounters {
            cache_hits: state.cache_hits,
            ..Default::default()
        };
        for counters in state.backends.values() {
            totals.requests += counters.requests;
            totals.errors += counters.errors;
            totals.input_tokens += counters.input_tokens;
            totals.output_tokens += counters.output_tokens;
            totals.cost += counters.cost;
        }
        totals
    }

    pub fn reset(&self) {
        *self.state.lock() = LedgerState::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_updates_backend_and_model() {
        let ledger = UsageLedger::new();
        ledger.record_success(
            "openai",
            Some("gpt-4o"),
            &Usage::new(10, 5),
            0.25,
            Duration::from_millis(100),
        );

        let backend = ledger.backend("openai").unwrap();
        assert_eq!(backend.requests, 1);
        assert_eq!(backend.total_tokens(), 15);
        assert_eq!(ledger.model("gpt-4o").unwrap().cost, 0.25);
        assert_eq!(backend.avg_latency(), Some(Duration::from_millis(100)));
    }

    #[test]
    fn error_rate_is_derived() {
        let ledger = UsageLedger::new();
        let latency = Duration::from_millis(10);
        ledger.record_success("a", None, &Usage::default(), 0.0, latency);
        ledger.record_error("a", None, latency);
        ledger.record_error("a", None, latency);
        ledger.record_success("a", None, &Usage::default(), 0.0, latency);

        let counters = ledger.backend("a").unwrap();
        assert_eq!(counters.errors, 2);
        assert!((counters.error_rate() - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn latency_is_smoothed() {
        let ledger = UsageLedger::new();
        ledger.record_success("a", None, &Usage::default(), 0.0, Duration::from_millis(100));
        ledger.record_success("a", None, &Usage::default(), 0.0, Duration::from_millis(200));
        // 0.2 * 200 + 0.8 * 100
        let avg = ledger.backend("a").unwrap().avg_latency_ms.unwrap();
        assert!((avg - 120.0).abs() < 1e-6);
    }

    #[test]
    fn totals_and_reset() {
        let ledger = UsageLedger::new();
        let latency = Duration::from_millis(1);
        ledger.record_success("a", None, &Usage::new(1, 2), 1.0, latency);
        ledger.record_success("b", None, &Usage::new(3, 4), 2.0, latency);
        ledger.record_cache_hit(Some("m"));

        let totals = ledger.totals();
        assert_eq!(totals.requests, 2);
        assert_eq!(totals.total_tokens(), 10);
        assert_eq!(totals.cache_hits, 1);
        assert_eq!(ledger.model("m").unwrap().cache_hits, 1);

        ledger.reset();
        assert_eq!(ledger.totals(), UsageCounters::default());
        assert!(ledger.backends().is_empty());
    }
}
