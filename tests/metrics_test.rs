//! Tests for metrics emitted by the dispatcher.
//!
//! Uses `metrics_util::debugging::DebuggingRecorder` to capture and assert
//! on emitted metrics without needing a real exporter.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use metrics_util::MetricKind;
use metrics_util::debugging::{DebugValue, DebuggingRecorder};

use bifrost::{
    Backend, BackendError, BackendOutput, Bifrost, BifrostError, Capabilities, OperationRequest,
    RateLimitConfig, RetryConfig, Usage, telemetry,
};

// ============================================================================
// Mock backends
// ============================================================================

struct Healthy;

#[async_trait]
impl Backend for Healthy {
    fn name(&self) -> &str {
        "healthy"
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::text()
    }

    async fn invoke(&self, _request: &OperationRequest) -> Result<BackendOutput, BackendError> {
        Ok(BackendOutput::new(serde_json::json!("ok")).usage(Usage::new(7, 3)))
    }
}

struct Overloaded;

#[async_trait]
impl Backend for Overloaded {
    fn name(&self) -> &str {
        "overloaded"
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::text()
    }

    async fn invoke(&self, _request: &OperationRequest) -> Result<BackendOutput, BackendError> {
        Err(BackendError::Api {
            status: 503,
            message: "overloaded".into(),
        })
    }
}

// ============================================================================
// Helpers
// ============================================================================

type SnapshotVec = Vec<(
    metrics_util::CompositeKey,
    Option<metrics::Unit>,
    Option<metrics::SharedString>,
    DebugValue,
)>;

/// Sum all counter values matching a given metric name.
fn counter_total(snapshot: &SnapshotVec, name: &str) -> u64 {
    counter_with_label(snapshot, name, None)
}

/// Sum counters for `name`, optionally restricted to one label value.
fn counter_with_label(snapshot: &SnapshotVec, name: &str, label: Option<(&str, &str)>) -> u64 {
    snapshot
        .iter()
        .filter(|(key, _, _, _)| key.kind() == MetricKind::Counter && key.key().name() == name)
        .filter(|(key, _, _, _)| {
            label.is_none_or(|(k, v)| {
                key.key()
                    .labels()
                    .any(|l| l.key() == k && l.value() == v)
            })
        })
        .map(|(_, _, _, value)| match value {
            DebugValue::Counter(v) => *v,
            _ => 0,
        })
        .sum()
}

fn has_histogram(snapshot: &SnapshotVec, name: &str) -> bool {
    snapshot
        .iter()
        .any(|(key, _, _, _)| key.kind() == MetricKind::Histogram && key.key().name() == name)
}

/// Runs `request` against a dispatcher built by `build`, capturing metrics.
///
/// `block_in_place` keeps the sync `with_local_recorder` closure on the
/// current thread while `block_on` drives the async work.
fn capture(
    build: impl FnOnce() -> bifrost::Dispatcher,
    request: OperationRequest,
) -> (Result<bifrost::DispatchResponse, BifrostError>, SnapshotVec) {
    let recorder = DebuggingRecorder::new();
    let snapshotter = recorder.snapshotter();

    let result = metrics::with_local_recorder(&recorder, || {
        tokio::task::block_in_place(|| {
            tokio::runtime::Handle::current().block_on(async {
                let dispatcher = build();
                dispatcher.perform(&request).await
            })
        })
    });
    (result, snapshotter.snapshot().into_vec())
}

// ============================================================================
// Tests
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 1)]
async fn successful_request_records_metrics() {
    let (result, snapshot) = capture(
        || Bifrost::builder().backend("a", Arc::new(Healthy)).build().unwrap(),
        OperationRequest::generate("hi"),
    );
    assert!(result.is_ok());

    assert_eq!(counter_total(&snapshot, telemetry::REQUESTS_TOTAL), 1);
    assert!(has_histogram(&snapshot, telemetry::REQUEST_DURATION_SECONDS));
    assert_eq!(
        counter_with_label(&snapshot, telemetry::TOKENS_TOTAL, Some(("direction", "input"))),
        7
    );
    assert_eq!(
        counter_with_label(&snapshot, telemetry::TOKENS_TOTAL, Some(("direction", "output"))),
        3
    );
    assert_eq!(counter_total(&snapshot, telemetry::CACHE_MISSES_TOTAL), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 1)]
async fn retries_are_counted_per_category() {
    let (result, snapshot) = capture(
        || {
            Bifrost::builder()
                .backend("a", Arc::new(Overloaded))
                .retry(
                    RetryConfig::new()
                        .max_attempts(3)
                        .initial_delay(Duration::from_millis(1))
                        .jitter(false),
                )
                .build()
                .unwrap()
        },
        OperationRequest::generate("hi"),
    );
    assert!(result.is_err());

    assert_eq!(
        counter_with_label(&snapshot, telemetry::RETRIES_TOTAL, Some(("category", "server-error"))),
        2
    );
    assert_eq!(
        counter_with_label(&snapshot, telemetry::REQUESTS_TOTAL, Some(("status", "error"))),
        1
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 1)]
async fn budget_denials_and_fallbacks_are_counted() {
    let (result, snapshot) = capture(
        || {
            Bifrost::builder()
                .backend("a", Arc::new(Healthy))
                .backend("b", Arc::new(Healthy))
                .rate_limit("a", RateLimitConfig::new().tokens_per_minute(0))
                .build()
                .unwrap()
        },
        OperationRequest::generate("hi").estimated_tokens(10),
    );
    assert_eq!(result.unwrap().backend.as_deref(), Some("b"));

    assert_eq!(
        counter_with_label(&snapshot, telemetry::BUDGET_DENIED_TOTAL, Some(("backend", "a"))),
        1
    );
    assert_eq!(
        counter_with_label(&snapshot, telemetry::FALLBACKS_TOTAL, Some(("reason", "budget"))),
        1
    );
}

#[tokio::test]
async fn metrics_are_noop_without_recorder() {
    // Verify no panics when no recorder is installed.
    let dispatcher = Bifrost::builder().backend("a", Arc::new(Healthy)).build().unwrap();
    dispatcher
        .perform(&OperationRequest::generate("hi"))
        .await
        .unwrap();
}
