//! The dispatcher: cache, candidate selection, admission, retry, accounting.
//!
//! # Flow of one `perform` call
//!
//! ```text
//! perform(request)
//!     │
//!     ├─ cache hit? ───────────────────────────► CacheHit event, return
//!     │
//!     ├─ candidates = routing order, filtered by
//!     │  registered / is_available / capabilities
//!     │
//!     └─ for each candidate:
//!          ├─ token budget denied? ─► RateLimited event, next candidate
//!          └─ retry {
//!                admission.schedule {
//!                    timeout(backend.invoke)
//!                }
//!             }
//!             ├─ Ok  ─► cache write, ledger, Success event, return
//!             └─ Err ─► ledger, Error event, return
//!                       (or next candidate when fallback_on_exhaustion
//!                        is on and the failure was retryable)
//! ```

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::sync::broadcast;
use tokio::time::Instant;
use tracing::{debug, instrument, warn};

use super::config::BackendSettings;
use super::stream::{InstrumentedStream, StreamRecorder};
use crate::accounting::{Direction, TokenAccountant, UsageLedger};
use crate::admission::AdmissionController;
use crate::backends::{
    BackendRegistry, RetryConfig, RetryContext, RetryController, RetryHooks, RoutingConfig,
    bounded_stream,
};
use crate::cache::ResponseCache;
use crate::classify::{ClassifiedError, ErrorClassifier};
use crate::error::BackendError;
use crate::telemetry;
use crate::traits::Backend;
use crate::types::{
    BackendOutput, DispatchResponse, DispatchStream, EventKind, FragmentStream, Operation,
    OperationRequest, Usage, UsageEvent,
};
use crate::{BifrostError, Result};

/// Shared state behind a [`Dispatcher`]. Streams keep it alive until they end.
pub(crate) struct DispatcherCore {
    pub(crate) registry: BackendRegistry,
    pub(crate) admission: AdmissionController,
    pub(crate) classifier: Arc<ErrorClassifier>,
    pub(crate) retry: RetryController,
    pub(crate) retry_config: RetryConfig,
    pub(crate) cache: Option<ResponseCache>,
    pub(crate) accountant: TokenAccountant,
    pub(crate) ledger: UsageLedger,
    pub(crate) routing: RoutingConfig,
    pub(crate) settings: BTreeMap<String, BackendSettings>,
    pub(crate) default_timeout: Duration,
    pub(crate) fallback_on_exhaustion: bool,
    pub(crate) stream_buffer: usize,
    pub(crate) events: broadcast::Sender<UsageEvent>,
}

/// Outcome details of a successful backend call.
pub(crate) struct Completion<'a> {
    pub backend: &'a str,
    pub operation: Operation,
    pub model: Option<String>,
    pub usage: Usage,
    pub latency: Duration,
    pub streamed: bool,
}

impl DispatcherCore {
    pub(crate) fn emit(&self, event: UsageEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    /// Ledger, metrics, history and event bookkeeping for a success.
    /// Returns the estimated cost.
    pub(crate) fn record_success(&self, done: Completion<'_>) -> f64 {
        let model = done.model.as_deref().unwrap_or_default();
        let cost = self.accountant.usage_cost(&done.usage, model);

        self.ledger.record_success(
            done.backend,
            done.model.as_deref(),
            &done.usage,
            cost,
            done.latency,
        );
        self.classifier
            .history()
            .mark_resolved(done.backend, done.operation.as_str());

        record_request(done.operation, done.backend, done.latency, "ok");
        record_token_usage(done.backend, &done.usage);
        if cost > 0.0 {
            metrics::counter!(telemetry::COST_USD_TOTAL,
                "backend" => done.backend.to_owned(),
            )
            .increment((cost * 1_000_000.0).round() as u64);
        }

        let mut event = UsageEvent::new(EventKind::Success, done.operation);
        event.backend_id = Some(done.backend.to_owned());
        event.model = done.model;
        event.input_tokens = done.usage.input_tokens;
        event.output_tokens = done.usage.output_tokens;
        event.cost = cost;
        event.latency_ms = done.latency.as_millis() as u64;
        event.streamed = done.streamed;
        self.emit(event);
        cost
    }

    /// Ledger, metrics and event bookkeeping for a terminal failure.
    pub(crate) fn record_failure(
        &self,
        backend: &str,
        operation: Operation,
        model: Option<&str>,
        error: &BifrostError,
        latency: Duration,
        streamed: bool,
    ) {
        // Cancellation is the caller's decision, not a backend failure.
        let Some(classified) = error.classified() else {
            return;
        };
        self.ledger.record_error(backend, model, latency);
        record_request(operation, backend, latency, "error");

        let mut event = UsageEvent::new(EventKind::Error, operation);
        event.backend_id = Some(backend.to_owned());
        event.model = model.map(str::to_owned);
        event.latency_ms = latency.as_millis() as u64;
        event.error_category = Some(classified.category);
        event.streamed = streamed;
        self.emit(event);
    }

    /// Classify a failure that happened after a stream was established.
    pub(crate) fn classify_stream_failure(
        &self,
        raw: &BackendError,
        backend: &str,
        operation: Operation,
        model: Option<&str>,
        attempt: u32,
    ) -> BifrostError {
        let mut ctx = crate::classify::ErrorContext::new(backend, operation.as_str()).attempt(attempt);
        if let Some(model) = model {
            ctx = ctx.model(model);
        }
        self.classifier.classify_and_record(raw, &ctx).into()
    }

    fn model_for(&self, id: &str, backend: &dyn Backend, request: &OperationRequest) -> Option<String> {
        request
            .model()
            .map(str::to_owned)
            .or_else(|| self.settings.get(id).and_then(|s| s.model.clone()))
            .or_else(|| backend.default_model().map(str::to_owned))
    }

    fn timeout_for(&self, id: &str) -> Duration {
        self.settings
            .get(id)
            .and_then(|s| s.timeout_ms)
            .map_or(self.default_timeout, Duration::from_millis)
    }

    /// Usable backends for `operation`, in routing order.
    fn candidates(&self, operation: Operation, streaming: bool) -> Vec<(String, Arc<dyn Backend>)> {
        let registered = self.registry.ids();
        self.routing
            .candidates(operation, &registered)
            .into_iter()
            .filter_map(|id| {
                let Some(backend) = self.registry.get(&id) else {
                    debug!(backend = %id, "skipping unregistered backend");
                    return None;
                };
                if !backend.is_available() {
                    debug!(backend = %id, "skipping unavailable backend");
                    return None;
                }
                let capabilities = backend.capabilities();
                let capable = if streaming {
                    capabilities.supports_streaming(operation)
                } else {
                    capabilities.supports(operation)
                };
                capable.then_some((id, backend))
            })
            .collect()
    }

    /// Take the request's token estimate from `id`'s budget. On denial,
    /// emits a `RateLimited` event and returns false.
    fn admit_budget(&self, id: &str, request: &OperationRequest) -> bool {
        let Some(tokens) = request.estimated_tokens else {
            return true;
        };
        if self.admission.consume_token_budget(id, tokens) {
            return true;
        }
        warn!(
            backend = id,
            operation = %request.operation,
            tokens,
            "token budget denied, trying next backend"
        );
        metrics::counter!(telemetry::BUDGET_DENIED_TOTAL,
            "backend" => id.to_owned(),
            "operation" => request.operation.as_str(),
        )
        .increment(1);
        metrics::counter!(telemetry::FALLBACKS_TOTAL,
            "from" => id.to_owned(),
            "operation" => request.operation.as_str(),
            "reason" => "budget",
        )
        .increment(1);
        let mut event = UsageEvent::new(EventKind::RateLimited, request.operation);
        event.backend_id = Some(id.to_owned());
        event.model = request.model().map(str::to_owned);
        event.input_tokens = tokens;
        self.emit(event);
        false
    }

    /// Run `call` against one backend under retry, admission and timeout.
    async fn attempt<T, F, Fut>(
        &self,
        id: &str,
        request: &OperationRequest,
        model: Option<&str>,
        call: F,
    ) -> (Result<T>, RetryContext)
    where
        F: Fn() -> Fut,
        Fut: Future<Output = std::result::Result<T, BackendError>>,
    {
        let timeout = self.timeout_for(id);
        let operation = request.operation;
        let mut ctx = RetryContext::new(id, operation.as_str());
        if let Some(model) = model {
            ctx = ctx.model(model);
        }

        let on_retry = |err: &ClassifiedError, attempt: u32| {
            metrics::counter!(telemetry::RETRIES_TOTAL,
                "backend" => id.to_owned(),
                "operation" => operation.as_str(),
                "category" => err.category.as_str(),
            )
            .increment(1);
            warn!(
                backend = id,
                operation = %operation,
                attempt,
                max_attempts = self.retry_config.max_attempts,
                category = %err.category,
                error = %err.cause,
                "retrying after transient error"
            );
        };
        let mut hooks = RetryHooks::new().on_retry(&on_retry);
        hooks.should_retry = request.should_retry.as_deref();
        hooks.cancel = request.cancel.as_ref();

        let call = &call;
        let admission = &self.admission;
        let priority = request.priority;
        let result = self
            .retry
            .execute(&mut ctx, &self.retry_config, hooks, move |_| {
                admission.schedule(id, priority, move || async move {
                    match tokio::time::timeout(timeout, call()).await {
                        Ok(outcome) => outcome,
                        Err(_) => Err(BackendError::Timeout(timeout)),
                    }
                })
            })
            .await;
        (result, ctx)
    }

    fn fall_through(&self, error: &BifrostError, id: &str, operation: Operation, remaining: bool) -> bool {
        if !(self.fallback_on_exhaustion && remaining && error.is_transient()) {
            return false;
        }
        warn!(backend = id, operation = %operation, error = %error, "retries exhausted, falling back");
        metrics::counter!(telemetry::FALLBACKS_TOTAL,
            "from" => id.to_owned(),
            "operation" => operation.as_str(),
            "reason" => "exhausted",
        )
        .increment(1);
        true
    }
}

/// Handle for issuing operations. Cheap to clone.
///
/// Built by [`Bifrost::builder()`](crate::Bifrost::builder).
#[derive(Clone)]
pub struct Dispatcher {
    core: Arc<DispatcherCore>,
}

impl Dispatcher {
    pub(crate) fn from_core(core: DispatcherCore) -> Self {
        Self {
            core: Arc::new(core),
        }
    }

    #[cfg(test)]
    pub(crate) fn core(&self) -> Arc<DispatcherCore> {
        Arc::clone(&self.core)
    }

    /// Run one operation.
    ///
    /// Errors: [`BifrostError::NoBackendAvailable`] when no registered,
    /// available backend supports the operation;
    /// [`BifrostError::BudgetExceeded`] when every usable backend's token
    /// budget refused the request's estimate; [`BifrostError::Cancelled`];
    /// otherwise the final [`BifrostError::Classified`] failure.
    #[instrument(skip(self, request), fields(operation = %request.operation))]
    pub async fn perform(&self, request: &OperationRequest) -> Result<DispatchResponse> {
        let core = &*self.core;
        let started = Instant::now();
        let operation = request.operation;
        if request.is_cancelled() {
            return Err(BifrostError::Cancelled);
        }

        let cache_key = self.cache_key_for(request);
        if let (Some(cache), Some(key)) = (&core.cache, &cache_key)
            && let Some(value) = cache.get(key)
        {
            debug!(key = %key, "served from cache");
            let model = request.model().map(str::to_owned);
            core.ledger.record_cache_hit(model.as_deref());
            let latency = started.elapsed();
            let mut event = UsageEvent::new(EventKind::CacheHit, operation);
            event.model = model.clone();
            event.latency_ms = latency.as_millis() as u64;
            core.emit(event);
            return Ok(DispatchResponse {
                value,
                backend: None,
                model,
                usage: Usage::default(),
                cost: 0.0,
                latency,
                from_cache: true,
                attempts: 0,
            });
        }

        let candidates = core.candidates(operation, false);
        if candidates.is_empty() {
            return Err(BifrostError::NoBackendAvailable {
                operation: operation.to_string(),
            });
        }

        let mut denied = Vec::new();
        let mut exhausted = None;
        for (idx, (id, backend)) in candidates.iter().enumerate() {
            if !core.admit_budget(id, request) {
                denied.push(id.clone());
                continue;
            }

            let model = core.model_for(id, backend.as_ref(), request);
            let call_started = Instant::now();
            let (result, ctx) = core
                .attempt(id, request, model.as_deref(), || backend.invoke(request))
                .await;
            let latency = call_started.elapsed();

            match result {
                Ok(output) => {
                    return Ok(self.complete(id, request, model, output, cache_key, latency, ctx.attempt));
                }
                Err(error) => {
                    core.record_failure(id, operation, model.as_deref(), &error, latency, false);
                    if core.fall_through(&error, id, operation, idx + 1 < candidates.len()) {
                        exhausted = Some(error);
                        continue;
                    }
                    return Err(error);
                }
            }
        }

        if let Some(error) = exhausted {
            return Err(error);
        }
        Err(BifrostError::BudgetExceeded {
            operation: operation.to_string(),
            requested: request.estimated_tokens.unwrap_or_default(),
            denied,
        })
    }

    #[allow(clippy::too_many_arguments)]
    fn complete(
        &self,
        id: &str,
        request: &OperationRequest,
        model: Option<String>,
        output: BackendOutput,
        cache_key: Option<String>,
        latency: Duration,
        attempts: u32,
    ) -> DispatchResponse {
        let core = &*self.core;
        let model = output.model.clone().or(model);
        let usage = output.usage.unwrap_or_else(|| {
            core.accountant.estimate_usage(
                &request.args,
                &output.value,
                model.as_deref().unwrap_or_default(),
            )
        });

        if let (Some(cache), Some(key)) = (&core.cache, cache_key) {
            cache.set(key, output.value.clone(), Some(json!({
                "backend": id,
                "model": model,
            })));
        }

        let cost = core.record_success(Completion {
            backend: id,
            operation: request.operation,
            model: model.clone(),
            usage,
            latency,
            streamed: false,
        });
        debug!(backend = id, attempts, latency_ms = latency.as_millis() as u64, "operation succeeded");

        DispatchResponse {
            value: output.value,
            backend: Some(id.to_owned()),
            model,
            usage,
            cost,
            latency,
            from_cache: false,
            attempts,
        }
    }

    /// Run one operation as a stream of fragments.
    ///
    /// Streams are never cached. Admission and retries cover establishing
    /// the stream; a failure after the first fragment is classified and
    /// yielded as the final item without retry. The stream is bounded
    /// (backpressure), ends with `Err(Cancelled)` when the request's token
    /// fires, and records usage when it finishes.
    #[instrument(skip(self, request), fields(operation = %request.operation))]
    pub async fn perform_stream(&self, request: &OperationRequest) -> Result<DispatchStream> {
        let core = &*self.core;
        let operation = request.operation;
        if request.is_cancelled() {
            return Err(BifrostError::Cancelled);
        }

        let candidates = core.candidates(operation, true);
        if candidates.is_empty() {
            return Err(BifrostError::NoBackendAvailable {
                operation: operation.to_string(),
            });
        }

        let mut denied = Vec::new();
        let mut exhausted = None;
        for (idx, (id, backend)) in candidates.iter().enumerate() {
            if !core.admit_budget(id, request) {
                denied.push(id.clone());
                continue;
            }

            let model = core.model_for(id, backend.as_ref(), request);
            let started = Instant::now();
            let (result, ctx): (Result<FragmentStream>, _) = core
                .attempt(id, request, model.as_deref(), || backend.invoke_stream(request))
                .await;

            match result {
                Ok(fragments) => {
                    debug!(backend = %id, attempts = ctx.attempt, "stream established");
                    let recorder = StreamRecorder {
                        core: Arc::clone(&self.core),
                        backend: id.clone(),
                        operation,
                        model,
                        args: request.args.clone(),
                        attempts: ctx.attempt,
                        started,
                    };
                    let instrumented =
                        InstrumentedStream::new(fragments, recorder, request.cancel.clone());
                    return Ok(bounded_stream(Box::pin(instrumented), core.stream_buffer));
                }
                Err(error) => {
                    core.record_failure(id, operation, model.as_deref(), &error, started.elapsed(), true);
                    if core.fall_through(&error, id, operation, idx + 1 < candidates.len()) {
                        exhausted = Some(error);
                        continue;
                    }
                    return Err(error);
                }
            }
        }

        if let Some(error) = exhausted {
            return Err(error);
        }
        Err(BifrostError::BudgetExceeded {
            operation: operation.to_string(),
            requested: request.estimated_tokens.unwrap_or_default(),
            denied,
        })
    }

    /// Cache key `perform` would use, or `None` when the request bypasses
    /// the cache.
    pub fn cache_key_for(&self, request: &OperationRequest) -> Option<String> {
        let cache = self.core.cache.as_ref()?;
        if request.skip_cache {
            return None;
        }
        Some(request.cache_key.clone().unwrap_or_else(|| {
            cache.key(request.operation.as_str(), &request.args, &request.options)
        }))
    }

    /// Subscribe to usage events. Slow subscribers miss events rather than
    /// slowing dispatch down.
    pub fn subscribe(&self) -> broadcast::Receiver<UsageEvent> {
        self.core.events.subscribe()
    }

    /// Register (or replace) a backend at runtime.
    pub fn register_backend(&self, id: impl Into<String>, backend: Arc<dyn Backend>) {
        self.core.registry.register(id, backend);
    }

    /// Remove a backend at runtime. In-flight calls finish normally.
    pub fn unregister_backend(&self, id: &str) -> bool {
        self.core.registry.unregister(id).is_some()
    }

    /// Whether any registered, available backend supports `operation`.
    pub fn supports(&self, operation: Operation) -> bool {
        self.core.registry.supports(operation)
    }

    pub fn backend_names(&self) -> Vec<String> {
        self.core.registry.ids()
    }

    pub fn ledger(&self) -> &UsageLedger {
        &self.core.ledger
    }

    pub fn classifier(&self) -> &ErrorClassifier {
        &self.core.classifier
    }

    /// `None` when caching is disabled.
    pub fn cache(&self) -> Option<&ResponseCache> {
        self.core.cache.as_ref()
    }

    pub fn admission(&self) -> &AdmissionController {
        &self.core.admission
    }

    pub fn accountant(&self) -> &TokenAccountant {
        &self.core.accountant
    }

    pub fn retry_config(&self) -> &RetryConfig {
        &self.core.retry_config
    }

    pub fn count_tokens(&self, text: &str, model: &str) -> usize {
        self.core.accountant.count_tokens(text, model)
    }

    pub fn estimate_cost(&self, tokens: u64, model: &str, direction: Direction) -> f64 {
        self.core.accountant.estimate_cost(tokens, model, direction)
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("backends", &self.core.registry.ids())
            .field("routing", &self.core.routing)
            .field("cache", &self.core.cache.is_some())
            .field("fallback_on_exhaustion", &self.core.fallback_on_exhaustion)
            .finish_non_exhaustive()
    }
}

/// Record request count and duration metrics.
pub(crate) fn record_request(operation: Operation, backend: &str, latency: Duration, status: &'static str) {
    metrics::counter!(telemetry::REQUESTS_TOTAL,
        "backend" => backend.to_owned(),
        "operation" => operation.as_str(),
        "status" => status,
    )
    .increment(1);
    metrics::histogram!(telemetry::REQUEST_DURATION_SECONDS,
        "backend" => backend.to_owned(),
        "operation" => operation.as_str(),
    )
    .record(latency.as_secs_f64());
}

fn record_token_usage(backend: &str, usage: &Usage) {
    metrics::counter!(telemetry::TOKENS_TOTAL,
        "backend" => backend.to_owned(),
        "direction" => Direction::Input.as_str(),
    )
    .increment(usage.input_tokens);
    metrics::counter!(telemetry::TOKENS_TOTAL,
        "backend" => backend.to_owned(),
        "direction" => Direction::Output.as_str(),
    )
    .increment(usage.output_tokens);
}
