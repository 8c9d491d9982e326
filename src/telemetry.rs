//! Telemetry metric name constants.
//!
//! Centralised metric names for bifrost operations. Consumers install
//! their own `metrics` recorder (e.g. prometheus, statsd); without a
//! recorder installed, all metric calls are no-ops.
//!
//! # Metric naming conventions
//!
//! All metrics are prefixed with `bifrost_`. Counters end in `_total`,
//! histograms use meaningful units (e.g. `_seconds`).
//!
//! # Common labels
//!
//! - `backend`: backend identifier (e.g. "openai", "anthropic")
//! - `operation`: operation invoked (e.g. "generate", "embed")
//! - `status`: "ok" or "error"
//! - `direction`: token direction: "input" or "output"
//! - `category`: error category (e.g. "rate-limit")

/// Total requests dispatched to a backend (cache hits excluded).
///
/// Labels: `backend`, `operation`, `status` ("ok" | "error").
pub const REQUESTS_TOTAL: &str = "bifrost_requests_total";

/// Request duration in seconds, including retries and admission waits.
///
/// Labels: `backend`, `operation`.
pub const REQUEST_DURATION_SECONDS: &str = "bifrost_request_duration_seconds";

/// Total retry attempts (not counting the initial request).
///
/// Labels: `backend`, `operation`, `category`.
pub const RETRIES_TOTAL: &str = "bifrost_retries_total";

/// Total tokens consumed.
///
/// Labels: `backend`, `direction` ("input" | "output").
pub const TOKENS_TOTAL: &str = "bifrost_tokens_total";

/// Estimated spend in USD.
///
/// Labels: `backend`.
pub const COST_USD_TOTAL: &str = "bifrost_cost_usd_total";

/// Total response cache hits.
pub const CACHE_HITS_TOTAL: &str = "bifrost_cache_hits_total";

/// Total response cache misses.
pub const CACHE_MISSES_TOTAL: &str = "bifrost_cache_misses_total";

/// Entries evicted from the response cache to satisfy its size bounds.
pub const CACHE_EVICTIONS_TOTAL: &str = "bifrost_cache_evictions_total";

/// Time spent waiting in an admission queue, in seconds.
///
/// Labels: `backend`.
pub const ADMISSION_WAIT_SECONDS: &str = "bifrost_admission_wait_seconds";

/// Requests refused by a backend's token budget.
///
/// Labels: `backend`, `operation`.
pub const BUDGET_DENIED_TOTAL: &str = "bifrost_budget_denied_total";

/// Fallbacks from one backend to the next.
///
/// Labels: `from`, `operation`, `reason`.
pub const FALLBACKS_TOTAL: &str = "bifrost_fallbacks_total";
