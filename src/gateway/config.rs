//! Dispatcher configuration.
//!
//! Everything the builder accepts programmatically can also come from TOML:
//!
//! ```toml
//! fallback_on_exhaustion = true
//! default_timeout_ms = 60000
//!
//! [backends.openai]
//! model = "gpt-4o-mini"
//! timeout_ms = 30000
//! rate_limit = { strategy = "token-bucket", requests_per_minute = 500, tokens_per_minute = 150000 }
//!
//! [backends.local]
//! model = "llama-3.1-8b"
//!
//! [routing]
//! primary = "openai"
//! fallbacks = ["local"]
//!
//! [cache]
//! max_entries = 5000
//! ttl_ms = 600000
//!
//! [retry]
//! max_attempts = 4
//! backoff = "exponential"
//!
//! [pricing."gpt-4o-mini"]
//! input_per_mtok = 0.15
//! output_per_mtok = 0.6
//! ```

use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::accounting::PriceTable;
use crate::admission::RateLimitConfig;
use crate::backends::{BackoffKind, DEFAULT_STREAM_BUFFER, RetryConfig, RoutingConfig};
use crate::cache::CacheConfig;
use crate::classify::DEFAULT_HISTORY_CAPACITY;
use crate::types::Operation;
use crate::{BifrostError, Result};

/// Per-call backend timeout when none is configured.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);

/// Default capacity of the usage-event broadcast channel.
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

/// Settings for one backend id.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BackendSettings {
    /// Model used when the request does not name one.
    pub model: Option<String>,
    /// Per-attempt timeout; falls back to the dispatcher default.
    pub timeout_ms: Option<u64>,
    /// Admission limits; `None` leaves the backend unlimited.
    pub rate_limit: Option<RateLimitConfig>,
}

impl BackendSettings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = Some(timeout.as_millis() as u64);
        self
    }

    pub fn rate_limit(mut self, config: RateLimitConfig) -> Self {
        self.rate_limit = Some(config);
        self
    }
}

/// Response-cache settings.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CacheSettings {
    pub enabled: bool,
    pub max_entries: usize,
    pub max_bytes: usize,
    pub ttl_ms: u64,
}

impl Default for CacheSettings {
    fn default() -> Self {
        let defaults = CacheConfig::default();
        Self {
            enabled: true,
            max_entries: defaults.max_entries,
            max_bytes: defaults.max_bytes,
            ttl_ms: defaults.ttl.as_millis() as u64,
        }
    }
}

impl From<&CacheSettings> for CacheConfig {
    fn from(settings: &CacheSettings) -> Self {
        CacheConfig::new()
            .max_entries(settings.max_entries)
            .max_bytes(settings.max_bytes)
            .ttl(Duration::from_millis(settings.ttl_ms))
    }
}

impl From<&CacheConfig> for CacheSettings {
    fn from(config: &CacheConfig) -> Self {
        Self {
            enabled: true,
            max_entries: config.max_entries,
            max_bytes: config.max_bytes,
            ttl_ms: config.ttl.as_millis() as u64,
        }
    }
}

/// Retry settings.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RetrySettings {
    pub max_attempts: u32,
    pub backoff: BackoffKind,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub jitter: bool,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self::from(&RetryConfig::default())
    }
}

impl From<&RetrySettings> for RetryConfig {
    fn from(settings: &RetrySettings) -> Self {
        RetryConfig::new()
            .max_attempts(settings.max_attempts)
            .backoff(settings.backoff)
            .initial_delay(Duration::from_millis(settings.initial_delay_ms))
            .max_delay(Duration::from_millis(settings.max_delay_ms))
            .jitter(settings.jitter)
    }
}

impl From<&RetryConfig> for RetrySettings {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            backoff: config.backoff,
            initial_delay_ms: config.initial_delay.as_millis() as u64,
            max_delay_ms: config.max_delay.as_millis() as u64,
            jitter: config.jitter,
        }
    }
}

/// Complete dispatcher configuration.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DispatcherConfig {
    pub backends: BTreeMap<String, BackendSettings>,
    pub routing: RoutingConfig,
    pub cache: CacheSettings,
    pub retry: RetrySettings,
    /// Move to the next candidate when a retryable failure exhausts its
    /// attempts. Default: false.
    pub fallback_on_exhaustion: bool,
    pub default_timeout_ms: u64,
    pub stream_buffer: usize,
    pub history_capacity: usize,
    pub event_capacity: usize,
    pub pricing: PriceTable,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            backends: BTreeMap::new(),
            routing: RoutingConfig::default(),
            cache: CacheSettings::default(),
            retry: RetrySettings::default(),
            fallback_on_exhaustion: false,
            default_timeout_ms: DEFAULT_TIMEOUT.as_millis() as u64,
            stream_buffer: DEFAULT_STREAM_BUFFER,
            history_capacity: DEFAULT_HISTORY_CAPACITY,
            event_capacity: DEFAULT_EVENT_CAPACITY,
            pricing: PriceTable::default(),
        }
    }
}

impl DispatcherConfig {
    pub fn from_toml_str(source: &str) -> Result<Self> {
        toml::from_str(source)
            .map_err(|e| BifrostError::Configuration(format!("invalid dispatcher config: {e}")))
    }

    /// Read and parse a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let source = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&source)
    }

    pub fn default_timeout(&self) -> Duration {
        Duration::from_millis(self.default_timeout_ms)
    }

    pub fn timeout_for(&self, backend: &str) -> Duration {
        self.backends
            .get(backend)
            .and_then(|s| s.timeout_ms)
            .map_or_else(|| self.default_timeout(), Duration::from_millis)
    }

    /// Checks that need no knowledge of which backends exist.
    pub fn validate(&self) -> Result<()> {
        if self.retry.max_attempts == 0 {
            return Err(config_error("retry.max_attempts must be at least 1"));
        }
        if self.retry.initial_delay_ms > self.retry.max_delay_ms {
            return Err(config_error(
                "retry.initial_delay_ms must not exceed retry.max_delay_ms",
            ));
        }
        if self.cache.enabled && (self.cache.max_entries == 0 || self.cache.max_bytes == 0) {
            return Err(config_error("cache bounds must be greater than zero"));
        }
        if self.cache.enabled && self.cache.ttl_ms == 0 {
            return Err(config_error("cache.ttl_ms must be greater than zero"));
        }
        if self.stream_buffer == 0 {
            return Err(config_error("stream_buffer must be greater than zero"));
        }
        if self.event_capacity == 0 {
            return Err(config_error("event_capacity must be greater than zero"));
        }
        if self.default_timeout_ms == 0 {
            return Err(config_error("default_timeout_ms must be greater than zero"));
        }

        for (id, settings) in &self.backends {
            if settings.timeout_ms == Some(0) {
                return Err(config_error(format!("backends.{id}.timeout_ms must be greater than zero")));
            }
            if let Some(rate_limit) = &settings.rate_limit {
                rate_limit.validate().map_err(|e| match e {
                    BifrostError::Configuration(msg) => config_error(format!("backends.{id}: {msg}")),
                    other => other,
                })?;
            }
        }

        let mut seen = HashSet::new();
        for id in self.routing.primary.iter().chain(self.routing.fallbacks.iter()) {
            if !seen.insert(id.as_str()) {
                return Err(config_error(format!("backend '{id}' appears more than once in routing")));
            }
        }
        for operation in self.routing.preferred.keys() {
            operation.parse::<Operation>()?;
        }

        self.pricing.validate()
    }

    /// Checks that every id the configuration names is registered.
    pub fn validate_ids(&self, is_registered: impl Fn(&str) -> bool) -> Result<()> {
        for id in self.routing.named_ids() {
            if !is_registered(id) {
                return Err(config_error(format!("routing names unknown backend '{id}'")));
            }
        }
        for id in self.backends.keys() {
            if !is_registered(id) {
                return Err(config_error(format!("settings given for unknown backend '{id}'")));
            }
        }
        Ok(())
    }
}

fn config_error(message: impl Into<String>) -> BifrostError {
    BifrostError::Configuration(message.into())
}
