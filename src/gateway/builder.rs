//! Builder for configuring dispatcher instances

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tracing::info;

use super::config::{BackendSettings, DispatcherConfig};
use super::dispatcher::{Dispatcher, DispatcherCore};
use crate::accounting::{PriceTable, TokenAccountant, UsageLedger};
use crate::admission::{AdmissionController, RateLimitConfig};
use crate::backends::{BackendRegistry, RetryConfig, RetryController, RoutingConfig};
use crate::cache::{CacheConfig, ResponseCache};
use crate::classify::ErrorClassifier;
use crate::tokenizer::{TokenizerRegistry, TokenizerSource};
use crate::traits::Backend;
use crate::types::Operation;
use crate::{BifrostError, Result};

/// Main entry point for creating dispatchers.
pub struct Bifrost;

impl Bifrost {
    /// Create a new builder for configuring a dispatcher.
    pub fn builder() -> BifrostBuilder {
        BifrostBuilder::new()
    }
}

/// Builder for configuring dispatcher instances.
///
/// Starts from [`DispatcherConfig::default()`]; every setter overrides one
/// part of it. Backends themselves are code, so they are always registered
/// here rather than in the configuration file.
pub struct BifrostBuilder {
    config: DispatcherConfig,
    backends: Vec<(String, Arc<dyn Backend>)>,
    tokenizer_mappings: Vec<(String, TokenizerSource)>,
}

impl BifrostBuilder {
    pub fn new() -> Self {
        Self {
            config: DispatcherConfig::default(),
            backends: Vec::new(),
            tokenizer_mappings: Vec::new(),
        }
    }

    /// Replace the whole configuration, e.g. one loaded from TOML.
    ///
    /// Registered backends and tokenizer mappings are kept.
    pub fn config(mut self, config: DispatcherConfig) -> Self {
        self.config = config;
        self
    }

    /// Register a backend under `id`. A later registration with the same id
    /// replaces the earlier one.
    pub fn backend(mut self, id: impl Into<String>, backend: Arc<dyn Backend>) -> Self {
        let id = id.into();
        self.backends.retain(|(existing, _)| *existing != id);
        self.backends.push((id, backend));
        self
    }

    pub fn backend_settings(mut self, id: impl Into<String>, settings: BackendSettings) -> Self {
        self.config.backends.insert(id.into(), settings);
        self
    }

    /// Rate-limit backend `id`. Backends without a limit are admitted freely.
    pub fn rate_limit(mut self, id: impl Into<String>, config: RateLimitConfig) -> Self {
        self.config.backends.entry(id.into()).or_default().rate_limit = Some(config);
        self
    }

    /// Default model for backend `id` when a request names none.
    pub fn model(mut self, id: impl Into<String>, model: impl Into<String>) -> Self {
        self.config.backends.entry(id.into()).or_default().model = Some(model.into());
        self
    }

    /// Per-call timeout for backends without their own.
    pub fn default_timeout(mut self, timeout: Duration) -> Self {
        self.config.default_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn routing(mut self, routing: RoutingConfig) -> Self {
        self.config.routing = routing;
        self
    }

    pub fn primary(mut self, id: impl Into<String>) -> Self {
        self.config.routing = std::mem::take(&mut self.config.routing).primary(id);
        self
    }

    pub fn fallback(mut self, id: impl Into<String>) -> Self {
        self.config.routing = std::mem::take(&mut self.config.routing).fallback(id);
        self
    }

    /// Try `id` first for `operation`.
    pub fn prefer(mut self, operation: Operation, id: impl Into<String>) -> Self {
        self.config.routing = std::mem::take(&mut self.config.routing).prefer(operation, id);
        self
    }

    pub fn cache(mut self, config: CacheConfig) -> Self {
        self.config.cache = (&config).into();
        self
    }

    pub fn disable_cache(mut self) -> Self {
        self.config.cache.enabled = false;
        self
    }

    pub fn retry(mut self, config: RetryConfig) -> Self {
        self.config.retry = (&config).into();
        self
    }

    /// Move on to the next candidate when retries against one backend are
    /// exhausted by a retryable failure (default: off).
    pub fn fallback_on_exhaustion(mut self, enabled: bool) -> Self {
        self.config.fallback_on_exhaustion = enabled;
        self
    }

    /// Fragments buffered ahead of a slow stream consumer.
    pub fn stream_buffer(mut self, size: usize) -> Self {
        self.config.stream_buffer = size;
        self
    }

    /// Classified errors retained in the error history.
    pub fn history_capacity(mut self, capacity: usize) -> Self {
        self.config.history_capacity = capacity;
        self
    }

    pub fn event_capacity(mut self, capacity: usize) -> Self {
        self.config.event_capacity = capacity;
        self
    }

    pub fn pricing(mut self, prices: PriceTable) -> Self {
        self.config.pricing = prices;
        self
    }

    /// Add a custom tokenizer mapping.
    pub fn tokenizer_mapping(
        mut self,
        model_pattern: impl Into<String>,
        source: TokenizerSource,
    ) -> Self {
        self.tokenizer_mappings.push((model_pattern.into(), source));
        self
    }

    /// Build the dispatcher.
    ///
    /// Fails with [`BifrostError::Configuration`] when no backend is
    /// registered, the configuration is invalid, or it names unknown ids.
    pub fn build(self) -> Result<Dispatcher> {
        let config = self.config;
        if self.backends.is_empty() {
            return Err(BifrostError::Configuration(
                "at least one backend must be registered".into(),
            ));
        }
        config.validate()?;
        config.validate_ids(|id| self.backends.iter().any(|(known, _)| known == id))?;

        let registry = BackendRegistry::new();
        for (id, backend) in self.backends {
            registry.register(id, backend);
        }

        let admission = AdmissionController::new();
        let mut settings = BTreeMap::new();
        for (id, backend_settings) in config.backends {
            if let Some(rate_limit) = &backend_settings.rate_limit {
                admission.register(id.clone(), rate_limit.clone())?;
            }
            settings.insert(id, backend_settings);
        }

        let tokenizers = TokenizerRegistry::new();
        for (pattern, source) in self.tokenizer_mappings {
            tokenizers.register(pattern, source);
        }
        let accountant = TokenAccountant::new()
            .with_tokenizers(Arc::new(tokenizers))
            .with_prices(config.pricing);

        let classifier = Arc::new(ErrorClassifier::with_history_capacity(config.history_capacity));
        let cache = config
            .cache
            .enabled
            .then(|| ResponseCache::new(&CacheConfig::from(&config.cache)));
        let (events, _) = broadcast::channel(config.event_capacity);

        info!(
            backends = ?registry.ids(),
            cache = cache.is_some(),
            fallback_on_exhaustion = config.fallback_on_exhaustion,
            "dispatcher built"
        );

        Ok(Dispatcher::from_core(DispatcherCore {
            registry,
            admission,
            retry: RetryController::new(Arc::clone(&classifier)),
            classifier,
            retry_config: RetryConfig::from(&config.retry),
            cache,
            accountant,
            ledger: UsageLedger::new(),
            routing: config.routing,
            settings,
            default_timeout: Duration::from_millis(config.default_timeout_ms),
            fallback_on_exhaustion: config.fallback_on_exhaustion,
            stream_buffer: config.stream_buffer,
            events,
        }))
    }
}

impl Default for BifrostBuilder {
    fn default() -> Self {
        Self::new()
    }
}
