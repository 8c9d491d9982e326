//! Rate-limit configuration.

use serde::{Deserialize, Serialize};

use crate::{BifrostError, Result};

/// Request-rate strategy for one backend.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RateStrategy {
    /// Minimum spacing of `60s / requests_per_minute` between releases.
    #[default]
    SlidingWindow,
    /// `requests_per_minute` permits, refilled to full every 60 seconds.
    FixedWindow,
    /// Bucket of `requests_per_minute` permits refilled continuously.
    TokenBucket,
}

impl RateStrategy {
    pub fn as_str(self) -> &'static str {
        match self {
            RateStrategy::SlidingWindow => "sliding-window",
            RateStrategy::FixedWindow => "fixed-window",
            RateStrategy::TokenBucket => "token-bucket",
        }
    }
}

/// Admission settings for one backend.
///
/// ```rust
/// # use bifrost::admission::{RateLimitConfig, RateStrategy};
/// let config = RateLimitConfig::new()
///     .strategy(RateStrategy::TokenBucket)
///     .requests_per_minute(600)
///     .max_concurrent(8)
///     .tokens_per_minute(90_000);
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub strategy: RateStrategy,
    /// Request rate. Default: 60.
    pub requests_per_minute: u32,
    /// Maximum in-flight requests. Default: 10.
    pub max_concurrent: usize,
    /// Token budget per minute; `None` disables the budget gate.
    pub tokens_per_minute: Option<u64>,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            strategy: RateStrategy::default(),
            requests_per_minute: 60,
            max_concurrent: 10,
            tokens_per_minute: None,
        }
    }
}

impl RateLimitConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn strategy(mut self, strategy: RateStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn requests_per_minute(mut self, rpm: u32) -> Self {
        self.requests_per_minute = rpm;
        self
    }

    pub fn max_concurrent(mut self, n: usize) -> Self {
        self.max_concurrent = n;
        self
    }

    pub fn tokens_per_minute(mut self, tpm: u64) -> Self {
        self.tokens_per_minute = Some(tpm);
        self
    }

    /// Reject configurations that could never admit a request.
    pub fn validate(&self) -> Result<()> {
        if self.requests_per_minute == 0 {
            return Err(BifrostError::Configuration(
                "requests_per_minute must be greater than zero".into(),
            ));
        }
        if self.max_concurrent == 0 {
            return Err(BifrostError::Configuration(
                "max_concurrent must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}
