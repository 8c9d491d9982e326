//! Bifrost - resilient dispatch for interchangeable generative-AI backends
//!
//! A [`Dispatcher`] sits between application code and any number of
//! [`Backend`] implementations. Each operation passes through:
//!
//! - a response cache keyed on (operation, arguments, options)
//! - routing over registered backends (primary, fallbacks, per-operation
//!   preference), filtered by availability and capabilities
//! - per-backend admission control: request-rate gates, concurrency caps
//!   and token budgets, with priority-ordered queues
//! - retries with backoff, driven by error classification
//! - token and cost accounting, usage events and metrics
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//!
//! use async_trait::async_trait;
//! use bifrost::{
//!     Backend, BackendError, BackendOutput, Bifrost, Capabilities, OperationRequest,
//! };
//! use serde_json::{Value, json};
//!
//! struct Echo;
//!
//! #[async_trait]
//! impl Backend for Echo {
//!     fn name(&self) -> &str {
//!         "echo"
//!     }
//!
//!     fn capabilities(&self) -> Capabilities {
//!         Capabilities::text()
//!     }
//!
//!     async fn invoke(&self, request: &OperationRequest) -> Result<BackendOutput, BackendError> {
//!         let prompt = request.args.first().cloned().unwrap_or(Value::Null);
//!         Ok(BackendOutput::new(json!({ "echo": prompt })))
//!     }
//! }
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> bifrost::Result<()> {
//! let dispatcher = Bifrost::builder()
//!     .backend("echo", Arc::new(Echo))
//!     .build()?;
//!
//! let request = OperationRequest::generate("hello");
//! let first = dispatcher.perform(&request).await?;
//! let second = dispatcher.perform(&request).await?;
//!
//! assert_eq!(first.backend.as_deref(), Some("echo"));
//! assert!(second.from_cache);
//! # Ok(())
//! # }
//! ```
//!
//! # Configuration from TOML
//!
//! ```rust,ignore
//! let config = bifrost::DispatcherConfig::load("bifrost.toml")?;
//! let dispatcher = bifrost::Bifrost::builder()
//!     .config(config)
//!     .backend("openai", openai)
//!     .backend("local", local)
//!     .build()?;
//! ```

pub mod accounting;
pub mod admission;
pub mod backends;
pub mod cache;
pub mod classify;
pub mod error;
pub mod gateway;
pub mod telemetry;
pub mod tokenizer;
pub mod traits;
pub mod types;

// Re-export main types at crate root
pub use error::{BackendError, BifrostError, Result};
pub use gateway::{
    BackendSettings, Bifrost, BifrostBuilder, DispatcherConfig, Dispatcher,
};
pub use traits::Backend;

pub use accounting::{Direction, PriceTable, TokenAccountant, UsageLedger};
pub use admission::{RateLimitConfig, RateStrategy};
pub use backends::{BackoffKind, RetryConfig, RoutingConfig};
pub use cache::CacheConfig;
pub use classify::{ClassifiedError, ErrorCategory};
pub use tokenizer::{TokenizerRegistry, TokenizerSource};

pub use types::{
    BackendOutput, Capabilities, DispatchResponse, DispatchStream, EventKind, FragmentStream,
    Operation, OperationRequest, StreamEvent, Usage, UsageEvent,
};
