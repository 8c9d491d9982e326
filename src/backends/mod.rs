//! Backend plumbing: registry, routing, retry, and stream backpressure.

pub mod backpressure;
pub mod registry;
pub mod retry;
pub mod routing;

pub use backpressure::{DEFAULT_STREAM_BUFFER, bounded_stream};
pub use registry::BackendRegistry;
pub use retry::{
    BackoffKind, OnRetry, RetryConfig, RetryContext, RetryController, RetryHooks, RetryState,
};
pub use routing::RoutingConfig;
