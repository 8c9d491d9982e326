//! Dispatcher construction and execution

mod builder;
pub mod config;
mod dispatcher;
mod stream;

pub use builder::{Bifrost, BifrostBuilder};
pub use config::{
    BackendSettings, CacheSettings, DEFAULT_EVENT_CAPACITY, DEFAULT_TIMEOUT, DispatcherConfig,
    RetrySettings,
};
pub use dispatcher::Dispatcher;
