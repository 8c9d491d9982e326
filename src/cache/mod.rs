//! Caching subsystem.
//!
//! - [`cache_key`]: deterministic, namespaced key derivation over
//!   (operation, arguments, options).
//! - [`ResponseCache`]: bounded LRU + sliding-TTL store used by the
//!   dispatcher for cacheable, non-streaming operations.

mod key;
pub mod response;

pub use key::{cache_key, canonical_json};
pub use response::{CacheConfig, CacheEntryInfo, CacheStats, ResponseCache};
