//! Token and cost accounting.
//!
//! - [`TokenAccountant`]: token counts, cost estimates, truncation, chunking
//! - [`PriceTable`]: per-model prices (USD per million tokens)
//! - [`UsageLedger`]: running per-backend and per-model counters

mod accountant;
mod chunk;
mod ledger;
mod pricing;

pub use accountant::{TRUNCATION_MARKER, TokenAccountant};
pub use ledger::{UsageCounters, UsageLedger};
pub use pricing::{Direction, ModelPrice, PriceTable};
