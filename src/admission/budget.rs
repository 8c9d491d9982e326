//! Token-budget gate.

use parking_lot::Mutex;
use tokio::time::Instant;

#[derive(Debug)]
struct BudgetState {
    available: f64,
    last_refill: Instant,
}

/// Token bucket measured in model tokens.
///
/// Capacity is the configured tokens-per-minute, refilled continuously.
/// [`try_consume`](Self::try_consume) never waits: it either takes the whole
/// amount or leaves the bucket untouched.
#[derive(Debug)]
pub struct TokenBudget {
    capacity: u64,
    per_sec: f64,
    state: Mutex<BudgetState>,
}

impl TokenBudget {
    /// A full bucket holding `tokens_per_minute` tokens.
    pub fn new(tokens_per_minute: u64) -> Self {
        Self {
            capacity: tokens_per_minute,
            per_sec: tokens_per_minute as f64 / 60.0,
            state: Mutex::new(BudgetState {
                available: tokens_per_minute as f64,
                last_refill: Instant::now(),
            }),
        }
    }

    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    /// Atomically take `amount` tokens if that many are available.
    pub fn try_consume(&self, amount: u64) -> bool {
        let mut state = self.state.lock();
        self.refill(&mut state);
        let amount = amount as f64;
        if state.available >= amount {
            state.available -= amount;
            true
        } else {
            false
        }
    }

    /// Tokens currently available (rounded down).
    pub fn available(&self) -> u64 {
        let mut state = self.state.lock();
        self.refill(&mut state);
        state.available.floor() as u64
    }

    fn refill(&self, state: &mut BudgetState) {
        let now = Instant::now();
        let elapsed = now.saturating_duration_since(state.last_refill).as_secs_f64();
        state.available = (state.available + elapsed * self.per_sec).min(self.capacity as f64);
        state.last_refill = now;
    }
}
