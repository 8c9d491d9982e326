//! Per-backend admission queue.
//!
//! Waiters sit in a priority heap (highest priority first, FIFO within a
//! priority). A single pump task per limiter takes a concurrency permit,
//! waits until the rate gate allows a release, and hands the permit to the
//! head waiter through a oneshot channel. The pump exits when the queue
//! drains and is respawned by the next arrival.
//!
//! A waiter whose receiver was dropped (the caller's future was cancelled)
//! is skipped without consuming a rate slot.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{OwnedSemaphorePermit, Semaphore, oneshot};
use tokio::time::Instant;

use super::budget::TokenBudget;
use super::config::RateLimitConfig;
use super::strategy::RateGate;
use crate::error::BackendError;

struct Waiter {
    priority: i32,
    seq: u64,
    tx: oneshot::Sender<OwnedSemaphorePermit>,
}

impl PartialEq for Waiter {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.seq == other.seq
    }
}

impl Eq for Waiter {}

impl PartialOrd for Waiter {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Waiter {
    // Max-heap: higher priority wins, then the earlier submission.
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

enum Release {
    Idle,
    Wait(Duration),
    Ready(Waiter),
}

struct LimiterState {
    gate: RateGate,
    queue: BinaryHeap<Waiter>,
    next_seq: u64,
    pumping: bool,
}

impl LimiterState {
    fn next_release(&mut self, now: Instant) -> Release {
        while self.queue.peek().is_some_and(|w| w.tx.is_closed()) {
            self.queue.pop();
        }
        if self.queue.is_empty() {
            return Release::Idle;
        }
        let wait = self.gate.wait_time(now);
        if !wait.is_zero() {
            return Release::Wait(wait);
        }
        match self.queue.pop() {
            Some(waiter) => {
                self.gate.commit(now);
                Release::Ready(waiter)
            }
            None => Release::Idle,
        }
    }
}

/// Observable state of one backend's limiter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdmissionSnapshot {
    pub backend: String,
    pub config: RateLimitConfig,
    pub queued: usize,
    pub in_flight: usize,
    pub available_budget: Option<u64>,
}

pub(crate) struct BackendLimiter {
    backend: String,
    config: RateLimitConfig,
    state: Mutex<LimiterState>,
    permits: Arc<Semaphore>,
    budget: Option<TokenBudget>,
}

impl BackendLimiter {
    pub(crate) fn new(backend: impl Into<String>, config: RateLimitConfig) -> Self {
        let now = Instant::now();
        Self {
            backend: backend.into(),
            state: Mutex::new(LimiterState {
                gate: RateGate::new(&config, now),
                queue: BinaryHeap::new(),
                next_seq: 0,
                pumping: false,
            }),
            permits: Arc::new(Semaphore::new(config.max_concurrent)),
            budget: config.tokens_per_minute.map(TokenBudget::new),
            config,
        }
    }

    /// Wait for admission. The returned permit holds a concurrency slot
    /// until dropped.
    pub(crate) async fn acquire(
        self: &Arc<Self>,
        priority: i32,
    ) -> Result<OwnedSemaphorePermit, BackendError> {
        let (tx, rx) = oneshot::channel();
        let spawn_pump = {
            let mut state = self.state.lock();
            let seq = state.next_seq;
            state.next_seq += 1;
            state.queue.push(Waiter { priority, seq, tx });
            !std::mem::replace(&mut state.pumping, true)
        };
        if spawn_pump {
            tokio::spawn(Arc::clone(self).pump());
        }
        rx.await.map_err(|_| BackendError::AdmissionClosed)
    }

    pub(crate) fn try_consume_budget(&self, amount: u64) -> bool {
        self.budget
            .as_ref()
            .is_none_or(|budget| budget.try_consume(amount))
    }

    pub(crate) fn snapshot(&self) -> AdmissionSnapshot {
        let queued = self.state.lock().queue.len();
        AdmissionSnapshot {
            backend: self.backend.clone(),
            config: self.config.clone(),
            queued,
            in_flight: self.config.max_concurrent - self.permits.available_permits(),
            available_budget: self.budget.as_ref().map(TokenBudget::available),
        }
    }

    async fn pump(self: Arc<Self>) {
        loop {
            let Ok(mut permit) = Arc::clone(&self.permits).acquire_owned().await else {
                self.state.lock().pumping = false;
                return;
            };
            loop {
                let wait = {
                    let mut state = self.state.lock();
                    match state.next_release(Instant::now()) {
                        Release::Idle => {
                            state.pumping = false;
                            return;
                        }
                        Release::Wait(wait) => wait,
                        Release::Ready(waiter) => match waiter.tx.send(permit) {
                            Ok(()) => break,
                            // Cancelled between the check and the send.
                            Err(returned) => {
                                permit = returned;
                                continue;
                            }
                        },
                    }
                };
                tokio::time::sleep(wait).await;
            }
        }
    }
}
