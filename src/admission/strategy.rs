//! Request-rate gates.
//!
//! A gate answers one question (how long until the next release is allowed)
//! and is told when a release happens. All three strategies share that
//! shape, so the limiter's queue logic does not care which one is active.

use std::time::Duration;

use tokio::time::Instant;

use super::config::{RateLimitConfig, RateStrategy};

const WINDOW: Duration = Duration::from_secs(60);

/// Floating-point slack when comparing refilled bucket levels.
const EPSILON: f64 = 1e-9;

#[derive(Debug)]
pub(crate) enum RateGate {
    SlidingWindow {
        spacing: Duration,
        last: Option<Instant>,
    },
    FixedWindow {
        capacity: u32,
        remaining: u32,
        window_start: Instant,
    },
    TokenBucket {
        capacity: f64,
        tokens: f64,
        per_sec: f64,
        last_refill: Instant,
    },
}

impl RateGate {
    pub(crate) fn new(config: &RateLimitConfig, now: Instant) -> Self {
        let rpm = config.requests_per_minute.max(1);
        match config.strategy {
            RateStrategy::SlidingWindow => RateGate::SlidingWindow {
                spacing: WINDOW / rpm,
                last: None,
            },
            RateStrategy::FixedWindow => RateGate::FixedWindow {
                capacity: rpm,
                remaining: rpm,
                window_start: now,
            },
            RateStrategy::TokenBucket => RateGate::TokenBucket {
                capacity: f64::from(rpm),
                tokens: f64::from(rpm),
                per_sec: f64::from(rpm) / 60.0,
                last_refill: now,
            },
        }
    }

    /// Time until a release is permitted; zero means now.
    pub(crate) fn wait_time(&mut self, now: Instant) -> Duration {
        match self {
            RateGate::SlidingWindow { spacing, last } => match last {
                Some(last) => (*last + *spacing).saturating_duration_since(now),
                None => Duration::ZERO,
            },
            RateGate::FixedWindow {
                capacity,
                remaining,
                window_start,
            } => {
                let elapsed = now.saturating_duration_since(*window_start);
                if elapsed >= WINDOW {
                    let windows = (elapsed.as_nanos() / WINDOW.as_nanos()) as u32;
                    *window_start += WINDOW * windows;
                    *remaining = *capacity;
                }
                if *remaining > 0 {
                    Duration::ZERO
                } else {
                    (*window_start + WINDOW).saturating_duration_since(now)
                }
            }
            RateGate::TokenBucket {
                capacity,
                tokens,
                per_sec,
                last_refill,
            } => {
                let elapsed = now.saturating_duration_since(*last_refill).as_secs_f64();
                *tokens = (*tokens + elapsed * *per_sec).min(*capacity);
                *last_refill = now;
                if *tokens >= 1.0 - EPSILON {
                    Duration::ZERO
                } else {
                    Duration::from_secs_f64((1.0 - *tokens) / *per_sec)
                }
            }
        }
    }

    /// Record a release at `now`.
    pub(crate) fn commit(&mut self, now: Instant) {
        match self {
            RateGate::SlidingWindow { last, .. } => *last = Some(now),
            RateGate::FixedWindow { remaining, .. } => *remaining = remaining.saturating_sub(1),
            RateGate::TokenBucket { tokens, .. } => *tokens = (*tokens - 1.0).max(0.0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gate(strategy: RateStrategy, rpm: u32, now: Instant) -> RateGate {
        RateGate::new(
            &RateLimitConfig::new()
                .strategy(strategy)
                .requests_per_minute(rpm),
            now,
        )
    }

    #[test]
    fn sliding_window_spaces_releases() {
        let t0 = Instant::now();
        let mut g = gate(RateStrategy::SlidingWindow, 6, t0);
        assert_eq!(g.wait_time(t0), Duration::ZERO);
        g.commit(t0);
        assert_eq!(g.wait_time(t0), Duration::from_secs(10));
        assert_eq!(
            g.wait_time(t0 + Duration::from_secs(4)),
            Duration::from_secs(6)
        );
        assert_eq!(g.wait_time(t0 + Duration::from_secs(10)), Duration::ZERO);
    }

    #[test]
    fn fixed_window_refills_at_boundary() {
        let t0 = Instant::now();
        let mut g = gate(RateStrategy::FixedWindow, 2, t0);
        g.commit(t0);
        g.commit(t0);
        assert_eq!(
            g.wait_time(t0 + Duration::from_secs(15)),
            Duration::from_secs(45)
        );
        assert_eq!(g.wait_time(t0 + Duration::from_secs(60)), Duration::ZERO);
    }

    #[test]
    fn token_bucket_refills_continuously() {
        let t0 = Instant::now();
        let mut g = gate(RateStrategy::TokenBucket, 60, t0);
        for _ in 0..60 {
            assert_eq!(g.wait_time(t0), Duration::ZERO);
            g.commit(t0);
        }
        let wait = g.wait_time(t0);
        assert!(wait > Duration::from_millis(990) && wait <= Duration::from_secs(1));
        assert_eq!(
            g.wait_time(t0 + Duration::from_millis(500)),
            Duration::from_millis(500)
        );
    }
}
