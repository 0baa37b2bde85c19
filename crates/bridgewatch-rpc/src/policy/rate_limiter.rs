//! Token bucket rate limiter.
//!
//! Tokens accrue at `refill_rate` per second up to `capacity`; each request
//! consumes one. One limiter per chain keeps every worker under its
//! provider's requests-per-second ceiling, whatever the concurrency inside a
//! range scan.

use std::sync::Mutex;
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
pub struct RateLimiterConfig {
    /// Maximum burst.
    pub capacity: f64,
    /// Tokens per second.
    pub refill_rate: f64,
}

impl RateLimiterConfig {
    /// A ceiling of `rps` requests per second with a one-second burst.
    pub fn per_second(rps: f64) -> Self {
        Self {
            capacity: rps.max(1.0),
            refill_rate: rps,
        }
    }
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self::per_second(5.0)
    }
}

struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

/// Thread-safe token bucket.
pub struct RateLimiter {
    config: RateLimiterConfig,
    state: Mutex<BucketState>,
}

impl RateLimiter {
    pub fn new(config: RateLimiterConfig) -> Self {
        Self {
            state: Mutex::new(BucketState {
                tokens: config.capacity,
                last_refill: Instant::now(),
            }),
            config,
        }
    }

    /// Take one token if available.
    pub fn try_acquire(&self) -> bool {
        let mut state = self.state.lock().unwrap();
        self.refill(&mut state);

        if state.tokens >= 1.0 {
            state.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    /// Wait until a token is available, then take it.
    pub async fn acquire(&self) {
        loop {
            if self.try_acquire() {
                return;
            }
            let wait = self.wait_time();
            tracing::trace!(wait_ms = wait.as_millis() as u64, "rate limited, waiting");
            tokio::time::sleep(wait.max(Duration::from_millis(1))).await;
        }
    }

    /// Estimated wait before the next token.
    pub fn wait_time(&self) -> Duration {
        let mut state = self.state.lock().unwrap();
        self.refill(&mut state);
        let deficit = 1.0 - state.tokens;
        if deficit <= 0.0 || self.config.refill_rate <= 0.0 {
            Duration::ZERO
        } else {
            Duration::from_secs_f64(deficit / self.config.refill_rate)
        }
    }

    fn refill(&self, state: &mut BucketState) {
        let now = Instant::now();
        let elapsed = now.duration_since(state.last_refill).as_secs_f64();
        state.tokens = (state.tokens + elapsed * self.config.refill_rate).min(self.config.capacity);
        state.last_refill = now;
    }
}
