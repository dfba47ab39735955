//! Token Bucket (admission controller)
//!
//! Gates how many jobs a consumer may start per unit of time, independent of
//! queue depth. `consume` is a non-blocking test; tokens come back only
//! through `refill`, which a background timer calls on a fixed period.

use crate::application::consumer::ShutdownToken;
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info};

/// Mutable bucket state, only touched under the bucket's lock
#[derive(Debug, Clone)]
pub struct TokenBucketState {
    pub tokens: f64,
    pub capacity: f64,
    pub refill_rate: f64, // tokens per second
    pub last_refill: Instant,
}

/// Point-in-time view for stats
#[derive(Debug, Clone, Copy, Serialize)]
pub struct TokenBucketSnapshot {
    pub tokens: f64,
    pub capacity: f64,
    pub refill_rate: f64,
}

/// Token bucket shared by every job a consumer dispatches.
///
/// Refill and consume are serialized through one mutex.
pub struct TokenBucket {
    state: Mutex<TokenBucketState>,
}

impl TokenBucket {
    /// Create a bucket starting at full capacity
    ///
    /// # Arguments
    /// * `refill_rate` - Tokens added per second
    /// * `capacity` - Maximum burst size
    ///
    /// # Example
    /// 10 jobs/sec steady state with bursts of 20:
    /// `TokenBucket::new(10.0, 20.0)`
    pub fn new(refill_rate: f64, capacity: f64) -> Self {
        Self::starting_at(refill_rate, capacity, Instant::now())
    }

    /// Create a bucket whose refill clock starts at `now` (for tests).
    /// Negative values are clamped to 0.0.
    pub fn starting_at(refill_rate: f64, capacity: f64, now: Instant) -> Self {
        let capacity = capacity.max(0.0);
        Self {
            state: Mutex::new(TokenBucketState {
                tokens: capacity,
                capacity,
                refill_rate: refill_rate.max(0.0),
                last_refill: now,
            }),
        }
    }

    /// Take one token if available.
    ///
    /// Returns true and deducts a token when at least one is available,
    /// false without deduction otherwise. Never waits.
    pub fn consume(&self) -> bool {
        let mut state = self.state.lock();
        if state.tokens >= 1.0 {
            state.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    /// Refill based on time elapsed since the previous refill
    pub fn refill(&self) {
        self.refill_at(Instant::now());
    }

    /// Refill as of `now`: `tokens = min(capacity, tokens + rate * elapsed)`
    pub fn refill_at(&self, now: Instant) {
        let mut state = self.state.lock();
        let elapsed = now.saturating_duration_since(state.last_refill).as_secs_f64();
        if elapsed > 0.0 {
            state.tokens = (state.tokens + state.refill_rate * elapsed).min(state.capacity);
            state.last_refill = now;
        }
    }

    /// Current token count
    pub fn tokens(&self) -> f64 {
        self.state.lock().tokens
    }

    pub fn snapshot(&self) -> TokenBucketSnapshot {
        let state = self.state.lock();
        TokenBucketSnapshot {
            tokens: state.tokens,
            capacity: state.capacity,
            refill_rate: state.refill_rate,
        }
    }

    /// Spawn the periodic refill timer.
    ///
    /// The first refill happens one `period` after spawning. The task exits
    /// when `shutdown` fires.
    pub fn spawn_refill(self: &Arc<Self>, period: Duration, mut shutdown: ShutdownToken) -> JoinHandle<()> {
        let bucket = Arc::clone(self);
        tokio::spawn(async move {
            info!(period_ms = period.as_millis() as u64, "Token bucket refill timer started");
            let mut tick = interval_at(Instant::now() + period, period);
            tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                if shutdown.is_shutdown() {
                    break;
                }
                tokio::select! {
                    _ = tick.tick() => {
                        bucket.refill();
                        debug!(tokens = bucket.tokens(), "Token bucket refilled");
                    }
                    _ = shutdown.wait() => break,
                }
            }
            info!("Token bucket refill timer stopped");
        })
    }
}
