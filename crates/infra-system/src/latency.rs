// Stage latency model: fixed base plus bounded uniform jitter
use rand::Rng;
use std::time::Duration;

/// Extraction cost of the reference deployment: 5s + [0, 2s)
pub const DEFAULT_EXTRACT_BASE: Duration = Duration::from_millis(5000);
pub const DEFAULT_EXTRACT_JITTER: Duration = Duration::from_millis(2000);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LatencyModel {
    pub base: Duration,
    pub jitter: Duration,
}

impl LatencyModel {
    pub fn new(base: Duration, jitter: Duration) -> Self {
        Self { base, jitter }
    }

    /// No artificial delay
    pub fn none() -> Self {
        Self::new(Duration::ZERO, Duration::ZERO)
    }

    pub fn fixed(base: Duration) -> Self {
        Self::new(base, Duration::ZERO)
    }

    pub fn extract_default() -> Self {
        Self::new(DEFAULT_EXTRACT_BASE, DEFAULT_EXTRACT_JITTER)
    }

    /// Draw one latency in `[base, base + jitter)`
    pub fn sample(&self) -> Duration {
        if self.jitter.is_zero() {
            return self.base;
        }
        let jitter_ns = rand::thread_rng().gen_range(0..self.jitter.as_nanos() as u64);
        self.base + Duration::from_nanos(jitter_ns)
    }

    /// Sleep for one sampled latency
    pub async fn wait(&self) -> Duration {
        let latency = self.sample();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        latency
    }
}
