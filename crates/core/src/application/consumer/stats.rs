// Consumer counters
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Counters owned by one consumer
#[derive(Debug, Default)]
pub struct ConsumerStats {
    delivered: AtomicU64,
    throttled: AtomicU64,
    acked: AtomicU64,
    requeued: AtomicU64,
    dead_lettered: AtomicU64,
    in_flight: AtomicU64,
    peak_in_flight: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsumerStatsSnapshot {
    pub delivered: u64,
    pub throttled: u64,
    pub acked: u64,
    pub requeued: u64,
    pub dead_lettered: u64,
    pub in_flight: u64,
    pub peak_in_flight: u64,
}

impl ConsumerStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_delivered(&self) {
        self.delivered.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns the throttled total including this one
    pub(crate) fn record_throttled(&self) -> u64 {
        self.throttled.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub(crate) fn record_acked(&self) {
        self.acked.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_requeued(&self) {
        self.requeued.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_dead_lettered(&self) {
        self.dead_lettered.fetch_add(1, Ordering::Relaxed);
    }

    /// Mark a pipeline execution as started; it ends when the guard drops
    pub(crate) fn start_job(&self) -> InFlightGuard<'_> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(now, Ordering::SeqCst);
        InFlightGuard { stats: self }
    }

    pub fn in_flight(&self) -> u64 {
        self.in_flight.load(Ordering::SeqCst)
    }

    pub fn snapshot(&self) -> ConsumerStatsSnapshot {
        ConsumerStatsSnapshot {
            delivered: self.delivered.load(Ordering::Relaxed),
            throttled: self.throttled.load(Ordering::Relaxed),
            acked: self.acked.load(Ordering::Relaxed),
            requeued: self.requeued.load(Ordering::Relaxed),
            dead_lettered: self.dead_lettered.load(Ordering::Relaxed),
            in_flight: self.in_flight.load(Ordering::SeqCst),
            peak_in_flight: self.peak_in_flight.load(Ordering::SeqCst),
        }
    }
}

pub(crate) struct InFlightGuard<'a> {
    stats: &'a ConsumerStats,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.stats.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_peak_tracks_maximum_concurrency() {
        let stats = ConsumerStats::new();
        {
            let _a = stats.start_job();
            let _b = stats.start_job();
            assert_eq!(stats.in_flight(), 2);
        }
        let _c = stats.start_job();

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.in_flight, 1);
        assert_eq!(snapshot.peak_in_flight, 2);
    }
}
