// Consumer and broker constants (no magic values)
use std::time::Duration;

/// How long a dispatch loop sleeps on an empty queue before polling again (100ms).
/// Publishes wake it earlier.
pub const IDLE_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Sleep after a store error before the dispatch loop retries (1s)
pub const ERROR_RECOVERY_SLEEP_DURATION: Duration = Duration::from_secs(1);

/// Default prefetch: unacknowledged deliveries per subscription
pub const DEFAULT_PREFETCH: usize = 5;

/// Default token bucket: 10 jobs/sec, bursts of 20, refilled every second
pub const DEFAULT_REFILL_RATE: f64 = 10.0;
pub const DEFAULT_BUCKET_CAPACITY: f64 = 20.0;
pub const DEFAULT_REFILL_PERIOD: Duration = Duration::from_millis(1000);

/// While the bucket stays empty, log one throttle summary per this many releases
pub const THROTTLE_LOG_EVERY: u64 = 1000;

/// How long shutdown waits for in-flight jobs before abandoning them (10s)
pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

/// Default queue name shared by producer and consumer
pub const DEFAULT_QUEUE_NAME: &str = "queue-based-load-leveling";
