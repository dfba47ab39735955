// Startup recovery
use crate::error::Result;
use crate::port::{QueueStore, RecoveryReport};
use std::sync::Arc;
use tracing::info;

/// Crash recovery service
///
/// Runs once on daemon startup, before any subscription exists. Messages a
/// crashed consumer left unacked go back to the ready state (marked
/// redelivered); non-persistent messages are dropped.
pub struct RecoveryService {
    store: Arc<dyn QueueStore>,
}

impl RecoveryService {
    pub fn new(store: Arc<dyn QueueStore>) -> Self {
        Self { store }
    }

    /// Recover one declared queue
    pub async fn recover_queue(&self, queue: &str) -> Result<RecoveryReport> {
        let report = self.store.recover(queue).await?;
        info!(
            queue = %queue,
            requeued = report.requeued,
            dropped_transient = report.dropped_transient,
            "Queue recovered"
        );
        Ok(report)
    }

    /// Recover several queues and sum the reports
    pub async fn recover_queues(&self, queues: &[&str]) -> Result<RecoveryReport> {
        let mut total = RecoveryReport::default();
        for queue in queues {
            let report = self.recover_queue(queue).await?;
            total.requeued += report.requeued;
            total.dropped_transient += report.dropped_transient;
        }
        Ok(total)
    }
}
