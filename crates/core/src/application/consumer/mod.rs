// Consumer - Delivery execution loop

pub mod constants;
mod panic_guard;
mod shutdown;
mod stats;

use constants::*;
pub use panic_guard::panic_message;
pub use shutdown::{shutdown_channel, ShutdownSender, ShutdownToken};
pub use stats::{ConsumerStats, ConsumerStatsSnapshot};

use crate::application::broker::Broker;
use crate::application::pipeline::{Pipeline, PipelineResult};
use crate::application::redelivery::{RedeliveryDecision, RedeliveryPolicy};
use crate::application::token_bucket::TokenBucket;
use crate::domain::{Delivery, Job, JobMessage, PublishOptions};
use crate::error::Result;
use crate::port::StageError;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::{JoinError, JoinHandle, JoinSet};
use tokio::time::timeout;
use tracing::{debug, error, info, trace, warn};

/// Consumer settings
#[derive(Debug, Clone)]
pub struct ConsumerConfig {
    pub queue: String,
    /// Maximum unsettled deliveries, and so maximum concurrent pipelines
    pub prefetch: usize,
    /// Abort and requeue a pipeline run that takes longer than this
    pub job_timeout: Option<Duration>,
    pub redelivery: RedeliveryPolicy,
    /// How long shutdown waits for in-flight jobs
    pub shutdown_grace: Duration,
}

impl ConsumerConfig {
    pub fn new(queue: impl Into<String>) -> Self {
        Self {
            queue: queue.into(),
            prefetch: DEFAULT_PREFETCH,
            job_timeout: None,
            redelivery: RedeliveryPolicy::Unlimited,
            shutdown_grace: DEFAULT_SHUTDOWN_GRACE,
        }
    }

    pub fn with_prefetch(mut self, prefetch: usize) -> Self {
        self.prefetch = prefetch;
        self
    }

    pub fn with_job_timeout(mut self, job_timeout: Duration) -> Self {
        self.job_timeout = Some(job_timeout);
        self
    }

    pub fn with_redelivery(mut self, redelivery: RedeliveryPolicy) -> Self {
        self.redelivery = redelivery;
        self
    }

    pub fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }
}

/// How a delivery was settled
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// Bucket empty: released back to the queue without running
    Throttled,
    /// Pipeline succeeded and the message was acked
    Acked { output_ref: PathBuf },
    /// Pipeline failed and the message was nacked with requeue
    Requeued { error: StageError },
    /// Redelivery cap reached: moved to the dead-letter queue
    DeadLettered { queue: String },
}

/// Consumer: takes deliveries from one subscription, gates them through the
/// token bucket and runs admitted jobs through the pipeline.
///
/// Per delivery: `Delivered -> AdmissionCheck -> {Throttled | Processing}
/// -> {Acked | Requeued}`. Nothing a stage does can crash the loop.
#[derive(Clone)]
pub struct Consumer {
    broker: Broker,
    bucket: Arc<TokenBucket>,
    pipeline: Arc<Pipeline>,
    config: ConsumerConfig,
    stats: Arc<ConsumerStats>,
}

impl Consumer {
    pub fn new(
        broker: Broker,
        bucket: Arc<TokenBucket>,
        pipeline: Arc<Pipeline>,
        config: ConsumerConfig,
    ) -> Self {
        Self {
            broker,
            bucket,
            pipeline,
            config,
            stats: Arc::new(ConsumerStats::new()),
        }
    }

    pub fn stats(&self) -> Arc<ConsumerStats> {
        Arc::clone(&self.stats)
    }

    pub fn config(&self) -> &ConsumerConfig {
        &self.config
    }

    /// Run the consumer loop until shutdown
    pub async fn run(&self, mut shutdown: ShutdownToken) -> Result<()> {
        let mut subscription = self
            .broker
            .subscribe(&self.config.queue, self.config.prefetch)
            .await?;
        let mut jobs: JoinSet<Result<DeliveryOutcome>> = JoinSet::new();

        info!(
            queue = %self.config.queue,
            prefetch = self.config.prefetch,
            redelivery = ?self.config.redelivery,
            "Consumer started"
        );

        loop {
            if shutdown.is_shutdown() {
                break;
            }
            tokio::select! {
                next = subscription.next() => match next {
                    Some(delivery) => {
                        let consumer = self.clone();
                        jobs.spawn(async move { consumer.handle_delivery(delivery).await });
                    }
                    None => {
                        warn!(queue = %self.config.queue, "Subscription ended");
                        break;
                    }
                },
                Some(joined) = jobs.join_next(), if !jobs.is_empty() => {
                    log_joined(joined);
                }
                _ = shutdown.wait() => {
                    info!(queue = %self.config.queue, "Consumer shutting down");
                    break;
                }
            }
        }

        // Buffered deliveries never started; hand them back uncounted.
        // Release failures are logged there and must not skip the drain.
        subscription.close().await;

        let in_flight = jobs.len();
        if in_flight > 0 {
            info!(in_flight, grace_ms = self.config.shutdown_grace.as_millis() as u64, "Waiting for in-flight jobs");
        }
        let drained = timeout(self.config.shutdown_grace, async {
            while let Some(joined) = jobs.join_next().await {
                log_joined(joined);
            }
        })
        .await;
        if drained.is_err() {
            // Their messages stay unacked until startup recovery
            warn!(abandoned = jobs.len(), "Shutdown grace expired, abandoning jobs");
            jobs.abort_all();
        }

        let snapshot = self.stats.snapshot();
        info!(
            queue = %self.config.queue,
            delivered = snapshot.delivered,
            acked = snapshot.acked,
            requeued = snapshot.requeued,
            throttled = snapshot.throttled,
            dead_lettered = snapshot.dead_lettered,
            peak_in_flight = snapshot.peak_in_flight,
            "Consumer stopped"
        );
        Ok(())
    }

    /// Settle one delivery
    pub async fn handle_delivery(&self, delivery: Delivery) -> Result<DeliveryOutcome> {
        self.stats.record_delivered();

        if let RedeliveryDecision::DeadLetter { queue } =
            self.config.redelivery.decide(delivery.delivery_count)
        {
            return self.dead_letter(&delivery, queue).await;
        }

        if !self.bucket.consume() {
            let throttled = self.stats.record_throttled();
            self.broker.release(&delivery).await?;
            trace!(
                job_id = %delivery.job.id,
                delivery_tag = %delivery.tag,
                "Rate limited, releasing job"
            );
            if throttle_log_due(throttled) {
                debug!(
                    queue = %self.config.queue,
                    throttled,
                    tokens = self.bucket.tokens(),
                    "Admission throttled, jobs stay queued"
                );
            }
            return Ok(DeliveryOutcome::Throttled);
        }

        info!(
            job_id = %delivery.job.id,
            delivery_tag = %delivery.tag,
            redelivered = delivery.redelivered,
            attempt = delivery.delivery_count,
            "Processing job"
        );

        let result = {
            let _running = self.stats.start_job();
            self.execute(&delivery.job).await
        };

        match result {
            Ok(result) => {
                self.broker.ack(&delivery).await?;
                self.stats.record_acked();
                info!(
                    job_id = %delivery.job.id,
                    output = %result.output_ref.display(),
                    "Job completed"
                );
                Ok(DeliveryOutcome::Acked {
                    output_ref: result.output_ref,
                })
            }
            Err(e) => {
                warn!(
                    job_id = %delivery.job.id,
                    attempt = delivery.delivery_count,
                    error = %e,
                    "Job failed, requeueing"
                );
                self.broker.nack(&delivery, true).await?;
                self.stats.record_requeued();
                Ok(DeliveryOutcome::Requeued { error: e })
            }
        }
    }

    /// Run the pipeline in its own task so a panicking stage cannot take the
    /// consumer down. The task is aborted if this future is dropped.
    async fn execute(&self, job: &Job) -> std::result::Result<PipelineResult, StageError> {
        let pipeline = Arc::clone(&self.pipeline);
        let job = job.clone();
        let mut task = AbortOnDrop(tokio::spawn(async move { pipeline.run(&job).await }));

        let joined = match self.config.job_timeout {
            Some(limit) => match timeout(limit, &mut task.0).await {
                Ok(joined) => joined,
                Err(_) => return Err(StageError::Timeout(limit)),
            },
            None => (&mut task.0).await,
        };

        joined.unwrap_or_else(|e| Err(stage_error_from_join(e)))
    }

    async fn dead_letter(&self, delivery: &Delivery, queue: String) -> Result<DeliveryOutcome> {
        let message = JobMessage::from_job(&delivery.job);
        if let Err(e) = self
            .broker
            .publish(&queue, &message, PublishOptions::persistent(delivery.job.priority))
            .await
        {
            error!(
                job_id = %delivery.job.id,
                dead_letter_queue = %queue,
                error = %e,
                "Dead-letter publish failed, requeueing"
            );
            self.broker.nack(delivery, true).await?;
            self.stats.record_requeued();
            return Err(e);
        }

        self.broker.ack(delivery).await?;
        self.stats.record_dead_lettered();
        warn!(
            job_id = %delivery.job.id,
            dead_letter_queue = %queue,
            attempts = delivery.delivery_count.saturating_sub(1),
            "Job dead-lettered"
        );
        Ok(DeliveryOutcome::DeadLettered { queue })
    }
}

/// Pipeline task handle that aborts the task when dropped
struct AbortOnDrop<T>(JoinHandle<T>);

impl<T> Drop for AbortOnDrop<T> {
    fn drop(&mut self) {
        self.0.abort();
    }
}

fn throttle_log_due(throttled: u64) -> bool {
    throttled == 1 || throttled % THROTTLE_LOG_EVERY == 0
}

fn stage_error_from_join(e: JoinError) -> StageError {
    if e.is_panic() {
        let message = panic_message(e.into_panic());
        error!(panic_msg = %message, "Pipeline task panicked");
        StageError::Panicked(message)
    } else {
        StageError::Panicked("pipeline task cancelled".to_string())
    }
}

fn log_joined(joined: std::result::Result<Result<DeliveryOutcome>, JoinError>) {
    match joined {
        Ok(Ok(_)) => {}
        Ok(Err(e)) => error!(error = %e, "Failed to settle delivery"),
        Err(e) => error!(error = %e, "Delivery task ended abnormally"),
    }
}
