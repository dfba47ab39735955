// Producer - batched, priority-tagged publishing (load generator)

use crate::application::broker::Broker;
use crate::domain::{Job, JobId, JobMessage, Priority, PublishOptions};
use crate::error::{AppError, Result};
use crate::port::{IdProvider, TimeProvider};
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{info, warn};

/// Batch sizes to pick from, one pick per submit request
pub const DEFAULT_BATCH_SIZES: [usize; 5] = [5, 1, 2, 10, 20];

/// Pause after each batch
pub const DEFAULT_BATCH_DELAY: Duration = Duration::from_millis(100);

/// Files accepted in a single submit request
pub const MAX_FILES_PER_REQUEST: usize = 1000;

/// Per-file upload size limit (5 MiB)
pub const MAX_FILE_BYTES: u64 = 5 * 1024 * 1024;

/// A file already stored on disk, ready to be queued
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadedFile {
    pub path: PathBuf,
    pub filename: String,
    pub size_bytes: u64,
}

/// Delay between batches
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DelayModel {
    Fixed(Duration),
    /// Uniform in `[min, max]`
    Uniform { min: Duration, max: Duration },
}

#[derive(Debug, Clone)]
pub struct BatchConfig {
    pub queue: String,
    pub candidate_sizes: Vec<usize>,
    pub delay: DelayModel,
    pub max_files: usize,
    pub max_file_bytes: u64,
}

impl BatchConfig {
    pub fn new(queue: impl Into<String>) -> Self {
        Self {
            queue: queue.into(),
            candidate_sizes: DEFAULT_BATCH_SIZES.to_vec(),
            delay: DelayModel::Fixed(DEFAULT_BATCH_DELAY),
            max_files: MAX_FILES_PER_REQUEST,
            max_file_bytes: MAX_FILE_BYTES,
        }
    }

    pub fn with_sizes(mut self, sizes: Vec<usize>) -> Self {
        self.candidate_sizes = sizes;
        self
    }

    pub fn with_delay(mut self, delay: DelayModel) -> Self {
        self.delay = delay;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.candidate_sizes.is_empty() || self.candidate_sizes.contains(&0) {
            return Err(AppError::Config(
                "batch sizes must be non-empty and positive".to_string(),
            ));
        }
        if let DelayModel::Uniform { min, max } = self.delay {
            if min > max {
                return Err(AppError::Config("batch delay min exceeds max".to_string()));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueuedFile {
    pub job_id: JobId,
    pub filename: String,
    pub priority: Priority,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RejectedFile {
    pub filename: String,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitReport {
    pub batch_size: usize,
    pub queued: Vec<QueuedFile>,
    pub rejected: Vec<RejectedFile>,
}

impl SubmitReport {
    pub fn message(&self) -> String {
        format!("{} files queued for processing", self.queued.len())
    }
}

/// Publishes uploaded files in randomly sized batches
pub struct Batcher {
    broker: Broker,
    config: BatchConfig,
    rng: Mutex<StdRng>,
    id_provider: Arc<dyn IdProvider>,
    time_provider: Arc<dyn TimeProvider>,
}

impl Batcher {
    pub fn new(
        broker: Broker,
        config: BatchConfig,
        id_provider: Arc<dyn IdProvider>,
        time_provider: Arc<dyn TimeProvider>,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            broker,
            config,
            rng: Mutex::new(StdRng::from_entropy()),
            id_provider,
            time_provider,
        })
    }

    /// Reproducible batch sizes and delays
    pub fn with_seed(self, seed: u64) -> Self {
        *self.rng.lock() = StdRng::seed_from_u64(seed);
        self
    }

    pub fn config(&self) -> &BatchConfig {
        &self.config
    }

    pub fn pick_batch_size(&self) -> usize {
        let sizes = &self.config.candidate_sizes;
        sizes[self.rng.lock().gen_range(0..sizes.len())]
    }

    pub fn next_delay(&self) -> Duration {
        match self.config.delay {
            DelayModel::Fixed(delay) => delay,
            DelayModel::Uniform { min, max } => {
                let ms = self
                    .rng
                    .lock()
                    .gen_range(min.as_millis() as u64..=max.as_millis() as u64);
                Duration::from_millis(ms)
            }
        }
    }

    /// Publish a single file right away
    pub async fn submit_one(&self, file: UploadedFile) -> Result<QueuedFile> {
        self.check_size(&file)?;
        self.publish(&file).await
    }

    /// Publish a request's files in batches of one randomly chosen size,
    /// pausing after every batch.
    ///
    /// Files over the size limit and files the queue refused because it was
    /// full are reported as rejected; other broker errors abort the request.
    pub async fn submit(&self, files: Vec<UploadedFile>) -> Result<SubmitReport> {
        if files.is_empty() {
            return Err(AppError::Validation("No files uploaded".to_string()));
        }
        if files.len() > self.config.max_files {
            return Err(AppError::Validation(format!(
                "Too many files: {} (max {})",
                files.len(),
                self.config.max_files
            )));
        }

        let batch_size = self.pick_batch_size();
        let mut report = SubmitReport {
            batch_size,
            queued: Vec::with_capacity(files.len()),
            rejected: Vec::new(),
        };

        for batch in files.chunks(batch_size) {
            for file in batch {
                if let Err(e) = self.check_size(file) {
                    report.rejected.push(RejectedFile {
                        filename: file.filename.clone(),
                        reason: e.to_string(),
                    });
                    continue;
                }

                match self.publish(file).await {
                    Ok(queued) => report.queued.push(queued),
                    Err(e) if e.is_retryable_publish() => {
                        warn!(filename = %file.filename, error = %e, "Publish rejected");
                        report.rejected.push(RejectedFile {
                            filename: file.filename.clone(),
                            reason: e.to_string(),
                        });
                    }
                    Err(e) => return Err(e),
                }
            }
            sleep(self.next_delay()).await;
        }

        info!(
            queue = %self.config.queue,
            batch_size,
            queued = report.queued.len(),
            rejected = report.rejected.len(),
            "Upload batch submitted"
        );
        Ok(report)
    }

    fn check_size(&self, file: &UploadedFile) -> Result<()> {
        if file.size_bytes > self.config.max_file_bytes {
            return Err(AppError::Validation(format!(
                "{} is {} bytes, limit is {}",
                file.filename, file.size_bytes, self.config.max_file_bytes
            )));
        }
        Ok(())
    }

    async fn publish(&self, file: &UploadedFile) -> Result<QueuedFile> {
        let priority = Priority::for_size(file.size_bytes);
        let job = Job::new(
            self.id_provider.generate_id(),
            self.time_provider.now_millis(),
            file.path.clone(),
            file.filename.clone(),
            priority,
        );

        self.broker
            .publish(
                &self.config.queue,
                &JobMessage::from_job(&job),
                PublishOptions::persistent(priority),
            )
            .await?;

        Ok(QueuedFile {
            job_id: job.id,
            filename: job.display_name,
            priority,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::QueueConfig;
    use crate::port::id_provider::SequentialIdProvider;
    use crate::port::queue_store::memory::InMemoryQueueStore;
    use crate::port::time_provider::ManualTimeProvider;
    use tokio::time::Instant;

    const Q: &str = "uploads";

    async fn batcher(config: BatchConfig, max_length: usize) -> (Batcher, Broker) {
        let time = Arc::new(ManualTimeProvider::new(1_000));
        let broker = Broker::new(Arc::new(InMemoryQueueStore::new()), time.clone());
        broker
            .assert_queue(&QueueConfig::new(Q).with_max_length(max_length))
            .await
            .unwrap();
        let batcher = Batcher::new(
            broker.clone(),
            config,
            Arc::new(SequentialIdProvider::new("job")),
            time,
        )
        .unwrap();
        (batcher, broker)
    }

    fn files(n: usize, size_bytes: u64) -> Vec<UploadedFile> {
        (0..n)
            .map(|i| UploadedFile {
                path: PathBuf::from(format!("/up/i-1-copy{}.png", i)),
                filename: format!("i-1-copy{}.png", i),
                size_bytes,
            })
            .collect()
    }

    #[tokio::test(start_paused = true)]
    async fn test_delay_after_every_batch() {
        let config = BatchConfig::new(Q).with_sizes(vec![2]);
        let (batcher, broker) = batcher(config, 100).await;

        let started = Instant::now();
        let report = batcher.submit(files(5, 10)).await.unwrap();

        // 3 batches: [2, 2, 1]
        let elapsed = started.elapsed();
        assert!(elapsed >= DEFAULT_BATCH_DELAY * 3, "elapsed {:?}", elapsed);
        assert!(elapsed < DEFAULT_BATCH_DELAY * 4, "elapsed {:?}", elapsed);
        assert_eq!(report.batch_size, 2);
        assert_eq!(report.queued.len(), 5);
        assert_eq!(report.message(), "5 files queued for processing");
        assert_eq!(broker.depth(Q).await.unwrap().ready, 5);
        assert_eq!(report.queued[0].job_id, "job-1");
    }

    #[tokio::test(start_paused = true)]
    async fn test_priority_follows_file_size() {
        let (batcher, _) = batcher(BatchConfig::new(Q), 100).await;
        let mut upload = files(1, Priority::LARGE_FILE_THRESHOLD_BYTES + 1);
        upload.extend(files(1, Priority::LARGE_FILE_THRESHOLD_BYTES));

        let report = batcher.submit(upload).await.unwrap();
        let priorities: Vec<Priority> = report.queued.iter().map(|q| q.priority).collect();
        assert_eq!(priorities, vec![Priority::High, Priority::Low]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_overflow_and_oversize_are_reported() {
        let (batcher, _) = batcher(BatchConfig::new(Q), 3).await;
        let mut upload = files(4, 10);
        upload.push(UploadedFile {
            path: PathBuf::from("/up/huge.png"),
            filename: "huge.png".to_string(),
            size_bytes: MAX_FILE_BYTES + 1,
        });

        let report = batcher.submit(upload).await.unwrap();
        assert_eq!(report.queued.len(), 3);
        assert_eq!(report.rejected.len(), 2);
        assert!(report.rejected.iter().any(|r| r.filename == "huge.png"));
    }

    #[tokio::test]
    async fn test_request_limits() {
        let (batcher, _) = batcher(BatchConfig::new(Q), 10).await;
        assert!(matches!(batcher.submit(Vec::new()).await, Err(AppError::Validation(_))));
        assert!(matches!(
            batcher.submit(files(MAX_FILES_PER_REQUEST + 1, 1)).await,
            Err(AppError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_batch_sizes_come_from_candidates() {
        let (batcher, _) = batcher(BatchConfig::new(Q), 10).await;
        let batcher = batcher.with_seed(7);
        for _ in 0..50 {
            assert!(DEFAULT_BATCH_SIZES.contains(&batcher.pick_batch_size()));
        }
    }

    #[tokio::test]
    async fn test_uniform_delay_stays_in_range() {
        let config = BatchConfig::new(Q).with_delay(DelayModel::Uniform {
            min: Duration::from_millis(50),
            max: Duration::from_millis(150),
        });
        let (batcher, _) = batcher(config, 10).await;
        for _ in 0..50 {
            let delay = batcher.next_delay();
            assert!(delay >= Duration::from_millis(50) && delay <= Duration::from_millis(150));
        }
    }

    #[test]
    fn test_invalid_config_rejected() {
        assert!(BatchConfig::new(Q).with_sizes(vec![]).validate().is_err());
        assert!(BatchConfig::new(Q).with_sizes(vec![3, 0]).validate().is_err());
    }
}
