//! RPC Method Handlers
//!
//! Implements the business logic for each JSON-RPC method.

use crate::error::{throttled, to_rpc_error};
use crate::types::{
    StatsResponse, StatusRequest, StatusResponse, UploadBatchRequest, UploadBatchResponse,
    UploadRequest, UploadResponse,
};
use jsonrpsee::types::ErrorObjectOwned;
use leveler_core::application::{
    Batcher, Broker, ConsumerStats, DirectOutcome, DirectProcessor, DirectRequest, TokenBucket,
    UploadedFile,
};
use leveler_core::error::AppError;
use leveler_core::port::ArtifactLookup;
use std::sync::Arc;
use tracing::{debug, warn};

/// Default upload limiter: 100 requests per minute, burst 100
pub const DEFAULT_UPLOAD_RATE_PER_MIN: f64 = 100.0;

/// Everything the handlers read from or write to
pub struct RpcServices {
    pub queue: String,
    pub broker: Broker,
    pub batcher: Arc<Batcher>,
    pub direct: Arc<DirectProcessor>,
    pub admission: Arc<TokenBucket>,
    pub consumer_stats: Arc<ConsumerStats>,
    pub artifacts: Arc<dyn ArtifactLookup>,
    pub upload_rate_per_min: f64,
}

/// RPC Handler with injected dependencies
pub struct RpcHandler {
    services: RpcServices,
    upload_limiter: TokenBucket,
    start_time: std::time::Instant,
}

impl RpcHandler {
    pub fn new(services: RpcServices) -> Self {
        let per_min = services.upload_rate_per_min;
        Self {
            upload_limiter: TokenBucket::new(per_min / 60.0, per_min),
            services,
            start_time: std::time::Instant::now(),
        }
    }

    fn check_upload_rate(&self) -> Result<(), ErrorObjectOwned> {
        self.upload_limiter.refill();
        if self.upload_limiter.consume() {
            Ok(())
        } else {
            warn!("Upload rate limit exceeded");
            Err(throttled())
        }
    }

    /// upload.v1
    pub async fn upload(&self, params: UploadRequest) -> Result<UploadResponse, ErrorObjectOwned> {
        self.check_upload_rate()?;

        let file = stat_upload(params).await.map_err(to_rpc_error)?;
        let queued = self
            .services
            .batcher
            .submit_one(file)
            .await
            .map_err(to_rpc_error)?;

        Ok(UploadResponse {
            message: "File queued for processing".to_string(),
            file_id: queued.job_id,
        })
    }

    /// upload.batch.v1
    pub async fn upload_batch(
        &self,
        params: UploadBatchRequest,
    ) -> Result<UploadBatchResponse, ErrorObjectOwned> {
        self.check_upload_rate()?;

        let mut files = Vec::with_capacity(params.files.len());
        for upload in params.files {
            files.push(stat_upload(upload).await.map_err(to_rpc_error)?);
        }

        let report = self
            .services
            .batcher
            .submit(files)
            .await
            .map_err(to_rpc_error)?;

        Ok(UploadBatchResponse {
            message: report.message(),
            batch_size: report.batch_size,
            files: report.queued,
            rejected: report.rejected,
        })
    }

    /// process.v1
    pub async fn process(&self, params: DirectRequest) -> Result<DirectOutcome, ErrorObjectOwned> {
        self.services
            .direct
            .process(params)
            .await
            .map_err(to_rpc_error)
    }

    /// status.v1
    pub async fn status(&self, params: StatusRequest) -> Result<StatusResponse, ErrorObjectOwned> {
        if params.job_id.trim().is_empty() {
            return Err(to_rpc_error(AppError::Validation(
                "jobId must not be empty".to_string(),
            )));
        }

        Ok(match self.services.artifacts.locate(&params.job_id).await {
            Some(path) => StatusResponse::done(path),
            None => StatusResponse::processing(),
        })
    }

    /// admin.stats.v1
    pub async fn stats(&self) -> Result<StatsResponse, ErrorObjectOwned> {
        let depth = self
            .services
            .broker
            .depth(&self.services.queue)
            .await
            .map_err(to_rpc_error)?;

        Ok(StatsResponse {
            queue: self.services.queue.clone(),
            depth,
            admission: self.services.admission.snapshot(),
            consumer: self.services.consumer_stats.snapshot(),
            unsettled_deliveries: self.services.broker.unsettled(),
            direct_active: self.services.direct.active(),
            direct_max_concurrent: self.services.direct.max_concurrent(),
            uptime_seconds: self.start_time.elapsed().as_secs(),
        })
    }
}

/// Size an already stored upload; the file must exist
async fn stat_upload(upload: UploadRequest) -> leveler_core::Result<UploadedFile> {
    let filename = match upload.filename {
        Some(name) if !name.trim().is_empty() => name,
        _ => upload
            .path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .ok_or_else(|| {
                AppError::Validation(format!("No filename in {}", upload.path.display()))
            })?,
    };

    let metadata = tokio::fs::metadata(&upload.path).await.map_err(|e| {
        debug!(path = %upload.path.display(), error = %e, "Upload not readable");
        AppError::NotFound(format!("Uploaded file {} not found", upload.path.display()))
    })?;

    Ok(UploadedFile {
        path: upload.path,
        filename,
        size_bytes: metadata.len(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::code;
    use leveler_core::application::{BatchConfig, DelayModel, Pipeline};
    use leveler_core::domain::QueueConfig;
    use leveler_core::port::artifact_lookup::mocks::MockArtifactLookup;
    use leveler_core::port::filter::mocks::MockFilter;
    use leveler_core::port::id_provider::SequentialIdProvider;
    use leveler_core::port::queue_store::memory::InMemoryQueueStore;
    use leveler_core::port::time_provider::SystemTimeProvider;
    use leveler_core::port::Stage;
    use std::path::PathBuf;
    use std::time::Duration;

    const QUEUE: &str = "uploads";

    struct Fixture {
        handler: RpcHandler,
        artifacts: Arc<MockArtifactLookup>,
        dir: PathBuf,
    }

    async fn fixture(max_length: usize, upload_rate_per_min: f64) -> Fixture {
        let time = Arc::new(SystemTimeProvider);
        let broker = Broker::new(Arc::new(InMemoryQueueStore::new()), time.clone());
        broker
            .assert_queue(&QueueConfig::new(QUEUE).with_max_length(max_length))
            .await
            .unwrap();

        let batcher = Batcher::new(
            broker.clone(),
            BatchConfig::new(QUEUE).with_delay(DelayModel::Fixed(Duration::ZERO)),
            Arc::new(SequentialIdProvider::new("job")),
            time.clone(),
        )
        .unwrap();

        let pipeline = Pipeline::builder()
            .filter(Arc::new(MockFilter::passing(Stage::Extract)))
            .filter(Arc::new(MockFilter::passing(Stage::Translate)))
            .filter(Arc::new(MockFilter::passing(Stage::Render)))
            .build()
            .unwrap();
        let direct = DirectProcessor::new(
            Arc::new(pipeline),
            2,
            Arc::new(SequentialIdProvider::new("direct")),
            time,
        );

        let artifacts = Arc::new(MockArtifactLookup::new());
        let dir = std::env::temp_dir().join(format!("leveler-rpc-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();

        Fixture {
            handler: RpcHandler::new(RpcServices {
                queue: QUEUE.to_string(),
                broker,
                batcher: Arc::new(batcher),
                direct: Arc::new(direct),
                admission: Arc::new(TokenBucket::new(10.0, 20.0)),
                consumer_stats: Arc::new(ConsumerStats::new()),
                artifacts: artifacts.clone(),
                upload_rate_per_min,
            }),
            artifacts,
            dir,
        }
    }

    fn stored(dir: &std::path::Path, name: &str) -> UploadRequest {
        let path = dir.join(name);
        std::fs::write(&path, b"image bytes").unwrap();
        UploadRequest {
            path,
            filename: None,
        }
    }

    #[tokio::test]
    async fn test_upload_queues_and_reports_file_id() {
        let f = fixture(10, DEFAULT_UPLOAD_RATE_PER_MIN).await;
        let response = f.handler.upload(stored(&f.dir, "one.png")).await.unwrap();

        assert_eq!(response.file_id, "job-1");
        let stats = f.handler.stats().await.unwrap();
        assert_eq!(stats.depth.ready, 1);
        assert_eq!(stats.direct_max_concurrent, 2);
    }

    #[tokio::test]
    async fn test_upload_missing_file_is_not_found() {
        let f = fixture(10, DEFAULT_UPLOAD_RATE_PER_MIN).await;
        let err = f
            .handler
            .upload(UploadRequest {
                path: f.dir.join("never-written.png"),
                filename: None,
            })
            .await
            .unwrap_err();
        assert_eq!(err.code(), code::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_batch_message_counts_queued_files() {
        let f = fixture(10, DEFAULT_UPLOAD_RATE_PER_MIN).await;
        let files = (0..3)
            .map(|i| stored(&f.dir, &format!("batch-{}.png", i)))
            .collect();

        let response = f
            .handler
            .upload_batch(UploadBatchRequest { files })
            .await
            .unwrap();
        assert_eq!(response.message, "3 files queued for processing");
        assert_eq!(response.files.len(), 3);

        let value = serde_json::to_value(&response).unwrap();
        assert!(value.get("rejected").is_none());
    }

    #[tokio::test]
    async fn test_full_queue_surfaces_overflow() {
        let f = fixture(1, DEFAULT_UPLOAD_RATE_PER_MIN).await;
        f.handler.upload(stored(&f.dir, "a.png")).await.unwrap();

        let err = f.handler.upload(stored(&f.dir, "b.png")).await.unwrap_err();
        assert_eq!(err.code(), code::QUEUE_OVERFLOW);
    }

    #[tokio::test]
    async fn test_upload_limiter_throttles() {
        let f = fixture(10, 1.0).await;
        f.handler.upload(stored(&f.dir, "first.png")).await.unwrap();

        let err = f
            .handler
            .upload(stored(&f.dir, "second.png"))
            .await
            .unwrap_err();
        assert_eq!(err.code(), code::THROTTLED);
    }

    #[tokio::test]
    async fn test_status_processing_then_done() {
        let f = fixture(10, DEFAULT_UPLOAD_RATE_PER_MIN).await;
        let request = || StatusRequest {
            job_id: "job-9".to_string(),
        };

        assert_eq!(
            f.handler.status(request()).await.unwrap(),
            StatusResponse::processing()
        );

        f.artifacts.mark_done("job-9", "/out/job-9.txt");
        let done = f.handler.status(request()).await.unwrap();
        assert_eq!(done.output_path, Some(PathBuf::from("/out/job-9.txt")));
    }

    #[tokio::test]
    async fn test_process_runs_inline() {
        let f = fixture(10, DEFAULT_UPLOAD_RATE_PER_MIN).await;
        let outcome = f
            .handler
            .process(DirectRequest {
                original_path: PathBuf::from("/up/x.png"),
                filename: "x.png".to_string(),
            })
            .await
            .unwrap();
        assert!(outcome.is_success());
    }
}
