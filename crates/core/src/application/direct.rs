// Direct processing - the no-broker variant
//
// Requests run the pipeline inline under a hard concurrency cap. Over the cap
// the request is refused (503 at the RPC layer) and the job is gone: there is
// no queue to absorb the burst.

use crate::application::consumer::panic_message;
use crate::application::pipeline::Pipeline;
use crate::domain::{Job, Priority};
use crate::error::{AppError, Result};
use crate::port::{IdProvider, StageError, TimeProvider};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{info, warn};

/// Default cap on concurrent direct requests
pub const DEFAULT_DIRECT_MAX_CONCURRENT: usize = 5;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DirectRequest {
    pub original_path: PathBuf,
    pub filename: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum DirectOutcome {
    Completed {
        success: bool,
        filename: String,
        #[serde(rename = "outputPath")]
        output_path: PathBuf,
    },
    Failed {
        success: bool,
        error: String,
    },
}

impl DirectOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, DirectOutcome::Completed { .. })
    }
}

pub struct DirectProcessor {
    pipeline: Arc<Pipeline>,
    permits: Arc<Semaphore>,
    max_concurrent: usize,
    id_provider: Arc<dyn IdProvider>,
    time_provider: Arc<dyn TimeProvider>,
}

impl DirectProcessor {
    pub fn new(
        pipeline: Arc<Pipeline>,
        max_concurrent: usize,
        id_provider: Arc<dyn IdProvider>,
        time_provider: Arc<dyn TimeProvider>,
    ) -> Self {
        Self {
            pipeline,
            permits: Arc::new(Semaphore::new(max_concurrent)),
            max_concurrent,
            id_provider,
            time_provider,
        }
    }

    /// Requests currently running
    pub fn active(&self) -> usize {
        self.max_concurrent - self.permits.available_permits()
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    /// Run one request through the pipeline.
    ///
    /// Returns `AppError::ConcurrencyCapExceeded` without running anything
    /// when the cap is reached. Pipeline failures are an `Ok(Failed)`.
    pub async fn process(&self, request: DirectRequest) -> Result<DirectOutcome> {
        let permit = Arc::clone(&self.permits).try_acquire_owned().map_err(|_| {
            warn!(
                filename = %request.filename,
                max_concurrent = self.max_concurrent,
                "Direct request refused, server overloaded"
            );
            AppError::ConcurrencyCapExceeded(self.max_concurrent)
        })?;

        let job = Job::new(
            self.id_provider.generate_id(),
            self.time_provider.now_millis(),
            request.original_path,
            request.filename,
            Priority::Low,
        );
        info!(job_id = %job.id, filename = %job.display_name, "Direct request accepted");

        let pipeline = Arc::clone(&self.pipeline);
        let run_job = job.clone();
        // The permit travels with the pipeline so a dropped caller cannot
        // free a slot that is still running
        let result = tokio::spawn(async move {
            let _permit = permit;
            pipeline.run(&run_job).await
        })
            .await
            .unwrap_or_else(|e| {
                Err(if e.is_panic() {
                    StageError::Panicked(panic_message(e.into_panic()))
                } else {
                    StageError::Panicked("pipeline task cancelled".to_string())
                })
            });

        Ok(match result {
            Ok(result) => DirectOutcome::Completed {
                success: true,
                filename: job.display_name,
                output_path: result.output_ref,
            },
            Err(e) => {
                warn!(job_id = %job.id, error = %e, "Direct request failed");
                DirectOutcome::Failed {
                    success: false,
                    error: e.to_string(),
                }
            }
        })
    }
}
