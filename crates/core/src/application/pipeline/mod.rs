// Pipeline - ordered filter chain (Extract -> Translate -> Render)

mod fanout;

pub use fanout::{FanOut, RoundRobinPool};

use crate::domain::{Job, JobId};
use crate::error::{AppError, Result};
use crate::port::{Artifact, Content, Filter, Stage, StageError};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::time::Instant;
use tracing::debug;

/// Terminal result of a successful run
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineResult {
    pub job_id: JobId,
    pub output_ref: PathBuf,
}

/// Filters applied in order; the output of one is the input of the next.
/// The last filter must produce a document.
#[derive(Clone)]
pub struct Pipeline {
    filters: Vec<Arc<dyn Filter>>,
}

impl Pipeline {
    pub fn builder() -> PipelineBuilder {
        PipelineBuilder::default()
    }

    pub fn stages(&self) -> Vec<Stage> {
        self.filters.iter().map(|f| f.stage()).collect()
    }

    /// Run the whole chain on a job's source
    pub async fn run(&self, job: &Job) -> std::result::Result<PipelineResult, StageError> {
        self.run_artifact(Artifact::source(job)).await
    }

    /// Run the chain on an already prepared artifact (fan-out uses this after
    /// its own extraction step)
    pub async fn run_artifact(
        &self,
        input: Artifact,
    ) -> std::result::Result<PipelineResult, StageError> {
        let mut artifact = input;

        for filter in &self.filters {
            let stage = filter.stage();
            let started = Instant::now();
            artifact = filter.process(artifact).await?;
            debug!(
                job_id = %artifact.job_id,
                stage = %stage,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "Stage completed"
            );
        }

        match artifact.content {
            Content::Document(output_ref) => Ok(PipelineResult {
                job_id: artifact.job_id,
                output_ref,
            }),
            other => Err(StageError::unexpected(
                self.filters.last().map(|f| f.stage()).unwrap_or(Stage::Render),
                "document",
                &other,
            )),
        }
    }
}

#[derive(Default)]
pub struct PipelineBuilder {
    filters: Vec<Arc<dyn Filter>>,
}

impl PipelineBuilder {
    pub fn filter(mut self, filter: Arc<dyn Filter>) -> Self {
        self.filters.push(filter);
        self
    }

    pub fn build(self) -> Result<Pipeline> {
        if self.filters.is_empty() {
            return Err(AppError::Config("pipeline needs at least one filter".to_string()));
        }
        Ok(Pipeline {
            filters: self.filters,
        })
    }
}
