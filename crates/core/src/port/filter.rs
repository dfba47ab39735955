// Filter Port
// A pipeline stage: one artifact in, one artifact out, asynchronous, fallible.

use crate::domain::{Job, JobId};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Which step of the transform a filter performs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Stage {
    Extract,
    Translate,
    Render,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Stage::Extract => write!(f, "EXTRACT"),
            Stage::Translate => write!(f, "TRANSLATE"),
            Stage::Render => write!(f, "RENDER"),
        }
    }
}

/// Data flowing between stages
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Content {
    /// Uploaded image on disk
    Source(PathBuf),
    /// Extracted or translated text
    Text(String),
    /// Rendered output document
    Document(PathBuf),
}

impl Content {
    pub fn kind(&self) -> &'static str {
        match self {
            Content::Source(_) => "source",
            Content::Text(_) => "text",
            Content::Document(_) => "document",
        }
    }
}

/// Stage input/output, tagged with the job it belongs to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    pub job_id: JobId,
    pub display_name: String,
    pub content: Content,
}

impl Artifact {
    /// Pipeline input for a job
    pub fn source(job: &Job) -> Self {
        Self {
            job_id: job.id.clone(),
            display_name: job.display_name.clone(),
            content: Content::Source(job.source_ref.clone()),
        }
    }

    pub fn with_content(&self, content: Content) -> Self {
        Self {
            job_id: self.job_id.clone(),
            display_name: self.display_name.clone(),
            content,
        }
    }
}

/// Stage failures. All of them lead to a requeue at the consumer.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StageError {
    #[error("Source file not found: {0}")]
    SourceMissing(PathBuf),

    #[error("{stage} expected {expected} input, got {actual}")]
    UnexpectedInput {
        stage: Stage,
        expected: &'static str,
        actual: &'static str,
    },

    #[error("{stage} failed: {message}")]
    Failed { stage: Stage, message: String },

    #[error("Job timed out after {0:?}")]
    Timeout(Duration),

    #[error("Stage task panicked: {0}")]
    Panicked(String),
}

impl StageError {
    pub fn failed(stage: Stage, message: impl Into<String>) -> Self {
        StageError::Failed {
            stage,
            message: message.into(),
        }
    }

    pub fn unexpected(stage: Stage, expected: &'static str, actual: &Content) -> Self {
        StageError::UnexpectedInput {
            stage,
            expected,
            actual: actual.kind(),
        }
    }
}

/// Filter trait
///
/// Implementations (leveler-infra-system):
/// - FileTextExtractor: Source -> Text
/// - GlossaryTranslator: Text -> Text
/// - DocumentRenderer: Text -> Document
#[async_trait]
pub trait Filter: Send + Sync {
    /// Stage this filter implements
    fn stage(&self) -> Stage;

    /// Transform one artifact
    async fn process(&self, input: Artifact) -> Result<Artifact, StageError>;
}

// ============================================================================
// Mock Implementations for Testing
// ============================================================================

pub mod mocks {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
    use std::sync::Arc;
    use tokio::sync::Semaphore;

    /// Mock filter behavior
    #[derive(Debug, Clone)]
    pub enum MockBehavior {
        /// Transform immediately
        Pass,
        /// Transform after a delay
        Delay(Duration),
        /// Always fail with message
        Fail(String),
        /// Panic with message (for panic isolation testing)
        Panic(String),
        /// Never complete (for timeout testing)
        Hang,
    }

    /// Mock filter. Produces stage-appropriate output:
    /// Extract turns a source into text, Translate rewrites text, Render
    /// turns text into a `/virtual/{job_id}.txt` document.
    pub struct MockFilter {
        stage: Stage,
        behavior: Mutex<MockBehavior>,
        calls: AtomicUsize,
        fail_first: AtomicU32,
        gate: Option<Arc<Semaphore>>,
    }

    impl MockFilter {
        pub fn new(stage: Stage, behavior: MockBehavior) -> Self {
            Self {
                stage,
                behavior: Mutex::new(behavior),
                calls: AtomicUsize::new(0),
                fail_first: AtomicU32::new(0),
                gate: None,
            }
        }

        pub fn passing(stage: Stage) -> Self {
            Self::new(stage, MockBehavior::Pass)
        }

        pub fn delayed(stage: Stage, delay: Duration) -> Self {
            Self::new(stage, MockBehavior::Delay(delay))
        }

        pub fn failing(stage: Stage, message: impl Into<String>) -> Self {
            Self::new(stage, MockBehavior::Fail(message.into()))
        }

        pub fn panicking(stage: Stage, message: impl Into<String>) -> Self {
            Self::new(stage, MockBehavior::Panic(message.into()))
        }

        /// Each call waits for one permit from `gate` before doing anything
        pub fn gated(stage: Stage, gate: Arc<Semaphore>) -> Self {
            Self {
                gate: Some(gate),
                ..Self::passing(stage)
            }
        }

        /// Fail the first `n` calls, then follow the configured behavior
        pub fn fail_first(self, n: u32) -> Self {
            self.fail_first.store(n, Ordering::SeqCst);
            self
        }

        pub fn set_behavior(&self, behavior: MockBehavior) {
            *self.behavior.lock() = behavior;
        }

        pub fn call_count(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        fn transform(&self, input: Artifact) -> Result<Artifact, StageError> {
            let content = match (self.stage, &input.content) {
                (Stage::Extract, Content::Source(_)) => {
                    Content::Text(format!("text of {}", input.display_name))
                }
                (Stage::Translate, Content::Text(text)) => {
                    Content::Text(format!("translated {}", text))
                }
                (Stage::Render, Content::Text(_)) => Content::Document(
                    PathBuf::from("/virtual").join(format!("{}.txt", input.job_id)),
                ),
                (Stage::Extract, other) => {
                    return Err(StageError::unexpected(self.stage, "source", other))
                }
                (_, other) => return Err(StageError::unexpected(self.stage, "text", other)),
            };
            Ok(input.with_content(content))
        }
    }

    #[async_trait]
    impl Filter for MockFilter {
        fn stage(&self) -> Stage {
            self.stage
        }

        async fn process(&self, input: Artifact) -> Result<Artifact, StageError> {
            self.calls.fetch_add(1, Ordering::SeqCst);

            if let Some(gate) = &self.gate {
                gate.acquire()
                    .await
                    .map_err(|_| StageError::failed(self.stage, "gate closed"))?
                    .forget();
            }

            let failing_now = self
                .fail_first
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if failing_now {
                return Err(StageError::failed(self.stage, "scripted failure"));
            }

            let behavior = self.behavior.lock().clone();
            match behavior {
                MockBehavior::Pass => self.transform(input),
                MockBehavior::Delay(delay) => {
                    tokio::time::sleep(delay).await;
                    self.transform(input)
                }
                MockBehavior::Fail(message) => Err(StageError::failed(self.stage, message)),
                MockBehavior::Panic(message) => panic!("{}", message),
                MockBehavior::Hang => std::future::pending().await,
            }
        }
    }
}
