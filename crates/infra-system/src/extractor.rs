// Extract stage: image file -> text
//
// Text recognition itself is out of scope; the extractor pulls printable
// runs out of the source bytes and charges the configured latency.

use crate::latency::LatencyModel;
use async_trait::async_trait;
use leveler_core::port::{Artifact, Content, Filter, Stage, StageError};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, warn};

/// Shortest byte run treated as a word
const MIN_RUN_LEN: usize = 4;

/// Upper bound on extracted text
const MAX_TEXT_LEN: usize = 4096;

pub struct FileTextExtractor {
    id: usize,
    latency: LatencyModel,
    processed: AtomicU64,
}

impl FileTextExtractor {
    pub fn new(id: usize, latency: LatencyModel) -> Self {
        Self {
            id,
            latency,
            processed: AtomicU64::new(0),
        }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    /// Inputs this instance finished successfully
    pub fn processed(&self) -> u64 {
        self.processed.load(Ordering::Relaxed)
    }
}

/// Printable ASCII runs of at least `MIN_RUN_LEN` bytes, space separated
fn printable_runs(bytes: &[u8]) -> String {
    let mut text = String::new();
    for run in bytes.split(|b| !(b.is_ascii_graphic() || *b == b' ')) {
        let run = String::from_utf8_lossy(run);
        let run = run.trim();
        if run.len() < MIN_RUN_LEN {
            continue;
        }
        if !text.is_empty() {
            text.push(' ');
        }
        text.push_str(run);
        if text.len() >= MAX_TEXT_LEN {
            text.truncate(MAX_TEXT_LEN);
            break;
        }
    }
    text
}

#[async_trait]
impl Filter for FileTextExtractor {
    fn stage(&self) -> Stage {
        Stage::Extract
    }

    async fn process(&self, input: Artifact) -> Result<Artifact, StageError> {
        let path = match &input.content {
            Content::Source(path) => path.clone(),
            other => return Err(StageError::unexpected(Stage::Extract, "source", other)),
        };

        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!(job_id = %input.job_id, path = %path.display(), "Image file not found");
                return Err(StageError::SourceMissing(path));
            }
            Err(e) => return Err(StageError::failed(Stage::Extract, e.to_string())),
        };

        let latency = self.latency.wait().await;
        let text = printable_runs(&bytes);
        self.processed.fetch_add(1, Ordering::Relaxed);

        debug!(
            job_id = %input.job_id,
            extractor = self.id,
            bytes = bytes.len(),
            chars = text.len(),
            latency_ms = latency.as_millis() as u64,
            "Text extracted"
        );
        Ok(input.with_content(Content::Text(text)))
    }
}
