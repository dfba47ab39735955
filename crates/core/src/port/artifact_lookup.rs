// Artifact Lookup Port
// Finds the rendered output for a job, if the pipeline has finished it.

use async_trait::async_trait;
use std::path::PathBuf;

#[async_trait]
pub trait ArtifactLookup: Send + Sync {
    /// `None` while the job is still queued or running
    async fn locate(&self, job_id: &str) -> Option<PathBuf>;
}

pub mod mocks {
    use super::*;
    use parking_lot::Mutex;
    use std::collections::HashMap;

    /// Map-backed lookup for tests
    #[derive(Default)]
    pub struct MockArtifactLookup {
        done: Mutex<HashMap<String, PathBuf>>,
    }

    impl MockArtifactLookup {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn mark_done(&self, job_id: &str, path: impl Into<PathBuf>) {
            self.done.lock().insert(job_id.to_string(), path.into());
        }
    }

    #[async_trait]
    impl ArtifactLookup for MockArtifactLookup {
        async fn locate(&self, job_id: &str) -> Option<PathBuf> {
            self.done.lock().get(job_id).cloned()
        }
    }
}
