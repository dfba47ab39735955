// Output lookup by job id
use async_trait::async_trait;
use leveler_core::port::ArtifactLookup;
use std::path::{Path, PathBuf};

/// Where rendered documents live. The renderer writes through it and the
/// status lookup reads through it, so both agree on file naming.
#[derive(Debug, Clone)]
pub struct ArtifactLocator {
    output_dir: PathBuf,
}

impl ArtifactLocator {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
        }
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Path the document for `job_id` is written to. `None` for ids that
    /// could escape the output directory.
    pub fn output_path(&self, job_id: &str) -> Option<PathBuf> {
        let safe = !job_id.is_empty()
            && job_id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        safe.then(|| self.output_dir.join(format!("{}.txt", job_id)))
    }

    /// The finished document, if it exists yet
    pub async fn locate(&self, job_id: &str) -> Option<PathBuf> {
        let path = self.output_path(job_id)?;
        match tokio::fs::try_exists(&path).await {
            Ok(true) => Some(path),
            _ => None,
        }
    }
}

#[async_trait]
impl ArtifactLookup for ArtifactLocator {
    async fn locate(&self, job_id: &str) -> Option<PathBuf> {
        ArtifactLocator::locate(self, job_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::temp_dir;

    #[test]
    fn test_rejects_path_like_ids() {
        let locator = ArtifactLocator::new("/out");
        assert_eq!(
            locator.output_path("3f2a-b"),
            Some(PathBuf::from("/out/3f2a-b.txt"))
        );
        assert_eq!(locator.output_path("../etc/passwd"), None);
        assert_eq!(locator.output_path(""), None);
    }

    #[tokio::test]
    async fn test_locate_only_existing() {
        let dir = temp_dir("leveler-locate");
        let locator = ArtifactLocator::new(&dir);
        assert_eq!(locator.locate("job-1").await, None);

        std::fs::write(dir.join("job-1.txt"), "done").unwrap();
        assert_eq!(locator.locate("job-1").await, Some(dir.join("job-1.txt")));
        let _ = std::fs::remove_dir_all(dir);
    }
}
