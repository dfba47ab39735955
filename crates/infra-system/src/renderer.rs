// Render stage: text -> document on disk
use crate::locator::ArtifactLocator;
use async_trait::async_trait;
use leveler_core::port::{Artifact, Content, Filter, Stage, StageError};
use tracing::debug;

pub struct DocumentRenderer {
    locator: ArtifactLocator,
}

impl DocumentRenderer {
    pub fn new(locator: ArtifactLocator) -> Self {
        Self { locator }
    }
}

#[async_trait]
impl Filter for DocumentRenderer {
    fn stage(&self) -> Stage {
        Stage::Render
    }

    async fn process(&self, input: Artifact) -> Result<Artifact, StageError> {
        let text = match &input.content {
            Content::Text(text) => text,
            other => return Err(StageError::unexpected(Stage::Render, "text", other)),
        };

        let path = self.locator.output_path(&input.job_id).ok_or_else(|| {
            StageError::failed(Stage::Render, format!("unusable job id {:?}", input.job_id))
        })?;

        tokio::fs::create_dir_all(self.locator.output_dir())
            .await
            .map_err(|e| StageError::failed(Stage::Render, e.to_string()))?;

        let document = format!("Source: {}\n\n{}\n", input.display_name, text);
        // Write then rename so a status lookup never sees a partial document
        let partial = path.with_extension("txt.partial");
        tokio::fs::write(&partial, document)
            .await
            .map_err(|e| StageError::failed(Stage::Render, e.to_string()))?;
        tokio::fs::rename(&partial, &path)
            .await
            .map_err(|e| StageError::failed(Stage::Render, e.to_string()))?;

        debug!(job_id = %input.job_id, output = %path.display(), "Document rendered");
        Ok(input.with_content(Content::Document(path)))
    }
}
