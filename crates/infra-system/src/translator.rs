// Translate stage: English text -> Vietnamese, word by word from a glossary
use crate::latency::LatencyModel;
use async_trait::async_trait;
use leveler_core::port::{Artifact, Content, Filter, Stage, StageError};
use std::collections::HashMap;
use tracing::debug;

const DEFAULT_GLOSSARY: &[(&str, &str)] = &[
    ("hello", "xin chào"),
    ("world", "thế giới"),
    ("image", "hình ảnh"),
    ("text", "văn bản"),
    ("file", "tệp"),
    ("document", "tài liệu"),
    ("queue", "hàng đợi"),
    ("based", "dựa trên"),
    ("load", "tải"),
    ("translate", "dịch"),
    ("page", "trang"),
    ("and", "và"),
];

pub struct GlossaryTranslator {
    glossary: HashMap<String, String>,
    latency: LatencyModel,
}

impl Default for GlossaryTranslator {
    fn default() -> Self {
        Self::new(LatencyModel::none())
    }
}

impl GlossaryTranslator {
    pub fn new(latency: LatencyModel) -> Self {
        Self::with_glossary(
            DEFAULT_GLOSSARY
                .iter()
                .map(|(en, vi)| (en.to_string(), vi.to_string())),
            latency,
        )
    }

    pub fn with_glossary(
        entries: impl IntoIterator<Item = (String, String)>,
        latency: LatencyModel,
    ) -> Self {
        Self {
            glossary: entries
                .into_iter()
                .map(|(en, vi)| (en.to_lowercase(), vi))
                .collect(),
            latency,
        }
    }

    /// Translate known words, keep the rest as they are
    pub fn translate(&self, text: &str) -> String {
        text.split_whitespace()
            .map(|word| {
                let key: String = word
                    .chars()
                    .filter(|c| c.is_alphanumeric())
                    .collect::<String>()
                    .to_lowercase();
                self.glossary
                    .get(&key)
                    .cloned()
                    .unwrap_or_else(|| word.to_string())
            })
            .collect::<Vec<_>>()
            .join(" ")
    }
}

#[async_trait]
impl Filter for GlossaryTranslator {
    fn stage(&self) -> Stage {
        Stage::Translate
    }

    async fn process(&self, input: Artifact) -> Result<Artifact, StageError> {
        let text = match &input.content {
            Content::Text(text) => text,
            other => return Err(StageError::unexpected(Stage::Translate, "text", other)),
        };

        self.latency.wait().await;
        let translated = self.translate(text);
        debug!(job_id = %input.job_id, words = translated.split_whitespace().count(), "Text translated");
        Ok(input.with_content(Content::Text(translated)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_known_words_are_translated() {
        let translator = GlossaryTranslator::default();
        assert_eq!(translator.translate("Hello World!"), "xin chào thế giới");
        assert_eq!(translator.translate("Queue zebra"), "hàng đợi zebra");
        assert_eq!(translator.translate(""), "");
    }

    #[tokio::test]
    async fn test_filter_requires_text() {
        let translator = GlossaryTranslator::default();
        let input = Artifact {
            job_id: "job-1".to_string(),
            display_name: "a.png".to_string(),
            content: Content::Source(PathBuf::from("/up/a.png")),
        };
        let err = translator.process(input).await.unwrap_err();
        assert!(matches!(err, StageError::UnexpectedInput { stage: Stage::Translate, .. }));
    }
}
