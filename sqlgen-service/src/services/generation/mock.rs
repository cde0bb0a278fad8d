//! Mock provider for local runs and tests.

use super::{ChunkStream, GenerationError, SqlGenerator, TextChunk};
use async_trait::async_trait;
use std::sync::Mutex;

/// Replays scripted fragments regardless of the prompt.
pub struct MockSqlGenerator {
    enabled: bool,
    fragments: Vec<String>,
    last_prompt: Mutex<Option<String>>,
}

impl MockSqlGenerator {
    pub fn new(enabled: bool) -> Self {
        Self::scripted(enabled, ["SELECT 1 AS ok"])
    }

    /// Stream `response` split at whitespace, as a real provider would.
    pub fn with_response(response: &str) -> Self {
        let fragments: Vec<String> = response
            .split_inclusive(char::is_whitespace)
            .map(String::from)
            .collect();
        Self::scripted(true, fragments)
    }

    pub fn scripted<I, S>(enabled: bool, fragments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            enabled,
            fragments: fragments.into_iter().map(Into::into).collect(),
            last_prompt: Mutex::new(None),
        }
    }

    /// The most recent prompt passed to [`SqlGenerator::generate`].
    pub fn last_prompt(&self) -> Option<String> {
        self.last_prompt.lock().ok().and_then(|p| p.clone())
    }
}

#[async_trait]
impl SqlGenerator for MockSqlGenerator {
    async fn generate(&self, prompt: &str) -> Result<ChunkStream, GenerationError> {
        if !self.enabled {
            return Err(GenerationError::NotConfigured(
                "Mock SQL generator not enabled".to_string(),
            ));
        }

        if let Ok(mut last) = self.last_prompt.lock() {
            *last = Some(prompt.to_string());
        }

        let chunks: Vec<Result<TextChunk, GenerationError>> = self
            .fragments
            .iter()
            .map(|f| Ok(TextChunk::new(f.clone())))
            .collect();

        Ok(Box::pin(tokio_stream::iter(chunks)))
    }

    async fn health_check(&self) -> Result<(), GenerationError> {
        if self.enabled {
            Ok(())
        } else {
            Err(GenerationError::NotConfigured(
                "Mock SQL generator not enabled".to_string(),
            ))
        }
    }

    fn name(&self) -> &'static str {
        "mock"
    }
}
