//! Text generation providers.
//!
//! A provider turns a prompt into a lazy stream of text chunks. The pipeline
//! concatenates the chunks in arrival order; anything a provider cannot map
//! onto a [`TextChunk`] is a hard error, never a guess.

pub mod mock;
pub mod openai;

use async_trait::async_trait;
use futures::StreamExt;
use std::pin::Pin;
use thiserror::Error;
use tokio_stream::Stream;

pub use mock::MockSqlGenerator;
pub use openai::{OpenAiConfig, OpenAiSqlGenerator};

/// Error type for generation providers.
#[derive(Error, Debug)]
pub enum GenerationError {
    #[error("Provider not configured: {0}")]
    NotConfigured(String),

    #[error("API error: {0}")]
    ApiError(String),

    #[error("Rate limited")]
    RateLimited,

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Malformed chunk from provider: {0}")]
    MalformedChunk(String),
}

/// The one chunk shape every provider emits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextChunk {
    pub text: String,
}

impl TextChunk {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }
}

/// Type alias for provider streams.
pub type ChunkStream = Pin<Box<dyn Stream<Item = Result<TextChunk, GenerationError>> + Send>>;

#[async_trait]
pub trait SqlGenerator: Send + Sync {
    /// Start generation for `prompt`.
    async fn generate(&self, prompt: &str) -> Result<ChunkStream, GenerationError>;

    async fn health_check(&self) -> Result<(), GenerationError>;

    /// Provider name for logs.
    fn name(&self) -> &'static str;
}

/// Concatenated provider output.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GeneratedText {
    pub text: String,
    pub fragment_count: usize,
}

/// Drain a chunk stream in order. The first error ends collection.
pub async fn collect_text(mut stream: ChunkStream) -> Result<GeneratedText, GenerationError> {
    let mut collected = GeneratedText::default();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        collected.fragment_count += 1;
        collected.text.push_str(&chunk.text);
    }
    Ok(collected)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_collect_preserves_order_and_duplicates() {
        let stream: ChunkStream = Box::pin(tokio_stream::iter(vec![
            Ok(TextChunk::new("SELECT ")),
            Ok(TextChunk::new("1")),
            Ok(TextChunk::new("1")),
        ]));
        let collected = collect_text(stream).await.unwrap();
        assert_eq!(collected.text, "SELECT 11");
        assert_eq!(collected.fragment_count, 3);
    }

    #[tokio::test]
    async fn test_collect_stops_on_error() {
        let stream: ChunkStream = Box::pin(tokio_stream::iter(vec![
            Ok(TextChunk::new("SELECT")),
            Err(GenerationError::MalformedChunk("{}".into())),
            Ok(TextChunk::new(" 1")),
        ]));
        assert!(matches!(
            collect_text(stream).await,
            Err(GenerationError::MalformedChunk(_))
        ));
    }

    #[tokio::test]
    async fn test_collect_empty_stream() {
        let stream: ChunkStream = Box::pin(tokio_stream::iter(Vec::new()));
        let collected = collect_text(stream).await.unwrap();
        assert_eq!(collected, GeneratedText::default());
    }
}
