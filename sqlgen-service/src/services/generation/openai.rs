//! OpenAI-compatible chat completions provider.
//!
//! Streams `POST {base_url}/chat/completions` as server-sent events and maps
//! each `choices[0].delta.content` onto a [`TextChunk`].

use super::{ChunkStream, GenerationError, SqlGenerator, TextChunk};
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

/// Provider configuration.
#[derive(Debug, Clone)]
pub struct OpenAiConfig {
    pub api_key: String,
    pub base_url: String,
    pub model: String,
    pub temperature: f32,
    pub request_timeout: Duration,
}

pub struct OpenAiSqlGenerator {
    config: OpenAiConfig,
    client: Client,
}

impl OpenAiSqlGenerator {
    pub fn new(config: OpenAiConfig) -> Result<Self, GenerationError> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| GenerationError::NotConfigured(format!("HTTP client: {}", e)))?;

        Ok(Self { config, client })
    }

    fn completions_url(&self) -> String {
        format!("{}/chat/completions", self.config.base_url.trim_end_matches('/'))
    }
}

#[async_trait]
impl SqlGenerator for OpenAiSqlGenerator {
    async fn generate(&self, prompt: &str) -> Result<ChunkStream, GenerationError> {
        if self.config.api_key.is_empty() {
            return Err(GenerationError::NotConfigured("LLM API key not set".to_string()));
        }

        let request = ChatCompletionRequest {
            model: &self.config.model,
            messages: vec![ChatMessage {
                role: "user",
                content: prompt,
            }],
            temperature: self.config.temperature,
            stream: true,
        };

        tracing::debug!(
            model = %self.config.model,
            prompt_len = prompt.len(),
            "Starting streaming chat completion"
        );

        let response = self
            .client
            .post(self.completions_url())
            .bearer_auth(&self.config.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| GenerationError::NetworkError(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();

            if status.as_u16() == 429 {
                return Err(GenerationError::RateLimited);
            }

            return Err(GenerationError::ApiError(format!(
                "Chat completion error {}: {}",
                status, error_text
            )));
        }

        let (tx, rx) = mpsc::channel(32);

        tokio::spawn(async move {
            let mut stream = response.bytes_stream();
            let mut events = SseBuffer::default();

            while let Some(chunk_result) = stream.next().await {
                let chunk = match chunk_result {
                    Ok(chunk) => chunk,
                    Err(e) => {
                        let _ = tx.send(Err(GenerationError::NetworkError(e.to_string()))).await;
                        return;
                    }
                };
                events.extend(&chunk);

                while let Some(event) = events.next_event() {
                    match parse_sse_event(&event) {
                        Ok(SseEvent::Text(text)) => {
                            if tx.send(Ok(TextChunk::new(text))).await.is_err() {
                                return;
                            }
                        }
                        Ok(SseEvent::Skip) => {}
                        Ok(SseEvent::Done) => return,
                        Err(e) => {
                            let _ = tx.send(Err(e)).await;
                            return;
                        }
                    }
                }
            }

            let rest = events.finish();
            if !rest.trim().is_empty() {
                match parse_sse_event(&rest) {
                    Ok(SseEvent::Text(text)) => {
                        let _ = tx.send(Ok(TextChunk::new(text))).await;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        let _ = tx.send(Err(e)).await;
                    }
                }
            }
        });

        Ok(Box::pin(ReceiverStream::new(rx)) as ChunkStream)
    }

    async fn health_check(&self) -> Result<(), GenerationError> {
        if self.config.api_key.is_empty() {
            return Err(GenerationError::NotConfigured(
                "LLM API key not set".to_string(),
            ));
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "openai"
    }
}

/// Raw bytes received so far. Events are only decoded once their terminating
/// blank line has arrived, so a code point split across network chunks is
/// reassembled before it is read as UTF-8.
#[derive(Debug, Default)]
struct SseBuffer {
    bytes: Vec<u8>,
}

impl SseBuffer {
    fn extend(&mut self, chunk: &[u8]) {
        self.bytes.extend_from_slice(chunk);
    }

    /// Take the next complete event, if one is buffered.
    fn next_event(&mut self) -> Option<String> {
        let (end, separator) = find_event_end(&self.bytes)?;
        let event: Vec<u8> = self.bytes.drain(..end + separator).collect();
        Some(decode_event(&event[..end]))
    }

    /// Whatever is left once the stream has ended.
    fn finish(self) -> String {
        decode_event(&self.bytes)
    }
}

/// Position and length of the first blank-line separator (`\n\n` or `\r\n\r\n`).
fn find_event_end(bytes: &[u8]) -> Option<(usize, usize)> {
    let lf = bytes.windows(2).position(|w| w == b"\n\n").map(|i| (i, 2));
    let crlf = bytes.windows(4).position(|w| w == b"\r\n\r\n").map(|i| (i, 4));
    match (lf, crlf) {
        (Some(a), Some(b)) => Some(if a.0 <= b.0 { a } else { b }),
        (a, b) => a.or(b),
    }
}

fn decode_event(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).replace("\r\n", "\n")
}

#[derive(Debug, PartialEq, Eq)]
enum SseEvent {
    Text(String),
    /// Comments, keep-alives, role-only or finish-only deltas.
    Skip,
    Done,
}

fn parse_sse_event(event: &str) -> Result<SseEvent, GenerationError> {
    let data: Vec<&str> = event
        .lines()
        .filter_map(|line| line.strip_prefix("data:"))
        .map(str::trim_start)
        .collect();
    if data.is_empty() {
        return Ok(SseEvent::Skip);
    }

    let payload = data.join("\n");
    if payload.trim() == "[DONE]" {
        return Ok(SseEvent::Done);
    }

    let chunk: ChatCompletionChunk = serde_json::from_str(&payload)
        .map_err(|e| GenerationError::MalformedChunk(format!("{}: {}", e, payload)))?;

    match chunk.choices.into_iter().next().and_then(|c| c.delta.content) {
        Some(text) if !text.is_empty() => Ok(SseEvent::Text(text)),
        _ => Ok(SseEvent::Skip),
    }
}

#[derive(Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    stream: bool,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatCompletionChunk {
    choices: Vec<ChunkChoice>,
}

#[derive(Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    delta: ChunkDelta,
}

#[derive(Deserialize, Default)]
struct ChunkDelta {
    content: Option<String>,
}
