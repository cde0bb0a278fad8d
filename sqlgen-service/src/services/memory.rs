//! Context memory: training material retrieved into generation prompts.

use async_trait::async_trait;
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};
use thiserror::Error;
use tokio::sync::RwLock;

#[derive(Error, Debug)]
pub enum MemoryError {
    #[error("Memory store unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryKind {
    Ddl,
    Example,
    Documentation,
}

#[derive(Debug, Clone, Serialize)]
pub struct MemoryEntry {
    pub kind: MemoryKind,
    pub content: String,
    pub tags: BTreeMap<String, String>,
}

impl MemoryEntry {
    pub fn new(kind: MemoryKind, content: impl Into<String>) -> Self {
        Self {
            kind,
            content: content.into(),
            tags: BTreeMap::new(),
        }
    }

    pub fn tag(mut self, key: &str, value: impl Into<String>) -> Self {
        self.tags.insert(key.to_string(), value.into());
        self
    }
}

#[async_trait]
pub trait ContextMemory: Send + Sync {
    async fn save(&self, entry: MemoryEntry) -> Result<(), MemoryError>;

    /// Up to `limit` entries most relevant to `query`.
    async fn search(&self, query: &str, limit: usize) -> Result<Vec<MemoryEntry>, MemoryError>;

    async fn len(&self) -> usize;
}

/// In-process store ranking entries by shared-term count.
#[derive(Default)]
pub struct InMemoryContextStore {
    entries: RwLock<Vec<MemoryEntry>>,
}

impl InMemoryContextStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn terms(text: &str) -> HashSet<String> {
    text.split(|c: char| !c.is_alphanumeric() && c != '_')
        .filter(|t| t.len() > 2)
        .map(|t| t.to_lowercase())
        .collect()
}

#[async_trait]
impl ContextMemory for InMemoryContextStore {
    async fn save(&self, entry: MemoryEntry) -> Result<(), MemoryError> {
        self.entries.write().await.push(entry);
        Ok(())
    }

    async fn search(&self, query: &str, limit: usize) -> Result<Vec<MemoryEntry>, MemoryError> {
        let wanted = terms(query);
        let entries = self.entries.read().await;

        let mut scored: Vec<(usize, usize)> = entries
            .iter()
            .enumerate()
            .map(|(idx, entry)| {
                let have = terms(&entry.content);
                (wanted.intersection(&have).count(), idx)
            })
            .filter(|(score, _)| *score > 0)
            .collect();

        if scored.is_empty() {
            return Ok(entries.iter().take(limit).cloned().collect());
        }

        // Stable sort keeps insertion order among equal scores.
        scored.sort_by(|a, b| b.0.cmp(&a.0));
        Ok(scored
            .into_iter()
            .take(limit)
            .map(|(_, idx)| entries[idx].clone())
            .collect())
    }

    async fn len(&self) -> usize {
        self.entries.read().await.len()
    }
}
