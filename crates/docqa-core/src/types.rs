//! Domain types used by the index, retrieval and answering crates.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

pub type Meta = HashMap<String, String>;

/// Row index shared by the document sequence and the vector index.
pub type DocumentRef = usize;

pub const SOURCE_KEY: &str = "source";

/// A unit of ingested text. Immutable once created.
///
/// `metadata` carries at least `source` (file name or URL) when produced by a
/// `DocumentSource`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub content: String,
    #[serde(default)]
    pub metadata: Meta,
}

impl Chunk {
    pub fn new(content: impl Into<String>, source: impl Into<String>) -> Self {
        let mut metadata = Meta::new();
        metadata.insert(SOURCE_KEY.to_string(), source.into());
        Self { content: content.into(), metadata }
    }

    pub fn with_meta(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn source(&self) -> Option<&str> { self.metadata.get(SOURCE_KEY).map(String::as_str) }
}

/// Persisted form of a [`Chunk`].
///
/// Position `i` in the document sequence is row `i` of the vector index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub content: String,
    #[serde(default)]
    pub metadata: Meta,
}

impl From<Chunk> for Document {
    fn from(chunk: Chunk) -> Self { Self { content: chunk.content, metadata: chunk.metadata } }
}

impl Document {
    pub fn source(&self) -> Option<&str> { self.metadata.get(SOURCE_KEY).map(String::as_str) }
}

/// One ranked candidate produced by a retrieval or rerank stage.
///
/// `rank` is 1-based and contiguous; whichever stage last reordered the
/// sequence assigned it. Higher `score` is better.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievalResult {
    pub rank: usize,
    pub score: f64,
    pub content: String,
    pub doc: DocumentRef,
}

/// Externally observable result of one query.
///
/// Every field defaults so that cache entries written by older releases,
/// which may lack `contexts` or `latency`, still deserialize.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PipelineResponse {
    #[serde(default)]
    pub answer: String,
    #[serde(default)]
    pub contexts: Vec<String>,
    #[serde(default)]
    pub latency: f64,
}

impl PipelineResponse {
    pub fn sentinel(answer: &str, latency: f64) -> Self {
        Self { answer: answer.to_string(), contexts: Vec::new(), latency }
    }
}

/// Reassign contiguous 1-based ranks in sequence order.
pub fn assign_ranks(results: &mut [RetrievalResult]) {
    for (i, r) in results.iter_mut().enumerate() { r.rank = i + 1; }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn legacy_response_backfills_missing_fields() {
        let parsed: PipelineResponse = serde_json::from_str(r#"{"answer":"cached"}"#).unwrap();
        assert_eq!(parsed.answer, "cached");
        assert!(parsed.contexts.is_empty());
        assert_eq!(parsed.latency, 0.0);
    }

    #[test]
    fn chunk_carries_source() {
        let c = Chunk::new("Revenue grew 20% in 2023.", "report.pdf");
        assert_eq!(c.source(), Some("report.pdf"));
        let d = Document::from(c);
        assert_eq!(d.source(), Some("report.pdf"));
    }
}
