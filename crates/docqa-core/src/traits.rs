//! Collaborator interfaces consumed by the core.
//!
//! Model and transport failures are opaque to the core, so these traits speak
//! `anyhow::Result`; the owning component maps failures into
//! [`crate::error::Error`].

use std::path::Path;
use std::time::Duration;

use crate::types::Chunk;

/// Sentence encoder producing fixed-dimension vectors.
pub trait Embedder: Send + Sync {
    fn dim(&self) -> usize;
    fn max_len(&self) -> usize;
    fn embed_batch(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>>;
}

/// Dense index searched by squared L2 distance. Row ids are insertion order.
pub trait VectorIndex: Send + Sync {
    fn dim(&self) -> usize;
    fn row_count(&self) -> usize;
    fn add(&mut self, vectors: &[Vec<f32>]) -> anyhow::Result<()>;
    /// Up to `k` nearest rows as parallel `(distances, ids)`, closest first.
    fn search(&self, query: &[f32], k: usize) -> anyhow::Result<(Vec<f32>, Vec<usize>)>;
}

/// Bag-of-terms relevance over a corpus, rebuilt wholesale on every change.
pub trait LexicalIndex: Send + Sync {
    fn build(corpus: &[String]) -> anyhow::Result<Self>
    where
        Self: Sized;
    fn len(&self) -> usize;
    fn is_empty(&self) -> bool { self.len() == 0 }
    /// One score per corpus document, in corpus order.
    fn scores(&self, query_terms: &[String]) -> anyhow::Result<Vec<f32>>;
}

/// Joint (query, passage) relevance model, e.g. a cross-encoder.
pub trait RelevanceScorer: Send + Sync {
    fn predict(&self, pairs: &[(String, String)]) -> anyhow::Result<Vec<f32>>;
}

/// Language-model completion endpoint. May fail; callers wrap it with retry.
pub trait GenerationBackend: Send + Sync {
    fn complete(
        &self,
        system_prompt: &str,
        user_prompt: &str,
        temperature: f32,
        max_tokens: u32,
    ) -> anyhow::Result<String>;
}

/// String key/value store with per-entry expiry.
pub trait KeyValueCache: Send + Sync {
    fn get(&self, key: &str) -> anyhow::Result<Option<String>>;
    fn set_with_expiry(&self, key: &str, ttl: Duration, value: &str) -> anyhow::Result<()>;
}

/// Produces chunks from a file. Every chunk has non-empty content and a
/// `source` metadata entry.
pub trait DocumentSource {
    fn load(&self, path: &Path) -> crate::error::Result<Vec<Chunk>>;
}
