//! Persistent document store: vector index, ordered documents, lexical index.
//!
//! Writers serialize on a single mutex for the whole embed, append, rebuild
//! and persist sequence, and work on a staged copy. Readers take an
//! `Arc<Snapshot>` and never block on a writer; they see either the state
//! before an ingestion call or the state after it.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use anyhow::{anyhow, Context};
use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, warn};

use docqa_core::error::{Error, Result};
use docqa_core::traits::{Embedder, LexicalIndex, VectorIndex};
use docqa_core::types::{Chunk, Document};
use docqa_text::TantivyLexicalIndex;

use crate::flat::FlatL2Index;

pub const VECTORS_FILE: &str = "vectors.safetensors";
pub const DOCUMENTS_FILE: &str = "documents.json";

/// Immutable view of the store. `documents[i]` is row `i` of `vectors`.
pub struct Snapshot {
    vectors: FlatL2Index,
    documents: Vec<Document>,
    lexical: Option<TantivyLexicalIndex>,
}

impl Snapshot {
    fn empty(dim: usize) -> Self { Self { vectors: FlatL2Index::new(dim), documents: Vec::new(), lexical: None } }

    pub fn vectors(&self) -> &FlatL2Index { &self.vectors }

    pub fn documents(&self) -> &[Document] { &self.documents }

    /// `None` when the snapshot was built from an empty corpus.
    pub fn lexical(&self) -> Option<&dyn LexicalIndex> { self.lexical.as_ref().map(|l| l as &dyn LexicalIndex) }

    pub fn len(&self) -> usize { self.documents.len() }

    pub fn is_empty(&self) -> bool { self.documents.is_empty() }
}

pub struct IndexStore {
    dir: PathBuf,
    embedder: Arc<dyn Embedder>,
    writer: Mutex<()>,
    state: RwLock<Arc<Snapshot>>,
}

impl IndexStore {
    /// Open the store rooted at `dir`, loading persisted artifacts when they
    /// exist. Unreadable or inconsistent artifacts yield an empty store.
    pub fn open(dir: impl Into<PathBuf>, embedder: Arc<dyn Embedder>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|e| Error::Storage(format!("{}: {}", dir.display(), e)))?;
        let snapshot = match load_snapshot(&dir, embedder.dim()) {
            Ok(Some(snapshot)) => {
                info!("Loaded {} documents from {}", snapshot.len(), dir.display());
                snapshot
            }
            Ok(None) => {
                info!("No persisted index under {}, starting empty", dir.display());
                Snapshot::empty(embedder.dim())
            }
            Err(e) => {
                warn!("Failed to load index from {}: {:#}; starting empty", dir.display(), e);
                Snapshot::empty(embedder.dim())
            }
        };
        Ok(Self { dir, embedder, writer: Mutex::new(()), state: RwLock::new(Arc::new(snapshot)) })
    }

    pub fn dir(&self) -> &Path { &self.dir }

    pub fn embedder(&self) -> &Arc<dyn Embedder> { &self.embedder }

    pub fn dim(&self) -> usize { self.embedder.dim() }

    /// Current state. Holding the `Arc` pins it across concurrent ingestion.
    pub fn snapshot(&self) -> Arc<Snapshot> { self.state.read().clone() }

    pub fn len(&self) -> usize { self.snapshot().len() }

    pub fn is_empty(&self) -> bool { self.snapshot().is_empty() }

    /// Embed `chunks`, append them, rebuild the lexical index and persist.
    /// Nothing becomes visible unless every step succeeds.
    pub fn add_documents(&self, chunks: Vec<Chunk>) -> Result<usize> {
        if chunks.is_empty() { return Ok(0); }
        let _guard = self.writer.lock();
        let start = Instant::now();
        let current = self.snapshot();

        let texts: Vec<String> = chunks.iter().map(|c| c.content.clone()).collect();
        let embeddings = self.embedder.embed_batch(&texts).map_err(Error::compute)?;
        if embeddings.len() != chunks.len() {
            return Err(Error::Compute(format!("embedder returned {} vectors for {} chunks", embeddings.len(), chunks.len())));
        }

        let mut vectors = current.vectors.clone();
        vectors.add(&embeddings).map_err(Error::compute)?;
        let mut documents = current.documents.clone();
        documents.extend(chunks.into_iter().map(Document::from));
        let corpus: Vec<String> = documents.iter().map(|d| d.content.clone()).collect();
        let lexical = TantivyLexicalIndex::build(&corpus).map_err(Error::compute)?;

        persist(&self.dir, &vectors, &documents).map_err(Error::storage)?;

        let added = documents.len() - current.documents.len();
        let total = documents.len();
        *self.state.write() = Arc::new(Snapshot { vectors, documents, lexical: Some(lexical) });
        info!("Added {} documents ({} total) in {:?}", added, total, start.elapsed());
        Ok(added)
    }

    /// Up to `k` nearest documents as `(squared distances, ids)`.
    pub fn search(&self, vector: &[f32], k: usize) -> Result<(Vec<f32>, Vec<usize>)> {
        self.snapshot().vectors.search(vector, k).map_err(Error::compute)
    }

    /// One lexical score per document; all zero when nothing is indexed.
    pub fn lexical_scores(&self, query_terms: &[String]) -> Result<Vec<f32>> {
        let snapshot = self.snapshot();
        match snapshot.lexical() {
            Some(lexical) => lexical.scores(query_terms).map_err(Error::compute),
            None => Ok(vec![0.0; snapshot.len()]),
        }
    }

    pub fn all_documents(&self) -> Vec<Document> { self.snapshot().documents.clone() }

    /// Rewrite the persisted artifacts from the current state.
    pub fn flush(&self) -> Result<()> {
        let _guard = self.writer.lock();
        let snapshot = self.snapshot();
        if snapshot.is_empty() { return Ok(()); }
        persist(&self.dir, &snapshot.vectors, &snapshot.documents).map_err(Error::storage)?;
        debug!("Flushed {} documents to {}", snapshot.len(), self.dir.display());
        Ok(())
    }
}

fn persist(dir: &Path, vectors: &FlatL2Index, documents: &[Document]) -> anyhow::Result<()> {
    let vectors_path = dir.join(VECTORS_FILE);
    let documents_path = dir.join(DOCUMENTS_FILE);
    let vectors_tmp = dir.join(format!("{}.tmp", VECTORS_FILE));
    let documents_tmp = dir.join(format!("{}.tmp", DOCUMENTS_FILE));
    vectors.save(&vectors_tmp).with_context(|| format!("writing {}", vectors_tmp.display()))?;
    fs::write(&documents_tmp, serde_json::to_vec(documents)?).with_context(|| format!("writing {}", documents_tmp.display()))?;
    fs::rename(&vectors_tmp, &vectors_path)?;
    fs::rename(&documents_tmp, &documents_path)?;
    Ok(())
}

fn load_snapshot(dir: &Path, dim: usize) -> anyhow::Result<Option<Snapshot>> {
    let vectors_path = dir.join(VECTORS_FILE);
    let documents_path = dir.join(DOCUMENTS_FILE);
    if !vectors_path.exists() && !documents_path.exists() { return Ok(None); }
    let mut vectors = FlatL2Index::load(&vectors_path)?;
    let documents: Vec<Document> = serde_json::from_slice(&fs::read(&documents_path)?)?;
    if vectors.dim() != dim {
        return Err(anyhow!("persisted vectors have dimension {}, embedder has {}", vectors.dim(), dim));
    }
    // Vectors are renamed into place first, so an interrupted persist leaves
    // trailing rows with no documents. Those rows were never published.
    if vectors.row_count() > documents.len() {
        warn!("{} vectors but {} documents; dropping the unmatched tail", vectors.row_count(), documents.len());
        vectors.truncate(documents.len());
    }
    if vectors.row_count() != documents.len() {
        return Err(anyhow!("{} vectors but {} documents", vectors.row_count(), documents.len()));
    }
    let lexical = if documents.is_empty() {
        None
    } else {
        let corpus: Vec<String> = documents.iter().map(|d| d.content.clone()).collect();
        Some(TantivyLexicalIndex::build(&corpus)?)
    };
    Ok(Some(Snapshot { vectors, documents, lexical }))
}
