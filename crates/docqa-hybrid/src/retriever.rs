use std::time::Instant;

use tracing::debug;

use docqa_core::error::{Error, Result};
use docqa_core::traits::{Embedder, LexicalIndex, VectorIndex};
use docqa_core::types::{assign_ranks, Document, RetrievalResult};
use docqa_text::index::score_query;
use docqa_vector::IndexStore;

/// Map candidate distances to similarities in `[0, 1]` as `1 - d / max`.
///
/// When every candidate sits at the same distance (including all zero) there
/// is nothing to tell them apart, and each gets 1.0.
pub fn normalize_vector_scores(distances: &[f32]) -> Vec<f64> {
    let Some(first) = distances.first() else { return Vec::new() };
    if distances.iter().all(|d| d == first) { return vec![1.0; distances.len()]; }
    let max = distances.iter().copied().fold(f32::MIN, f32::max) as f64;
    distances.iter().map(|&d| 1.0 - d as f64 / max).collect()
}

/// Divide by the corpus maximum; all zero when nothing matched.
pub fn normalize_bm25_scores(scores: &[f32]) -> Vec<f64> {
    let max = scores.iter().copied().fold(0f32, f32::max) as f64;
    if max <= 0.0 { return vec![0.0; scores.len()]; }
    scores.iter().map(|&s| s as f64 / max).collect()
}

/// `alpha * semantic[i] + (1 - alpha) * lexical[i]` over every document.
pub fn fuse_scores(semantic: &[f64], lexical: &[f64], alpha: f64) -> Vec<f64> {
    semantic.iter().zip(lexical).map(|(s, l)| alpha * s + (1.0 - alpha) * l).collect()
}

/// Document indices ordered by score descending; equal scores keep corpus order.
pub fn rank_indices(combined: &[f64], top_k: usize) -> Vec<usize> {
    let mut order: Vec<usize> = (0..combined.len()).collect();
    order.sort_by(|&a, &b| combined[b].total_cmp(&combined[a]));
    order.truncate(top_k);
    order
}

pub struct HybridRetriever {
    candidate_multiplier: usize,
}

impl Default for HybridRetriever {
    fn default() -> Self { Self { candidate_multiplier: 3 } }
}

impl HybridRetriever {
    /// `candidate_multiplier * top_k` nearest neighbours are scored semantically.
    pub fn new(candidate_multiplier: usize) -> Self { Self { candidate_multiplier: candidate_multiplier.max(1) } }

    /// Retrieve against one consistent snapshot of `store`.
    pub fn search(&self, query: &str, store: &IndexStore, top_k: usize, alpha: f64) -> Result<Vec<RetrievalResult>> {
        let snapshot = store.snapshot();
        self.search_with(query, store.embedder().as_ref(), snapshot.vectors(), snapshot.documents(), snapshot.lexical(), top_k, alpha)
    }

    pub fn search_with(
        &self,
        query: &str,
        embedder: &dyn Embedder,
        vectors: &dyn VectorIndex,
        documents: &[Document],
        lexical: Option<&dyn LexicalIndex>,
        top_k: usize,
        alpha: f64,
    ) -> Result<Vec<RetrievalResult>> {
        let n = documents.len();
        if n == 0 || top_k == 0 { return Ok(Vec::new()); }
        let start = Instant::now();

        let query_vec = embedder
            .embed_batch(&[query.to_string()])
            .map_err(Error::compute)?
            .into_iter()
            .next()
            .ok_or_else(|| Error::Compute("embedder returned no vector for the query".to_string()))?;
        let k = (top_k * self.candidate_multiplier).min(n);
        let (distances, ids) = vectors.search(&query_vec, k).map_err(Error::compute)?;
        let mut semantic = vec![0.0f64; n];
        for (id, sim) in ids.into_iter().zip(normalize_vector_scores(&distances)) {
            if let Some(slot) = semantic.get_mut(id) { *slot = sim; }
        }

        let raw_lexical = match lexical {
            Some(index) => score_query(index, query).map_err(Error::compute)?,
            None => vec![0.0; n],
        };
        if raw_lexical.len() != n {
            return Err(Error::Compute(format!("lexical index covers {} documents, corpus has {}", raw_lexical.len(), n)));
        }
        let lexical = normalize_bm25_scores(&raw_lexical);

        let combined = fuse_scores(&semantic, &lexical, alpha);
        let mut results: Vec<RetrievalResult> = rank_indices(&combined, top_k)
            .into_iter()
            .map(|i| RetrievalResult { rank: 0, score: combined[i], content: documents[i].content.clone(), doc: i })
            .collect();
        assign_ranks(&mut results);
        debug!("Hybrid retrieval over {} documents ({} candidates) in {:?}", n, k, start.elapsed());
        Ok(results)
    }
}
