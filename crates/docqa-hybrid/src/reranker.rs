//! Cross-encoder reranking with a fail-open fallback.

use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, warn};

use docqa_core::traits::RelevanceScorer;
use docqa_core::types::{assign_ranks, RetrievalResult};

pub struct Reranker {
    scorer: Option<Arc<dyn RelevanceScorer>>,
    batch_size: usize,
}

impl Reranker {
    pub fn new(scorer: Option<Arc<dyn RelevanceScorer>>, batch_size: usize) -> Self {
        Self { scorer, batch_size: batch_size.max(1) }
    }

    pub fn is_available(&self) -> bool { self.scorer.is_some() }

    /// Reorder `candidates` by joint relevance to `query`, highest first.
    ///
    /// Without a scorer, or if scoring fails, candidates come back untouched
    /// with their original ranks.
    pub fn rerank(&self, query: &str, candidates: Vec<RetrievalResult>) -> Vec<RetrievalResult> {
        if candidates.is_empty() { return candidates; }
        let Some(scorer) = &self.scorer else { return candidates };
        let start = Instant::now();
        let scores = match self.score(scorer.as_ref(), query, &candidates) {
            Ok(scores) => scores,
            Err(e) => {
                warn!("Reranker scoring failed, keeping retrieval order: {:#}", e);
                return candidates;
            }
        };
        let mut scored: Vec<(RetrievalResult, f32)> = candidates.into_iter().zip(scores).collect();
        scored.sort_by(|a, b| b.1.total_cmp(&a.1));
        let mut results: Vec<RetrievalResult> = scored
            .into_iter()
            .map(|(mut r, s)| {
                r.score = s as f64;
                r
            })
            .collect();
        assign_ranks(&mut results);
        debug!("Reranked {} candidates in {:?}", results.len(), start.elapsed());
        results
    }

    fn score(&self, scorer: &dyn RelevanceScorer, query: &str, candidates: &[RetrievalResult]) -> anyhow::Result<Vec<f32>> {
        let mut scores = Vec::with_capacity(candidates.len());
        for batch in candidates.chunks(self.batch_size) {
            let pairs: Vec<(String, String)> = batch.iter().map(|c| (query.to_string(), c.content.clone())).collect();
            let batch_scores = scorer.predict(&pairs)?;
            if batch_scores.len() != pairs.len() {
                anyhow::bail!("scorer returned {} scores for {} pairs", batch_scores.len(), pairs.len());
            }
            scores.extend(batch_scores);
        }
        Ok(scores)
    }
}
