//! docqa-hybrid
//!
//! Weighted fusion of dense and lexical relevance, followed by optional
//! cross-encoder reranking.

pub mod reranker;
pub mod retriever;

pub use reranker::Reranker;
pub use retriever::{fuse_scores, normalize_bm25_scores, normalize_vector_scores, HybridRetriever};
