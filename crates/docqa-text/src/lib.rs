//! docqa-text
//!
//! Tantivy-based lexical scoring. The index lives in RAM and is rebuilt from
//! the full document sequence whenever the corpus changes.

pub mod index;
pub mod tantivy_utils;

pub use index::TantivyLexicalIndex;
