//! docqa-vector
//!
//! Dense vector index and the [`IndexStore`] that keeps it in lockstep with
//! the document sequence and the lexical index.

pub mod flat;
pub mod store;

pub use flat::FlatL2Index;
pub use store::{IndexStore, Snapshot, DOCUMENTS_FILE, VECTORS_FILE};
