//! Context block and prompt templates.

use docqa_core::config::RetrievalSettings;
use docqa_core::types::RetrievalResult;

pub const INSUFFICIENT_EVIDENCE: &str = "Insufficient evidence found in documents.";

pub struct PromptBuilder {
    max_chunks: usize,
    max_chars_per_chunk: usize,
}

impl Default for PromptBuilder {
    fn default() -> Self { Self { max_chunks: 5, max_chars_per_chunk: 1200 } }
}

impl PromptBuilder {
    pub fn new(max_chunks: usize, max_chars_per_chunk: usize) -> Self { Self { max_chunks, max_chars_per_chunk } }

    pub fn from_settings(settings: &RetrievalSettings) -> Self { Self::new(settings.max_context_chunks, settings.max_chars_per_chunk) }

    pub fn max_chunks(&self) -> usize { self.max_chunks }

    /// `[Source k] <text>` blocks in rank order, separated by a blank line.
    pub fn build_context(&self, results: &[RetrievalResult]) -> String {
        results
            .iter()
            .take(self.max_chunks)
            .enumerate()
            .map(|(i, r)| format!("[Source {}] {}", i + 1, self.clean(&r.content)))
            .collect::<Vec<_>>()
            .join("\n\n")
    }

    fn clean(&self, content: &str) -> String {
        let collapsed = content.split([' ', '\n']).filter(|w| !w.is_empty()).collect::<Vec<_>>().join(" ");
        collapsed.chars().take(self.max_chars_per_chunk).collect()
    }

    pub fn build_prompt(query: &str, context: &str) -> String {
        if context.is_empty() {
            return format!(
                "There is no supporting context for this question.\n\n\
                 Question:\n{query}\n\n\
                 Reply with exactly this sentence and nothing else:\n{INSUFFICIENT_EVIDENCE}\n"
            );
        }
        format!(
            "You answer questions about a private document collection.\n\n\
             Follow these rules without exception:\n\
             1. Use only the context below.\n\
             2. Do not rely on prior knowledge.\n\
             3. Cite every factual claim with its source label, e.g. [Source 1].\n\
             4. If the context does not clearly answer the question, reply with exactly:\n\
             {INSUFFICIENT_EVIDENCE}\n\n\
             Context:\n{context}\n\n\
             Question:\n{query}\n\n\
             Answer:\n"
        )
    }
}
