use tantivy::schema::{Field, IndexRecordOption, Schema, TextFieldIndexing, TextOptions, STORED};
use tantivy::tokenizer::{LowerCaser, TextAnalyzer, WhitespaceTokenizer};
use tantivy::Index;

pub const TERMS_TOKENIZER: &str = "docqa_terms";

pub struct LexicalFields {
	pub doc_idx: Field,
	pub text: Field,
}

/// `doc_idx` is the position in the document sequence; `text` is indexed with
/// term frequencies so BM25 can score it.
pub fn build_schema() -> (Schema, LexicalFields) {
	let mut schema_builder = Schema::builder();
	let doc_idx = schema_builder.add_u64_field("doc_idx", STORED);
	let text_field_indexing = TextFieldIndexing::default().set_tokenizer(TERMS_TOKENIZER).set_index_option(IndexRecordOption::WithFreqs);
	let text_options = TextOptions::default().set_indexing_options(text_field_indexing);
	let text = schema_builder.add_text_field("text", text_options);
	(schema_builder.build(), LexicalFields { doc_idx, text })
}

/// Lowercased whitespace tokens, no stemming and no stop words, so indexed
/// terms line up with `query.to_lowercase().split_whitespace()`.
pub fn register_tokenizer(index: &Index) {
	let tokenizer = TextAnalyzer::builder(WhitespaceTokenizer::default())
		.filter(LowerCaser)
		.build();
	index.tokenizers().register(TERMS_TOKENIZER, tokenizer);
}

/// Split a query the same way documents are tokenized.
pub fn query_terms(query: &str) -> Vec<String> {
	query.to_lowercase().split_whitespace().map(str::to_string).collect()
}
