use anyhow::Result;
use tantivy::collector::TopDocs;
use tantivy::query::{BooleanQuery, Occur, Query, TermQuery};
use tantivy::schema::{IndexRecordOption, Value};
use tantivy::{doc, Index, IndexReader, IndexWriter, ReloadPolicy, TantivyDocument, Term};
use tracing::debug;

use docqa_core::traits::LexicalIndex;

use crate::tantivy_utils::{build_schema, query_terms, register_tokenizer, LexicalFields};

const WRITER_BUDGET: usize = 50_000_000;

/// BM25 over a frozen corpus. Scores come back aligned with the corpus order
/// the index was built from; documents matching no query term score 0.
pub struct TantivyLexicalIndex {
	reader: IndexReader,
	fields: LexicalFields,
	len: usize,
}

impl TantivyLexicalIndex {
	pub fn new(corpus: &[String]) -> Result<Self> {
		let (schema, fields) = build_schema();
		let index = Index::create_in_ram(schema);
		register_tokenizer(&index);
		let mut index_writer: IndexWriter = index.writer_with_num_threads(1, WRITER_BUDGET)?;
		for (i, text) in corpus.iter().enumerate() {
			index_writer.add_document(doc!(
				fields.doc_idx => i as u64,
				fields.text => text.as_str(),
			))?;
		}
		index_writer.commit()?;
		let reader = index.reader_builder().reload_policy(ReloadPolicy::Manual).try_into()?;
		debug!("Built lexical index over {} documents", corpus.len());
		Ok(Self { reader, fields, len: corpus.len() })
	}

	fn query_for(&self, terms: &[String]) -> BooleanQuery {
		let clauses: Vec<(Occur, Box<dyn Query>)> = terms
			.iter()
			.map(|t| {
				let term = Term::from_field_text(self.fields.text, t);
				(Occur::Should, Box::new(TermQuery::new(term, IndexRecordOption::WithFreqs)) as Box<dyn Query>)
			})
			.collect();
		BooleanQuery::new(clauses)
	}
}

impl LexicalIndex for TantivyLexicalIndex {
	fn build(corpus: &[String]) -> Result<Self> { Self::new(corpus) }

	fn len(&self) -> usize { self.len }

	fn scores(&self, query_tokens: &[String]) -> Result<Vec<f32>> {
		let mut scores = vec![0f32; self.len];
		if self.len == 0 || query_tokens.is_empty() { return Ok(scores); }
		let searcher = self.reader.searcher();
		let query = self.query_for(query_tokens);
		let top_docs = searcher.search(&query, &TopDocs::with_limit(self.len))?;
		for (score, addr) in top_docs {
			let doc: TantivyDocument = searcher.doc(addr)?;
			if let Some(idx) = doc.get_first(self.fields.doc_idx).and_then(|v| v.as_u64()) {
				if let Some(slot) = scores.get_mut(idx as usize) { *slot = score; }
			}
		}
		Ok(scores)
	}
}

/// Convenience for callers holding raw query text.
pub fn score_query(index: &dyn LexicalIndex, query: &str) -> Result<Vec<f32>> {
	index.scores(&query_terms(query))
}
