//! Query orchestration and ingestion entry points.
//!
//! A query walks cache check, corpus check, moderation, retrieval, confidence
//! gate, rerank, context extraction, prompt, generation and output checks.
//! Each early exit answers with a fixed sentence and no contexts.

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{debug, error, info, warn};

use docqa_core::config::{expand_path, OutputPolicy, Settings};
use docqa_core::data_processor::{ChunkingConfig, TextFileSource};
use docqa_core::error::{Error, Result};
use docqa_core::traits::{DocumentSource, GenerationBackend, KeyValueCache, RelevanceScorer};
use docqa_core::types::{Chunk, PipelineResponse, RetrievalResult};
use docqa_hybrid::{HybridRetriever, Reranker};
use docqa_vector::IndexStore;

use crate::cache::{MokaCache, ResponseCache};
use crate::generation::{round_secs, CancellationToken, GenerateOptions, GenerationClient, OpenAiChatBackend, MODEL_UNAVAILABLE};
use crate::guardrails::GuardrailEngine;
use crate::prompt::{PromptBuilder, INSUFFICIENT_EVIDENCE};

pub const NO_DOCUMENTS: &str = "No documents indexed.";
pub const NO_RELEVANT_CONTEXT: &str = "No relevant context found.";
pub const NO_RERANKED_RESULTS: &str = "No relevant context after reranking.";
pub const NO_USABLE_CONTEXT: &str = "No usable context found.";
pub const NO_ANSWER: &str = "No answer generated.";
pub const INPUT_REJECTED: &str = "Query rejected by content policy.";

const MISSING_CITATION_NOTE: &str = "[Unverified: missing citation]";
const UNGROUNDED_NUMBERS_NOTE: &str = "[Unverified: numbers not found in sources]";
const RETRY_REMINDER: &str = "\n\nReminder: cite every claim as [Source n] and only use numbers that appear in the context.";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Status {
    pub documents: usize,
    pub dim: usize,
    pub reranker_available: bool,
    pub cache_enabled: bool,
}

pub struct Pipeline {
    store: Arc<IndexStore>,
    source: TextFileSource,
    retriever: HybridRetriever,
    reranker: Reranker,
    guardrails: GuardrailEngine,
    prompts: PromptBuilder,
    generator: GenerationClient,
    cache: ResponseCache,
    settings: Settings,
}

pub struct PipelineBuilder {
    store: Arc<IndexStore>,
    backend: Arc<dyn GenerationBackend>,
    scorer: Option<Arc<dyn RelevanceScorer>>,
    cache: Option<Arc<dyn KeyValueCache>>,
    settings: Settings,
}

impl PipelineBuilder {
    pub fn settings(mut self, settings: Settings) -> Self {
        self.settings = settings;
        self
    }

    pub fn scorer(mut self, scorer: Option<Arc<dyn RelevanceScorer>>) -> Self {
        self.scorer = scorer;
        self
    }

    pub fn cache(mut self, cache: Option<Arc<dyn KeyValueCache>>) -> Self {
        self.cache = cache;
        self
    }

    pub fn build(self) -> Pipeline {
        let s = self.settings;
        let source = TextFileSource::with_chunking(ChunkingConfig { chunk_size: s.data.chunk_size, chunk_overlap: s.data.chunk_overlap });
        Pipeline {
            store: self.store,
            source,
            retriever: HybridRetriever::new(s.retrieval.candidate_multiplier),
            reranker: Reranker::new(self.scorer, s.rerank.batch_size),
            guardrails: GuardrailEngine::from_settings(&s.guardrails),
            prompts: PromptBuilder::from_settings(&s.retrieval),
            generator: GenerationClient::from_settings(self.backend, &s.generation),
            cache: ResponseCache::new(self.cache, Duration::from_secs(s.cache.ttl_secs)),
            settings: s,
        }
    }
}

impl Pipeline {
    /// Start from default settings with no reranker and no cache.
    pub fn builder(store: Arc<IndexStore>, backend: Arc<dyn GenerationBackend>) -> PipelineBuilder {
        PipelineBuilder { store, backend, scorer: None, cache: None, settings: Settings::default() }
    }

    /// Wire every component from configuration: embedding model, persisted
    /// store, optional cross-encoder, HTTP generation backend, in-process cache.
    pub fn from_settings(settings: &Settings) -> Result<Self> {
        settings.validate()?;
        let embedder = docqa_embed::get_default_embedder(&settings.embedding).map_err(|e| Error::InvalidConfig(format!("embedding model: {:#}", e)))?;
        let store = Arc::new(IndexStore::open(expand_path(&settings.data.dir), embedder)?);
        let scorer = docqa_embed::load_reranker(&settings.rerank);
        let backend: Arc<dyn GenerationBackend> = Arc::new(OpenAiChatBackend::new(&settings.generation)?);
        let cache: Option<Arc<dyn KeyValueCache>> =
            if settings.cache.enabled { Some(Arc::new(MokaCache::new(settings.cache.max_entries))) } else { None };
        Ok(Self::builder(store, backend).settings(settings.clone()).scorer(scorer).cache(cache).build())
    }

    pub fn store(&self) -> &Arc<IndexStore> { &self.store }

    pub fn status(&self) -> Status {
        Status {
            documents: self.store.len(),
            dim: self.store.dim(),
            reranker_available: self.reranker.is_available(),
            cache_enabled: self.cache.is_enabled(),
        }
    }

    pub fn ingest(&self, chunks: Vec<Chunk>) -> Result<usize> { self.store.add_documents(chunks) }

    /// Load a `.txt`/`.csv` file, or every supported file under a directory,
    /// and add the resulting chunks.
    pub fn ingest_file(&self, path: &Path) -> Result<usize> {
        let chunks = if path.is_dir() { self.source.load_dir(path)? } else { self.source.load(path)? };
        let added = self.ingest(chunks)?;
        info!("Ingested {} chunks from {}", added, path.display());
        Ok(added)
    }

    pub fn query(&self, question: &str) -> Result<PipelineResponse> { self.query_with(question, None) }

    /// As [`Pipeline::query`], with a token that aborts pending generation retries.
    pub fn query_with(&self, question: &str, cancel: Option<CancellationToken>) -> Result<PipelineResponse> {
        let start = Instant::now();
        let question = question.trim();

        if let Some(cached) = self.cache.get(question) { return Ok(cached); }

        let snapshot = self.store.snapshot();
        if snapshot.is_empty() {
            info!("Query answered without retrieval: no documents indexed");
            return Ok(PipelineResponse::sentinel(NO_DOCUMENTS, 0.0));
        }

        if self.settings.guardrails.moderation && !self.guardrails.moderate_input(question) {
            warn!("Query rejected by moderation");
            return Err(Error::InputRejected(INPUT_REJECTED.to_string()));
        }

        let r = &self.settings.retrieval;
        let results = self.retriever.search_with(
            question,
            self.store.embedder().as_ref(),
            snapshot.vectors(),
            snapshot.documents(),
            snapshot.lexical(),
            r.top_k,
            r.alpha,
        )?;
        if results.is_empty() {
            info!("Query stopped at retrieval: no results");
            return Ok(PipelineResponse::sentinel(NO_RELEVANT_CONTEXT, elapsed(start)));
        }
        if self.settings.guardrails.confidence_gate && !self.guardrails.confidence_gate(&results) {
            info!("Query stopped at confidence gate: top score {:.3}", results[0].score);
            return Ok(PipelineResponse::sentinel(NO_RELEVANT_CONTEXT, elapsed(start)));
        }

        let reranked = self.reranker.rerank(question, results);
        if reranked.is_empty() {
            info!("Query stopped at rerank: no results");
            return Ok(PipelineResponse::sentinel(NO_RERANKED_RESULTS, elapsed(start)));
        }

        let usable: Vec<RetrievalResult> =
            reranked.into_iter().take(self.prompts.max_chunks()).filter(|c| !c.content.is_empty()).collect();
        if usable.is_empty() {
            info!("Query stopped at context extraction: all top results empty");
            return Ok(PipelineResponse::sentinel(NO_USABLE_CONTEXT, elapsed(start)));
        }
        let contexts: Vec<String> = usable.iter().map(|c| c.content.clone()).collect();

        let context = self.prompts.build_context(&usable);
        let prompt = PromptBuilder::build_prompt(question, &context);
        let options = self.generate_options(start, cancel);
        let answer = self.answer(&prompt, &options);
        let answer = self.enforce_output_policy(answer, &prompt, &context, &options);

        let response = PipelineResponse { answer, contexts, latency: elapsed(start) };
        self.cache.put(question, &response);
        debug!("Query answered in {:.3}s", response.latency);
        Ok(response)
    }

    fn generate_options(&self, start: Instant, cancel: Option<CancellationToken>) -> GenerateOptions {
        let g = &self.settings.generation;
        GenerateOptions {
            temperature: g.temperature,
            max_tokens: g.max_tokens,
            deadline: g.deadline_secs.map(|secs| start + Duration::from_secs(secs)),
            cancel,
        }
    }

    fn answer(&self, prompt: &str, options: &GenerateOptions) -> String {
        match self.generator.try_generate(prompt, options) {
            Ok(generation) if generation.text.trim().is_empty() => NO_ANSWER.to_string(),
            Ok(generation) => generation.text,
            Err(e) => {
                error!("Answering with fallback: {}", e);
                MODEL_UNAVAILABLE.to_string()
            }
        }
    }

    fn enforce_output_policy(&self, answer: String, prompt: &str, context: &str, options: &GenerateOptions) -> String {
        if is_fallback(&answer) { return answer; }
        let verdict = self.guardrails.check_answer(&answer, context);
        if verdict.passed() { return answer; }
        match self.settings.guardrails.output_policy {
            OutputPolicy::Advisory => {
                warn!("Answer failed output checks (cited={}, numbers_grounded={})", verdict.cited, verdict.numbers_grounded);
                answer
            }
            OutputPolicy::Annotate => {
                let mut annotated = answer;
                if !verdict.cited { annotated.push_str(&format!("\n\n{}", MISSING_CITATION_NOTE)); }
                if !verdict.numbers_grounded { annotated.push_str(&format!("\n\n{}", UNGROUNDED_NUMBERS_NOTE)); }
                annotated
            }
            OutputPolicy::Reject => {
                info!("Answer rejected by output checks");
                INSUFFICIENT_EVIDENCE.to_string()
            }
            OutputPolicy::Retry => {
                info!("Regenerating after failed output checks");
                self.answer(&format!("{}{}", prompt, RETRY_REMINDER), options)
            }
        }
    }
}

fn is_fallback(answer: &str) -> bool { [INSUFFICIENT_EVIDENCE, MODEL_UNAVAILABLE, NO_ANSWER].contains(&answer.trim()) }

fn elapsed(start: Instant) -> f64 { round_secs(start.elapsed()) }
