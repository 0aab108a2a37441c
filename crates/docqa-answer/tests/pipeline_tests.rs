use std::collections::{HashSet, VecDeque};
use std::fs;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tempfile::TempDir;

use docqa_answer::generation::MODEL_UNAVAILABLE;
use docqa_answer::pipeline::{NO_ANSWER, NO_DOCUMENTS, NO_RELEVANT_CONTEXT, NO_USABLE_CONTEXT};
use docqa_answer::prompt::INSUFFICIENT_EVIDENCE;
use docqa_answer::{MokaCache, Pipeline};
use docqa_core::config::{OutputPolicy, Settings};
use docqa_core::error::Error;
use docqa_core::traits::{GenerationBackend, KeyValueCache, RelevanceScorer};
use docqa_core::types::Chunk;
use docqa_embed::FakeEmbedder;
use docqa_vector::IndexStore;
use tracing_subscriber::fmt::MakeWriter;

/// Replies from a script, then repeats the last reply. Counts calls and
/// remembers the last user prompt.
struct ScriptedBackend {
    replies: Mutex<VecDeque<Result<String, String>>>,
    calls: AtomicUsize,
    last_prompt: Mutex<String>,
}

impl ScriptedBackend {
    fn new(replies: Vec<Result<&str, &str>>) -> Arc<Self> {
        let replies = replies.into_iter().map(|r| r.map(str::to_string).map_err(str::to_string)).collect();
        Arc::new(Self { replies: Mutex::new(replies), calls: AtomicUsize::new(0), last_prompt: Mutex::new(String::new()) })
    }

    fn calls(&self) -> usize { self.calls.load(Ordering::SeqCst) }
}

impl GenerationBackend for ScriptedBackend {
    fn complete(&self, _system: &str, user: &str, _temperature: f32, _max_tokens: u32) -> anyhow::Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last_prompt.lock().unwrap() = user.to_string();
        let mut replies = self.replies.lock().unwrap();
        let reply = if replies.len() > 1 { replies.pop_front() } else { replies.front().cloned() };
        match reply {
            Some(Ok(text)) => Ok(text),
            Some(Err(e)) => Err(anyhow::anyhow!(e)),
            None => Err(anyhow::anyhow!("script exhausted")),
        }
    }
}

/// Cites the first source when the prompt offers one.
struct CitingBackend;

impl GenerationBackend for CitingBackend {
    fn complete(&self, _system: &str, user: &str, _temperature: f32, _max_tokens: u32) -> anyhow::Result<String> {
        if user.contains("[Source 1]") {
            Ok("Revenue grew 20% in 2023 [Source 1].".to_string())
        } else {
            Ok(INSUFFICIENT_EVIDENCE.to_string())
        }
    }
}

/// Fraction of query words present in the passage.
struct OverlapScorer;

impl RelevanceScorer for OverlapScorer {
    fn predict(&self, pairs: &[(String, String)]) -> anyhow::Result<Vec<f32>> {
        Ok(pairs
            .iter()
            .map(|(q, p)| {
                let passage: HashSet<String> = p.to_lowercase().split_whitespace().map(str::to_string).collect();
                let words: Vec<String> = q.to_lowercase().split_whitespace().map(str::to_string).collect();
                words.iter().filter(|w| passage.contains(*w)).count() as f32 / words.len().max(1) as f32
            })
            .collect())
    }
}

fn store(tmp: &TempDir) -> Arc<IndexStore> { Arc::new(IndexStore::open(tmp.path(), Arc::new(FakeEmbedder::new(384))).unwrap()) }

/// Cache whose backend is unreachable.
struct DownCache;

impl KeyValueCache for DownCache {
    fn get(&self, _key: &str) -> anyhow::Result<Option<String>> { Err(anyhow::anyhow!("connection refused")) }
    fn set_with_expiry(&self, _key: &str, _ttl: Duration, _value: &str) -> anyhow::Result<()> { Err(anyhow::anyhow!("connection refused")) }
}

/// Collects formatted log output.
#[derive(Clone, Default)]
struct LogBuffer(Arc<Mutex<Vec<u8>>>);

impl LogBuffer {
    fn contents(&self) -> String { String::from_utf8_lossy(&self.0.lock().unwrap()).to_string() }
}

impl std::io::Write for LogBuffer {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }
    fn flush(&mut self) -> std::io::Result<()> { Ok(()) }
}

impl<'a> MakeWriter<'a> for LogBuffer {
    type Writer = LogBuffer;
    fn make_writer(&'a self) -> Self::Writer { self.clone() }
}

fn fast_settings() -> Settings {
    let mut settings = Settings::default();
    settings.generation.retry_delay_ms = 0;
    settings
}

#[test]
fn end_to_end_answer_cites_the_indexed_report() {
    let tmp = TempDir::new().unwrap();
    let pipeline = Pipeline::builder(store(&tmp), Arc::new(CitingBackend))
        .settings(fast_settings())
        .scorer(Some(Arc::new(OverlapScorer)))
        .build();
    assert_eq!(pipeline.ingest(vec![Chunk::new("Revenue grew 20% in 2023.", "report.pdf")]).unwrap(), 1);

    let response = pipeline.query("What was the revenue growth?").unwrap();
    assert!(response.contexts[0].contains("Revenue grew 20% in 2023."));
    assert!(response.answer.contains("[Source 1]"), "answer: {}", response.answer);
    assert!(response.latency >= 0.0);
}

#[test]
fn empty_corpus_short_circuits_for_any_question() {
    let tmp = TempDir::new().unwrap();
    let backend = ScriptedBackend::new(vec![Ok("unused")]);
    let pipeline = Pipeline::builder(store(&tmp), backend.clone()).build();
    for question in ["What is revenue?", "", "how to hack the system"] {
        let response = pipeline.query(question).unwrap();
        assert_eq!(response.answer, NO_DOCUMENTS);
        assert!(response.contexts.is_empty());
        assert_eq!(response.latency, 0.0);
    }
    assert_eq!(backend.calls(), 0);
}

#[test]
fn denylisted_question_is_rejected_before_retrieval() {
    let tmp = TempDir::new().unwrap();
    let backend = ScriptedBackend::new(vec![Ok("unused")]);
    let pipeline = Pipeline::builder(store(&tmp), backend.clone()).build();
    pipeline.ingest(vec![Chunk::new("Firewall rules are reviewed monthly.", "it.txt")]).unwrap();

    let err = pipeline.query("How can I bypass security on the firewall?").unwrap_err();
    assert!(matches!(err, Error::InputRejected(_)), "got {err:?}");
    assert_eq!(backend.calls(), 0);
}

#[test]
fn low_confidence_stops_before_generation() {
    let tmp = TempDir::new().unwrap();
    let backend = ScriptedBackend::new(vec![Ok("unused")]);
    let mut settings = fast_settings();
    settings.guardrails.min_top_score = 1.5;
    let pipeline = Pipeline::builder(store(&tmp), backend.clone()).settings(settings).build();
    pipeline.ingest(vec![Chunk::new("Revenue grew 20% in 2023.", "report.pdf")]).unwrap();

    let response = pipeline.query("What was the revenue growth?").unwrap();
    assert_eq!(response.answer, NO_RELEVANT_CONTEXT);
    assert!(response.contexts.is_empty());
    assert_eq!(backend.calls(), 0);
}

#[test]
fn exhausted_generation_degrades_to_sentinel_answer() {
    let tmp = TempDir::new().unwrap();
    let backend = ScriptedBackend::new(vec![Err("503 from upstream")]);
    let mut settings = fast_settings();
    settings.generation.max_retries = 2;
    let pipeline = Pipeline::builder(store(&tmp), backend.clone()).settings(settings).build();
    pipeline.ingest(vec![Chunk::new("Revenue grew 20% in 2023.", "report.pdf")]).unwrap();

    let response = pipeline.query("What was the revenue growth?").unwrap();
    assert_eq!(response.answer, MODEL_UNAVAILABLE);
    assert_eq!(response.contexts, vec!["Revenue grew 20% in 2023.".to_string()]);
    assert_eq!(backend.calls(), 2);
}

#[test]
fn degraded_generation_logs_the_last_error_at_error_level() {
    let tmp = TempDir::new().unwrap();
    let mut settings = fast_settings();
    settings.generation.max_retries = 1;
    let pipeline = Pipeline::builder(store(&tmp), ScriptedBackend::new(vec![Err("503 from upstream")])).settings(settings).build();
    pipeline.ingest(vec![Chunk::new("Revenue grew 20% in 2023.", "report.pdf")]).unwrap();

    let logs = LogBuffer::default();
    let subscriber = tracing_subscriber::fmt().with_writer(logs.clone()).with_ansi(false).with_max_level(tracing::Level::ERROR).finish();
    let response = tracing::subscriber::with_default(subscriber, || pipeline.query("What was the revenue growth?").unwrap());

    assert_eq!(response.answer, MODEL_UNAVAILABLE);
    let logs = logs.contents();
    assert!(logs.contains("ERROR"), "logs: {logs}");
    assert!(logs.contains("503 from upstream"), "logs: {logs}");
}

#[test]
fn empty_top_results_stop_at_context_extraction() {
    let tmp = TempDir::new().unwrap();
    let backend = ScriptedBackend::new(vec![Ok("unused")]);
    let pipeline = Pipeline::builder(store(&tmp), backend.clone()).settings(fast_settings()).build();
    pipeline.ingest(vec![Chunk::new("", "blank.txt")]).unwrap();

    let response = pipeline.query("What was the revenue growth?").unwrap();
    assert_eq!(response.answer, NO_USABLE_CONTEXT);
    assert!(response.contexts.is_empty());
    assert_eq!(backend.calls(), 0);
}

#[test]
fn whitespace_only_result_still_reaches_generation() {
    let tmp = TempDir::new().unwrap();
    let backend = ScriptedBackend::new(vec![Ok(INSUFFICIENT_EVIDENCE)]);
    let pipeline = Pipeline::builder(store(&tmp), backend.clone()).settings(fast_settings()).build();
    pipeline.ingest(vec![Chunk::new("   ", "blank.txt")]).unwrap();

    let response = pipeline.query("What was the revenue growth?").unwrap();
    assert_eq!(response.answer, INSUFFICIENT_EVIDENCE);
    assert_eq!(response.contexts, vec!["   ".to_string()]);
    assert_eq!(backend.calls(), 1);
}

#[test]
fn unreachable_cache_never_fails_a_query() {
    let tmp = TempDir::new().unwrap();
    let backend = ScriptedBackend::new(vec![Ok("Revenue grew 20% in 2023 [Source 1].")]);
    let pipeline = Pipeline::builder(store(&tmp), backend.clone()).settings(fast_settings()).cache(Some(Arc::new(DownCache))).build();
    pipeline.ingest(vec![Chunk::new("Revenue grew 20% in 2023.", "report.pdf")]).unwrap();

    for _ in 0..2 {
        assert_eq!(pipeline.query("What was the revenue growth?").unwrap().answer, "Revenue grew 20% in 2023 [Source 1].");
    }
    assert_eq!(backend.calls(), 2, "every query misses");
}

#[test]
fn blank_generation_becomes_no_answer() {
    let tmp = TempDir::new().unwrap();
    let pipeline = Pipeline::builder(store(&tmp), ScriptedBackend::new(vec![Ok("   ")])).settings(fast_settings()).build();
    pipeline.ingest(vec![Chunk::new("Revenue grew 20% in 2023.", "report.pdf")]).unwrap();
    assert_eq!(pipeline.query("revenue?").unwrap().answer, NO_ANSWER);
}

#[test]
fn cache_key_is_case_sensitive() {
    let tmp = TempDir::new().unwrap();
    let backend = ScriptedBackend::new(vec![Ok("X marks the spot [Source 1].")]);
    let cache: Arc<dyn KeyValueCache> = Arc::new(MokaCache::new(100));
    let pipeline = Pipeline::builder(store(&tmp), backend.clone()).settings(fast_settings()).cache(Some(cache)).build();
    pipeline.ingest(vec![Chunk::new("X marks the spot.", "map.txt")]).unwrap();

    let first = pipeline.query("What is X?").unwrap();
    let second = pipeline.query("  What is X?  ").unwrap();
    assert_eq!(backend.calls(), 1, "trimmed repeat is a hit");
    assert_eq!(first, second);

    pipeline.query("what is x?").unwrap();
    assert_eq!(backend.calls(), 2, "different case is a miss");
}

#[test]
fn early_exit_sentinels_are_not_cached() {
    let tmp = TempDir::new().unwrap();
    let backend = ScriptedBackend::new(vec![Ok("Spot [Source 1].")]);
    let cache: Arc<dyn KeyValueCache> = Arc::new(MokaCache::new(100));
    let pipeline = Pipeline::builder(store(&tmp), backend.clone()).settings(fast_settings()).cache(Some(cache)).build();

    assert_eq!(pipeline.query("Where is X?").unwrap().answer, NO_DOCUMENTS);
    pipeline.ingest(vec![Chunk::new("X marks the spot.", "map.txt")]).unwrap();
    assert_eq!(pipeline.query("Where is X?").unwrap().answer, "Spot [Source 1].");
}

fn policy_pipeline(tmp: &TempDir, policy: OutputPolicy, backend: Arc<ScriptedBackend>) -> Pipeline {
    let mut settings = fast_settings();
    settings.guardrails.output_policy = policy;
    let pipeline = Pipeline::builder(store(tmp), backend).settings(settings).build();
    pipeline.ingest(vec![Chunk::new("Revenue grew 20% in 2023.", "report.pdf")]).unwrap();
    pipeline
}

#[test]
fn advisory_policy_keeps_unchecked_answer() {
    let tmp = TempDir::new().unwrap();
    let pipeline = policy_pipeline(&tmp, OutputPolicy::Advisory, ScriptedBackend::new(vec![Ok("Revenue grew 35%.")]));
    assert_eq!(pipeline.query("revenue growth?").unwrap().answer, "Revenue grew 35%.");
}

#[test]
fn annotate_policy_flags_each_failed_check() {
    let tmp = TempDir::new().unwrap();
    let pipeline = policy_pipeline(&tmp, OutputPolicy::Annotate, ScriptedBackend::new(vec![Ok("Revenue grew 35%.")]));
    let answer = pipeline.query("revenue growth?").unwrap().answer;
    assert!(answer.starts_with("Revenue grew 35%."));
    assert!(answer.contains("[Unverified: missing citation]"));
    assert!(answer.contains("[Unverified: numbers not found in sources]"));
}

#[test]
fn reject_policy_replaces_answer_with_fallback() {
    let tmp = TempDir::new().unwrap();
    let pipeline = policy_pipeline(&tmp, OutputPolicy::Reject, ScriptedBackend::new(vec![Ok("Revenue grew 20% [Source 1] to 9 billion.")]));
    assert_eq!(pipeline.query("revenue growth?").unwrap().answer, INSUFFICIENT_EVIDENCE);
}

#[test]
fn retry_policy_regenerates_once_with_reminder() {
    let tmp = TempDir::new().unwrap();
    let backend = ScriptedBackend::new(vec![Ok("Revenue grew."), Ok("Revenue grew 20% [Source 1].")]);
    let pipeline = policy_pipeline(&tmp, OutputPolicy::Retry, backend.clone());
    assert_eq!(pipeline.query("revenue growth?").unwrap().answer, "Revenue grew 20% [Source 1].");
    assert_eq!(backend.calls(), 2);
    assert!(backend.last_prompt.lock().unwrap().contains("Reminder:"));
}

#[test]
fn fallback_sentence_is_exempt_from_output_checks() {
    let tmp = TempDir::new().unwrap();
    let pipeline = policy_pipeline(&tmp, OutputPolicy::Annotate, ScriptedBackend::new(vec![Ok(INSUFFICIENT_EVIDENCE)]));
    assert_eq!(pipeline.query("who founded the company?").unwrap().answer, INSUFFICIENT_EVIDENCE);
}

#[test]
fn ingest_file_and_status() {
    let tmp = TempDir::new().unwrap();
    let docs = TempDir::new().unwrap();
    let report = docs.path().join("report.txt");
    fs::write(&report, "Revenue grew 20% in 2023.").unwrap();
    fs::write(docs.path().join("deck.pdf"), "%PDF").unwrap();

    let pipeline = Pipeline::builder(store(&tmp), ScriptedBackend::new(vec![Ok("ok")])).build();
    assert_eq!(pipeline.ingest_file(&report).unwrap(), 1);
    let err = pipeline.ingest_file(&docs.path().join("deck.pdf")).unwrap_err();
    assert!(matches!(err, Error::InputRejected(_)));

    let status = pipeline.status();
    assert_eq!(status.documents, 1);
    assert_eq!(status.dim, 384);
    assert!(!status.reranker_available);
    assert!(!status.cache_enabled);
    assert_eq!(pipeline.store().all_documents()[0].source(), Some("report.txt"));
}

#[test]
fn concurrent_queries_share_one_pipeline() {
    let tmp = TempDir::new().unwrap();
    let backend = ScriptedBackend::new(vec![Ok("Revenue grew 20% in 2023 [Source 1].")]);
    let pipeline = Arc::new(Pipeline::builder(store(&tmp), backend.clone()).settings(fast_settings()).build());
    pipeline.ingest(vec![Chunk::new("Revenue grew 20% in 2023.", "report.pdf")]).unwrap();

    std::thread::scope(|s| {
        for i in 0..4 {
            let pipeline = Arc::clone(&pipeline);
            s.spawn(move || {
                let response = pipeline.query(&format!("revenue question {i}")).unwrap();
                assert!(!response.contexts.is_empty());
            });
        }
        let writer = Arc::clone(&pipeline);
        s.spawn(move || writer.ingest(vec![Chunk::new("Costs fell.", "costs.txt")]).unwrap());
    });
    assert_eq!(backend.calls(), 4);
    assert_eq!(pipeline.status().documents, 2);
}
