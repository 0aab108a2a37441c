use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use docqa_answer::generation::{SYSTEM_PROMPT, MODEL_UNAVAILABLE};
use docqa_answer::{CancellationToken, GenerateOptions, GenerationClient};
use docqa_core::error::Error;
use docqa_core::traits::GenerationBackend;

/// Fails `failures` times, then answers with padding around the text.
struct FlakyBackend {
    failures: usize,
    calls: AtomicUsize,
    system_seen: Mutex<Option<String>>,
}

impl FlakyBackend {
    fn new(failures: usize) -> Arc<Self> { Arc::new(Self { failures, calls: AtomicUsize::new(0), system_seen: Mutex::new(None) }) }

    fn calls(&self) -> usize { self.calls.load(Ordering::SeqCst) }
}

impl GenerationBackend for FlakyBackend {
    fn complete(&self, system: &str, _user: &str, _temperature: f32, _max_tokens: u32) -> anyhow::Result<String> {
        *self.system_seen.lock().unwrap() = Some(system.to_string());
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        if n < self.failures { anyhow::bail!("attempt {} failed", n + 1) }
        Ok("  The answer [Source 1].\n".to_string())
    }
}

#[test]
fn first_success_is_trimmed_and_timed() {
    let backend = FlakyBackend::new(0);
    let client = GenerationClient::new(backend.clone(), 3, Duration::ZERO);
    let out = client.generate("prompt", 0.0, 400);
    assert_eq!(out.text, "The answer [Source 1].");
    assert!(out.latency >= 0.0);
    assert_eq!(backend.calls(), 1);
    assert_eq!(backend.system_seen.lock().unwrap().as_deref(), Some(SYSTEM_PROMPT));
}

#[test]
fn transient_failures_are_retried() {
    let backend = FlakyBackend::new(2);
    let client = GenerationClient::new(backend.clone(), 3, Duration::from_millis(10));
    assert_eq!(client.generate("prompt", 0.0, 400).text, "The answer [Source 1].");
    assert_eq!(backend.calls(), 3);
}

#[test]
fn exhausted_retries_yield_sentinel_not_error() {
    let backend = FlakyBackend::new(usize::MAX);
    let client = GenerationClient::new(backend.clone(), 3, Duration::from_millis(10));
    let out = client.generate("prompt", 0.0, 400);
    assert_eq!(out.text, MODEL_UNAVAILABLE);
    assert_eq!(backend.calls(), 3);
    assert!(out.latency >= 0.02, "two pauses between three attempts");

    let err = client.try_generate("prompt", &GenerateOptions::default()).unwrap_err();
    assert!(matches!(err, Error::Generation(_)));
}

#[test]
fn cancelled_token_stops_before_calling_backend() {
    let backend = FlakyBackend::new(0);
    let client = GenerationClient::new(backend.clone(), 3, Duration::ZERO);
    let token = CancellationToken::new();
    token.cancel();
    let out = client.generate_with("prompt", &GenerateOptions { cancel: Some(token), ..GenerateOptions::default() });
    assert_eq!(out.text, MODEL_UNAVAILABLE);
    assert_eq!(backend.calls(), 0);
}

#[test]
fn deadline_interrupts_the_pause_between_attempts() {
    let backend = FlakyBackend::new(usize::MAX);
    let client = GenerationClient::new(backend.clone(), 3, Duration::from_secs(30));
    let started = Instant::now();
    let options = GenerateOptions { deadline: Some(started + Duration::from_millis(100)), ..GenerateOptions::default() };
    let out = client.generate_with("prompt", &options);
    assert_eq!(out.text, MODEL_UNAVAILABLE);
    assert_eq!(backend.calls(), 1);
    assert!(started.elapsed() < Duration::from_secs(5));
}

#[test]
fn cancellation_from_another_thread_interrupts_the_pause() {
    let backend = FlakyBackend::new(usize::MAX);
    let client = GenerationClient::new(backend.clone(), 3, Duration::from_secs(30));
    let token = CancellationToken::new();
    let remote = token.clone();
    let started = Instant::now();
    let canceller = std::thread::spawn(move || {
        std::thread::sleep(Duration::from_millis(50));
        remote.cancel();
    });
    let out = client.generate_with("prompt", &GenerateOptions { cancel: Some(token), ..GenerateOptions::default() });
    canceller.join().unwrap();
    assert_eq!(out.text, MODEL_UNAVAILABLE);
    assert_eq!(backend.calls(), 1);
    assert!(started.elapsed() < Duration::from_secs(5));
}
