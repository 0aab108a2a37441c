//! Retrying wrapper around a [`GenerationBackend`].
//!
//! `generate` never fails: after the last attempt it answers with
//! [`MODEL_UNAVAILABLE`]. Callers that want to decide for themselves use
//! [`GenerationClient::try_generate`].

mod cancel;
mod openai;

pub use cancel::CancellationToken;
pub use openai::OpenAiChatBackend;

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, error, warn};

use docqa_core::config::GenerationSettings;
use docqa_core::error::{Error, Result};
use docqa_core::traits::GenerationBackend;

pub const SYSTEM_PROMPT: &str = "You are an enterprise retrieval-augmented assistant. Answer ONLY using provided context.";
pub const MODEL_UNAVAILABLE: &str = "Model unavailable. Please try again.";

const PAUSE_SLICE: Duration = Duration::from_millis(25);

#[derive(Debug, Clone, PartialEq)]
pub struct Generation {
    pub text: String,
    /// Seconds from call entry, retries included.
    pub latency: f64,
}

#[derive(Debug, Clone)]
pub struct GenerateOptions {
    pub temperature: f32,
    pub max_tokens: u32,
    pub deadline: Option<Instant>,
    pub cancel: Option<CancellationToken>,
}

impl Default for GenerateOptions {
    fn default() -> Self { Self { temperature: 0.0, max_tokens: 400, deadline: None, cancel: None } }
}

impl GenerateOptions {
    fn stop_reason(&self) -> Option<&'static str> {
        if self.cancel.as_ref().is_some_and(CancellationToken::is_cancelled) { return Some("cancelled"); }
        if self.deadline.is_some_and(|d| Instant::now() >= d) { return Some("deadline exceeded"); }
        None
    }
}

pub struct GenerationClient {
    backend: Arc<dyn GenerationBackend>,
    max_retries: u32,
    retry_delay: Duration,
}

impl GenerationClient {
    pub fn new(backend: Arc<dyn GenerationBackend>, max_retries: u32, retry_delay: Duration) -> Self {
        Self { backend, max_retries: max_retries.max(1), retry_delay }
    }

    pub fn from_settings(backend: Arc<dyn GenerationBackend>, settings: &GenerationSettings) -> Self {
        Self::new(backend, settings.max_retries, Duration::from_millis(settings.retry_delay_ms))
    }

    pub fn generate(&self, prompt: &str, temperature: f32, max_tokens: u32) -> Generation {
        self.generate_with(prompt, &GenerateOptions { temperature, max_tokens, ..GenerateOptions::default() })
    }

    pub fn generate_with(&self, prompt: &str, options: &GenerateOptions) -> Generation {
        let start = Instant::now();
        match self.try_generate(prompt, options) {
            Ok(generation) => generation,
            Err(e) => {
                error!("{}", e);
                Generation { text: MODEL_UNAVAILABLE.to_string(), latency: round_secs(start.elapsed()) }
            }
        }
    }

    /// Up to `max_retries` attempts with a fixed pause between them. The pause
    /// and the attempts stop early on cancellation or a passed deadline.
    pub fn try_generate(&self, prompt: &str, options: &GenerateOptions) -> Result<Generation> {
        let start = Instant::now();
        let mut last_error = String::from("no attempt made");
        for attempt in 1..=self.max_retries {
            if let Some(reason) = options.stop_reason() {
                return Err(Error::Generation(format!("{} before attempt {}; last error: {}", reason, attempt, last_error)));
            }
            match self.backend.complete(SYSTEM_PROMPT, prompt, options.temperature, options.max_tokens) {
                Ok(text) => {
                    debug!("Generation succeeded on attempt {} in {:?}", attempt, start.elapsed());
                    return Ok(Generation { text: text.trim().to_string(), latency: round_secs(start.elapsed()) });
                }
                Err(e) => {
                    warn!("Generation attempt {}/{} failed: {:#}", attempt, self.max_retries, e);
                    last_error = format!("{:#}", e);
                }
            }
            if attempt < self.max_retries { self.pause(options); }
        }
        Err(Error::Generation(format!("gave up after {} attempts: {}", self.max_retries, last_error)))
    }

    fn pause(&self, options: &GenerateOptions) {
        let until = Instant::now() + self.retry_delay;
        while options.stop_reason().is_none() {
            let now = Instant::now();
            if now >= until { break; }
            std::thread::sleep(PAUSE_SLICE.min(until - now));
        }
    }
}

pub(crate) fn round_secs(elapsed: Duration) -> f64 { (elapsed.as_secs_f64() * 1000.0).round() / 1000.0 }
