//! Lightweight configuration loader, typed settings and path helpers.
//!
//! Uses Figment to merge `config.toml` + `config.<env>.toml` + `APP_*` env vars
//! (`__` separates nesting, e.g. `APP_RETRIEVAL__ALPHA=0.5`). Every setting has
//! a default, so an empty figment yields a usable [`Settings`].

use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;

use crate::logging::LoggingSettings;

pub struct Config {
    figment: Figment,
}

impl Config {
    pub fn load() -> anyhow::Result<Self> {
        let env_name = env::var("RUST_ENV").unwrap_or_else(|_| "dev".to_string());

        let mut figment = Figment::new().merge(Toml::file("config.toml"));
        match env_name.as_str() {
            "dev" | "development" => figment = figment.merge(Toml::file("config.dev.toml")),
            "prod" | "production" => figment = figment.merge(Toml::file("config.prod.toml")),
            "test" | "testing" => figment = figment.merge(Toml::file("config.test.toml")),
            _ => {}
        }
        figment = figment.merge(Env::prefixed("APP_").split("__"));

        let config = Self { figment };
        config.validate_for_env(&env_name)?;
        Ok(config)
    }

    /// Build from an explicit figment; no files or environment are consulted.
    pub fn from_figment(figment: Figment) -> Self { Self { figment } }

    pub fn get<T>(&self, key: &str) -> anyhow::Result<T>
    where
        T: serde::de::DeserializeOwned,
    {
        self.figment
            .extract_inner(key)
            .map_err(|e| anyhow::anyhow!("Failed to get '{}': {}", key, e))
    }

    pub fn settings(&self) -> anyhow::Result<Settings> {
        self.figment
            .extract()
            .map_err(|e| anyhow::anyhow!("Failed to extract settings: {}", e))
    }

    fn validate_for_env(&self, env: &str) -> anyhow::Result<()> {
        let settings = self.settings()?;
        settings.validate()?;
        match env {
            "prod" | "production" => {
                if settings.embedding.fake {
                    anyhow::bail!("embedding.fake must not be enabled in production");
                }
            }
            "dev" | "development" | "test" | "testing" => {}
            _ => {}
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub data: DataSettings,
    pub embedding: EmbeddingSettings,
    pub rerank: RerankSettings,
    pub retrieval: RetrievalSettings,
    pub guardrails: GuardrailSettings,
    pub generation: GenerationSettings,
    pub cache: CacheSettings,
    pub logging: LoggingSettings,
}

impl Settings {
    pub fn validate(&self) -> crate::error::Result<()> {
        use crate::error::Error;
        let r = &self.retrieval;
        if !(0.0..=1.0).contains(&r.alpha) {
            return Err(Error::InvalidConfig(format!("retrieval.alpha must be within [0, 1], got {}", r.alpha)));
        }
        if r.top_k == 0 || r.candidate_multiplier == 0 {
            return Err(Error::InvalidConfig("retrieval.top_k and retrieval.candidate_multiplier must be positive".into()));
        }
        if self.rerank.batch_size == 0 {
            return Err(Error::InvalidConfig("rerank.batch_size must be positive".into()));
        }
        if self.generation.max_retries == 0 {
            return Err(Error::InvalidConfig("generation.max_retries must be at least 1".into()));
        }
        if self.data.chunk_overlap >= self.data.chunk_size {
            return Err(Error::InvalidConfig("data.chunk_overlap must be smaller than data.chunk_size".into()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DataSettings {
    /// Directory holding `vectors.safetensors` and `documents.json`.
    pub dir: String,
    pub chunk_size: usize,
    pub chunk_overlap: usize,
}

impl Default for DataSettings {
    fn default() -> Self { Self { dir: "./data".to_string(), chunk_size: 500, chunk_overlap: 50 } }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingSettings {
    pub model_dir: Option<String>,
    pub dim: usize,
    pub max_len: usize,
    /// Use the deterministic hashing embedder instead of loading weights.
    pub fake: bool,
}

impl Default for EmbeddingSettings {
    fn default() -> Self { Self { model_dir: None, dim: 384, max_len: 256, fake: false } }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RerankSettings {
    /// Cross-encoder weights. Unset means the reranker passes candidates through.
    pub model_dir: Option<String>,
    pub batch_size: usize,
}

impl Default for RerankSettings {
    fn default() -> Self { Self { model_dir: None, batch_size: 16 } }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalSettings {
    pub top_k: usize,
    pub alpha: f64,
    pub candidate_multiplier: usize,
    pub max_context_chunks: usize,
    pub max_chars_per_chunk: usize,
}

impl Default for RetrievalSettings {
    fn default() -> Self {
        Self { top_k: 5, alpha: 0.6, candidate_multiplier: 3, max_context_chunks: 5, max_chars_per_chunk: 1200 }
    }
}

/// What the pipeline does when a generated answer fails the citation or
/// numeric check.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputPolicy {
    /// Log a warning and return the answer unchanged.
    #[default]
    Advisory,
    /// Append an `[Unverified: ...]` note to the answer.
    Annotate,
    /// Replace the answer with the insufficient-evidence sentence.
    Reject,
    /// Regenerate once with a reminder; keep the second answer.
    Retry,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GuardrailSettings {
    pub moderation: bool,
    pub confidence_gate: bool,
    pub min_top_score: f64,
    pub denylist: Vec<String>,
    pub output_policy: OutputPolicy,
}

pub const DEFAULT_DENYLIST: [&str; 5] = ["hack", "exploit", "attack system", "bypass security", "illegal access"];

impl Default for GuardrailSettings {
    fn default() -> Self {
        Self {
            moderation: true,
            confidence_gate: true,
            min_top_score: 0.30,
            denylist: DEFAULT_DENYLIST.iter().map(|s| s.to_string()).collect(),
            output_policy: OutputPolicy::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationSettings {
    pub endpoint: String,
    pub model: String,
    /// Name of the environment variable holding the API key.
    pub api_key_env: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub max_retries: u32,
    pub retry_delay_ms: u64,
    pub request_timeout_secs: u64,
    /// Overall budget for one generation call including retries.
    pub deadline_secs: Option<u64>,
}

impl Default for GenerationSettings {
    fn default() -> Self {
        Self {
            endpoint: "https://api.groq.com/openai/v1/chat/completions".to_string(),
            model: "llama-3.3-70b-versatile".to_string(),
            api_key_env: "GROQ_API_KEY".to_string(),
            temperature: 0.0,
            max_tokens: 400,
            max_retries: 3,
            retry_delay_ms: 1000,
            request_timeout_secs: 60,
            deadline_secs: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    pub enabled: bool,
    pub ttl_secs: u64,
    pub max_entries: u64,
}

impl Default for CacheSettings {
    fn default() -> Self { Self { enabled: true, ttl_secs: 3600, max_entries: 10_000 } }
}

/// Expand `$VAR`/`${VAR}` and a leading `~`. Unknown variables are left as
/// written; the result is not canonicalized.
pub fn expand_path<S: AsRef<str>>(input: S) -> PathBuf {
    let s = input.as_ref();
    let with_env = shellexpand::env(s).unwrap_or(std::borrow::Cow::Borrowed(s));
    PathBuf::from(shellexpand::tilde(&with_env).as_ref())
}
