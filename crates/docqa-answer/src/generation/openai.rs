//! Chat-completions backend for OpenAI-compatible endpoints (Groq by default).

use std::time::Duration;

use anyhow::{anyhow, bail};
use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use docqa_core::config::GenerationSettings;
use docqa_core::error::{Error, Result};
use docqa_core::traits::GenerationBackend;

pub struct OpenAiChatBackend {
    client: Client,
    endpoint: String,
    model: String,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 2],
    temperature: f32,
    max_tokens: u32,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ReplyMessage,
}

#[derive(Deserialize)]
struct ReplyMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize)]
struct ErrorResponse {
    error: ApiError,
}

#[derive(Deserialize)]
struct ApiError {
    message: String,
}

impl OpenAiChatBackend {
    /// Reads the API key from the variable named by `api_key_env`.
    pub fn new(settings: &GenerationSettings) -> Result<Self> {
        let api_key = std::env::var(&settings.api_key_env)
            .ok()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| Error::InvalidConfig(format!("{} missing", settings.api_key_env)))?;
        Self::with_api_key(settings, &api_key)
    }

    pub fn with_api_key(settings: &GenerationSettings, api_key: &str) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let auth = HeaderValue::from_str(&format!("Bearer {}", api_key)).map_err(|e| Error::InvalidConfig(format!("Invalid API key format: {}", e)))?;
        headers.insert(AUTHORIZATION, auth);
        let client = Client::builder()
            .timeout(Duration::from_secs(settings.request_timeout_secs))
            .default_headers(headers)
            .build()
            .map_err(|e| Error::InvalidConfig(format!("Failed to build HTTP client: {}", e)))?;
        info!("Generation backend: endpoint={}, model={}", settings.endpoint, settings.model);
        Ok(Self { client, endpoint: settings.endpoint.clone(), model: settings.model.clone() })
    }
}

impl GenerationBackend for OpenAiChatBackend {
    fn complete(&self, system_prompt: &str, user_prompt: &str, temperature: f32, max_tokens: u32) -> anyhow::Result<String> {
        let request = ChatRequest {
            model: &self.model,
            messages: [ChatMessage { role: "system", content: system_prompt }, ChatMessage { role: "user", content: user_prompt }],
            temperature,
            max_tokens,
        };
        let body = serde_json::to_vec(&request)?;
        debug!("POST {} ({} bytes)", self.endpoint, body.len());

        // The blocking client must not run on an async runtime thread.
        let (status, text) = std::thread::scope(|s| {
            s.spawn(|| -> anyhow::Result<_> {
                let response = self.client.post(&self.endpoint).body(body).send()?;
                let status = response.status();
                Ok((status, response.text()?))
            })
            .join()
        })
        .map_err(|_| anyhow!("HTTP request thread panicked"))??;

        if !status.is_success() {
            let message = serde_json::from_str::<ErrorResponse>(&text).map(|e| e.error.message).unwrap_or(text);
            bail!("{} returned {}: {}", self.endpoint, status, message);
        }
        let parsed: ChatResponse = serde_json::from_str(&text)?;
        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| anyhow!("response has no message content"))
    }
}
