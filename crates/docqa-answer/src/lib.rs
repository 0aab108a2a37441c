//! docqa-answer
//!
//! Everything between retrieval and the caller: guardrails, prompt assembly,
//! generation with retry, response caching and the query pipeline.

pub mod cache;
pub mod generation;
pub mod guardrails;
pub mod pipeline;
pub mod prompt;

pub use cache::{MokaCache, ResponseCache};
pub use generation::{CancellationToken, GenerateOptions, Generation, GenerationClient, OpenAiChatBackend};
pub use guardrails::GuardrailEngine;
pub use pipeline::{Pipeline, PipelineBuilder, Status};
pub use prompt::PromptBuilder;
