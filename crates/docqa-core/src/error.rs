use thiserror::Error;

/// Failure taxonomy of the question-answering core.
///
/// Only `InputRejected`, `Storage`, `Compute` and `InvalidConfig` ever reach a
/// caller. `Generation` and `CacheUnavailable` are produced internally and
/// recovered by the pipeline (sentinel answer, cache miss).
#[derive(Debug, Error)]
pub enum Error {
    #[error("Input rejected: {0}")]
    InputRejected(String),

    #[error("Storage failure: {0}")]
    Storage(String),

    #[error("Compute failure: {0}")]
    Compute(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Generation degraded: {0}")]
    Generation(String),

    #[error("Cache unavailable: {0}")]
    CacheUnavailable(String),
}

impl Error {
    pub fn storage(err: impl std::fmt::Display) -> Self { Self::Storage(err.to_string()) }

    pub fn compute(err: impl std::fmt::Display) -> Self { Self::Compute(err.to_string()) }
}

pub type Result<T> = std::result::Result<T, Error>;
