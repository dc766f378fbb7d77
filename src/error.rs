use std::io;

use thiserror::Error;

/// Failures of a single answer resolution.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ResolveError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Embedding unavailable: {0}")]
    EmbeddingUnavailable(String),
}

/// Failures reported by a text generator.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GenerationError {
    #[error("Generation unavailable: {0}")]
    Unavailable(String),
}

#[derive(Error, Debug)]
pub enum EvalError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Invalid argument: {0}")]
    InvalidArg(String),

    #[error("Invalid dataset: {0}")]
    Dataset(String),

    #[error("Embedder unavailable: {0}")]
    Embedder(String),

    #[error(transparent)]
    Resolve(#[from] ResolveError),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("Config error: {0}")]
    Config(#[from] toml::de::Error),
}

pub type Result<T> = std::result::Result<T, EvalError>;
