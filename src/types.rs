//! Crate-wide error type shared by every pipeline stage.

use thiserror::Error;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, SiftError>;

/// Errors surfaced by the extraction pipeline and its collaborators.
#[derive(Debug, Error)]
pub enum SiftError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("chunking failed: {0}")]
    Chunking(String),

    #[error("embedding failed: {0}")]
    Embedding(String),

    #[error("completion failed: {0}")]
    Completion(String),

    #[error("vector storage failure: {0}")]
    Storage(String),

    #[error("document store failure: {0}")]
    Documents(String),

    #[error("invalid upload: {0}")]
    Upload(String),

    #[error("io failure: {0}")]
    Io(#[from] std::io::Error),

    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),
}
