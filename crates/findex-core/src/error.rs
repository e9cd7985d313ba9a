//! Error types for Findex.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    /// Deterministic rejection of malformed input (missing fields, too-short
    /// body). Never retried.
    #[error("Data error: {0}")]
    Data(String),

    #[error("Full-text engine error: {0}")]
    FullText(String),

    #[error("Vector engine error: {0}")]
    Vector(String),

    #[error("Cache error: {0}")]
    Cache(String),

    #[error("Embedding error: {0}")]
    Embedding(String),

    #[error("Feature extraction error: {0}")]
    Extraction(String),

    #[error("Snapshot error: {0}")]
    Snapshot(String),

    #[error("Sync error: {0}")]
    Sync(String),

    #[error("Search error: {0}")]
    Search(String),

    #[error("Task queue error: {0}")]
    Queue(String),

    #[error("Timeout after {0}s")]
    Timeout(u64),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, Error>;
