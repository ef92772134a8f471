//! Error types shared by the retrieval core.

use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, RagError>;

#[derive(Debug, Error)]
pub enum RagError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("pdf error: {0}")]
    Pdf(String),
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("{operation} timed out after {secs}s")]
    Timeout { operation: &'static str, secs: u64 },
    #[error("no PDF files found in {0}")]
    CorpusEmpty(PathBuf),
    #[error("no text could be extracted from the PDFs in {0}")]
    NoText(PathBuf),
    #[error("no valid embeddings were produced")]
    NoValidEmbeddings,
    #[error("invalid index input: {0}")]
    InvalidIndex(String),
    #[error("embedding service error: {0}")]
    Embedding(String),
    #[error("generation service error: {0}")]
    Generation(String),
    #[error("retrieval index is not ready")]
    NotReady,
}

impl RagError {
    pub fn pdf<E: std::fmt::Display>(err: E) -> Self {
        RagError::Pdf(err.to_string())
    }
}
