//! Data types passed between the retrieval core and its callers.

use serde::{Deserialize, Serialize};

/// Reply shown when the index (or the query embedding) is unavailable.
pub const NOT_READY_REPLY: &str = "Sistem belum siap digunakan. Silakan coba lagi nanti.";

/// Reply shown when answer generation fails. Details stay in the server log.
pub const GENERATION_FAILED_REPLY: &str = "Terjadi error di server. Silakan coba lagi.";

pub type Embedding = Vec<f32>;

/// One page of one source PDF
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentPage {
    pub source_filename: String,
    pub title: String,
    pub page_number: u32,
    pub text: String,
}

/// A fixed-size slice of one document's text
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub content: String,
    pub title: String,
    pub source_filename: String,
    /// Position of the chunk within its document
    pub chunk_index: usize,
}

impl Chunk {
    pub fn source(&self) -> Source {
        Source {
            title: self.title.clone(),
            filename: self.source_filename.clone(),
        }
    }
}

/// A document reference returned with every answer.
/// `filename` is the download key of the original PDF.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Source {
    pub title: String,
    pub filename: String,
}

/// One earlier exchange of the conversation, supplied by the caller
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryTurn {
    pub user: String,
    pub bot: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplyOutcome {
    Answered,
    NotReady,
    Failed,
}

impl ReplyOutcome {
    /// Status code the web layer should answer with.
    pub fn status_code(self) -> u16 {
        match self {
            ReplyOutcome::Answered | ReplyOutcome::NotReady => 200,
            ReplyOutcome::Failed => 500,
        }
    }
}

/// What the chatbot endpoint hands back to the web layer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatReply {
    pub answer: String,
    pub sources: Vec<Source>,
    pub outcome: ReplyOutcome,
}

impl ChatReply {
    pub fn answered(answer: String, sources: Vec<Source>) -> Self {
        Self {
            answer,
            sources,
            outcome: ReplyOutcome::Answered,
        }
    }

    pub fn not_ready() -> Self {
        Self {
            answer: NOT_READY_REPLY.to_string(),
            sources: Vec::new(),
            outcome: ReplyOutcome::NotReady,
        }
    }

    pub fn failed() -> Self {
        Self {
            answer: GENERATION_FAILED_REPLY.to_string(),
            sources: Vec::new(),
            outcome: ReplyOutcome::Failed,
        }
    }
}

/// A retrieved chunk together with its distance to the query
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievedChunk {
    pub chunk: Chunk,
    pub distance: f32,
}

/// Result of the retrieval half of a query, before generation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Retrieval {
    pub chunks: Vec<RetrievedChunk>,
    /// Chunk texts joined with the context separator
    pub context: String,
    pub sources: Vec<Source>,
}

/// Statistics about one index build
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BuildReport {
    pub files_found: usize,
    pub files_extracted: usize,
    pub files_failed: Vec<String>,
    pub extraction_cache_hits: usize,
    pub chunks_produced: usize,
    pub chunks_indexed: usize,
    pub chunks_dropped: usize,
    pub dimension: usize,
    pub loaded_from_cache: bool,
    pub elapsed_ms: u128,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexPhase {
    Uninitialized,
    Building,
    Ready,
    Failed,
}

/// Snapshot of the engine state for status endpoints and the CLI
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexStatus {
    pub phase: IndexPhase,
    pub chunk_count: usize,
    pub dimension: usize,
    pub failure: Option<String>,
}
