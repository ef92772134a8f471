use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;

use crate::error::{RagError, Result};

// ============ Defaults ============

pub const DEFAULT_CHUNK_SIZE: usize = 1000;
pub const DEFAULT_CHUNK_OVERLAP: usize = 100;
pub const DEFAULT_EMBEDDING_BATCH_SIZE: usize = 10;
pub const DEFAULT_TOP_K: usize = 5;
pub const DEFAULT_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const DEFAULT_EMBEDDING_MODEL: &str = "models/embedding-001";
pub const DEFAULT_GENERATION_MODEL: &str = "models/gemini-2.5-flash";

/// LRU capacity for query/document embeddings (~30MB for 768-dim vectors)
pub const DEFAULT_EMBEDDING_CACHE_CAPACITY: usize = 10_000;

/// Environment variable consulted when no API key is configured
pub const API_KEY_ENV: &str = "GEMINI_API_KEY";

// ============ Settings ============

/// Retrieval core settings, persisted as JSON in the config directory.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RagSettings {
    /// Directory holding the PDF corpus (scanned non-recursively)
    pub corpus_dir: PathBuf,
    /// Explicit cache directory. When unset the sidecar/central fallback chain is used.
    pub cache_dir: Option<PathBuf>,
    /// Disable the on-disk cache entirely
    pub cache_enabled: bool,
    /// Re-extract a cached file when its CRC32 changed (off: cache keyed by file name only)
    pub verify_file_checksums: bool,
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub embedding_batch_size: usize,
    pub embedding_cache_capacity: usize,
    pub top_k: usize,
    pub api_base: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    pub embedding_model: String,
    pub generation_model: String,
    pub embedding_timeout_secs: u64,
    pub generation_timeout_secs: u64,
}

impl Default for RagSettings {
    fn default() -> Self {
        Self {
            corpus_dir: PathBuf::from("jurnal_ilmiah"),
            cache_dir: None,
            cache_enabled: true,
            verify_file_checksums: false,
            chunk_size: DEFAULT_CHUNK_SIZE,
            chunk_overlap: DEFAULT_CHUNK_OVERLAP,
            embedding_batch_size: DEFAULT_EMBEDDING_BATCH_SIZE,
            embedding_cache_capacity: DEFAULT_EMBEDDING_CACHE_CAPACITY,
            top_k: DEFAULT_TOP_K,
            api_base: DEFAULT_API_BASE.to_string(),
            api_key: None,
            embedding_model: DEFAULT_EMBEDDING_MODEL.to_string(),
            generation_model: DEFAULT_GENERATION_MODEL.to_string(),
            embedding_timeout_secs: 30,
            generation_timeout_secs: 60,
        }
    }
}

impl RagSettings {
    /// Reject combinations the pipeline cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            return Err(RagError::Config("chunk_size must be greater than zero".to_string()));
        }
        if self.chunk_overlap >= self.chunk_size {
            return Err(RagError::Config(format!(
                "chunk_overlap ({}) must be smaller than chunk_size ({})",
                self.chunk_overlap, self.chunk_size
            )));
        }
        if self.embedding_batch_size == 0 {
            return Err(RagError::Config(
                "embedding_batch_size must be greater than zero".to_string(),
            ));
        }
        if self.top_k == 0 {
            return Err(RagError::Config("top_k must be greater than zero".to_string()));
        }
        if self.embedding_timeout_secs == 0 || self.generation_timeout_secs == 0 {
            return Err(RagError::Config("timeouts must be at least one second".to_string()));
        }
        Ok(())
    }

    /// API key from settings, falling back to `GEMINI_API_KEY`
    pub fn resolve_api_key(&self) -> Option<String> {
        self.api_key
            .clone()
            .filter(|k| !k.trim().is_empty())
            .or_else(|| std::env::var(API_KEY_ENV).ok().filter(|k| !k.trim().is_empty()))
    }

    pub fn embedding_timeout(&self) -> Duration {
        Duration::from_secs(self.embedding_timeout_secs)
    }

    pub fn generation_timeout(&self) -> Duration {
        Duration::from_secs(self.generation_timeout_secs)
    }
}

// ============ Persistence ============

/// Load settings from `path`, using defaults when the file is missing or malformed
pub async fn load_settings(path: &Path) -> RagSettings {
    match fs::read_to_string(path).await {
        Ok(contents) => match serde_json::from_str(&contents) {
            Ok(settings) => {
                tracing::info!("Settings loaded from {:?}", path);
                settings
            }
            Err(e) => {
                tracing::warn!("Failed to parse settings: {}, using defaults", e);
                RagSettings::default()
            }
        },
        Err(e) => {
            tracing::info!("No config file found at {:?}: {}, using defaults", path, e);
            RagSettings::default()
        }
    }
}

/// Save settings to `path`, creating the parent directory when needed
pub async fn save_settings(settings: &RagSettings, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await?;
    }

    let contents = serde_json::to_string_pretty(settings)?;
    fs::write(path, contents).await?;

    tracing::info!("Settings saved to {:?}", path);
    Ok(())
}
