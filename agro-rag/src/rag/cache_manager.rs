//! Persistent cache for the retrieval core.
//!
//! This module handles:
//! - A keyed on-disk blob store (one JSON file per key)
//! - Extraction cache entries keyed by source file name
//! - The whole-index snapshot stored under a fixed key
//!
//! Entries never expire. Invalidation is explicit: delete the blob, call
//! [`CacheStore::invalidate`], or [`CacheStore::clear`].

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use tokio::fs;
use uuid::Uuid;

use crate::error::Result;
use crate::paths::ensure_rag_cache_dir;
use crate::protocol::DocumentPage;
use crate::settings::RagSettings;

/// Key of the serialized `(index, chunks)` snapshot
pub const INDEX_CACHE_KEY: &str = "rag_index";

/// Extension of every blob written by the store
const BLOB_EXTENSION: &str = "json";

/// Cached extraction result for one PDF
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractionCacheEntry {
    pub file_name: String,
    pub crc32: u32,
    pub pages: Vec<DocumentPage>,
    pub extracted_at: i64,
}

/// Envelope written around every cached value so a blob can be matched to its key
#[derive(Serialize, Deserialize)]
struct CacheEnvelope<T> {
    key: String,
    written_at: i64,
    value: T,
}

/// Key under which the extraction result of `file_name` is stored
pub fn extraction_cache_key(file_name: &str) -> String {
    format!("extract:{}", file_name)
}

/// Compute SHA-256 hash of content
pub fn compute_content_hash(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Check if a cached extraction must be redone.
///
/// Without checksum verification the cache is trusted by file name alone.
pub fn should_reextract_file(
    current_crc: Option<u32>,
    cached: Option<&ExtractionCacheEntry>,
    verify_checksums: bool,
) -> bool {
    match (cached, verify_checksums) {
        (None, _) => true,
        (Some(_), false) => false,
        (Some(entry), true) => current_crc != Some(entry.crc32),
    }
}

/// Key → blob store rooted at one directory. A store without a root is
/// disabled: reads miss and writes are dropped.
#[derive(Debug, Clone)]
pub struct CacheStore {
    root: Option<PathBuf>,
}

impl CacheStore {
    pub fn new(root: PathBuf) -> Self {
        Self { root: Some(root) }
    }

    pub fn disabled() -> Self {
        Self { root: None }
    }

    /// Resolve the cache directory from settings.
    ///
    /// An explicit `cache_dir` is used as-is; otherwise the sidecar/central
    /// fallback chain from [`crate::paths`] decides.
    pub async fn open(settings: &RagSettings) -> Self {
        if !settings.cache_enabled {
            tracing::info!("Persistent cache disabled by settings");
            return Self::disabled();
        }

        if let Some(dir) = &settings.cache_dir {
            return match fs::create_dir_all(dir).await {
                Ok(()) => Self::new(dir.clone()),
                Err(e) => {
                    tracing::warn!("Cache directory {:?} unusable ({}), running without cache", dir, e);
                    Self::disabled()
                }
            };
        }

        match ensure_rag_cache_dir(&settings.corpus_dir).await {
            Some(writable) => {
                if let Some(reason) = &writable.fallback_reason {
                    tracing::info!("{}", reason);
                }
                Self::new(writable.path)
            }
            None => Self::disabled(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.root.is_some()
    }

    pub fn root(&self) -> Option<&Path> {
        self.root.as_deref()
    }

    fn blob_path(&self, key: &str) -> Option<PathBuf> {
        self.root
            .as_ref()
            .map(|root| root.join(format!("{}.{}", compute_content_hash(key), BLOB_EXTENSION)))
    }

    /// Read a value. Missing, unreadable or mismatched blobs are all misses.
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let path = self.blob_path(key)?;
        let bytes = match fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
            Err(e) => {
                tracing::warn!("Failed to read cache entry {:?}: {}", key, e);
                return None;
            }
        };

        match serde_json::from_slice::<CacheEnvelope<T>>(&bytes) {
            Ok(envelope) if envelope.key == key => Some(envelope.value),
            Ok(envelope) => {
                tracing::warn!(
                    "Cache entry {:?} holds key {:?}, ignoring",
                    key,
                    envelope.key
                );
                None
            }
            Err(e) => {
                tracing::warn!("Corrupt cache entry {:?}, ignoring: {}", key, e);
                None
            }
        }
    }

    /// Write a value. The blob is written to a temporary file and renamed
    /// into place, so concurrent writers of the same key leave the last
    /// complete value behind.
    pub async fn put<T: Serialize>(&self, key: &str, value: &T) -> Result<()> {
        let Some(path) = self.blob_path(key) else {
            return Ok(());
        };
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let envelope = CacheEnvelope {
            key: key.to_string(),
            written_at: chrono::Utc::now().timestamp(),
            value,
        };
        let bytes = serde_json::to_vec(&envelope)?;

        let tmp_path = path.with_extension(format!("{}.tmp", Uuid::new_v4()));
        fs::write(&tmp_path, &bytes).await?;
        if let Err(e) = fs::rename(&tmp_path, &path).await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(e.into());
        }

        tracing::debug!("Cached {:?} ({} bytes)", key, bytes.len());
        Ok(())
    }

    /// Remove one entry. Returns whether a blob existed.
    pub async fn invalidate(&self, key: &str) -> Result<bool> {
        let Some(path) = self.blob_path(key) else {
            return Ok(false);
        };
        match fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Remove every blob in the store. Returns the number removed.
    pub async fn clear(&self) -> Result<usize> {
        let Some(root) = &self.root else {
            return Ok(0);
        };

        let mut entries = match fs::read_dir(root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };

        let mut removed = 0;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let is_blob = path.extension().and_then(|e| e.to_str()) == Some(BLOB_EXTENSION);
            if is_blob && fs::remove_file(&path).await.is_ok() {
                removed += 1;
            }
        }
        Ok(removed)
    }

    pub async fn load_extraction(&self, file_name: &str) -> Option<ExtractionCacheEntry> {
        self.get(&extraction_cache_key(file_name)).await
    }

    pub async fn save_extraction(&self, entry: &ExtractionCacheEntry) -> Result<()> {
        self.put(&extraction_cache_key(&entry.file_name), entry).await
    }
}
