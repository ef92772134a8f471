//! Centralized path resolution for config and cache directories.
//!
//! The index cache lives next to the corpus when that directory is writable
//! (a sidecar), and falls back to a central per-user cache keyed by a hash of
//! the corpus path otherwise.
//!
//! | Purpose | Linux | macOS | Windows |
//! |---------|-------|-------|---------|
//! | Config | `~/.config/agro-rag/` | `~/Library/Application Support/agro-rag/` | `%APPDATA%\agro-rag\` |
//! | Cache | `~/.cache/agro-rag/` | `~/Library/Caches/agro-rag/` | `%LOCALAPPDATA%\agro-rag\` |

use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use tokio::fs;
use uuid::Uuid;

/// Application name used in directory paths
const APP_NAME: &str = "agro-rag";

/// Name of the sidecar cache directory created inside the corpus directory
pub const SIDECAR_CACHE_DIR_NAME: &str = ".agro-rag-cache";

/// Result of attempting to get a writable directory
#[derive(Debug, Clone)]
pub struct WritableDir {
    /// The path that was determined to be writable
    pub path: PathBuf,
    /// Whether this is a fallback location (not the preferred sidecar)
    pub is_fallback: bool,
    /// Description of which fallback tier was used (if any)
    pub fallback_reason: Option<String>,
}

/// Get the configuration directory (for settings.json).
pub fn get_config_dir() -> PathBuf {
    dirs::config_dir()
        .map(|p| p.join(APP_NAME))
        .unwrap_or_else(|| fallback_base_dir().join("config"))
}

/// Default location of the settings file
pub fn get_config_path() -> PathBuf {
    get_config_dir().join("settings.json")
}

/// Get the per-user cache directory.
pub fn get_cache_dir() -> PathBuf {
    dirs::cache_dir()
        .map(|p| p.join(APP_NAME))
        .unwrap_or_else(|| fallback_base_dir().join("cache"))
}

/// Sidecar cache directory for a corpus (not yet validated for writability).
pub fn get_sidecar_cache_dir(corpus_dir: &Path) -> PathBuf {
    corpus_dir.join(SIDECAR_CACHE_DIR_NAME)
}

/// Central cache directory used when the corpus directory is read-only.
pub fn get_central_rag_cache_dir(corpus_dir: &Path) -> PathBuf {
    get_cache_dir().join("rag").join(hash_path(corpus_dir))
}

/// Fallback base directory when platform dirs are unavailable.
///
/// Tries in order:
/// 1. `~/.agro-rag/` (home directory)
/// 2. `./.agro-rag/` (current working directory)
fn fallback_base_dir() -> PathBuf {
    dirs::home_dir()
        .map(|p| p.join(".agro-rag"))
        .unwrap_or_else(|| {
            std::env::current_dir()
                .unwrap_or_else(|_| PathBuf::from("."))
                .join(".agro-rag")
        })
}

/// Hash a path into a short, filesystem-safe directory name
pub fn hash_path(path: &Path) -> String {
    let mut hasher = Sha256::new();
    hasher.update(path.to_string_lossy().as_bytes());
    format!("{:x}", hasher.finalize())[..16].to_string()
}

/// Test if a directory is writable by creating and removing a test file.
pub async fn test_write_access(dir: &Path) -> bool {
    if fs::create_dir_all(dir).await.is_err() {
        return false;
    }

    let test_file = dir.join(format!(".write-test-{}", Uuid::new_v4()));
    match fs::write(&test_file, b"test").await {
        Ok(_) => {
            let _ = fs::remove_file(&test_file).await;
            true
        }
        Err(_) => false,
    }
}

/// Resolve a writable cache directory for a corpus.
///
/// Fallback chain:
/// 1. **Sidecar** - `<corpus>/.agro-rag-cache/`
/// 2. **Central** - `<platform cache>/agro-rag/rag/<hash of corpus path>/`
///
/// Returns `None` when neither is writable; the caller then runs without a
/// persistent cache.
pub async fn ensure_rag_cache_dir(corpus_dir: &Path) -> Option<WritableDir> {
    let sidecar = get_sidecar_cache_dir(corpus_dir);
    if test_write_access(&sidecar).await {
        tracing::debug!("Using sidecar RAG cache: {:?}", sidecar);
        return Some(WritableDir {
            path: sidecar,
            is_fallback: false,
            fallback_reason: None,
        });
    }

    tracing::info!(
        "Sidecar cache not writable for {:?}, trying central cache",
        corpus_dir
    );

    let central = get_central_rag_cache_dir(corpus_dir);
    if test_write_access(&central).await {
        tracing::info!("Using central RAG cache: {:?}", central);
        return Some(WritableDir {
            path: central,
            is_fallback: true,
            fallback_reason: Some("Corpus directory not writable, using central cache".to_string()),
        });
    }

    tracing::warn!(
        "No writable cache location for {:?}; the index will be rebuilt on every start",
        corpus_dir
    );
    None
}
