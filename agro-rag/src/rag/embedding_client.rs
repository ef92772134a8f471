//! Embedding client: batching, memoization and timeouts over an
//! [`EmbeddingService`].
//!
//! Results are always aligned 1:1 with the input texts. A failed batch maps
//! its texts to `None` instead of failing the whole call, so the caller can
//! drop exactly the chunks that have no vector.

use async_trait::async_trait;
use lru::LruCache;
use serde::{Deserialize, Serialize};
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use super::cache_manager::compute_content_hash;
use crate::error::{RagError, Result};
use crate::protocol::Embedding;
use crate::settings::RagSettings;

/// Which side of retrieval a text is embedded for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EmbeddingMode {
    Document,
    Query,
}

impl EmbeddingMode {
    pub fn as_task_type(self) -> &'static str {
        match self {
            EmbeddingMode::Document => "RETRIEVAL_DOCUMENT",
            EmbeddingMode::Query => "RETRIEVAL_QUERY",
        }
    }
}

/// A remote (or mocked) text embedding model.
///
/// Implementations return one entry per input text; `None` marks a text the
/// service produced no vector for.
#[async_trait]
pub trait EmbeddingService: Send + Sync {
    async fn embed(&self, texts: &[String], mode: EmbeddingMode) -> Result<Vec<Option<Embedding>>>;
}

// ============================================================================
// GEMINI HTTP SERVICE
// ============================================================================

#[derive(Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Serialize)]
struct Content<'a> {
    parts: Vec<Part<'a>>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct EmbedContentRequest<'a> {
    model: &'a str,
    content: Content<'a>,
    task_type: &'static str,
}

#[derive(Serialize)]
struct BatchEmbedRequest<'a> {
    requests: Vec<EmbedContentRequest<'a>>,
}

#[derive(Deserialize)]
struct ContentEmbedding {
    #[serde(default)]
    values: Vec<f32>,
}

#[derive(Deserialize)]
struct BatchEmbedResponse {
    #[serde(default)]
    embeddings: Vec<ContentEmbedding>,
}

/// Embeddings through the Gemini `batchEmbedContents` endpoint
#[derive(Clone)]
pub struct GeminiEmbeddingService {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    api_key: Option<String>,
}

impl GeminiEmbeddingService {
    pub fn new(api_base: &str, model: &str, api_key: Option<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        let endpoint = format!("{}/{}:batchEmbedContents", api_base.trim_end_matches('/'), model);
        Ok(Self {
            client,
            endpoint,
            model: model.to_string(),
            api_key,
        })
    }

    pub fn from_settings(settings: &RagSettings) -> Result<Self> {
        Self::new(
            &settings.api_base,
            &settings.embedding_model,
            settings.resolve_api_key(),
            settings.embedding_timeout(),
        )
    }
}

#[async_trait]
impl EmbeddingService for GeminiEmbeddingService {
    async fn embed(&self, texts: &[String], mode: EmbeddingMode) -> Result<Vec<Option<Embedding>>> {
        let Some(api_key) = self.api_key.as_deref() else {
            return Err(RagError::Embedding("no API key configured".to_string()));
        };

        let request = BatchEmbedRequest {
            requests: texts
                .iter()
                .map(|text| EmbedContentRequest {
                    model: &self.model,
                    content: Content {
                        parts: vec![Part { text }],
                    },
                    task_type: mode.as_task_type(),
                })
                .collect(),
        };

        let response = self
            .client
            .post(&self.endpoint)
            .header("x-goog-api-key", api_key)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<body unavailable>".to_string());
            return Err(RagError::Embedding(format!("request failed ({}): {}", status, body)));
        }

        let parsed: BatchEmbedResponse = response.json().await?;
        Ok(parsed
            .embeddings
            .into_iter()
            .map(|e| if e.values.is_empty() { None } else { Some(e.values) })
            .collect())
    }
}

// ============================================================================
// CLIENT
// ============================================================================

/// Batching and memoizing front of an [`EmbeddingService`]
pub struct EmbeddingClient {
    service: Arc<dyn EmbeddingService>,
    batch_size: usize,
    timeout: Duration,
    /// sha256(mode ‖ text) -> vector
    cache: Mutex<LruCache<String, Embedding>>,
}

impl EmbeddingClient {
    pub fn new(
        service: Arc<dyn EmbeddingService>,
        batch_size: usize,
        cache_capacity: usize,
        timeout: Duration,
    ) -> Self {
        let capacity = NonZeroUsize::new(cache_capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            service,
            batch_size: batch_size.max(1),
            timeout,
            cache: Mutex::new(LruCache::new(capacity)),
        }
    }

    pub fn from_settings(service: Arc<dyn EmbeddingService>, settings: &RagSettings) -> Self {
        Self::new(
            service,
            settings.embedding_batch_size,
            settings.embedding_cache_capacity,
            settings.embedding_timeout(),
        )
    }

    fn memo_key(mode: EmbeddingMode, text: &str) -> String {
        compute_content_hash(&format!("{}\u{1f}{}", mode.as_task_type(), text))
    }

    fn lock_cache(&self) -> MutexGuard<'_, LruCache<String, Embedding>> {
        match self.cache.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Number of memoized vectors
    pub fn cached_len(&self) -> usize {
        self.lock_cache().len()
    }

    /// One service call under the timeout. A reply with the wrong number of
    /// items counts as a failure.
    async fn call_service(&self, texts: &[String], mode: EmbeddingMode) -> Result<Vec<Option<Embedding>>> {
        let vectors = tokio::time::timeout(self.timeout, self.service.embed(texts, mode))
            .await
            .map_err(|_| RagError::Timeout {
                operation: "embedding",
                secs: self.timeout.as_secs(),
            })??;

        if vectors.len() != texts.len() {
            return Err(RagError::Embedding(format!(
                "service returned {} embeddings for {} texts",
                vectors.len(),
                texts.len()
            )));
        }
        Ok(vectors)
    }

    /// Embed `texts` in batches. The result has one entry per input.
    pub async fn embed_documents(&self, texts: &[String]) -> Vec<Option<Embedding>> {
        let mode = EmbeddingMode::Document;
        let mut results: Vec<Option<Embedding>> = vec![None; texts.len()];
        let started = Instant::now();
        let mut memo_hits = 0;
        let mut failed_batches = 0;

        for (batch_number, batch_start) in (0..texts.len()).step_by(self.batch_size).enumerate() {
            let batch_end = (batch_start + self.batch_size).min(texts.len());

            let mut pending_rows = Vec::new();
            let mut pending_keys = Vec::new();
            let mut pending_texts = Vec::new();
            {
                let mut cache = self.lock_cache();
                for row in batch_start..batch_end {
                    let key = Self::memo_key(mode, &texts[row]);
                    if let Some(vector) = cache.get(&key) {
                        results[row] = Some(vector.clone());
                        memo_hits += 1;
                    } else {
                        pending_rows.push(row);
                        pending_keys.push(key);
                        pending_texts.push(texts[row].clone());
                    }
                }
            }

            if pending_texts.is_empty() {
                continue;
            }

            match self.call_service(&pending_texts, mode).await {
                Ok(vectors) => {
                    let mut cache = self.lock_cache();
                    for ((row, key), vector) in pending_rows.into_iter().zip(pending_keys).zip(vectors) {
                        if let Some(vector) = vector {
                            cache.put(key, vector.clone());
                            results[row] = Some(vector);
                        }
                    }
                }
                Err(e) => {
                    failed_batches += 1;
                    tracing::warn!(
                        "Embedding batch {} ({} texts) failed: {}",
                        batch_number + 1,
                        pending_texts.len(),
                        e
                    );
                }
            }
        }

        let embedded = results.iter().filter(|r| r.is_some()).count();
        tracing::info!(
            "Embedded {}/{} texts in {:.2}s ({} memoized, {} failed batches)",
            embedded,
            texts.len(),
            started.elapsed().as_secs_f64(),
            memo_hits,
            failed_batches
        );
        results
    }

    /// Embed a single query. `None` on failure or timeout.
    pub async fn embed_query(&self, text: &str) -> Option<Embedding> {
        let mode = EmbeddingMode::Query;
        let key = Self::memo_key(mode, text);
        let memoized = self.lock_cache().get(&key).cloned();
        if memoized.is_some() {
            return memoized;
        }

        match self.call_service(&[text.to_string()], mode).await {
            Ok(mut vectors) => {
                let vector = vectors.pop().flatten()?;
                self.lock_cache().put(key, vector.clone());
                Some(vector)
            }
            Err(e) => {
                tracing::warn!("Query embedding failed: {}", e);
                None
            }
        }
    }
}
