//! Deterministic stand-ins for the embedding and generation services.

use async_trait::async_trait;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use crate::error::{RagError, Result};
use crate::protocol::Embedding;
use crate::rag::embedding_client::{EmbeddingMode, EmbeddingService};
use crate::rag::generation_client::GenerationService;
use crate::settings::RagSettings;

pub const MOCK_DIM: usize = 64;

/// Bag-of-words vector: texts sharing words end up close under L2.
pub fn embed_text(text: &str) -> Embedding {
    let mut vector = vec![0.0f32; MOCK_DIM];
    for word in text
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
    {
        let bucket = crc32fast::hash(word.to_lowercase().as_bytes()) as usize % MOCK_DIM;
        vector[bucket] += 1.0;
    }

    let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm == 0.0 {
        vector[0] = 1.0;
    } else {
        vector.iter_mut().for_each(|v| *v /= norm);
    }
    vector
}

pub struct MockEmbedder {
    calls: AtomicUsize,
    document_calls: AtomicUsize,
    batch_sizes: Mutex<Vec<usize>>,
    fail_marker: Option<String>,
    odd_dimension_marker: Option<String>,
    delay: Option<Duration>,
    short_replies: bool,
    fail_queries: AtomicBool,
}

impl MockEmbedder {
    pub fn new() -> Self {
        Self {
            calls: AtomicUsize::new(0),
            document_calls: AtomicUsize::new(0),
            batch_sizes: Mutex::new(Vec::new()),
            fail_marker: None,
            odd_dimension_marker: None,
            delay: None,
            short_replies: false,
            fail_queries: AtomicBool::new(false),
        }
    }

    /// Fail every batch containing a text with `marker`
    pub fn failing_on(mut self, marker: &str) -> Self {
        self.fail_marker = Some(marker.to_string());
        self
    }

    /// Return a 3-dimensional vector for texts containing `marker`
    pub fn odd_dimension_on(mut self, marker: &str) -> Self {
        self.odd_dimension_marker = Some(marker.to_string());
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Reply with one vector fewer than requested
    pub fn short_replies(mut self) -> Self {
        self.short_replies = true;
        self
    }

    pub fn set_fail_queries(&self, fail: bool) {
        self.fail_queries.store(fail, Ordering::SeqCst);
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn document_call_count(&self) -> usize {
        self.document_calls.load(Ordering::SeqCst)
    }

    pub fn batch_sizes(&self) -> Vec<usize> {
        self.batch_sizes.lock().unwrap().clone()
    }

    pub fn vector_for(&self, text: &str) -> Option<Embedding> {
        Some(embed_text(text))
    }
}

#[async_trait]
impl EmbeddingService for MockEmbedder {
    async fn embed(&self, texts: &[String], mode: EmbeddingMode) -> Result<Vec<Option<Embedding>>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if mode == EmbeddingMode::Document {
            self.document_calls.fetch_add(1, Ordering::SeqCst);
        }
        self.batch_sizes.lock().unwrap().push(texts.len());

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if mode == EmbeddingMode::Query && self.fail_queries.load(Ordering::SeqCst) {
            return Err(RagError::Embedding("mock query failure".to_string()));
        }
        if let Some(marker) = &self.fail_marker {
            if texts.iter().any(|t| t.contains(marker.as_str())) {
                return Err(RagError::Embedding("mock batch failure".to_string()));
            }
        }

        let mut vectors: Vec<Option<Embedding>> = texts
            .iter()
            .map(|text| match &self.odd_dimension_marker {
                Some(marker) if text.contains(marker.as_str()) => Some(vec![1.0, 0.0, 0.0]),
                _ => Some(embed_text(text)),
            })
            .collect();
        if self.short_replies {
            vectors.pop();
        }
        Ok(vectors)
    }
}

pub struct MockGenerator {
    prompts: Mutex<Vec<String>>,
    answer: String,
    fail: bool,
    delay: Option<Duration>,
}

impl MockGenerator {
    pub fn new(answer: &str) -> Self {
        Self {
            prompts: Mutex::new(Vec::new()),
            answer: answer.to_string(),
            fail: false,
            delay: None,
        }
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::new("")
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }
}

#[async_trait]
impl GenerationService for MockGenerator {
    async fn generate(&self, prompt: &str) -> Result<String> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail {
            return Err(RagError::Generation("mock generation failure".to_string()));
        }
        Ok(self.answer.clone())
    }
}

/// Settings pointing at a test corpus and cache directory
pub fn test_settings(corpus_dir: &Path, cache_dir: &Path) -> RagSettings {
    RagSettings {
        corpus_dir: corpus_dir.to_path_buf(),
        cache_dir: Some(cache_dir.to_path_buf()),
        api_key: Some("test-key".to_string()),
        embedding_timeout_secs: 5,
        generation_timeout_secs: 5,
        ..RagSettings::default()
    }
}
