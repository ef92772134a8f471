//! Retrieval engine: index lifecycle and the question → answer contract.
//!
//! This module handles:
//! - Building the index from the corpus (extraction, chunking, embedding)
//! - Loading and persisting the index snapshot through the cache
//! - The index state machine shared by all request handlers
//! - Retrieval (context block + deduplicated sources) and answer generation
//!
//! One engine is built at startup and shared as `Arc<RetrievalEngine>`.
//! Builds are serialized by `build_lock`; readers only take the state lock
//! long enough to clone the `Arc` of the ready index.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{Mutex, RwLock};

use super::cache_manager::{CacheStore, INDEX_CACHE_KEY};
use super::document_chunker::chunk_pages;
use super::embedding_client::{EmbeddingClient, EmbeddingService};
use super::generation_client::GenerationService;
use super::pdf_extractor::{extract_document_pages_cached, source_filename};
use super::prompt_builder::{build_answer_prompt, join_context};
use super::vector_index::VectorIndex;
use crate::error::{RagError, Result};
use crate::protocol::{
    BuildReport, ChatReply, Chunk, DocumentPage, Embedding, HistoryTurn, IndexPhase, IndexStatus,
    Retrieval, RetrievedChunk, Source,
};
use crate::settings::RagSettings;

// ============================================================================
// INDEX DATA
// ============================================================================

/// A built index and the chunks its rows point at. Row `i` ↔ `chunks[i]`.
#[derive(Debug)]
pub struct LoadedIndex {
    pub index: VectorIndex,
    pub chunks: Vec<Chunk>,
}

impl LoadedIndex {
    /// Distinct sources in first-appearance order
    pub fn sources(&self) -> Vec<Source> {
        let mut seen = HashSet::new();
        self.chunks
            .iter()
            .map(Chunk::source)
            .filter(|source| seen.insert(source.clone()))
            .collect()
    }
}

/// What is persisted under [`INDEX_CACHE_KEY`]. The build parameters are
/// stored so a snapshot made with other settings is not reused.
#[derive(Debug, Serialize, Deserialize)]
struct IndexSnapshot {
    embedding_model: String,
    chunk_size: usize,
    chunk_overlap: usize,
    index: VectorIndex,
    chunks: Vec<Chunk>,
}

impl IndexSnapshot {
    fn matches(&self, settings: &RagSettings) -> bool {
        self.embedding_model == settings.embedding_model
            && self.chunk_size == settings.chunk_size
            && self.chunk_overlap == settings.chunk_overlap
    }

    fn validate(&self) -> Result<()> {
        if !self.index.is_consistent() || self.index.is_empty() {
            return Err(RagError::InvalidIndex("snapshot index is empty or malformed".to_string()));
        }
        if self.index.len() != self.chunks.len() {
            return Err(RagError::InvalidIndex(format!(
                "snapshot has {} vectors for {} chunks",
                self.index.len(),
                self.chunks.len()
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
enum IndexState {
    Uninitialized,
    Building,
    Ready(Arc<LoadedIndex>),
    Failed(String),
}

// ============================================================================
// HELPERS
// ============================================================================

/// PDFs directly inside `dir` (case-insensitive extension, hidden files
/// skipped), sorted by file name.
pub async fn list_corpus_pdfs(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::warn!("Corpus directory {:?} does not exist", dir);
            return Ok(Vec::new());
        }
        Err(e) => return Err(e.into()),
    };

    let mut files = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        let file_name = path.file_name().and_then(|n| n.to_str()).unwrap_or("");

        if file_name.starts_with('.') {
            continue;
        }
        let is_pdf = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("pdf"));
        if is_pdf && entry.file_type().await.map(|t| t.is_file()).unwrap_or(false) {
            files.push(path);
        }
    }

    files.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
    Ok(files)
}

/// Keep only chunks with a usable vector, dropping each pair together.
///
/// The dimension is fixed by the first vector present; vectors of any other
/// dimension are dropped with their chunk. Returns the kept pairs and the
/// number dropped.
pub fn align_embeddings(
    chunks: Vec<Chunk>,
    vectors: Vec<Option<Embedding>>,
) -> (Vec<Chunk>, Vec<Embedding>, usize) {
    let total = chunks.len();
    let dim = vectors.iter().flatten().map(Vec::len).find(|len| *len > 0);

    let (kept_chunks, kept_vectors): (Vec<Chunk>, Vec<Embedding>) = chunks
        .into_iter()
        .zip(vectors)
        .filter_map(|(chunk, vector)| match (vector, dim) {
            (Some(vector), Some(dim)) if vector.len() == dim => Some((chunk, vector)),
            _ => None,
        })
        .unzip();

    let dropped = total - kept_chunks.len();
    (kept_chunks, kept_vectors, dropped)
}

/// Deduplicate sources by title. The first occurrence wins and rank order is kept.
pub fn dedup_sources<I: IntoIterator<Item = Source>>(sources: I) -> Vec<Source> {
    let mut seen_titles = HashSet::new();
    sources
        .into_iter()
        .filter(|source| seen_titles.insert(source.title.clone()))
        .collect()
}

// ============================================================================
// ENGINE
// ============================================================================

pub struct RetrievalEngine {
    settings: RagSettings,
    embedder: EmbeddingClient,
    generator: Arc<dyn GenerationService>,
    cache: CacheStore,
    state: RwLock<IndexState>,
    build_lock: Mutex<()>,
    last_report: RwLock<Option<BuildReport>>,
}

impl RetrievalEngine {
    pub fn new(
        settings: RagSettings,
        embedding_service: Arc<dyn EmbeddingService>,
        generator: Arc<dyn GenerationService>,
        cache: CacheStore,
    ) -> Self {
        let embedder = EmbeddingClient::from_settings(embedding_service, &settings);
        Self {
            settings,
            embedder,
            generator,
            cache,
            state: RwLock::new(IndexState::Uninitialized),
            build_lock: Mutex::new(()),
            last_report: RwLock::new(None),
        }
    }

    pub fn settings(&self) -> &RagSettings {
        &self.settings
    }

    pub fn cache(&self) -> &CacheStore {
        &self.cache
    }

    /// Report of the most recent successful build or load
    pub async fn last_report(&self) -> Option<BuildReport> {
        self.last_report.read().await.clone()
    }

    async fn ready_index(&self) -> Option<Arc<LoadedIndex>> {
        match &*self.state.read().await {
            IndexState::Ready(loaded) => Some(Arc::clone(loaded)),
            _ => None,
        }
    }

    pub async fn status(&self) -> IndexStatus {
        match &*self.state.read().await {
            IndexState::Uninitialized => IndexStatus {
                phase: IndexPhase::Uninitialized,
                chunk_count: 0,
                dimension: 0,
                failure: None,
            },
            IndexState::Building => IndexStatus {
                phase: IndexPhase::Building,
                chunk_count: 0,
                dimension: 0,
                failure: None,
            },
            IndexState::Ready(loaded) => IndexStatus {
                phase: IndexPhase::Ready,
                chunk_count: loaded.chunks.len(),
                dimension: loaded.index.dim(),
                failure: None,
            },
            IndexState::Failed(reason) => IndexStatus {
                phase: IndexPhase::Failed,
                chunk_count: 0,
                dimension: 0,
                failure: Some(reason.clone()),
            },
        }
    }

    /// Bring the index to Ready, from the cached snapshot when possible.
    /// Retries a failed build; a no-op when already Ready.
    pub async fn initialize(&self) -> Result<BuildReport> {
        self.initialize_inner(true).await
    }

    /// `retry_failed == false` is the lazy path taken by queries: it waits
    /// for an in-flight build and leaves a Failed state alone.
    async fn initialize_inner(&self, retry_failed: bool) -> Result<BuildReport> {
        let _guard = self.build_lock.lock().await;

        let already_ready = {
            let mut state = self.state.write().await;
            match *state {
                IndexState::Ready(_) => true,
                IndexState::Failed(_) if !retry_failed => return Err(RagError::NotReady),
                _ => {
                    *state = IndexState::Building;
                    false
                }
            }
        };

        if already_ready {
            return Ok(self.last_report().await.unwrap_or_default());
        }
        self.run_build(true).await
    }

    /// Drop the cached snapshot and build from the corpus again. The current
    /// index keeps serving queries until the new one replaces it.
    pub async fn rebuild(&self) -> Result<BuildReport> {
        let _guard = self.build_lock.lock().await;

        match self.cache.invalidate(INDEX_CACHE_KEY).await {
            Ok(true) => tracing::info!("Index snapshot invalidated"),
            Ok(false) => {}
            Err(e) => tracing::warn!("Failed to invalidate index snapshot: {}", e),
        }

        {
            let mut state = self.state.write().await;
            if !matches!(*state, IndexState::Ready(_)) {
                *state = IndexState::Building;
            }
        }

        self.run_build(false).await
    }

    /// Release the index and return to Uninitialized
    pub async fn shutdown(&self) {
        let _guard = self.build_lock.lock().await;
        *self.state.write().await = IndexState::Uninitialized;
        *self.last_report.write().await = None;
        tracing::info!("Retrieval engine shut down");
    }

    /// Run one build with the build lock held and publish its outcome
    async fn run_build(&self, use_snapshot: bool) -> Result<BuildReport> {
        match self.build(use_snapshot).await {
            Ok((loaded, report)) => {
                tracing::info!(
                    "Index ready: {} chunks, dim {} ({} ms{})",
                    loaded.chunks.len(),
                    loaded.index.dim(),
                    report.elapsed_ms,
                    if report.loaded_from_cache { ", from cache" } else { "" }
                );
                *self.state.write().await = IndexState::Ready(Arc::new(loaded));
                *self.last_report.write().await = Some(report.clone());
                Ok(report)
            }
            Err(e) => {
                tracing::error!("Index build failed: {}", e);
                *self.state.write().await = IndexState::Failed(e.to_string());
                Err(e)
            }
        }
    }

    async fn load_snapshot(&self) -> Option<LoadedIndex> {
        let snapshot: IndexSnapshot = self.cache.get(INDEX_CACHE_KEY).await?;
        if !snapshot.matches(&self.settings) {
            tracing::info!("Index snapshot was built with different settings, rebuilding");
            return None;
        }
        if let Err(e) = snapshot.validate() {
            tracing::warn!("Discarding index snapshot: {}", e);
            return None;
        }
        Some(LoadedIndex {
            index: snapshot.index,
            chunks: snapshot.chunks,
        })
    }

    async fn build(&self, use_snapshot: bool) -> Result<(LoadedIndex, BuildReport)> {
        let started = Instant::now();
        let mut report = BuildReport::default();

        if use_snapshot {
            if let Some(loaded) = self.load_snapshot().await {
                report.loaded_from_cache = true;
                report.chunks_produced = loaded.chunks.len();
                report.chunks_indexed = loaded.chunks.len();
                report.dimension = loaded.index.dim();
                report.elapsed_ms = started.elapsed().as_millis();
                return Ok((loaded, report));
            }
        }

        let corpus_dir = &self.settings.corpus_dir;
        let files = list_corpus_pdfs(corpus_dir).await?;
        report.files_found = files.len();
        if files.is_empty() {
            return Err(RagError::CorpusEmpty(corpus_dir.clone()));
        }
        tracing::info!("Indexing {} PDF files from {:?}", files.len(), corpus_dir);

        // Phase 1: extraction
        let mut pages: Vec<DocumentPage> = Vec::new();
        for path in &files {
            let outcome =
                extract_document_pages_cached(path, &self.cache, self.settings.verify_file_checksums)
                    .await;
            if outcome.cache_hit {
                report.extraction_cache_hits += 1;
            }
            if outcome.pages.is_empty() {
                report.files_failed.push(source_filename(path));
            } else {
                report.files_extracted += 1;
                pages.extend(outcome.pages);
            }
        }

        // Phase 2: chunking
        let chunks = chunk_pages(&pages, self.settings.chunk_size, self.settings.chunk_overlap);
        report.chunks_produced = chunks.len();
        if chunks.is_empty() {
            return Err(RagError::NoText(corpus_dir.clone()));
        }
        tracing::info!(
            "{} chunks from {} files ({} from extraction cache, {} unreadable)",
            chunks.len(),
            report.files_extracted,
            report.extraction_cache_hits,
            report.files_failed.len()
        );

        // Phase 3: embedding
        let texts: Vec<String> = chunks.iter().map(|c| c.content.clone()).collect();
        let vectors = self.embedder.embed_documents(&texts).await;
        let (chunks, vectors, dropped) = align_embeddings(chunks, vectors);
        report.chunks_dropped = dropped;
        if chunks.is_empty() {
            return Err(RagError::NoValidEmbeddings);
        }
        if dropped > 0 {
            tracing::warn!("Dropped {} chunks without a usable embedding", dropped);
        }

        // Phase 4: index + snapshot
        let snapshot = IndexSnapshot {
            embedding_model: self.settings.embedding_model.clone(),
            chunk_size: self.settings.chunk_size,
            chunk_overlap: self.settings.chunk_overlap,
            index: VectorIndex::build(vectors)?,
            chunks,
        };
        if let Err(e) = self.cache.put(INDEX_CACHE_KEY, &snapshot).await {
            tracing::warn!("Failed to persist index snapshot: {}", e);
        }

        report.chunks_indexed = snapshot.chunks.len();
        report.dimension = snapshot.index.dim();
        report.elapsed_ms = started.elapsed().as_millis();

        Ok((
            LoadedIndex {
                index: snapshot.index,
                chunks: snapshot.chunks,
            },
            report,
        ))
    }

    /// Distinct sources in the ready index (empty when not ready)
    pub async fn indexed_sources(&self) -> Vec<Source> {
        match self.ready_index().await {
            Some(loaded) => loaded.sources(),
            None => Vec::new(),
        }
    }

    /// Nearest chunks for `question`, the joined context and deduplicated sources.
    /// A query vector that matches nothing (wrong dimension) counts as not ready.
    pub async fn retrieve(&self, question: &str, k: usize) -> Result<Retrieval> {
        let loaded = self.ready_index().await.ok_or(RagError::NotReady)?;
        let query = self
            .embedder
            .embed_query(question)
            .await
            .ok_or(RagError::NotReady)?;

        let chunks: Vec<RetrievedChunk> = loaded
            .index
            .search(&query, k)
            .into_iter()
            .filter_map(|hit| {
                loaded.chunks.get(hit.row).map(|chunk| RetrievedChunk {
                    chunk: chunk.clone(),
                    distance: hit.distance,
                })
            })
            .collect();
        if chunks.is_empty() && k > 0 {
            tracing::warn!("Query matched no indexed chunks");
            return Err(RagError::NotReady);
        }

        let texts: Vec<&str> = chunks.iter().map(|c| c.chunk.content.as_str()).collect();
        let context = join_context(&texts);
        let sources = dedup_sources(chunks.iter().map(|c| c.chunk.source()));

        Ok(Retrieval {
            chunks,
            context,
            sources,
        })
    }

    /// Answer a farmer's question. Never fails: problems become the fixed
    /// "not ready" or "server error" replies and are logged here.
    pub async fn query(&self, question: &str, history: &[HistoryTurn]) -> ChatReply {
        let needs_init = matches!(
            *self.state.read().await,
            IndexState::Uninitialized | IndexState::Building
        );
        if needs_init {
            if let Err(e) = self.initialize_inner(false).await {
                tracing::warn!("Index unavailable for query: {}", e);
            }
        }

        let retrieval = match self.retrieve(question, self.settings.top_k).await {
            Ok(retrieval) => retrieval,
            Err(e) => {
                tracing::warn!("Retrieval failed: {}", e);
                return ChatReply::not_ready();
            }
        };

        let prompt = build_answer_prompt(question, &retrieval.context, history);
        let timeout = self.settings.generation_timeout();
        match tokio::time::timeout(timeout, self.generator.generate(&prompt)).await {
            Ok(Ok(answer)) => ChatReply::answered(answer, retrieval.sources),
            Ok(Err(e)) => {
                tracing::error!("Answer generation failed: {}", e);
                ChatReply::failed()
            }
            Err(_) => {
                tracing::error!("Answer generation timed out after {}s", timeout.as_secs());
                ChatReply::failed()
            }
        }
    }
}
