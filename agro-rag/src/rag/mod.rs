//! RAG (Retrieval-Augmented Generation) core for the farmer assistant.
//!
//! This module provides:
//! - `RetrievalEngine`: index lifecycle, retrieval and answer generation
//! - PDF text extraction with font-size title inference
//! - Per-document fixed-window chunking
//! - Batched, memoized embedding behind the `EmbeddingService` seam
//! - A flat exact L2 index and a JSON blob cache for extraction and index snapshots

pub mod cache_manager;
pub mod document_chunker;
pub mod embedding_client;
pub mod generation_client;
pub mod pdf_extractor;
pub mod prompt_builder;
pub mod retrieval_engine;
pub mod vector_index;

pub use cache_manager::{CacheStore, ExtractionCacheEntry, INDEX_CACHE_KEY};
pub use document_chunker::chunk_pages;
pub use embedding_client::{EmbeddingClient, EmbeddingMode, EmbeddingService, GeminiEmbeddingService};
pub use generation_client::{GeminiGenerationService, GenerationService};
pub use pdf_extractor::{extract_document_pages, extract_document_pages_cached};
pub use retrieval_engine::{dedup_sources, LoadedIndex, RetrievalEngine};
pub use vector_index::{SearchHit, VectorIndex};
