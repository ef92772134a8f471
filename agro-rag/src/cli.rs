//! Command-line argument parsing and launch configuration.
//!
//! This module handles CLI argument parsing using clap, and applies
//! launch-time overrides to the settings loaded from disk.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::error::{RagError, Result};
use crate::protocol::HistoryTurn;
use crate::settings::RagSettings;

/// CLI arguments for agro-rag
#[derive(Parser, Debug, Clone)]
#[command(name = "agro-rag", about = "Retrieval core of the agricultural complaint chatbot")]
pub struct CliArgs {
    /// Settings file (defaults to the platform config directory)
    #[arg(long, value_name = "PATH", env = "AGRO_RAG_CONFIG", global = true)]
    pub config: Option<PathBuf>,
    /// Directory holding the PDF corpus
    #[arg(long, value_name = "DIR", env = "AGRO_RAG_CORPUS_DIR", global = true)]
    pub corpus_dir: Option<PathBuf>,
    /// Cache directory (overrides the sidecar/central fallback)
    #[arg(long, value_name = "DIR", env = "AGRO_RAG_CACHE_DIR", global = true)]
    pub cache_dir: Option<PathBuf>,
    /// Run without the on-disk cache
    #[arg(long, env = "AGRO_RAG_NO_CACHE", global = true)]
    pub no_cache: bool,
    /// Re-extract cached PDFs whose checksum changed
    #[arg(
        long,
        value_name = "BOOL",
        env = "AGRO_RAG_VERIFY_CHECKSUMS",
        global = true,
        value_parser = clap::builder::BoolishValueParser::new()
    )]
    pub verify_checksums: Option<bool>,
    /// Chunk window size in characters
    #[arg(long, value_name = "INT", env = "AGRO_RAG_CHUNK_SIZE", global = true)]
    pub chunk_size: Option<usize>,
    /// Characters shared by consecutive chunks
    #[arg(long, value_name = "INT", env = "AGRO_RAG_CHUNK_OVERLAP", global = true)]
    pub chunk_overlap: Option<usize>,
    /// Number of chunks retrieved per question
    #[arg(long, value_name = "INT", env = "AGRO_RAG_TOP_K", global = true)]
    pub top_k: Option<usize>,
    /// Base URL of the Gemini-compatible API
    #[arg(long, value_name = "URL", env = "AGRO_RAG_API_BASE", global = true)]
    pub api_base: Option<String>,
    #[arg(long, value_name = "MODEL", env = "AGRO_RAG_EMBEDDING_MODEL", global = true)]
    pub embedding_model: Option<String>,
    #[arg(long, value_name = "MODEL", env = "AGRO_RAG_GENERATION_MODEL", global = true)]
    pub generation_model: Option<String>,
    /// Log filter used when RUST_LOG is unset
    #[arg(long, value_name = "FILTER", env = "AGRO_RAG_LOG", default_value = "info", global = true)]
    pub log: String,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// Build (or load) the index and print the build report
    Build {
        /// Ignore the cached index snapshot
        #[arg(long)]
        force: bool,
    },
    /// Ask one question and print the answer with its sources
    Ask {
        question: String,
        /// Earlier conversation as a JSON array of {"user", "bot"} turns (inline or @path)
        #[arg(long, value_name = "JSON_OR_@FILE")]
        history: Option<String>,
    },
    /// List the source documents present in the index
    Sources,
    /// Print the index status as JSON
    Status,
    /// Delete every cached extraction and index snapshot
    ClearCache,
}

/// Read a value that may be either a literal string or a @path reference to a file
pub fn read_value_or_file(raw: &str) -> Result<String> {
    match raw.strip_prefix('@') {
        Some(path) => Ok(std::fs::read_to_string(path)?),
        None => Ok(raw.to_string()),
    }
}

/// Parse `--history` into conversation turns
pub fn parse_history(raw: &str) -> Result<Vec<HistoryTurn>> {
    let data = read_value_or_file(raw)?;
    serde_json::from_str(&data).map_err(|e| RagError::Config(format!("invalid history JSON: {}", e)))
}

/// Apply CLI overrides to settings without persisting them.
pub fn apply_cli_overrides(args: &CliArgs, settings: &mut RagSettings) {
    if let Some(dir) = &args.corpus_dir {
        settings.corpus_dir = dir.clone();
    }
    if let Some(dir) = &args.cache_dir {
        settings.cache_dir = Some(dir.clone());
    }
    if args.no_cache {
        settings.cache_enabled = false;
    }
    if let Some(v) = args.verify_checksums {
        settings.verify_file_checksums = v;
    }
    if let Some(size) = args.chunk_size {
        settings.chunk_size = size;
    }
    if let Some(overlap) = args.chunk_overlap {
        settings.chunk_overlap = overlap;
    }
    if let Some(k) = args.top_k {
        settings.top_k = k;
    }
    if let Some(base) = &args.api_base {
        settings.api_base = base.clone();
    }
    if let Some(model) = &args.embedding_model {
        settings.embedding_model = model.clone();
    }
    if let Some(model) = &args.generation_model {
        settings.generation_model = model.clone();
    }
}
