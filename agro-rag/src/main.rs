use clap::Parser;
use std::process::ExitCode;
use std::sync::Arc;

use agro_rag_lib::cli::{apply_cli_overrides, parse_history, CliArgs, Command};
use agro_rag_lib::paths::get_config_path;
use agro_rag_lib::rag::{CacheStore, GeminiEmbeddingService, GeminiGenerationService, RetrievalEngine};
use agro_rag_lib::settings::load_settings;
use agro_rag_lib::{logging, Result};

#[tokio::main]
async fn main() -> ExitCode {
    let args = CliArgs::parse();
    logging::init(&args.log);

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(args: CliArgs) -> Result<()> {
    let config_path = args.config.clone().unwrap_or_else(get_config_path);
    let mut settings = load_settings(&config_path).await;
    apply_cli_overrides(&args, &mut settings);
    settings.validate()?;

    let cache = CacheStore::open(&settings).await;
    if args.command == Command::ClearCache {
        let removed = cache.clear().await?;
        println!("Removed {} cache entries", removed);
        return Ok(());
    }

    if settings.resolve_api_key().is_none() {
        tracing::warn!("No API key configured; embedding and generation calls will fail");
    }
    let embedder = Arc::new(GeminiEmbeddingService::from_settings(&settings)?);
    let generator = Arc::new(GeminiGenerationService::from_settings(&settings)?);
    let engine = Arc::new(RetrievalEngine::new(settings, embedder, generator, cache));

    match args.command {
        Command::Build { force } => {
            let report = if force {
                engine.rebuild().await?
            } else {
                engine.initialize().await?
            };
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Command::Ask { question, history } => {
            let history = match history {
                Some(raw) => parse_history(&raw)?,
                None => Vec::new(),
            };
            let reply = engine.query(&question, &history).await;
            println!("{}", reply.answer);
            if !reply.sources.is_empty() {
                println!();
                println!("Sumber:");
                for source in &reply.sources {
                    println!("- {} ({})", source.title, source.filename);
                }
            }
        }
        Command::Sources => {
            engine.initialize().await?;
            for source in engine.indexed_sources().await {
                println!("{}\t{}", source.filename, source.title);
            }
        }
        Command::Status => {
            // A failed build is reported in the status, not as an error.
            let _ = engine.initialize().await;
            println!("{}", serde_json::to_string_pretty(&engine.status().await)?);
        }
        Command::ClearCache => {}
    }

    engine.shutdown().await;
    Ok(())
}
