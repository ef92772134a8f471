//! End-to-end scenarios for the retrieval engine over generated PDFs.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::tempdir;

use super::support::{test_settings, MockEmbedder, MockGenerator};
use crate::error::RagError;
use crate::protocol::{HistoryTurn, IndexPhase, ReplyOutcome, Source, GENERATION_FAILED_REPLY};
use crate::rag::pdf_extractor::test_support::write_pdf;
use crate::rag::{CacheStore, RetrievalEngine};
use crate::settings::RagSettings;

const BLAST_TITLE: &str = "Rice Blast Disease Management";

fn write_blast_pdf(dir: &Path) {
    write_pdf(
        &dir.join("blast.pdf"),
        &[
            vec![
                (24, BLAST_TITLE),
                (12, "Rice blast is caused by the fungus Magnaporthe oryzae."),
                (12, "Symptoms are diamond shaped lesions on rice leaves."),
            ],
            vec![(12, "Manage blast with resistant varieties and balanced nitrogen.")],
        ],
    );
}

fn write_topic_pdf(dir: &Path, file_name: &str, title: &str, body: &str) {
    write_pdf(&dir.join(file_name), &[vec![(20, title), (11, body)]]);
}

fn engine_with(
    settings: RagSettings,
    embedder: Arc<MockEmbedder>,
    generator: Arc<MockGenerator>,
) -> RetrievalEngine {
    let cache = match &settings.cache_dir {
        Some(dir) => CacheStore::new(dir.clone()),
        None => CacheStore::disabled(),
    };
    RetrievalEngine::new(settings, embedder, generator, cache)
}

#[tokio::test]
async fn rice_blast_question_is_answered_from_its_paper() {
    let corpus = tempdir().unwrap();
    let cache = tempdir().unwrap();
    write_blast_pdf(corpus.path());

    let embedder = Arc::new(MockEmbedder::new());
    let generator = Arc::new(MockGenerator::new("Tanam varietas tahan dan kurangi nitrogen."));
    let engine = engine_with(
        test_settings(corpus.path(), cache.path()),
        embedder.clone(),
        generator.clone(),
    );

    let history = vec![HistoryTurn {
        user: "Halo".to_string(),
        bot: "Halo, ada yang bisa dibantu?".to_string(),
    }];
    let reply = engine.query("How do I manage rice blast?", &history).await;

    assert_eq!(reply.outcome, ReplyOutcome::Answered);
    assert!(!reply.answer.is_empty());
    assert_eq!(
        reply.sources,
        vec![Source {
            title: BLAST_TITLE.to_string(),
            filename: "blast.pdf".to_string(),
        }]
    );

    let prompts = generator.prompts();
    assert_eq!(prompts.len(), 1);
    assert!(prompts[0].contains("Magnaporthe"));
    assert!(prompts[0].contains("How do I manage rice blast?"));
    assert!(prompts[0].contains("Petani: Halo"));

    let status = engine.status().await;
    assert_eq!(status.phase, IndexPhase::Ready);
    assert!(status.chunk_count >= 1);
}

#[tokio::test]
async fn empty_corpus_fails_and_queries_get_not_ready() {
    let corpus = tempdir().unwrap();
    let cache = tempdir().unwrap();
    let embedder = Arc::new(MockEmbedder::new());
    let generator = Arc::new(MockGenerator::new("unused"));
    let engine = engine_with(
        test_settings(corpus.path(), cache.path()),
        embedder.clone(),
        generator.clone(),
    );

    let err = engine.initialize().await.unwrap_err();
    assert!(matches!(err, RagError::CorpusEmpty(_)));
    let status = engine.status().await;
    assert_eq!(status.phase, IndexPhase::Failed);
    assert!(status.failure.is_some());

    let reply = engine.query("Apa itu wereng?", &[]).await;
    assert_eq!(reply.outcome, ReplyOutcome::NotReady);
    assert_eq!(reply.outcome.status_code(), 200);
    assert!(reply.sources.is_empty());
    assert!(generator.prompts().is_empty());
    assert_eq!(embedder.call_count(), 0);

    // Failed is sticky for queries; an explicit rebuild recovers.
    write_blast_pdf(corpus.path());
    assert_eq!(engine.query("blast", &[]).await.outcome, ReplyOutcome::NotReady);
    engine.rebuild().await.unwrap();
    assert_eq!(engine.query("blast", &[]).await.outcome, ReplyOutcome::Answered);
}

#[tokio::test]
async fn unreadable_pdfs_only_is_a_failed_build() {
    let corpus = tempdir().unwrap();
    let cache = tempdir().unwrap();
    std::fs::write(corpus.path().join("rusak.pdf"), b"not a pdf at all").unwrap();

    let engine = engine_with(
        test_settings(corpus.path(), cache.path()),
        Arc::new(MockEmbedder::new()),
        Arc::new(MockGenerator::new("unused")),
    );
    assert!(matches!(engine.initialize().await, Err(RagError::NoText(_))));
    assert_eq!(engine.status().await.phase, IndexPhase::Failed);
}

#[tokio::test]
async fn partial_embedding_failure_keeps_chunks_and_vectors_aligned() {
    let corpus = tempdir().unwrap();
    let cache = tempdir().unwrap();
    write_topic_pdf(
        corpus.path(),
        "a_wereng.pdf",
        "Pengendalian Hama Wereng Coklat",
        "Wereng coklat menghisap cairan batang padi.",
    );
    write_topic_pdf(
        corpus.path(),
        "b_jagung.pdf",
        "Budidaya Jagung Hibrida Unggul",
        "Jagung hibrida ZZFAILZZ membutuhkan pupuk nitrogen tinggi.",
    );
    write_topic_pdf(
        corpus.path(),
        "c_cabai.pdf",
        "Penyakit Antraknosa Pada Cabai",
        "Antraknosa menyebabkan buah cabai membusuk.",
    );
    write_topic_pdf(
        corpus.path(),
        "d_tomat.pdf",
        "Layu Bakteri Tanaman Tomat Dataran",
        "Layu bakteri ODDDIM menyerang akar tomat.",
    );

    let settings = RagSettings {
        embedding_batch_size: 1,
        ..test_settings(corpus.path(), cache.path())
    };
    let embedder = Arc::new(
        MockEmbedder::new()
            .failing_on("ZZFAILZZ")
            .odd_dimension_on("ODDDIM"),
    );
    let engine = engine_with(settings, embedder, Arc::new(MockGenerator::new("ok")));

    let report = engine.initialize().await.unwrap();
    assert_eq!(report.files_extracted, 4);
    assert_eq!(report.chunks_dropped, 2);
    assert_eq!(report.chunks_indexed, report.chunks_produced - 2);

    let titles: Vec<String> = engine
        .indexed_sources()
        .await
        .into_iter()
        .map(|s| s.title)
        .collect();
    assert_eq!(
        titles,
        vec![
            "Pengendalian Hama Wereng Coklat".to_string(),
            "Penyakit Antraknosa Pada Cabai".to_string(),
        ]
    );

    // Every indexed chunk is found at distance zero by its own text.
    let everything = engine.retrieve("padi", 100).await.unwrap();
    assert_eq!(everything.chunks.len(), report.chunks_indexed);
    for retrieved in &everything.chunks {
        let own = engine.retrieve(&retrieved.chunk.content, 1).await.unwrap();
        assert_eq!(own.chunks[0].chunk, retrieved.chunk);
        assert_eq!(own.chunks[0].distance, 0.0);
    }
}

#[tokio::test]
async fn retrieval_orders_by_distance_and_dedups_sources() {
    let corpus = tempdir().unwrap();
    let cache = tempdir().unwrap();
    write_pdf(
        &corpus.path().join("wereng.pdf"),
        &[
            vec![(20, "Pengendalian Hama Wereng Coklat"), (11, "Wereng coklat menyerang padi sawah.")],
            vec![(11, "Insektisida untuk wereng coklat dipakai bergiliran.")],
        ],
    );
    write_topic_pdf(
        corpus.path(),
        "kedelai.pdf",
        "Budidaya Kedelai Lahan Kering",
        "Kedelai ditanam setelah panen padi.",
    );

    let settings = RagSettings {
        chunk_size: 40,
        chunk_overlap: 5,
        ..test_settings(corpus.path(), cache.path())
    };
    let engine = engine_with(
        settings,
        Arc::new(MockEmbedder::new()),
        Arc::new(MockGenerator::new("ok")),
    );
    engine.initialize().await.unwrap();

    let retrieval = engine.retrieve("wereng coklat", 5).await.unwrap();
    assert!(retrieval.chunks.len() <= 5);
    assert!(retrieval
        .chunks
        .windows(2)
        .all(|w| w[0].distance <= w[1].distance));
    assert_eq!(retrieval.chunks[0].chunk.source_filename, "wereng.pdf");
    assert_eq!(retrieval.sources[0].filename, "wereng.pdf");

    let mut titles: Vec<&str> = retrieval.sources.iter().map(|s| s.title.as_str()).collect();
    let before = titles.len();
    titles.dedup();
    assert_eq!(titles.len(), before);

    let separators = retrieval.context.matches("\n\n---\n\n").count();
    assert_eq!(separators, retrieval.chunks.len() - 1);
}

#[tokio::test]
async fn query_embedding_failure_is_not_ready() {
    let corpus = tempdir().unwrap();
    let cache = tempdir().unwrap();
    write_blast_pdf(corpus.path());

    let embedder = Arc::new(MockEmbedder::new());
    let generator = Arc::new(MockGenerator::new("unused"));
    let engine = engine_with(
        test_settings(corpus.path(), cache.path()),
        embedder.clone(),
        generator.clone(),
    );
    engine.initialize().await.unwrap();

    embedder.set_fail_queries(true);
    let reply = engine.query("blast?", &[]).await;
    assert_eq!(reply.outcome, ReplyOutcome::NotReady);
    assert!(generator.prompts().is_empty());
    assert!(matches!(engine.retrieve("blast?", 5).await, Err(RagError::NotReady)));
}

#[tokio::test]
async fn wrong_dimension_query_is_not_ready() {
    let corpus = tempdir().unwrap();
    let cache = tempdir().unwrap();
    write_blast_pdf(corpus.path());

    let generator = Arc::new(MockGenerator::new("unused"));
    let engine = engine_with(
        test_settings(corpus.path(), cache.path()),
        Arc::new(MockEmbedder::new().odd_dimension_on("ODDDIM")),
        generator.clone(),
    );
    engine.initialize().await.unwrap();

    assert!(matches!(
        engine.retrieve("ODDDIM blast?", 5).await,
        Err(RagError::NotReady)
    ));
    let reply = engine.query("ODDDIM blast?", &[]).await;
    assert_eq!(reply.outcome, ReplyOutcome::NotReady);
    assert!(reply.sources.is_empty());
    assert!(generator.prompts().is_empty());

    assert_eq!(engine.query("blast?", &[]).await.outcome, ReplyOutcome::Answered);
}

#[tokio::test]
async fn generation_failure_is_a_polite_server_error() {
    let corpus = tempdir().unwrap();
    let cache = tempdir().unwrap();
    write_blast_pdf(corpus.path());

    let engine = engine_with(
        test_settings(corpus.path(), cache.path()),
        Arc::new(MockEmbedder::new()),
        Arc::new(MockGenerator::failing()),
    );
    let reply = engine.query("blast?", &[]).await;
    assert_eq!(reply.outcome, ReplyOutcome::Failed);
    assert_eq!(reply.outcome.status_code(), 500);
    assert_eq!(reply.answer, GENERATION_FAILED_REPLY);
    assert!(reply.sources.is_empty());
}

#[tokio::test]
async fn slow_generation_times_out() {
    let corpus = tempdir().unwrap();
    let cache = tempdir().unwrap();
    write_blast_pdf(corpus.path());

    let settings = RagSettings {
        generation_timeout_secs: 1,
        ..test_settings(corpus.path(), cache.path())
    };
    let engine = engine_with(
        settings,
        Arc::new(MockEmbedder::new()),
        Arc::new(MockGenerator::new("late").with_delay(Duration::from_secs(3))),
    );
    assert_eq!(engine.query("blast?", &[]).await.outcome, ReplyOutcome::Failed);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_first_queries_share_one_build() {
    let corpus = tempdir().unwrap();
    let cache = tempdir().unwrap();
    write_blast_pdf(corpus.path());

    let embedder = Arc::new(MockEmbedder::new());
    let engine = Arc::new(engine_with(
        test_settings(corpus.path(), cache.path()),
        embedder.clone(),
        Arc::new(MockGenerator::new("jawaban")),
    ));

    let handles: Vec<_> = (0..8)
        .map(|i| {
            let engine = Arc::clone(&engine);
            tokio::spawn(async move { engine.query(&format!("rice blast {}", i), &[]).await })
        })
        .collect();

    for handle in handles {
        let reply = handle.await.unwrap();
        assert_eq!(reply.outcome, ReplyOutcome::Answered);
        assert_eq!(reply.sources.len(), 1);
    }
    assert_eq!(embedder.document_call_count(), 1);
}

#[tokio::test]
async fn rebuild_and_shutdown_move_through_states() {
    let corpus = tempdir().unwrap();
    let cache = tempdir().unwrap();
    write_blast_pdf(corpus.path());

    let embedder = Arc::new(MockEmbedder::new());
    let engine = engine_with(
        test_settings(corpus.path(), cache.path()),
        embedder.clone(),
        Arc::new(MockGenerator::new("ok")),
    );
    assert_eq!(engine.status().await.phase, IndexPhase::Uninitialized);

    engine.initialize().await.unwrap();
    let first_calls = embedder.document_call_count();

    // Ready is a no-op for initialize.
    engine.initialize().await.unwrap();
    assert_eq!(embedder.document_call_count(), first_calls);

    write_topic_pdf(
        corpus.path(),
        "wereng.pdf",
        "Pengendalian Hama Wereng Coklat",
        "Wereng coklat menyerang padi.",
    );
    let report = engine.rebuild().await.unwrap();
    assert!(!report.loaded_from_cache);
    assert_eq!(report.files_found, 2);
    assert_eq!(engine.indexed_sources().await.len(), 2);

    engine.shutdown().await;
    assert_eq!(engine.status().await.phase, IndexPhase::Uninitialized);
    assert!(engine.indexed_sources().await.is_empty());
    assert!(engine.last_report().await.is_none());
}
