use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeZone, Utc};
use docrag_core::config::RetrievalSettings;
use docrag_core::error::Error;
use docrag_core::splitter::TextSplitter;
use docrag_core::traits::{ChunkStore, Embedder};
use docrag_core::types::{FetchQuery, MetaValue};
use docrag_core::validate::ChunkIndexPolicy;
use docrag_embed::HashEmbedder;
use docrag_retrieval::{Ingestor, Retriever, SearchRequest};
use docrag_vector::MemoryChunkStore;

/// Drops the last vector of every batch.
struct ShortEmbedder;

impl Embedder for ShortEmbedder {
    fn dim(&self) -> usize { 4 }
    fn max_len(&self) -> usize { 512 }
    fn embed_many(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>> {
        Ok(texts.iter().skip(1).map(|_| vec![1.0, 0.0, 0.0, 0.0]).collect())
    }
}

fn pages(texts: &[&str]) -> Vec<String> {
    texts.iter().map(|t| (*t).to_string()).collect()
}

#[tokio::test]
async fn chunks_are_numbered_across_pages() {
    let store = Arc::new(MemoryChunkStore::new(ChunkIndexPolicy::Strict, None));
    let splitter = TextSplitter::new(40, 0).unwrap();
    let ingestor = Ingestor::new(store.clone(), Arc::new(HashEmbedder::new(64)), splitter, 2, Duration::from_secs(5));
    let at = Utc.with_ymd_and_hms(2024, 5, 1, 9, 30, 0).unwrap();

    let doc = pages(&[
        "First paragraph on page one.\n\nSecond paragraph on page one.",
        "Only paragraph on page two.",
        "",
    ]);
    let report = ingestor.ingest("Contract A.pdf", &doc, at).await.unwrap();
    assert_eq!(report.chunks, 3);
    assert_eq!(report.namespace.as_str(), format!("contract_a-{}", at.timestamp()));

    let stored = store.fetch(&FetchQuery::new().namespace(report.namespace.clone())).await.unwrap();
    let layout: Vec<(i64, i64)> = stored.iter().map(|c| (c.page().unwrap(), c.chunk_index().unwrap())).collect();
    assert_eq!(layout, vec![(0, 0), (0, 1), (1, 2)]);
    assert!(stored.iter().all(|c| c.filename() == Some("Contract A.pdf") && c.created_at() == Some(at)));
    assert_eq!(stored[2].id, report.namespace.chunk_id(2));
    assert_eq!(store.namespaces().await.unwrap(), vec![report.namespace]);
}

#[tokio::test]
async fn repeated_uploads_get_distinct_namespaces() {
    let store = Arc::new(MemoryChunkStore::new(ChunkIndexPolicy::Strict, None));
    let ingestor = Ingestor::new(store.clone(), Arc::new(HashEmbedder::new(16)), TextSplitter::default(), 8, Duration::from_secs(5));
    let doc = pages(&["same text"]);
    let first = ingestor.ingest("a.pdf", &doc, Utc.timestamp_opt(1_700_000_000, 0).unwrap()).await.unwrap();
    let second = ingestor.ingest("a.pdf", &doc, Utc.timestamp_opt(1_700_000_060, 0).unwrap()).await.unwrap();
    assert_ne!(first.namespace, second.namespace);
    assert_eq!(store.fetch(&FetchQuery::new()).await.unwrap().len(), 2);
}

#[tokio::test]
async fn colliding_names_in_one_second_each_get_a_namespace() {
    let store = Arc::new(MemoryChunkStore::new(ChunkIndexPolicy::Strict, None));
    let ingestor = Ingestor::new(store.clone(), Arc::new(HashEmbedder::new(16)), TextSplitter::default(), 8, Duration::from_secs(5));
    let at = Utc.with_ymd_and_hms(2024, 5, 1, 9, 30, 0).unwrap();

    let a = ingestor.ingest("Report A.txt", &pages(&["quarterly revenue"]), at).await.unwrap();
    let b = ingestor.ingest("report_a.txt", &pages(&["annual headcount"]), at).await.unwrap();
    let c = ingestor.ingest("dir2/Report A.txt", &pages(&["office lease"]), at).await.unwrap();

    let base = format!("report_a-{}", at.timestamp());
    assert_eq!(a.namespace.as_str(), base);
    assert_eq!(b.namespace.as_str(), format!("{base}-2"));
    assert_eq!(c.namespace.as_str(), format!("{base}-3"));
    assert_eq!(store.namespaces().await.unwrap(), vec![a.namespace, b.namespace.clone(), c.namespace]);

    let second = store.fetch(&FetchQuery::new().namespace(b.namespace)).await.unwrap();
    assert_eq!(second.len(), 1);
    assert_eq!(second[0].filename(), Some("report_a.txt"));
}

#[tokio::test]
async fn concurrent_ingests_of_one_file_do_not_collide() {
    let store = Arc::new(MemoryChunkStore::new(ChunkIndexPolicy::Strict, None));
    let ingestor = Arc::new(Ingestor::new(store.clone(), Arc::new(HashEmbedder::new(16)), TextSplitter::default(), 8, Duration::from_secs(5)));
    let at = Utc.timestamp_opt(1_700_000_000, 0).unwrap();

    let tasks: Vec<_> = (0..4)
        .map(|_| {
            let ingestor = Arc::clone(&ingestor);
            tokio::spawn(async move { ingestor.ingest("a.pdf", &pages(&["same text"]), at).await })
        })
        .collect();
    for task in tasks {
        task.await.unwrap().unwrap();
    }
    assert_eq!(store.namespaces().await.unwrap().len(), 4);
    assert_eq!(store.fetch(&FetchQuery::new()).await.unwrap().len(), 4);
}

#[tokio::test]
async fn blank_document_is_an_empty_batch() {
    let store = Arc::new(MemoryChunkStore::new(ChunkIndexPolicy::Strict, None));
    let ingestor = Ingestor::new(store.clone(), Arc::new(HashEmbedder::new(16)), TextSplitter::default(), 8, Duration::from_secs(5));
    let err = ingestor.ingest("blank.pdf", &pages(&["  ", "\n\n"]), Utc::now()).await.unwrap_err();
    assert!(matches!(err, Error::EmptyBatch));
    assert!(store.namespaces().await.unwrap().is_empty());
}

#[tokio::test]
async fn short_provider_output_is_rejected() {
    let store = Arc::new(MemoryChunkStore::new(ChunkIndexPolicy::Strict, None));
    let ingestor = Ingestor::new(store.clone(), Arc::new(ShortEmbedder), TextSplitter::default(), 8, Duration::from_secs(5));
    let err = ingestor.ingest("a.pdf", &pages(&["one", "two"]), Utc::now()).await.unwrap_err();
    assert!(matches!(err, Error::EmbeddingFailure(_)));
    assert!(store.fetch(&FetchQuery::new()).await.unwrap().is_empty());
}

#[tokio::test]
async fn ingested_text_is_searchable() {
    let store = Arc::new(MemoryChunkStore::new(ChunkIndexPolicy::Strict, None));
    let embedder: Arc<dyn Embedder> = Arc::new(HashEmbedder::new(256));
    let ingestor = Ingestor::new(store.clone(), embedder.clone(), TextSplitter::default(), 4, Duration::from_secs(5));
    let doc = pages(&[
        "the termination notice period is thirty days",
        "payment is due upon invoice receipt",
    ]);
    ingestor.ingest("contract_a.pdf", &doc, Utc::now()).await.unwrap();

    let retriever = Retriever::new(store, embedder, RetrievalSettings::default());
    let result = retriever
        .search(&SearchRequest::new("termination notice period").limit(1).filter("filename", "contract_a.pdf"))
        .await
        .unwrap();
    assert_eq!(result.len(), 1);
    assert!(result.hits[0].text.contains("termination"));
    assert_eq!(result.hits[0].metadata["page"], MetaValue::Integer(0));
}
