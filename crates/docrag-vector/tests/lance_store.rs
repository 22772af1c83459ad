mod common;

use docrag_core::config::{StoreBackend, StoreSettings};
use docrag_core::traits::ChunkStore;
use docrag_core::types::FetchQuery;
use docrag_core::validate::ChunkIndexPolicy;
use docrag_vector::{open_store, LanceChunkStore, Store};
use tempfile::TempDir;

async fn store() -> (TempDir, LanceChunkStore) {
    let tmp = TempDir::new().expect("tmp");
    let uri = tmp.path().to_string_lossy().to_string();
    let store = LanceChunkStore::open(&uri, "chunks_test", None, ChunkIndexPolicy::Strict).await.expect("open");
    (tmp, store)
}

#[tokio::test]
async fn round_trip_is_exact() {
    let (_tmp, s) = store().await;
    common::round_trip_is_exact(&s).await;
}

#[tokio::test]
async fn filters_are_exact_and_ordered() {
    let (_tmp, s) = store().await;
    common::filters_are_exact_and_ordered(&s).await;
}

#[tokio::test]
async fn time_range_keeps_undated_chunks() {
    let (_tmp, s) = store().await;
    common::time_range_keeps_undated_chunks(&s).await;
}

#[tokio::test]
async fn invalid_batches_leave_store_untouched() {
    let (_tmp, s) = store().await;
    common::invalid_batches_leave_store_untouched(&s).await;
}

#[tokio::test]
async fn delete_and_reset() {
    let (_tmp, s) = store().await;
    common::delete_and_reset(&s).await;
}

#[tokio::test]
async fn reopen_keeps_order_and_dimension() {
    let tmp = TempDir::new().expect("tmp");
    let uri = tmp.path().to_string_lossy().to_string();
    let a = common::ns("doc_a-1");
    let b = common::ns("doc_b-1");
    {
        let s = LanceChunkStore::open(&uri, "chunks", None, ChunkIndexPolicy::Strict).await.unwrap();
        s.put(&a, vec![common::chunk(&a, "a.pdf", 0, vec![1.0, 0.0, 0.0])]).await.unwrap();
    }
    let s = LanceChunkStore::open(&uri, "chunks", None, ChunkIndexPolicy::Strict).await.unwrap();
    assert_eq!(s.dimension().await.unwrap(), Some(3));
    s.put(&b, vec![common::chunk(&b, "b.pdf", 0, vec![0.0, 1.0, 0.0])]).await.unwrap();
    s.put(&a, vec![common::chunk(&a, "a.pdf", 1, vec![0.0, 0.0, 1.0])]).await.unwrap();

    let ids: Vec<String> = s.fetch(&FetchQuery::new()).await.unwrap().into_iter().map(|c| c.id).collect();
    assert_eq!(ids, vec!["doc_a-1-chunk-0", "doc_b-1-chunk-0", "doc_a-1-chunk-1"]);
    assert_eq!(s.namespaces().await.unwrap(), vec![a, b]);

    let err = LanceChunkStore::open(&uri, "chunks", Some(1024), ChunkIndexPolicy::Strict).await.err().unwrap();
    assert!(matches!(err, docrag_core::Error::DimensionMismatch { expected: 1024, actual: 3 }));
}

#[tokio::test]
async fn settings_select_the_backend() {
    let tmp = TempDir::new().expect("tmp");
    let settings = StoreSettings {
        backend: StoreBackend::Lance,
        path: Some(tmp.path().to_string_lossy().to_string()),
        ..StoreSettings::default()
    };
    assert!(matches!(open_store(&settings).await.unwrap(), Store::Lance(_)));

    let missing_path = StoreSettings { backend: StoreBackend::Lance, ..StoreSettings::default() };
    assert!(open_store(&missing_path).await.is_err());

    assert!(matches!(open_store(&StoreSettings::default()).await.unwrap(), Store::Memory(_)));
}
