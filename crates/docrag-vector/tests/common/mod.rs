//! Behaviour every chunk store backend must share.

use chrono::{TimeZone, Utc};
use docrag_core::error::Error;
use docrag_core::traits::ChunkStore;
use docrag_core::types::{Chunk, FetchQuery, MetaValue, Namespace, TimeRange};

pub fn ns(name: &str) -> Namespace {
    Namespace::new(name).unwrap()
}

pub fn chunk(ns: &Namespace, file: &str, idx: i64, vector: Vec<f32>) -> Chunk {
    Chunk::new(ns.chunk_id(idx as usize), vector, format!("{file} chunk {idx}"), file, idx / 2, idx)
}

pub async fn round_trip_is_exact<S: ChunkStore>(store: &S) {
    let a = ns("contract_a-1");
    let vector = vec![0.1f32, -0.000_123_4, 3.402_823e38, f32::MIN_POSITIVE];
    let original = chunk(&a, "contract_a.pdf", 0, vector)
        .with_meta("author", "legal")
        .with_meta("score", 0.1f64)
        .with_created_at(Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap());
    assert_eq!(store.put(&a, vec![original.clone()]).await.unwrap(), 1);

    let fetched = store.fetch(&FetchQuery::new()).await.unwrap();
    assert_eq!(fetched.len(), 1);
    assert_eq!(fetched[0], original);
    let bits = |v: &[f32]| v.iter().map(|x| x.to_bits()).collect::<Vec<_>>();
    assert_eq!(bits(&fetched[0].vector), bits(&original.vector));
}

pub async fn filters_are_exact_and_ordered<S: ChunkStore>(store: &S) {
    let a = ns("contract_a-1");
    let b = ns("contract_b-2");
    let batch_a: Vec<Chunk> = (0..3).map(|i| chunk(&a, "contract_a.pdf", i, vec![1.0, i as f32])).collect();
    let batch_b: Vec<Chunk> = (0..2).map(|i| chunk(&b, "contract_b.pdf", i, vec![0.0, 1.0])).collect();
    store.put(&a, batch_a).await.unwrap();
    store.put(&b, batch_b).await.unwrap();

    let all = store.fetch(&FetchQuery::new()).await.unwrap();
    let ids: Vec<&str> = all.iter().map(|c| c.id.as_str()).collect();
    assert_eq!(ids, vec![
        "contract_a-1-chunk-0", "contract_a-1-chunk-1", "contract_a-1-chunk-2",
        "contract_b-2-chunk-0", "contract_b-2-chunk-1",
    ]);

    let only_b = store.fetch(&FetchQuery::new().filter("filename", "contract_b.pdf")).await.unwrap();
    assert_eq!(only_b.len(), 2);
    assert!(only_b.iter().all(|c| c.filename() == Some("contract_b.pdf")));

    let page_zero = store
        .fetch(&FetchQuery::new().filter("filename", "contract_a.pdf").filter("page", 0i64))
        .await
        .unwrap();
    assert_eq!(page_zero.len(), 2);

    // Integer and float values never compare equal.
    let float_page = store.fetch(&FetchQuery::new().filter("page", MetaValue::Float(0.0))).await.unwrap();
    assert!(float_page.is_empty());

    let missing = store.fetch(&FetchQuery::new().filter("filename", "missing.pdf")).await.unwrap();
    assert!(missing.is_empty());

    let scoped = store.fetch(&FetchQuery::new().namespace(b.clone())).await.unwrap();
    assert_eq!(scoped.len(), 2);

    let limited = store.fetch(&FetchQuery::new().limit(2)).await.unwrap();
    assert_eq!(limited.len(), 2);
    assert_eq!(limited[1].id, "contract_a-1-chunk-1");

    assert_eq!(store.namespaces().await.unwrap(), vec![a, b]);
}

pub async fn time_range_keeps_undated_chunks<S: ChunkStore>(store: &S) {
    let a = ns("notes-1");
    let jan = Utc.with_ymd_and_hms(2024, 1, 15, 0, 0, 0).unwrap();
    let jun = Utc.with_ymd_and_hms(2024, 6, 15, 0, 0, 0).unwrap();
    let batch = vec![
        chunk(&a, "notes.txt", 0, vec![1.0, 0.0]).with_created_at(jan),
        chunk(&a, "notes.txt", 1, vec![1.0, 0.0]).with_created_at(jun),
        chunk(&a, "notes.txt", 2, vec![1.0, 0.0]),
    ];
    store.put(&a, batch).await.unwrap();

    let q1 = TimeRange::between(
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
        Utc.with_ymd_and_hms(2024, 3, 31, 0, 0, 0).unwrap(),
    )
    .unwrap();
    let hits = store.fetch(&FetchQuery::new().time_range(q1)).await.unwrap();
    let idx: Vec<i64> = hits.iter().filter_map(Chunk::chunk_index).collect();
    assert_eq!(idx, vec![0, 2]);

    let inclusive = TimeRange::new(Some(jun), None).unwrap();
    let hits = store.fetch(&FetchQuery::new().time_range(inclusive)).await.unwrap();
    let idx: Vec<i64> = hits.iter().filter_map(Chunk::chunk_index).collect();
    assert_eq!(idx, vec![1, 2]);
}

pub async fn invalid_batches_leave_store_untouched<S: ChunkStore>(store: &S) {
    let a = ns("doc-1");
    store.put(&a, vec![chunk(&a, "doc.pdf", 0, vec![1.0, 0.0])]).await.unwrap();

    let err = store.put(&a, Vec::new()).await.unwrap_err();
    assert!(matches!(err, Error::EmptyBatch));

    let mixed = vec![chunk(&a, "doc.pdf", 1, vec![1.0, 0.0]), chunk(&a, "doc.pdf", 2, vec![1.0, 0.0, 0.0])];
    let err = store.put(&a, mixed).await.unwrap_err();
    assert!(matches!(err, Error::DimensionMismatch { expected: 2, actual: 3 }));

    let dup = vec![chunk(&a, "doc.pdf", 0, vec![0.0, 1.0])];
    assert!(matches!(store.put(&a, dup).await.unwrap_err(), Error::InvalidChunk { .. }));

    let gap = vec![chunk(&a, "doc.pdf", 5, vec![0.0, 1.0])];
    assert!(matches!(store.put(&a, gap).await.unwrap_err(), Error::InvalidChunk { .. }));

    assert_eq!(store.fetch(&FetchQuery::new()).await.unwrap().len(), 1);

    // Appending the next index is fine.
    store.put(&a, vec![chunk(&a, "doc.pdf", 1, vec![0.0, 1.0])]).await.unwrap();
    assert_eq!(store.fetch(&FetchQuery::new()).await.unwrap().len(), 2);
}

pub async fn delete_and_reset<S: ChunkStore>(store: &S) {
    let a = ns("doc_a-1");
    let b = ns("doc_b-1");
    store.put(&a, vec![chunk(&a, "a.pdf", 0, vec![1.0, 0.0]), chunk(&a, "a.pdf", 1, vec![1.0, 0.0])]).await.unwrap();
    store.put(&b, vec![chunk(&b, "b.pdf", 0, vec![0.0, 1.0])]).await.unwrap();

    assert_eq!(store.delete_namespace(&a).await.unwrap(), 2);
    assert!(matches!(store.delete_namespace(&a).await.unwrap_err(), Error::NotFound(_)));
    assert_eq!(store.namespaces().await.unwrap(), vec![b.clone()]);
    assert_eq!(store.fetch(&FetchQuery::new()).await.unwrap().len(), 1);

    store.reset().await.unwrap();
    assert!(store.fetch(&FetchQuery::new()).await.unwrap().is_empty());
    assert!(store.namespaces().await.unwrap().is_empty());
    assert!(matches!(store.delete_namespace(&b).await.unwrap_err(), Error::NotFound(_)));
}
