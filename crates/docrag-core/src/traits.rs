use std::future::Future;

use crate::error::Result;
use crate::types::{Chunk, FetchQuery, Namespace};

/// External embedding provider. Must be deterministic for identical input
/// within one model version.
pub trait Embedder: Send + Sync {
    fn dim(&self) -> usize;
    fn max_len(&self) -> usize;
    fn embed_many(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>>;

    fn embed(&self, text: &str) -> anyhow::Result<Vec<f32>> {
        self.embed_many(&[text.to_string()])?
            .pop()
            .ok_or_else(|| anyhow::anyhow!("provider returned no vector"))
    }
}

impl<E: Embedder + ?Sized> Embedder for Box<E> {
    fn dim(&self) -> usize { (**self).dim() }
    fn max_len(&self) -> usize { (**self).max_len() }
    fn embed_many(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>> { (**self).embed_many(texts) }
}

/// Append-only chunk persistence partitioned by namespace.
///
/// Implementations must make a `put` visible atomically: a concurrent
/// `fetch` sees either none or all of a batch.
pub trait ChunkStore: Send + Sync {
    /// Appends `chunks` to `namespace` and returns how many were written.
    fn put(&self, namespace: &Namespace, chunks: Vec<Chunk>) -> impl Future<Output = Result<usize>> + Send;

    /// Chunks matching `query`, in insertion order, at most `query.limit`.
    /// An empty result is not an error.
    fn fetch(&self, query: &FetchQuery) -> impl Future<Output = Result<Vec<Chunk>>> + Send;

    fn namespaces(&self) -> impl Future<Output = Result<Vec<Namespace>>> + Send;

    /// Removes a namespace and all of its chunks, returning the chunk count.
    fn delete_namespace(&self, namespace: &Namespace) -> impl Future<Output = Result<usize>> + Send;

    /// Drops every chunk in every namespace.
    fn reset(&self) -> impl Future<Output = Result<()>> + Send;
}
