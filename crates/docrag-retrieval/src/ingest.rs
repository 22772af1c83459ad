//! The write path: split pages, embed in batches, store one namespace per
//! document.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tracing::{debug, info};

use docrag_core::config::{IngestSettings, RetrievalSettings};
use docrag_core::error::{Error, Result};
use docrag_core::splitter::TextSplitter;
use docrag_core::traits::{ChunkStore, Embedder};
use docrag_core::types::{Chunk, Namespace};

use crate::retriever::embed_blocking;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestReport {
    pub namespace: Namespace,
    pub chunks: usize,
}

pub struct Ingestor<S> {
    store: Arc<S>,
    embedder: Arc<dyn Embedder>,
    splitter: TextSplitter,
    batch_size: usize,
    embed_timeout: Duration,
    /// Held from namespace lookup through `put`.
    claim: Mutex<()>,
}

impl<S: ChunkStore> Ingestor<S> {
    pub fn new(store: Arc<S>, embedder: Arc<dyn Embedder>, splitter: TextSplitter, batch_size: usize, embed_timeout: Duration) -> Self {
        Self { store, embedder, splitter, batch_size: batch_size.max(1), embed_timeout, claim: Mutex::new(()) }
    }

    pub fn from_settings(store: Arc<S>, embedder: Arc<dyn Embedder>, ingest: &IngestSettings, retrieval: &RetrievalSettings) -> Result<Self> {
        let splitter = TextSplitter::from_settings(ingest)?;
        Ok(Self::new(store, embedder, splitter, ingest.embed_batch_size, retrieval.embed_timeout()))
    }

    /// Ingests one document given as its pages' text (page 0 first) into a
    /// fresh namespace derived from `filename` and `created_at`.
    pub async fn ingest(&self, filename: &str, pages: &[String], created_at: DateTime<Utc>) -> Result<IngestReport> {
        let mut pieces: Vec<(i64, String)> = Vec::new();
        for (page, text) in pages.iter().enumerate() {
            let page = to_i64(page)?;
            pieces.extend(self.splitter.split(text).into_iter().map(|piece| (page, piece)));
        }
        if pieces.is_empty() {
            return Err(Error::EmptyBatch);
        }

        let mut vectors: Vec<Vec<f32>> = Vec::with_capacity(pieces.len());
        for batch in pieces.chunks(self.batch_size) {
            let texts: Vec<String> = batch.iter().map(|(_, t)| t.clone()).collect();
            let out = embed_blocking(&self.embedder, texts, self.embed_timeout).await?;
            if out.len() != batch.len() {
                return Err(Error::EmbeddingFailure(format!(
                    "provider returned {} vectors for {} texts",
                    out.len(),
                    batch.len()
                )));
            }
            vectors.extend(out);
            debug!(done = vectors.len(), total = pieces.len(), "embedded batch");
        }

        let _claim = self.claim.lock().await;
        let namespace = self.fresh_namespace(Namespace::for_document(filename, created_at)).await?;
        let mut chunks = Vec::with_capacity(pieces.len());
        for (index, ((page, text), vector)) in pieces.into_iter().zip(vectors).enumerate() {
            let chunk = Chunk::new(namespace.chunk_id(index), vector, text, filename, page, to_i64(index)?)
                .with_created_at(created_at);
            chunks.push(chunk);
        }
        let count = self.store.put(&namespace, chunks).await?;
        info!(filename, %namespace, pages = pages.len(), chunks = count, "ingested document");
        Ok(IngestReport { namespace, chunks: count })
    }

    /// `base`, or the first `base-N` (N from 2) the store does not hold yet.
    async fn fresh_namespace(&self, base: Namespace) -> Result<Namespace> {
        let taken = self.store.namespaces().await?;
        if !taken.contains(&base) {
            return Ok(base);
        }
        let namespace = (2..)
            .map(|n| base.with_suffix(n))
            .find(|ns| !taken.contains(ns))
            .ok_or_else(|| Error::Storage(format!("no free namespace for '{base}'")))?;
        debug!(%base, %namespace, "derived namespace taken");
        Ok(namespace)
    }
}

fn to_i64(n: usize) -> Result<i64> {
    i64::try_from(n).map_err(|_| Error::InvalidArgument(format!("{n} does not fit in i64")))
}
