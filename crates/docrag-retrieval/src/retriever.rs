//! The read path: embed the query, fetch candidates, rank.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use docrag_core::config::RetrievalSettings;
use docrag_core::error::{Error, Result};
use docrag_core::traits::{ChunkStore, Embedder};
use docrag_core::types::{FetchQuery, MetaValue, Metadata, Namespace, SearchResult, TimeRange};

use crate::rank::rank;

/// One search call. `limit` falls back to the retriever's default.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchRequest {
    pub query: String,
    pub limit: Option<usize>,
    pub filter: Metadata,
    pub namespace: Option<Namespace>,
    pub time_range: Option<TimeRange>,
}

impl SearchRequest {
    pub fn new(query: impl Into<String>) -> Self {
        Self { query: query.into(), limit: None, filter: Metadata::new(), namespace: None, time_range: None }
    }

    #[must_use]
    pub fn limit(mut self, limit: usize) -> Self { self.limit = Some(limit); self }

    #[must_use]
    pub fn filter(mut self, key: impl Into<String>, value: impl Into<MetaValue>) -> Self {
        self.filter.insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub fn namespace(mut self, ns: Namespace) -> Self { self.namespace = Some(ns); self }

    #[must_use]
    pub fn time_range(mut self, range: TimeRange) -> Self { self.time_range = Some(range); self }

    fn fetch_query(&self, fetch_limit: usize) -> FetchQuery {
        FetchQuery {
            namespace: self.namespace.clone(),
            filter: self.filter.clone(),
            time_range: self.time_range,
            limit: fetch_limit,
        }
    }
}

/// Built once per process and shared; holds no per-request state.
pub struct Retriever<S> {
    store: Arc<S>,
    embedder: Arc<dyn Embedder>,
    settings: RetrievalSettings,
}

impl<S: ChunkStore> Retriever<S> {
    pub fn new(store: Arc<S>, embedder: Arc<dyn Embedder>, settings: RetrievalSettings) -> Self {
        Self { store, embedder, settings }
    }

    pub fn store(&self) -> &Arc<S> { &self.store }

    pub fn settings(&self) -> &RetrievalSettings { &self.settings }

    pub async fn search(&self, request: &SearchRequest) -> Result<SearchResult> {
        let limit = request.limit.unwrap_or(self.settings.default_limit);
        if request.query.trim().is_empty() {
            return Err(Error::EmbeddingFailure("query text is empty".into()));
        }
        let query_vec = embed_blocking(&self.embedder, vec![request.query.clone()], self.settings.embed_timeout())
            .await?
            .pop()
            .ok_or_else(|| Error::EmbeddingFailure("provider returned no vector".into()))?;
        check_vector(&query_vec)?;

        let fetch = request.fetch_query(self.settings.fetch_limit);
        let candidates = deadline("candidate fetch", self.settings.store_timeout(), self.store.fetch(&fetch)).await??;
        if candidates.is_empty() {
            return Err(Error::NoCandidates(fetch.to_string()));
        }
        if candidates.len() >= fetch.limit {
            warn!(fetch_limit = fetch.limit, %fetch, "candidate pool hit the fetch limit; later chunks are not ranked");
        }
        debug!(candidates = candidates.len(), %fetch, "candidate pool");

        let result = rank(&query_vec, &candidates, limit)?;
        info!(query = %request.query, limit, candidates = candidates.len(), hits = result.len(), "search complete");
        Ok(result)
    }
}

fn check_vector(v: &[f32]) -> Result<()> {
    if v.is_empty() {
        return Err(Error::EmbeddingFailure("provider returned an empty vector".into()));
    }
    if v.iter().any(|x| !x.is_finite()) {
        return Err(Error::EmbeddingFailure("provider returned non-finite components".into()));
    }
    Ok(())
}

/// Runs `fut` under `limit`, reporting overruns as [`Error::Timeout`].
pub(crate) async fn deadline<F: Future>(operation: &'static str, limit: Duration, fut: F) -> Result<F::Output> {
    tokio::time::timeout(limit, fut).await.map_err(|_| Error::Timeout { operation, limit })
}

/// Calls the provider on the blocking pool under `limit`.
pub(crate) async fn embed_blocking(embedder: &Arc<dyn Embedder>, texts: Vec<String>, limit: Duration) -> Result<Vec<Vec<f32>>> {
    let embedder = Arc::clone(embedder);
    let task = tokio::task::spawn_blocking(move || embedder.embed_many(&texts));
    deadline("embedding", limit, task)
        .await?
        .map_err(|e| Error::EmbeddingFailure(format!("embedding task failed: {e}")))?
        .map_err(|e| Error::EmbeddingFailure(format!("{e:#}")))
}
