//! docrag-vector
//!
//! Chunk store backends: an in-process store with an optional JSON snapshot
//! and a LanceDB table. [`open_store`] picks one from configuration.

use docrag_core::config::{expand_path, StoreBackend, StoreSettings};
use docrag_core::error::{Error, Result};
use docrag_core::traits::ChunkStore;
use docrag_core::types::{Chunk, FetchQuery, Namespace};

pub mod lance;
pub mod memory;
pub mod schema;
pub mod table;

pub use lance::LanceChunkStore;
pub use memory::MemoryChunkStore;

/// The backend selected for this deployment.
pub enum Store {
    Memory(MemoryChunkStore),
    Lance(LanceChunkStore),
}

/// Opens the configured backend. `lance` requires `store.path`; `memory`
/// persists to `store.path` when set.
pub async fn open_store(settings: &StoreSettings) -> Result<Store> {
    let policy = settings.chunk_index_policy;
    match settings.backend {
        StoreBackend::Memory => match &settings.path {
            Some(path) => Ok(Store::Memory(MemoryChunkStore::open(expand_path(path), policy, settings.dimension)?)),
            None => Ok(Store::Memory(MemoryChunkStore::new(policy, settings.dimension))),
        },
        StoreBackend::Lance => {
            let path = settings
                .path
                .as_deref()
                .ok_or_else(|| Error::InvalidConfig("store.path is required for the lance backend".into()))?;
            let uri = expand_path(path).to_string_lossy().to_string();
            Ok(Store::Lance(LanceChunkStore::open(&uri, &settings.table, settings.dimension, policy).await?))
        }
    }
}

impl ChunkStore for Store {
    async fn put(&self, namespace: &Namespace, chunks: Vec<Chunk>) -> Result<usize> {
        match self {
            Self::Memory(s) => s.put(namespace, chunks).await,
            Self::Lance(s) => s.put(namespace, chunks).await,
        }
    }

    async fn fetch(&self, query: &FetchQuery) -> Result<Vec<Chunk>> {
        match self {
            Self::Memory(s) => s.fetch(query).await,
            Self::Lance(s) => s.fetch(query).await,
        }
    }

    async fn namespaces(&self) -> Result<Vec<Namespace>> {
        match self {
            Self::Memory(s) => s.namespaces().await,
            Self::Lance(s) => s.namespaces().await,
        }
    }

    async fn delete_namespace(&self, namespace: &Namespace) -> Result<usize> {
        match self {
            Self::Memory(s) => s.delete_namespace(namespace).await,
            Self::Lance(s) => s.delete_namespace(namespace).await,
        }
    }

    async fn reset(&self) -> Result<()> {
        match self {
            Self::Memory(s) => s.reset().await,
            Self::Lance(s) => s.reset().await,
        }
    }
}
