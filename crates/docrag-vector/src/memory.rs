//! In-process chunk store with an optional JSON snapshot on disk.
//!
//! Readers clone an `Arc` of the current state and filter it without waiting
//! on writers. Writers are serialized by an async mutex, build the next state
//! off to the side, persist it on the blocking pool and only then publish it.

use std::fs;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info};

use docrag_core::error::{Error, Result};
use docrag_core::traits::ChunkStore;
use docrag_core::types::{Chunk, FetchQuery, Namespace};
use docrag_core::validate::{validate_batch, ChunkIndexPolicy, ChunkKey};

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Entry {
    namespace: Namespace,
    chunk: Chunk,
}

/// Everything a snapshot holds. `entries` is the global insertion log.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct State {
    dimension: Option<usize>,
    namespaces: Vec<Namespace>,
    entries: Vec<Entry>,
}

pub struct MemoryChunkStore {
    current: RwLock<Arc<State>>,
    writer: Mutex<()>,
    configured_dim: Option<usize>,
    policy: ChunkIndexPolicy,
    snapshot: Option<PathBuf>,
}

impl MemoryChunkStore {
    /// Volatile store; contents vanish with the process.
    pub fn new(policy: ChunkIndexPolicy, dimension: Option<usize>) -> Self {
        Self::with_state(State::default(), policy, dimension, None)
    }

    /// Store persisted to `path`, loading the existing snapshot if there is one.
    pub fn open(path: impl AsRef<Path>, policy: ChunkIndexPolicy, dimension: Option<usize>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let state = if path.exists() {
            let file = fs::File::open(&path).map_err(Error::storage)?;
            let state: State = serde_json::from_reader(BufReader::new(file)).map_err(Error::storage)?;
            if let (Some(expected), Some(actual)) = (dimension, state.dimension) {
                if expected != actual {
                    return Err(Error::DimensionMismatch { expected, actual });
                }
            }
            info!(path = %path.display(), chunks = state.entries.len(), namespaces = state.namespaces.len(), "loaded snapshot");
            state
        } else {
            State::default()
        };
        Ok(Self::with_state(state, policy, dimension, Some(path)))
    }

    fn with_state(state: State, policy: ChunkIndexPolicy, dimension: Option<usize>, snapshot: Option<PathBuf>) -> Self {
        Self { current: RwLock::new(Arc::new(state)), writer: Mutex::new(()), configured_dim: dimension, policy, snapshot }
    }

    /// Dimension new chunks must have, if one is fixed yet.
    pub fn dimension(&self) -> Result<Option<usize>> {
        Ok(self.configured_dim.or(self.load()?.dimension))
    }

    /// The published state. The lock is held only to clone the `Arc`.
    fn load(&self) -> Result<Arc<State>> {
        self.current
            .read()
            .map(|s| Arc::clone(&*s))
            .map_err(|_| Error::Storage("store lock poisoned".into()))
    }

    /// Persists `next` and makes it the published state. Callers hold
    /// `writer`; on failure the previous state stays in place.
    async fn publish(&self, next: State) -> Result<()> {
        let next = Arc::new(next);
        if let Some(path) = self.snapshot.clone() {
            let state = Arc::clone(&next);
            tokio::task::spawn_blocking(move || write_snapshot(&path, &state))
                .await
                .map_err(Error::storage)??;
        }
        let mut current = self.current.write().map_err(|_| Error::Storage("store lock poisoned".into()))?;
        *current = next;
        Ok(())
    }
}

/// Writes the snapshot via a temp file in the same directory, then renames.
fn write_snapshot(path: &Path, state: &State) -> Result<()> {
    let dir = path.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(dir).map_err(Error::storage)?;
    let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(Error::storage)?;
    {
        let mut writer = BufWriter::new(tmp.as_file_mut());
        serde_json::to_writer(&mut writer, state).map_err(Error::storage)?;
        writer.flush().map_err(Error::storage)?;
    }
    tmp.as_file().sync_all().map_err(Error::storage)?;
    tmp.persist(path).map_err(Error::storage)?;
    debug!(path = %path.display(), "snapshot written");
    Ok(())
}

impl ChunkStore for MemoryChunkStore {
    async fn put(&self, namespace: &Namespace, chunks: Vec<Chunk>) -> Result<usize> {
        let _writer = self.writer.lock().await;
        let mut next = State::clone(&*self.load()?);
        let existing: Vec<ChunkKey> = next
            .entries
            .iter()
            .filter(|e| &e.namespace == namespace)
            .filter_map(|e| ChunkKey::of(&e.chunk))
            .collect();
        let expected = self.configured_dim.or(next.dimension);
        let dim = validate_batch(expected, &existing, &chunks, self.policy)?;

        let count = chunks.len();
        next.dimension = Some(dim);
        if !next.namespaces.contains(namespace) {
            next.namespaces.push(namespace.clone());
        }
        next.entries.extend(chunks.into_iter().map(|chunk| Entry { namespace: namespace.clone(), chunk }));
        self.publish(next).await?;
        info!(%namespace, count, dim, "stored chunks");
        Ok(count)
    }

    async fn fetch(&self, query: &FetchQuery) -> Result<Vec<Chunk>> {
        let state = self.load()?;
        let chunks: Vec<Chunk> = state
            .entries
            .iter()
            .filter(|e| query.namespace.as_ref().map_or(true, |ns| &e.namespace == ns))
            .filter(|e| query.matches(&e.chunk))
            .take(query.limit)
            .map(|e| e.chunk.clone())
            .collect();
        debug!(%query, found = chunks.len(), "fetched chunks");
        Ok(chunks)
    }

    async fn namespaces(&self) -> Result<Vec<Namespace>> {
        Ok(self.load()?.namespaces.clone())
    }

    async fn delete_namespace(&self, namespace: &Namespace) -> Result<usize> {
        let _writer = self.writer.lock().await;
        let mut next = State::clone(&*self.load()?);
        if !next.namespaces.contains(namespace) {
            return Err(Error::NotFound(format!("namespace '{namespace}'")));
        }
        let before = next.entries.len();
        next.entries.retain(|e| &e.namespace != namespace);
        next.namespaces.retain(|ns| ns != namespace);
        let removed = before - next.entries.len();
        self.publish(next).await?;
        info!(%namespace, removed, "deleted namespace");
        Ok(removed)
    }

    async fn reset(&self) -> Result<()> {
        let _writer = self.writer.lock().await;
        self.publish(State::default()).await?;
        info!("store reset");
        Ok(())
    }
}
