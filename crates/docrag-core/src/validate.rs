//! Write-path checks shared by every chunk store backend.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use tracing::warn;

use crate::error::{Error, Result};
use crate::types::{Chunk, ChunkId};

/// What to do when a filename's `chunk_index` values stop being `0..n`.
/// Duplicates are rejected under every policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChunkIndexPolicy {
    #[default]
    Strict,
    Lenient,
}

/// Identity of a chunk already persisted in the target namespace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkKey {
    pub id: ChunkId,
    pub filename: String,
    pub chunk_index: i64,
}

impl ChunkKey {
    pub fn of(chunk: &Chunk) -> Option<Self> {
        Some(Self {
            id: chunk.id.clone(),
            filename: chunk.filename()?.to_string(),
            chunk_index: chunk.chunk_index()?,
        })
    }
}

/// Validates a batch against the store dimension and the namespace's
/// existing chunks. Returns the dimension the batch carries.
pub fn validate_batch(
    expected_dim: Option<usize>,
    existing: &[ChunkKey],
    batch: &[Chunk],
    policy: ChunkIndexPolicy,
) -> Result<usize> {
    let first = batch.first().ok_or(Error::EmptyBatch)?;
    for chunk in batch { chunk.validate()?; }

    let dim = expected_dim.unwrap_or_else(|| first.dim());
    if let Some(bad) = batch.iter().find(|c| c.dim() != dim) {
        return Err(Error::DimensionMismatch { expected: dim, actual: bad.dim() });
    }

    let mut ids: HashSet<&str> = existing.iter().map(|k| k.id.as_str()).collect();
    let mut indices: BTreeMap<&str, BTreeSet<i64>> = BTreeMap::new();
    for key in existing {
        indices.entry(key.filename.as_str()).or_default().insert(key.chunk_index);
    }

    let mut touched: BTreeMap<&str, &str> = BTreeMap::new();
    for chunk in batch {
        if !ids.insert(chunk.id.as_str()) {
            return Err(Error::invalid_chunk(&chunk.id, "duplicate id"));
        }
        // validate() guarantees both keys are present
        let (Some(filename), Some(index)) = (chunk.filename(), chunk.chunk_index()) else { continue };
        if !indices.entry(filename).or_default().insert(index) {
            return Err(Error::invalid_chunk(
                &chunk.id,
                format!("duplicate chunk_index {index} for '{filename}'"),
            ));
        }
        touched.entry(filename).or_insert(chunk.id.as_str());
    }

    for (filename, first_id) in touched {
        let set = &indices[filename];
        let max = set.last().copied().unwrap_or(0);
        let contiguous = usize::try_from(max).map_or(false, |m| m + 1 == set.len());
        if contiguous { continue; }
        match policy {
            ChunkIndexPolicy::Strict => {
                return Err(Error::invalid_chunk(
                    first_id,
                    format!("chunk_index values for '{filename}' are not contiguous from 0 ({} values, max {max})", set.len()),
                ));
            }
            ChunkIndexPolicy::Lenient => {
                warn!(filename, count = set.len(), max, "chunk_index sequence has gaps");
            }
        }
    }
    Ok(dim)
}
