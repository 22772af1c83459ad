//! Chunk store over a single LanceDB table.
//!
//! Every row carries a global `seq` assigned under the writer lock, so
//! fetches can return chunks in insertion order regardless of how Lance
//! lays out fragments.

use std::sync::Arc;

use arrow_array::cast::AsArray;
use arrow_array::types::Float32Type;
use arrow_array::{Array, FixedSizeListArray, Int64Array, RecordBatch, RecordBatchIterator, StringArray};
use futures::TryStreamExt;
use lancedb::query::{ExecutableQuery, QueryBase, Select};
use lancedb::{Connection, Table};
use tokio::sync::Mutex;
use tracing::{debug, info};

use docrag_core::error::{Error, Result};
use docrag_core::traits::ChunkStore;
use docrag_core::types::{Chunk, FetchQuery, Metadata, Namespace};
use docrag_core::validate::{validate_batch, ChunkIndexPolicy, ChunkKey};

use crate::schema::{build_chunk_schema, vector_dim, VECTOR_COLUMN};
use crate::table::{fetch_predicate, open_db, sql_str, table_exists};

struct WriterState {
    next_seq: i64,
}

pub struct LanceChunkStore {
    conn: Connection,
    table_name: String,
    configured_dim: Option<usize>,
    policy: ChunkIndexPolicy,
    writer: Mutex<WriterState>,
}

impl LanceChunkStore {
    /// Connects to the database at `uri`. The table is created by the first
    /// `put`; an existing table must match `dimension` when one is configured.
    pub async fn open(uri: &str, table_name: &str, dimension: Option<usize>, policy: ChunkIndexPolicy) -> Result<Self> {
        let conn = open_db(uri).await?;
        let mut next_seq = 0;
        if table_exists(&conn, table_name).await? {
            let table = conn.open_table(table_name).execute().await.map_err(Error::storage)?;
            let actual = table_dim(&table).await?;
            if let Some(expected) = dimension {
                if expected != actual {
                    return Err(Error::DimensionMismatch { expected, actual });
                }
            }
            next_seq = max_seq(&table).await?.map_or(0, |s| s + 1);
        }
        info!(uri, table = table_name, next_seq, "opened lance chunk store");
        Ok(Self {
            conn,
            table_name: table_name.to_string(),
            configured_dim: dimension,
            policy,
            writer: Mutex::new(WriterState { next_seq }),
        })
    }

    /// Dimension new chunks must have: the configured one, else the width of
    /// the existing table.
    pub async fn dimension(&self) -> Result<Option<usize>> {
        if self.configured_dim.is_some() {
            return Ok(self.configured_dim);
        }
        match self.table().await? {
            Some(table) => Ok(Some(table_dim(&table).await?)),
            None => Ok(None),
        }
    }

    async fn table(&self) -> Result<Option<Table>> {
        if !table_exists(&self.conn, &self.table_name).await? {
            return Ok(None);
        }
        let table = self.conn.open_table(&self.table_name).execute().await.map_err(Error::storage)?;
        Ok(Some(table))
    }
}

impl ChunkStore for LanceChunkStore {
    async fn put(&self, namespace: &Namespace, chunks: Vec<Chunk>) -> Result<usize> {
        let mut writer = self.writer.lock().await;
        let table = self.table().await?;
        let (width, existing) = match &table {
            Some(t) => (Some(table_dim(t).await?), existing_keys(t, namespace).await?),
            None => (None, Vec::new()),
        };
        let dim = validate_batch(self.configured_dim.or(width), &existing, &chunks, self.policy)?;

        let batch = to_record_batch(namespace, &chunks, writer.next_seq, dim)?;
        let schema = batch.schema();
        let reader = Box::new(RecordBatchIterator::new(vec![Ok(batch)].into_iter(), schema));
        if let Some(t) = &table {
            t.add(reader).execute().await.map_err(Error::storage)?;
        } else {
            self.conn.create_table(&self.table_name, reader).execute().await.map_err(Error::storage)?;
        }
        let count = chunks.len();
        writer.next_seq += i64::try_from(count).map_err(Error::storage)?;
        info!(%namespace, count, dim, table = %self.table_name, "stored chunks");
        Ok(count)
    }

    async fn fetch(&self, query: &FetchQuery) -> Result<Vec<Chunk>> {
        let Some(table) = self.table().await? else { return Ok(Vec::new()) };
        let predicate = fetch_predicate(query);
        let mut q = table.query();
        if let Some(p) = &predicate {
            q = q.only_if(p);
        }
        let mut stream = q.execute().await.map_err(Error::storage)?;
        let mut rows: Vec<(i64, Chunk)> = Vec::new();
        while let Some(batch) = stream.try_next().await.map_err(Error::storage)? {
            rows.extend(decode_chunks(&batch)?);
        }
        rows.sort_by_key(|(seq, _)| *seq);
        let chunks: Vec<Chunk> = rows
            .into_iter()
            .map(|(_, chunk)| chunk)
            .filter(|chunk| query.matches(chunk))
            .take(query.limit)
            .collect();
        debug!(%query, predicate = predicate.as_deref().unwrap_or(""), found = chunks.len(), "fetched chunks");
        Ok(chunks)
    }

    async fn namespaces(&self) -> Result<Vec<Namespace>> {
        let Some(table) = self.table().await? else { return Ok(Vec::new()) };
        let mut stream = table
            .query()
            .select(Select::columns(&["namespace", "seq"]))
            .execute()
            .await
            .map_err(Error::storage)?;
        let mut first_seen: Vec<(i64, String)> = Vec::new();
        while let Some(batch) = stream.try_next().await.map_err(Error::storage)? {
            let names = column::<StringArray>(&batch, "namespace")?;
            let seqs = column::<Int64Array>(&batch, "seq")?;
            for i in 0..batch.num_rows() {
                first_seen.push((seqs.value(i), names.value(i).to_string()));
            }
        }
        first_seen.sort();
        let mut out: Vec<Namespace> = Vec::new();
        for (_, name) in first_seen {
            let ns = Namespace::new(name)?;
            if !out.contains(&ns) { out.push(ns); }
        }
        Ok(out)
    }

    async fn delete_namespace(&self, namespace: &Namespace) -> Result<usize> {
        let _writer = self.writer.lock().await;
        let missing = || Error::NotFound(format!("namespace '{namespace}'"));
        let table = self.table().await?.ok_or_else(missing)?;
        let predicate = format!("namespace = {}", sql_str(namespace.as_str()));
        let count = table.count_rows(Some(predicate.clone())).await.map_err(Error::storage)?;
        if count == 0 {
            return Err(missing());
        }
        table.delete(&predicate).await.map_err(Error::storage)?;
        info!(%namespace, removed = count, "deleted namespace");
        Ok(count)
    }

    /// Removes every row. The table keeps its vector width; a configured
    /// dimension is the way to change it.
    async fn reset(&self) -> Result<()> {
        let _writer = self.writer.lock().await;
        if let Some(table) = self.table().await? {
            table.delete("true").await.map_err(Error::storage)?;
        }
        info!(table = %self.table_name, "store reset");
        Ok(())
    }
}

async fn table_dim(table: &Table) -> Result<usize> {
    let schema = table.schema().await.map_err(Error::storage)?;
    vector_dim(&schema).ok_or_else(|| Error::Storage("chunk table has no fixed-size vector column".into()))
}

async fn max_seq(table: &Table) -> Result<Option<i64>> {
    let mut stream = table
        .query()
        .select(Select::columns(&["seq"]))
        .execute()
        .await
        .map_err(Error::storage)?;
    let mut max = None;
    while let Some(batch) = stream.try_next().await.map_err(Error::storage)? {
        let seqs = column::<Int64Array>(&batch, "seq")?;
        for &seq in seqs.values().iter() {
            max = max.max(Some(seq));
        }
    }
    Ok(max)
}

async fn existing_keys(table: &Table, namespace: &Namespace) -> Result<Vec<ChunkKey>> {
    let mut stream = table
        .query()
        .only_if(format!("namespace = {}", sql_str(namespace.as_str())))
        .select(Select::columns(&["id", "filename", "chunk_index"]))
        .execute()
        .await
        .map_err(Error::storage)?;
    let mut keys = Vec::new();
    while let Some(batch) = stream.try_next().await.map_err(Error::storage)? {
        let ids = column::<StringArray>(&batch, "id")?;
        let filenames = column::<StringArray>(&batch, "filename")?;
        let indices = column::<Int64Array>(&batch, "chunk_index")?;
        for i in 0..batch.num_rows() {
            keys.push(ChunkKey {
                id: ids.value(i).to_string(),
                filename: filenames.value(i).to_string(),
                chunk_index: indices.value(i),
            });
        }
    }
    Ok(keys)
}

fn column<'a, T: 'static>(batch: &'a RecordBatch, name: &str) -> Result<&'a T> {
    batch
        .column_by_name(name)
        .and_then(|c| c.as_any().downcast_ref::<T>())
        .ok_or_else(|| Error::Storage(format!("column '{name}' missing or mistyped")))
}

fn to_record_batch(namespace: &Namespace, chunks: &[Chunk], first_seq: i64, dim: usize) -> Result<RecordBatch> {
    let width = i32::try_from(dim).map_err(Error::storage)?;
    let n = chunks.len();
    let mut ids = Vec::with_capacity(n);
    let mut seqs = Vec::with_capacity(n);
    let mut filenames = Vec::with_capacity(n);
    let mut pages = Vec::with_capacity(n);
    let mut indices = Vec::with_capacity(n);
    let mut created: Vec<Option<i64>> = Vec::with_capacity(n);
    let mut texts = Vec::with_capacity(n);
    let mut metadata = Vec::with_capacity(n);
    let mut vectors: Vec<Option<Vec<Option<f32>>>> = Vec::with_capacity(n);
    let mut seq = first_seq;
    for c in chunks {
        ids.push(c.id.as_str());
        seqs.push(seq);
        seq += 1;
        filenames.push(c.filename().unwrap_or_default());
        pages.push(c.page().unwrap_or_default());
        indices.push(c.chunk_index().unwrap_or_default());
        created.push(c.created_at().map(|t| t.timestamp_millis()));
        texts.push(c.text.as_str());
        metadata.push(serde_json::to_string(&c.metadata).map_err(Error::storage)?);
        vectors.push(Some(c.vector.iter().map(|&x| Some(x)).collect()));
    }
    RecordBatch::try_new(
        build_chunk_schema(width),
        vec![
            Arc::new(StringArray::from(ids)),
            Arc::new(StringArray::from(vec![namespace.as_str(); n])),
            Arc::new(Int64Array::from(seqs)),
            Arc::new(StringArray::from(filenames)),
            Arc::new(Int64Array::from(pages)),
            Arc::new(Int64Array::from(indices)),
            Arc::new(Int64Array::from(created)),
            Arc::new(StringArray::from(texts)),
            Arc::new(StringArray::from(metadata)),
            Arc::new(FixedSizeListArray::from_iter_primitive::<Float32Type, _, _>(vectors, width)),
        ],
    )
    .map_err(Error::storage)
}

fn decode_chunks(batch: &RecordBatch) -> Result<Vec<(i64, Chunk)>> {
    let ids = column::<StringArray>(batch, "id")?;
    let seqs = column::<Int64Array>(batch, "seq")?;
    let texts = column::<StringArray>(batch, "text")?;
    let metadata = column::<StringArray>(batch, "metadata")?;
    let vectors = column::<FixedSizeListArray>(batch, VECTOR_COLUMN)?;
    let mut out = Vec::with_capacity(batch.num_rows());
    for i in 0..batch.num_rows() {
        if vectors.is_null(i) {
            return Err(Error::Storage(format!("chunk '{}' has no vector", ids.value(i))));
        }
        let list = vectors.value(i);
        let vector: Vec<f32> = list.as_primitive::<Float32Type>().values().iter().copied().collect();
        let meta: Metadata = serde_json::from_str(metadata.value(i)).map_err(Error::storage)?;
        out.push((
            seqs.value(i),
            Chunk { id: ids.value(i).to_string(), vector, text: texts.value(i).to_string(), metadata: meta },
        ));
    }
    Ok(out)
}
