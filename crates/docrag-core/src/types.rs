//! Domain types shared by the store, the ranker and the orchestrator.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::error::{Error, Result};

pub type ChunkId = String;
pub type Metadata = BTreeMap<String, MetaValue>;

pub const FILENAME_KEY: &str = "filename";
pub const PAGE_KEY: &str = "page";
pub const CHUNK_INDEX_KEY: &str = "chunk_index";
pub const CREATED_AT_KEY: &str = "created_at";

/// Fetch size used when the caller does not ask for one.
pub const DEFAULT_FETCH_LIMIT: usize = 1000;

/// A scalar metadata value. Equality is per variant: `Integer(3)` never
/// equals `Float(3.0)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum MetaValue {
    String(String),
    Integer(i64),
    Float(f64),
    Timestamp(DateTime<Utc>),
}

impl MetaValue {
    pub fn as_str(&self) -> Option<&str> {
        match self { Self::String(s) => Some(s), _ => None }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self { Self::Integer(v) => Some(*v), _ => None }
    }

    pub fn as_timestamp(&self) -> Option<DateTime<Utc>> {
        match self { Self::Timestamp(t) => Some(*t), _ => None }
    }

    /// Parses a command-line style value: integers, then floats, then
    /// RFC 3339 timestamps, falling back to a plain string.
    pub fn parse_loose(raw: &str) -> Self {
        if let Ok(v) = raw.parse::<i64>() { return Self::Integer(v); }
        if let Ok(v) = raw.parse::<f64>() { return Self::Float(v); }
        if let Ok(t) = DateTime::parse_from_rfc3339(raw) { return Self::Timestamp(t.with_timezone(&Utc)); }
        Self::String(raw.to_string())
    }
}

impl fmt::Display for MetaValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::String(s) => write!(f, "{s:?}"),
            Self::Integer(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::Timestamp(t) => write!(f, "{}", t.to_rfc3339()),
        }
    }
}

impl From<&str> for MetaValue {
    fn from(v: &str) -> Self { Self::String(v.to_string()) }
}

impl From<String> for MetaValue {
    fn from(v: String) -> Self { Self::String(v) }
}

impl From<i64> for MetaValue {
    fn from(v: i64) -> Self { Self::Integer(v) }
}

impl From<f64> for MetaValue {
    fn from(v: f64) -> Self { Self::Float(v) }
}

impl From<DateTime<Utc>> for MetaValue {
    fn from(v: DateTime<Utc>) -> Self { Self::Timestamp(v) }
}

/// The atomic retrievable unit.
///
/// - `id`: unique identifier, stable for the lifetime of the chunk
/// - `vector`: embedding of `text`; every vector in one store shares a dimension
/// - `text`: the original chunk content
/// - `metadata`: always carries `filename`, `page` and `chunk_index`; may carry
///   a `created_at` timestamp used by time-range filtering
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub id: ChunkId,
    pub vector: Vec<f32>,
    pub text: String,
    pub metadata: Metadata,
}

impl Chunk {
    /// Builds a chunk carrying the three required metadata keys.
    pub fn new(
        id: impl Into<ChunkId>,
        vector: Vec<f32>,
        text: impl Into<String>,
        filename: &str,
        page: i64,
        chunk_index: i64,
    ) -> Self {
        let mut metadata = Metadata::new();
        metadata.insert(FILENAME_KEY.to_string(), MetaValue::from(filename));
        metadata.insert(PAGE_KEY.to_string(), MetaValue::Integer(page));
        metadata.insert(CHUNK_INDEX_KEY.to_string(), MetaValue::Integer(chunk_index));
        Self { id: id.into(), vector, text: text.into(), metadata }
    }

    #[must_use]
    pub fn with_meta(mut self, key: impl Into<String>, value: impl Into<MetaValue>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub fn with_created_at(self, at: DateTime<Utc>) -> Self {
        self.with_meta(CREATED_AT_KEY, at)
    }

    pub fn dim(&self) -> usize { self.vector.len() }

    pub fn filename(&self) -> Option<&str> {
        self.metadata.get(FILENAME_KEY).and_then(MetaValue::as_str)
    }

    pub fn page(&self) -> Option<i64> {
        self.metadata.get(PAGE_KEY).and_then(MetaValue::as_i64)
    }

    pub fn chunk_index(&self) -> Option<i64> {
        self.metadata.get(CHUNK_INDEX_KEY).and_then(MetaValue::as_i64)
    }

    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        self.metadata.get(CREATED_AT_KEY).and_then(MetaValue::as_timestamp)
    }

    /// Checks the shape every stored chunk must have.
    pub fn validate(&self) -> Result<()> {
        let bad = |reason: &str| Err(Error::invalid_chunk(&self.id, reason));
        if self.id.trim().is_empty() { return bad("id is empty"); }
        if self.text.trim().is_empty() { return bad("text is empty"); }
        if self.vector.is_empty() { return bad("vector is empty"); }
        if self.vector.iter().any(|x| !x.is_finite()) { return bad("vector has non-finite components"); }
        if self.filename().is_none() { return bad("metadata.filename must be a string"); }
        if self.page().is_none() { return bad("metadata.page must be an integer"); }
        match self.chunk_index() {
            Some(i) if i >= 0 => {}
            _ => return bad("metadata.chunk_index must be a non-negative integer"),
        }
        if self.metadata.contains_key(CREATED_AT_KEY) && self.created_at().is_none() {
            return bad("metadata.created_at must be a timestamp");
        }
        Ok(())
    }
}

/// A logical partition of the store, one per ingested document.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Namespace(String);

impl Namespace {
    pub fn new(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        if name.is_empty() {
            return Err(Error::InvalidArgument("namespace is empty".into()));
        }
        if let Some(c) = name.chars().find(|c| !Self::allowed(*c)) {
            return Err(Error::InvalidArgument(format!("namespace '{name}' contains '{c}'")));
        }
        Ok(Self(name))
    }

    /// `{stem}-{unix_seconds}`. Normalising the stem is lossy, so distinct
    /// files can derive the same name; callers that need a fresh namespace
    /// check for that and fall back to [`Namespace::with_suffix`].
    pub fn for_document(filename: &str, at: DateTime<Utc>) -> Self {
        let stem = std::path::Path::new(filename)
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_default();
        let mut base: String = stem
            .to_lowercase()
            .chars()
            .map(|c| if c == ' ' || !Self::allowed(c) { '_' } else { c })
            .collect();
        if base.is_empty() { base.push_str("document"); }
        Self(format!("{}-{}", base, at.timestamp()))
    }

    /// `{self}-{n}`, for when the derived name is already taken.
    pub fn with_suffix(&self, n: usize) -> Self {
        Self(format!("{}-{}", self.0, n))
    }

    pub fn chunk_id(&self, chunk_index: usize) -> ChunkId {
        format!("{}-chunk-{}", self.0, chunk_index)
    }

    pub fn as_str(&self) -> &str { &self.0 }

    fn allowed(c: char) -> bool {
        c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '_' | '-' | '.')
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(&self.0) }
}

impl TryFrom<String> for Namespace {
    type Error = Error;
    fn try_from(value: String) -> Result<Self> { Self::new(value) }
}

impl From<Namespace> for String {
    fn from(ns: Namespace) -> Self { ns.0 }
}

/// Inclusive time window over `created_at`; a missing bound is open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TimeRange {
    start: Option<DateTime<Utc>>,
    end: Option<DateTime<Utc>>,
}

impl TimeRange {
    pub fn new(start: Option<DateTime<Utc>>, end: Option<DateTime<Utc>>) -> Result<Self> {
        if let (Some(s), Some(e)) = (start, end) {
            if s > e {
                return Err(Error::InvalidArgument(format!("time range start {s} is after end {e}")));
            }
        }
        Ok(Self { start, end })
    }

    pub fn between(start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Self> {
        Self::new(Some(start), Some(end))
    }

    pub fn start(&self) -> Option<DateTime<Utc>> { self.start }
    pub fn end(&self) -> Option<DateTime<Utc>> { self.end }

    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        self.start.map_or(true, |s| at >= s) && self.end.map_or(true, |e| at <= e)
    }
}

/// Parameters of a bulk read from a chunk store.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchQuery {
    pub namespace: Option<Namespace>,
    pub filter: Metadata,
    pub time_range: Option<TimeRange>,
    pub limit: usize,
}

impl Default for FetchQuery {
    fn default() -> Self {
        Self { namespace: None, filter: Metadata::new(), time_range: None, limit: DEFAULT_FETCH_LIMIT }
    }
}

impl FetchQuery {
    pub fn new() -> Self { Self::default() }

    #[must_use]
    pub fn namespace(mut self, ns: Namespace) -> Self { self.namespace = Some(ns); self }

    #[must_use]
    pub fn filter(mut self, key: impl Into<String>, value: impl Into<MetaValue>) -> Self {
        self.filter.insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub fn time_range(mut self, range: TimeRange) -> Self { self.time_range = Some(range); self }

    #[must_use]
    pub fn limit(mut self, limit: usize) -> Self { self.limit = limit; self }

    /// Exact-match on every filter key (logical AND), then the time window.
    /// Chunks without `created_at` are not excluded by a time range.
    pub fn matches(&self, chunk: &Chunk) -> bool {
        let meta_ok = self.filter.iter().all(|(k, v)| chunk.metadata.get(k) == Some(v));
        let time_ok = match (self.time_range, chunk.created_at()) {
            (Some(range), Some(at)) => range.contains(at),
            _ => true,
        };
        meta_ok && time_ok
    }
}

impl fmt::Display for FetchQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "namespace={}", self.namespace.as_ref().map_or("*", Namespace::as_str))?;
        if self.filter.is_empty() {
            write!(f, " filter={{}}")?;
        } else {
            let pairs: Vec<String> = self.filter.iter().map(|(k, v)| format!("{k}={v}")).collect();
            write!(f, " filter={{{}}}", pairs.join(", "))?;
        }
        if let Some(range) = self.time_range {
            let fmt_bound = |b: Option<DateTime<Utc>>| b.map_or_else(|| "..".to_string(), |t| t.to_rfc3339());
            write!(f, " time_range=[{}, {}]", fmt_bound(range.start), fmt_bound(range.end))?;
        }
        Ok(())
    }
}

/// One ranked chunk. `score` is cosine similarity, higher is better.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub id: ChunkId,
    pub text: String,
    pub metadata: Metadata,
    pub score: f32,
}

/// Hits sorted by score descending, ties in insertion order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    pub hits: Vec<SearchHit>,
}

impl SearchResult {
    pub fn len(&self) -> usize { self.hits.len() }
    pub fn is_empty(&self) -> bool { self.hits.is_empty() }
    pub fn iter(&self) -> std::slice::Iter<'_, SearchHit> { self.hits.iter() }
    pub fn ids(&self) -> Vec<&str> { self.hits.iter().map(|h| h.id.as_str()).collect() }

    /// Context records for the answer-generation step:
    /// `[{ "content", "metadata", "score" }, ...]` in rank order.
    pub fn to_context_json(&self) -> serde_json::Result<String> {
        #[derive(Serialize)]
        struct Record<'a> { content: &'a str, metadata: &'a Metadata, score: f32 }
        let records: Vec<Record<'_>> = self
            .hits
            .iter()
            .map(|h| Record { content: &h.text, metadata: &h.metadata, score: h.score })
            .collect();
        serde_json::to_string_pretty(&records)
    }
}

impl IntoIterator for SearchResult {
    type Item = SearchHit;
    type IntoIter = std::vec::IntoIter<SearchHit>;
    fn into_iter(self) -> Self::IntoIter { self.hits.into_iter() }
}
