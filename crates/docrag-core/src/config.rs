//! Layered configuration and path helpers.
//!
//! Uses Figment to merge built-in defaults, `config.toml`, `config.<env>.toml`
//! (selected by `RUST_ENV`) and `APP_*` env vars (`__` separates nesting, e.g.
//! `APP_STORE__BACKEND=lance`). Configured paths go through [`expand_path`].

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::validate::ChunkIndexPolicy;

pub struct Config {
    figment: Figment,
}

impl Config {
    pub fn load() -> Result<Self> {
        let env_name = env::var("RUST_ENV").unwrap_or_else(|_| "dev".to_string());
        Self::load_for_env(&env_name)
    }

    pub fn load_for_env(env_name: &str) -> Result<Self> {
        let mut figment = Figment::from(Serialized::defaults(Settings::default()))
            .merge(Toml::file("config.toml"));
        match env_name {
            "dev" | "development" => figment = figment.merge(Toml::file("config.dev.toml")),
            "prod" | "production" => figment = figment.merge(Toml::file("config.prod.toml")),
            "test" | "testing" => figment = figment.merge(Toml::file("config.test.toml")),
            _ => {}
        }
        figment = figment.merge(Env::prefixed("APP_").split("__"));
        Ok(Self { figment })
    }

    pub fn from_figment(figment: Figment) -> Self { Self { figment } }

    pub fn get<T>(&self, key: &str) -> Result<T>
    where
        T: serde::de::DeserializeOwned,
    {
        self.figment
            .extract_inner(key)
            .map_err(|e| Error::InvalidConfig(format!("Failed to get '{key}': {e}")))
    }

    /// Extracts and validates the typed settings.
    pub fn settings(&self) -> Result<Settings> {
        let settings: Settings = self
            .figment
            .extract()
            .map_err(|e| Error::InvalidConfig(e.to_string()))?;
        settings.validate()?;
        Ok(settings)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub embedding: EmbeddingSettings,
    pub store: StoreSettings,
    pub retrieval: RetrievalSettings,
    pub retry: RetrySettings,
    pub ingest: IngestSettings,
}

impl Settings {
    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: &str| Err(Error::InvalidConfig(msg.to_string()));
        if self.embedding.dimension == 0 { return invalid("embedding.dimension must be > 0"); }
        if self.embedding.max_len == 0 { return invalid("embedding.max_len must be > 0"); }
        if self.store.dimension == Some(0) { return invalid("store.dimension must be > 0 when set"); }
        if self.store.table.trim().is_empty() { return invalid("store.table must not be empty"); }
        if self.retrieval.default_limit == 0 { return invalid("retrieval.default_limit must be > 0"); }
        if self.retrieval.fetch_limit == 0 { return invalid("retrieval.fetch_limit must be > 0"); }
        if self.retry.max_attempts == 0 { return invalid("retry.max_attempts must be >= 1"); }
        if !(0.0..=1.0).contains(&self.retry.jitter) { return invalid("retry.jitter must be within [0, 1]"); }
        if self.retry.base_delay_ms > self.retry.max_delay_ms { return invalid("retry.base_delay_ms must not exceed retry.max_delay_ms"); }
        if self.ingest.chunk_size == 0 { return invalid("ingest.chunk_size must be > 0"); }
        if self.ingest.chunk_overlap >= self.ingest.chunk_size { return invalid("ingest.chunk_overlap must be smaller than ingest.chunk_size"); }
        if self.ingest.embed_batch_size == 0 { return invalid("ingest.embed_batch_size must be > 0"); }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingSettings {
    pub use_fake: bool,
    pub model_dir: Option<String>,
    pub dimension: usize,
    pub max_len: usize,
}

impl Default for EmbeddingSettings {
    fn default() -> Self {
        Self { use_fake: false, model_dir: None, dimension: 1024, max_len: 256 }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreBackend {
    #[default]
    Memory,
    Lance,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreSettings {
    pub backend: StoreBackend,
    /// Snapshot file for `memory`, database directory for `lance`.
    pub path: Option<String>,
    pub table: String,
    pub dimension: Option<usize>,
    pub chunk_index_policy: ChunkIndexPolicy,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Memory,
            path: None,
            table: "chunks".to_string(),
            dimension: None,
            chunk_index_policy: ChunkIndexPolicy::Strict,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalSettings {
    pub default_limit: usize,
    /// Most candidates one search ranks.
    pub fetch_limit: usize,
    pub embed_timeout_ms: u64,
    pub store_timeout_ms: u64,
}

impl Default for RetrievalSettings {
    fn default() -> Self {
        Self {
            default_limit: 5,
            fetch_limit: crate::types::DEFAULT_FETCH_LIMIT,
            embed_timeout_ms: 30_000,
            store_timeout_ms: 10_000,
        }
    }
}

impl RetrievalSettings {
    pub fn embed_timeout(&self) -> Duration { Duration::from_millis(self.embed_timeout_ms) }
    pub fn store_timeout(&self) -> Duration { Duration::from_millis(self.store_timeout_ms) }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub jitter: f64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self { max_attempts: 3, base_delay_ms: 200, max_delay_ms: 5_000, jitter: 0.2 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestSettings {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub embed_batch_size: usize,
}

impl Default for IngestSettings {
    fn default() -> Self {
        Self { chunk_size: 1000, chunk_overlap: 200, embed_batch_size: 32 }
    }
}

/// Expand a user-provided path string:
/// - Expands leading '~' to the user's home directory
/// - Expands ${VAR} and $VAR environment variables
/// - Returns a PathBuf without attempting to canonicalize
pub fn expand_path<S: AsRef<str>>(input: S) -> PathBuf {
    let s = input.as_ref();
    // Expand env vars first
    let expanded_env = shellexpand::env(s).unwrap_or(std::borrow::Cow::Borrowed(s));
    let expanded = shellexpand::tilde(&expanded_env);
    PathBuf::from(expanded.as_ref())
}
