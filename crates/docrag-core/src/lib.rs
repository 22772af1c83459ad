//! docrag-core
//!
//! Data model, error taxonomy and collaborator traits shared by the chunk
//! stores, the embedding providers and the retrieval orchestrator.

pub mod config;
pub mod error;
pub mod splitter;
pub mod traits;
pub mod types;
pub mod validate;

pub use error::{Error, Result};
pub use traits::{ChunkStore, Embedder};
pub use types::{Chunk, FetchQuery, MetaValue, Metadata, Namespace, SearchHit, SearchResult, TimeRange};
