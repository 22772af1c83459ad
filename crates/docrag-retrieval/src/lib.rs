//! docrag-retrieval
//!
//! Similarity ranking, the query-time [`Retriever`] and the document
//! [`Ingestor`], generic over any `ChunkStore`.

pub mod ingest;
pub mod rank;
pub mod retriever;

pub use ingest::{IngestReport, Ingestor};
pub use rank::{cosine_similarity, rank};
pub use retriever::{Retriever, SearchRequest};
