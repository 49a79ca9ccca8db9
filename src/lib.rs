//! Tabular RAG core
//!
//! Retrieval-augmented question answering over a single tabular dataset:
//! rows are chunked and embedded at ingestion time, queries retrieve the
//! nearest chunks by cosine similarity, and a confidence signal decides
//! between answering with citations, asking for clarification, or refusing.

pub mod chunker;
pub mod config;
pub mod dataset;
pub mod decision;
pub mod embedder;
pub mod error;
pub mod eval;
pub mod model;
pub mod pipeline;
pub mod retriever;
pub mod store;
pub mod synthesizer;

pub use config::RagConfig;
pub use error::{RagError, Result};
pub use model::*;
pub use pipeline::RagService;
pub use store::VectorStore;

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default configuration values
pub mod defaults {
    pub const DEFAULT_MODEL: &str = "hashing";
    pub const DEFAULT_DIMENSION: usize = 384;
    pub const DEFAULT_TOP_K: usize = 5;
    pub const DEFAULT_SIMILARITY_FLOOR: f32 = 0.0;
    pub const DEFAULT_CONF_THRESHOLD: f32 = 0.6;
    pub const DEFAULT_CLARIFY_THRESHOLD: f32 = 0.25;
    pub const DEFAULT_SPREAD_WEIGHT: f32 = 0.1;
    pub const DEFAULT_CHUNK_SIZE: usize = 25;
    pub const DEFAULT_CHUNK_OVERLAP: usize = 1;
    pub const DEFAULT_EMBED_BATCH_SIZE: usize = 32;
    pub const DEFAULT_CALL_TIMEOUT_MS: u64 = 2_000;
    pub const DEFAULT_RETRY_BACKOFF_MS: u64 = 200;
    pub const DEFAULT_SOURCE_ID: &str = "dataset";
    pub const DEFAULT_DATABASE_URL: &str = "sqlite://tabrag.db";
}
