use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One record of the source dataset: named fields in column order, every
/// value already rendered to text. A row is identified by its ordinal
/// position in the snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Row {
    pub fields: Vec<(String, String)>,
}

impl Row {
    pub fn new(fields: Vec<(String, String)>) -> Self {
        Self { fields }
    }
}

/// Range metadata attached to every chunk. `end_row` is inclusive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkMeta {
    pub start_row: usize,
    pub end_row: usize,
    pub source_id: String,
}

/// A contiguous range of rows rendered as a single text blob. Chunk identity
/// is derived from the row range, so re-chunking the same snapshot with the
/// same parameters reproduces identical ids.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    pub id: String,
    pub content: String,
    pub meta: ChunkMeta,
}

/// Input unit for `VectorStore::upsert`. The store owns the persisted copy
/// and stamps `created_at` itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpsertRecord {
    pub id: String,
    pub content: String,
    pub embedding: Vec<f32>,
    pub metadata: serde_json::Value,
}

/// Persisted unit, owned exclusively by the VectorStore.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredVector {
    pub id: String,
    pub content: String,
    pub embedding: Vec<f32>,
    pub metadata: serde_json::Value,
    #[serde(with = "chrono::serde::ts_microseconds")]
    pub created_at: DateTime<Utc>,
}

/// One retrieval hit: a stored vector plus its cosine similarity to the
/// query, clamped to [0, 1].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoredVector {
    pub vector: StoredVector,
    pub similarity: f32,
}

/// Ranked retrieval output, descending by similarity, built fresh per query.
///
/// `corpus_empty` distinguishes "the store holds no data at all" from "no
/// stored vector cleared the similarity floor"; the two route to different
/// failure modes downstream.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RetrievalResult {
    pub hits: Vec<ScoredVector>,
    pub corpus_empty: bool,
}

impl RetrievalResult {
    pub fn empty_corpus() -> Self {
        Self {
            hits: Vec::new(),
            corpus_empty: true,
        }
    }

    pub fn top(&self) -> Option<&ScoredVector> {
        self.hits.first()
    }

    pub fn is_empty(&self) -> bool {
        self.hits.is_empty()
    }
}

/// User query plus optional caller metadata. Ephemeral: the core never
/// persists it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Query {
    pub text: String,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub tool_name: Option<String>,
}

impl Query {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            user_id: None,
            tool_name: None,
        }
    }
}

/// Terminal decision for one request. One state is chosen per query; there
/// are no transitions within a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Answer,
    Clarify,
    Refuse,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureMode {
    NeedsClarification,
    LowConfidence,
    NoData,
    EmbeddingUnavailable,
    StoreUnavailable,
}

/// Pointer back to the source chunk that grounds a synthesized answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Citation {
    pub source: String,
    pub snippet: String,
    pub row_or_page: Option<usize>,
}

/// Response unit returned to the caller. Created per request, never mutated
/// afterward. `failure_mode` is `None` exactly when a grounded answer with
/// citations was produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Prediction {
    pub answer: Option<String>,
    pub citations: Vec<Citation>,
    pub confidence: f32,
    pub failure_mode: Option<FailureMode>,
}

/// Outcome of one ingestion run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestReport {
    pub row_count: usize,
    pub chunk_count: usize,
    pub stored_count: usize,
    pub validation_passed: bool,
}
