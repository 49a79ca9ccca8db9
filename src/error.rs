use thiserror::Error;

pub type Result<T> = std::result::Result<T, RagError>;

/// Error taxonomy for the retrieval pipeline.
///
/// `Configuration` and `DimensionMismatch` are fatal at startup; the process
/// must not start with an invalid configuration. Everything else is caught at
/// the request boundary and converted into a well-formed `Prediction`.
#[derive(Debug, Error)]
pub enum RagError {
    #[error("invalid configuration: {0}")]
    Configuration(String),

    #[error("invalid dimension: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("embedding backend unavailable: {0}")]
    EmbeddingUnavailable(String),

    #[error("vector store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("vector store is empty")]
    EmptyStore,

    #[error("{operation} timed out after {millis}ms")]
    Timeout { operation: &'static str, millis: u64 },
}

impl RagError {
    /// True for errors that must abort startup rather than be recovered
    /// per-request.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            RagError::Configuration(_) | RagError::DimensionMismatch { .. }
        )
    }
}
