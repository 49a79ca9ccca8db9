//! Request orchestration and batch ingestion.
//!
//! `RagService` is the seam the outer layers call into: `answer_query` for
//! the serving path, `ingest` for the batch path. Every serving-path failure
//! is converted into a well-formed `Prediction` here; no error crosses the
//! request boundary.

use std::sync::Arc;
use std::time::Instant;

use uuid::Uuid;

use crate::chunker;
use crate::config::RagConfig;
use crate::decision::ConfidenceScorer;
use crate::embedder::Embedder;
use crate::error::{RagError, Result};
use crate::model::{
    Decision, FailureMode, IngestReport, Prediction, Query, RetrievalResult, Row, UpsertRecord,
};
use crate::retriever::Retriever;
use crate::store::VectorStore;
use crate::synthesizer;

/// Fixed response for queries against a store with no data yet.
pub const NO_DATA_ANSWER: &str = "No relevant data found.";
/// Clarifying question returned on a CLARIFY decision.
pub const CLARIFY_ANSWER: &str =
    "I cannot confidently answer from the dataset; could you clarify or provide more specifics?";

pub struct RagService {
    config: RagConfig,
    embedder: Arc<dyn Embedder>,
    store: Arc<VectorStore>,
    retriever: Retriever,
    scorer: ConfidenceScorer,
}

impl RagService {
    /// Wire the pipeline together. Fails fast on an invalid configuration or
    /// an embedder whose output width disagrees with the store; neither is
    /// recoverable at request time.
    pub fn new(
        config: RagConfig,
        embedder: Arc<dyn Embedder>,
        store: Arc<VectorStore>,
    ) -> Result<Self> {
        config.validate()?;
        if embedder.dimension() != store.dimension() {
            return Err(RagError::DimensionMismatch {
                expected: store.dimension(),
                actual: embedder.dimension(),
            });
        }
        let retriever = Retriever::new(embedder.clone(), store.clone(), &config);
        let scorer = ConfidenceScorer::from_config(&config);
        Ok(Self {
            config,
            embedder,
            store,
            retriever,
            scorer,
        })
    }

    /// Serve one query. Always returns a `Prediction`; failures below the
    /// request boundary are folded into it.
    pub async fn answer_query(&self, query: Query) -> Prediction {
        let request_id = Uuid::new_v4();
        let started = Instant::now();

        let prediction = match self.retriever.retrieve(&query).await {
            Ok(retrieval) => self.respond(&query, &retrieval),
            Err(e) => {
                tracing::warn!(%request_id, error = %e, "retrieval failed, refusing");
                failure_prediction(&e)
            }
        };

        tracing::info!(
            %request_id,
            latency_ms = started.elapsed().as_millis() as u64,
            confidence = prediction.confidence,
            failure_mode = ?prediction.failure_mode,
            citations = prediction.citations.len(),
            user_id = query.user_id.as_deref().unwrap_or("-"),
            tool_name = query.tool_name.as_deref().unwrap_or("-"),
            "query served"
        );
        prediction
    }

    /// Classify a retrieval outcome and assemble the response. Split from
    /// `answer_query` so the decision surface is exercisable without a live
    /// store.
    pub fn respond(&self, query: &Query, retrieval: &RetrievalResult) -> Prediction {
        if retrieval.corpus_empty {
            return Prediction {
                answer: Some(NO_DATA_ANSWER.to_string()),
                citations: Vec::new(),
                confidence: 0.0,
                failure_mode: Some(FailureMode::NoData),
            };
        }

        let (confidence, decision) = self.scorer.classify(retrieval);
        match decision {
            Decision::Answer => {
                let (answer, citations) = synthesizer::synthesize(query, retrieval);
                Prediction {
                    answer: Some(answer),
                    citations,
                    confidence,
                    failure_mode: None,
                }
            }
            Decision::Clarify => Prediction {
                answer: Some(CLARIFY_ANSWER.to_string()),
                citations: Vec::new(),
                confidence,
                failure_mode: Some(FailureMode::NeedsClarification),
            },
            Decision::Refuse => Prediction {
                answer: None,
                citations: Vec::new(),
                confidence,
                failure_mode: Some(FailureMode::LowConfidence),
            },
        }
    }

    /// Batch-ingest a dataset snapshot with the configured chunk parameters.
    pub async fn ingest(&self, rows: &[Row]) -> Result<IngestReport> {
        self.ingest_with(rows, self.config.chunk_size, self.config.chunk_overlap)
            .await
    }

    /// Chunk → embed (batched) → upsert, then validate that nothing was
    /// silently dropped. Embedding here is the batch path; the serving path
    /// never generates chunk embeddings.
    ///
    /// Upserts land per embedding batch, so a run that stops short leaves
    /// every already-written chunk valid.
    pub async fn ingest_with(
        &self,
        rows: &[Row],
        chunk_size: usize,
        overlap: usize,
    ) -> Result<IngestReport> {
        let started = Instant::now();
        let chunks: Vec<_> =
            chunker::chunk(rows, chunk_size, overlap, &self.config.source_id)?.collect();
        let chunk_count = chunks.len();
        tracing::info!(
            rows = rows.len(),
            chunks = chunk_count,
            chunk_size,
            overlap,
            "ingestion started"
        );

        let mut stored_count = 0usize;
        for batch in chunks.chunks(self.config.embed_batch_size) {
            let texts: Vec<String> = batch.iter().map(|c| c.content.clone()).collect();
            let embeddings = self.embed_batch(&texts).await?;

            let records: Vec<UpsertRecord> = batch
                .iter()
                .zip(embeddings)
                .map(|(chunk, embedding)| {
                    Ok(UpsertRecord {
                        id: chunk.id.clone(),
                        content: chunk.content.clone(),
                        embedding,
                        metadata: serde_json::to_value(&chunk.meta).map_err(|e| {
                            RagError::Configuration(format!("metadata encoding: {}", e))
                        })?,
                    })
                })
                .collect::<Result<_>>()?;
            stored_count += self.store.upsert(&records).await?;
        }

        let validation_passed = stored_count == chunk_count;
        if !validation_passed {
            tracing::error!(
                chunk_count,
                stored_count,
                "ingestion validation failed: stored count does not match chunk count"
            );
        }
        tracing::info!(
            stored = stored_count,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "ingestion finished"
        );
        Ok(IngestReport {
            row_count: rows.len(),
            chunk_count,
            stored_count,
            validation_passed,
        })
    }

    /// Batch embedding with the same one-bounded-retry policy as the query
    /// path.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        match self.embedder.embed(texts).await {
            Ok(vectors) => Ok(vectors),
            Err(RagError::EmbeddingUnavailable(reason)) => {
                tracing::warn!(%reason, "embedding batch failed, retrying once");
                tokio::time::sleep(std::time::Duration::from_millis(
                    self.config.retry_backoff_ms,
                ))
                .await;
                self.embedder.embed(texts).await
            }
            Err(e) => Err(e),
        }
    }

    pub fn config(&self) -> &RagConfig {
        &self.config
    }
}

/// Map a below-boundary failure to its refusal prediction. The response
/// shape is identical to the success path; confidence is 0.0 on hard
/// failure.
fn failure_prediction(error: &RagError) -> Prediction {
    let (failure_mode, answer) = match error {
        RagError::EmptyStore => (FailureMode::NoData, Some(NO_DATA_ANSWER.to_string())),
        RagError::EmbeddingUnavailable(_) => (FailureMode::EmbeddingUnavailable, None),
        RagError::Timeout {
            operation: "query embedding",
            ..
        } => (FailureMode::EmbeddingUnavailable, None),
        RagError::StoreUnavailable(_) | RagError::Timeout { .. } => {
            (FailureMode::StoreUnavailable, None)
        }
        // Configuration problems are startup-time bugs if they surface here;
        // degrade to a store failure rather than crossing the boundary.
        RagError::Configuration(_) | RagError::DimensionMismatch { .. } => {
            (FailureMode::StoreUnavailable, None)
        }
    };
    Prediction {
        answer,
        citations: Vec::new(),
        confidence: 0.0,
        failure_mode: Some(failure_mode),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn embedding_failures_map_to_embedding_unavailable() {
        let prediction =
            failure_prediction(&RagError::EmbeddingUnavailable("backend down".into()));
        assert_eq!(
            prediction.failure_mode,
            Some(FailureMode::EmbeddingUnavailable)
        );
        assert_eq!(prediction.confidence, 0.0);
        assert!(prediction.citations.is_empty());
        assert!(prediction.answer.is_none());
    }

    #[test]
    fn embed_timeout_maps_to_embedding_unavailable() {
        let prediction = failure_prediction(&RagError::Timeout {
            operation: "query embedding",
            millis: 2_000,
        });
        assert_eq!(
            prediction.failure_mode,
            Some(FailureMode::EmbeddingUnavailable)
        );
    }

    #[test]
    fn search_timeout_maps_to_store_unavailable() {
        let prediction = failure_prediction(&RagError::Timeout {
            operation: "vector search",
            millis: 2_000,
        });
        assert_eq!(prediction.failure_mode, Some(FailureMode::StoreUnavailable));
    }

    #[test]
    fn empty_store_maps_to_no_data_with_fixed_answer() {
        let prediction = failure_prediction(&RagError::EmptyStore);
        assert_eq!(prediction.failure_mode, Some(FailureMode::NoData));
        assert_eq!(prediction.answer.as_deref(), Some(NO_DATA_ANSWER));
    }
}
