//! Query-time retrieval: embed the query, fetch the nearest chunks.
//!
//! Owns no state of its own; it composes the injected embedder handle and
//! store, and enforces the query-path resource rules: every call carries a
//! timeout, and a failed embedding gets exactly one retry with backoff.

use std::sync::Arc;
use std::time::Duration;

use crate::config::RagConfig;
use crate::embedder::Embedder;
use crate::error::{RagError, Result};
use crate::model::{Query, RetrievalResult};
use crate::store::VectorStore;

pub struct Retriever {
    embedder: Arc<dyn Embedder>,
    store: Arc<VectorStore>,
    top_k: usize,
    similarity_floor: f32,
    call_timeout: Duration,
    retry_backoff: Duration,
}

impl Retriever {
    pub fn new(embedder: Arc<dyn Embedder>, store: Arc<VectorStore>, config: &RagConfig) -> Self {
        Self {
            embedder,
            store,
            top_k: config.top_k,
            similarity_floor: config.similarity_floor,
            call_timeout: Duration::from_millis(config.call_timeout_ms),
            retry_backoff: Duration::from_millis(config.retry_backoff_ms),
        }
    }

    /// Embed the query text and fetch the top-K nearest chunks.
    ///
    /// An empty corpus is a valid state during early ingestion, so
    /// `EmptyStore` comes back as an explicitly-empty result rather than an
    /// error; the decision layer routes it to a "no data" refusal.
    pub async fn retrieve(&self, query: &Query) -> Result<RetrievalResult> {
        let embedding = self.embed_query(&query.text).await?;

        let search = self
            .store
            .search(&embedding, self.top_k, self.similarity_floor);
        match tokio::time::timeout(self.call_timeout, search).await {
            Ok(Ok(result)) => Ok(result),
            Ok(Err(RagError::EmptyStore)) => Ok(RetrievalResult::empty_corpus()),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(RagError::Timeout {
                operation: "vector search",
                millis: self.call_timeout.as_millis() as u64,
            }),
        }
    }

    /// Single-item batch through the embedder, with one bounded retry when
    /// the backend reports itself unavailable. Timeouts are not retried;
    /// they fail over immediately.
    async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        match self.try_embed(text).await {
            Ok(embedding) => Ok(embedding),
            Err(RagError::EmbeddingUnavailable(reason)) => {
                tracing::warn!(%reason, "query embedding failed, retrying once");
                tokio::time::sleep(self.retry_backoff).await;
                self.try_embed(text).await
            }
            Err(e) => Err(e),
        }
    }

    async fn try_embed(&self, text: &str) -> Result<Vec<f32>> {
        let batch = [text.to_string()];
        let embed = self.embedder.embed(&batch);
        let mut vectors = match tokio::time::timeout(self.call_timeout, embed).await {
            Ok(result) => result?,
            Err(_) => {
                return Err(RagError::Timeout {
                    operation: "query embedding",
                    millis: self.call_timeout.as_millis() as u64,
                })
            }
        };
        vectors
            .pop()
            .ok_or_else(|| RagError::EmbeddingUnavailable("provider returned no vector".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Fails a configurable number of times before succeeding.
    struct FlakyEmbedder {
        dimension: usize,
        failures: AtomicUsize,
    }

    #[async_trait]
    impl Embedder for FlakyEmbedder {
        fn dimension(&self) -> usize {
            self.dimension
        }

        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            let remaining = self.failures.load(Ordering::SeqCst);
            if remaining > 0 {
                self.failures.store(remaining - 1, Ordering::SeqCst);
                return Err(RagError::EmbeddingUnavailable("transient".into()));
            }
            Ok(texts.iter().map(|_| vec![1.0, 0.0, 0.0, 0.0]).collect())
        }
    }

    fn test_config() -> RagConfig {
        RagConfig {
            dimension: 4,
            database_url: "sqlite::memory:".to_string(),
            pool_size: 1,
            retry_backoff_ms: 1,
            ..RagConfig::default()
        }
    }

    async fn store(config: &RagConfig) -> Arc<VectorStore> {
        Arc::new(VectorStore::open(config).await.unwrap())
    }

    #[tokio::test]
    async fn empty_store_becomes_empty_result_not_error() {
        let config = test_config();
        let embedder = Arc::new(FlakyEmbedder {
            dimension: 4,
            failures: AtomicUsize::new(0),
        });
        let retriever = Retriever::new(embedder, store(&config).await, &config);

        let result = retriever.retrieve(&Query::new("anything")).await.unwrap();
        assert!(result.corpus_empty);
        assert!(result.is_empty());
    }

    #[tokio::test]
    async fn transient_embedding_failure_is_retried_once() {
        let config = test_config();
        let embedder = Arc::new(FlakyEmbedder {
            dimension: 4,
            failures: AtomicUsize::new(1),
        });
        let retriever = Retriever::new(embedder, store(&config).await, &config);

        let result = retriever.retrieve(&Query::new("retry me")).await.unwrap();
        assert!(result.corpus_empty);
    }

    #[tokio::test]
    async fn persistent_embedding_failure_propagates() {
        let config = test_config();
        let embedder = Arc::new(FlakyEmbedder {
            dimension: 4,
            failures: AtomicUsize::new(10),
        });
        let retriever = Retriever::new(embedder, store(&config).await, &config);

        let err = retriever.retrieve(&Query::new("down")).await.unwrap_err();
        assert!(matches!(err, RagError::EmbeddingUnavailable(_)));
    }
}
