//! Embedding providers.
//!
//! A single capability interface (`embed` over a batch) with swappable
//! implementations selected at startup by configuration. The loaded provider
//! is process-wide shared state: constructed once, read-only afterwards, and
//! handed to callers as an `Arc` so tests can substitute a fake without any
//! global.

use std::sync::Arc;

use async_trait::async_trait;
use sha2::{Digest, Sha256};

use crate::config::RagConfig;
use crate::error::{RagError, Result};

/// Provider id selecting [`HashingEmbedder`].
pub const HASHING_MODEL_ID: &str = "hashing";

#[async_trait]
pub trait Embedder: Send + Sync {
    /// Fixed output dimension of this provider.
    fn dimension(&self) -> usize;

    /// Embed a batch of texts. Atomic: either every text gets a vector or
    /// the whole batch fails with `EmbeddingUnavailable`; callers never see
    /// partial batches.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

/// Select the configured provider. The handle is meant to be created once at
/// startup and injected into everything that embeds.
pub fn from_config(config: &RagConfig) -> Result<Arc<dyn Embedder>> {
    match config.embedding_model.as_str() {
        HASHING_MODEL_ID => Ok(Arc::new(HashingEmbedder::new(config.dimension)?)),
        other => {
            #[cfg(feature = "onnx")]
            {
                Ok(Arc::new(FastEmbedProvider::load(other, config.dimension)?))
            }
            #[cfg(not(feature = "onnx"))]
            {
                Err(RagError::Configuration(format!(
                    "embedding model {:?} requires the onnx feature",
                    other
                )))
            }
        }
    }
}

/// Deterministic feature-hashing embedder.
///
/// Tokens are hashed into a fixed number of signed buckets and the result is
/// L2-normalized, so identical text always maps to the identical unit
/// vector at any dimension. This is the offline and test provider; it needs
/// no model assets.
pub struct HashingEmbedder {
    dimension: usize,
}

impl HashingEmbedder {
    pub fn new(dimension: usize) -> Result<Self> {
        if dimension == 0 {
            return Err(RagError::Configuration(
                "embedding dimension must be positive".into(),
            ));
        }
        Ok(Self { dimension })
    }

    fn embed_one(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0f32; self.dimension];
        for token in tokenize(text) {
            let digest = Sha256::digest(token.as_bytes());
            let mut bytes = [0u8; 8];
            bytes.copy_from_slice(&digest[..8]);
            let hash = u64::from_le_bytes(bytes);
            let bucket = (hash % self.dimension as u64) as usize;
            let sign = if digest[8] & 1 == 0 { 1.0 } else { -1.0 };
            vector[bucket] += sign;
        }
        l2_normalize(&mut vector);
        vector
    }
}

#[async_trait]
impl Embedder for HashingEmbedder {
    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.embed_one(t)).collect())
    }
}

/// Local ONNX sentence-embedding provider over a pinned model.
#[cfg(feature = "onnx")]
pub struct FastEmbedProvider {
    model: std::sync::Mutex<fastembed::TextEmbedding>,
    dimension: usize,
}

#[cfg(feature = "onnx")]
impl FastEmbedProvider {
    /// Load the model once; orders of magnitude slower than inference, so
    /// this only ever runs at startup.
    pub fn load(model_name: &str, dimension: usize) -> Result<Self> {
        use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};

        let model_id = match model_name {
            "sentence-transformers/all-MiniLM-L6-v2" | "all-MiniLM-L6-v2" => {
                EmbeddingModel::AllMiniLML6V2
            }
            other => {
                return Err(RagError::Configuration(format!(
                    "unsupported embedding model: {:?}",
                    other
                )))
            }
        };
        let model =
            TextEmbedding::try_new(InitOptions::new(model_id).with_show_download_progress(false))
                .map_err(|e| RagError::EmbeddingUnavailable(e.to_string()))?;
        Ok(Self {
            model: std::sync::Mutex::new(model),
            dimension,
        })
    }
}

#[cfg(feature = "onnx")]
#[async_trait]
impl Embedder for FastEmbedProvider {
    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let vectors = {
            let model = self
                .model
                .lock()
                .map_err(|_| RagError::EmbeddingUnavailable("model lock poisoned".into()))?;
            model
                .embed(texts.to_vec(), None)
                .map_err(|e| RagError::EmbeddingUnavailable(e.to_string()))?
        };
        for vector in &vectors {
            if vector.len() != self.dimension {
                return Err(RagError::DimensionMismatch {
                    expected: self.dimension,
                    actual: vector.len(),
                });
            }
        }
        Ok(vectors)
    }
}

/// Scale a vector to unit length in place. Zero vectors are left untouched.
pub fn l2_normalize(vector: &mut [f32]) {
    let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        for v in vector.iter_mut() {
            *v /= norm;
        }
    }
}

fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|s| s.len() >= 2)
        .map(|s| s.to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_text_embeds_identically() {
        let embedder = HashingEmbedder::new(64).unwrap();
        let texts = vec!["unemployment rate=3.4; month=2024-01".to_string()];
        let a = tokio_test::block_on(embedder.embed(&texts)).unwrap();
        let b = tokio_test::block_on(embedder.embed(&texts)).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn vectors_are_unit_length() {
        let embedder = HashingEmbedder::new(32).unwrap();
        let texts = vec!["labour force survey duration".to_string()];
        let vectors = tokio_test::block_on(embedder.embed(&texts)).unwrap();
        let norm: f32 = vectors[0].iter().map(|v| v * v).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[test]
    fn batch_output_matches_input_length_and_dimension() {
        let embedder = HashingEmbedder::new(16).unwrap();
        let texts: Vec<String> = (0..5).map(|i| format!("row {}", i)).collect();
        let vectors = tokio_test::block_on(embedder.embed(&texts)).unwrap();
        assert_eq!(vectors.len(), 5);
        assert!(vectors.iter().all(|v| v.len() == 16));
    }

    #[test]
    fn empty_text_embeds_to_zero_vector() {
        let embedder = HashingEmbedder::new(8).unwrap();
        let vectors = tokio_test::block_on(embedder.embed(&["".to_string()])).unwrap();
        assert!(vectors[0].iter().all(|v| *v == 0.0));
    }

    #[test]
    fn zero_dimension_is_rejected() {
        assert!(HashingEmbedder::new(0).is_err());
    }
}
