use std::fmt::Display;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::defaults;
use crate::error::{RagError, Result};

/// Tuning values consumed by the core. The loading mechanism is the
/// harness's concern; `from_env` covers the binary, tests construct the
/// struct directly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RagConfig {
    /// Embedding provider id. `"hashing"` selects the deterministic local
    /// provider; any other value names an ONNX sentence-embedding model.
    pub embedding_model: String,
    /// Vector dimension; must match the provider's output width.
    pub dimension: usize,
    pub top_k: usize,
    /// Hits at or below this similarity are dropped from retrieval.
    pub similarity_floor: f32,
    pub conf_threshold: f32,
    /// Lower decision bound; `None` disables the clarify bucket entirely.
    pub clarify_threshold: Option<f32>,
    /// Weight of the top-1/rest spread in the confidence blend; 0 reduces
    /// confidence to the raw top-1 similarity.
    pub spread_weight: f32,
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub embed_batch_size: usize,
    /// Budget for each embedding call and each vector search on the query
    /// path, and for pool acquisition.
    pub call_timeout_ms: u64,
    pub retry_backoff_ms: u64,
    pub pool_size: u32,
    /// Dataset identifier carried into chunk metadata and citations.
    pub source_id: String,
    pub database_url: String,
}

impl Default for RagConfig {
    fn default() -> Self {
        Self {
            embedding_model: defaults::DEFAULT_MODEL.to_string(),
            dimension: defaults::DEFAULT_DIMENSION,
            top_k: defaults::DEFAULT_TOP_K,
            similarity_floor: defaults::DEFAULT_SIMILARITY_FLOOR,
            conf_threshold: defaults::DEFAULT_CONF_THRESHOLD,
            clarify_threshold: Some(defaults::DEFAULT_CLARIFY_THRESHOLD),
            spread_weight: defaults::DEFAULT_SPREAD_WEIGHT,
            chunk_size: defaults::DEFAULT_CHUNK_SIZE,
            chunk_overlap: defaults::DEFAULT_CHUNK_OVERLAP,
            embed_batch_size: defaults::DEFAULT_EMBED_BATCH_SIZE,
            call_timeout_ms: defaults::DEFAULT_CALL_TIMEOUT_MS,
            retry_backoff_ms: defaults::DEFAULT_RETRY_BACKOFF_MS,
            pool_size: num_cpus::get().max(1) as u32,
            source_id: defaults::DEFAULT_SOURCE_ID.to_string(),
            database_url: defaults::DEFAULT_DATABASE_URL.to_string(),
        }
    }
}

impl RagConfig {
    /// Build a config from the environment, falling back to defaults for
    /// anything unset.
    pub fn from_env() -> Result<Self> {
        let base = Self::default();
        let config = Self {
            embedding_model: env_string("EMBEDDING_MODEL_NAME", &base.embedding_model),
            dimension: env_parse("VECTOR_DIMENSION", base.dimension)?,
            top_k: env_parse("RAG_TOP_K", base.top_k)?,
            similarity_floor: env_parse("SIMILARITY_FLOOR", base.similarity_floor)?,
            conf_threshold: env_parse("CONF_THRESHOLD", base.conf_threshold)?,
            clarify_threshold: Some(env_parse(
                "CLARIFY_THRESHOLD",
                defaults::DEFAULT_CLARIFY_THRESHOLD,
            )?),
            spread_weight: env_parse("SPREAD_WEIGHT", base.spread_weight)?,
            chunk_size: env_parse("CHUNK_SIZE", base.chunk_size)?,
            chunk_overlap: env_parse("CHUNK_OVERLAP", base.chunk_overlap)?,
            embed_batch_size: env_parse("EMBED_BATCH_SIZE", base.embed_batch_size)?,
            call_timeout_ms: env_parse("RAG_TIMEOUT_MS", base.call_timeout_ms)?,
            retry_backoff_ms: env_parse("RETRY_BACKOFF_MS", base.retry_backoff_ms)?,
            pool_size: env_parse("POOL_SIZE", base.pool_size)?,
            source_id: env_string("DATASET_SOURCE_ID", &base.source_id),
            database_url: env_string("DATABASE_URL", &base.database_url),
        };
        config.validate()?;
        Ok(config)
    }

    /// Fail-fast validation. Called before any work begins; a process with
    /// an invalid configuration must not start.
    pub fn validate(&self) -> Result<()> {
        if self.dimension == 0 {
            return Err(RagError::Configuration("dimension must be positive".into()));
        }
        if self.top_k == 0 {
            return Err(RagError::Configuration("top_k must be positive".into()));
        }
        if self.chunk_size == 0 {
            return Err(RagError::Configuration(
                "chunk_size must be positive".into(),
            ));
        }
        if self.chunk_overlap >= self.chunk_size {
            return Err(RagError::Configuration(format!(
                "chunk_overlap {} must be smaller than chunk_size {}",
                self.chunk_overlap, self.chunk_size
            )));
        }
        if !(0.0..=1.0).contains(&self.conf_threshold) {
            return Err(RagError::Configuration(
                "conf_threshold must be within [0, 1]".into(),
            ));
        }
        if let Some(clarify) = self.clarify_threshold {
            if !(0.0..=1.0).contains(&clarify) {
                return Err(RagError::Configuration(
                    "clarify_threshold must be within [0, 1]".into(),
                ));
            }
            if clarify >= self.conf_threshold {
                return Err(RagError::Configuration(format!(
                    "clarify_threshold {} must be below conf_threshold {}",
                    clarify, self.conf_threshold
                )));
            }
        }
        if !(0.0..1.0).contains(&self.similarity_floor) {
            return Err(RagError::Configuration(
                "similarity_floor must be within [0, 1)".into(),
            ));
        }
        if self.spread_weight < 0.0 {
            return Err(RagError::Configuration(
                "spread_weight must not be negative".into(),
            ));
        }
        if self.embed_batch_size == 0 {
            return Err(RagError::Configuration(
                "embed_batch_size must be positive".into(),
            ));
        }
        if self.call_timeout_ms == 0 {
            return Err(RagError::Configuration(
                "call_timeout_ms must be positive".into(),
            ));
        }
        if self.pool_size == 0 {
            return Err(RagError::Configuration(
                "pool_size must be positive".into(),
            ));
        }
        Ok(())
    }
}

fn env_string(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: Display,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .parse()
            .map_err(|e| RagError::Configuration(format!("invalid {}: {}", key, e))),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(RagConfig::default().validate().is_ok());
    }

    #[test]
    fn rejects_overlap_not_below_chunk_size() {
        let config = RagConfig {
            chunk_size: 5,
            chunk_overlap: 5,
            ..RagConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(RagError::Configuration(_))
        ));
    }

    #[test]
    fn rejects_clarify_at_or_above_conf() {
        let config = RagConfig {
            conf_threshold: 0.6,
            clarify_threshold: Some(0.6),
            ..RagConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn clarify_bucket_can_be_disabled() {
        let config = RagConfig {
            clarify_threshold: None,
            ..RagConfig::default()
        };
        assert!(config.validate().is_ok());
    }
}
