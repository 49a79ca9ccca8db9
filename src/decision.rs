//! Confidence scoring and the answer/clarify/refuse classification.
//!
//! Confidence is the top-1 similarity, optionally lifted by how far the top
//! hit separates from the rest of the result: a clearly separated best match
//! deserves more trust than the same score sitting in a cluster of
//! near-equals. The blend is monotonic in top-1 by construction.

use crate::config::RagConfig;
use crate::model::{Decision, RetrievalResult};

pub struct ConfidenceScorer {
    conf_threshold: f32,
    clarify_threshold: Option<f32>,
    spread_weight: f32,
}

impl ConfidenceScorer {
    pub fn new(conf_threshold: f32, clarify_threshold: Option<f32>, spread_weight: f32) -> Self {
        Self {
            conf_threshold,
            clarify_threshold,
            spread_weight,
        }
    }

    pub fn from_config(config: &RagConfig) -> Self {
        Self::new(
            config.conf_threshold,
            config.clarify_threshold,
            config.spread_weight,
        )
    }

    /// Scalar confidence in [0, 1] derived from retrieval strength.
    ///
    /// `top1 + spread_weight · max(0, top1 − mean(rest))`, clamped to [0, 1].
    /// A single hit degrades to the raw top-1 similarity.
    pub fn confidence(&self, retrieval: &RetrievalResult) -> f32 {
        let Some(top) = retrieval.top() else {
            return 0.0;
        };
        let top1 = top.similarity.clamp(0.0, 1.0);
        let rest = &retrieval.hits[1..];
        if rest.is_empty() || self.spread_weight == 0.0 {
            return top1;
        }
        let mean_rest = rest
            .iter()
            .map(|h| h.similarity.clamp(0.0, 1.0))
            .sum::<f32>()
            / rest.len() as f32;
        let spread = (top1 - mean_rest).max(0.0);
        (top1 + self.spread_weight * spread).clamp(0.0, 1.0)
    }

    /// Classify one request. Boundary ties resolve to the higher bucket:
    /// confidence exactly at a threshold lands above it, not below.
    pub fn decide(&self, confidence: f32, retrieval: &RetrievalResult) -> Decision {
        if retrieval.is_empty() {
            return Decision::Refuse;
        }
        if confidence >= self.conf_threshold {
            return Decision::Answer;
        }
        match self.clarify_threshold {
            Some(clarify) if confidence >= clarify => Decision::Clarify,
            _ => Decision::Refuse,
        }
    }

    /// Convenience for the common score-then-decide sequence.
    pub fn classify(&self, retrieval: &RetrievalResult) -> (f32, Decision) {
        let confidence = self.confidence(retrieval);
        (confidence, self.decide(confidence, retrieval))
    }
}
