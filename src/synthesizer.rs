//! Grounded answer assembly.
//!
//! Called only after an `ANSWER` decision. The answer text is templated
//! strictly from retrieved chunk content; nothing outside the retrieved set
//! may appear in it. Every retrieved chunk used contributes one citation.

use crate::model::{Citation, ChunkMeta, Query, RetrievalResult};

/// Upper bound on citation snippet length, in characters.
pub const SNIPPET_MAX_CHARS: usize = 200;
/// Upper bound on the content excerpt quoted in the answer body.
pub const ANSWER_EXCERPT_CHARS: usize = 180;

const FALLBACK_SOURCE: &str = "dataset";

/// Build the answer string and one citation per retrieved chunk.
///
/// Invariant: a non-empty retrieval always yields at least one citation; an
/// answer without citations is a contract violation upstream.
pub fn synthesize(query: &Query, retrieval: &RetrievalResult) -> (String, Vec<Citation>) {
    debug_assert!(!retrieval.is_empty(), "synthesize called without hits");
    tracing::debug!(query = %query.text, hits = retrieval.hits.len(), "synthesizing answer");

    let citations: Vec<Citation> = retrieval
        .hits
        .iter()
        .map(|hit| {
            let meta = chunk_meta(&hit.vector.metadata);
            Citation {
                source: meta
                    .as_ref()
                    .map(|m| m.source_id.clone())
                    .unwrap_or_else(|| FALLBACK_SOURCE.to_string()),
                snippet: truncate(&hit.vector.content, SNIPPET_MAX_CHARS),
                row_or_page: meta.as_ref().map(|m| m.start_row),
            }
        })
        .collect();

    let answer = match retrieval.top() {
        Some(top) => {
            let excerpt = truncate(&top.vector.content, ANSWER_EXCERPT_CHARS);
            match chunk_meta(&top.vector.metadata) {
                Some(meta) => format!(
                    "Based on dataset rows {}–{}: {}",
                    meta.start_row, meta.end_row, excerpt
                ),
                None => format!("Based on the dataset: {}", excerpt),
            }
        }
        None => String::new(),
    };

    (answer, citations)
}

fn chunk_meta(metadata: &serde_json::Value) -> Option<ChunkMeta> {
    serde_json::from_value(metadata.clone()).ok()
}

/// Char-safe truncation with an ellipsis marker, never splitting a
/// multi-byte character.
fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let kept: String = text.chars().take(max_chars.saturating_sub(3)).collect();
    format!("{}...", kept)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ScoredVector, StoredVector};
    use chrono::Utc;

    fn hit(id: &str, content: &str, start_row: usize, end_row: usize) -> ScoredVector {
        ScoredVector {
            vector: StoredVector {
                id: id.to_string(),
                content: content.to_string(),
                embedding: Vec::new(),
                metadata: serde_json::json!({
                    "start_row": start_row,
                    "end_row": end_row,
                    "source_id": "lfs_month_duration",
                }),
                created_at: Utc::now(),
            },
            similarity: 0.9,
        }
    }

    #[test]
    fn every_used_chunk_gets_a_citation() {
        let retrieval = RetrievalResult {
            hits: vec![
                hit("chunk_0_4", "month=2024-01; rate=3.4", 0, 4),
                hit("chunk_4_8", "month=2024-05; rate=3.2", 4, 8),
            ],
            corpus_empty: false,
        };
        let (answer, citations) = synthesize(&Query::new("unemployment rate"), &retrieval);
        assert_eq!(citations.len(), 2);
        assert!(!answer.is_empty());
        assert_eq!(citations[0].source, "lfs_month_duration");
        assert_eq!(citations[0].row_or_page, Some(0));
        assert_eq!(citations[1].row_or_page, Some(4));
    }

    #[test]
    fn answer_quotes_top_chunk_row_range() {
        let retrieval = RetrievalResult {
            hits: vec![hit("chunk_4_8", "month=2024-05; rate=3.2", 4, 8)],
            corpus_empty: false,
        };
        let (answer, _) = synthesize(&Query::new("rate in may"), &retrieval);
        assert!(answer.starts_with("Based on dataset rows 4–8:"));
        assert!(answer.contains("month=2024-05"));
    }

    #[test]
    fn answer_contains_only_retrieved_content() {
        let retrieval = RetrievalResult {
            hits: vec![hit("chunk_0_0", "month=2024-01; rate=3.4", 0, 0)],
            corpus_empty: false,
        };
        let (answer, _) = synthesize(&Query::new("what about 2030?"), &retrieval);
        // The query's own terms must not leak into the grounded answer.
        assert!(!answer.contains("2030"));
    }

    #[test]
    fn snippets_are_bounded_and_char_safe() {
        let long_content = "é".repeat(SNIPPET_MAX_CHARS * 2);
        let retrieval = RetrievalResult {
            hits: vec![hit("chunk_0_4", &long_content, 0, 4)],
            corpus_empty: false,
        };
        let (_, citations) = synthesize(&Query::new("long"), &retrieval);
        assert!(citations[0].snippet.chars().count() <= SNIPPET_MAX_CHARS);
        assert!(citations[0].snippet.ends_with("..."));
    }

    #[test]
    fn unparseable_metadata_falls_back_gracefully() {
        let mut scored = hit("chunk_0_0", "value=1", 0, 0);
        scored.vector.metadata = serde_json::json!({ "unexpected": true });
        let retrieval = RetrievalResult {
            hits: vec![scored],
            corpus_empty: false,
        };
        let (answer, citations) = synthesize(&Query::new("q"), &retrieval);
        assert_eq!(citations[0].source, "dataset");
        assert_eq!(citations[0].row_or_page, None);
        assert!(answer.starts_with("Based on the dataset:"));
    }
}
