//! Offline evaluation harness.
//!
//! Replays a JSONL query file through the pipeline and reports simple
//! retrieval-quality metrics: hit rate (answered with citations), refusal
//! rate, clarify rate, and latency p50/p95. Intended for threshold
//! calibration runs, not the serving path.

use std::path::Path;
use std::time::Instant;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::model::{Citation, FailureMode, Query};
use crate::pipeline::RagService;

#[derive(Debug, Clone, Deserialize)]
pub struct EvalQuery {
    #[serde(default)]
    pub id: Option<String>,
    pub query: String,
}

#[derive(Debug, Serialize)]
pub struct EvalRecord {
    pub id: Option<String>,
    pub query: String,
    pub answer: Option<String>,
    pub failure_mode: Option<FailureMode>,
    pub confidence: f32,
    pub citations: Vec<Citation>,
    pub latency_ms: u64,
}

#[derive(Debug, Serialize)]
pub struct EvalSummary {
    pub count: usize,
    pub elapsed_s: f64,
    pub hit_rate: f64,
    pub refusal_rate: f64,
    pub clarify_rate: f64,
    pub latency_p50_ms: u64,
    pub latency_p95_ms: u64,
}

#[derive(Debug, Serialize)]
pub struct EvalReport {
    pub summary: EvalSummary,
    pub results: Vec<EvalRecord>,
}

/// Read queries from a JSONL file, skipping blank and malformed lines the
/// same way a hand-edited query set tends to need.
pub fn load_queries(path: &Path) -> Result<Vec<EvalQuery>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("cannot read query file {}", path.display()))?;
    let mut queries = Vec::new();
    for line in raw.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match serde_json::from_str::<EvalQuery>(line) {
            Ok(query) => queries.push(query),
            Err(e) => tracing::warn!(error = %e, "skipping malformed eval query line"),
        }
    }
    Ok(queries)
}

pub async fn run_eval(service: &RagService, queries: &[EvalQuery]) -> EvalReport {
    let started = Instant::now();
    let mut results = Vec::with_capacity(queries.len());
    let mut latencies = Vec::with_capacity(queries.len());
    let mut hits = 0usize;
    let mut refusals = 0usize;
    let mut clarifies = 0usize;

    for item in queries {
        let query_start = Instant::now();
        let prediction = service.answer_query(Query::new(item.query.clone())).await;
        let latency_ms = query_start.elapsed().as_millis() as u64;
        latencies.push(latency_ms);

        match prediction.failure_mode {
            None => {
                if !prediction.citations.is_empty() {
                    hits += 1;
                }
            }
            Some(FailureMode::NeedsClarification) => clarifies += 1,
            Some(_) => refusals += 1,
        }

        results.push(EvalRecord {
            id: item.id.clone(),
            query: item.query.clone(),
            answer: prediction.answer,
            failure_mode: prediction.failure_mode,
            confidence: prediction.confidence,
            citations: prediction.citations,
            latency_ms,
        });
    }

    let count = results.len();
    let rate = |n: usize| if count == 0 { 0.0 } else { n as f64 / count as f64 };
    let summary = EvalSummary {
        count,
        elapsed_s: started.elapsed().as_secs_f64(),
        hit_rate: rate(hits),
        refusal_rate: rate(refusals),
        clarify_rate: rate(clarifies),
        latency_p50_ms: percentile(&mut latencies.clone(), 50),
        latency_p95_ms: percentile(&mut latencies, 95),
    };
    EvalReport { summary, results }
}

fn percentile(latencies: &mut [u64], pct: usize) -> u64 {
    if latencies.is_empty() {
        return 0;
    }
    latencies.sort_unstable();
    let rank = (latencies.len() * pct).div_ceil(100);
    latencies[rank.saturating_sub(1).min(latencies.len() - 1)]
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn percentile_of_sorted_latencies() {
        let mut values: Vec<u64> = (1..=100).collect();
        assert_eq!(percentile(&mut values, 50), 50);
        assert_eq!(percentile(&mut values.clone(), 95), 95);
        assert_eq!(percentile(&mut [7], 95), 7);
        assert_eq!(percentile(&mut [], 95), 0);
    }

    #[test]
    fn loads_jsonl_skipping_bad_lines() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, r#"{{"id": "q1", "query": "unemployment rate"}}"#).unwrap();
        writeln!(file).unwrap();
        writeln!(file, "not json").unwrap();
        writeln!(file, r#"{{"query": "labour force size"}}"#).unwrap();
        file.flush().unwrap();

        let queries = load_queries(file.path()).unwrap();
        assert_eq!(queries.len(), 2);
        assert_eq!(queries[0].id.as_deref(), Some("q1"));
        assert!(queries[1].id.is_none());
    }
}
