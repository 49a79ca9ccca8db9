//! Vector persistence and nearest-neighbor search.
//!
//! Chunks live in a single SQLite table keyed by chunk id (content,
//! fixed-width embedding blob, JSON metadata, timestamp) behind a bounded
//! connection pool. Search goes through an in-process HNSW graph built over
//! L2-normalized embeddings; with unit vectors the euclidean distance `d`
//! recovers cosine similarity as `1 - d²/2`. The graph is rebuilt lazily
//! after writes, so ingestion batches pay the build cost, not queries.

use std::cmp::Ordering;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use instant_distance::{Builder, HnswMap, Search};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{Row as SqlxRow, SqlitePool};
use tokio::sync::RwLock;

use crate::config::RagConfig;
use crate::embedder::l2_normalize;
use crate::error::{RagError, Result};
use crate::model::{RetrievalResult, ScoredVector, StoredVector, UpsertRecord};

/// Fixed seed for graph construction keeps search results reproducible
/// across rebuilds of the same corpus.
const INDEX_SEED: u64 = 0x5eed_cafe;

pub struct VectorStore {
    pool: SqlitePool,
    dimension: usize,
    index: RwLock<IndexState>,
}

struct IndexState {
    map: Option<HnswMap<VectorPoint, IndexedId>>,
    stale: bool,
}

#[derive(Clone)]
struct VectorPoint(Vec<f32>);

impl instant_distance::Point for VectorPoint {
    fn distance(&self, other: &Self) -> f32 {
        self.0
            .iter()
            .zip(&other.0)
            .map(|(a, b)| (a - b) * (a - b))
            .sum::<f32>()
            .sqrt()
    }
}

#[derive(Clone)]
struct IndexedId {
    id: String,
    /// Insertion order (sqlite rowid); the tie-breaker for equal similarity.
    seq: i64,
}

struct Candidate {
    id: String,
    seq: i64,
    similarity: f32,
}

impl VectorStore {
    /// Open (creating if missing) the backing database and prepare the
    /// schema. Pool size and acquisition timeout are bounded; a saturated
    /// pool fails the request instead of queuing without limit.
    pub async fn open(config: &RagConfig) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(&config.database_url)
            .map_err(|e| {
                RagError::Configuration(format!(
                    "invalid database url {:?}: {}",
                    config.database_url, e
                ))
            })?
            .create_if_missing(true)
            // WAL keeps ingestion upserts from blocking concurrent reads.
            .journal_mode(SqliteJournalMode::Wal);
        let pool = SqlitePoolOptions::new()
            .max_connections(config.pool_size)
            .acquire_timeout(Duration::from_millis(config.call_timeout_ms))
            .connect_with(options)
            .await
            .map_err(store_err)?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS vectors (
                id TEXT PRIMARY KEY,
                content TEXT NOT NULL,
                embedding BLOB NOT NULL,
                metadata TEXT NOT NULL,
                created_at TEXT NOT NULL
            )",
        )
        .execute(&pool)
        .await
        .map_err(store_err)?;
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_vectors_start_row
             ON vectors (json_extract(metadata, '$.start_row'))",
        )
        .execute(&pool)
        .await
        .map_err(store_err)?;

        Ok(Self {
            pool,
            dimension: config.dimension,
            index: RwLock::new(IndexState {
                map: None,
                stale: true,
            }),
        })
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Idempotent batch write. Re-upserting an id replaces content,
    /// embedding and metadata and refreshes the timestamp; it never
    /// duplicates. Returns the number of records written.
    pub async fn upsert(&self, batch: &[UpsertRecord]) -> Result<usize> {
        for record in batch {
            if record.embedding.len() != self.dimension {
                return Err(RagError::DimensionMismatch {
                    expected: self.dimension,
                    actual: record.embedding.len(),
                });
            }
        }

        let mut tx = self.pool.begin().await.map_err(store_err)?;
        let now = Utc::now();
        for record in batch {
            let metadata = serde_json::to_string(&record.metadata)
                .map_err(|e| RagError::StoreUnavailable(format!("metadata encoding: {}", e)))?;
            sqlx::query(
                "INSERT INTO vectors (id, content, embedding, metadata, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(id) DO UPDATE SET
                     content = excluded.content,
                     embedding = excluded.embedding,
                     metadata = excluded.metadata,
                     created_at = excluded.created_at",
            )
            .bind(&record.id)
            .bind(&record.content)
            .bind(embedding_to_blob(&record.embedding))
            .bind(metadata)
            .bind(now)
            .execute(&mut *tx)
            .await
            .map_err(store_err)?;
        }
        tx.commit().await.map_err(store_err)?;

        self.index.write().await.stale = true;
        tracing::debug!(count = batch.len(), "upserted vectors");
        Ok(batch.len())
    }

    /// Nearest neighbors by cosine similarity, descending, at most `k`,
    /// excluding entries at or below `similarity_floor`. An empty corpus is
    /// reported as `EmptyStore` so the caller can tell "no data" from "no
    /// match".
    pub async fn search(
        &self,
        query_embedding: &[f32],
        k: usize,
        similarity_floor: f32,
    ) -> Result<RetrievalResult> {
        if k == 0 {
            return Err(RagError::Configuration("k must be positive".into()));
        }
        if query_embedding.len() != self.dimension {
            return Err(RagError::DimensionMismatch {
                expected: self.dimension,
                actual: query_embedding.len(),
            });
        }
        let mut normalized = query_embedding.to_vec();
        l2_normalize(&mut normalized);
        let query = VectorPoint(normalized);

        let candidates = {
            let guard = self.index.read().await;
            match (&guard.map, guard.stale) {
                (Some(map), false) => Some(nearest(map, &query, k, similarity_floor)),
                _ => None,
            }
        };
        let candidates = match candidates {
            Some(candidates) => candidates,
            None => {
                let mut guard = self.index.write().await;
                if guard.stale || guard.map.is_none() {
                    guard.map = Some(self.build_index().await?);
                    guard.stale = false;
                }
                match &guard.map {
                    Some(map) => nearest(map, &query, k, similarity_floor),
                    None => {
                        return Err(RagError::StoreUnavailable(
                            "search index unavailable".into(),
                        ))
                    }
                }
            }
        };

        let mut hits = Vec::with_capacity(candidates.len());
        for candidate in candidates {
            match self.fetch(&candidate.id).await? {
                Some(vector) => hits.push(ScoredVector {
                    vector,
                    similarity: candidate.similarity,
                }),
                None => {
                    tracing::warn!(id = %candidate.id, "indexed vector missing from store");
                }
            }
        }
        Ok(RetrievalResult {
            hits,
            corpus_empty: false,
        })
    }

    /// Number of persisted vectors.
    pub async fn count(&self) -> Result<u64> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM vectors")
            .fetch_one(&self.pool)
            .await
            .map_err(store_err)?;
        let n: i64 = row.try_get("n").map_err(store_err)?;
        Ok(n as u64)
    }

    async fn fetch(&self, id: &str) -> Result<Option<StoredVector>> {
        let row = sqlx::query(
            "SELECT content, embedding, metadata, created_at FROM vectors WHERE id = ?1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(store_err)?;
        let Some(row) = row else {
            return Ok(None);
        };
        let content: String = row.try_get("content").map_err(store_err)?;
        let blob: Vec<u8> = row.try_get("embedding").map_err(store_err)?;
        let metadata_raw: String = row.try_get("metadata").map_err(store_err)?;
        let created_at: DateTime<Utc> = row.try_get("created_at").map_err(store_err)?;
        let metadata = serde_json::from_str(&metadata_raw)
            .map_err(|e| RagError::StoreUnavailable(format!("corrupt metadata for {}: {}", id, e)))?;
        Ok(Some(StoredVector {
            id: id.to_string(),
            content,
            embedding: blob_to_embedding(&blob)?,
            metadata,
            created_at,
        }))
    }

    async fn build_index(&self) -> Result<HnswMap<VectorPoint, IndexedId>> {
        let rows = sqlx::query("SELECT rowid, id, embedding FROM vectors ORDER BY rowid")
            .fetch_all(&self.pool)
            .await
            .map_err(store_err)?;
        if rows.is_empty() {
            return Err(RagError::EmptyStore);
        }

        let mut points = Vec::with_capacity(rows.len());
        let mut values = Vec::with_capacity(rows.len());
        for row in rows {
            let seq: i64 = row.try_get("rowid").map_err(store_err)?;
            let id: String = row.try_get("id").map_err(store_err)?;
            let blob: Vec<u8> = row.try_get("embedding").map_err(store_err)?;
            let mut embedding = blob_to_embedding(&blob)?;
            if embedding.len() != self.dimension {
                return Err(RagError::DimensionMismatch {
                    expected: self.dimension,
                    actual: embedding.len(),
                });
            }
            l2_normalize(&mut embedding);
            points.push(VectorPoint(embedding));
            values.push(IndexedId { id, seq });
        }
        let count = points.len();
        let map = Builder::default().seed(INDEX_SEED).build(points, values);
        tracing::debug!(vectors = count, "rebuilt search index");
        Ok(map)
    }
}

fn nearest(
    map: &HnswMap<VectorPoint, IndexedId>,
    query: &VectorPoint,
    k: usize,
    similarity_floor: f32,
) -> Vec<Candidate> {
    let mut search = Search::default();
    let mut candidates: Vec<Candidate> = map
        .search(query, &mut search)
        .map(|item| Candidate {
            id: item.value.id.clone(),
            seq: item.value.seq,
            similarity: similarity_from_distance(item.distance),
        })
        .filter(|c| c.similarity > similarity_floor)
        .collect();
    candidates.sort_by(|a, b| {
        b.similarity
            .partial_cmp(&a.similarity)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.seq.cmp(&b.seq))
    });
    candidates.truncate(k);
    candidates
}

/// Cosine similarity recovered from euclidean distance between unit
/// vectors, clamped into [0, 1].
fn similarity_from_distance(distance: f32) -> f32 {
    (1.0 - (distance * distance) / 2.0).clamp(-1.0, 1.0)
}

fn embedding_to_blob(embedding: &[f32]) -> Vec<u8> {
    let mut blob = Vec::with_capacity(embedding.len() * 4);
    for value in embedding {
        blob.extend_from_slice(&value.to_le_bytes());
    }
    blob
}

fn blob_to_embedding(blob: &[u8]) -> Result<Vec<f32>> {
    if blob.len() % 4 != 0 {
        return Err(RagError::StoreUnavailable(format!(
            "corrupt embedding blob of {} bytes",
            blob.len()
        )));
    }
    Ok(blob
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect())
}

fn store_err(e: sqlx::Error) -> RagError {
    RagError::StoreUnavailable(e.to_string())
}
