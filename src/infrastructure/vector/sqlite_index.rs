//! Vector index backed by SQLite.
//!
//! Uses the sqlite-vec (vec0) extension for SIMD-accelerated cosine
//! distance when the extension is present, and falls back to a pure-Rust
//! scan otherwise. Either way the caller sees the same contract: cosine
//! scores in [0, 1], descending, id tie-break, conjunctive filters.

use std::path::Path;

use async_trait::async_trait;
use serde_json::Value;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};

use crate::domain::error::{ForestError, ForestResult};
use crate::domain::ports::{VectorHit, VectorIndex, VectorQueryOptions, VectorStats};

use super::{bytes_to_embedding, cosine_similarity, embedding_to_bytes, metadata_matches};

/// Vector implementation type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VectorImplementation {
    /// Native sqlite-vec extension with SIMD acceleration
    NativeVec0,
    /// Pure Rust fallback implementation
    PureRust,
}

pub struct SqliteVectorIndex {
    pool: SqlitePool,
    dimension: usize,
    implementation: VectorImplementation,
}

impl SqliteVectorIndex {
    /// Open (or create) the index database under the data root.
    pub async fn open(path: impl AsRef<Path>, dimension: usize) -> ForestResult<Self> {
        if let Some(parent) = path.as_ref().parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| ForestError::VectorUnavailable(e.to_string()))?;
        }
        let options = SqliteConnectOptions::new()
            .filename(path.as_ref())
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await
            .map_err(|e| ForestError::VectorUnavailable(e.to_string()))?;
        Self::new(pool, dimension).await
    }

    /// Build over an existing pool (tests use `sqlite::memory:`).
    pub async fn new(pool: SqlitePool, dimension: usize) -> ForestResult<Self> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS vectors (
                id TEXT PRIMARY KEY,
                embedding BLOB NOT NULL,
                metadata TEXT NOT NULL
            )
            "#,
        )
        .execute(&pool)
        .await
        .map_err(|e| ForestError::VectorUnavailable(e.to_string()))?;

        let implementation = Self::initialize_vec_extension(&pool).await;
        Ok(Self {
            pool,
            dimension,
            implementation,
        })
    }

    /// Probe the vec0 extension with graceful fallback.
    async fn initialize_vec_extension(pool: &SqlitePool) -> VectorImplementation {
        match sqlx::query("SELECT vec_version() as version")
            .fetch_optional(pool)
            .await
        {
            Ok(Some(row)) => {
                let version: String = row
                    .try_get("version")
                    .unwrap_or_else(|_| "unknown".to_string());
                tracing::info!(
                    "sqlite-vec extension active (version: {}) - using SIMD-accelerated vector operations",
                    version
                );
                VectorImplementation::NativeVec0
            }
            Ok(None) | Err(_) => {
                tracing::info!("sqlite-vec extension not available, using pure-Rust scan");
                VectorImplementation::PureRust
            }
        }
    }

    pub fn implementation(&self) -> VectorImplementation {
        self.implementation
    }

    async fn candidates_simd(&self, vector: &[f32]) -> ForestResult<Vec<(String, f32, Value)>> {
        let query_bytes = embedding_to_bytes(vector);
        let rows = sqlx::query(
            r#"
            SELECT id, metadata, vec_distance_cosine(embedding, ?) AS distance
            FROM vectors
            ORDER BY distance ASC
            "#,
        )
        .bind(&query_bytes)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| ForestError::VectorUnavailable(e.to_string()))?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let id: String = row.get("id");
            let metadata_str: String = row.get("metadata");
            let distance: f64 = row.get("distance");
            let metadata =
                serde_json::from_str(&metadata_str).unwrap_or_else(|_| serde_json::json!({}));
            #[allow(clippy::cast_possible_truncation)]
            let score = (1.0 - distance as f32).clamp(0.0, 1.0);
            out.push((id, score, metadata));
        }
        Ok(out)
    }

    async fn candidates_fallback(&self, vector: &[f32]) -> ForestResult<Vec<(String, f32, Value)>> {
        let rows = sqlx::query("SELECT id, embedding, metadata FROM vectors")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| ForestError::VectorUnavailable(e.to_string()))?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let id: String = row.get("id");
            let embedding_bytes: Vec<u8> = row.get("embedding");
            let metadata_str: String = row.get("metadata");
            let Some(stored) = bytes_to_embedding(&embedding_bytes) else {
                tracing::warn!(id, "skipping vector with corrupt embedding bytes");
                continue;
            };
            let metadata =
                serde_json::from_str(&metadata_str).unwrap_or_else(|_| serde_json::json!({}));
            out.push((id, cosine_similarity(vector, &stored), metadata));
        }
        Ok(out)
    }

    fn rank(
        mut candidates: Vec<(String, f32, Value)>,
        opts: &VectorQueryOptions,
    ) -> Vec<VectorHit> {
        candidates.retain(|(_, score, metadata)| {
            opts.threshold.is_none_or(|t| *score >= t) && metadata_matches(metadata, &opts.filter)
        });
        candidates.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });
        candidates.truncate(opts.k.max(1));
        candidates
            .into_iter()
            .map(|(id, score, metadata)| VectorHit {
                id,
                score,
                metadata,
            })
            .collect()
    }
}

#[async_trait]
impl VectorIndex for SqliteVectorIndex {
    async fn upsert(&self, id: &str, vector: &[f32], metadata: Value) -> ForestResult<()> {
        let embedding_bytes = embedding_to_bytes(vector);
        let metadata_str = metadata.to_string();
        sqlx::query(
            r#"
            INSERT INTO vectors (id, embedding, metadata) VALUES (?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET embedding = excluded.embedding,
                                          metadata = excluded.metadata
            "#,
        )
        .bind(id)
        .bind(&embedding_bytes)
        .bind(&metadata_str)
        .execute(&self.pool)
        .await
        .map_err(|e| ForestError::VectorUnavailable(e.to_string()))?;
        Ok(())
    }

    async fn query(
        &self,
        vector: &[f32],
        opts: VectorQueryOptions,
    ) -> ForestResult<Vec<VectorHit>> {
        let candidates = match self.implementation {
            VectorImplementation::NativeVec0 => self.candidates_simd(vector).await?,
            VectorImplementation::PureRust => self.candidates_fallback(vector).await?,
        };
        Ok(Self::rank(candidates, &opts))
    }

    async fn delete(&self, id: &str) -> ForestResult<()> {
        sqlx::query("DELETE FROM vectors WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| ForestError::VectorUnavailable(e.to_string()))?;
        Ok(())
    }

    async fn ping(&self) -> ForestResult<()> {
        sqlx::query("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .map(|_| ())
            .map_err(|e| ForestError::VectorUnavailable(e.to_string()))
    }

    async fn stats(&self) -> ForestResult<VectorStats> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM vectors")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| ForestError::VectorUnavailable(e.to_string()))?;
        Ok(VectorStats {
            #[allow(clippy::cast_sign_loss)]
            count: count.max(0) as usize,
            dimension: self.dimension,
            backend: match self.implementation {
                VectorImplementation::NativeVec0 => "sqlitevec".to_string(),
                VectorImplementation::PureRust => "sqlitevec(pure-rust)".to_string(),
            },
        })
    }
}
