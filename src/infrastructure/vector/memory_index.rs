//! In-process vector index.
//!
//! Backs the `memory` provider and the test suites. Semantics match the
//! SQLite index: cosine scores in [0, 1], descending order, id tie-break,
//! conjunctive exact-match metadata filters.

use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::RwLock;

use crate::domain::error::ForestResult;
use crate::domain::ports::{VectorHit, VectorIndex, VectorQueryOptions, VectorStats};

use super::{cosine_similarity, metadata_matches};

#[derive(Default)]
pub struct MemoryVectorIndex {
    records: RwLock<HashMap<String, (Vec<f32>, Value)>>,
    dimension: usize,
}

impl MemoryVectorIndex {
    pub fn new(dimension: usize) -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
            dimension,
        }
    }
}

#[async_trait]
impl VectorIndex for MemoryVectorIndex {
    async fn upsert(&self, id: &str, vector: &[f32], metadata: Value) -> ForestResult<()> {
        self.records
            .write()
            .await
            .insert(id.to_string(), (vector.to_vec(), metadata));
        Ok(())
    }

    async fn query(
        &self,
        vector: &[f32],
        opts: VectorQueryOptions,
    ) -> ForestResult<Vec<VectorHit>> {
        let records = self.records.read().await;
        let mut hits: Vec<VectorHit> = records
            .iter()
            .filter(|(_, (_, metadata))| metadata_matches(metadata, &opts.filter))
            .map(|(id, (stored, metadata))| VectorHit {
                id: id.clone(),
                score: cosine_similarity(vector, stored),
                metadata: metadata.clone(),
            })
            .filter(|hit| opts.threshold.is_none_or(|t| hit.score >= t))
            .collect();

        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.id.cmp(&b.id))
        });
        hits.truncate(opts.k.max(1));
        Ok(hits)
    }

    async fn delete(&self, id: &str) -> ForestResult<()> {
        self.records.write().await.remove(id);
        Ok(())
    }

    async fn ping(&self) -> ForestResult<()> {
        Ok(())
    }

    async fn stats(&self) -> ForestResult<VectorStats> {
        Ok(VectorStats {
            count: self.records.read().await.len(),
            dimension: self.dimension,
            backend: "memory".to_string(),
        })
    }
}
