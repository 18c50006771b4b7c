//! Ports: async contracts between the services and infrastructure.
//!
//! Services depend only on these traits; concrete adapters are wired at
//! construction time in `main`.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde_json::Value;

use crate::domain::error::ForestResult;

/// Namespace that maps to the `global/` directory instead of a project.
pub const GLOBAL_NAMESPACE: &str = "global";

/// A buffered write transaction against the KV store.
///
/// Writes accumulate in memory and become visible together on `commit`;
/// dropping the transaction without committing discards them.
#[derive(Debug, Default)]
pub struct KvTransaction {
    pub(crate) writes: Vec<KvWrite>,
}

#[derive(Debug, Clone)]
pub(crate) struct KvWrite {
    pub project: String,
    pub path: Option<String>,
    pub file: String,
    pub doc: Value,
}

impl KvTransaction {
    /// Queue a save. Nothing is persisted until `KvStore::commit`.
    pub fn save(&mut self, project: &str, path: Option<&str>, file: &str, doc: Value) {
        self.writes.push(KvWrite {
            project: project.to_string(),
            path: path.map(ToString::to_string),
            file: file.to_string(),
            doc,
        });
    }

    pub fn is_empty(&self) -> bool {
        self.writes.is_empty()
    }
}

/// Read-through cache counters, surfaced by the diagnostic tools.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct CacheStats {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
}

/// Namespaced, atomic, cached JSON document store.
///
/// Keys are `(project, path?, file)`. A failed save leaves the prior value
/// intact; a failed commit behaves as rollback.
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Load a document. Returns an owned copy callers may mutate freely.
    async fn load(&self, project: &str, path: Option<&str>, file: &str)
        -> ForestResult<Option<Value>>;

    /// Atomically replace a document.
    async fn save(&self, project: &str, path: Option<&str>, file: &str, doc: &Value)
        -> ForestResult<()>;

    /// Remove everything stored under a project.
    async fn delete_project(&self, project: &str) -> ForestResult<()>;

    /// Start a buffered transaction.
    fn begin_tx(&self) -> KvTransaction {
        KvTransaction::default()
    }

    /// Apply all writes in `tx`; on failure no write from `tx` survives.
    async fn commit(&self, tx: KvTransaction) -> ForestResult<()>;

    /// Discard a transaction without applying anything.
    fn rollback(&self, tx: KvTransaction) {
        drop(tx);
    }

    /// Drop every cached document.
    async fn clear_cache(&self);

    /// Current cache counters.
    async fn cache_stats(&self) -> CacheStats;
}

/// Query options for similarity search.
#[derive(Debug, Clone, Default)]
pub struct VectorQueryOptions {
    /// Maximum results.
    pub k: usize,
    /// Exclude results scoring below this similarity.
    pub threshold: Option<f32>,
    /// Exact-match conjunction over string metadata fields.
    pub filter: BTreeMap<String, String>,
}

/// One similarity-search result. `score` is cosine similarity in [0, 1].
#[derive(Debug, Clone, PartialEq)]
pub struct VectorHit {
    pub id: String,
    pub score: f32,
    pub metadata: Value,
}

/// Index health numbers.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct VectorStats {
    pub count: usize,
    pub dimension: usize,
    pub backend: String,
}

/// Upsert/query/delete of `(id, vector, metadata)` records.
///
/// After a successful upsert the next query selecting that id observes the
/// new metadata; deletes are immediate from the caller's perspective.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    async fn upsert(&self, id: &str, vector: &[f32], metadata: Value) -> ForestResult<()>;

    /// Results sorted by descending score, ties broken by id.
    async fn query(&self, vector: &[f32], opts: VectorQueryOptions)
        -> ForestResult<Vec<VectorHit>>;

    async fn delete(&self, id: &str) -> ForestResult<()>;

    async fn ping(&self) -> ForestResult<()>;

    async fn stats(&self) -> ForestResult<VectorStats>;
}

/// Maps text to a fixed-dimension unit vector; deterministic per input.
#[async_trait]
pub trait EmbeddingService: Send + Sync {
    fn dimension(&self) -> usize;

    async fn embed(&self, text: &str) -> ForestResult<Vec<f32>>;
}
