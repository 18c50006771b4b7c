//! HTA store: materializes, persists and mirrors the canonical tree.
//!
//! Wraps the engine with storage concerns: idempotent builds, invariant
//! enforcement before every save, vector mirroring kept in lock-step with
//! the JSON metadata files, and the archive path for goal rewrites.
//! Mutating operations on one `(project, path)` tree are serialized
//! through a per-tree lock; readers take the last committed state.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use serde_json::{json, Value};
use tokio::sync::Mutex;

use crate::domain::error::{ForestError, ForestResult};
use crate::domain::models::hta::{ArchivedTree, GenerationMethod, HtaTree};
use crate::domain::models::learning::{LearningEvent, LearningHistory};
use crate::domain::models::onboarding::AggregateContext;
use crate::domain::ports::{EmbeddingService, KvStore, VectorIndex};
use crate::services::hta_engine::HtaEngine;

/// Document names under `(project, path)`.
pub const HTA_FILE: &str = "hta";
pub const HISTORY_FILE: &str = "learning_history";
/// Project-level metadata mirrors for the vector index.
pub const GOAL_METADATA_FILE: &str = "goal_metadata";
pub const BRANCH_METADATA_FILE: &str = "branch_metadata";
pub const TASK_METADATA_FILE: &str = "task_metadata";

pub fn goal_vector_id(project: &str) -> String {
    format!("{project}:goal")
}

pub fn branch_vector_id(project: &str, branch: &str) -> String {
    format!("{project}:branch:{branch}")
}

pub fn task_vector_id(project: &str, task_id: &str) -> String {
    format!("{project}:task:{task_id}")
}

pub fn learning_vector_id(project: &str, event_id: &str) -> String {
    format!("{project}:learning:{event_id}")
}

pub fn breakthrough_vector_id(project: &str, event_id: &str) -> String {
    format!("{project}:breakthrough:{event_id}")
}

/// Outcome of a build call.
#[derive(Debug, Clone, PartialEq)]
pub struct BuildResult {
    pub tree: HtaTree,
    /// False when an existing tree with a non-empty frontier was returned
    /// unchanged.
    pub created: bool,
    /// True when vector mirroring was skipped because the index was down.
    pub degraded: bool,
}

pub struct HtaStore {
    kv: Arc<dyn KvStore>,
    vectors: Arc<dyn VectorIndex>,
    embedder: Arc<dyn EmbeddingService>,
    engine: Arc<HtaEngine>,
    tree_locks: std::sync::Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl HtaStore {
    pub fn new(
        kv: Arc<dyn KvStore>,
        vectors: Arc<dyn VectorIndex>,
        embedder: Arc<dyn EmbeddingService>,
        engine: Arc<HtaEngine>,
    ) -> Self {
        Self {
            kv,
            vectors,
            embedder,
            engine,
            tree_locks: std::sync::Mutex::new(HashMap::new()),
        }
    }

    /// The logical mutation lock for one `(project, path)` tree.
    pub fn tree_lock(&self, project: &str, path: &str) -> Arc<Mutex<()>> {
        let key = format!("{project}/{path}");
        self.tree_locks
            .lock()
            .expect("tree lock registry poisoned")
            .entry(key)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    pub async fn load(&self, project: &str, path: &str) -> ForestResult<Option<HtaTree>> {
        let Some(doc) = self.kv.load(project, Some(path), HTA_FILE).await? else {
            return Ok(None);
        };
        serde_json::from_value(doc)
            .map(Some)
            .map_err(|e| ForestError::Storage(format!("hta document corrupt: {e}")))
    }

    /// Persist a tree after validating I1-I4 and id uniqueness.
    pub async fn save(&self, project: &str, path: &str, tree: &HtaTree) -> ForestResult<()> {
        tree.validate()?;
        let doc = serde_json::to_value(tree)
            .map_err(|e| ForestError::Storage(format!("serialize tree: {e}")))?;
        self.kv.save(project, Some(path), HTA_FILE, &doc).await
    }

    /// Build (or return) the tree for `(project, path)`.
    ///
    /// Idempotent: an existing tree with a non-empty frontier comes back
    /// unchanged. An existing tree with an empty frontier is recovered from
    /// its level-2 slice. Otherwise the engine generates a fresh document,
    /// which is persisted and mirrored.
    pub async fn build(
        &self,
        project: &str,
        path: &str,
        context: &AggregateContext,
    ) -> ForestResult<BuildResult> {
        let lock = self.tree_lock(project, path);
        let _guard = lock.lock().await;

        if let Some(mut tree) = self.load(project, path).await? {
            if !tree.frontier_nodes.is_empty() {
                return Ok(BuildResult {
                    tree,
                    created: false,
                    degraded: false,
                });
            }
            self.ensure_frontier_nodes(&mut tree);
            self.save(project, path, &tree).await?;
            let degraded = !self.mirror_tree(project, path, &tree).await;
            return Ok(BuildResult {
                tree,
                created: true,
                degraded,
            });
        }

        let tree = self.engine.build_tree(context).await?;
        tree.validate()?;

        // First build: the tree and its empty learning history land
        // together or not at all.
        let tree_doc = serde_json::to_value(&tree)
            .map_err(|e| ForestError::Storage(format!("serialize tree: {e}")))?;
        let mut tx = self.kv.begin_tx();
        tx.save(project, Some(path), HTA_FILE, tree_doc);
        if self.kv.load(project, Some(path), HISTORY_FILE).await?.is_none() {
            let history_doc = serde_json::to_value(LearningHistory::default())
                .map_err(|e| ForestError::Storage(e.to_string()))?;
            tx.save(project, Some(path), HISTORY_FILE, history_doc);
        }
        self.kv.commit(tx).await?;

        let degraded = !self.mirror_tree(project, path, &tree).await;
        Ok(BuildResult {
            tree,
            created: true,
            degraded,
        })
    }

    /// Summary of an existing tree without regeneration.
    pub fn existing_tree_response(tree: &HtaTree) -> Value {
        let mut summary = tree.summary();
        summary["existing"] = json!(true);
        summary
    }

    /// Re-synthesize the frontier from the persisted level-2 branches.
    pub fn ensure_frontier_nodes(&self, tree: &mut HtaTree) {
        if !tree.frontier_nodes.is_empty() || tree.strategic_branches.is_empty() {
            return;
        }
        tree.frontier_nodes = HtaEngine::materialize_frontier(
            &tree.goal,
            &tree.complexity,
            &tree.strategic_branches,
            false,
        );
        tree.generation_context.method = GenerationMethod::Recovery;
        tree.last_updated = Utc::now();
    }

    /// Top up a depleted frontier. Returns the refreshed tree when new
    /// tasks were added.
    pub async fn refill(
        &self,
        project: &str,
        path: &str,
        min_tasks: usize,
    ) -> ForestResult<Option<HtaTree>> {
        let lock = self.tree_lock(project, path);
        let _guard = lock.lock().await;

        let Some(mut tree) = self.load(project, path).await? else {
            return Ok(None);
        };
        let eligible = tree.eligible_frontier().len();
        if eligible >= min_tasks {
            return Ok(None);
        }

        if tree.frontier_nodes.is_empty() && !tree.strategic_branches.is_empty() {
            self.ensure_frontier_nodes(&mut tree);
        } else {
            let missing = min_tasks - eligible;
            let branches = tree.strategic_branches.len().max(1);
            let per_branch = missing.div_ceil(branches);
            let extra = HtaEngine::materialize_additional(&tree, per_branch);
            tree.frontier_nodes.extend(extra);
            tree.last_updated = Utc::now();
        }

        self.save(project, path, &tree).await?;
        self.mirror_tree(project, path, &tree).await;
        Ok(Some(tree))
    }

    /// Materialize missing level slices up to `target_depth`, optionally
    /// scoped to one branch. Returns the refreshed tree, or `None` when no
    /// tree exists yet.
    pub async fn expand_depth(
        &self,
        project: &str,
        path: &str,
        target_depth: u8,
        branch: Option<&str>,
    ) -> ForestResult<Option<HtaTree>> {
        let lock = self.tree_lock(project, path);
        let _guard = lock.lock().await;

        let Some(mut tree) = self.load(project, path).await? else {
            return Ok(None);
        };
        if target_depth <= tree.available_depth {
            return Ok(Some(tree));
        }
        self.engine.expand(&mut tree, target_depth, branch).await?;
        tree.last_updated = Utc::now();
        self.save(project, path, &tree).await?;
        Ok(Some(tree))
    }

    /// Archive the current tree and rebuild under the same key with a new
    /// goal. The superseded document is preserved in `archived_trees`.
    pub async fn archive_and_rebuild(
        &self,
        project: &str,
        path: &str,
        context: &AggregateContext,
    ) -> ForestResult<(HtaTree, usize)> {
        let lock = self.tree_lock(project, path);
        let _guard = lock.lock().await;

        let old = self.load(project, path).await?;
        let mut new_tree = self.engine.build_tree(context).await?;

        let archived_frontier = old.as_ref().map_or(0, |t| t.frontier_nodes.len());
        if let Some(old_tree) = old {
            let mut carried = std::mem::take(&mut new_tree.archived_trees);
            carried.extend(old_tree.archived_trees.clone());
            let mut stripped = old_tree;
            stripped.archived_trees = Vec::new();
            carried.push(ArchivedTree {
                archived_at: Utc::now(),
                reason: "goal_rewrite".to_string(),
                tree: Box::new(stripped),
            });
            new_tree.archived_trees = carried;
            self.unmirror(project).await;
        }

        self.save(project, path, &new_tree).await?;
        self.mirror_tree(project, path, &new_tree).await;
        Ok((new_tree, archived_frontier))
    }

    /// Mirror the goal, branches and frontier tasks into the vector index,
    /// keeping the metadata documents in lock-step. Returns false when the
    /// index was unavailable and the build proceeded without vectors.
    pub async fn mirror_tree(&self, project: &str, path: &str, tree: &HtaTree) -> bool {
        if let Err(e) = self.vectors.ping().await {
            tracing::warn!(error = %e, "vector index unavailable, skipping tree mirroring");
            return false;
        }

        let mut goal_meta = Value::Null;
        let mut branch_meta = serde_json::Map::new();
        let mut task_meta = serde_json::Map::new();

        let goal_id = goal_vector_id(project);
        if let Ok(vector) = self.embedder.embed(&tree.goal).await {
            let metadata = json!({
                "project": project, "type": "goal", "goal": tree.goal, "path": path,
            });
            if self
                .vectors
                .upsert(&goal_id, &vector, metadata.clone())
                .await
                .is_ok()
            {
                goal_meta = json!({"vector_id": goal_id, "metadata": metadata});
            }
        }

        for branch in &tree.strategic_branches {
            let id = branch_vector_id(project, &branch.name);
            let text = format!("{}: {}", branch.name, branch.description);
            let Ok(vector) = self.embedder.embed(&text).await else {
                continue;
            };
            let metadata = json!({
                "project": project, "type": "branch", "name": branch.name,
                "domain_focus": branch.domain_focus, "path": path,
            });
            if self.vectors.upsert(&id, &vector, metadata.clone()).await.is_ok() {
                branch_meta.insert(
                    branch.name.clone(),
                    json!({"vector_id": id, "metadata": metadata}),
                );
            }
        }

        for node in &tree.frontier_nodes {
            let id = task_vector_id(project, &node.id);
            let text = format!("{}: {}", node.title, node.description);
            let Ok(vector) = self.embedder.embed(&text).await else {
                continue;
            };
            let metadata = json!({
                "project": project, "type": "task", "task_id": node.id,
                "title": node.title, "branch": node.branch, "path": path,
            });
            if self.vectors.upsert(&id, &vector, metadata.clone()).await.is_ok() {
                task_meta.insert(
                    node.id.clone(),
                    json!({"vector_id": id, "metadata": metadata}),
                );
            }
        }

        // Metadata documents record exactly the vectors that exist.
        let results = futures::future::join3(
            self.kv.save(
                project,
                None,
                GOAL_METADATA_FILE,
                &json!({"goal": goal_meta, "updated_at": Utc::now()}),
            ),
            self.kv.save(
                project,
                None,
                BRANCH_METADATA_FILE,
                &json!({"branches": branch_meta, "updated_at": Utc::now()}),
            ),
            self.kv.save(
                project,
                None,
                TASK_METADATA_FILE,
                &json!({"tasks": task_meta, "updated_at": Utc::now()}),
            ),
        )
        .await;
        if let Err(e) = results.0.and(results.1).and(results.2) {
            tracing::warn!(error = %e, "failed to persist vector metadata mirror");
        }
        true
    }

    /// Delete every vector recorded in the project's metadata mirrors.
    pub async fn unmirror(&self, project: &str) {
        let mut ids = Vec::new();
        if let Ok(Some(doc)) = self.kv.load(project, None, GOAL_METADATA_FILE).await {
            if let Some(id) = doc.pointer("/goal/vector_id").and_then(Value::as_str) {
                ids.push(id.to_string());
            }
        }
        for file in [BRANCH_METADATA_FILE, TASK_METADATA_FILE] {
            if let Ok(Some(doc)) = self.kv.load(project, None, file).await {
                let map = doc
                    .get("branches")
                    .or_else(|| doc.get("tasks"))
                    .and_then(Value::as_object);
                if let Some(map) = map {
                    for entry in map.values() {
                        if let Some(id) = entry.get("vector_id").and_then(Value::as_str) {
                            ids.push(id.to_string());
                        }
                    }
                }
            }
        }
        for id in ids {
            if let Err(e) = self.vectors.delete(&id).await {
                tracing::debug!(id, error = %e, "vector delete during unmirror failed");
            }
        }
    }

    pub async fn load_history(&self, project: &str, path: &str) -> ForestResult<LearningHistory> {
        match self.kv.load(project, Some(path), HISTORY_FILE).await? {
            Some(doc) => serde_json::from_value(doc)
                .map_err(|e| ForestError::Storage(format!("learning history corrupt: {e}"))),
            None => Ok(LearningHistory::default()),
        }
    }

    /// Append to the project's append-only learning history.
    pub async fn append_event(
        &self,
        project: &str,
        path: &str,
        event: LearningEvent,
    ) -> ForestResult<()> {
        let mut history = self.load_history(project, path).await?;
        history.append(event);
        let doc = serde_json::to_value(&history)
            .map_err(|e| ForestError::Storage(format!("serialize history: {e}")))?;
        self.kv.save(project, Some(path), HISTORY_FILE, &doc).await
    }

    pub fn vectors(&self) -> &Arc<dyn VectorIndex> {
        &self.vectors
    }

    pub fn embedder(&self) -> &Arc<dyn EmbeddingService> {
        &self.embedder
    }

    pub fn engine(&self) -> &Arc<HtaEngine> {
        &self.engine
    }
}
