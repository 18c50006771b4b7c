//! Task selector: scores eligible frontier tasks against the learner's
//! current energy, time window and focus, with an optional semantic boost
//! from the vector index.
//!
//! Selection never mutates the tree; identical inputs over an unchanged
//! tree return the same task.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use crate::domain::models::hta::{FrontierNode, HtaTree, TaskStatus};
use crate::domain::models::selection::SelectionCriteria;
use crate::domain::ports::{EmbeddingService, VectorIndex, VectorQueryOptions};

/// Semantic priority bucket derived from the numeric ordering weight
/// (lower weight = earlier, more important work).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PriorityBucket {
    High,
    Medium,
    Low,
}

impl PriorityBucket {
    pub fn of(priority: u32) -> Self {
        match priority {
            0..=299 => Self::High,
            300..=599 => Self::Medium,
            _ => Self::Low,
        }
    }

    const fn boost(self) -> i64 {
        match self {
            Self::High => 2,
            Self::Medium => 1,
            Self::Low => 0,
        }
    }
}

/// Metadata score for one task. Pure; the semantic boost is added on top.
pub fn score_task(task: &FrontierNode, criteria: &SelectionCriteria) -> i64 {
    let energy = i64::from(criteria.energy_level.clamp(1, 5));
    let difficulty = i64::from(task.difficulty);
    let energy_match = (5 - (difficulty - energy).abs()).max(0) * 2;

    let time_match = if u64::from(criteria.time_available) >= u64::from(task.duration) {
        3
    } else {
        1
    };

    let focus_match = match &criteria.focus_area {
        Some(area) if area == &task.branch => 3,
        _ => 0,
    };

    let priority_boost = PriorityBucket::of(task.priority).boost();

    let status_adjust = match task.status {
        TaskStatus::InProgress => 2,
        _ => 0,
    };

    energy_match + time_match + focus_match + priority_boost + status_adjust
}

/// Round a [0, 1] similarity into the 0-5 semantic boost.
pub fn semantic_boost(similarity: f32) -> i64 {
    #[allow(clippy::cast_possible_truncation)]
    {
        (f64::from(similarity.clamp(0.0, 1.0)) * 5.0).round() as i64
    }
}

pub struct TaskSelector {
    vectors: Arc<dyn VectorIndex>,
    embedder: Arc<dyn EmbeddingService>,
}

impl TaskSelector {
    pub fn new(vectors: Arc<dyn VectorIndex>, embedder: Arc<dyn EmbeddingService>) -> Self {
        Self { vectors, embedder }
    }

    /// Similarity per task id for a semantic query, or empty when the
    /// vector index is unhealthy (the selector then degrades to metadata
    /// scoring only).
    async fn semantic_scores(
        &self,
        project_id: &str,
        query: &str,
        frontier_size: usize,
    ) -> HashMap<String, f32> {
        if self.vectors.ping().await.is_err() {
            tracing::debug!("vector index down, selector skipping semantic boost");
            return HashMap::new();
        }
        let Ok(vector) = self.embedder.embed(query).await else {
            return HashMap::new();
        };
        let mut filter = BTreeMap::new();
        filter.insert("project".to_string(), project_id.to_string());
        filter.insert("type".to_string(), "task".to_string());
        match self
            .vectors
            .query(
                &vector,
                VectorQueryOptions {
                    k: frontier_size.max(1),
                    threshold: None,
                    filter,
                },
            )
            .await
        {
            Ok(hits) => hits
                .into_iter()
                .filter_map(|hit| {
                    hit.metadata
                        .get("task_id")
                        .and_then(serde_json::Value::as_str)
                        .map(|id| (id.to_string(), hit.score))
                })
                .collect(),
            Err(e) => {
                tracing::debug!(error = %e, "semantic query failed, degrading");
                HashMap::new()
            }
        }
    }

    /// Rank the eligible frontier. Highest score first; ties break on the
    /// semantically higher-priority task (lower ordering weight), then on
    /// the lexicographically lower id.
    pub async fn rank(
        &self,
        project_id: &str,
        tree: &HtaTree,
        criteria: &SelectionCriteria,
    ) -> Vec<(FrontierNode, i64)> {
        let semantic = match &criteria.semantic_query {
            Some(query) if !query.trim().is_empty() => {
                self.semantic_scores(project_id, query, tree.frontier_nodes.len())
                    .await
            }
            _ => HashMap::new(),
        };

        let mut scored: Vec<(FrontierNode, i64)> = tree
            .eligible_frontier()
            .into_iter()
            .map(|task| {
                let mut score = score_task(task, criteria);
                if let Some(similarity) = semantic.get(&task.id) {
                    score += semantic_boost(*similarity);
                }
                (task.clone(), score)
            })
            .collect();

        scored.sort_by(|a, b| {
            b.1.cmp(&a.1)
                .then_with(|| a.0.priority.cmp(&b.0.priority))
                .then_with(|| a.0.id.cmp(&b.0.id))
        });
        scored
    }

    /// The single best task, or `None` when nothing is eligible.
    pub async fn select(
        &self,
        project_id: &str,
        tree: &HtaTree,
        criteria: &SelectionCriteria,
    ) -> Option<FrontierNode> {
        self.rank(project_id, tree, criteria)
            .await
            .into_iter()
            .next()
            .map(|(task, _)| task)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::hta::{
        BranchFocus, Complexity, GenerationMethod, StrategicBranch,
    };
    use crate::infrastructure::vector::{HashEmbeddingService, MemoryVectorIndex};

    fn branch(name: &str, priority: u32) -> StrategicBranch {
        StrategicBranch {
            name: name.to_string(),
            description: String::new(),
            priority,
            domain_focus: String::new(),
            rationale: String::new(),
            expected_outcomes: Vec::new(),
            context_adaptations: Vec::new(),
            exploration_opportunities: Vec::new(),
            focus: BranchFocus::Balanced,
        }
    }

    fn node(id: &str, branch: &str, difficulty: u8, duration: u32, priority: u32) -> FrontierNode {
        FrontierNode {
            id: id.to_string(),
            title: format!("Task {id}"),
            description: String::new(),
            branch: branch.to_string(),
            difficulty,
            duration,
            priority,
            prerequisites: Vec::new(),
            status: TaskStatus::Pending,
            generated: true,
            learning_outcome: String::new(),
            domain_focus: String::new(),
        }
    }

    fn tree(nodes: Vec<FrontierNode>) -> HtaTree {
        let mut tree = HtaTree::new(
            "goal".to_string(),
            String::new(),
            Complexity::default(),
            GenerationMethod::Fallback,
        );
        tree.strategic_branches = vec![branch("Lighting", 1), branch("Posing", 2)];
        tree.frontier_nodes = nodes;
        tree
    }

    fn selector() -> TaskSelector {
        TaskSelector::new(
            Arc::new(MemoryVectorIndex::new(384)),
            Arc::new(HashEmbeddingService::default()),
        )
    }

    #[test]
    fn test_score_components() {
        let criteria = SelectionCriteria::new(3, 30);
        // Perfect energy match, fits the window, high bucket.
        let task = node("a", "Lighting", 3, 25, 100);
        assert_eq!(score_task(&task, &criteria), 10 + 3 + 0 + 2 + 0);

        // Too long for the window.
        let long = node("b", "Lighting", 3, 60, 100);
        assert_eq!(score_task(&long, &criteria), 10 + 1 + 0 + 2 + 0);

        // Focus area match.
        let focused = SelectionCriteria {
            focus_area: Some("Lighting".to_string()),
            ..SelectionCriteria::new(3, 30)
        };
        assert_eq!(score_task(&task, &focused), 10 + 3 + 3 + 2 + 0);

        // In-progress tasks get a nudge.
        let mut started = task.clone();
        started.status = TaskStatus::InProgress;
        assert_eq!(score_task(&started, &criteria), 10 + 3 + 0 + 2 + 2);
    }

    #[test]
    fn test_energy_mismatch_decays() {
        let criteria = SelectionCriteria::new(1, 120);
        let easy = node("a", "Lighting", 1, 30, 100);
        let hard = node("b", "Lighting", 5, 30, 100);
        assert!(score_task(&easy, &criteria) > score_task(&hard, &criteria));
    }

    #[test]
    fn test_priority_buckets() {
        assert_eq!(PriorityBucket::of(100), PriorityBucket::High);
        assert_eq!(PriorityBucket::of(299), PriorityBucket::High);
        assert_eq!(PriorityBucket::of(450), PriorityBucket::Medium);
        assert_eq!(PriorityBucket::of(900), PriorityBucket::Low);
    }

    #[test]
    fn test_semantic_boost_rounding() {
        assert_eq!(semantic_boost(0.0), 0);
        assert_eq!(semantic_boost(0.49), 2);
        assert_eq!(semantic_boost(0.5), 3);
        assert_eq!(semantic_boost(1.0), 5);
        assert_eq!(semantic_boost(7.0), 5);
    }

    #[tokio::test]
    async fn test_select_excludes_blocked_prerequisites() {
        let mut chained = node("b2", "Lighting", 3, 25, 110);
        chained.prerequisites.push("b1".to_string());
        let tree = tree(vec![node("b1", "Lighting", 3, 25, 100), chained]);

        let picked = selector()
            .select("p1", &tree, &SelectionCriteria::new(3, 30))
            .await
            .unwrap();
        assert_eq!(picked.id, "b1");
    }

    #[tokio::test]
    async fn test_select_returns_none_when_frontier_done() {
        let mut t = tree(vec![node("a", "Lighting", 3, 25, 100)]);
        t.retire("a");
        assert!(selector()
            .select("p1", &t, &SelectionCriteria::new(3, 30))
            .await
            .is_none());
    }

    #[tokio::test]
    async fn test_low_energy_small_window_never_panics() {
        let t = tree(vec![
            node("a", "Lighting", 4, 60, 100),
            node("b", "Lighting", 5, 60, 110),
            node("c", "Posing", 3, 60, 200),
        ]);
        let criteria = SelectionCriteria::new(1, 10);
        let picked = selector().select("p1", &t, &criteria).await;
        // Everything is long and hard; the least-bad task is the lowest
        // difficulty one.
        assert_eq!(picked.unwrap().id, "c");
    }

    #[tokio::test]
    async fn test_selection_is_stable_across_invocations() {
        let t = tree(vec![
            node("a", "Lighting", 3, 25, 100),
            node("b", "Posing", 3, 25, 200),
        ]);
        let criteria = SelectionCriteria::new(3, 30);
        let s = selector();
        let first = s.select("p1", &t, &criteria).await.unwrap();
        let second = s.select("p1", &t, &criteria).await.unwrap();
        assert_eq!(first.id, second.id);
    }

    #[tokio::test]
    async fn test_tie_breaks_on_priority_then_id() {
        // Same branch, same difficulty/duration: identical scores within
        // one bucket, so the lower ordering weight wins; equal weights fall
        // back to the id.
        let t = tree(vec![
            node("z", "Lighting", 3, 25, 100),
            node("a", "Lighting", 3, 25, 100),
            node("m", "Lighting", 3, 25, 110),
        ]);
        let ranked = selector()
            .rank("p1", &t, &SelectionCriteria::new(3, 30))
            .await;
        let ids: Vec<&str> = ranked.iter().map(|(n, _)| n.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "z", "m"]);
    }

    #[tokio::test]
    async fn test_semantic_query_boosts_matching_task() {
        let vectors = Arc::new(MemoryVectorIndex::new(384));
        let embedder = Arc::new(HashEmbeddingService::default());

        // Mirror two tasks the way the store does.
        use crate::domain::ports::EmbeddingService as _;
        let lighting = embedder.embed("studio lighting practice").await.unwrap();
        vectors
            .upsert(
                "p1:task:a",
                &lighting,
                serde_json::json!({"project": "p1", "type": "task", "task_id": "a"}),
            )
            .await
            .unwrap();
        let posing = embedder.embed("posing direction warmup").await.unwrap();
        vectors
            .upsert(
                "p1:task:b",
                &posing,
                serde_json::json!({"project": "p1", "type": "task", "task_id": "b"}),
            )
            .await
            .unwrap();

        let t = tree(vec![
            node("a", "Lighting", 3, 25, 100),
            node("b", "Posing", 3, 25, 100),
        ]);
        let criteria = SelectionCriteria {
            semantic_query: Some("studio lighting practice".to_string()),
            ..SelectionCriteria::new(3, 30)
        };
        let picked = TaskSelector::new(vectors, embedder)
            .select("p1", &t, &criteria)
            .await
            .unwrap();
        assert_eq!(picked.id, "a");
    }
}
