//! Pipeline presenter: an ordered window of upcoming tasks with a branch
//! mix, so the learner is not handed five near-identical blocks.
//!
//! Presentation never mutates task status; the window is recomputed from
//! the last committed tree on every call.

use std::collections::HashSet;
use std::sync::Arc;

use crate::domain::models::evolution::Evolution;
use crate::domain::models::hta::{FrontierNode, HtaTree};
use crate::domain::models::selection::SelectionCriteria;
use crate::domain::error::ForestResult;
use crate::services::evolution::StrategyEvolver;
use crate::services::task_selector::TaskSelector;

/// Default window size.
pub const DEFAULT_WINDOW: usize = 5;

pub struct PipelinePresenter {
    selector: Arc<TaskSelector>,
    evolver: Arc<StrategyEvolver>,
}

impl PipelinePresenter {
    pub fn new(selector: Arc<TaskSelector>, evolver: Arc<StrategyEvolver>) -> Self {
        Self { selector, evolver }
    }

    /// Up to `window` tasks: the top pick first, then branch-coverage
    /// fills, then the next-highest scores overall.
    pub async fn next_pipeline(
        &self,
        project_id: &str,
        tree: &HtaTree,
        criteria: &SelectionCriteria,
        window: usize,
    ) -> Vec<FrontierNode> {
        let ranked = self.selector.rank(project_id, tree, criteria).await;
        if ranked.is_empty() {
            return Vec::new();
        }

        let window = window.max(1);
        let mut picked: Vec<FrontierNode> = Vec::with_capacity(window);
        let mut covered_branches: HashSet<String> = HashSet::new();
        let mut used: HashSet<String> = HashSet::new();

        // Top candidate always leads the window.
        let (top, _) = &ranked[0];
        covered_branches.insert(top.branch.clone());
        used.insert(top.id.clone());
        picked.push(top.clone());

        // Prefer branches not yet represented.
        for (task, _) in ranked.iter().skip(1) {
            if picked.len() >= window {
                break;
            }
            if !covered_branches.contains(&task.branch) {
                covered_branches.insert(task.branch.clone());
                used.insert(task.id.clone());
                picked.push(task.clone());
            }
        }

        // Then fill with the next-highest scores overall.
        for (task, _) in ranked.iter().skip(1) {
            if picked.len() >= window {
                break;
            }
            if used.insert(task.id.clone()) {
                picked.push(task.clone());
            }
        }

        picked
    }

    /// Evolve the strategy with pipeline focus, then regenerate the window
    /// against the refreshed tree.
    pub async fn evolve_pipeline(
        &self,
        project_id: &str,
        path: &str,
        criteria: &SelectionCriteria,
        window: usize,
    ) -> ForestResult<(Option<Evolution>, Vec<FrontierNode>)> {
        let evolution = self
            .evolver
            .evolve(project_id, path, None, true)
            .await?;
        let tree = self.evolver.current_tree(project_id, path).await?;
        let pipeline = match tree {
            Some(tree) => {
                self.next_pipeline(project_id, &tree, criteria, window)
                    .await
            }
            None => Vec::new(),
        };
        Ok((evolution, pipeline))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::hta::{
        BranchFocus, Complexity, GenerationMethod, StrategicBranch, TaskStatus,
    };
    use crate::infrastructure::kv::FileKvStore;
    use crate::infrastructure::vector::{HashEmbeddingService, MemoryVectorIndex};
    use crate::services::hta_engine::HtaEngine;
    use crate::services::hta_store::HtaStore;
    use crate::services::intelligence_bridge::IntelligenceBridge;
    use std::time::Duration;

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

    fn node(id: &str, branch: &str, priority: u32) -> FrontierNode {
        FrontierNode {
            id: id.to_string(),
            title: format!("Task {id}"),
            description: String::new(),
            branch: branch.to_string(),
            difficulty: 3,
            duration: 25,
            priority,
            prerequisites: Vec::new(),
            status: TaskStatus::Pending,
            generated: true,
            learning_outcome: String::new(),
            domain_focus: String::new(),
        }
    }

    fn presenter() -> (tempfile::TempDir, PipelinePresenter) {
        let dir = tempfile::tempdir().unwrap();
        let kv: Arc<dyn crate::domain::ports::KvStore> = Arc::new(FileKvStore::new(dir.path()));
        let vectors: Arc<dyn crate::domain::ports::VectorIndex> =
            Arc::new(MemoryVectorIndex::new(384));
        let embedder: Arc<dyn crate::domain::ports::EmbeddingService> =
            Arc::new(HashEmbeddingService::default());
        let bridge = Arc::new(IntelligenceBridge::new(Duration::from_millis(20)));
        let engine = Arc::new(HtaEngine::new(bridge));
        let store = Arc::new(HtaStore::new(kv, vectors.clone(), embedder.clone(), engine));
        let selector = Arc::new(TaskSelector::new(vectors, embedder));
        let evolver = Arc::new(StrategyEvolver::new(store));
        (dir, PipelinePresenter::new(selector, evolver))
    }

    fn sample_tree() -> HtaTree {
        let mut tree = HtaTree::new(
            "goal".to_string(),
            String::new(),
            Complexity::default(),
            GenerationMethod::Fallback,
        );
        tree.strategic_branches = vec![
            branch("Lighting", 1),
            branch("Posing", 2),
            branch("Editing", 3),
        ];
        tree.frontier_nodes = vec![
            node("l1", "Lighting", 100),
            node("l2", "Lighting", 110),
            node("l3", "Lighting", 120),
            node("p1", "Posing", 200),
            node("p2", "Posing", 210),
            node("e1", "Editing", 300),
        ];
        tree
    }

    #[tokio::test]
    async fn test_window_mixes_branches_before_depth() {
        let (_dir, presenter) = presenter();
        let tree = sample_tree();
        let window = presenter
            .next_pipeline("p1", &tree, &SelectionCriteria::new(3, 30), 5)
            .await;

        assert_eq!(window.len(), 5);
        // The first three picks cover all three branches.
        let first_branches: HashSet<&str> =
            window.iter().take(3).map(|t| t.branch.as_str()).collect();
        assert_eq!(first_branches.len(), 3);
        // No duplicates anywhere in the window.
        let ids: HashSet<&str> = window.iter().map(|t| t.id.as_str()).collect();
        assert_eq!(ids.len(), window.len());
    }

    #[tokio::test]
    async fn test_window_respects_size_and_small_frontiers() {
        let (_dir, presenter) = presenter();
        let tree = sample_tree();
        let window = presenter
            .next_pipeline("p1", &tree, &SelectionCriteria::new(3, 30), 2)
            .await;
        assert_eq!(window.len(), 2);

        let mut small = sample_tree();
        small.frontier_nodes.truncate(1);
        let window = presenter
            .next_pipeline("p1", &small, &SelectionCriteria::new(3, 30), 5)
            .await;
        assert_eq!(window.len(), 1);
    }

    #[tokio::test]
    async fn test_presentation_does_not_mutate_status() {
        let (_dir, presenter) = presenter();
        let tree = sample_tree();
        presenter
            .next_pipeline("p1", &tree, &SelectionCriteria::new(3, 30), 5)
            .await;
        assert!(tree
            .frontier_nodes
            .iter()
            .all(|n| n.status == TaskStatus::Pending));
    }
}
