//! Strategy evolver: mutates the tree from completion feedback and
//! explicit hints.
//!
//! Every mutation maps to one tagged `Evolution` variant and is validated
//! against the tree invariants before it is saved. The evolver is the only
//! component that renumbers priorities; it never changes existing ids.

use std::sync::Arc;

use serde_json::Value;

use crate::domain::error::{ForestError, ForestResult};
use crate::domain::models::evolution::{CompletionReport, Evolution};
use crate::domain::models::hta::{FrontierNode, HtaTree, StrategicBranch, TaskStatus};
use crate::domain::models::learning::{LearningEvent, LearningEventType};
use crate::domain::models::onboarding::AggregateContext;
use crate::services::goal_analysis::goal_subject;
use crate::services::hta_store::{
    breakthrough_vector_id, learning_vector_id, HtaStore,
};

/// Reserved branch that hosts injected discovery tasks.
pub const DISCOVERY_BRANCH: &str = "Discovery";

/// Breakthrough levels at or above this trigger escalation.
pub const ESCALATION_THRESHOLD: u8 = 4;

/// Completions considered for the auto-evolution rules.
const RECENT_WINDOW: usize = 10;

/// Derive the 1-5 breakthrough level from a completion report.
pub fn breakthrough_level(report: &CompletionReport) -> u8 {
    let mut level: i32 = 2;
    if report.breakthrough {
        level += 2;
    }
    if report.learned.len() > 100 {
        level += 1;
    }
    if report.difficulty_rating >= 4 {
        level += 1;
    }
    if report.outcome.to_lowercase().contains("breakthrough") {
        level += 1;
    }
    let learned = report.learned.to_lowercase();
    if learned.contains("insight") || learned.contains("understanding") {
        level += 1;
    }
    u8::try_from(level.min(5)).unwrap_or(5)
}

/// Pull the redirected goal out of a change-of-direction hint.
pub fn extract_new_goal(hint: &str) -> Option<String> {
    let lowered = hint.to_lowercase();
    let core = if let Some(idx) = lowered.find(" instead") {
        lowered[..idx].trim().to_string()
    } else if lowered.contains("switch to") || lowered.contains("change goal to") {
        lowered.trim().to_string()
    } else {
        return None;
    };

    let mut cleaned = core;
    for prefix in [
        "i want to focus on ",
        "i want to ",
        "let's focus on ",
        "focus on ",
        "switch to ",
        "change goal to ",
        "change direction to ",
    ] {
        if let Some(rest) = cleaned.strip_prefix(prefix) {
            cleaned = rest.to_string();
            break;
        }
    }
    let cleaned = cleaned.trim();
    if cleaned.is_empty() {
        None
    } else {
        Some(cleaned.to_string())
    }
}

/// What a completion produced.
#[derive(Debug, Clone)]
pub struct CompletionOutcome {
    pub task: FrontierNode,
    pub event: LearningEvent,
    pub breakthrough_level: u8,
    pub evolution: Option<Evolution>,
}

pub struct StrategyEvolver {
    store: Arc<HtaStore>,
}

impl StrategyEvolver {
    pub fn new(store: Arc<HtaStore>) -> Self {
        Self { store }
    }

    pub async fn current_tree(&self, project: &str, path: &str) -> ForestResult<Option<HtaTree>> {
        self.store.load(project, path).await
    }

    /// Retire a completed block, append its learning event, escalate on a
    /// breakthrough, then run the event-driven evolution rules.
    pub async fn handle_completion(
        &self,
        project: &str,
        path: &str,
        report: &CompletionReport,
    ) -> ForestResult<CompletionOutcome> {
        let lock = self.store.tree_lock(project, path);
        let _guard = lock.lock().await;

        let mut tree = self
            .store
            .load(project, path)
            .await?
            .ok_or_else(|| ForestError::Validation("no tree to complete against".into()))?;

        let task = tree.retire(&report.block_id).ok_or_else(|| {
            ForestError::Validation(format!("unknown block '{}'", report.block_id))
        })?;

        let level = breakthrough_level(report);
        if level >= ESCALATION_THRESHOLD {
            Self::escalate_branch(&mut tree, &task.branch);
        }

        tree.validate()?;
        self.store.save(project, path, &tree).await?;

        let event = LearningEvent::new(
            if level >= ESCALATION_THRESHOLD {
                LearningEventType::Breakthrough
            } else {
                LearningEventType::TaskCompletion
            },
            task.id.clone(),
            report.outcome.clone(),
            report.learned.clone(),
            report.difficulty_rating,
            level,
            task.branch.clone(),
        );
        self.store.append_event(project, path, event.clone()).await?;
        self.vectorize_event(project, &event).await;

        let evolution = self.auto_evolve(project, path, &mut tree).await?;
        Ok(CompletionOutcome {
            task,
            event,
            breakthrough_level: level,
            evolution,
        })
    }

    /// Mirror a learning event into the vector index. Failures degrade to
    /// a log line; the completion itself has already been persisted.
    async fn vectorize_event(&self, project: &str, event: &LearningEvent) {
        if event.learned.is_empty() {
            return;
        }
        let text = format!("{} {}", event.outcome, event.learned);
        let Ok(vector) = self.store.embedder().embed(&text).await else {
            return;
        };
        let metadata = serde_json::json!({
            "project": project, "type": "learning", "event_id": event.id,
            "knowledge_domain": event.knowledge_domain,
            "breakthrough_level": event.breakthrough_level,
        });
        let id = learning_vector_id(project, &event.id);
        if let Err(e) = self.store.vectors().upsert(&id, &vector, metadata.clone()).await {
            tracing::debug!(error = %e, "learning event vector skipped");
            return;
        }
        if event.breakthrough_level >= ESCALATION_THRESHOLD {
            let id = breakthrough_vector_id(project, &event.id);
            let mut meta = metadata;
            meta["type"] = Value::String("breakthrough".into());
            if let Err(e) = self.store.vectors().upsert(&id, &vector, meta).await {
                tracing::debug!(error = %e, "breakthrough vector skipped");
            }
        }
    }

    /// Breakthrough escalation: nearby tasks get harder and the branch
    /// gains a leading advanced task.
    fn escalate_branch(tree: &mut HtaTree, branch_name: &str) {
        let mut min_priority = u32::MAX;
        for node in tree
            .frontier_nodes
            .iter_mut()
            .filter(|n| n.branch == branch_name)
        {
            node.difficulty = (node.difficulty + 1).min(5);
            min_priority = min_priority.min(node.priority);
        }

        let Some(branch) = tree
            .strategic_branches
            .iter()
            .find(|b| b.name == branch_name)
        else {
            return;
        };

        let slug: String = branch_name
            .to_lowercase()
            .chars()
            .map(|c| if c.is_alphanumeric() { c } else { '-' })
            .collect();
        let existing_advanced = tree
            .frontier_nodes
            .iter()
            .chain(&tree.completed_nodes)
            .filter(|n| n.id.starts_with(&format!("{slug}-breakthrough-")))
            .count();
        let id = format!("{slug}-breakthrough-{}", existing_advanced + 1);

        let priority = if min_priority == u32::MAX {
            branch.priority * 100
        } else {
            min_priority.saturating_sub(10)
        };
        tree.frontier_nodes.push(FrontierNode {
            id,
            title: format!("Advanced {} challenge", branch_name),
            description: format!(
                "Push past the recent breakthrough with harder {branch_name} work"
            ),
            branch: branch_name.to_string(),
            difficulty: 5,
            duration: 40,
            priority,
            prerequisites: Vec::new(),
            status: TaskStatus::Pending,
            generated: true,
            learning_outcome: format!("Consolidate the breakthrough in {branch_name}"),
            domain_focus: branch.domain_focus.clone(),
        });
        tree.generation_context.last_evolved_at = Some(chrono::Utc::now());
    }

    /// Apply an explicit hint, or run the event-driven rules when no hint
    /// is given.
    pub async fn evolve(
        &self,
        project: &str,
        path: &str,
        hint: Option<&str>,
        _pipeline_focus: bool,
    ) -> ForestResult<Option<Evolution>> {
        let lock = self.store.tree_lock(project, path);
        let _guard = lock.lock().await;

        let Some(mut tree) = self.store.load(project, path).await? else {
            return match hint {
                Some(_) => Err(ForestError::Validation(
                    "no tree to evolve; build one first".into(),
                )),
                None => Ok(None),
            };
        };

        if let Some(hint) = hint {
            let lowered = hint.to_lowercase();

            if let Some(new_goal) = extract_new_goal(hint) {
                drop(_guard); // archive_and_rebuild takes the tree lock itself
                return self.goal_rewrite(project, path, &tree, new_goal).await.map(Some);
            }

            if lowered.contains("prune") || lowered.contains("irrelevant") || lowered.contains("drop the") {
                if let Some(branch) = Self::find_named_branch(&tree, &lowered) {
                    Self::prune_branch(&mut tree, &branch);
                    tree.validate()?;
                    self.store.save(project, path, &tree).await?;
                    return Ok(Some(Evolution::BranchPruning { branch }));
                }
                return Err(ForestError::Validation(
                    "no branch in the hint matched the tree".into(),
                ));
            }

            if lowered.contains("explore") || lowered.contains("discover") {
                let evolution = self.discovery_enhancement(project, path, &mut tree, hint).await?;
                return Ok(Some(evolution));
            }

            if lowered.contains("confus") || lowered.contains("uncertain") || lowered.contains("lost")
                || lowered.contains("stuck")
            {
                let evolution = Self::uncertainty_expansion(&mut tree);
                tree.validate()?;
                self.store.save(project, path, &tree).await?;
                return Ok(Some(evolution));
            }
        }

        let evolution = self.auto_evolve(project, path, &mut tree).await?;
        Ok(evolution)
    }

    async fn goal_rewrite(
        &self,
        project: &str,
        path: &str,
        old_tree: &HtaTree,
        new_goal: String,
    ) -> ForestResult<Evolution> {
        let context = AggregateContext {
            goal: new_goal.clone(),
            context: old_tree.context.clone(),
            // Reuse the prior assessment so the rebuild does not depend on
            // a live completer being attached.
            complexity: Some(old_tree.complexity.clone()),
            ..Default::default()
        };
        let (_tree, archived_frontier_count) = self
            .store
            .archive_and_rebuild(project, path, &context)
            .await?;
        Ok(Evolution::GoalRewrite {
            new_goal,
            archived_frontier_count,
        })
    }

    fn find_named_branch(tree: &HtaTree, lowered_hint: &str) -> Option<String> {
        tree.strategic_branches
            .iter()
            .map(|b| b.name.clone())
            .find(|name| lowered_hint.contains(&name.to_lowercase()))
    }

    /// Remove a branch and its frontier tasks. Completed nodes keep their
    /// history.
    fn prune_branch(tree: &mut HtaTree, branch: &str) {
        tree.strategic_branches.retain(|b| b.name != branch);
        let removed: Vec<String> = tree
            .frontier_nodes
            .iter()
            .filter(|n| n.branch == branch)
            .map(|n| n.id.clone())
            .collect();
        tree.frontier_nodes.retain(|n| n.branch != branch);
        // Drop dangling prerequisites pointing at the removed tasks.
        for node in &mut tree.frontier_nodes {
            node.prerequisites.retain(|p| !removed.contains(p));
        }
        tree.generation_context.last_evolved_at = Some(chrono::Utc::now());
    }

    /// Add a branch for an explore hint, derived from the strategic-level
    /// generator over a refined goal prompt (the deterministic fallback
    /// serves when no completer answers).
    async fn discovery_enhancement(
        &self,
        project: &str,
        path: &str,
        tree: &mut HtaTree,
        hint: &str,
    ) -> ForestResult<Evolution> {
        let refined_goal = format!("{} {}", tree.goal, goal_subject(hint));
        let context = AggregateContext {
            goal: refined_goal,
            complexity: Some(tree.complexity.clone()),
            ..Default::default()
        };
        let level1 = crate::services::hta_engine::GoalContextAnalysis {
            complexity: tree.complexity.clone(),
            domain_boundaries: tree.domain_boundaries.clone(),
            recommended_strategy: "exploration".to_string(),
            raw: Value::Null,
        };
        let (candidates, _raw, _method) = self
            .store
            .engine()
            .generate_branches(&context, &level1)
            .await;

        let existing: Vec<String> = tree
            .strategic_branches
            .iter()
            .map(|b| b.name.clone())
            .collect();
        let mut new_branch = candidates
            .into_iter()
            .find(|b| !existing.contains(&b.name))
            .ok_or_else(|| {
                ForestError::Validation("no novel branch could be derived from the hint".into())
            })?;
        new_branch.priority = tree
            .strategic_branches
            .iter()
            .map(|b| b.priority)
            .max()
            .unwrap_or(0)
            + 1;
        let branch_name = new_branch.name.clone();
        let seeded = new_branch.clone();
        tree.strategic_branches.push(new_branch);

        // Seed the branch with a small set of starter tasks.
        let starters: Vec<FrontierNode> = {
            let branch = seeded;
            (0..3)
                .map(|i| {
                    let slug: String = branch
                        .name
                        .to_lowercase()
                        .chars()
                        .map(|c| if c.is_alphanumeric() { c } else { '-' })
                        .collect();
                    FrontierNode {
                        id: format!("{slug}-{:02}", i + 1),
                        title: format!("Exploring {} ({})", branch.name, i + 1),
                        description: branch.description.clone(),
                        branch: branch.name.clone(),
                        difficulty: 2,
                        duration: 25,
                        priority: branch.priority * 100 + u32::try_from(i).unwrap_or(0) * 10,
                        prerequisites: Vec::new(),
                        status: TaskStatus::Pending,
                        generated: true,
                        learning_outcome: format!("Orientation in {}", branch.name),
                        domain_focus: branch.domain_focus.clone(),
                    }
                })
                .collect()
        };
        let task_count = starters.len();
        tree.frontier_nodes.extend(starters);
        tree.generation_context.last_evolved_at = Some(chrono::Utc::now());
        tree.validate()?;
        self.store.save(project, path, tree).await?;

        Ok(Evolution::DiscoveryEnhancement {
            branch: branch_name,
            task_count,
        })
    }

    /// Inject discovery tasks and ease global difficulty by one.
    fn uncertainty_expansion(tree: &mut HtaTree) -> Evolution {
        if !tree
            .strategic_branches
            .iter()
            .any(|b| b.name == DISCOVERY_BRANCH)
        {
            let next_priority = tree
                .strategic_branches
                .iter()
                .map(|b| b.priority)
                .max()
                .unwrap_or(0)
                + 1;
            tree.strategic_branches.push(StrategicBranch {
                name: DISCOVERY_BRANCH.to_string(),
                description: format!("Low-pressure reorientation around: {}", tree.goal),
                priority: next_priority,
                domain_focus: "orientation".to_string(),
                rationale: "Recent confusion calls for low-stakes exploration".to_string(),
                expected_outcomes: Vec::new(),
                context_adaptations: Vec::new(),
                exploration_opportunities: Vec::new(),
                focus: crate::domain::models::hta::BranchFocus::Balanced,
            });
        }

        for node in &mut tree.frontier_nodes {
            node.difficulty = node.difficulty.saturating_sub(1).max(1);
        }

        let existing = tree
            .frontier_nodes
            .iter()
            .chain(&tree.completed_nodes)
            .filter(|n| n.branch == DISCOVERY_BRANCH)
            .count();
        let branch_priority = tree
            .strategic_branches
            .iter()
            .find(|b| b.name == DISCOVERY_BRANCH)
            .map_or(1, |b| b.priority);

        let mut injected = Vec::new();
        for i in 0..3 {
            let index = existing + i;
            let id = format!("discovery-{:02}", index + 1);
            injected.push(id.clone());
            tree.frontier_nodes.push(FrontierNode {
                id,
                title: format!("Discovery session ({})", index + 1),
                description: "Revisit what felt unclear and name the sticking points".to_string(),
                branch: DISCOVERY_BRANCH.to_string(),
                difficulty: 1,
                duration: 20,
                priority: branch_priority * 100 + u32::try_from(index).unwrap_or(0) * 10,
                prerequisites: Vec::new(),
                status: TaskStatus::Pending,
                generated: true,
                learning_outcome: "A clearer picture of where the confusion lives".to_string(),
                domain_focus: "orientation".to_string(),
            });
        }
        tree.generation_context.last_evolved_at = Some(chrono::Utc::now());

        Evolution::UncertaintyExpansion {
            injected_tasks: injected,
            difficulty_delta: -1,
        }
    }

    /// Event-driven rules: convergence when recent completions cluster on
    /// one domain, uncertainty when their difficulty ratings swing wide.
    async fn auto_evolve(
        &self,
        project: &str,
        path: &str,
        tree: &mut HtaTree,
    ) -> ForestResult<Option<Evolution>> {
        let history = self.store.load_history(project, path).await?;
        let recent = history.recent(RECENT_WINDOW);
        if recent.len() < 4 {
            return Ok(None);
        }

        // Dominant-domain clustering.
        let mut counts: std::collections::BTreeMap<&str, usize> = std::collections::BTreeMap::new();
        for event in recent {
            if !event.knowledge_domain.is_empty() {
                *counts.entry(event.knowledge_domain.as_str()).or_default() += 1;
            }
        }
        let dominant = counts
            .iter()
            .max_by_key(|&(domain, count)| (*count, std::cmp::Reverse(*domain)))
            .map(|(domain, count)| ((*domain).to_string(), *count));

        if let Some((domain, count)) = dominant {
            if count * 2 >= recent.len() {
                let evolution = self
                    .convergence_refinement(tree, &domain)
                    .await;
                if let Some(evolution) = evolution {
                    tree.validate()?;
                    self.store.save(project, path, tree).await?;
                    return Ok(Some(evolution));
                }
            }
        }

        // High variance in self-reported difficulty reads as confusion.
        let ratings: Vec<f64> = recent.iter().map(|e| f64::from(e.difficulty_rating)).collect();
        #[allow(clippy::cast_precision_loss)]
        let mean = ratings.iter().sum::<f64>() / ratings.len() as f64;
        #[allow(clippy::cast_precision_loss)]
        let variance =
            ratings.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / ratings.len() as f64;
        if variance >= 2.0 {
            let evolution = Self::uncertainty_expansion(tree);
            tree.validate()?;
            self.store.save(project, path, tree).await?;
            return Ok(Some(evolution));
        }

        Ok(None)
    }

    /// Prune drifted low-priority branches and boost tasks matching the
    /// dominant domain. Returns `None` when nothing changed.
    async fn convergence_refinement(
        &self,
        tree: &mut HtaTree,
        dominant_domain: &str,
    ) -> Option<Evolution> {
        let Ok(domain_vector) = self.store.embedder().embed(dominant_domain).await else {
            return None;
        };

        let median_priority = {
            let mut priorities: Vec<u32> =
                tree.strategic_branches.iter().map(|b| b.priority).collect();
            priorities.sort_unstable();
            priorities.get(priorities.len() / 2).copied().unwrap_or(0)
        };

        let mut pruned = Vec::new();
        let mut candidates = Vec::new();
        for branch in &tree.strategic_branches {
            if branch.name == dominant_domain || branch.priority <= median_priority {
                continue;
            }
            let text = format!("{}: {}", branch.name, branch.description);
            if let Ok(vector) = self.store.embedder().embed(&text).await {
                let similarity =
                    crate::infrastructure::vector::cosine_similarity(&vector, &domain_vector);
                if similarity < 0.2 {
                    candidates.push(branch.name.clone());
                }
            }
        }
        // Never prune the tree down to nothing.
        for name in candidates {
            if tree.strategic_branches.len() <= 2 {
                break;
            }
            Self::prune_branch(tree, &name);
            pruned.push(name);
        }

        let mut boosted = Vec::new();
        for node in &mut tree.frontier_nodes {
            if node.branch == dominant_domain {
                node.priority = node.priority.saturating_sub(50);
                boosted.push(node.id.clone());
            }
        }

        if pruned.is_empty() && boosted.is_empty() {
            return None;
        }
        tree.generation_context.last_evolved_at = Some(chrono::Utc::now());
        Some(Evolution::ConvergenceRefinement {
            dominant_domains: vec![dominant_domain.to_string()],
            pruned_branches: pruned,
            boosted_tasks: boosted,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::domain::models::hta::Complexity;
    use crate::domain::ports::{EmbeddingService, KvStore, VectorIndex};
    use crate::infrastructure::kv::FileKvStore;
    use crate::infrastructure::vector::{HashEmbeddingService, MemoryVectorIndex};
    use crate::services::hta_engine::HtaEngine;
    use crate::services::intelligence_bridge::IntelligenceBridge;

    fn fixture() -> (tempfile::TempDir, StrategyEvolver, Arc<HtaStore>) {
        let dir = tempfile::tempdir().unwrap();
        let kv: Arc<dyn KvStore> = Arc::new(FileKvStore::new(dir.path()));
        let vectors: Arc<dyn VectorIndex> = Arc::new(MemoryVectorIndex::new(384));
        let embedder: Arc<dyn EmbeddingService> = Arc::new(HashEmbeddingService::default());
        let bridge = Arc::new(IntelligenceBridge::new(Duration::from_millis(20)));
        let engine = Arc::new(HtaEngine::new(bridge));
        let store = Arc::new(HtaStore::new(kv, vectors, embedder, engine));
        (dir, StrategyEvolver::new(store.clone()), store)
    }

    fn context(goal: &str) -> AggregateContext {
        AggregateContext {
            goal: goal.to_string(),
            complexity: Some(Complexity::from_score(5, Vec::new())),
            ..Default::default()
        }
    }

    fn report(block_id: &str) -> CompletionReport {
        CompletionReport {
            block_id: block_id.to_string(),
            outcome: "done".to_string(),
            energy_level: 4,
            learned: String::new(),
            difficulty_rating: 2,
            breakthrough: false,
        }
    }

    #[test]
    fn test_breakthrough_level_formula() {
        let mut r = report("t");
        assert_eq!(breakthrough_level(&r), 2);

        r.breakthrough = true;
        assert_eq!(breakthrough_level(&r), 4);

        r.difficulty_rating = 4;
        assert_eq!(breakthrough_level(&r), 5);

        // Caps at 5 no matter how many signals fire.
        r.outcome = "a real breakthrough".to_string();
        r.learned = "deep understanding of the exposure triangle and a genuine insight \
                     into how aperture, shutter speed and iso trade against each other"
            .to_string();
        assert_eq!(breakthrough_level(&r), 5);

        // Text-only signals.
        let textual = CompletionReport {
            learned: "a new understanding of light".to_string(),
            ..report("t")
        };
        assert_eq!(breakthrough_level(&textual), 3);
    }

    #[test]
    fn test_extract_new_goal() {
        assert_eq!(
            extract_new_goal("I want to focus on mobile development instead of web"),
            Some("mobile development".to_string())
        );
        assert_eq!(
            extract_new_goal("switch to landscape photography"),
            Some("landscape photography".to_string())
        );
        assert_eq!(extract_new_goal("just keep going"), None);
    }

    #[tokio::test]
    async fn test_completion_retires_task_and_appends_event() {
        let (_dir, evolver, store) = fixture();
        let tree = store
            .build("p1", "general", &context("Master portrait photography"))
            .await
            .unwrap()
            .tree;
        let block = tree.frontier_nodes[0].id.clone();

        let outcome = evolver
            .handle_completion("p1", "general", &report(&block))
            .await
            .unwrap();
        assert_eq!(outcome.task.id, block);
        assert_eq!(outcome.breakthrough_level, 2);

        let updated = store.load("p1", "general").await.unwrap().unwrap();
        assert!(updated.find_frontier(&block).is_none());
        assert!(updated.completed_nodes.iter().any(|n| n.id == block));

        let history = store.load_history("p1", "general").await.unwrap();
        assert_eq!(history.events.len(), 1);
        assert_eq!(history.events[0].task_id, block);
    }

    #[tokio::test]
    async fn test_unknown_block_is_rejected() {
        let (_dir, evolver, store) = fixture();
        store
            .build("p1", "general", &context("Master portrait photography"))
            .await
            .unwrap();
        let err = evolver
            .handle_completion("p1", "general", &report("no-such-task"))
            .await
            .unwrap_err();
        assert_eq!(err.tag(), "ValidationError");
    }

    #[tokio::test]
    async fn test_breakthrough_escalates_branch() {
        let (_dir, evolver, store) = fixture();
        let tree = store
            .build("p1", "general", &context("Master portrait photography"))
            .await
            .unwrap()
            .tree;
        let target = tree.frontier_nodes[0].clone();
        let peers_before: Vec<u8> = tree
            .frontier_nodes
            .iter()
            .filter(|n| n.branch == target.branch && n.id != target.id)
            .map(|n| n.difficulty)
            .collect();

        let breakthrough = CompletionReport {
            breakthrough: true,
            difficulty_rating: 4,
            learned: "real insight".to_string(),
            ..report(&target.id)
        };
        let outcome = evolver
            .handle_completion("p1", "general", &breakthrough)
            .await
            .unwrap();
        assert!(outcome.breakthrough_level >= ESCALATION_THRESHOLD);

        let updated = store.load("p1", "general").await.unwrap().unwrap();
        updated.validate().unwrap();

        // An advanced task now leads the branch.
        let advanced = updated
            .frontier_nodes
            .iter()
            .find(|n| n.id.contains("breakthrough") && n.branch == target.branch)
            .expect("advanced task prepended");
        let branch_min = updated
            .frontier_nodes
            .iter()
            .filter(|n| n.branch == target.branch)
            .map(|n| n.priority)
            .min()
            .unwrap();
        assert_eq!(advanced.priority, branch_min);

        // Peer difficulties rose by one (clamped).
        let peers_after: Vec<u8> = updated
            .frontier_nodes
            .iter()
            .filter(|n| n.branch == target.branch && !n.id.contains("breakthrough"))
            .map(|n| n.difficulty)
            .collect();
        for (before, after) in peers_before.iter().zip(peers_after.iter()) {
            assert_eq!(*after, (before + 1).min(5));
        }
    }

    #[tokio::test]
    async fn test_breakthrough_on_last_branch_task_keeps_invariants() {
        let (_dir, evolver, store) = fixture();
        let mut tree = store
            .build("p1", "general", &context("Master portrait photography"))
            .await
            .unwrap()
            .tree;

        // Complete everything in one branch except a single task.
        let branch = tree.strategic_branches[0].name.clone();
        let ids: Vec<String> = tree
            .frontier_nodes
            .iter()
            .filter(|n| n.branch == branch)
            .map(|n| n.id.clone())
            .collect();
        for id in &ids[..ids.len() - 1] {
            tree.retire(id);
        }
        store.save("p1", "general", &tree).await.unwrap();
        let last = ids.last().unwrap().clone();

        let breakthrough = CompletionReport {
            breakthrough: true,
            difficulty_rating: 5,
            ..report(&last)
        };
        evolver
            .handle_completion("p1", "general", &breakthrough)
            .await
            .unwrap();

        let updated = store.load("p1", "general").await.unwrap().unwrap();
        updated.validate().unwrap();
        assert!(updated
            .frontier_nodes
            .iter()
            .any(|n| n.branch == branch && n.id.contains("breakthrough")));
    }

    #[tokio::test]
    async fn test_branch_pruning_hint() {
        let (_dir, evolver, store) = fixture();
        let tree = store
            .build("p1", "general", &context("Master portrait photography"))
            .await
            .unwrap()
            .tree;
        let victim = tree.strategic_branches.last().unwrap().name.clone();

        let evolution = evolver
            .evolve(
                "p1",
                "general",
                Some(&format!("{victim} is irrelevant to me")),
                false,
            )
            .await
            .unwrap()
            .unwrap();
        assert_eq!(evolution.tag(), "branch_pruning");

        let updated = store.load("p1", "general").await.unwrap().unwrap();
        updated.validate().unwrap();
        assert!(!updated.strategic_branches.iter().any(|b| b.name == victim));
        assert!(!updated.frontier_nodes.iter().any(|n| n.branch == victim));
    }

    #[tokio::test]
    async fn test_uncertainty_hint_injects_discovery() {
        let (_dir, evolver, store) = fixture();
        store
            .build("p1", "general", &context("Master portrait photography"))
            .await
            .unwrap();

        let evolution = evolver
            .evolve("p1", "general", Some("I'm confused about where to go next"), false)
            .await
            .unwrap()
            .unwrap();
        let Evolution::UncertaintyExpansion {
            injected_tasks,
            difficulty_delta,
        } = evolution
        else {
            panic!("expected uncertainty expansion");
        };
        assert_eq!(injected_tasks.len(), 3);
        assert_eq!(difficulty_delta, -1);

        let updated = store.load("p1", "general").await.unwrap().unwrap();
        updated.validate().unwrap();
        assert!(updated
            .strategic_branches
            .iter()
            .any(|b| b.name == DISCOVERY_BRANCH));
        assert_eq!(
            updated
                .frontier_nodes
                .iter()
                .filter(|n| n.branch == DISCOVERY_BRANCH)
                .count(),
            3
        );
    }

    #[tokio::test]
    async fn test_goal_rewrite_archives_and_rebuilds() {
        let (_dir, evolver, store) = fixture();
        let original = store
            .build("p1", "general", &context("full stack web development"))
            .await
            .unwrap()
            .tree;

        let evolution = evolver
            .evolve(
                "p1",
                "general",
                Some("I want to focus on mobile development instead of web"),
                false,
            )
            .await
            .unwrap()
            .unwrap();
        let Evolution::GoalRewrite {
            new_goal,
            archived_frontier_count,
        } = &evolution
        else {
            panic!("expected goal rewrite, got {}", evolution.tag());
        };
        assert_eq!(new_goal, "mobile development");
        assert_eq!(*archived_frontier_count, original.frontier_nodes.len());

        let updated = store.load("p1", "general").await.unwrap().unwrap();
        assert_eq!(updated.goal, "mobile development");
        assert!(!updated.frontier_nodes.is_empty());
        assert_eq!(updated.archived_trees.len(), 1);
        assert_eq!(updated.archived_trees[0].tree.goal, original.goal);
    }

    #[tokio::test]
    async fn test_discovery_hint_adds_novel_branch() {
        let (_dir, evolver, store) = fixture();
        let before = store
            .build("p1", "general", &context("Master portrait photography"))
            .await
            .unwrap()
            .tree;

        let evolution = evolver
            .evolve("p1", "general", Some("let me explore studio strobes"), false)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(evolution.tag(), "discovery_enhancement");

        let updated = store.load("p1", "general").await.unwrap().unwrap();
        updated.validate().unwrap();
        assert_eq!(
            updated.strategic_branches.len(),
            before.strategic_branches.len() + 1
        );
    }

    #[tokio::test]
    async fn test_auto_evolution_needs_history() {
        let (_dir, evolver, store) = fixture();
        store
            .build("p1", "general", &context("Master portrait photography"))
            .await
            .unwrap();
        // No events yet: nothing to evolve from.
        assert!(evolver
            .evolve("p1", "general", None, false)
            .await
            .unwrap()
            .is_none());
    }
}
