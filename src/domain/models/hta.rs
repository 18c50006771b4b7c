//! HTA tree domain model.
//!
//! The canonical learning-plan document: one tree per `(project, path)`.
//! Strategic branches partition the goal; frontier nodes are the tasks a
//! learner can pick up next. Raw per-level generation outputs are retained
//! so deeper levels can be materialized on demand.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::error::{ForestError, ForestResult};

/// Maximum decomposition depth of a tree.
pub const MAX_DEPTH: u8 = 6;

/// Complexity classification of a goal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComplexityLevel {
    Simple,
    Moderate,
    Complex,
    Expert,
}

impl ComplexityLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Simple => "simple",
            Self::Moderate => "moderate",
            Self::Complex => "complex",
            Self::Expert => "expert",
        }
    }

    /// Bucket a 1-10 score into a level.
    pub fn from_score(score: u8) -> Self {
        match score {
            0..=3 => Self::Simple,
            4..=6 => Self::Moderate,
            7..=8 => Self::Complex,
            _ => Self::Expert,
        }
    }
}

/// Goal complexity assessment produced by level-1 analysis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Complexity {
    /// Score in [1, 10].
    pub score: u8,
    pub level: ComplexityLevel,
    /// Recommended decomposition depth in [2, 6].
    pub recommended_depth: u8,
    pub factors: Vec<String>,
}

impl Complexity {
    pub fn from_score(score: u8, factors: Vec<String>) -> Self {
        let score = score.clamp(1, 10);
        Self {
            score,
            level: ComplexityLevel::from_score(score),
            recommended_depth: (2 + score / 3).clamp(2, MAX_DEPTH),
            factors,
        }
    }
}

impl Default for Complexity {
    fn default() -> Self {
        Self::from_score(5, Vec::new())
    }
}

/// Learning emphasis of a strategic branch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BranchFocus {
    Theory,
    HandsOn,
    Project,
    Balanced,
}

impl Default for BranchFocus {
    fn default() -> Self {
        Self::Balanced
    }
}

impl BranchFocus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Theory => "theory",
            Self::HandsOn => "hands-on",
            Self::Project => "project",
            Self::Balanced => "balanced",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "theory" => Some(Self::Theory),
            "hands-on" | "hands_on" => Some(Self::HandsOn),
            "project" => Some(Self::Project),
            "balanced" => Some(Self::Balanced),
            _ => None,
        }
    }
}

/// A top-level partition of the goal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategicBranch {
    /// Unique within a tree.
    pub name: String,
    pub description: String,
    /// Ordering weight; lower is earlier.
    pub priority: u32,
    pub domain_focus: String,
    pub rationale: String,
    #[serde(default)]
    pub expected_outcomes: Vec<String>,
    #[serde(default)]
    pub context_adaptations: Vec<String>,
    #[serde(default)]
    pub exploration_opportunities: Vec<String>,
    #[serde(default)]
    pub focus: BranchFocus,
}

/// Status of a frontier task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    InProgress,
    Completed,
}

impl Default for TaskStatus {
    fn default() -> Self {
        Self::Pending
    }
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "pending" => Some(Self::Pending),
            "in_progress" | "in-progress" => Some(Self::InProgress),
            "completed" | "complete" => Some(Self::Completed),
            _ => None,
        }
    }
}

/// A task record. Lives in `frontier_nodes` until completed, then moves to
/// `completed_nodes` keeping its learning metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrontierNode {
    /// Unique within a tree, stable across evolutions.
    pub id: String,
    pub title: String,
    pub description: String,
    /// Name of an existing strategic branch.
    pub branch: String,
    /// Difficulty in [1, 5].
    pub difficulty: u8,
    /// Estimated duration in minutes.
    pub duration: u32,
    /// Selection ordering; total order within a branch, ties broken by id.
    pub priority: u32,
    /// Ids of tasks that must complete first.
    #[serde(default)]
    pub prerequisites: Vec<String>,
    #[serde(default)]
    pub status: TaskStatus,
    /// True when produced by the engine rather than an evolution.
    #[serde(default)]
    pub generated: bool,
    #[serde(default)]
    pub learning_outcome: String,
    #[serde(default)]
    pub domain_focus: String,
}

/// How the current document was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GenerationMethod {
    /// Schema-constrained intelligence generation.
    Schema,
    /// Deterministic goal-adaptive fallback.
    Fallback,
    /// Frontier re-synthesized from a persisted level-2 slice.
    Recovery,
}

/// Audit metadata for a generated tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationContext {
    pub method: GenerationMethod,
    pub generated_at: DateTime<Utc>,
    #[serde(default)]
    pub last_evolved_at: Option<DateTime<Utc>>,
}

/// A superseded tree kept after a goal rewrite.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArchivedTree {
    pub archived_at: DateTime<Utc>,
    pub reason: String,
    pub tree: Box<HtaTree>,
}

/// The canonical HTA document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HtaTree {
    pub goal: String,
    pub context: String,
    pub created: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
    pub complexity: Complexity,
    pub strategic_branches: Vec<StrategicBranch>,
    pub frontier_nodes: Vec<FrontierNode>,
    #[serde(default)]
    pub completed_nodes: Vec<FrontierNode>,
    #[serde(default)]
    pub level1_goal_context: Option<Value>,
    #[serde(default)]
    pub level2_strategic_branches: Option<Value>,
    #[serde(default)]
    pub level3_task_decomposition: Option<Value>,
    #[serde(default)]
    pub level4_micro_particles: Option<Value>,
    #[serde(default)]
    pub level5_nano_actions: Option<Value>,
    #[serde(default)]
    pub level6_context_adaptive_primitives: Option<Value>,
    pub available_depth: u8,
    pub max_depth: u8,
    pub can_expand: bool,
    /// In-scope topics derived at level 1; drives exploration-relevance.
    #[serde(default)]
    pub domain_boundaries: Vec<String>,
    pub generation_context: GenerationContext,
    #[serde(default)]
    pub archived_trees: Vec<ArchivedTree>,
}

impl HtaTree {
    pub fn new(goal: String, context: String, complexity: Complexity, method: GenerationMethod) -> Self {
        let now = Utc::now();
        Self {
            goal,
            context,
            created: now,
            last_updated: now,
            complexity,
            strategic_branches: Vec::new(),
            frontier_nodes: Vec::new(),
            completed_nodes: Vec::new(),
            level1_goal_context: None,
            level2_strategic_branches: None,
            level3_task_decomposition: None,
            level4_micro_particles: None,
            level5_nano_actions: None,
            level6_context_adaptive_primitives: None,
            available_depth: 0,
            max_depth: MAX_DEPTH,
            can_expand: true,
            domain_boundaries: Vec::new(),
            generation_context: GenerationContext {
                method,
                generated_at: now,
                last_evolved_at: None,
            },
            archived_trees: Vec::new(),
        }
    }

    /// Raw slice for a generation level, if materialized.
    pub fn level_slice(&self, level: u8) -> Option<&Value> {
        match level {
            1 => self.level1_goal_context.as_ref(),
            2 => self.level2_strategic_branches.as_ref(),
            3 => self.level3_task_decomposition.as_ref(),
            4 => self.level4_micro_particles.as_ref(),
            5 => self.level5_nano_actions.as_ref(),
            6 => self.level6_context_adaptive_primitives.as_ref(),
            _ => None,
        }
    }

    /// Record a generated slice and keep the depth bookkeeping consistent.
    pub fn set_level_slice(&mut self, level: u8, slice: Value) {
        match level {
            1 => self.level1_goal_context = Some(slice),
            2 => self.level2_strategic_branches = Some(slice),
            3 => self.level3_task_decomposition = Some(slice),
            4 => self.level4_micro_particles = Some(slice),
            5 => self.level5_nano_actions = Some(slice),
            6 => self.level6_context_adaptive_primitives = Some(slice),
            _ => return,
        }
        self.recompute_depth();
    }

    /// Re-derives `available_depth` and `can_expand` from the level slices.
    pub fn recompute_depth(&mut self) {
        self.available_depth = (1..=MAX_DEPTH)
            .take_while(|lvl| self.level_slice(*lvl).is_some())
            .last()
            .unwrap_or(0);
        self.can_expand = self.available_depth < self.max_depth;
    }

    pub fn branch_names(&self) -> Vec<&str> {
        self.strategic_branches.iter().map(|b| b.name.as_str()).collect()
    }

    pub fn find_frontier(&self, id: &str) -> Option<&FrontierNode> {
        self.frontier_nodes.iter().find(|n| n.id == id)
    }

    pub fn find_frontier_mut(&mut self, id: &str) -> Option<&mut FrontierNode> {
        self.frontier_nodes.iter_mut().find(|n| n.id == id)
    }

    fn known_task_id(&self, id: &str) -> bool {
        self.frontier_nodes.iter().any(|n| n.id == id)
            || self.completed_nodes.iter().any(|n| n.id == id)
    }

    /// True when every prerequisite of `node` has been completed.
    pub fn prerequisites_satisfied(&self, node: &FrontierNode) -> bool {
        node.prerequisites
            .iter()
            .all(|p| self.completed_nodes.iter().any(|c| &c.id == p))
    }

    /// Frontier tasks that are not completed and whose prerequisites are met.
    pub fn eligible_frontier(&self) -> Vec<&FrontierNode> {
        self.frontier_nodes
            .iter()
            .filter(|n| n.status != TaskStatus::Completed && self.prerequisites_satisfied(n))
            .collect()
    }

    /// Move a frontier node into `completed_nodes`. Returns the retired node.
    pub fn retire(&mut self, id: &str) -> Option<FrontierNode> {
        let idx = self.frontier_nodes.iter().position(|n| n.id == id)?;
        let mut node = self.frontier_nodes.remove(idx);
        node.status = TaskStatus::Completed;
        self.completed_nodes.push(node.clone());
        self.last_updated = Utc::now();
        Some(node)
    }

    /// Structural invariant check. Run before every save.
    pub fn validate(&self) -> ForestResult<()> {
        let mut branch_names: Vec<&str> = Vec::with_capacity(self.strategic_branches.len());
        for branch in &self.strategic_branches {
            if branch_names.contains(&branch.name.as_str()) {
                return Err(ForestError::Conflict(format!(
                    "duplicate branch name '{}'",
                    branch.name
                )));
            }
            branch_names.push(&branch.name);
        }

        let mut seen_ids: Vec<&str> = Vec::with_capacity(self.frontier_nodes.len());
        for node in self.frontier_nodes.iter().chain(&self.completed_nodes) {
            if seen_ids.contains(&node.id.as_str()) {
                return Err(ForestError::Conflict(format!(
                    "task '{}' appears in more than one node list",
                    node.id
                )));
            }
            seen_ids.push(&node.id);
        }

        for node in &self.frontier_nodes {
            if !branch_names.contains(&node.branch.as_str()) {
                return Err(ForestError::Conflict(format!(
                    "task '{}' references unknown branch '{}'",
                    node.id, node.branch
                )));
            }
            for prereq in &node.prerequisites {
                if !self.known_task_id(prereq) {
                    return Err(ForestError::Conflict(format!(
                        "task '{}' has unknown prerequisite '{}'",
                        node.id, prereq
                    )));
                }
            }
        }

        let derived = (1..=MAX_DEPTH)
            .take_while(|lvl| self.level_slice(*lvl).is_some())
            .last()
            .unwrap_or(0);
        if self.available_depth != derived {
            return Err(ForestError::Conflict(format!(
                "available_depth {} does not match materialized levels {}",
                self.available_depth, derived
            )));
        }
        if self.available_depth < self.max_depth && !self.can_expand {
            return Err(ForestError::Conflict(
                "tree below max depth must be expandable".into(),
            ));
        }

        Ok(())
    }

    /// Short summary used by status tools.
    pub fn summary(&self) -> Value {
        serde_json::json!({
            "goal": self.goal,
            "complexity": self.complexity,
            "branch_count": self.strategic_branches.len(),
            "frontier_count": self.frontier_nodes.len(),
            "completed_count": self.completed_nodes.len(),
            "available_depth": self.available_depth,
            "can_expand": self.can_expand,
            "created": self.created,
            "last_updated": self.last_updated,
        })
    }
}
