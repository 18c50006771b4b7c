//! Schema HTA engine.
//!
//! Produces the six decomposition levels through schema-constrained
//! intelligence requests, with a retry ladder and a deterministic
//! goal-adaptive fallback for the strategic level. Frontier tasks are
//! materialized from the level-2 branches with pure integer formula
//! pipelines so the numbers are property-testable.

use std::sync::Arc;

use serde_json::{json, Value};

use crate::domain::error::{ForestError, ForestResult};
use crate::domain::models::hta::{
    BranchFocus, Complexity, FrontierNode, GenerationMethod, HtaTree, StrategicBranch, TaskStatus,
};
use crate::domain::models::onboarding::AggregateContext;
use crate::domain::ports::{EmbeddingService, VectorIndex, VectorQueryOptions};
use crate::services::goal_analysis::{
    self, analyze, clean_branch_name, fallback_branches, ExperienceLevel,
};
use crate::services::intelligence_bridge::{DelegateParams, IntelligenceBridge};

/// Branch-name fragments that mark a generation as too generic to keep.
const GENERIC_BRANCH_TERMS: &[&str] = &["foundation", "research", "implementation", "phase"];

/// Progressive title stages applied across a branch's task sequence.
const TITLE_STAGES: [&str; 5] = [
    "Introduction to",
    "Exploring",
    "Understanding",
    "Mastering",
    "Advanced",
];

/// Level-1 output: complexity assessment plus domain boundaries.
#[derive(Debug, Clone, PartialEq)]
pub struct GoalContextAnalysis {
    pub complexity: Complexity,
    pub domain_boundaries: Vec<String>,
    pub recommended_strategy: String,
    pub raw: Value,
}

/// Context multiplier applied to task durations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DurationContext {
    Standard,
    HighUrgency,
    HandsOn,
    Reading,
}

impl DurationContext {
    /// Basis points: 1000 = neutral.
    const fn basis_points(self) -> i64 {
        match self {
            Self::Standard => 1000,
            Self::HighUrgency | Self::Reading => 800,
            Self::HandsOn => 1200,
        }
    }

    /// Derive from branch focus and constraints; urgency wins.
    pub fn derive(focus: BranchFocus, urgency_high: bool) -> Self {
        if urgency_high {
            Self::HighUrgency
        } else {
            match focus {
                BranchFocus::HandsOn | BranchFocus::Project => Self::HandsOn,
                BranchFocus::Theory => Self::Reading,
                BranchFocus::Balanced => Self::Standard,
            }
        }
    }
}

/// Tasks emitted per branch: `floor(score * 3)` clamped to [15, 25].
pub fn tasks_per_branch(score: u8) -> usize {
    (usize::from(score) * 3).clamp(15, 25)
}

/// Difficulty starts at `floor(score / 2)` and rises half a point per
/// position, clamped to [1, 5].
pub fn task_difficulty(score: u8, index: usize) -> u8 {
    let half_steps = u8::try_from(index / 2).unwrap_or(u8::MAX);
    (score / 2).saturating_add(half_steps).clamp(1, 5)
}

/// Duration pipeline, all integer basis points:
/// `25min * complexity * progression * context`, clamped to [10, 60].
pub fn task_duration(score: u8, index: usize, context: DurationContext) -> u32 {
    let complexity_bp = 1000 + (i64::from(score) - 3) * 200;
    let progression_bp = 1000 + i64::try_from(index).unwrap_or(0) * 300;
    let context_bp = context.basis_points();
    let minutes = 25 * complexity_bp * progression_bp * context_bp / 1_000_000_000;
    u32::try_from(minutes.clamp(10, 60)).unwrap_or(60)
}

/// Selection ordering weight; lower sorts earlier.
pub fn task_priority(branch_priority: u32, index: usize) -> u32 {
    branch_priority * 100 + u32::try_from(index).unwrap_or(0) * 10
}

/// Temperature decreases with depth: level 1 is the most open-ended.
pub fn temperature_for_level(level: u8) -> f32 {
    1.0 - 0.12 * f32::from(level.saturating_sub(1))
}

/// Stage index for a position in a branch of `total` tasks.
fn title_stage(index: usize, total: usize) -> usize {
    if total == 0 {
        return 0;
    }
    (index * TITLE_STAGES.len() / total).min(TITLE_STAGES.len() - 1)
}

fn slugify(text: &str) -> String {
    let slug: String = text
        .to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { '-' })
        .collect();
    let mut collapsed = String::with_capacity(slug.len());
    for c in slug.chars() {
        if c == '-' && collapsed.ends_with('-') {
            continue;
        }
        collapsed.push(c);
    }
    collapsed.trim_matches('-').to_string()
}

/// Exploration-relevance classification against a tree's domain
/// boundaries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelevanceClass {
    InScope,
    Adjacent,
    OffTopic,
}

impl RelevanceClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InScope => "in-scope",
            Self::Adjacent => "adjacent",
            Self::OffTopic => "off-topic",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Relevance {
    pub score: f32,
    pub class: RelevanceClass,
}

pub struct HtaEngine {
    bridge: Arc<IntelligenceBridge>,
}

impl HtaEngine {
    pub fn new(bridge: Arc<IntelligenceBridge>) -> Self {
        Self { bridge }
    }

    fn schema_for_level(level: u8) -> Value {
        match level {
            1 => json!({
                "required": ["goal_analysis", "learning_approach", "domain_boundaries"],
                "properties": {
                    "goal_analysis": {"type": "object"},
                    "learning_approach": {"type": "object"},
                    "domain_boundaries": {"type": "array"}
                }
            }),
            2 => json!({
                "required": ["strategic_branches"],
                "properties": {
                    "strategic_branches": {"type": "array"}
                }
            }),
            3 => json!({
                "required": ["tasks"],
                "properties": {"tasks": {"type": "array"}}
            }),
            4 => json!({
                "required": ["micro_particles"],
                "properties": {"micro_particles": {"type": "array"}}
            }),
            5 => json!({
                "required": ["nano_actions"],
                "properties": {"nano_actions": {"type": "array"}}
            }),
            _ => json!({
                "required": ["context_adaptive_primitives"],
                "properties": {"context_adaptive_primitives": {"type": "array"}}
            }),
        }
    }

    fn system_prompt_for_level(level: u8) -> String {
        let role = match level {
            1 => "You analyze a learning goal: complexity (1-10), complexity factors, a recommended learning strategy, and the domain boundaries that keep later work on-topic.",
            2 => "You partition a learning goal into 3-7 strategic branches with domain-specific names, descriptions, priorities, rationales and expected outcomes.",
            3 => "You decompose one strategic branch into an ordered list of learning tasks with titles, descriptions, learning outcomes and prerequisites.",
            4 => "You break one learning task into ordered atomic steps, each with a duration estimate in minutes.",
            5 => "You reduce one atomic step into environment-agnostic minimal actions.",
            _ => "You adapt one minimal action into concrete variants for each recognized user context.",
        };
        format!("{role} Respond with a single JSON object matching the provided schema.")
    }

    async fn request_level(&self, level: u8, user_prompt: String) -> ForestResult<Value> {
        let envelope = self
            .bridge
            .delegate(DelegateParams {
                system: Self::system_prompt_for_level(level),
                user: user_prompt,
                schema: Some(Self::schema_for_level(level)),
                max_tokens: 2048,
                temperature: temperature_for_level(level),
            })
            .await;
        self.bridge.await_response(&envelope.request_id, None).await
    }

    /// Level 1: goal context analysis. One retry, then the build fails.
    pub async fn analyze_goal_context(
        &self,
        context: &AggregateContext,
    ) -> ForestResult<GoalContextAnalysis> {
        let prompt = format!(
            "Analyze this learning goal and its context.\n{}",
            context.render()
        );

        let first = match self.request_level(1, prompt.clone()).await {
            Ok(value) => Self::check_level1(&value)
                .map(|()| value)
                .map_err(ForestError::Validation),
            Err(e) => Err(e),
        };
        let raw = match first {
            Ok(value) => value,
            Err(first_err) => {
                tracing::warn!(error = %first_err, "goal context generation failed, retrying");
                let retry_prompt = format!(
                    "{prompt}\nYour previous answer was unusable ({first_err}). \
                     Ground every field in the goal's own domain."
                );
                let value = self.request_level(1, retry_prompt).await?;
                Self::check_level1(&value).map_err(ForestError::Validation)?;
                value
            }
        };

        Ok(Self::parse_level1(&raw))
    }

    fn check_level1(value: &Value) -> Result<(), String> {
        let score = value
            .pointer("/goal_analysis/goal_complexity")
            .and_then(Value::as_u64);
        match score {
            Some(1..=10) => Ok(()),
            Some(other) => Err(format!("goal_complexity {other} outside 1-10")),
            None => Err("missing goal_analysis.goal_complexity".to_string()),
        }
    }

    fn parse_level1(raw: &Value) -> GoalContextAnalysis {
        let score = raw
            .pointer("/goal_analysis/goal_complexity")
            .and_then(Value::as_u64)
            .unwrap_or(5);
        let factors = raw
            .pointer("/goal_analysis/complexity_factors")
            .and_then(Value::as_array)
            .map(|a| {
                a.iter()
                    .filter_map(Value::as_str)
                    .map(ToString::to_string)
                    .collect()
            })
            .unwrap_or_default();
        let domain_boundaries = raw
            .get("domain_boundaries")
            .and_then(Value::as_array)
            .map(|a| {
                a.iter()
                    .filter_map(Value::as_str)
                    .map(ToString::to_string)
                    .collect()
            })
            .unwrap_or_default();
        let recommended_strategy = raw
            .pointer("/learning_approach/recommended_strategy")
            .and_then(Value::as_str)
            .unwrap_or("balanced")
            .to_string();

        GoalContextAnalysis {
            complexity: Complexity::from_score(
                u8::try_from(score).unwrap_or(5),
                factors,
            ),
            domain_boundaries,
            recommended_strategy,
            raw: raw.clone(),
        }
    }

    /// Level 2 with the full ladder: generate, retry with an enriched
    /// prompt, then fall back to deterministic goal-adaptive branches.
    pub async fn generate_branches(
        &self,
        context: &AggregateContext,
        level1: &GoalContextAnalysis,
    ) -> (Vec<StrategicBranch>, Value, GenerationMethod) {
        let goal = &context.goal;
        let base_prompt = format!(
            "Partition this goal into strategic learning branches.\n{}\nComplexity: {} ({})",
            context.render(),
            level1.complexity.score,
            level1.complexity.level.as_str(),
        );

        match self.try_generate_branches(goal, base_prompt.clone()).await {
            Ok((branches, raw)) => return (branches, raw, GenerationMethod::Schema),
            Err(first_err) => {
                tracing::warn!(error = %first_err, "strategic branch generation failed, retrying enriched");
                let tokens = goal_analysis::tokenize(goal).join(", ");
                let enriched = format!(
                    "{base_prompt}\nDo not use generic branch names such as \
                     'Foundation', 'Research' or 'Implementation'. Every branch name \
                     must use terminology from the goal's own domain ({tokens})."
                );
                match self.try_generate_branches(goal, enriched).await {
                    Ok((branches, raw)) => {
                        return (branches, raw, GenerationMethod::Schema)
                    }
                    Err(retry_err) => {
                        tracing::warn!(error = %retry_err, "retry failed, using goal-adaptive fallback");
                    }
                }
            }
        }

        let characteristics = analyze(goal);
        let branches = fallback_branches(goal, &characteristics);
        let raw = json!({
            "strategic_branches": branches,
            "generation": "goal_adaptive_fallback",
        });
        (branches, raw, GenerationMethod::Fallback)
    }

    async fn try_generate_branches(
        &self,
        goal: &str,
        prompt: String,
    ) -> ForestResult<(Vec<StrategicBranch>, Value)> {
        let raw = self.request_level(2, prompt).await?;
        let branches = Self::parse_branches(&raw, goal)?;
        Ok((branches, raw))
    }

    /// Parse and vet level-2 output: 3-7 branches, unique non-generic names.
    fn parse_branches(raw: &Value, goal: &str) -> ForestResult<Vec<StrategicBranch>> {
        let items = raw
            .get("strategic_branches")
            .and_then(Value::as_array)
            .ok_or_else(|| ForestError::Validation("missing strategic_branches".into()))?;

        let mut branches = Vec::with_capacity(items.len());
        for (index, item) in items.iter().enumerate() {
            let name_raw = item
                .get("name")
                .and_then(Value::as_str)
                .ok_or_else(|| {
                    ForestError::Validation(format!("branch {index} is missing a name"))
                })?;
            let name = clean_branch_name(name_raw, goal);
            if name.is_empty() {
                return Err(ForestError::Validation(format!(
                    "branch name '{name_raw}' reduced to nothing"
                )));
            }
            let lowered = name.to_lowercase();
            if GENERIC_BRANCH_TERMS.iter().any(|term| lowered.contains(term)) {
                return Err(ForestError::Validation(format!(
                    "branch name '{name}' is generic"
                )));
            }

            branches.push(StrategicBranch {
                name,
                description: item
                    .get("description")
                    .and_then(Value::as_str)
                    .unwrap_or(goal)
                    .to_string(),
                priority: item
                    .get("priority")
                    .and_then(Value::as_u64)
                    .and_then(|p| u32::try_from(p).ok())
                    .unwrap_or_else(|| u32::try_from(index + 1).unwrap_or(u32::MAX)),
                domain_focus: item
                    .get("domain_focus")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
                rationale: item
                    .get("rationale")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
                expected_outcomes: string_array(item.get("expected_outcomes")),
                context_adaptations: string_array(item.get("context_adaptations")),
                exploration_opportunities: string_array(item.get("exploration_opportunities")),
                focus: item
                    .get("focus")
                    .and_then(Value::as_str)
                    .and_then(BranchFocus::from_str)
                    .unwrap_or_default(),
            });
        }

        if !(3..=7).contains(&branches.len()) {
            return Err(ForestError::Validation(format!(
                "{} branches outside the 3-7 range",
                branches.len()
            )));
        }
        let mut names: Vec<&str> = branches.iter().map(|b| b.name.as_str()).collect();
        names.sort_unstable();
        names.dedup();
        if names.len() != branches.len() {
            return Err(ForestError::Validation("duplicate branch names".into()));
        }

        Ok(branches)
    }

    /// Materialize the initial frontier from the strategic branches.
    pub fn materialize_frontier(
        goal: &str,
        complexity: &Complexity,
        branches: &[StrategicBranch],
        urgency_high: bool,
    ) -> Vec<FrontierNode> {
        let per_branch = tasks_per_branch(complexity.score);
        let mut nodes = Vec::with_capacity(per_branch * branches.len());

        for branch in branches {
            let clean = clean_branch_name(&branch.name, goal);
            let slug = slugify(&branch.name);
            let context = DurationContext::derive(branch.focus, urgency_high);
            let mut stage_counts = [0usize; TITLE_STAGES.len()];
            let mut prev_id: Option<String> = None;

            for index in 0..per_branch {
                let stage = title_stage(index, per_branch);
                stage_counts[stage] += 1;
                let title = if stage_counts[stage] > 1 {
                    format!("{} {} ({})", TITLE_STAGES[stage], clean, stage_counts[stage])
                } else {
                    format!("{} {}", TITLE_STAGES[stage], clean)
                };

                let id = format!("{slug}-{:02}", index + 1);
                nodes.push(FrontierNode {
                    id: id.clone(),
                    title,
                    description: format!("{} within {}", branch.description, branch.name),
                    branch: branch.name.clone(),
                    difficulty: task_difficulty(complexity.score, index),
                    duration: task_duration(complexity.score, index, context),
                    priority: task_priority(branch.priority, index),
                    prerequisites: prev_id.iter().cloned().collect(),
                    status: TaskStatus::Pending,
                    generated: true,
                    learning_outcome: format!("Progress in {}", branch.name),
                    domain_focus: branch.domain_focus.clone(),
                });
                prev_id = Some(id);
            }
        }
        nodes
    }

    /// Append additional eligible tasks to a depleted frontier, continuing
    /// each branch's numbering. New tasks carry no prerequisites so they
    /// are selectable immediately.
    pub fn materialize_additional(tree: &HtaTree, per_branch: usize) -> Vec<FrontierNode> {
        let mut nodes = Vec::new();
        for branch in &tree.strategic_branches {
            let existing = tree
                .frontier_nodes
                .iter()
                .chain(&tree.completed_nodes)
                .filter(|n| n.branch == branch.name)
                .count();
            let clean = clean_branch_name(&branch.name, &tree.goal);
            let slug = slugify(&branch.name);
            let context = DurationContext::derive(branch.focus, false);

            for offset in 0..per_branch {
                let index = existing + offset;
                nodes.push(FrontierNode {
                    id: format!("{slug}-{:02}", index + 1),
                    title: format!("Advanced {} ({})", clean, index + 1),
                    description: format!("Continued work in {}", branch.name),
                    branch: branch.name.clone(),
                    difficulty: task_difficulty(tree.complexity.score, index),
                    duration: task_duration(tree.complexity.score, index, context),
                    priority: task_priority(branch.priority, index),
                    prerequisites: Vec::new(),
                    status: TaskStatus::Pending,
                    generated: true,
                    learning_outcome: format!("Progress in {}", branch.name),
                    domain_focus: branch.domain_focus.clone(),
                });
            }
        }
        nodes
    }

    /// Build a complete tree from the accumulated onboarding context.
    pub async fn build_tree(&self, context: &AggregateContext) -> ForestResult<HtaTree> {
        if context.goal.trim().is_empty() {
            return Err(ForestError::Validation("goal is empty".into()));
        }

        let level1 = match &context.complexity {
            // Complexity already analyzed by the onboarding gate; reuse it
            // but still run level 1 for boundaries if absent.
            Some(complexity) => GoalContextAnalysis {
                complexity: complexity.clone(),
                domain_boundaries: Vec::new(),
                recommended_strategy: "balanced".to_string(),
                raw: json!({
                    "goal_analysis": {
                        "goal_complexity": complexity.score,
                        "complexity_factors": complexity.factors,
                    },
                    "learning_approach": {"recommended_strategy": "balanced"},
                    "domain_boundaries": [],
                }),
            },
            None => self.analyze_goal_context(context).await?,
        };

        let (branches, level2_raw, method) = self.generate_branches(context, &level1).await;

        let characteristics = analyze(&context.goal);
        let experience = experience_from_profile(&context.user_profile);
        let mut complexity = level1.complexity.clone();
        complexity.recommended_depth =
            goal_analysis::max_useful_depth(&characteristics, experience);

        let urgency_high = context
            .constraints
            .get("urgency")
            .is_some_and(|u| u.eq_ignore_ascii_case("high"));

        let mut tree = HtaTree::new(
            context.goal.clone(),
            context.context.clone(),
            complexity.clone(),
            method,
        );
        tree.domain_boundaries = if level1.domain_boundaries.is_empty() {
            characteristics.tokens.clone()
        } else {
            level1.domain_boundaries.clone()
        };
        tree.strategic_branches = branches;
        tree.frontier_nodes = Self::materialize_frontier(
            &context.goal,
            &complexity,
            &tree.strategic_branches,
            urgency_high,
        );
        tree.set_level_slice(1, level1.raw);
        tree.set_level_slice(2, level2_raw);
        tree.validate()?;
        Ok(tree)
    }

    /// Generate the missing level slices up to `target_depth`, scoped to
    /// one branch when given. Already-materialized levels are untouched.
    pub async fn expand(
        &self,
        tree: &mut HtaTree,
        target_depth: u8,
        branch: Option<&str>,
    ) -> ForestResult<()> {
        let target = target_depth.min(tree.max_depth);
        if let Some(name) = branch {
            if !tree.strategic_branches.iter().any(|b| b.name == name) {
                return Err(ForestError::Validation(format!(
                    "unknown branch '{name}'"
                )));
            }
        }

        for level in 3..=target {
            if tree.level_slice(level).is_some() {
                continue;
            }
            if tree.level_slice(level - 1).is_none() {
                break;
            }
            let scope = branch.unwrap_or("all branches");
            let prompt = format!(
                "Goal: {}\nScope: {scope}\nPrior level output: {}\nGenerate level {level}.",
                tree.goal,
                tree.level_slice(level - 1).cloned().unwrap_or(Value::Null),
            );
            let slice = self.request_level(level, prompt).await?;
            tree.set_level_slice(level, json!({"scope": scope, "output": slice}));
        }
        Ok(())
    }

    /// Score a user topic against the tree's domain boundaries.
    pub async fn exploration_relevance(
        &self,
        topic: &str,
        tree: &HtaTree,
        project_id: &str,
        vectors: &dyn VectorIndex,
        embedder: &dyn EmbeddingService,
    ) -> Relevance {
        let topic_tokens = goal_analysis::tokenize(topic);
        let boundary_tokens: Vec<String> = tree
            .domain_boundaries
            .iter()
            .flat_map(|b| goal_analysis::tokenize(b))
            .collect();
        #[allow(clippy::cast_precision_loss)]
        let overlap = if topic_tokens.is_empty() {
            0.0
        } else {
            topic_tokens
                .iter()
                .filter(|t| boundary_tokens.contains(t))
                .count() as f32
                / topic_tokens.len() as f32
        };

        let semantic = match embedder.embed(topic).await {
            Ok(vector) => {
                let mut filter = std::collections::BTreeMap::new();
                filter.insert("project".to_string(), project_id.to_string());
                filter.insert("type".to_string(), "branch".to_string());
                match vectors
                    .query(
                        &vector,
                        VectorQueryOptions {
                            k: 3,
                            threshold: None,
                            filter,
                        },
                    )
                    .await
                {
                    Ok(hits) => hits.first().map(|h| h.score),
                    Err(e) => {
                        tracing::debug!(error = %e, "relevance check degrading to keyword overlap");
                        None
                    }
                }
            }
            Err(_) => None,
        };

        let score = match semantic {
            Some(similarity) => 0.6 * similarity + 0.4 * overlap,
            None => overlap,
        };
        let class = if score >= 0.6 {
            RelevanceClass::InScope
        } else if score >= 0.3 {
            RelevanceClass::Adjacent
        } else {
            RelevanceClass::OffTopic
        };
        Relevance { score, class }
    }
}

fn experience_from_profile(
    profile: &std::collections::BTreeMap<String, String>,
) -> Option<ExperienceLevel> {
    let blob = profile
        .values()
        .map(String::as_str)
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase();
    if blob.contains("beginner") || blob.contains("never") || blob.contains("new to") {
        Some(ExperienceLevel::Beginner)
    } else if blob.contains("expert") || blob.contains("professional") {
        Some(ExperienceLevel::Expert)
    } else if blob.is_empty() {
        None
    } else {
        Some(ExperienceLevel::Intermediate)
    }
}

fn string_array(value: Option<&Value>) -> Vec<String> {
    value
        .and_then(Value::as_array)
        .map(|a| {
            a.iter()
                .filter_map(Value::as_str)
                .map(ToString::to_string)
                .collect()
        })
        .unwrap_or_default()
}
