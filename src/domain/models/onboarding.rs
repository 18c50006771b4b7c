//! Gated onboarding state.
//!
//! Seven stages, each fronted by a gate that must be `passed` before the
//! next stage may start. The stages accumulate the context snowball the
//! HTA engine consumes for level-1/level-2 generation.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::models::hta::Complexity;

/// Onboarding stages, in gate order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OnboardingStage {
    GoalCapture,
    ContextGathering,
    Questionnaire,
    ComplexityAnalysis,
    HtaGeneration,
    StrategicFramework,
    Completed,
}

impl OnboardingStage {
    /// All stages in order, the terminal `Completed` last.
    pub const ORDER: [OnboardingStage; 7] = [
        Self::GoalCapture,
        Self::ContextGathering,
        Self::Questionnaire,
        Self::ComplexityAnalysis,
        Self::HtaGeneration,
        Self::StrategicFramework,
        Self::Completed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::GoalCapture => "goal_capture",
            Self::ContextGathering => "context_gathering",
            Self::Questionnaire => "questionnaire",
            Self::ComplexityAnalysis => "complexity_analysis",
            Self::HtaGeneration => "hta_generation",
            Self::StrategicFramework => "strategic_framework",
            Self::Completed => "completed",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "goal_capture" => Some(Self::GoalCapture),
            "context_gathering" => Some(Self::ContextGathering),
            "questionnaire" => Some(Self::Questionnaire),
            "complexity_analysis" => Some(Self::ComplexityAnalysis),
            "hta_generation" => Some(Self::HtaGeneration),
            "strategic_framework" => Some(Self::StrategicFramework),
            "completed" => Some(Self::Completed),
            _ => None,
        }
    }

    /// Position in the gate order.
    pub fn index(&self) -> usize {
        Self::ORDER.iter().position(|s| s == self).unwrap_or(0)
    }

    /// The stage after this one, if any.
    pub fn next(&self) -> Option<Self> {
        Self::ORDER.get(self.index() + 1).copied()
    }
}

/// Gate state for one stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GateStatus {
    Locked,
    InProgress,
    Passed,
    Blocked,
}

impl GateStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Locked => "locked",
            Self::InProgress => "in_progress",
            Self::Passed => "passed",
            Self::Blocked => "blocked",
        }
    }
}

/// One gate in the progression.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Gate {
    pub name: OnboardingStage,
    pub status: GateStatus,
    /// Remediation hint recorded when the gate blocks.
    #[serde(default)]
    pub suggestion: Option<String>,
}

/// A generated questionnaire entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Question {
    pub id: String,
    pub prompt: String,
    /// Context field the answer feeds.
    pub target_field: String,
}

/// The context snowball consumed by the HTA engine.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AggregateContext {
    #[serde(default)]
    pub goal: String,
    #[serde(default)]
    pub context: String,
    /// Free-text profile fields (background, learning style, skills...).
    #[serde(default)]
    pub user_profile: BTreeMap<String, String>,
    #[serde(default)]
    pub complexity: Option<Complexity>,
    #[serde(default)]
    pub focus_areas: Vec<String>,
    #[serde(default)]
    pub constraints: BTreeMap<String, String>,
}

impl AggregateContext {
    /// Flattened prose rendering handed to the engine prompts.
    pub fn render(&self) -> String {
        let mut out = format!("Goal: {}", self.goal);
        if !self.context.is_empty() {
            out.push_str(&format!("\nContext: {}", self.context));
        }
        for (key, value) in &self.user_profile {
            out.push_str(&format!("\n{key}: {value}"));
        }
        for (key, value) in &self.constraints {
            out.push_str(&format!("\nConstraint {key}: {value}"));
        }
        if !self.focus_areas.is_empty() {
            out.push_str(&format!("\nFocus areas: {}", self.focus_areas.join(", ")));
        }
        out
    }
}

/// Durable onboarding record, one per project.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OnboardingState {
    pub project_id: String,
    pub current_stage: OnboardingStage,
    pub gates: Vec<Gate>,
    pub aggregate_context: AggregateContext,
    #[serde(default)]
    pub question_queue: Vec<Question>,
    #[serde(default)]
    pub answers: BTreeMap<String, String>,
    pub created_at: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
}

impl OnboardingState {
    /// Fresh state: the first gate open, the rest locked.
    pub fn new(project_id: String) -> Self {
        let now = Utc::now();
        let gates = OnboardingStage::ORDER
            .iter()
            .map(|stage| Gate {
                name: *stage,
                status: if *stage == OnboardingStage::GoalCapture {
                    GateStatus::InProgress
                } else {
                    GateStatus::Locked
                },
                suggestion: None,
            })
            .collect();
        Self {
            project_id,
            current_stage: OnboardingStage::GoalCapture,
            gates,
            aggregate_context: AggregateContext::default(),
            question_queue: Vec::new(),
            answers: BTreeMap::new(),
            created_at: now,
            last_updated: now,
        }
    }

    pub fn gate(&self, stage: OnboardingStage) -> Option<&Gate> {
        self.gates.iter().find(|g| g.name == stage)
    }

    pub fn gate_mut(&mut self, stage: OnboardingStage) -> Option<&mut Gate> {
        self.gates.iter_mut().find(|g| g.name == stage)
    }

    /// A stage may be entered only when every earlier gate has passed.
    pub fn can_enter(&self, stage: OnboardingStage) -> bool {
        self.gates
            .iter()
            .take(stage.index())
            .all(|g| g.status == GateStatus::Passed)
    }

    /// Pass a gate and open the next stage. Re-passing an earlier gate
    /// never moves `current_stage` backwards.
    pub fn pass_gate(&mut self, stage: OnboardingStage) {
        if let Some(gate) = self.gate_mut(stage) {
            gate.status = GateStatus::Passed;
            gate.suggestion = None;
        }
        if let Some(next) = stage.next() {
            if let Some(gate) = self.gate_mut(next) {
                if gate.status == GateStatus::Locked {
                    // The terminal pseudo-stage has no work of its own.
                    gate.status = if next == OnboardingStage::Completed {
                        GateStatus::Passed
                    } else {
                        GateStatus::InProgress
                    };
                }
            }
            if next.index() > self.current_stage.index() {
                self.current_stage = next;
            }
        }
        self.last_updated = Utc::now();
    }

    /// Block a gate with a remediation suggestion. Never advances.
    pub fn block_gate(&mut self, stage: OnboardingStage, suggestion: String) {
        if let Some(gate) = self.gate_mut(stage) {
            gate.status = GateStatus::Blocked;
            gate.suggestion = Some(suggestion);
        }
        self.last_updated = Utc::now();
    }

    pub fn is_completed(&self) -> bool {
        self.current_stage == OnboardingStage::Completed
    }
}
