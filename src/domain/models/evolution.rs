//! Strategy evolution outcomes.
//!
//! Every mutation the evolver applies to a tree maps to one tagged variant
//! with its payload, so callers can report exactly what changed.

use serde::{Deserialize, Serialize};

/// A completed block as reported by the client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionReport {
    pub block_id: String,
    pub outcome: String,
    /// Reported energy after the block, in [1, 5].
    pub energy_level: u8,
    #[serde(default)]
    pub learned: String,
    #[serde(default)]
    pub difficulty_rating: u8,
    #[serde(default)]
    pub breakthrough: bool,
}

/// Tagged evolution applied to a tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Evolution {
    /// Recent events cluster on dominant themes: prune drifted branches,
    /// boost matching tasks.
    ConvergenceRefinement {
        dominant_domains: Vec<String>,
        pruned_branches: Vec<String>,
        boosted_tasks: Vec<String>,
    },
    /// High variance or confusion: inject discovery tasks, ease difficulty.
    UncertaintyExpansion {
        injected_tasks: Vec<String>,
        difficulty_delta: i8,
    },
    /// An explicit hint marked a branch irrelevant.
    BranchPruning { branch: String },
    /// An explore hint added a branch from a refined goal prompt.
    DiscoveryEnhancement { branch: String, task_count: usize },
    /// The user changed direction: the old tree is archived, a new one built.
    GoalRewrite {
        new_goal: String,
        archived_frontier_count: usize,
    },
}

impl Evolution {
    pub fn tag(&self) -> &'static str {
        match self {
            Self::ConvergenceRefinement { .. } => "convergence_refinement",
            Self::UncertaintyExpansion { .. } => "uncertainty_expansion",
            Self::BranchPruning { .. } => "branch_pruning",
            Self::DiscoveryEnhancement { .. } => "discovery_enhancement",
            Self::GoalRewrite { .. } => "goal_rewrite",
        }
    }
}
