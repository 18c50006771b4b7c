//! Typed tool requests.
//!
//! Raw argument maps from the wire are parsed into these structs at the
//! router boundary; components never see opaque dictionaries. Missing
//! required keys produce one `ValidationError` naming all of them.

use serde_json::Value;

use crate::domain::error::{ForestError, ForestResult};
use crate::domain::models::evolution::CompletionReport;
use crate::domain::models::onboarding::OnboardingStage;
use crate::domain::models::selection::{parse_time_available, SelectionCriteria};

/// Check the per-tool required keys, naming every missing one at once.
pub fn check_required(args: &Value, required: &[&str]) -> ForestResult<()> {
    let missing: Vec<&str> = required
        .iter()
        .filter(|key| args.get(**key).is_none())
        .copied()
        .collect();
    if missing.is_empty() {
        Ok(())
    } else {
        Err(ForestError::Validation(format!(
            "missing required keys: {}",
            missing.join(", ")
        )))
    }
}

fn str_arg(args: &Value, key: &str) -> Option<String> {
    args.get(key)
        .and_then(Value::as_str)
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

#[derive(Debug, Clone, PartialEq)]
pub struct CreateProjectRequest {
    pub goal: String,
    pub context: String,
}

impl CreateProjectRequest {
    pub fn from_args(args: &Value) -> ForestResult<Self> {
        check_required(args, &["goal"])?;
        let goal = str_arg(args, "goal")
            .ok_or_else(|| ForestError::Validation("goal must be a non-empty string".into()))?;
        Ok(Self {
            goal,
            context: str_arg(args, "context").unwrap_or_default(),
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SwitchProjectRequest {
    pub project_id: String,
}

impl SwitchProjectRequest {
    pub fn from_args(args: &Value) -> ForestResult<Self> {
        check_required(args, &["project_id"])?;
        let project_id = str_arg(args, "project_id").ok_or_else(|| {
            ForestError::Validation("project_id must be a non-empty string".into())
        })?;
        Ok(Self { project_id })
    }
}

/// `complete_block_forest` arguments.
pub fn completion_from_args(args: &Value) -> ForestResult<CompletionReport> {
    check_required(args, &["block_id", "outcome", "energy_level"])?;
    let block_id = str_arg(args, "block_id")
        .ok_or_else(|| ForestError::Validation("block_id must be a non-empty string".into()))?;
    let outcome = args
        .get("outcome")
        .and_then(Value::as_str)
        .ok_or_else(|| ForestError::Validation("outcome must be a string".into()))?
        .to_string();
    let energy_level = args
        .get("energy_level")
        .and_then(Value::as_u64)
        .ok_or_else(|| ForestError::Validation("energy_level must be a number".into()))?;
    let energy_level = u8::try_from(energy_level.clamp(1, 5)).unwrap_or(3);

    Ok(CompletionReport {
        block_id,
        outcome,
        energy_level,
        learned: str_arg(args, "learned").unwrap_or_default(),
        difficulty_rating: args
            .get("difficulty_rating")
            .and_then(Value::as_u64)
            .map_or(0, |d| u8::try_from(d.min(5)).unwrap_or(5)),
        breakthrough: args
            .get("breakthrough")
            .and_then(Value::as_bool)
            .unwrap_or(false),
    })
}

/// Selection criteria for `get_next_task_forest` and the pipeline tools.
pub fn criteria_from_args(args: &Value) -> SelectionCriteria {
    let energy_level = args
        .get("energy_level")
        .and_then(Value::as_u64)
        .map_or(3, |e| u8::try_from(e.clamp(1, 5)).unwrap_or(3));
    let time_available = args
        .get("time_available")
        .and_then(parse_time_available)
        .unwrap_or(30);
    SelectionCriteria {
        energy_level,
        time_available,
        focus_area: str_arg(args, "focus_area"),
        complexity: args
            .get("complexity")
            .and_then(Value::as_u64)
            .and_then(|c| u8::try_from(c).ok()),
        semantic_query: str_arg(args, "semantic_query")
            .or_else(|| str_arg(args, "context")),
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ContinueOnboardingRequest {
    pub stage: Option<OnboardingStage>,
    pub input: Value,
}

impl ContinueOnboardingRequest {
    pub fn from_args(args: &Value) -> ForestResult<Self> {
        let stage = match args.get("stage").and_then(Value::as_str) {
            Some(raw) => Some(OnboardingStage::from_str(raw).ok_or_else(|| {
                ForestError::Validation(format!("unknown onboarding stage '{raw}'"))
            })?),
            None => None,
        };
        let input = args
            .get("input_data")
            .cloned()
            .unwrap_or_else(|| args.clone());
        Ok(Self { stage, input })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FactoryResetRequest {
    pub confirm_deletion: bool,
    pub confirmation_message: String,
    /// Reset one project when set, everything otherwise.
    pub project_id: Option<String>,
}

impl FactoryResetRequest {
    pub fn from_args(args: &Value) -> ForestResult<Self> {
        check_required(args, &["confirm_deletion", "confirmation_message"])?;
        let confirm_deletion = args
            .get("confirm_deletion")
            .and_then(Value::as_bool)
            .ok_or_else(|| {
                ForestError::Validation("confirm_deletion must be a boolean".into())
            })?;
        let confirmation_message = args
            .get("confirmation_message")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        if confirmation_message.chars().count() < 10 {
            return Err(ForestError::Validation(
                "confirmation_message must be at least 10 characters".into(),
            ));
        }
        Ok(Self {
            confirm_deletion,
            confirmation_message,
            project_id: str_arg(args, "project_id"),
        })
    }
}
