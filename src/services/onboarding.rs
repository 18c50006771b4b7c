//! Gated onboarding: the seven-stage progression that accumulates the
//! context snowball before a tree may be built.
//!
//! Each stage takes typed input and yields a gate status plus a next
//! action. A blocked gate records a remediation suggestion and never
//! silently advances; the snowballed `aggregate_context` is the sole
//! input the HTA engine sees for levels 1 and 2.

use std::sync::Arc;

use serde_json::{json, Value};

use crate::domain::error::{ForestError, ForestResult};
use crate::domain::models::onboarding::{
    GateStatus, OnboardingStage, OnboardingState, Question,
};
use crate::domain::ports::KvStore;
use crate::services::hta_store::HtaStore;
use crate::services::project::ProjectService;

pub const ONBOARDING_FILE: &str = "onboarding_state";

/// Context fields gathered during onboarding, in questionnaire order.
const CONTEXT_FIELDS: [&str; 8] = [
    "background",
    "constraints",
    "motivation",
    "timeline",
    "available_time",
    "budget",
    "learning_style",
    "current_skills",
];

/// Fields that land in the constraints map rather than the profile.
const CONSTRAINT_FIELDS: [&str; 4] = ["constraints", "timeline", "available_time", "budget"];

/// Minimum context fields for the gathering gate to pass.
const MIN_CONTEXT_FIELDS: usize = 2;

/// Result of driving one stage.
#[derive(Debug, Clone, PartialEq)]
pub struct StageOutcome {
    pub stage: OnboardingStage,
    pub gate_status: GateStatus,
    pub next_action: String,
    pub suggestion: Option<String>,
    pub payload: Value,
}

pub struct OnboardingService {
    kv: Arc<dyn KvStore>,
    projects: Arc<ProjectService>,
    hta_store: Arc<HtaStore>,
}

impl OnboardingService {
    pub fn new(
        kv: Arc<dyn KvStore>,
        projects: Arc<ProjectService>,
        hta_store: Arc<HtaStore>,
    ) -> Self {
        Self {
            kv,
            projects,
            hta_store,
        }
    }

    pub async fn load_state(&self, project_id: &str) -> ForestResult<Option<OnboardingState>> {
        match self.kv.load(project_id, None, ONBOARDING_FILE).await? {
            Some(doc) => serde_json::from_value(doc)
                .map(Some)
                .map_err(|e| ForestError::Storage(format!("onboarding state corrupt: {e}"))),
            None => Ok(None),
        }
    }

    /// Persist a state mutated outside the stage handlers (memory sync).
    pub async fn persist_state(&self, state: &OnboardingState) -> ForestResult<()> {
        self.save_state(state).await
    }

    async fn save_state(&self, state: &OnboardingState) -> ForestResult<()> {
        let doc = serde_json::to_value(state)
            .map_err(|e| ForestError::Storage(e.to_string()))?;
        self.kv
            .save(&state.project_id, None, ONBOARDING_FILE, &doc)
            .await
    }

    /// Enter the journey at `goal_capture`. Creates the project record when
    /// none is active and a goal is supplied.
    pub async fn start_journey(
        &self,
        project_id: Option<&str>,
        initial_goal: Option<&str>,
    ) -> ForestResult<StageOutcome> {
        let project_id = match project_id {
            Some(id) => id.to_string(),
            None => {
                let goal = initial_goal.ok_or_else(|| {
                    ForestError::Validation(
                        "starting a journey needs an active project or an initial_goal".into(),
                    )
                })?;
                self.projects
                    .create(goal.to_string(), String::new())
                    .await?
                    .id
            }
        };

        let mut state = match self.load_state(&project_id).await? {
            Some(existing) => existing,
            None => OnboardingState::new(project_id.clone()),
        };

        if state.is_completed() {
            self.save_state(&state).await?;
            return Ok(StageOutcome {
                stage: OnboardingStage::Completed,
                gate_status: GateStatus::Passed,
                next_action: "Onboarding already complete; use get_next_task_forest".into(),
                suggestion: None,
                payload: json!({}),
            });
        }

        if state
            .gate(OnboardingStage::GoalCapture)
            .is_some_and(|g| g.status == GateStatus::Passed)
        {
            let stage = state.current_stage;
            return Ok(StageOutcome {
                stage,
                gate_status: GateStatus::InProgress,
                next_action: format!("Journey already under way at {}", stage.as_str()),
                suggestion: None,
                payload: json!({"project_id": state.project_id}),
            });
        }

        let goal = match initial_goal {
            Some(g) => Some(g.to_string()),
            None => self.projects.get(&project_id).await?.map(|p| p.goal),
        };
        let outcome =
            self.handle_goal_capture(&mut state, &json!({"initial_goal": goal})).await;
        self.save_state(&state).await?;
        outcome
    }

    /// Advance the state machine. `stage` defaults to the current stage; a
    /// later stage is refused until every earlier gate has passed.
    pub async fn continue_stage(
        &self,
        project_id: &str,
        stage: Option<OnboardingStage>,
        input: &Value,
    ) -> ForestResult<StageOutcome> {
        let mut state = self
            .load_state(project_id)
            .await?
            .ok_or_else(|| ForestError::Validation(
                "no onboarding in progress; call start_learning_journey_forest first".into(),
            ))?;

        let stage = stage.unwrap_or(state.current_stage);
        if !state.can_enter(stage) {
            return Err(ForestError::GateBlocked {
                gate: stage.as_str().to_string(),
                reason: "earlier gates have not passed".to_string(),
            });
        }

        let outcome = match stage {
            OnboardingStage::GoalCapture => self.handle_goal_capture(&mut state, input).await,
            OnboardingStage::ContextGathering => {
                Ok(Self::handle_context_gathering(&mut state, input))
            }
            OnboardingStage::Questionnaire => Ok(Self::handle_questionnaire(&mut state, input)),
            OnboardingStage::ComplexityAnalysis => {
                self.handle_complexity_analysis(&mut state).await
            }
            OnboardingStage::HtaGeneration => self.handle_hta_generation(&mut state).await,
            OnboardingStage::StrategicFramework => {
                self.handle_strategic_framework(&mut state, input).await
            }
            OnboardingStage::Completed => Ok(StageOutcome {
                stage,
                gate_status: GateStatus::Passed,
                next_action: "Onboarding complete".into(),
                suggestion: None,
                payload: json!({}),
            }),
        }?;

        self.save_state(&state).await?;
        Ok(outcome)
    }

    /// Final confirmation: transitions `strategic_framework` to `completed`.
    pub async fn complete(
        &self,
        project_id: &str,
        final_confirmation: bool,
    ) -> ForestResult<StageOutcome> {
        self.continue_stage(
            project_id,
            Some(OnboardingStage::StrategicFramework),
            &json!({"confirm": final_confirmation}),
        )
        .await
    }

    pub async fn status(&self, project_id: &str) -> ForestResult<Value> {
        let Some(state) = self.load_state(project_id).await? else {
            return Ok(json!({"started": false}));
        };
        Ok(json!({
            "started": true,
            "current_stage": state.current_stage.as_str(),
            "gates": state.gates.iter().map(|g| json!({
                "name": g.name.as_str(),
                "status": g.status.as_str(),
                "suggestion": g.suggestion,
            })).collect::<Vec<_>>(),
            "questions_remaining": state.question_queue.len(),
            "aggregate_context": state.aggregate_context,
        }))
    }

    async fn handle_goal_capture(
        &self,
        state: &mut OnboardingState,
        input: &Value,
    ) -> ForestResult<StageOutcome> {
        let goal = input
            .get("initial_goal")
            .or_else(|| input.get("goal"))
            .and_then(Value::as_str)
            .unwrap_or_default()
            .trim()
            .to_string();

        if goal.is_empty() {
            let suggestion = "Provide a non-empty learning goal".to_string();
            state.block_gate(OnboardingStage::GoalCapture, suggestion.clone());
            return Ok(StageOutcome {
                stage: OnboardingStage::GoalCapture,
                gate_status: GateStatus::Blocked,
                next_action: "Re-run goal capture with a goal".into(),
                suggestion: Some(suggestion),
                payload: json!({}),
            });
        }

        state.aggregate_context.goal = goal.clone();
        // Keep the project record in sync with the captured goal.
        self.projects.touch(&state.project_id).await?;
        state.pass_gate(OnboardingStage::GoalCapture);
        Ok(StageOutcome {
            stage: OnboardingStage::GoalCapture,
            gate_status: GateStatus::Passed,
            next_action: "Continue with context_gathering".into(),
            suggestion: None,
            payload: json!({"goal": goal, "project_id": state.project_id}),
        })
    }

    fn handle_context_gathering(state: &mut OnboardingState, input: &Value) -> StageOutcome {
        let mut present = 0usize;
        for field in CONTEXT_FIELDS {
            let Some(value) = input.get(field).and_then(Value::as_str) else {
                continue;
            };
            let value = value.trim();
            if value.is_empty() {
                continue;
            }
            present += 1;
            if CONSTRAINT_FIELDS.contains(&field) {
                state
                    .aggregate_context
                    .constraints
                    .insert(field.to_string(), value.to_string());
            } else {
                state
                    .aggregate_context
                    .user_profile
                    .insert(field.to_string(), value.to_string());
            }
        }
        if let Some(context) = input.get("context").and_then(Value::as_str) {
            state.aggregate_context.context = context.to_string();
        }

        #[allow(clippy::cast_precision_loss)]
        let confidence = present as f64 / CONTEXT_FIELDS.len() as f64;
        let known = state.aggregate_context.user_profile.len()
            + state.aggregate_context.constraints.len();
        if known >= MIN_CONTEXT_FIELDS {
            state.pass_gate(OnboardingStage::ContextGathering);
            StageOutcome {
                stage: OnboardingStage::ContextGathering,
                gate_status: GateStatus::Passed,
                next_action: "Continue with questionnaire (action: start)".into(),
                suggestion: None,
                payload: json!({"confidence": confidence, "fields_known": known}),
            }
        } else {
            let missing: Vec<&str> = CONTEXT_FIELDS
                .iter()
                .filter(|f| {
                    !state.aggregate_context.user_profile.contains_key(**f)
                        && !state.aggregate_context.constraints.contains_key(**f)
                })
                .copied()
                .collect();
            let suggestion = format!(
                "Share at least {MIN_CONTEXT_FIELDS} context fields; still missing: {}",
                missing.join(", ")
            );
            state.block_gate(OnboardingStage::ContextGathering, suggestion.clone());
            StageOutcome {
                stage: OnboardingStage::ContextGathering,
                gate_status: GateStatus::Blocked,
                next_action: "Provide more context and retry".into(),
                suggestion: Some(suggestion),
                payload: json!({"confidence": confidence}),
            }
        }
    }

    fn generate_questions(state: &OnboardingState) -> Vec<Question> {
        CONTEXT_FIELDS
            .iter()
            .filter(|field| {
                !state.aggregate_context.user_profile.contains_key(**field)
                    && !state.aggregate_context.constraints.contains_key(**field)
            })
            .take(5)
            .enumerate()
            .map(|(index, field)| Question {
                id: format!("q{}", index + 1),
                prompt: match *field {
                    "background" => "What is your background with this goal so far?".into(),
                    "constraints" => "What constraints shape your learning (time, place, gear)?".into(),
                    "motivation" => "What is driving you toward this goal right now?".into(),
                    "timeline" => "When would you like to reach this goal?".into(),
                    "available_time" => "How much time can you give this per week?".into(),
                    "budget" => "Is there a budget for courses, gear or materials?".into(),
                    "learning_style" => "How do you learn best: reading, watching, or doing?".into(),
                    _ => "Which relevant skills do you already have?".into(),
                },
                target_field: (*field).to_string(),
            })
            .collect()
    }

    fn handle_questionnaire(state: &mut OnboardingState, input: &Value) -> StageOutcome {
        let action = input.get("action").and_then(Value::as_str).unwrap_or("");

        if action == "start" && state.question_queue.is_empty() && state.answers.is_empty() {
            state.question_queue = Self::generate_questions(state);
            if let Some(gate) = state.gate_mut(OnboardingStage::Questionnaire) {
                gate.status = GateStatus::InProgress;
            }
        }

        if let (Some(question_id), Some(answer)) = (
            input.get("question_id").and_then(Value::as_str),
            input.get("answer").and_then(Value::as_str),
        ) {
            if let Some(pos) = state.question_queue.iter().position(|q| q.id == question_id) {
                let question = state.question_queue.remove(pos);
                state
                    .answers
                    .insert(question.target_field.clone(), answer.to_string());
                if CONSTRAINT_FIELDS.contains(&question.target_field.as_str()) {
                    state
                        .aggregate_context
                        .constraints
                        .insert(question.target_field, answer.to_string());
                } else {
                    state
                        .aggregate_context
                        .user_profile
                        .insert(question.target_field, answer.to_string());
                }
            }
        }

        if state.question_queue.is_empty() && (action == "start" || !state.answers.is_empty()) {
            state.pass_gate(OnboardingStage::Questionnaire);
            return StageOutcome {
                stage: OnboardingStage::Questionnaire,
                gate_status: GateStatus::Passed,
                next_action: "Continue with complexity_analysis".into(),
                suggestion: None,
                payload: json!({"answers": state.answers}),
            };
        }

        let next = state.question_queue.first().cloned();
        StageOutcome {
            stage: OnboardingStage::Questionnaire,
            gate_status: GateStatus::InProgress,
            next_action: "Answer the next question".into(),
            suggestion: None,
            payload: json!({
                "question": next,
                "remaining": state.question_queue.len(),
            }),
        }
    }

    async fn handle_complexity_analysis(
        &self,
        state: &mut OnboardingState,
    ) -> ForestResult<StageOutcome> {
        match self
            .hta_store
            .engine()
            .analyze_goal_context(&state.aggregate_context)
            .await
        {
            Ok(analysis) => {
                state.aggregate_context.complexity = Some(analysis.complexity.clone());
                state.aggregate_context.focus_areas = analysis.domain_boundaries.clone();
                state.pass_gate(OnboardingStage::ComplexityAnalysis);
                Ok(StageOutcome {
                    stage: OnboardingStage::ComplexityAnalysis,
                    gate_status: GateStatus::Passed,
                    next_action: "Continue with hta_generation".into(),
                    suggestion: None,
                    payload: json!({
                        "complexity": analysis.complexity,
                        "domain_boundaries": analysis.domain_boundaries,
                        "recommended_strategy": analysis.recommended_strategy,
                    }),
                })
            }
            Err(e) if e.is_recoverable() => {
                let suggestion =
                    format!("Complexity analysis could not complete ({}); retry this stage", e.tag());
                state.block_gate(OnboardingStage::ComplexityAnalysis, suggestion.clone());
                Ok(StageOutcome {
                    stage: OnboardingStage::ComplexityAnalysis,
                    gate_status: GateStatus::Blocked,
                    next_action: "Retry complexity_analysis".into(),
                    suggestion: Some(suggestion),
                    payload: json!({}),
                })
            }
            Err(e) => Err(e),
        }
    }

    async fn handle_hta_generation(
        &self,
        state: &mut OnboardingState,
    ) -> ForestResult<StageOutcome> {
        let path = self
            .projects
            .get(&state.project_id)
            .await?
            .map_or_else(|| "general".to_string(), |p| p.active_path);

        let result = self
            .hta_store
            .build(&state.project_id, &path, &state.aggregate_context)
            .await?;

        if result.tree.strategic_branches.is_empty() || result.tree.frontier_nodes.is_empty() {
            let suggestion = "Tree generation produced no branches or tasks; retry".to_string();
            state.block_gate(OnboardingStage::HtaGeneration, suggestion.clone());
            return Ok(StageOutcome {
                stage: OnboardingStage::HtaGeneration,
                gate_status: GateStatus::Blocked,
                next_action: "Retry hta_generation".into(),
                suggestion: Some(suggestion),
                payload: json!({}),
            });
        }

        state.pass_gate(OnboardingStage::HtaGeneration);
        Ok(StageOutcome {
            stage: OnboardingStage::HtaGeneration,
            gate_status: GateStatus::Passed,
            next_action: "Review the strategic framework and confirm".into(),
            suggestion: None,
            payload: result.tree.summary(),
        })
    }

    async fn handle_strategic_framework(
        &self,
        state: &mut OnboardingState,
        input: &Value,
    ) -> ForestResult<StageOutcome> {
        let path = self
            .projects
            .get(&state.project_id)
            .await?
            .map_or_else(|| "general".to_string(), |p| p.active_path);
        let tree = self.hta_store.load(&state.project_id, &path).await?;

        let plan: Vec<Value> = tree
            .as_ref()
            .map(|t| {
                t.strategic_branches
                    .iter()
                    .map(|b| {
                        json!({
                            "branch": b.name,
                            "focus": b.focus.as_str(),
                            "first_moves": t.frontier_nodes.iter()
                                .filter(|n| n.branch == b.name)
                                .take(2)
                                .map(|n| n.title.clone())
                                .collect::<Vec<_>>(),
                        })
                    })
                    .collect()
            })
            .unwrap_or_default();

        let confirmed = input
            .get("confirm")
            .or_else(|| input.get("final_confirmation"))
            .and_then(Value::as_bool)
            .unwrap_or(false);

        if confirmed {
            state.pass_gate(OnboardingStage::StrategicFramework);
            Ok(StageOutcome {
                stage: OnboardingStage::StrategicFramework,
                gate_status: GateStatus::Passed,
                next_action: "Onboarding complete; use get_next_task_forest".into(),
                suggestion: None,
                payload: json!({"plan_of_attack": plan}),
            })
        } else {
            Ok(StageOutcome {
                stage: OnboardingStage::StrategicFramework,
                gate_status: GateStatus::InProgress,
                next_action: "Confirm the plan with complete_onboarding_forest".into(),
                suggestion: None,
                payload: json!({"plan_of_attack": plan}),
            })
        }
    }
}
