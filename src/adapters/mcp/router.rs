//! Tool router: validates arguments, enforces the landing-page gate and
//! the read-only flag, and dispatches to the owning component.
//!
//! The router is a thin façade: every piece of business logic lives in
//! the services it fans out to.

use std::sync::Arc;

use serde_json::{json, Value};

use crate::domain::error::{ForestError, ForestResult};
use crate::domain::models::onboarding::AggregateContext;
use crate::domain::ports::KvStore;
use crate::services::evolution::StrategyEvolver;
use crate::services::hta_store::HtaStore;
use crate::services::memory_sync::MemorySync;
use crate::services::onboarding::OnboardingService;
use crate::services::pipeline::{PipelinePresenter, DEFAULT_WINDOW};
use crate::services::project::ProjectService;
use crate::services::session::Session;
use crate::services::supervisor::ExpansionAgent;
use crate::services::task_selector::TaskSelector;
use crate::services::IntelligenceBridge;

use super::requests::{
    check_required, completion_from_args, criteria_from_args, ContinueOnboardingRequest,
    CreateProjectRequest, FactoryResetRequest, SwitchProjectRequest,
};

/// Tool descriptor: name, required keys, whether it mutates state.
struct ToolSpec {
    name: &'static str,
    required: &'static [&'static str],
    mutating: bool,
    description: &'static str,
}

/// The exhaustive tool table. Names are stable.
const TOOLS: &[ToolSpec] = &[
    ToolSpec { name: "create_project_forest", required: &["goal"], mutating: true,
        description: "Create a learning project and make it active." },
    ToolSpec { name: "switch_project_forest", required: &["project_id"], mutating: true,
        description: "Set the active project." },
    ToolSpec { name: "list_projects_forest", required: &[], mutating: false,
        description: "Enumerate projects." },
    ToolSpec { name: "get_active_project_forest", required: &[], mutating: false,
        description: "Return the active project, or an empty result." },
    ToolSpec { name: "build_hta_tree_forest", required: &[], mutating: true,
        description: "Build (or return) the active project's HTA tree." },
    ToolSpec { name: "get_hta_status_forest", required: &[], mutating: false,
        description: "Summarize the existing tree." },
    ToolSpec { name: "get_next_task_forest", required: &[], mutating: false,
        description: "Select the next task for the given energy and time." },
    ToolSpec { name: "complete_block_forest", required: &["block_id", "outcome", "energy_level"],
        mutating: true,
        description: "Retire a task, append a learning event, evolve the strategy." },
    ToolSpec { name: "evolve_strategy_forest", required: &["hint"], mutating: true,
        description: "Evolve the tree from an explicit hint." },
    ToolSpec { name: "current_status_forest", required: &[], mutating: false,
        description: "Aggregate progress summary." },
    ToolSpec { name: "sync_forest_memory_forest", required: &[], mutating: true,
        description: "Replay learning events into the accumulated context." },
    ToolSpec { name: "start_learning_journey_forest", required: &[], mutating: true,
        description: "Enter gated onboarding at goal capture." },
    ToolSpec { name: "continue_onboarding_forest", required: &[], mutating: true,
        description: "Advance the onboarding state machine." },
    ToolSpec { name: "get_onboarding_status_forest", required: &[], mutating: false,
        description: "Read the onboarding gates." },
    ToolSpec { name: "complete_onboarding_forest", required: &["final_confirmation"],
        mutating: true,
        description: "Confirm the strategic framework and finish onboarding." },
    ToolSpec { name: "get_next_pipeline_forest", required: &[], mutating: false,
        description: "Present an ordered window of upcoming tasks." },
    ToolSpec { name: "evolve_pipeline_forest", required: &[], mutating: true,
        description: "Evolve the strategy with pipeline focus and refresh the window." },
    ToolSpec { name: "factory_reset_forest", required: &["confirm_deletion", "confirmation_message"],
        mutating: true,
        description: "Delete one project, or all of them." },
    ToolSpec { name: "get_landing_page_forest", required: &[], mutating: false,
        description: "Show the getting-started landing page." },
    ToolSpec { name: "debug_cache_forest", required: &[], mutating: false,
        description: "Diagnostic: cache and index counters." },
    ToolSpec { name: "emergency_clear_cache_forest", required: &[], mutating: true,
        description: "Diagnostic: drop the document cache." },
];

/// Tools that satisfy the landing gate on the first call of a process.
const LANDING_WHITELIST: &[&str] = &[
    "get_landing_page_forest",
    "list_projects_forest",
    "get_active_project_forest",
    "get_onboarding_status_forest",
    "current_status_forest",
];

pub struct ToolRouter {
    session: Arc<Session>,
    kv: Arc<dyn KvStore>,
    projects: Arc<ProjectService>,
    onboarding: Arc<OnboardingService>,
    hta_store: Arc<HtaStore>,
    selector: Arc<TaskSelector>,
    presenter: Arc<PipelinePresenter>,
    evolver: Arc<StrategyEvolver>,
    memory_sync: Arc<MemorySync>,
    bridge: Arc<IntelligenceBridge>,
    expansion: Arc<ExpansionAgent>,
}

impl ToolRouter {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        session: Arc<Session>,
        kv: Arc<dyn KvStore>,
        projects: Arc<ProjectService>,
        onboarding: Arc<OnboardingService>,
        hta_store: Arc<HtaStore>,
        selector: Arc<TaskSelector>,
        presenter: Arc<PipelinePresenter>,
        evolver: Arc<StrategyEvolver>,
        memory_sync: Arc<MemorySync>,
        bridge: Arc<IntelligenceBridge>,
        expansion: Arc<ExpansionAgent>,
    ) -> Self {
        Self {
            session,
            kv,
            projects,
            onboarding,
            hta_store,
            selector,
            presenter,
            evolver,
            memory_sync,
            bridge,
            expansion,
        }
    }

    /// Tool descriptors for `tools/list`.
    pub fn tool_list(&self) -> Value {
        let tools: Vec<Value> = TOOLS
            .iter()
            .map(|spec| {
                json!({
                    "name": spec.name,
                    "description": spec.description,
                    "inputSchema": {
                        "type": "object",
                        "required": spec.required,
                    },
                })
            })
            .collect();
        json!({ "tools": tools })
    }

    /// Validate and dispatch one tool call. The landing page is injected
    /// ahead of the payload on the first non-whitelisted call.
    pub async fn dispatch(&self, tool: &str, args: &Value) -> ForestResult<Value> {
        let spec = TOOLS
            .iter()
            .find(|spec| spec.name == tool)
            .ok_or_else(|| ForestError::UnknownTool(tool.to_string()))?;

        check_required(args, spec.required)?;
        if spec.mutating && self.session.read_only() {
            return Err(ForestError::ReadOnly(tool.to_string()));
        }

        let inject_landing =
            !LANDING_WHITELIST.contains(&tool) && self.session.take_landing_pending();

        let result = self.run_tool(tool, args).await?;
        if inject_landing {
            Ok(json!({
                "landing_page": Self::landing_payload(),
                "result": result,
            }))
        } else {
            Ok(result)
        }
    }

    async fn run_tool(&self, tool: &str, args: &Value) -> ForestResult<Value> {
        match tool {
            "create_project_forest" => self.create_project(args).await,
            "switch_project_forest" => self.switch_project(args).await,
            "list_projects_forest" => self.list_projects().await,
            "get_active_project_forest" => self.get_active_project().await,
            "build_hta_tree_forest" => self.build_tree(args).await,
            "get_hta_status_forest" => self.hta_status().await,
            "get_next_task_forest" => self.next_task(args).await,
            "complete_block_forest" => self.complete_block(args).await,
            "evolve_strategy_forest" => self.evolve_strategy(args).await,
            "current_status_forest" => self.current_status().await,
            "sync_forest_memory_forest" => self.sync_memory().await,
            "start_learning_journey_forest" => self.start_journey(args).await,
            "continue_onboarding_forest" => self.continue_onboarding(args).await,
            "get_onboarding_status_forest" => self.onboarding_status().await,
            "complete_onboarding_forest" => self.complete_onboarding(args).await,
            "get_next_pipeline_forest" => self.next_pipeline(args).await,
            "evolve_pipeline_forest" => self.evolve_pipeline(args).await,
            "factory_reset_forest" => self.factory_reset(args).await,
            "get_landing_page_forest" => Ok(Self::landing_payload()),
            "debug_cache_forest" => self.debug_cache().await,
            "emergency_clear_cache_forest" => self.clear_cache().await,
            _ => Err(ForestError::UnknownTool(tool.to_string())),
        }
    }

    fn landing_payload() -> Value {
        json!({
            "title": "Forest",
            "message": "Turn an open-ended goal into a living learning plan.",
            "getting_started": [
                "create_project_forest { goal } to plant a project",
                "start_learning_journey_forest to begin onboarding",
                "continue_onboarding_forest to work through the gates",
                "get_next_task_forest when the tree is built",
            ],
        })
    }

    /// The active project id plus its learning path, for tools that need
    /// one.
    async fn require_active(&self) -> ForestResult<(String, String)> {
        let project_id = match self.session.active_project().await {
            Some(id) => id,
            None => {
                // Fall back to the persisted pointer (fresh process).
                let persisted = self.projects.active_project_id().await?;
                match persisted {
                    Some(id) => {
                        self.session.set_active_project(Some(id.clone())).await;
                        id
                    }
                    None => return Err(ForestError::NoActiveProject),
                }
            }
        };
        let path = self
            .projects
            .get(&project_id)
            .await?
            .map_or_else(|| "general".to_string(), |p| p.active_path);
        Ok((project_id, path))
    }

    async fn create_project(&self, args: &Value) -> ForestResult<Value> {
        let request = CreateProjectRequest::from_args(args)?;
        let project = self.projects.create(request.goal, request.context).await?;
        self.session
            .set_active_project(Some(project.id.clone()))
            .await;
        Ok(json!({
            "project_id": project.id,
            "goal": project.goal,
            "active_path": project.active_path,
        }))
    }

    async fn switch_project(&self, args: &Value) -> ForestResult<Value> {
        let request = SwitchProjectRequest::from_args(args)?;
        let project = self.projects.switch(&request.project_id).await?;
        self.session
            .set_active_project(Some(project.id.clone()))
            .await;
        Ok(json!({"project_id": project.id, "goal": project.goal}))
    }

    async fn list_projects(&self) -> ForestResult<Value> {
        let projects = self.projects.list().await?;
        let count = projects.len();
        Ok(json!({"projects": projects, "count": count}))
    }

    async fn get_active_project(&self) -> ForestResult<Value> {
        match self.require_active().await {
            Ok((project_id, _)) => {
                let project = self.projects.get(&project_id).await?;
                Ok(json!({"active_project": project}))
            }
            Err(ForestError::NoActiveProject) => Ok(json!({"active_project": Value::Null})),
            Err(e) => Err(e),
        }
    }

    /// Aggregate context for building: the onboarding snowball when it
    /// exists, a minimal goal context otherwise.
    async fn build_context(&self, project_id: &str) -> ForestResult<AggregateContext> {
        if let Some(state) = self.onboarding.load_state(project_id).await? {
            if !state.aggregate_context.goal.is_empty() {
                return Ok(state.aggregate_context);
            }
        }
        let project = self
            .projects
            .get(project_id)
            .await?
            .ok_or(ForestError::NoActiveProject)?;
        Ok(AggregateContext {
            goal: project.goal,
            context: project.context,
            ..Default::default()
        })
    }

    async fn build_tree(&self, args: &Value) -> ForestResult<Value> {
        let (project_id, path) = self.require_active().await?;

        // An existing tree plus a depth request means on-demand expansion
        // rather than a rebuild.
        if let Some(target_depth) = args.get("target_depth").and_then(Value::as_u64) {
            let target_depth = u8::try_from(target_depth.min(6)).unwrap_or(6);
            let branch = args.get("branch").and_then(Value::as_str);
            if let Some(tree) = self
                .hta_store
                .expand_depth(&project_id, &path, target_depth, branch)
                .await?
            {
                let mut summary = tree.summary();
                summary["expanded"] = json!(true);
                return Ok(summary);
            }
        }

        let context = self.build_context(&project_id).await?;
        let result = self.hta_store.build(&project_id, &path, &context).await?;
        if result.created {
            Ok(json!({
                "built": true,
                "degraded_vectors": result.degraded,
                "tree": result.tree.summary(),
            }))
        } else {
            Ok(HtaStore::existing_tree_response(&result.tree))
        }
    }

    async fn hta_status(&self) -> ForestResult<Value> {
        let (project_id, path) = self.require_active().await?;
        let Some(tree) = self.hta_store.load(&project_id, &path).await? else {
            return Ok(json!({
                "exists": false,
                "message": "No tree yet; run build_hta_tree_forest",
            }));
        };
        let mut status = tree.summary();
        status["exists"] = json!(true);
        status["eligible_frontier"] = json!(tree.eligible_frontier().len());
        if let Ok(stats) = self.hta_store.vectors().stats().await {
            status["vector_stats"] = json!(stats);
        }
        Ok(status)
    }

    async fn next_task(&self, args: &Value) -> ForestResult<Value> {
        let (project_id, path) = self.require_active().await?;
        let criteria = criteria_from_args(args);
        let Some(tree) = self.hta_store.load(&project_id, &path).await? else {
            return Ok(json!({"task": Value::Null, "message": "no tree built yet"}));
        };
        let task = self.selector.select(&project_id, &tree, &criteria).await;
        Ok(match task {
            Some(task) => json!({"task": task}),
            None => json!({"task": Value::Null, "message": "no eligible task"}),
        })
    }

    async fn complete_block(&self, args: &Value) -> ForestResult<Value> {
        let (project_id, path) = self.require_active().await?;
        let report = completion_from_args(args)?;
        let outcome = self
            .evolver
            .handle_completion(&project_id, &path, &report)
            .await?;

        // Immediate frontier check, same as a tick of the expansion agent.
        if let Err(e) = self.expansion.tick().await {
            tracing::warn!(error = %e, "post-completion expansion check failed");
        }

        Ok(json!({
            "completed": outcome.task,
            "event": outcome.event,
            "breakthrough_level": outcome.breakthrough_level,
            "evolution": outcome.evolution,
        }))
    }

    async fn evolve_strategy(&self, args: &Value) -> ForestResult<Value> {
        let (project_id, path) = self.require_active().await?;
        let hint = args.get("hint").and_then(Value::as_str).unwrap_or_default();

        // Classify the hint against the tree's domain boundaries so the
        // caller can see how far afield it points.
        let relevance = match self.hta_store.load(&project_id, &path).await? {
            Some(tree) => Some(
                self.hta_store
                    .engine()
                    .exploration_relevance(
                        hint,
                        &tree,
                        &project_id,
                        self.hta_store.vectors().as_ref(),
                        self.hta_store.embedder().as_ref(),
                    )
                    .await,
            ),
            None => None,
        };

        let evolution = self
            .evolver
            .evolve(&project_id, &path, Some(hint), false)
            .await?;
        if let Err(e) = self.expansion.tick().await {
            tracing::warn!(error = %e, "post-evolution expansion check failed");
        }
        Ok(json!({
            "evolution": evolution,
            "hint_relevance": relevance.map(|r| json!({
                "score": r.score,
                "class": r.class.as_str(),
            })),
        }))
    }

    async fn current_status(&self) -> ForestResult<Value> {
        let (project_id, path) = match self.require_active().await {
            Ok(pair) => pair,
            Err(ForestError::NoActiveProject) => {
                return Ok(json!({"active_project": Value::Null}))
            }
            Err(e) => return Err(e),
        };
        let onboarding = self.onboarding.status(&project_id).await?;
        let tree = self.hta_store.load(&project_id, &path).await?;
        let history = self.hta_store.load_history(&project_id, &path).await?;
        Ok(json!({
            "active_project": project_id,
            "path": path,
            "onboarding": onboarding,
            "tree": tree.as_ref().map(crate::domain::models::hta::HtaTree::summary),
            "completions": history.events.len(),
        }))
    }

    async fn sync_memory(&self) -> ForestResult<Value> {
        let (project_id, path) = self.require_active().await?;
        self.memory_sync.sync(&project_id, &path).await
    }

    async fn start_journey(&self, args: &Value) -> ForestResult<Value> {
        let initial_goal = args
            .get("goal")
            .or_else(|| args.get("initial_goal"))
            .and_then(Value::as_str);
        let active = self.session.active_project().await;
        let outcome = self
            .onboarding
            .start_journey(active.as_deref(), initial_goal)
            .await?;
        // The journey may have created the project.
        if active.is_none() {
            if let Some(id) = self.projects.active_project_id().await? {
                self.session.set_active_project(Some(id)).await;
            }
        }
        Ok(stage_outcome_to_value(&outcome))
    }

    async fn continue_onboarding(&self, args: &Value) -> ForestResult<Value> {
        let (project_id, _) = self.require_active().await?;
        let request = ContinueOnboardingRequest::from_args(args)?;
        let outcome = self
            .onboarding
            .continue_stage(&project_id, request.stage, &request.input)
            .await?;
        Ok(stage_outcome_to_value(&outcome))
    }

    async fn onboarding_status(&self) -> ForestResult<Value> {
        match self.require_active().await {
            Ok((project_id, _)) => self.onboarding.status(&project_id).await,
            Err(ForestError::NoActiveProject) => Ok(json!({"started": false})),
            Err(e) => Err(e),
        }
    }

    async fn complete_onboarding(&self, args: &Value) -> ForestResult<Value> {
        let (project_id, _) = self.require_active().await?;
        let confirmed = args
            .get("final_confirmation")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        let outcome = self.onboarding.complete(&project_id, confirmed).await?;
        Ok(stage_outcome_to_value(&outcome))
    }

    async fn next_pipeline(&self, args: &Value) -> ForestResult<Value> {
        let (project_id, path) = self.require_active().await?;
        let criteria = criteria_from_args(args);
        let Some(tree) = self.hta_store.load(&project_id, &path).await? else {
            return Ok(json!({"pipeline": [], "message": "no tree built yet"}));
        };
        let window = self
            .presenter
            .next_pipeline(&project_id, &tree, &criteria, DEFAULT_WINDOW)
            .await;
        let count = window.len();
        Ok(json!({"pipeline": window, "count": count}))
    }

    async fn evolve_pipeline(&self, args: &Value) -> ForestResult<Value> {
        let (project_id, path) = self.require_active().await?;
        let criteria = criteria_from_args(args);
        let (evolution, window) = self
            .presenter
            .evolve_pipeline(&project_id, &path, &criteria, DEFAULT_WINDOW)
            .await?;
        let count = window.len();
        Ok(json!({
            "evolution": evolution,
            "pipeline": window,
            "count": count,
        }))
    }

    async fn factory_reset(&self, args: &Value) -> ForestResult<Value> {
        let request = FactoryResetRequest::from_args(args)?;
        if !request.confirm_deletion {
            return Err(ForestError::Validation(
                "factory reset requires confirm_deletion = true".into(),
            ));
        }
        match request.project_id {
            Some(project_id) => {
                self.projects.delete(&project_id).await?;
                if self.session.active_project().await.as_deref() == Some(project_id.as_str()) {
                    self.session.set_active_project(None).await;
                }
                Ok(json!({"deleted": [project_id]}))
            }
            None => {
                let removed = self.projects.delete_all().await?;
                self.session.set_active_project(None).await;
                Ok(json!({"deleted_count": removed}))
            }
        }
    }

    async fn debug_cache(&self) -> ForestResult<Value> {
        let cache = self.kv.cache_stats().await;
        let vectors = self.hta_store.vectors().stats().await.ok();
        Ok(json!({
            "cache": cache,
            "vector_stats": vectors,
            "pending_intelligence_requests": self.bridge.pending_count().await,
        }))
    }

    async fn clear_cache(&self) -> ForestResult<Value> {
        self.kv.clear_cache().await;
        Ok(json!({"cleared": true}))
    }
}

fn stage_outcome_to_value(outcome: &crate::services::onboarding::StageOutcome) -> Value {
    json!({
        "stage": outcome.stage.as_str(),
        "gate_status": outcome.gate_status.as_str(),
        "next_action": outcome.next_action,
        "suggestion": outcome.suggestion,
        "payload": outcome.payload,
    })
}
