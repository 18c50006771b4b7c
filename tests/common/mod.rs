//! Shared test harness: a fully wired server core over a temp data root,
//! with a scripted completer standing in for the external client.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

use forest::adapters::mcp::ToolRouter;
use forest::domain::error::ForestResult;
use forest::domain::ports::{EmbeddingService, KvStore, VectorIndex};
use forest::infrastructure::kv::FileKvStore;
use forest::infrastructure::vector::{HashEmbeddingService, MemoryVectorIndex};
use forest::services::{
    ExpansionAgent, HtaEngine, HtaStore, IntelligenceBridge, MemorySync, OnboardingService,
    PipelinePresenter, ProjectService, Session, StrategyEvolver, TaskSelector,
};

pub struct Harness {
    pub _dir: tempfile::TempDir,
    pub router: ToolRouter,
    pub bridge: Arc<IntelligenceBridge>,
    pub hta_store: Arc<HtaStore>,
    pub projects: Arc<ProjectService>,
    pub session: Arc<Session>,
    pub expansion: Arc<ExpansionAgent>,
}

pub fn harness() -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let kv: Arc<dyn KvStore> = Arc::new(FileKvStore::new(dir.path()));
    let vectors: Arc<dyn VectorIndex> = Arc::new(MemoryVectorIndex::new(384));
    let embedder: Arc<dyn EmbeddingService> = Arc::new(HashEmbeddingService::default());
    let bridge = Arc::new(IntelligenceBridge::new(Duration::from_millis(25)));
    let engine = Arc::new(HtaEngine::new(bridge.clone()));
    let hta_store = Arc::new(HtaStore::new(
        kv.clone(),
        vectors.clone(),
        embedder.clone(),
        engine,
    ));
    let projects = Arc::new(ProjectService::new(kv.clone()));
    let onboarding = Arc::new(OnboardingService::new(
        kv.clone(),
        projects.clone(),
        hta_store.clone(),
    ));
    let selector = Arc::new(TaskSelector::new(vectors, embedder));
    let evolver = Arc::new(StrategyEvolver::new(hta_store.clone()));
    let presenter = Arc::new(PipelinePresenter::new(selector.clone(), evolver.clone()));
    let memory_sync = Arc::new(MemorySync::new(hta_store.clone(), onboarding.clone()));
    let session = Arc::new(Session::new(false));
    let expansion = Arc::new(ExpansionAgent::new(
        session.clone(),
        projects.clone(),
        hta_store.clone(),
        3,
        false,
    ));
    let router = ToolRouter::new(
        session.clone(),
        kv,
        projects.clone(),
        onboarding,
        hta_store.clone(),
        selector,
        presenter,
        evolver,
        memory_sync,
        bridge.clone(),
        expansion.clone(),
    );
    Harness {
        _dir: dir,
        router,
        bridge,
        hta_store,
        projects,
        session,
        expansion,
    }
}

impl Harness {
    pub async fn call(&self, tool: &str, args: Value) -> ForestResult<Value> {
        self.router.dispatch(tool, &args).await
    }

    /// Dispatch a call that should succeed, unwrapping an injected landing
    /// wrapper when present.
    pub async fn call_ok(&self, tool: &str, args: Value) -> Value {
        let result = self.call(tool, args).await.unwrap_or_else(|e| {
            panic!("tool {tool} failed: {e}");
        });
        match result.get("result") {
            Some(inner) if result.get("landing_page").is_some() => inner.clone(),
            _ => result,
        }
    }

    /// Answer the next live intelligence request with `response`. Stale
    /// envelopes whose entries already timed out are skipped. Panics if no
    /// request is accepted within half a second.
    pub async fn respond_next(&self, response: Value) {
        for _ in 0..100 {
            let outbound = self.bridge.drain_outbound().await;
            for envelope in outbound.iter().rev() {
                if self
                    .bridge
                    .process_response(&envelope.request_id, &response.to_string())
                    .await
                    .is_ok()
                {
                    return;
                }
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("no intelligence request to answer");
    }

    /// Standard scripted level-1 analysis for a photography goal.
    pub fn level1_response() -> Value {
        serde_json::json!({
            "goal_analysis": {
                "goal_complexity": 6,
                "complexity_factors": ["lighting", "posing", "editing"],
            },
            "learning_approach": {"recommended_strategy": "practice-first"},
            "domain_boundaries": ["portrait", "lighting", "posing", "editing"],
        })
    }

    /// Run the whole onboarding journey for a photography goal, answering
    /// the complexity request with the scripted level 1 and letting the
    /// branch ladder bottom out in the deterministic fallback. Returns the
    /// project id.
    pub async fn onboard_photography_project(&self) -> String {
        self.call_ok(
            "create_project_forest",
            serde_json::json!({"goal": "Master portrait photography"}),
        )
        .await;
        let project_id = self.projects.active_project_id().await.unwrap().unwrap();

        self.call_ok("start_learning_journey_forest", serde_json::json!({})).await;
        self.call_ok(
            "continue_onboarding_forest",
            serde_json::json!({
                "stage": "context_gathering",
                "input_data": {
                    "background": "hobby",
                    "constraints": "weekends",
                    "equipment": "DSLR",
                },
            }),
        )
        .await;

        // Drain the questionnaire.
        let mut outcome = self
            .call_ok(
                "continue_onboarding_forest",
                serde_json::json!({"input_data": {"action": "start"}}),
            )
            .await;
        while outcome["gate_status"] == "in_progress" {
            let qid = outcome["payload"]["question"]["id"]
                .as_str()
                .expect("question id")
                .to_string();
            outcome = self
                .call_ok(
                    "continue_onboarding_forest",
                    serde_json::json!({"input_data": {"question_id": qid, "answer": "whatever fits"}}),
                )
                .await;
        }
        assert_eq!(outcome["gate_status"], "passed");

        // Complexity analysis with the scripted level-1 response.
        let advance = self.call(
            "continue_onboarding_forest",
            serde_json::json!({"input_data": {}}),
        );
        let answer = self.respond_next(Self::level1_response());
        let (outcome, ()) = tokio::join!(advance, answer);
        assert_eq!(outcome.unwrap()["gate_status"], "passed");

        // Tree generation (fallback ladder) and confirmation.
        let generation = self
            .call_ok(
                "continue_onboarding_forest",
                serde_json::json!({"input_data": {}}),
            )
            .await;
        assert_eq!(generation["gate_status"], "passed");

        self.call_ok(
            "complete_onboarding_forest",
            serde_json::json!({"final_confirmation": true}),
        )
        .await;

        project_id
    }
}
