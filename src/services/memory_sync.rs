//! Memory sync: replay the learning history back into the onboarding
//! aggregate context.
//!
//! Completed work shifts what the learner knows; replaying events keeps
//! the context snowball current so later generation and evolution see the
//! accumulated domains and breakthrough record.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::{json, Value};

use crate::domain::error::ForestResult;
use crate::domain::models::learning::LearningEventType;
use crate::services::hta_store::HtaStore;
use crate::services::onboarding::OnboardingService;

pub struct MemorySync {
    store: Arc<HtaStore>,
    onboarding: Arc<OnboardingService>,
}

impl MemorySync {
    pub fn new(store: Arc<HtaStore>, onboarding: Arc<OnboardingService>) -> Self {
        Self { store, onboarding }
    }

    /// Replay the project's learning events into its aggregate context.
    /// Returns a summary of what was folded in.
    pub async fn sync(&self, project_id: &str, path: &str) -> ForestResult<Value> {
        let history = self.store.load_history(project_id, path).await?;
        if history.events.is_empty() {
            return Ok(json!({
                "synced_events": 0,
                "message": "no learning history to sync",
            }));
        }

        let mut domains: BTreeMap<String, usize> = BTreeMap::new();
        let mut breakthroughs = 0usize;
        for event in &history.events {
            if !event.knowledge_domain.is_empty() {
                *domains.entry(event.knowledge_domain.clone()).or_default() += 1;
            }
            if event.event_type == LearningEventType::Breakthrough {
                breakthroughs += 1;
            }
        }

        let mut focus_areas: Vec<(String, usize)> = domains.clone().into_iter().collect();
        focus_areas.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        let focus_areas: Vec<String> =
            focus_areas.into_iter().take(5).map(|(domain, _)| domain).collect();

        if let Some(mut state) = self.onboarding.load_state(project_id).await? {
            state.aggregate_context.focus_areas = focus_areas.clone();
            state.aggregate_context.user_profile.insert(
                "completed_tasks".to_string(),
                history.events.len().to_string(),
            );
            if breakthroughs > 0 {
                state
                    .aggregate_context
                    .user_profile
                    .insert("breakthroughs".to_string(), breakthroughs.to_string());
            }
            self.onboarding.persist_state(&state).await?;
        }

        Ok(json!({
            "synced_events": history.events.len(),
            "breakthroughs": breakthroughs,
            "domains": domains,
            "focus_areas": focus_areas,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::domain::models::learning::LearningEvent;
    use crate::domain::ports::{EmbeddingService, KvStore, VectorIndex};
    use crate::infrastructure::kv::FileKvStore;
    use crate::infrastructure::vector::{HashEmbeddingService, MemoryVectorIndex};
    use crate::services::hta_engine::HtaEngine;
    use crate::services::intelligence_bridge::IntelligenceBridge;
    use crate::services::project::ProjectService;

    struct Fixture {
        _dir: tempfile::TempDir,
        sync: MemorySync,
        store: Arc<HtaStore>,
        onboarding: Arc<OnboardingService>,
        projects: Arc<ProjectService>,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let kv: Arc<dyn KvStore> = Arc::new(FileKvStore::new(dir.path()));
        let vectors: Arc<dyn VectorIndex> = Arc::new(MemoryVectorIndex::new(384));
        let embedder: Arc<dyn EmbeddingService> = Arc::new(HashEmbeddingService::default());
        let bridge = Arc::new(IntelligenceBridge::new(Duration::from_millis(20)));
        let engine = Arc::new(HtaEngine::new(bridge));
        let store = Arc::new(HtaStore::new(kv.clone(), vectors, embedder, engine));
        let projects = Arc::new(ProjectService::new(kv.clone()));
        let onboarding = Arc::new(OnboardingService::new(kv, projects.clone(), store.clone()));
        let sync = MemorySync::new(store.clone(), onboarding.clone());
        Fixture {
            _dir: dir,
            sync,
            store,
            onboarding,
            projects,
        }
    }

    fn event(domain: &str, event_type: LearningEventType) -> LearningEvent {
        LearningEvent::new(
            event_type,
            "t1".to_string(),
            "done".to_string(),
            "learned something".to_string(),
            3,
            if event_type == LearningEventType::Breakthrough { 4 } else { 2 },
            domain.to_string(),
        )
    }

    #[tokio::test]
    async fn test_sync_empty_history() {
        let f = fixture();
        let summary = f.sync.sync("p1", "general").await.unwrap();
        assert_eq!(summary["synced_events"], 0);
    }

    #[tokio::test]
    async fn test_sync_folds_domains_into_context() {
        let f = fixture();
        f.projects
            .create("Master portrait photography".to_string(), String::new())
            .await
            .unwrap();
        let project_id = f.projects.active_project_id().await.unwrap().unwrap();
        f.onboarding
            .start_journey(Some(&project_id), Some("Master portrait photography"))
            .await
            .unwrap();

        for domain in ["Lighting", "Lighting", "Posing"] {
            f.store
                .append_event(&project_id, "general", event(domain, LearningEventType::TaskCompletion))
                .await
                .unwrap();
        }
        f.store
            .append_event(
                &project_id,
                "general",
                event("Lighting", LearningEventType::Breakthrough),
            )
            .await
            .unwrap();

        let summary = f.sync.sync(&project_id, "general").await.unwrap();
        assert_eq!(summary["synced_events"], 4);
        assert_eq!(summary["breakthroughs"], 1);
        assert_eq!(summary["focus_areas"][0], "Lighting");

        let state = f.onboarding.load_state(&project_id).await.unwrap().unwrap();
        assert_eq!(state.aggregate_context.focus_areas[0], "Lighting");
        assert_eq!(
            state.aggregate_context.user_profile.get("completed_tasks").unwrap(),
            "4"
        );
    }
}
