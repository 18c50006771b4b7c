//! Project registry: the minimal record shape the core consumes.
//!
//! Project records live at `projects/<id>/config.json` with the registry
//! and the active pointer in `global/config.json`.

use std::sync::Arc;

use serde_json::Value;

use crate::domain::error::{ForestError, ForestResult};
use crate::domain::models::project::{GlobalConfig, Project, ProjectSummary};
use crate::domain::ports::{KvStore, GLOBAL_NAMESPACE};

pub const PROJECT_CONFIG_FILE: &str = "config";
pub const GLOBAL_CONFIG_FILE: &str = "config";

pub struct ProjectService {
    kv: Arc<dyn KvStore>,
}

impl ProjectService {
    pub fn new(kv: Arc<dyn KvStore>) -> Self {
        Self { kv }
    }

    pub async fn global_config(&self) -> ForestResult<GlobalConfig> {
        match self
            .kv
            .load(GLOBAL_NAMESPACE, None, GLOBAL_CONFIG_FILE)
            .await?
        {
            Some(doc) => serde_json::from_value(doc)
                .map_err(|e| ForestError::Storage(format!("global config corrupt: {e}"))),
            None => Ok(GlobalConfig::default()),
        }
    }

    async fn save_global(&self, config: &GlobalConfig) -> ForestResult<()> {
        let doc = serde_json::to_value(config)
            .map_err(|e| ForestError::Storage(e.to_string()))?;
        self.kv
            .save(GLOBAL_NAMESPACE, None, GLOBAL_CONFIG_FILE, &doc)
            .await
    }

    /// Create a project and make it active.
    pub async fn create(&self, goal: String, context: String) -> ForestResult<Project> {
        if goal.trim().is_empty() {
            return Err(ForestError::Validation("goal must not be empty".into()));
        }
        let project = Project::new(goal, context);
        let doc = serde_json::to_value(&project)
            .map_err(|e| ForestError::Storage(e.to_string()))?;
        self.kv
            .save(&project.id, None, PROJECT_CONFIG_FILE, &doc)
            .await?;

        let mut global = self.global_config().await?;
        global.projects.push(ProjectSummary::from(&project));
        global.active_project = Some(project.id.clone());
        self.save_global(&global).await?;
        Ok(project)
    }

    pub async fn get(&self, project_id: &str) -> ForestResult<Option<Project>> {
        match self.kv.load(project_id, None, PROJECT_CONFIG_FILE).await? {
            Some(doc) => serde_json::from_value(doc)
                .map(Some)
                .map_err(|e| ForestError::Storage(format!("project record corrupt: {e}"))),
            None => Ok(None),
        }
    }

    /// Bump `last_accessed` on the record and in the registry.
    pub async fn touch(&self, project_id: &str) -> ForestResult<()> {
        let Some(mut project) = self.get(project_id).await? else {
            return Ok(());
        };
        project.touch();
        let doc = serde_json::to_value(&project)
            .map_err(|e| ForestError::Storage(e.to_string()))?;
        self.kv
            .save(project_id, None, PROJECT_CONFIG_FILE, &doc)
            .await?;

        let mut global = self.global_config().await?;
        if let Some(entry) = global.projects.iter_mut().find(|p| p.id == project_id) {
            entry.last_accessed = project.last_accessed;
            self.save_global(&global).await?;
        }
        Ok(())
    }

    pub async fn list(&self) -> ForestResult<Vec<ProjectSummary>> {
        Ok(self.global_config().await?.projects)
    }

    pub async fn active_project_id(&self) -> ForestResult<Option<String>> {
        Ok(self.global_config().await?.active_project)
    }

    /// Switch the active project; the target must exist.
    pub async fn switch(&self, project_id: &str) -> ForestResult<Project> {
        let project = self
            .get(project_id)
            .await?
            .ok_or_else(|| ForestError::Validation(format!("no project '{project_id}'")))?;
        let mut global = self.global_config().await?;
        global.active_project = Some(project_id.to_string());
        self.save_global(&global).await?;
        self.touch(project_id).await?;
        Ok(project)
    }

    /// Delete one project, clearing the active pointer when it pointed here.
    pub async fn delete(&self, project_id: &str) -> ForestResult<()> {
        self.kv.delete_project(project_id).await?;
        let mut global = self.global_config().await?;
        global.projects.retain(|p| p.id != project_id);
        if global.active_project.as_deref() == Some(project_id) {
            global.active_project = None;
        }
        self.save_global(&global).await
    }

    /// Delete every project and reset the registry.
    pub async fn delete_all(&self) -> ForestResult<usize> {
        let global = self.global_config().await?;
        let count = global.projects.len();
        for project in &global.projects {
            self.kv.delete_project(&project.id).await?;
        }
        self.save_global(&GlobalConfig::default()).await?;
        Ok(count)
    }

    /// Raw project document, handed to tools that echo config.
    pub async fn raw_config(&self, project_id: &str) -> ForestResult<Option<Value>> {
        self.kv.load(project_id, None, PROJECT_CONFIG_FILE).await
    }
}
