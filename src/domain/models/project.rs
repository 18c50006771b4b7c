//! Project record.
//!
//! Created by the project tools; the core reads it and bumps
//! `last_accessed`. Each project owns one or more learning paths, with
//! `active_path` naming the one currently in play.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Default learning path name.
pub const DEFAULT_PATH: &str = "general";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Project {
    pub id: String,
    pub goal: String,
    #[serde(default)]
    pub context: String,
    #[serde(default = "default_path")]
    pub active_path: String,
    #[serde(default)]
    pub constraints: BTreeMap<String, String>,
    pub created_at: DateTime<Utc>,
    pub last_accessed: DateTime<Utc>,
}

fn default_path() -> String {
    DEFAULT_PATH.to_string()
}

impl Project {
    pub fn new(goal: String, context: String) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            goal,
            context,
            active_path: DEFAULT_PATH.to_string(),
            constraints: BTreeMap::new(),
            created_at: now,
            last_accessed: now,
        }
    }

    pub fn touch(&mut self) {
        self.last_accessed = Utc::now();
    }
}

/// The `global/config.json` document: project registry plus active pointer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GlobalConfig {
    #[serde(default)]
    pub projects: Vec<ProjectSummary>,
    #[serde(default)]
    pub active_project: Option<String>,
}

/// Registry entry kept in the global config.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectSummary {
    pub id: String,
    pub goal: String,
    pub last_accessed: DateTime<Utc>,
}

impl From<&Project> for ProjectSummary {
    fn from(project: &Project) -> Self {
        Self {
            id: project.id.clone(),
            goal: project.goal.clone(),
            last_accessed: project.last_accessed,
        }
    }
}
