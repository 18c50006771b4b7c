//! Learning events.
//!
//! Append-only history of completions, breakthroughs and insights. Events
//! feed strategy evolution and the memory sync path; they are never mutated.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LearningEventType {
    TaskCompletion,
    Breakthrough,
    Insight,
}

impl LearningEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TaskCompletion => "task_completion",
            Self::Breakthrough => "breakthrough",
            Self::Insight => "insight",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LearningEvent {
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: LearningEventType,
    pub task_id: String,
    pub outcome: String,
    /// Free-text account of what was learned.
    #[serde(default)]
    pub learned: String,
    /// Self-reported difficulty in [1, 5].
    #[serde(default)]
    pub difficulty_rating: u8,
    /// Derived breakthrough score in [1, 5].
    pub breakthrough_level: u8,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub knowledge_domain: String,
}

impl LearningEvent {
    pub fn new(
        event_type: LearningEventType,
        task_id: String,
        outcome: String,
        learned: String,
        difficulty_rating: u8,
        breakthrough_level: u8,
        knowledge_domain: String,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            event_type,
            task_id,
            outcome,
            learned,
            difficulty_rating,
            breakthrough_level,
            timestamp: Utc::now(),
            knowledge_domain,
        }
    }
}

/// The persisted `learning_history.json` document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LearningHistory {
    #[serde(default)]
    pub events: Vec<LearningEvent>,
}

impl LearningHistory {
    pub fn append(&mut self, event: LearningEvent) {
        self.events.push(event);
    }

    /// Most recent `n` events, newest last.
    pub fn recent(&self, n: usize) -> &[LearningEvent] {
        let start = self.events.len().saturating_sub(n);
        &self.events[start..]
    }
}
