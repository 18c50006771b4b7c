//! Task selection criteria.

use serde::{Deserialize, Serialize};

/// Criteria for picking the next task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectionCriteria {
    /// Learner energy in [1, 5].
    pub energy_level: u8,
    /// Time window in minutes.
    pub time_available: u32,
    #[serde(default)]
    pub focus_area: Option<String>,
    #[serde(default)]
    pub complexity: Option<u8>,
    #[serde(default)]
    pub semantic_query: Option<String>,
}

impl Default for SelectionCriteria {
    fn default() -> Self {
        Self {
            energy_level: 3,
            time_available: 30,
            focus_area: None,
            complexity: None,
            semantic_query: None,
        }
    }
}

impl SelectionCriteria {
    pub fn new(energy_level: u8, time_available: u32) -> Self {
        Self {
            energy_level: energy_level.clamp(1, 5),
            time_available,
            ..Default::default()
        }
    }
}

/// Parse a client-supplied time window: a bare number of minutes or phrases
/// like "30 minutes", "1 hour", "1.5 hours".
pub fn parse_time_available(raw: &serde_json::Value) -> Option<u32> {
    if let Some(n) = raw.as_u64() {
        return u32::try_from(n).ok();
    }
    let text = raw.as_str()?.trim().to_lowercase();
    let mut parts = text.split_whitespace();
    let amount: f64 = parts.next()?.parse().ok()?;
    let unit = parts.next().unwrap_or("minutes");
    let minutes = if unit.starts_with("hour") || unit == "h" || unit == "hr" || unit == "hrs" {
        amount * 60.0
    } else {
        amount
    };
    if minutes.is_finite() && minutes >= 0.0 {
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        Some(minutes.round() as u32)
    } else {
        None
    }
}
