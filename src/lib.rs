//! Forest - learning-plan orchestration server
//!
//! Turns an open-ended goal into a durable, adaptive HTA tree and drives
//! the generate / present / complete / evolve cycle:
//! - Gated onboarding that snowballs context before generation
//! - Six-level schema-constrained HTA engine with a retry/fallback ladder
//! - Task selection and pipeline presentation over the frontier
//! - Strategy evolution from completion feedback
//! - Intelligence bridge delegating completions to the connected client
//! - JSON document store plus a mirrored vector index
//! - Background supervision with automatic frontier refill

pub mod adapters;
pub mod domain;
pub mod infrastructure;
pub mod services;

// Re-export key types for convenience
pub use domain::{ForestError, ForestResult};
pub use infrastructure::config::{ConfigLoader, ForestConfig};
