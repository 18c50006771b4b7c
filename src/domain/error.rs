//! Error taxonomy for the Forest server.
//!
//! Every error that can surface through the tool layer carries a stable tag
//! and a short human message. Components map their internal failures into
//! these variants at the service boundary.

use thiserror::Error;

/// Errors surfaced by Forest components and tools.
#[derive(Error, Debug)]
pub enum ForestError {
    /// Bad tool arguments or a schema mismatch in an intelligence response.
    #[error("Validation failed: {0}")]
    Validation(String),

    /// Key-value store failure after the local retry.
    #[error("Storage failure: {0}")]
    Storage(String),

    /// The vector index is unreachable or returned an error.
    #[error("Vector index unavailable: {0}")]
    VectorUnavailable(String),

    /// An intelligence delegation exceeded its deadline.
    #[error("Intelligence request {request_id} timed out after {timeout_ms}ms")]
    Timeout { request_id: String, timeout_ms: u64 },

    /// The router does not know the requested tool.
    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    /// A tool that requires an active project was called without one.
    #[error("No active project. Create or switch to a project first.")]
    NoActiveProject,

    /// An onboarding gate refused to advance.
    #[error("Onboarding gate '{gate}' is blocked: {reason}")]
    GateBlocked { gate: String, reason: String },

    /// An invariant check failed while saving a tree.
    #[error("Invariant violation: {0}")]
    Conflict(String),

    /// Mutating tools are disabled by the read-only flag.
    #[error("Server is read-only; mutating tool '{0}' rejected")]
    ReadOnly(String),
}

impl ForestError {
    /// Stable tag carried on the wire alongside the message.
    pub const fn tag(&self) -> &'static str {
        match self {
            Self::Validation(_) => "ValidationError",
            Self::Storage(_) => "StorageError",
            Self::VectorUnavailable(_) => "VectorUnavailable",
            Self::Timeout { .. } => "Timeout",
            Self::UnknownTool(_) => "UnknownTool",
            Self::NoActiveProject => "NoActiveProject",
            Self::GateBlocked { .. } => "GateBlocked",
            Self::Conflict(_) => "Conflict",
            Self::ReadOnly(_) => "ReadOnly",
        }
    }

    /// Returns true if callers are expected to degrade gracefully rather
    /// than fail the whole operation.
    pub const fn is_recoverable(&self) -> bool {
        matches!(self, Self::VectorUnavailable(_) | Self::Timeout { .. })
    }

    /// Wire representation: a structured error object, never a stack trace.
    pub fn to_wire(&self) -> serde_json::Value {
        serde_json::json!({
            "error": self.tag(),
            "message": self.to_string(),
        })
    }
}

/// Convenience alias used throughout the services.
pub type ForestResult<T> = Result<T, ForestError>;
