//! Agent-wide error type.
//!
//! Subsystems keep their own fine-grained errors and convert into
//! [`AgentError`] at the point where they are reported to the host.

use thiserror::Error;

/// Result alias used across the agent.
pub type AgentResult<T> = Result<T, AgentError>;

#[derive(Debug, Error)]
pub enum AgentError {
    /// Storage attachment or detachment failed.
    #[error("storage: {0}")]
    Storage(String),

    /// Configuration could not be loaded or is invalid.
    #[error("config: {0}")]
    Config(String),

    /// Unexpected agent failure.
    #[error("internal: {0}")]
    Internal(String),

    #[error("json: {0}")]
    Json(#[from] serde_json::Error),
}
