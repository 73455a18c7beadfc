//! Error types for storage attachment.
//!
//! Errors are categorized by what the caller can do about them:
//! - [`StorageError::InvalidArgument`]: malformed descriptor content (fix the request)
//! - [`StorageError::NotFound`]: device or directory not there (yet); may be retried
//! - [`StorageError::InvalidTopology`]: sysfs shows no bus behind a bridge
//! - [`StorageError::UnknownDriver`]: no handler for the driver tag
//! - [`StorageError::HandlerFailure`]: a syscall made on behalf of a handler failed

use std::io;

use agent_shared::AgentError;
use thiserror::Error;

pub type StorageResult<T> = Result<T, StorageError>;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid PCI topology: {0}")]
    InvalidTopology(String),

    #[error("no handler registered for driver '{0}'")]
    UnknownDriver(String),

    #[error("{context}: {source}")]
    HandlerFailure {
        context: String,
        #[source]
        source: io::Error,
    },
}

impl StorageError {
    /// Wrap a failed syscall with what was being attempted.
    pub fn handler(context: impl Into<String>, source: impl Into<io::Error>) -> Self {
        Self::HandlerFailure {
            context: context.into(),
            source: source.into(),
        }
    }

    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

/// Failure of an attach batch.
///
/// Carries the partial list of mount points already processed so the caller
/// can unwind them.
#[derive(Debug, Error)]
#[error("storage #{index} (driver '{driver}'): {error}")]
pub struct BatchFailure {
    /// Position of the failing descriptor in the batch.
    pub index: usize,
    pub driver: String,
    /// Mount points attached before the failure, in batch order.
    pub mounted: Vec<String>,
    #[source]
    pub error: StorageError,
}

impl From<StorageError> for AgentError {
    fn from(err: StorageError) -> Self {
        AgentError::Storage(err.to_string())
    }
}

impl From<BatchFailure> for AgentError {
    fn from(err: BatchFailure) -> Self {
        AgentError::Storage(err.to_string())
    }
}
