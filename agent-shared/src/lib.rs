//! Sandbox agent shared code for host and guest.
//!
//! This crate contains the storage descriptor the host sends to the guest,
//! the agent-wide error type and the constants both sides must agree on.

pub mod constants;
pub mod errors;
pub mod storage;

pub use errors::{AgentError, AgentResult};
pub use storage::StorageDescriptor;
