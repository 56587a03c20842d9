//! DeployStateRepository port - abstraction for deploy state persistence
//!
//! Lets the orchestrator load and persist the last-applied state without
//! knowing the on-disk format.

use crate::domain::entities::DeployState;

/// Result type for deploy state operations
pub type StateResult<T> = Result<T, StateError>;

/// Deploy state operation errors
#[derive(Debug, thiserror::Error)]
pub enum StateError {
    /// Invalid state document
    #[error("invalid deploy state format: {0}")]
    InvalidFormat(String),
    /// I/O error
    #[error("deploy state I/O error: {0}")]
    Io(String),
}

/// Abstract repository for the deploy state document
pub trait DeployStateRepository: Send + Sync {
    /// Load state, or an empty state if none was persisted yet
    fn load(&self) -> StateResult<DeployState>;

    /// Persist state atomically
    fn save(&self, state: &DeployState) -> StateResult<()>;
}
