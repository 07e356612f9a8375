//! Core domain errors.

use thiserror::Error;

/// Core domain errors for the ECS provider.
#[derive(Debug, Error)]
pub enum CoreError {
    /// A task has no container to address.
    #[error("Task {0} has no container runtime id")]
    MissingContainer(String),

    /// Invalid input.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
