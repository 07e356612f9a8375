//! ECS Provider Core Domain Types
//!
//! This crate contains pure domain types with no dependencies on:
//! - AWS SDKs
//! - Process spawning
//! - Runtime specifics
//!
//! Everything that talks to the control plane, the session broker or the
//! container lives in `ecs-provider-exec` and `ecs-provider-cli`.

pub mod details;
pub mod error;
pub mod ids;
pub mod run_options;
pub mod session;
pub mod status;
pub mod target;
pub mod task;

// Re-export commonly used types
pub use details::{ContainerDetails, ContainerDetailsConfig, ContainerDetailsState};
pub use error::CoreError;
pub use ids::{short_id, ContainerRuntimeId, TaskArn, WorkspaceId};
pub use run_options::{Mount, RunOptions};
pub use session::SessionDescriptor;
pub use status::TaskStatus;
pub use target::TargetDescriptor;
pub use task::Task;
