//! Lifecycle status of a remote task.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Last-known lifecycle status of a Task, as reported to the orchestration client.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    /// Task exists but is neither running nor stopped (provisioning, pending, ...).
    #[default]
    Created,
    /// Task is running.
    Running,
    /// Task has stopped.
    Exited,
}

impl TaskStatus {
    /// Map the service's `lastStatus` string onto our three states.
    ///
    /// Comparison is case-insensitive; anything other than `RUNNING` or
    /// `STOPPED` (including a missing status) is `Created`.
    pub fn from_last_status(last_status: Option<&str>) -> Self {
        match last_status.map(str::to_ascii_uppercase).as_deref() {
            Some("RUNNING") => Self::Running,
            Some("STOPPED") => Self::Exited,
            _ => Self::Created,
        }
    }

    /// Returns true if the task is running.
    pub fn is_running(&self) -> bool {
        matches!(self, Self::Running)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Created => "created",
            Self::Running => "running",
            Self::Exited => "exited",
        };
        f.write_str(s)
    }
}
