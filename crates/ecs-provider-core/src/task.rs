//! Task type.

use crate::{ContainerRuntimeId, CoreError, TaskArn, TaskStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A Task is one running or historical instance of a workspace's container.
///
/// Several tasks may exist per workspace; the task locator decides which one
/// is authoritative.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    /// Task ARN.
    pub arn: TaskArn,

    /// When the task was created. Records without a timestamp sort last.
    pub created_at: DateTime<Utc>,

    /// When the task's containers started, if they did.
    pub started_at: Option<DateTime<Utc>>,

    /// Last-known lifecycle status.
    pub status: TaskStatus,

    /// Task definition this task was started from.
    pub task_definition_arn: Option<String>,

    /// Runtime ids of the task's containers, in definition order.
    pub containers: Vec<ContainerRuntimeId>,
}

impl Task {
    /// Create a new Task with the given ARN and creation time.
    pub fn new(arn: impl Into<TaskArn>, created_at: DateTime<Utc>) -> Self {
        Self {
            arn: arn.into(),
            created_at,
            started_at: None,
            status: TaskStatus::Created,
            task_definition_arn: None,
            containers: Vec::new(),
        }
    }

    /// Builder method to set the status.
    pub fn with_status(mut self, status: TaskStatus) -> Self {
        self.status = status;
        self
    }

    /// Builder method to add a container runtime id.
    pub fn with_container(mut self, runtime_id: impl Into<ContainerRuntimeId>) -> Self {
        self.containers.push(runtime_id.into());
        self
    }

    /// Builder method to set the task definition ARN.
    pub fn with_task_definition(mut self, arn: impl Into<String>) -> Self {
        self.task_definition_arn = Some(arn.into());
        self
    }

    /// Runtime id of the first (and in practice only) container.
    pub fn primary_container(&self) -> Result<&ContainerRuntimeId, CoreError> {
        self.containers
            .first()
            .ok_or_else(|| CoreError::MissingContainer(self.arn.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_primary_container() {
        let created = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let task = Task::new("t1", created).with_container("r1").with_container("r2");
        assert_eq!(task.primary_container().unwrap().as_str(), "r1");
    }

    #[test]
    fn test_primary_container_missing() {
        let task = Task::new("t1", Utc::now());
        assert!(matches!(
            task.primary_container(),
            Err(CoreError::MissingContainer(arn)) if arn == "t1"
        ));
    }
}
