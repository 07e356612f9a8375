//! Session target addressing.

use std::fmt;

use crate::{short_id, ContainerRuntimeId, CoreError, Task, TaskArn};

/// Scheme prefix for ECS container targets.
pub const ECS_SCHEME: &str = "ecs";

/// Composite `ecs:<cluster>_<task>_<runtime>` string naming one container as a
/// session target.
///
/// Constructed per command, never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TargetDescriptor(String);

impl TargetDescriptor {
    /// Build the target for a container of a task on a cluster.
    ///
    /// Cluster and task ids are reduced to their short form when ARN-shaped.
    pub fn ecs(cluster_id: &str, task_arn: &TaskArn, runtime_id: &ContainerRuntimeId) -> Self {
        Self(format!(
            "{ECS_SCHEME}:{}_{}_{}",
            short_id(cluster_id),
            task_arn.short_id(),
            runtime_id
        ))
    }

    /// Build the target for the primary container of `task`.
    pub fn for_task(cluster_id: &str, task: &Task) -> Result<Self, CoreError> {
        let runtime_id = task.primary_container()?;
        Ok(Self::ecs(cluster_id, &task.arn, runtime_id))
    }

    /// Wrap an already composed target string (the `tunnel` subcommand's argument).
    pub fn parse(raw: impl Into<String>) -> Result<Self, CoreError> {
        let raw = raw.into();
        match raw.split_once(':') {
            Some((scheme, rest)) if !scheme.is_empty() && !rest.is_empty() => Ok(Self(raw)),
            _ => Err(CoreError::InvalidInput(format!(
                "target '{raw}' is not of the form <scheme>:<id>"
            ))),
        }
    }

    /// Get the inner string reference.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TargetDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn test_target_from_bare_ids() {
        let task = Task::new("t1", Utc::now()).with_container("r1");
        let target = TargetDescriptor::for_task("c1", &task).unwrap();
        assert_eq!(target.as_str(), "ecs:c1_t1_r1");
    }

    #[test]
    fn test_target_from_arns() {
        let task = Task::new("arn:aws:ecs:eu-west-1:123456789012:task/dev/8e59954919", Utc::now())
            .with_container("8e59954919-504127535");
        let target = TargetDescriptor::for_task(
            "arn:aws:ecs:eu-west-1:123456789012:cluster/dev",
            &task,
        )
        .unwrap();
        assert_eq!(target.as_str(), "ecs:dev_8e59954919_8e59954919-504127535");
    }

    #[test]
    fn test_target_requires_container() {
        let task = Task::new("t1", Utc::now());
        assert!(TargetDescriptor::for_task("c1", &task).is_err());
    }

    #[test]
    fn test_parse() {
        assert!(TargetDescriptor::parse("ecs:c1_t1_r1").is_ok());
        assert!(TargetDescriptor::parse("c1_t1_r1").is_err());
        assert!(TargetDescriptor::parse("ecs:").is_err());
    }
}
