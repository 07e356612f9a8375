//! Newtype wrappers for identifiers to ensure type safety.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Prefix shared by task families and task definitions of one workspace.
pub const FAMILY_PREFIX: &str = "devpod-";

/// Identifier of a logical workspace, as handed to us by the orchestration client.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WorkspaceId(String);

impl WorkspaceId {
    /// Create a new WorkspaceId from a string.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the inner string reference.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Task family (and task definition family) name for this workspace.
    pub fn family(&self) -> String {
        format!("{FAMILY_PREFIX}{}", self.0)
    }

    /// Consume and return the inner string.
    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Display for WorkspaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for WorkspaceId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for WorkspaceId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

/// ARN (or bare id) of a task on the remote execution service.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskArn(String);

impl TaskArn {
    /// Create a new TaskArn from a string.
    pub fn new(arn: impl Into<String>) -> Self {
        Self(arn.into())
    }

    /// Get the inner string reference.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Final path segment of the ARN, or the raw id if not ARN-shaped.
    pub fn short_id(&self) -> &str {
        short_id(&self.0)
    }

    /// Consume and return the inner string.
    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Display for TaskArn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for TaskArn {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for TaskArn {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

/// Opaque per-container runtime handle reported by the execution service.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContainerRuntimeId(String);

impl ContainerRuntimeId {
    /// Create a new ContainerRuntimeId from a string.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the inner string reference.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContainerRuntimeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for ContainerRuntimeId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for ContainerRuntimeId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

/// Strip an ARN down to its final `/`-separated segment.
///
/// Identifiers that don't start with `arn:` are returned unchanged, so both
/// `arn:aws:ecs:eu-west-1:123:task/cluster/abc123` and `abc123` yield `abc123`.
pub fn short_id(id: &str) -> &str {
    if !id.starts_with("arn:") {
        return id;
    }
    id.rsplit('/').next().unwrap_or(id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_workspace_family() {
        let id = WorkspaceId::new("w1");
        assert_eq!(id.family(), "devpod-w1");
    }

    #[test]
    fn test_short_id_strips_arn_path() {
        assert_eq!(short_id("arn:aws:ecs:region:acct:task/cluster/abc123"), "abc123");
        assert_eq!(short_id("arn:aws:ecs:region:acct:cluster/my-cluster"), "my-cluster");
    }

    #[test]
    fn test_short_id_passes_bare_ids_through() {
        assert_eq!(short_id("abc123"), "abc123");
        // Only ARN-shaped ids are split.
        assert_eq!(short_id("team/abc123"), "team/abc123");
    }

    #[test]
    fn test_id_display() {
        let id = TaskArn::new("arn:aws:ecs:r:a:task/c/t1");
        assert_eq!(format!("{}", id), "arn:aws:ecs:r:a:task/c/t1");
        assert_eq!(id.short_id(), "t1");
    }
}
