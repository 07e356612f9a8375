//! Container details reported by `find`.

use chrono::SecondsFormat;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::{Task, TaskStatus};

/// What the orchestration client learns about a workspace's container.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerDetails {
    /// Task ARN.
    pub id: String,
    /// RFC 3339 creation timestamp.
    pub created: String,
    pub state: ContainerDetailsState,
    pub config: ContainerDetailsConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerDetailsState {
    pub status: TaskStatus,
    /// RFC 3339 start timestamp, empty if the task never started.
    pub started_at: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerDetailsConfig {
    pub labels: HashMap<String, String>,
}

impl ContainerDetails {
    /// Describe `task`, attaching the labels of its container definition.
    pub fn from_task(task: &Task, labels: HashMap<String, String>) -> Self {
        Self {
            id: task.arn.to_string(),
            created: task.created_at.to_rfc3339_opts(SecondsFormat::Secs, true),
            state: ContainerDetailsState {
                status: task.status,
                started_at: task
                    .started_at
                    .map(|t| t.to_rfc3339_opts(SecondsFormat::Secs, true))
                    .unwrap_or_default(),
            },
            config: ContainerDetailsConfig { labels },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    #[test]
    fn test_from_task() {
        let created = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        let task = Task::new("arn:aws:ecs:r:a:task/c/t1", created).with_status(TaskStatus::Running);
        let labels = HashMap::from([("devpod.user".to_string(), "root".to_string())]);

        let details = ContainerDetails::from_task(&task, labels);
        let json = serde_json::to_value(&details).unwrap();

        assert_eq!(json["id"], "arn:aws:ecs:r:a:task/c/t1");
        assert_eq!(json["created"], "2024-03-01T12:00:00Z");
        assert_eq!(json["state"]["status"], "running");
        assert_eq!(json["state"]["startedAt"], "");
        assert_eq!(json["config"]["labels"]["devpod.user"], "root");
    }
}
