//! Task lookup: which remote task is authoritative for a workspace.
//!
//! The control plane lists task ids per desired status only, so the locator
//! lists `RUNNING` and `STOPPED` separately, then fetches full records for
//! all candidates in one batched describe call.

use std::sync::Arc;

use async_trait::async_trait;
use ecs_provider_core::{Task, WorkspaceId};
use tracing::{debug, info};

use crate::error::{ApiError, LookupError};

/// Page size for task id listings.
///
/// Listings are not paginated: a family with more than this many tasks per
/// desired status only has its first page considered.
pub const LIST_PAGE_SIZE: i32 = 10;

/// Desired-status filter of a task listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DesiredStatus {
    Running,
    Stopped,
}

impl DesiredStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "RUNNING",
            Self::Stopped => "STOPPED",
        }
    }
}

/// A per-task failure reported by a batch describe.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskFailure {
    pub arn: Option<String>,
    pub reason: String,
}

/// Result of a batch describe: the tasks found and the ones that failed.
#[derive(Debug, Clone, Default)]
pub struct DescribeTasksOutput {
    pub tasks: Vec<Task>,
    pub failures: Vec<TaskFailure>,
}

/// Read-only task calls against the control plane.
#[async_trait]
pub trait TaskApi: Send + Sync {
    /// List task ARNs of `family` on `cluster` with the given desired status.
    async fn list_tasks(
        &self,
        cluster: &str,
        family: &str,
        desired_status: DesiredStatus,
        max_results: i32,
    ) -> Result<Vec<String>, ApiError>;

    /// Fetch full task records for `task_arns` in one call.
    async fn describe_tasks(
        &self,
        cluster: &str,
        task_arns: &[String],
    ) -> Result<DescribeTasksOutput, ApiError>;
}

/// Resolves a workspace to its single authoritative task.
#[derive(Clone)]
pub struct TaskLocator {
    api: Arc<dyn TaskApi>,
    cluster_id: String,
}

impl TaskLocator {
    /// Create a locator for tasks on `cluster_id`.
    pub fn new(api: Arc<dyn TaskApi>, cluster_id: impl Into<String>) -> Self {
        Self {
            api,
            cluster_id: cluster_id.into(),
        }
    }

    /// Cluster this locator searches.
    pub fn cluster_id(&self) -> &str {
        &self.cluster_id
    }

    /// Find the most recently created task of the workspace, running or stopped.
    ///
    /// Returns `Ok(None)` when the workspace has no tasks at all. Any per-task
    /// failure in the describe batch is an error, even if other tasks came back.
    pub async fn resolve(&self, workspace: &WorkspaceId) -> Result<Option<Task>, LookupError> {
        let family = workspace.family();

        let mut task_arns = self
            .api
            .list_tasks(&self.cluster_id, &family, DesiredStatus::Running, LIST_PAGE_SIZE)
            .await
            .map_err(LookupError::ListRunning)?;
        let stopped = self
            .api
            .list_tasks(&self.cluster_id, &family, DesiredStatus::Stopped, LIST_PAGE_SIZE)
            .await
            .map_err(LookupError::ListStopped)?;

        debug!(
            family = %family,
            running = task_arns.len(),
            stopped = stopped.len(),
            "Listed candidate tasks"
        );
        task_arns.extend(stopped);

        if task_arns.is_empty() {
            return Ok(None);
        }

        let output = self
            .api
            .describe_tasks(&self.cluster_id, &task_arns)
            .await
            .map_err(LookupError::Describe)?;
        if let Some(failure) = output.failures.into_iter().next() {
            return Err(LookupError::DescribeFailure(failure.reason));
        }

        let task = select_latest(output.tasks);
        if let Some(task) = &task {
            info!(workspace = %workspace, task = %task.arn, status = %task.status, "Resolved task");
        }
        Ok(task)
    }
}

/// Pick the task with the newest creation timestamp.
///
/// The sort is stable, so on equal timestamps the first task in listing order wins.
pub fn select_latest(mut tasks: Vec<Task>) -> Option<Task> {
    tasks.sort_by(|a, b| b.created_at.cmp(&a.created_at));
    tasks.into_iter().next()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, TimeZone, Utc};
    use ecs_provider_core::TaskStatus;
    use std::collections::HashMap;
    use std::sync::Mutex;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    /// In-memory control plane keyed by (family, desired status).
    #[derive(Default)]
    struct FakeTaskApi {
        listings: HashMap<(String, DesiredStatus), Vec<String>>,
        tasks: Vec<Task>,
        failures: Vec<TaskFailure>,
        fail_list: Option<DesiredStatus>,
        describe_calls: Mutex<Vec<Vec<String>>>,
    }

    impl FakeTaskApi {
        fn with_listing(mut self, family: &str, status: DesiredStatus, arns: &[&str]) -> Self {
            self.listings.insert(
                (family.to_string(), status),
                arns.iter().map(|a| a.to_string()).collect(),
            );
            self
        }

        fn with_task(mut self, task: Task) -> Self {
            self.tasks.push(task);
            self
        }
    }

    #[async_trait]
    impl TaskApi for FakeTaskApi {
        async fn list_tasks(
            &self,
            _cluster: &str,
            family: &str,
            desired_status: DesiredStatus,
            max_results: i32,
        ) -> Result<Vec<String>, ApiError> {
            assert_eq!(max_results, LIST_PAGE_SIZE);
            if self.fail_list == Some(desired_status) {
                return Err(ApiError::new("AccessDeniedException"));
            }
            Ok(self
                .listings
                .get(&(family.to_string(), desired_status))
                .cloned()
                .unwrap_or_default())
        }

        async fn describe_tasks(
            &self,
            _cluster: &str,
            task_arns: &[String],
        ) -> Result<DescribeTasksOutput, ApiError> {
            self.describe_calls.lock().unwrap().push(task_arns.to_vec());
            // Return records in request order, like the service does.
            let tasks = task_arns
                .iter()
                .filter_map(|arn| self.tasks.iter().find(|t| t.arn.as_str() == arn).cloned())
                .collect();
            Ok(DescribeTasksOutput {
                tasks,
                failures: self.failures.clone(),
            })
        }
    }

    #[tokio::test]
    async fn test_resolve_single_running_task() {
        let api = FakeTaskApi::default()
            .with_listing("devpod-w1", DesiredStatus::Running, &["t1"])
            .with_task(Task::new("t1", at(0)).with_status(TaskStatus::Running).with_container("r1"));
        let locator = TaskLocator::new(Arc::new(api), "c1");

        let task = locator.resolve(&WorkspaceId::new("w1")).await.unwrap().unwrap();
        assert_eq!(task.arn.as_str(), "t1");
    }

    #[tokio::test]
    async fn test_resolve_prefers_newest_across_statuses() {
        let api = FakeTaskApi::default()
            .with_listing("devpod-w1", DesiredStatus::Running, &["old-running"])
            .with_listing("devpod-w1", DesiredStatus::Stopped, &["newer-stopped", "oldest"])
            .with_task(Task::new("old-running", at(10)))
            .with_task(Task::new("newer-stopped", at(20)))
            .with_task(Task::new("oldest", at(1)));
        let api = Arc::new(api);
        let locator = TaskLocator::new(api.clone(), "c1");

        let task = locator.resolve(&WorkspaceId::new("w1")).await.unwrap().unwrap();
        assert_eq!(task.arn.as_str(), "newer-stopped");

        // Running ids come first and everything is described in one batch.
        let calls = api.describe_calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0], vec!["old-running", "newer-stopped", "oldest"]);
    }

    #[tokio::test]
    async fn test_resolve_no_tasks_is_absent() {
        let api = Arc::new(FakeTaskApi::default());
        let locator = TaskLocator::new(api.clone(), "c1");

        let task = locator.resolve(&WorkspaceId::new("w2")).await.unwrap();
        assert!(task.is_none());
        assert!(api.describe_calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_resolve_partial_describe_failure_is_error() {
        let mut api = FakeTaskApi::default()
            .with_listing("devpod-w1", DesiredStatus::Running, &["t1", "t2"])
            .with_task(Task::new("t1", at(0)));
        api.failures.push(TaskFailure {
            arn: Some("t2".to_string()),
            reason: "MISSING".to_string(),
        });
        let locator = TaskLocator::new(Arc::new(api), "c1");

        let err = locator.resolve(&WorkspaceId::new("w1")).await.unwrap_err();
        assert!(matches!(err, LookupError::DescribeFailure(ref reason) if reason == "MISSING"));
        assert_eq!(err.to_string(), "describe tasks failures: MISSING");
    }

    #[tokio::test]
    async fn test_resolve_list_error_names_the_call() {
        let mut api = FakeTaskApi::default();
        api.fail_list = Some(DesiredStatus::Stopped);
        let locator = TaskLocator::new(Arc::new(api), "c1");

        let err = locator.resolve(&WorkspaceId::new("w1")).await.unwrap_err();
        assert_eq!(err.to_string(), "list stopped tasks: AccessDeniedException");
    }

    #[test]
    fn test_select_latest_max_timestamp() {
        let tasks = vec![
            Task::new("a", at(5)),
            Task::new("b", at(30)),
            Task::new("c", at(12)),
        ];
        assert_eq!(select_latest(tasks).unwrap().arn.as_str(), "b");
    }

    #[test]
    fn test_select_latest_ties_keep_listing_order() {
        let tasks = vec![
            Task::new("first", at(7)),
            Task::new("second", at(7)),
            Task::new("older", at(3)),
        ];
        assert_eq!(select_latest(tasks).unwrap().arn.as_str(), "first");
        assert!(select_latest(Vec::new()).is_none());
    }
}
