//! Workspace lifecycle operations on top of the task locator and the tunnel.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use ecs_provider_core::{ContainerDetails, CoreError, RunOptions, WorkspaceId};
use ecs_provider_exec::{
    ApiError, CommandExecutor, CommandIo, ExecError, LookupError, RemoteCommand, TaskFailure,
    TaskLocator, TunnelError,
};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::{ConfigError, LaunchType, ProviderConfig};
use crate::task_definition::{task_definition_spec, workspace_tags, TaskDefinitionSpec};

/// Page size for task definition listings.
pub const TASK_DEFINITION_PAGE_SIZE: i32 = 10;

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Lookup(#[from] LookupError),

    #[error(transparent)]
    Exec(#[from] ExecError),

    #[error(transparent)]
    Tunnel(#[from] TunnelError),

    #[error(transparent)]
    Core(#[from] CoreError),

    /// A control-plane call failed; `context` names the call.
    #[error("{context}: {source}")]
    Api {
        context: String,
        #[source]
        source: ApiError,
    },

    #[error("unexpected amount of task definitions: {0}, expected 1")]
    TaskDefinitionCount(usize),

    #[error("run task failure: {0}")]
    RunTaskFailure(String),

    #[error("delete task definitions failure: {0}")]
    DeleteTaskDefinitionsFailure(String),

    #[error("task {0} has no task definition")]
    MissingTaskDefinition(String),

    #[error("no task role configured, set TASK_ROLE_ARN or EXECUTION_ROLE_ARN")]
    MissingRole,
}

impl ProviderError {
    fn api(context: impl Into<String>) -> impl FnOnce(ApiError) -> Self {
        let context = context.into();
        move |source| Self::Api { context, source }
    }

    /// Exit status `main` should use for this error.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Exec(err) => err.exit_code().unwrap_or(1),
            _ => 1,
        }
    }
}

/// A `RunTask` call for one workspace.
#[derive(Debug, Clone, PartialEq)]
pub struct RunTaskRequest {
    pub cluster: String,
    pub task_definition_arn: String,
    pub launch_type: LaunchType,
    pub subnets: Vec<String>,
    pub security_groups: Vec<String>,
    pub assign_public_ip: String,
    pub tags: Vec<(String, String)>,
}

/// Mutating control-plane calls used by the lifecycle operations.
#[async_trait]
pub trait LifecycleApi: Send + Sync {
    async fn stop_task(&self, cluster: &str, task_arn: &str) -> Result<(), ApiError>;

    /// Start one task. Returns the per-task failures the service reported.
    async fn run_task(&self, request: &RunTaskRequest) -> Result<Vec<TaskFailure>, ApiError>;

    async fn register_task_definition(&self, spec: &TaskDefinitionSpec) -> Result<(), ApiError>;

    async fn list_task_definitions(
        &self,
        family_prefix: &str,
        max_results: i32,
    ) -> Result<Vec<String>, ApiError>;

    async fn deregister_task_definition(&self, arn: &str) -> Result<(), ApiError>;

    async fn delete_task_definitions(&self, arns: &[String]) -> Result<Vec<TaskFailure>, ApiError>;

    /// Docker labels of the first container of a task definition.
    async fn container_labels(
        &self,
        task_definition_arn: &str,
    ) -> Result<HashMap<String, String>, ApiError>;
}

/// The provider: one value per process, built in `main`.
#[derive(Clone)]
pub struct EcsProvider {
    config: Arc<ProviderConfig>,
    locator: TaskLocator,
    api: Arc<dyn LifecycleApi>,
    executor: CommandExecutor,
}

impl EcsProvider {
    pub fn new(
        config: Arc<ProviderConfig>,
        locator: TaskLocator,
        api: Arc<dyn LifecycleApi>,
        executor: CommandExecutor,
    ) -> Self {
        Self {
            config,
            locator,
            api,
            executor,
        }
    }

    /// Details of the workspace's task, or `None` if it has none.
    pub async fn find(&self, workspace: &WorkspaceId) -> Result<Option<ContainerDetails>, ProviderError> {
        let Some(task) = self.locator.resolve(workspace).await? else {
            return Ok(None);
        };
        let task_definition = task
            .task_definition_arn
            .as_deref()
            .ok_or_else(|| ProviderError::MissingTaskDefinition(task.arn.to_string()))?;
        let labels = self
            .api
            .container_labels(task_definition)
            .await
            .map_err(ProviderError::api("describe task definition"))?;

        Ok(Some(ContainerDetails::from_task(&task, labels)))
    }

    /// Start a stopped workspace. Fargate tasks cannot be restarted, so this is
    /// a no-op there.
    pub async fn start(&self, workspace: &WorkspaceId) -> Result<(), ProviderError> {
        if self.config.launch_type.is_fargate() {
            debug!(workspace = %workspace, "Start is a no-op on Fargate");
            return Ok(());
        }
        self.start_task(workspace).await
    }

    /// Stop the workspace's task. A no-op on Fargate.
    pub async fn stop(&self, workspace: &WorkspaceId) -> Result<(), ProviderError> {
        if self.config.launch_type.is_fargate() {
            debug!(workspace = %workspace, "Stop is a no-op on Fargate");
            return Ok(());
        }

        if let Some(task) = self.locator.resolve(workspace).await? {
            info!(workspace = %workspace, task = %task.arn, "Stopping task");
            self.api
                .stop_task(&self.config.cluster_id, task.arn.as_str())
                .await
                .map_err(ProviderError::api("stop task"))?;
        }
        Ok(())
    }

    /// Replace the workspace's task definition and start a task from it.
    ///
    /// If the task cannot be started the fresh task definition is removed again.
    pub async fn run(&self, workspace: &WorkspaceId, options: &RunOptions) -> Result<(), ProviderError> {
        self.register_task_definition(workspace, options).await?;

        if let Err(e) = self.start_task(workspace).await {
            if let Err(cleanup) = self.delete_task_definitions(workspace).await {
                warn!(workspace = %workspace, error = %cleanup, "Failed to roll back task definition");
            }
            return Err(e);
        }
        Ok(())
    }

    /// Stop the workspace and remove its task definitions.
    pub async fn delete(&self, workspace: &WorkspaceId) -> Result<(), ProviderError> {
        self.stop(workspace).await?;
        self.delete_task_definitions(workspace).await
    }

    /// Run a command in the workspace's container.
    pub async fn command(
        &self,
        workspace: &WorkspaceId,
        command: RemoteCommand,
        io: CommandIo,
        cancel: &CancellationToken,
    ) -> Result<(), ProviderError> {
        Ok(self.executor.execute(workspace, command, io, cancel).await?)
    }

    async fn register_task_definition(
        &self,
        workspace: &WorkspaceId,
        options: &RunOptions,
    ) -> Result<(), ProviderError> {
        self.delete_task_definitions(workspace).await?;

        let (task_role, execution_role) = self.roles()?;
        let spec = task_definition_spec(&self.config, workspace, options, task_role, execution_role);
        info!(workspace = %workspace, family = %spec.family, image = %spec.container.image, "Registering task definition");
        self.api
            .register_task_definition(&spec)
            .await
            .map_err(ProviderError::api("register task definition"))
    }

    /// Each role falls back to the other when only one is configured.
    fn roles(&self) -> Result<(String, String), ProviderError> {
        let task = &self.config.task_role_arn;
        let execution = &self.config.execution_role_arn;
        match (task.is_empty(), execution.is_empty()) {
            (true, true) => Err(ProviderError::MissingRole),
            (true, false) => Ok((execution.clone(), execution.clone())),
            (false, true) => Ok((task.clone(), task.clone())),
            (false, false) => Ok((task.clone(), execution.clone())),
        }
    }

    async fn task_definition_arn(&self, workspace: &WorkspaceId) -> Result<String, ProviderError> {
        let mut arns = self
            .api
            .list_task_definitions(&workspace.family(), TASK_DEFINITION_PAGE_SIZE)
            .await
            .map_err(ProviderError::api("list task definitions"))?;
        if arns.len() != 1 {
            return Err(ProviderError::TaskDefinitionCount(arns.len()));
        }
        Ok(arns.remove(0))
    }

    async fn start_task(&self, workspace: &WorkspaceId) -> Result<(), ProviderError> {
        let task_definition_arn = self.task_definition_arn(workspace).await?;

        let request = RunTaskRequest {
            cluster: self.config.cluster_id.clone(),
            task_definition_arn,
            launch_type: self.config.launch_type,
            subnets: non_empty(&self.config.subnet_id),
            security_groups: non_empty(&self.config.security_group_id),
            assign_public_ip: self.config.assign_public_ip.clone(),
            tags: workspace_tags(workspace),
        };
        info!(workspace = %workspace, task_definition = %request.task_definition_arn, "Running task");

        let failures = self
            .api
            .run_task(&request)
            .await
            .map_err(ProviderError::api("run task"))?;
        if let Some(failure) = failures.into_iter().next() {
            return Err(ProviderError::RunTaskFailure(failure.reason));
        }
        Ok(())
    }

    async fn delete_task_definitions(&self, workspace: &WorkspaceId) -> Result<(), ProviderError> {
        let arns = self
            .api
            .list_task_definitions(&workspace.family(), TASK_DEFINITION_PAGE_SIZE)
            .await
            .map_err(ProviderError::api("list task definitions"))?;
        if arns.is_empty() {
            return Ok(());
        }

        for arn in &arns {
            self.api
                .deregister_task_definition(arn)
                .await
                .map_err(ProviderError::api(format!("deregister task definition {arn}")))?;
        }

        info!(workspace = %workspace, count = arns.len(), "Deleting task definitions");
        let failures = self
            .api
            .delete_task_definitions(&arns)
            .await
            .map_err(ProviderError::api("delete task definitions"))?;
        match failures.into_iter().next() {
            Some(failure) => Err(ProviderError::DeleteTaskDefinitionsFailure(failure.reason)),
            None => Ok(()),
        }
    }
}

fn non_empty(value: &str) -> Vec<String> {
    if value.is_empty() {
        Vec::new()
    } else {
        vec![value.to_string()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use ecs_provider_core::{Task, TaskStatus, TargetDescriptor};
    use ecs_provider_exec::{
        DescribeTasksOutput, DesiredStatus, RemoteShell, ShellError, TaskApi, TransportBridge,
        TunnelError, TunnelOrchestrator,
    };
    use std::sync::Mutex;
    use tokio::io::DuplexStream;

    /// One running task `t1` for workspace `w1`.
    struct FakeTasks;

    #[async_trait]
    impl TaskApi for FakeTasks {
        async fn list_tasks(
            &self,
            _cluster: &str,
            family: &str,
            desired_status: DesiredStatus,
            _max_results: i32,
        ) -> Result<Vec<String>, ApiError> {
            if family == "devpod-w1" && desired_status == DesiredStatus::Running {
                Ok(vec!["arn:aws:ecs:eu-west-1:1:task/dev/t1".to_string()])
            } else {
                Ok(Vec::new())
            }
        }

        async fn describe_tasks(
            &self,
            _cluster: &str,
            task_arns: &[String],
        ) -> Result<DescribeTasksOutput, ApiError> {
            let created = Utc.with_ymd_and_hms(2024, 5, 1, 8, 30, 0).unwrap();
            let tasks = task_arns
                .iter()
                .map(|arn| {
                    Task::new(arn.as_str(), created)
                        .with_status(TaskStatus::Running)
                        .with_container("r1")
                        .with_task_definition("arn:aws:ecs:eu-west-1:1:task-definition/devpod-w1:3")
                })
                .collect();
            Ok(DescribeTasksOutput {
                tasks,
                failures: Vec::new(),
            })
        }
    }

    /// Records every call; task definitions live in memory.
    #[derive(Default)]
    struct FakeLifecycle {
        calls: Mutex<Vec<String>>,
        task_definitions: Mutex<Vec<String>>,
        run_failure: Option<String>,
    }

    impl FakeLifecycle {
        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }

        fn record(&self, call: impl Into<String>) {
            self.calls.lock().unwrap().push(call.into());
        }
    }

    #[async_trait]
    impl LifecycleApi for FakeLifecycle {
        async fn stop_task(&self, cluster: &str, task_arn: &str) -> Result<(), ApiError> {
            self.record(format!("stop {cluster} {task_arn}"));
            Ok(())
        }

        async fn run_task(&self, request: &RunTaskRequest) -> Result<Vec<TaskFailure>, ApiError> {
            self.record(format!("run {}", request.task_definition_arn));
            Ok(self
                .run_failure
                .iter()
                .map(|reason| TaskFailure {
                    arn: None,
                    reason: reason.clone(),
                })
                .collect())
        }

        async fn register_task_definition(&self, spec: &TaskDefinitionSpec) -> Result<(), ApiError> {
            self.record(format!("register {}", spec.family));
            self.task_definitions
                .lock()
                .unwrap()
                .push(format!("arn:td/{}:1", spec.family));
            Ok(())
        }

        async fn list_task_definitions(
            &self,
            family_prefix: &str,
            max_results: i32,
        ) -> Result<Vec<String>, ApiError> {
            assert_eq!(max_results, TASK_DEFINITION_PAGE_SIZE);
            self.record(format!("list {family_prefix}"));
            Ok(self.task_definitions.lock().unwrap().clone())
        }

        async fn deregister_task_definition(&self, arn: &str) -> Result<(), ApiError> {
            self.record(format!("deregister {arn}"));
            Ok(())
        }

        async fn delete_task_definitions(&self, arns: &[String]) -> Result<Vec<TaskFailure>, ApiError> {
            self.record(format!("delete {}", arns.join(",")));
            self.task_definitions.lock().unwrap().clear();
            Ok(Vec::new())
        }

        async fn container_labels(
            &self,
            task_definition_arn: &str,
        ) -> Result<HashMap<String, String>, ApiError> {
            self.record(format!("labels {task_definition_arn}"));
            Ok(HashMap::from([("devpod.user".to_string(), "vscode".to_string())]))
        }
    }

    struct IdleBridge;

    #[async_trait]
    impl TransportBridge for IdleBridge {
        async fn bridge(
            &self,
            _target: TargetDescriptor,
            _endpoint: DuplexStream,
            cancel: CancellationToken,
        ) -> Result<(), TunnelError> {
            cancel.cancelled().await;
            Err(TunnelError::Killed)
        }
    }

    struct ExitShell(u32);

    #[async_trait]
    impl RemoteShell for ExitShell {
        async fn run_remote(
            &self,
            _stream: DuplexStream,
            _command: RemoteCommand,
            _io: CommandIo,
            _cancel: CancellationToken,
        ) -> Result<(), ShellError> {
            match self.0 {
                0 => Ok(()),
                exit_code => Err(ShellError::RemoteExec { exit_code }),
            }
        }
    }

    fn provider(config: ProviderConfig, api: Arc<FakeLifecycle>, exit: u32) -> EcsProvider {
        let locator = TaskLocator::new(Arc::new(FakeTasks), config.cluster_id.clone());
        let executor = CommandExecutor::new(
            locator.clone(),
            TunnelOrchestrator::new(Arc::new(IdleBridge), Arc::new(ExitShell(exit))),
        );
        EcsProvider::new(Arc::new(config), locator, api, executor)
    }

    fn ec2_config() -> ProviderConfig {
        ProviderConfig {
            cluster_id: "dev".to_string(),
            launch_type: LaunchType::Ec2,
            subnet_id: "subnet-1".to_string(),
            execution_role_arn: "arn:role/exec".to_string(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_find_reports_details_with_labels() {
        let api = Arc::new(FakeLifecycle::default());
        let provider = provider(ec2_config(), api.clone(), 0);

        let details = provider.find(&WorkspaceId::new("w1")).await.unwrap().unwrap();
        assert_eq!(details.id, "arn:aws:ecs:eu-west-1:1:task/dev/t1");
        assert_eq!(details.created, "2024-05-01T08:30:00Z");
        assert_eq!(details.state.status, TaskStatus::Running);
        assert_eq!(details.config.labels["devpod.user"], "vscode");

        assert!(provider.find(&WorkspaceId::new("w2")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_start_and_stop_are_noops_on_fargate() {
        let api = Arc::new(FakeLifecycle::default());
        let config = ProviderConfig {
            cluster_id: "dev".to_string(),
            ..Default::default()
        };
        let provider = provider(config, api.clone(), 0);

        provider.start(&WorkspaceId::new("w1")).await.unwrap();
        provider.stop(&WorkspaceId::new("w1")).await.unwrap();
        assert!(api.calls().is_empty());
    }

    #[tokio::test]
    async fn test_stop_stops_resolved_task() {
        let api = Arc::new(FakeLifecycle::default());
        let provider = provider(ec2_config(), api.clone(), 0);

        provider.stop(&WorkspaceId::new("w1")).await.unwrap();
        assert_eq!(api.calls(), vec!["stop dev arn:aws:ecs:eu-west-1:1:task/dev/t1"]);
    }

    #[tokio::test]
    async fn test_run_replaces_task_definition_then_starts() {
        let api = Arc::new(FakeLifecycle::default());
        api.task_definitions
            .lock()
            .unwrap()
            .push("arn:td/devpod-w1:1".to_string());
        let provider = provider(ec2_config(), api.clone(), 0);

        let options = RunOptions {
            image: "alpine".to_string(),
            ..Default::default()
        };
        provider.run(&WorkspaceId::new("w1"), &options).await.unwrap();

        assert_eq!(
            api.calls(),
            vec![
                "list devpod-w1",
                "deregister arn:td/devpod-w1:1",
                "delete arn:td/devpod-w1:1",
                "register devpod-w1",
                "list devpod-w1",
                "run arn:td/devpod-w1:1",
            ]
        );
    }

    #[tokio::test]
    async fn test_run_rolls_back_task_definition_on_failure() {
        let api = Arc::new(FakeLifecycle {
            run_failure: Some("RESOURCE:MEMORY".to_string()),
            ..Default::default()
        });
        let provider = provider(ec2_config(), api.clone(), 0);

        let err = provider
            .run(&WorkspaceId::new("w1"), &RunOptions::default())
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "run task failure: RESOURCE:MEMORY");
        assert!(api.task_definitions.lock().unwrap().is_empty());
        assert_eq!(api.calls().last().unwrap(), "delete arn:td/devpod-w1:1");
    }

    #[tokio::test]
    async fn test_run_requires_a_role() {
        let api = Arc::new(FakeLifecycle::default());
        let config = ProviderConfig {
            execution_role_arn: String::new(),
            ..ec2_config()
        };
        let provider = provider(config, api.clone(), 0);

        let err = provider
            .run(&WorkspaceId::new("w1"), &RunOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, ProviderError::MissingRole));
    }

    #[tokio::test]
    async fn test_start_requires_exactly_one_task_definition() {
        let api = Arc::new(FakeLifecycle::default());
        let provider = provider(ec2_config(), api, 0);

        let err = provider.start(&WorkspaceId::new("w1")).await.unwrap_err();
        assert_eq!(err.to_string(), "unexpected amount of task definitions: 0, expected 1");
    }

    #[tokio::test]
    async fn test_command_reflects_remote_exit_code() {
        let provider = provider(ec2_config(), Arc::new(FakeLifecycle::default()), 42);
        let io = CommandIo::new(
            Box::new(tokio::io::empty()),
            Box::new(tokio::io::sink()),
            Box::new(tokio::io::sink()),
        );

        let err = provider
            .command(
                &WorkspaceId::new("w1"),
                RemoteCommand::new("", "exit 42"),
                io,
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();
        assert_eq!(err.exit_code(), 42);
    }

    #[test]
    fn test_tunnel_failures_exit_generically() {
        let exited = || TunnelError::Exited {
            code: Some(255),
            stderr_tail: "TargetNotConnected".to_string(),
        };

        assert_eq!(ProviderError::from(ExecError::Tunnel(exited())).exit_code(), 1);
        assert_eq!(ProviderError::from(exited()).exit_code(), 1);
        assert_eq!(
            ProviderError::from(ExecError::Shell(ShellError::RemoteExec { exit_code: 7 })).exit_code(),
            7
        );
    }

    #[test]
    fn test_role_fallback() {
        let provider = provider(ec2_config(), Arc::new(FakeLifecycle::default()), 0);
        let (task, execution) = provider.roles().unwrap();
        assert_eq!(task, "arn:role/exec");
        assert_eq!(execution, "arn:role/exec");
    }
}
