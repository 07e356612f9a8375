//! AWS SDK implementations of the control-plane and session-broker seams.

use std::collections::HashMap;

use async_trait::async_trait;
use aws_config::{BehaviorVersion, Region, SdkConfig};
use aws_sdk_ecs::error::DisplayErrorContext;
use aws_sdk_ecs::primitives::DateTime as SdkDateTime;
use aws_sdk_ecs::types::{
    AssignPublicIp, AwsVpcConfiguration, Compatibility, ContainerDefinition,
    DesiredStatus as EcsDesiredStatus, DockerVolumeConfiguration, Failure, KeyValuePair,
    LaunchType as EcsLaunchType, LinuxParameters, MountPoint, NetworkConfiguration, NetworkMode,
    Scope, Tag, Volume,
};
use chrono::{DateTime, Utc};
use ecs_provider_core::{SessionDescriptor, Task, TaskStatus};
use ecs_provider_exec::{
    ApiError, DescribeTasksOutput, DesiredStatus, SessionBroker, SessionError, SessionRequest,
    TaskApi, TaskFailure,
};
use tracing::debug;

use crate::provider::{LifecycleApi, RunTaskRequest};
use crate::task_definition::{ContainerSpec, TaskDefinitionSpec};

/// Load shared SDK configuration, optionally pinning the region.
pub async fn load_sdk_config(region: Option<&str>) -> SdkConfig {
    let mut loader = aws_config::defaults(BehaviorVersion::latest());
    if let Some(region) = region {
        loader = loader.region(Region::new(region.to_string()));
    }
    loader.load().await
}

fn api_error<E: std::error::Error>(err: E) -> ApiError {
    ApiError::new(DisplayErrorContext(err).to_string())
}

fn failures(failures: &[Failure]) -> Vec<TaskFailure> {
    failures
        .iter()
        .map(|f| TaskFailure {
            arn: f.arn().map(str::to_string),
            reason: f.reason().unwrap_or("unknown reason").to_string(),
        })
        .collect()
}

fn to_chrono(value: &SdkDateTime) -> Option<DateTime<Utc>> {
    DateTime::<Utc>::from_timestamp(value.secs(), value.subsec_nanos())
}

fn to_task(task: &aws_sdk_ecs::types::Task) -> Task {
    // Records without a creation time sort after every real one.
    let created_at = task
        .created_at()
        .and_then(to_chrono)
        .unwrap_or(DateTime::<Utc>::MIN_UTC);

    let mut converted = Task::new(task.task_arn().unwrap_or_default(), created_at)
        .with_status(TaskStatus::from_last_status(task.last_status()));
    converted.started_at = task.started_at().and_then(to_chrono);
    converted.task_definition_arn = task.task_definition_arn().map(str::to_string);
    for runtime_id in task.containers().iter().filter_map(|c| c.runtime_id()) {
        converted = converted.with_container(runtime_id);
    }
    converted
}

fn tags(tags: &[(String, String)]) -> Vec<Tag> {
    tags.iter()
        .map(|(key, value)| Tag::builder().key(key).value(value).build())
        .collect()
}

fn container_definition(spec: &ContainerSpec) -> ContainerDefinition {
    let environment = spec
        .environment
        .iter()
        .map(|(name, value)| KeyValuePair::builder().name(name).value(value).build())
        .collect();
    let mount_points = spec
        .mount_points
        .iter()
        .map(|m| {
            MountPoint::builder()
                .container_path(&m.container_path)
                .source_volume(&m.source_volume)
                .build()
        })
        .collect();

    ContainerDefinition::builder()
        .name(&spec.name)
        .image(&spec.image)
        .essential(true)
        .linux_parameters(LinuxParameters::builder().init_process_enabled(true).build())
        .set_entry_point((!spec.entry_point.is_empty()).then(|| spec.entry_point.clone()))
        .set_command((!spec.command.is_empty()).then(|| spec.command.clone()))
        .set_user(spec.user.clone())
        .set_environment(Some(environment))
        .set_docker_labels((!spec.labels.is_empty()).then(|| spec.labels.clone()))
        .set_docker_security_options(Some(spec.security_options.clone()))
        .set_privileged(spec.privileged)
        .set_mount_points(Some(mount_points))
        .build()
}

/// ECS control plane.
#[derive(Clone)]
pub struct EcsClient {
    client: aws_sdk_ecs::Client,
}

impl EcsClient {
    pub fn new(config: &SdkConfig) -> Self {
        Self {
            client: aws_sdk_ecs::Client::new(config),
        }
    }
}

#[async_trait]
impl TaskApi for EcsClient {
    async fn list_tasks(
        &self,
        cluster: &str,
        family: &str,
        desired_status: DesiredStatus,
        max_results: i32,
    ) -> Result<Vec<String>, ApiError> {
        let status = match desired_status {
            DesiredStatus::Running => EcsDesiredStatus::Running,
            DesiredStatus::Stopped => EcsDesiredStatus::Stopped,
        };
        let output = self
            .client
            .list_tasks()
            .cluster(cluster)
            .family(family)
            .desired_status(status)
            .max_results(max_results)
            .send()
            .await
            .map_err(api_error)?;
        Ok(output.task_arns().to_vec())
    }

    async fn describe_tasks(
        &self,
        cluster: &str,
        task_arns: &[String],
    ) -> Result<DescribeTasksOutput, ApiError> {
        let output = self
            .client
            .describe_tasks()
            .cluster(cluster)
            .set_tasks(Some(task_arns.to_vec()))
            .send()
            .await
            .map_err(api_error)?;
        Ok(DescribeTasksOutput {
            tasks: output.tasks().iter().map(to_task).collect(),
            failures: failures(output.failures()),
        })
    }
}

#[async_trait]
impl LifecycleApi for EcsClient {
    async fn stop_task(&self, cluster: &str, task_arn: &str) -> Result<(), ApiError> {
        self.client
            .stop_task()
            .cluster(cluster)
            .task(task_arn)
            .send()
            .await
            .map_err(api_error)?;
        Ok(())
    }

    async fn run_task(&self, request: &RunTaskRequest) -> Result<Vec<TaskFailure>, ApiError> {
        let vpc = AwsVpcConfiguration::builder()
            .set_subnets(Some(request.subnets.clone()))
            .set_security_groups(Some(request.security_groups.clone()))
            .assign_public_ip(AssignPublicIp::from(request.assign_public_ip.as_str()))
            .build()
            .map_err(api_error)?;

        let output = self
            .client
            .run_task()
            .cluster(&request.cluster)
            .task_definition(&request.task_definition_arn)
            .count(1)
            .enable_execute_command(true)
            .launch_type(EcsLaunchType::from(request.launch_type.as_str()))
            .network_configuration(NetworkConfiguration::builder().awsvpc_configuration(vpc).build())
            .set_tags(Some(tags(&request.tags)))
            .send()
            .await
            .map_err(api_error)?;
        debug!(started = output.tasks().len(), "RunTask returned");
        Ok(failures(output.failures()))
    }

    async fn register_task_definition(&self, spec: &TaskDefinitionSpec) -> Result<(), ApiError> {
        let volume_config = DockerVolumeConfiguration::builder()
            .autoprovision(true)
            .driver("local")
            .scope(Scope::Shared)
            .build();
        let volumes: Vec<Volume> = spec
            .volumes
            .iter()
            .map(|name| {
                Volume::builder()
                    .name(name)
                    .docker_volume_configuration(volume_config.clone())
                    .build()
            })
            .collect();

        self.client
            .register_task_definition()
            .family(&spec.family)
            .container_definitions(container_definition(&spec.container))
            .task_role_arn(&spec.task_role_arn)
            .execution_role_arn(&spec.execution_role_arn)
            .cpu(&spec.cpu)
            .memory(&spec.memory)
            .network_mode(NetworkMode::Awsvpc)
            .requires_compatibilities(Compatibility::from(spec.launch_type.as_str()))
            .set_volumes((!volumes.is_empty()).then_some(volumes))
            .set_tags(Some(tags(&spec.tags)))
            .send()
            .await
            .map_err(api_error)?;
        Ok(())
    }

    async fn list_task_definitions(
        &self,
        family_prefix: &str,
        max_results: i32,
    ) -> Result<Vec<String>, ApiError> {
        let output = self
            .client
            .list_task_definitions()
            .family_prefix(family_prefix)
            .max_results(max_results)
            .send()
            .await
            .map_err(api_error)?;
        Ok(output.task_definition_arns().to_vec())
    }

    async fn deregister_task_definition(&self, arn: &str) -> Result<(), ApiError> {
        self.client
            .deregister_task_definition()
            .task_definition(arn)
            .send()
            .await
            .map_err(api_error)?;
        Ok(())
    }

    async fn delete_task_definitions(&self, arns: &[String]) -> Result<Vec<TaskFailure>, ApiError> {
        let output = self
            .client
            .delete_task_definitions()
            .set_task_definitions(Some(arns.to_vec()))
            .send()
            .await
            .map_err(api_error)?;
        Ok(failures(output.failures()))
    }

    async fn container_labels(
        &self,
        task_definition_arn: &str,
    ) -> Result<HashMap<String, String>, ApiError> {
        let output = self
            .client
            .describe_task_definition()
            .task_definition(task_definition_arn)
            .send()
            .await
            .map_err(api_error)?;
        Ok(output
            .task_definition()
            .and_then(|td| td.container_definitions().first())
            .and_then(|c| c.docker_labels())
            .cloned()
            .unwrap_or_default())
    }
}

/// SSM session broker.
#[derive(Clone)]
pub struct SsmBroker {
    client: aws_sdk_ssm::Client,
}

impl SsmBroker {
    pub fn new(config: &SdkConfig) -> Self {
        Self {
            client: aws_sdk_ssm::Client::new(config),
        }
    }
}

#[async_trait]
impl SessionBroker for SsmBroker {
    async fn start_session(&self, request: &SessionRequest) -> Result<SessionDescriptor, SessionError> {
        let target = request.target.to_string();
        let output = self
            .client
            .start_session()
            .target(&target)
            .document_name(&request.document_name)
            .set_parameters(Some(request.parameters.clone()))
            .send()
            .await
            .map_err(|e| SessionError::Rejected {
                target: target.clone(),
                message: DisplayErrorContext(&e).to_string(),
            })?;

        let field = |value: Option<&str>, name: &'static str| {
            value
                .filter(|v| !v.is_empty())
                .map(str::to_string)
                .ok_or_else(|| SessionError::Incomplete {
                    target: target.clone(),
                    field: name,
                })
        };

        Ok(SessionDescriptor {
            session_id: field(output.session_id(), "SessionId")?,
            stream_url: field(output.stream_url(), "StreamUrl")?,
            token_value: field(output.token_value(), "TokenValue")?,
            target: request.target.clone(),
        })
    }
}
