//! Provider configuration, read once from the environment in `main`.

use std::fmt;
use std::path::PathBuf;

use ecs_provider_core::{RunOptions, WorkspaceId};
use ecs_provider_exec::transport::DEFAULT_PLUGIN;
use ecs_provider_exec::DEFAULT_SSH_PORT;
use thiserror::Error;

/// Errors loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("couldn't find option {0} in environment, please make sure {0} is defined")]
    Missing(&'static str),

    #[error("invalid value for {name}: {value}")]
    Invalid { name: &'static str, value: String },

    #[error("invalid {name}: {source}")]
    RunOptions {
        name: &'static str,
        #[source]
        source: ecs_provider_core::CoreError,
    },
}

/// Where tasks are placed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LaunchType {
    Fargate,
    Ec2,
    External,
}

impl LaunchType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Fargate => "FARGATE",
            Self::Ec2 => "EC2",
            Self::External => "EXTERNAL",
        }
    }

    pub fn is_fargate(&self) -> bool {
        matches!(self, Self::Fargate)
    }

    fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_uppercase().as_str() {
            "FARGATE" => Some(Self::Fargate),
            "EC2" => Some(Self::Ec2),
            "EXTERNAL" => Some(Self::External),
            _ => None,
        }
    }
}

impl fmt::Display for LaunchType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Provider configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderConfig {
    /// Cluster name or ARN.
    pub cluster_id: String,

    pub subnet_id: String,
    pub security_group_id: String,
    pub launch_type: LaunchType,

    /// `ENABLED` or `DISABLED`.
    pub assign_public_ip: String,

    /// Role the container runs with. Falls back to the execution role.
    pub task_role_arn: String,

    /// Role the agent pulls images and writes logs with. Falls back to the task role.
    pub execution_role_arn: String,

    pub task_cpu: String,
    pub task_memory: String,

    /// Reported by `target-architecture`.
    pub cluster_architecture: String,

    /// AWS region; `None` uses the SDK's default resolution.
    pub region: Option<String>,

    /// Port of the SSH server inside the container.
    pub ssh_port: u16,

    /// Path to the session-manager plugin binary.
    pub session_manager_plugin: PathBuf,

    /// Default log filter when `RUST_LOG` is unset.
    pub log_level: String,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            cluster_id: String::new(),
            subnet_id: String::new(),
            security_group_id: String::new(),
            launch_type: LaunchType::Fargate,
            assign_public_ip: "ENABLED".to_string(),
            task_role_arn: String::new(),
            execution_role_arn: String::new(),
            task_cpu: ".5 vcpu".to_string(),
            task_memory: "1 gb".to_string(),
            cluster_architecture: "amd64".to_string(),
            region: None,
            ssh_port: DEFAULT_SSH_PORT,
            session_manager_plugin: PathBuf::from(DEFAULT_PLUGIN),
            log_level: "info".to_string(),
        }
    }
}

impl ProviderConfig {
    /// Load from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load from `lookup`. Empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|value| !value.is_empty());
        let mut config = Self::default();

        config.cluster_id = get("CLUSTER_ID").ok_or(ConfigError::Missing("CLUSTER_ID"))?;
        if let Some(value) = get("SUBNET_ID") {
            config.subnet_id = value;
        }
        if let Some(value) = get("SECURITY_GROUP_ID") {
            config.security_group_id = value;
        }
        if let Some(value) = get("LAUNCH_TYPE") {
            config.launch_type = LaunchType::parse(&value).ok_or(ConfigError::Invalid {
                name: "LAUNCH_TYPE",
                value,
            })?;
        }
        if let Some(value) = get("ASSIGN_PUBLIC_IP") {
            config.assign_public_ip = value.to_ascii_uppercase();
        }
        if let Some(value) = get("TASK_ROLE_ARN") {
            config.task_role_arn = value;
        }
        if let Some(value) = get("EXECUTION_ROLE_ARN") {
            config.execution_role_arn = value;
        }
        if let Some(value) = get("TASK_CPU") {
            config.task_cpu = value;
        }
        if let Some(value) = get("TASK_MEMORY") {
            config.task_memory = value;
        }
        if let Some(value) = get("CLUSTER_ARCHITECTURE") {
            config.cluster_architecture = value;
        }
        config.region = get("AWS_REGION").or_else(|| get("AWS_DEFAULT_REGION"));
        if let Some(value) = get("SSH_PORT") {
            config.ssh_port = value
                .parse()
                .map_err(|_| ConfigError::Invalid { name: "SSH_PORT", value })?;
        }
        if let Some(value) = get("SESSION_MANAGER_PLUGIN") {
            config.session_manager_plugin = PathBuf::from(value);
        }
        if let Some(value) = get("LOG_LEVEL") {
            config.log_level = value;
        }

        Ok(config)
    }
}

/// Per-invocation values the orchestration client passes through the environment.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WorkspaceEnv {
    pub workspace_id: Option<WorkspaceId>,
    pub user: String,
    pub command: String,
    pub run_options: Option<String>,
}

impl WorkspaceEnv {
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|value| !value.is_empty());
        Self {
            workspace_id: get("DEVCONTAINER_ID").map(WorkspaceId::from),
            user: get("DEVCONTAINER_USER").unwrap_or_default(),
            command: get("DEVCONTAINER_COMMAND").unwrap_or_default(),
            run_options: get("DEVCONTAINER_RUN_OPTIONS"),
        }
    }

    /// The workspace this invocation is about.
    pub fn workspace(&self) -> Result<&WorkspaceId, ConfigError> {
        self.workspace_id
            .as_ref()
            .ok_or(ConfigError::Missing("DEVCONTAINER_ID"))
    }

    /// Parsed `DEVCONTAINER_RUN_OPTIONS`.
    pub fn run_options(&self) -> Result<RunOptions, ConfigError> {
        let raw = self
            .run_options
            .as_deref()
            .ok_or(ConfigError::Missing("DEVCONTAINER_RUN_OPTIONS"))?;
        RunOptions::from_json(raw).map_err(|source| ConfigError::RunOptions {
            name: "DEVCONTAINER_RUN_OPTIONS",
            source,
        })
    }
}
