//! Task definition for a workspace, built from the client's run options.

use std::collections::HashMap;

use ecs_provider_core::{RunOptions, WorkspaceId};
use sha2::{Digest, Sha256};

use crate::config::{LaunchType, ProviderConfig};

/// Name of the single container in every workspace task.
pub const CONTAINER_NAME: &str = "devpod";

/// Where the workspace volume is mounted on non-Fargate launch types.
pub const WORKSPACE_MOUNT_PATH: &str = "/workspaces";

/// Tag carrying the workspace id on task definitions and tasks.
pub const WORKSPACE_TAG: &str = "devpod-workspace-id";

#[derive(Debug, Clone, PartialEq)]
pub struct MountPoint {
    pub container_path: String,
    pub source_volume: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ContainerSpec {
    pub name: String,
    pub image: String,
    pub entry_point: Vec<String>,
    pub command: Vec<String>,
    pub user: Option<String>,
    /// Environment variables, sorted by name.
    pub environment: Vec<(String, String)>,
    pub labels: HashMap<String, String>,
    pub security_options: Vec<String>,
    pub privileged: Option<bool>,
    pub mount_points: Vec<MountPoint>,
}

/// Everything `RegisterTaskDefinition` needs for one workspace.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskDefinitionSpec {
    pub family: String,
    pub task_role_arn: String,
    pub execution_role_arn: String,
    pub cpu: String,
    pub memory: String,
    pub launch_type: LaunchType,
    pub container: ContainerSpec,
    /// Docker volumes (autoprovisioned, `local` driver, shared scope).
    pub volumes: Vec<String>,
    pub tags: Vec<(String, String)>,
}

/// Volume name for a mount source: `devpod-<workspace>-<first 5 hex of sha256(source)>`.
pub fn volume_name(workspace: &WorkspaceId, source: &str) -> String {
    let digest = hex::encode(Sha256::digest(source.as_bytes()));
    format!("{}-{}", workspace.family(), &digest[..5])
}

/// Tags applied to everything created for `workspace`.
pub fn workspace_tags(workspace: &WorkspaceId) -> Vec<(String, String)> {
    vec![(WORKSPACE_TAG.to_string(), workspace.to_string())]
}

/// Build the container definition. Volumes are only mounted off Fargate.
pub fn container_spec(
    config: &ProviderConfig,
    workspace: &WorkspaceId,
    options: &RunOptions,
) -> ContainerSpec {
    let mut environment: Vec<(String, String)> = options
        .env
        .iter()
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    environment.sort();

    let entry_point = if options.entrypoint.is_empty() {
        Vec::new()
    } else {
        vec![options.entrypoint.clone()]
    };

    let mut mount_points = Vec::new();
    if !config.launch_type.is_fargate() {
        mount_points.push(MountPoint {
            container_path: WORKSPACE_MOUNT_PATH.to_string(),
            source_volume: workspace.family(),
        });
        mount_points.extend(
            options
                .mounts
                .iter()
                .filter(|m| !m.source.is_empty() && !m.target.is_empty())
                .map(|m| MountPoint {
                    container_path: m.target.clone(),
                    source_volume: volume_name(workspace, &m.source),
                }),
        );
    }

    ContainerSpec {
        name: CONTAINER_NAME.to_string(),
        image: options.image.clone(),
        entry_point,
        command: options.cmd.clone(),
        user: (!options.user.is_empty()).then(|| options.user.clone()),
        environment,
        labels: options.labels_map(),
        security_options: options.security_opt.clone(),
        privileged: options.privileged,
        mount_points,
    }
}

/// Build the full task definition. Role ARNs must already be resolved.
pub fn task_definition_spec(
    config: &ProviderConfig,
    workspace: &WorkspaceId,
    options: &RunOptions,
    task_role_arn: String,
    execution_role_arn: String,
) -> TaskDefinitionSpec {
    let container = container_spec(config, workspace, options);
    let volumes = container
        .mount_points
        .iter()
        .map(|m| m.source_volume.clone())
        .collect();

    TaskDefinitionSpec {
        family: workspace.family(),
        task_role_arn,
        execution_role_arn,
        cpu: config.task_cpu.clone(),
        memory: config.task_memory.clone(),
        launch_type: config.launch_type,
        container,
        volumes,
        tags: workspace_tags(workspace),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ecs_provider_core::Mount;

    fn options() -> RunOptions {
        RunOptions {
            image: "mcr.microsoft.com/devcontainers/base:ubuntu".to_string(),
            entrypoint: "/bin/sh".to_string(),
            cmd: vec!["-c".to_string(), "sleep infinity".to_string()],
            env: HashMap::from([
                ("B".to_string(), "2".to_string()),
                ("A".to_string(), "1".to_string()),
            ]),
            labels: vec!["dev.containers.id=w1".to_string()],
            mounts: vec![
                Mount {
                    kind: "volume".to_string(),
                    source: "cache".to_string(),
                    target: "/cache".to_string(),
                },
                Mount {
                    kind: "bind".to_string(),
                    source: String::new(),
                    target: "/ignored".to_string(),
                },
            ],
            ..Default::default()
        }
    }

    #[test]
    fn test_volume_name() {
        let workspace = WorkspaceId::new("w1");
        // sha256("cache") = 5e1ecee0...
        assert_eq!(volume_name(&workspace, "cache"), "devpod-w1-5e1ec");
    }

    #[test]
    fn test_fargate_container_has_no_mounts() {
        let config = ProviderConfig::default();
        let spec = container_spec(&config, &WorkspaceId::new("w1"), &options());

        assert_eq!(spec.name, "devpod");
        assert_eq!(spec.entry_point, vec!["/bin/sh"]);
        assert_eq!(spec.command, vec!["-c", "sleep infinity"]);
        assert_eq!(spec.user, None);
        assert_eq!(
            spec.environment,
            vec![("A".to_string(), "1".to_string()), ("B".to_string(), "2".to_string())]
        );
        assert_eq!(spec.labels["dev.containers.id"], "w1");
        assert!(spec.mount_points.is_empty());
    }

    #[test]
    fn test_ec2_task_definition_mounts_volumes() {
        let config = ProviderConfig {
            launch_type: LaunchType::Ec2,
            ..Default::default()
        };
        let workspace = WorkspaceId::new("w1");
        let spec = task_definition_spec(
            &config,
            &workspace,
            &options(),
            "arn:task".to_string(),
            "arn:exec".to_string(),
        );

        assert_eq!(spec.family, "devpod-w1");
        assert_eq!(spec.volumes, vec!["devpod-w1", "devpod-w1-5e1ec"]);
        assert_eq!(spec.container.mount_points[0].container_path, "/workspaces");
        assert_eq!(spec.container.mount_points[1].container_path, "/cache");
        assert_eq!(spec.tags, vec![("devpod-workspace-id".to_string(), "w1".to_string())]);
    }
}
