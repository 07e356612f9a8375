//! Runs a command inside a workspace's container.

use ecs_provider_core::{TargetDescriptor, WorkspaceId};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::error::ExecError;
use crate::locator::TaskLocator;
use crate::orchestrator::TunnelOrchestrator;
use crate::shell::{CommandIo, RemoteCommand};

/// Resolves the workspace's task and runs the command through a tunnel to it.
#[derive(Clone)]
pub struct CommandExecutor {
    locator: TaskLocator,
    orchestrator: TunnelOrchestrator,
}

impl CommandExecutor {
    pub fn new(locator: TaskLocator, orchestrator: TunnelOrchestrator) -> Self {
        Self {
            locator,
            orchestrator,
        }
    }

    /// Session target of the workspace's authoritative task.
    pub async fn target(&self, workspace: &WorkspaceId) -> Result<TargetDescriptor, ExecError> {
        let task = self
            .locator
            .resolve(workspace)
            .await?
            .ok_or_else(|| ExecError::NotFound(workspace.clone()))?;
        if !task.status.is_running() {
            warn!(workspace = %workspace, task = %task.arn, status = %task.status, "Task is not running");
        }
        Ok(TargetDescriptor::for_task(self.locator.cluster_id(), &task)?)
    }

    pub async fn execute(
        &self,
        workspace: &WorkspaceId,
        command: RemoteCommand,
        io: CommandIo,
        cancel: &CancellationToken,
    ) -> Result<(), ExecError> {
        let target = self.target(workspace).await?;
        info!(workspace = %workspace, target = %target, user = command.effective_user(), "Executing command");
        self.orchestrator.run(target, command, io, cancel).await
    }
}
