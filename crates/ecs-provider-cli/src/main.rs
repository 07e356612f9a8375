//! ecs-provider - DevPod provider for AWS ECS.
//!
//! Each subcommand is one provider operation. `tunnel` is the hidden helper
//! `command` re-executes to carry the remote shell's bytes.

mod aws;
mod config;
mod provider;
mod task_definition;

use std::process::ExitCode;
use std::sync::Arc;

use aws_config::SdkConfig;
use clap::{Parser, Subcommand};
use ecs_provider_core::{CoreError, TargetDescriptor, WorkspaceId};
use ecs_provider_exec::{
    CommandExecutor, CommandIo, PluginTransport, ReexecBridge, RemoteCommand, SessionOpener,
    SshShell, TaskLocator, TunnelError, TunnelOrchestrator, SESSION_FAILED_EXIT_CODE,
};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::aws::{load_sdk_config, EcsClient, SsmBroker};
use crate::config::{ProviderConfig, WorkspaceEnv};
use crate::provider::{EcsProvider, ProviderError};

/// DevPod provider for AWS ECS
#[derive(Parser)]
#[command(name = "ecs-provider")]
#[command(about = "DevPod provider that runs workspaces as ECS tasks", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(flatten)]
    Workspace(WorkspaceCommand),

    /// Open a session to a container and pump it over stdin/stdout
    #[command(hide = true)]
    Tunnel {
        /// Session target (`ecs:<cluster>_<task>_<runtime>`)
        target: String,

        /// Port of the SSH server inside the container
        #[arg(long)]
        port: Option<u16>,
    },

    /// Print the CPU architecture of the cluster
    #[command(name = "target-architecture")]
    TargetArchitecture,
}

/// Operations on the workspace named by `DEVCONTAINER_ID`.
#[derive(Subcommand)]
enum WorkspaceCommand {
    /// Run DEVCONTAINER_COMMAND inside the workspace container
    Command,

    /// Print the workspace container as JSON
    Find,

    /// Start the workspace task
    Start,

    /// Stop the workspace task
    Stop,

    /// Register a task definition from DEVCONTAINER_RUN_OPTIONS and run it
    Run,

    /// Stop the workspace task and delete its task definitions
    Delete,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = ProviderConfig::from_env();
    let log_level = config
        .as_ref()
        .map(|c| c.log_level.clone())
        .unwrap_or_else(|_| "info".to_string());

    // stdout belongs to the orchestration client (and to the tunnel's bytes).
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&log_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = match config {
        Ok(config) => Arc::new(config),
        Err(e) => {
            error!(error = %e, "Invalid configuration");
            return ExitCode::FAILURE;
        }
    };

    let cancel = CancellationToken::new();
    tokio::spawn(cancel_on_signal(cancel.clone()));

    let code = match run(cli.command, config, &cancel).await {
        Ok(code) => code,
        Err(e) => {
            error!(error = %e, "Command failed");
            e.exit_code()
        }
    };
    ExitCode::from(u8::try_from(code).unwrap_or(1))
}

async fn run(
    command: Commands,
    config: Arc<ProviderConfig>,
    cancel: &CancellationToken,
) -> Result<i32, ProviderError> {
    match command {
        Commands::TargetArchitecture => {
            println!("{}", config.cluster_architecture);
            Ok(0)
        }
        Commands::Tunnel { target, port } => {
            let sdk_config = load_sdk_config(config.region.as_deref()).await;
            let port = port.unwrap_or(config.ssh_port);
            tunnel(&config, &sdk_config, TargetDescriptor::parse(target)?, port, cancel).await
        }
        Commands::Workspace(command) => {
            let env = WorkspaceEnv::from_env();
            let workspace = env.workspace()?.clone();
            let sdk_config = load_sdk_config(config.region.as_deref()).await;
            let provider = build_provider(config, &sdk_config)?;
            workspace_command(command, &provider, &workspace, &env, cancel).await?;
            Ok(0)
        }
    }
}

async fn workspace_command(
    command: WorkspaceCommand,
    provider: &EcsProvider,
    workspace: &WorkspaceId,
    env: &WorkspaceEnv,
    cancel: &CancellationToken,
) -> Result<(), ProviderError> {
    match command {
        WorkspaceCommand::Command => {
            let command = RemoteCommand::new(env.user.clone(), env.command.clone());
            provider
                .command(workspace, command, CommandIo::inherit(), cancel)
                .await
        }
        WorkspaceCommand::Find => {
            if let Some(details) = provider.find(workspace).await? {
                println!("{}", serde_json::to_string(&details).map_err(CoreError::from)?);
            }
            Ok(())
        }
        WorkspaceCommand::Start => provider.start(workspace).await,
        WorkspaceCommand::Stop => provider.stop(workspace).await,
        WorkspaceCommand::Run => provider.run(workspace, &env.run_options()?).await,
        WorkspaceCommand::Delete => provider.delete(workspace).await,
    }
}

fn build_provider(
    config: Arc<ProviderConfig>,
    sdk_config: &SdkConfig,
) -> Result<EcsProvider, ProviderError> {
    let ecs = Arc::new(EcsClient::new(sdk_config));
    let locator = TaskLocator::new(ecs.clone(), config.cluster_id.clone());

    let bridge = ReexecBridge::current_exe(config.ssh_port).map_err(TunnelError::Spawn)?;
    let orchestrator = TunnelOrchestrator::new(Arc::new(bridge), Arc::new(SshShell::new()));
    let executor = CommandExecutor::new(locator.clone(), orchestrator);

    Ok(EcsProvider::new(config, locator, ecs, executor))
}

/// Child side of the re-exec boundary. Exits with [`SESSION_FAILED_EXIT_CODE`]
/// when the broker refuses the session, otherwise with the plugin's status.
async fn tunnel(
    config: &ProviderConfig,
    sdk_config: &SdkConfig,
    target: TargetDescriptor,
    port: u16,
    cancel: &CancellationToken,
) -> Result<i32, ProviderError> {
    let opener = SessionOpener::new(Arc::new(SsmBroker::new(sdk_config)), port);
    let descriptor = match opener.open(&target).await {
        Ok(descriptor) => descriptor,
        Err(e) => {
            error!(target = %target, error = %e, "Failed to start session");
            return Ok(SESSION_FAILED_EXIT_CODE);
        }
    };

    let region = sdk_config
        .region()
        .map(|r| r.as_ref().to_string())
        .unwrap_or_default();
    let transport = PluginTransport::new(&config.session_manager_plugin, region);
    let request = opener.request(&target);

    tokio::select! {
        status = transport.attach(descriptor, &request) => {
            let status = status?;
            info!(target = %target, %status, "Session plugin exited");
            Ok(plugin_exit_code(status.code()))
        }
        _ = cancel.cancelled() => {
            info!(target = %target, "Tunnel cancelled");
            Ok(1)
        }
    }
}

/// Exit status of the tunnel child for a plugin exit. The plugin's own status
/// passes through, except that it may never collide with
/// [`SESSION_FAILED_EXIT_CODE`], which the parent reads as a refused session.
fn plugin_exit_code(code: Option<i32>) -> i32 {
    match code {
        Some(SESSION_FAILED_EXIT_CODE) | None => 1,
        Some(code) => code,
    }
}

async fn cancel_on_signal(cancel: CancellationToken) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => info!("Received SIGINT"),
                    _ = sigterm.recv() => info!("Received SIGTERM"),
                }
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                let _ = tokio::signal::ctrl_c().await;
                info!("Received SIGINT");
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
        info!("Received SIGINT");
    }

    cancel.cancel();
}
