//! Session Transport: the child side of the re-exec boundary.
//!
//! Turns a session descriptor into a live byte stream by handing it to the
//! external session-manager plugin, which pumps the session to and from our
//! own stdin/stdout.

use std::io;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};

use ecs_provider_core::SessionDescriptor;
use tokio::process::Command;
use tracing::{debug, info};

use crate::error::TunnelError;
use crate::session::SessionRequest;

/// Default name of the session-manager plugin binary, resolved via `PATH`.
pub const DEFAULT_PLUGIN: &str = "session-manager-plugin";

/// Runs the session-manager plugin for one session.
#[derive(Debug, Clone)]
pub struct PluginTransport {
    plugin_path: PathBuf,
    region: String,
    profile: String,
    endpoint: String,
}

impl PluginTransport {
    /// Create a transport for sessions in `region`, using the regional SSM endpoint.
    pub fn new(plugin_path: impl Into<PathBuf>, region: impl Into<String>) -> Self {
        let region = region.into();
        Self {
            plugin_path: plugin_path.into(),
            endpoint: format!("https://ssm.{region}.amazonaws.com"),
            region,
            profile: String::new(),
        }
    }

    /// Builder method to override the SSM endpoint URL.
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    /// Builder method to set the credentials profile passed to the plugin.
    pub fn with_profile(mut self, profile: impl Into<String>) -> Self {
        self.profile = profile.into();
        self
    }

    /// Build the plugin invocation for `descriptor`.
    pub fn command(
        &self,
        descriptor: &SessionDescriptor,
        request: &SessionRequest,
    ) -> Result<Command, TunnelError> {
        let session_json = descriptor
            .to_plugin_json()
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;

        let mut cmd = Command::new(&self.plugin_path);
        cmd.arg(session_json)
            .arg(&self.region)
            .arg("StartSession")
            .arg(&self.profile)
            .arg(request.to_plugin_json())
            .arg(&self.endpoint);
        Ok(cmd)
    }

    /// Attach our stdio to the session and wait for the plugin to exit.
    ///
    /// Takes the descriptor by value: it is single-use.
    pub async fn attach(
        &self,
        descriptor: SessionDescriptor,
        request: &SessionRequest,
    ) -> Result<ExitStatus, TunnelError> {
        let mut cmd = self.command(&descriptor, request)?;
        cmd.stdin(Stdio::inherit())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);

        debug!(plugin = %self.plugin_path.display(), region = %self.region, "Spawning session plugin");
        let mut child = cmd.spawn().map_err(TunnelError::Spawn)?;

        let status = child.wait().await?;
        info!(exit_code = ?status.code(), "Session plugin exited");
        Ok(status)
    }
}
