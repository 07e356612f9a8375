//! Tunnel Orchestrator: runs the transport bridge and the remote shell
//! against each other and reports whichever finishes first.
//!
//! ```text
//! Idle -> PipesOpen -> BothRunning -> Completed -> Torn-down
//! ```
//!
//! The two tunnel endpoints are the halves of one in-process duplex channel,
//! so opening them cannot fail and no side is ever started on a half-built
//! tunnel.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use ecs_provider_core::TargetDescriptor;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, Instrument};
use uuid::Uuid;

use crate::bridge::TransportBridge;
use crate::error::ExecError;
use crate::shell::{CommandIo, RemoteCommand, RemoteShell};

/// Bytes buffered in each direction of the tunnel.
pub const TUNNEL_BUFFER: usize = 64 * 1024;

/// One of the two drivers of a tunnel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Shell,
    Tunnel,
}

impl Side {
    /// Context attached to errors reported by this side.
    pub fn context(&self) -> &'static str {
        match self {
            Self::Shell => "ssh into container",
            Self::Tunnel => "connect to session broker",
        }
    }
}

/// Cancellation covering both drivers of one invocation.
///
/// `cancel` is idempotent and reports whether this call was the one that
/// actually cancelled.
#[derive(Debug)]
pub struct CancelScope {
    token: CancellationToken,
    issued: AtomicBool,
}

impl CancelScope {
    /// A scope that is also cancelled when `parent` is.
    pub fn child_of(parent: &CancellationToken) -> Self {
        Self {
            token: parent.child_token(),
            issued: AtomicBool::new(false),
        }
    }

    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub fn cancel(&self) -> bool {
        if self.issued.swap(true, Ordering::SeqCst) {
            return false;
        }
        self.token.cancel();
        true
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

/// Cancels the scope when the orchestrating future goes away early.
struct CancelOnDrop(Arc<CancelScope>);

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        self.0.cancel();
    }
}

/// Runs one command through a tunnel.
#[derive(Clone)]
pub struct TunnelOrchestrator {
    bridge: Arc<dyn TransportBridge>,
    shell: Arc<dyn RemoteShell>,
}

impl TunnelOrchestrator {
    pub fn new(bridge: Arc<dyn TransportBridge>, shell: Arc<dyn RemoteShell>) -> Self {
        Self { bridge, shell }
    }

    /// Run `command` on `target`. Cancelling `cancel` tears down both sides.
    pub async fn run(
        &self,
        target: TargetDescriptor,
        command: RemoteCommand,
        io: CommandIo,
        cancel: &CancellationToken,
    ) -> Result<(), ExecError> {
        let scope = Arc::new(CancelScope::child_of(cancel));
        self.run_scoped(target, command, io, scope).await
    }

    /// Like [`run`](Self::run), with a caller-owned scope.
    pub async fn run_scoped(
        &self,
        target: TargetDescriptor,
        command: RemoteCommand,
        io: CommandIo,
        scope: Arc<CancelScope>,
    ) -> Result<(), ExecError> {
        let span = info_span!("tunnel", invocation = %Uuid::new_v4(), target = %target);
        self.drive(target, command, io, scope).instrument(span).await
    }

    async fn drive(
        &self,
        target: TargetDescriptor,
        command: RemoteCommand,
        io: CommandIo,
        scope: Arc<CancelScope>,
    ) -> Result<(), ExecError> {
        let _teardown = CancelOnDrop(scope.clone());

        let (shell_end, tunnel_end) = tokio::io::duplex(TUNNEL_BUFFER);
        debug!("Tunnel endpoints open");

        let mut bridge_task = {
            let bridge = self.bridge.clone();
            let token = scope.token();
            tokio::spawn(
                async move { bridge.bridge(target, tunnel_end, token).await }.in_current_span(),
            )
        };
        let mut shell_task = {
            let shell = self.shell.clone();
            let token = scope.token();
            tokio::spawn(
                async move { shell.run_remote(shell_end, command, io, token).await }
                    .in_current_span(),
            )
        };

        let (side, result) = tokio::select! {
            joined = &mut shell_task => (
                Side::Shell,
                match joined {
                    Ok(result) => result.map_err(ExecError::Shell),
                    Err(_) => Err(ExecError::DriverPanicked(Side::Shell.context())),
                },
            ),
            joined = &mut bridge_task => (
                Side::Tunnel,
                match joined {
                    Ok(result) => result.map_err(ExecError::Tunnel),
                    Err(_) => Err(ExecError::DriverPanicked(Side::Tunnel.context())),
                },
            ),
        };

        // The losing driver is left running detached; it sees the cancellation
        // and tears itself down.
        scope.cancel();
        info!(side = side.context(), success = result.is_ok(), "Tunnel completed");
        result
    }
}
