//! Remote command tunnel for the ECS provider.
//!
//! A command runs in a workspace's container in three steps:
//!
//! 1. [`TaskLocator`] finds the authoritative task of the workspace.
//! 2. [`ReexecBridge`] runs this program again in `tunnel` mode; the child
//!    opens a session ([`SessionOpener`]) and hands it to the session-manager
//!    plugin ([`PluginTransport`]), which pumps the session over its stdio.
//! 3. [`SshShell`] speaks SSH over the child's stdio and runs the command.
//!
//! [`TunnelOrchestrator`] runs steps 2 and 3 concurrently and reports
//! whichever finishes first.

pub mod bridge;
pub mod error;
pub mod executor;
pub mod locator;
pub mod orchestrator;
pub mod session;
pub mod shell;
pub mod stdio;
pub mod transport;

pub use bridge::{ReexecBridge, TransportBridge, SESSION_FAILED_EXIT_CODE};
pub use error::{ApiError, ExecError, LookupError, SessionError, ShellError, TunnelError};
pub use executor::CommandExecutor;
pub use locator::{DescribeTasksOutput, DesiredStatus, TaskApi, TaskFailure, TaskLocator};
pub use orchestrator::{CancelScope, Side, TunnelOrchestrator};
pub use session::{SessionBroker, SessionOpener, SessionRequest, DEFAULT_SSH_PORT};
pub use shell::{CommandIo, RemoteCommand, RemoteShell, SshShell};
pub use stdio::ThreadReader;
pub use transport::PluginTransport;
