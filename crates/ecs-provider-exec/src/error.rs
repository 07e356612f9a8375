//! Error types for task lookup and command execution.

use ecs_provider_core::{CoreError, WorkspaceId};
use thiserror::Error;

/// A control-plane call failed. Carries the SDK's rendered error chain.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct ApiError(pub String);

impl ApiError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// Errors resolving the authoritative task of a workspace.
#[derive(Debug, Error)]
pub enum LookupError {
    #[error("list running tasks: {0}")]
    ListRunning(#[source] ApiError),

    #[error("list stopped tasks: {0}")]
    ListStopped(#[source] ApiError),

    #[error("describe tasks: {0}")]
    Describe(#[source] ApiError),

    /// The batch describe reported a per-task failure.
    #[error("describe tasks failures: {0}")]
    DescribeFailure(String),
}

/// The session broker refused or failed to issue a session.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("start session for {target}: {message}")]
    Rejected { target: String, message: String },

    #[error("start session for {target}: response is missing {field}")]
    Incomplete { target: String, field: &'static str },
}

/// Failures of the transport child process.
#[derive(Debug, Error)]
pub enum TunnelError {
    #[error("spawn tunnel process: {0}")]
    Spawn(#[source] std::io::Error),

    /// The child could not obtain a session from the broker.
    #[error("session broker refused the session{}", tail_suffix(.stderr_tail))]
    SessionRefused { stderr_tail: String },

    #[error("tunnel process exited with {}{}", exit_description(.code), tail_suffix(.stderr_tail))]
    Exited {
        code: Option<i32>,
        stderr_tail: String,
    },

    #[error("tunnel process killed by cancellation")]
    Killed,

    #[error("tunnel process: {0}")]
    Io(#[from] std::io::Error),
}

impl TunnelError {
    /// Exit status the child reported, for diagnostics.
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            Self::Exited { code, .. } => *code,
            _ => None,
        }
    }

    /// Captured tail of the child's stderr, if any.
    pub fn stderr_tail(&self) -> Option<&str> {
        match self {
            Self::SessionRefused { stderr_tail } | Self::Exited { stderr_tail, .. }
                if !stderr_tail.is_empty() =>
            {
                Some(stderr_tail.as_str())
            }
            _ => None,
        }
    }
}

fn exit_description(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("status {code}"),
        None => "a signal".to_string(),
    }
}

fn tail_suffix(tail: &str) -> String {
    if tail.is_empty() {
        String::new()
    } else {
        format!(": {tail}")
    }
}

/// Failures of the remote-shell layer.
#[derive(Debug, Error)]
pub enum ShellError {
    /// Key exchange or authentication did not complete.
    #[error("handshake: {0}")]
    Handshake(String),

    /// The remote command ran and exited non-zero.
    #[error("remote command exited with status {exit_code}")]
    RemoteExec { exit_code: u32 },

    #[error("remote session closed without an exit status")]
    MissingExitStatus,

    #[error("ssh channel: {0}")]
    Channel(String),

    #[error("relay stdio: {0}")]
    Io(#[from] std::io::Error),

    #[error("remote session cancelled")]
    Cancelled,
}

/// Top-level result of running a command in a workspace.
#[derive(Debug, Error)]
pub enum ExecError {
    #[error(transparent)]
    Lookup(#[from] LookupError),

    #[error("no task for workspace {0} found")]
    NotFound(WorkspaceId),

    #[error(transparent)]
    Target(#[from] CoreError),

    #[error("ssh into container: {0}")]
    Shell(#[source] ShellError),

    #[error("connect to session broker: {0}")]
    Tunnel(#[source] TunnelError),

    /// A driver task panicked; the string names the side.
    #[error("{0}: driver task panicked")]
    DriverPanicked(&'static str),
}

impl ExecError {
    /// Exit status the invoking command should reflect. Only the remote
    /// command's own status counts; every other failure is generic.
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            Self::Shell(ShellError::RemoteExec { exit_code }) => i32::try_from(*exit_code).ok(),
            _ => None,
        }
    }
}
