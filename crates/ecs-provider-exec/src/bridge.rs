//! Transport Bridge: re-executes this program in `tunnel` mode and wires the
//! child's stdio to one end of the tunnel.
//!
//! The session client is not safe to run for several sessions in one address
//! space, so every command gets a fresh child process.

use std::collections::VecDeque;
use std::ffi::OsString;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use ecs_provider_core::TargetDescriptor;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader, DuplexStream};
use tokio::process::{Child, Command};
use tokio_util::sync::CancellationToken;
use tokio_util::task::AbortOnDropHandle;
use tracing::{debug, info, warn};

use crate::error::TunnelError;

/// Exit status of a `tunnel` child whose session could not be opened.
pub const SESSION_FAILED_EXIT_CODE: i32 = 3;

/// Bytes of child stderr kept for diagnostics.
pub const STDERR_TAIL_BYTES: usize = 4096;

/// Time a cancelled child gets between SIGTERM and SIGKILL.
pub const TERMINATE_GRACE: Duration = Duration::from_secs(5);

/// Time allowed to flush child output after it exits.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Turns a target into a live byte stream on `endpoint`.
#[async_trait]
pub trait TransportBridge: Send + Sync {
    /// Pump bytes between the session for `target` and `endpoint` until the
    /// transport ends or `cancel` fires.
    async fn bridge(
        &self,
        target: TargetDescriptor,
        endpoint: DuplexStream,
        cancel: CancellationToken,
    ) -> Result<(), TunnelError>;
}

/// Bridge that runs `<program> <args..> <target>` as a child process.
#[derive(Debug, Clone)]
pub struct ReexecBridge {
    program: PathBuf,
    args: Vec<OsString>,
}

impl ReexecBridge {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    /// Builder method to add arguments placed before the target.
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Re-exec the running binary as `<exe> tunnel --port <port> <target>`.
    pub fn current_exe(port: u16) -> std::io::Result<Self> {
        Ok(Self::new(std::env::current_exe()?).with_args([
            "tunnel".to_string(),
            "--port".to_string(),
            port.to_string(),
        ]))
    }

    fn command(&self, target: &TargetDescriptor) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .arg(target.as_str())
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }
}

#[async_trait]
impl TransportBridge for ReexecBridge {
    async fn bridge(
        &self,
        target: TargetDescriptor,
        endpoint: DuplexStream,
        cancel: CancellationToken,
    ) -> Result<(), TunnelError> {
        let mut child = self.command(&target).spawn().map_err(TunnelError::Spawn)?;
        info!(target = %target, pid = ?child.id(), "Tunnel process spawned");

        let (mut child_stdin, mut child_stdout, child_stderr) =
            match (child.stdin.take(), child.stdout.take(), child.stderr.take()) {
                (Some(stdin), Some(stdout), Some(stderr)) => (stdin, stdout, stderr),
                _ => {
                    return Err(TunnelError::Io(std::io::Error::other(
                        "tunnel process stdio not captured",
                    )))
                }
            };

        let (mut from_shell, mut to_shell) = tokio::io::split(endpoint);

        // Dropping child_stdin at the end of the task is what closes the pipe.
        let _outbound = AbortOnDropHandle::new(tokio::spawn(async move {
            if let Err(e) = tokio::io::copy(&mut from_shell, &mut child_stdin).await {
                debug!(error = %e, "Tunnel stdin relay ended");
            }
        }));
        let inbound = AbortOnDropHandle::new(tokio::spawn(async move {
            if let Err(e) = tokio::io::copy(&mut child_stdout, &mut to_shell).await {
                debug!(error = %e, "Tunnel stdout relay ended");
            }
            let _ = to_shell.shutdown().await;
        }));
        let stderr_tail = AbortOnDropHandle::new(tokio::spawn(capture_stderr_tail(
            child_stderr,
            STDERR_TAIL_BYTES,
        )));

        let status = tokio::select! {
            status = child.wait() => status?,
            _ = cancel.cancelled() => {
                info!(target = %target, "Cancelling tunnel process");
                terminate(child);
                return Err(TunnelError::Killed);
            }
        };

        let _ = tokio::time::timeout(DRAIN_TIMEOUT, inbound).await;
        if status.success() {
            info!(target = %target, "Tunnel process exited");
            return Ok(());
        }

        let stderr_tail = tokio::time::timeout(DRAIN_TIMEOUT, stderr_tail)
            .await
            .ok()
            .and_then(Result::ok)
            .unwrap_or_default();
        warn!(
            target = %target,
            exit_code = ?status.code(),
            stderr = %stderr_tail,
            "Tunnel process failed"
        );

        match status.code() {
            Some(SESSION_FAILED_EXIT_CODE) => Err(TunnelError::SessionRefused { stderr_tail }),
            code => Err(TunnelError::Exited { code, stderr_tail }),
        }
    }
}

/// Ask the child to stop, then kill it if it is still around after the grace
/// period. The wait runs detached so the caller does not block on it.
fn terminate(mut child: Child) {
    send_sigterm(&mut child);
    tokio::spawn(async move {
        if tokio::time::timeout(TERMINATE_GRACE, child.wait()).await.is_err() {
            warn!(pid = ?child.id(), "Tunnel process ignored SIGTERM, killing");
            if let Err(e) = child.kill().await {
                warn!(error = %e, "Failed to kill tunnel process");
            }
        }
    });
}

#[cfg(unix)]
fn send_sigterm(child: &mut Child) {
    let Some(pid) = child.id() else {
        return;
    };
    let Ok(pid) = libc::pid_t::try_from(pid) else {
        let _ = child.start_kill();
        return;
    };
    // SAFETY: kill(2) has no memory-safety preconditions; pid is our unreaped child.
    if unsafe { libc::kill(pid, libc::SIGTERM) } != 0 {
        warn!(pid, error = %std::io::Error::last_os_error(), "Failed to send SIGTERM");
    }
}

#[cfg(not(unix))]
fn send_sigterm(child: &mut Child) {
    let _ = child.start_kill();
}

/// Read `reader` to the end, logging each line and keeping roughly the last
/// `limit` bytes (whole lines).
pub async fn capture_stderr_tail<R>(reader: R, limit: usize) -> String
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(reader);
    let mut lines: VecDeque<String> = VecDeque::new();
    let mut size = 0usize;
    let mut buf = Vec::new();

    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                let line = String::from_utf8_lossy(&buf).trim_end().to_string();
                if line.is_empty() {
                    continue;
                }
                debug!(stderr = %line, "Tunnel stderr");
                size += line.len();
                lines.push_back(line);
                while size > limit && lines.len() > 1 {
                    if let Some(dropped) = lines.pop_front() {
                        size -= dropped.len();
                    }
                }
            }
            Err(e) => {
                debug!(error = %e, "Error reading tunnel stderr");
                break;
            }
        }
    }

    lines.into_iter().collect::<Vec<_>>().join("\n")
}
