//! Shell Client Adapter: runs one command over SSH on top of the tunnel.

use std::sync::Arc;

use async_trait::async_trait;
use russh::client;
use russh::{ChannelMsg, Disconnect};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, DuplexStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::error::ShellError;
use crate::stdio::ThreadReader;

/// User the remote command runs as when none is given.
pub const DEFAULT_USER: &str = "root";

/// SSH extended-data stream number of stderr.
const STDERR_EXT: u32 = 1;

pub type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;
pub type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Caller-side stdio relayed to and from the remote process.
pub struct CommandIo {
    pub stdin: BoxedReader,
    pub stdout: BoxedWriter,
    pub stderr: BoxedWriter,
}

impl CommandIo {
    pub fn new(stdin: BoxedReader, stdout: BoxedWriter, stderr: BoxedWriter) -> Self {
        Self {
            stdin,
            stdout,
            stderr,
        }
    }

    /// This process's own stdin/stdout/stderr. Stdin is read on its own
    /// thread so a still-open stdin never holds up exit.
    pub fn inherit() -> Self {
        Self::new(
            Box::new(ThreadReader::stdin()),
            Box::new(tokio::io::stdout()),
            Box::new(tokio::io::stderr()),
        )
    }
}

/// What to run remotely, and as whom.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RemoteCommand {
    /// Remote user; empty means [`DEFAULT_USER`].
    pub user: String,
    pub command: String,
}

impl RemoteCommand {
    pub fn new(user: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            command: command.into(),
        }
    }

    pub fn effective_user(&self) -> &str {
        if self.user.is_empty() {
            DEFAULT_USER
        } else {
            &self.user
        }
    }
}

/// A remote-shell client that runs a command over a byte stream.
#[async_trait]
pub trait RemoteShell: Send + Sync {
    /// Handshake over `stream`, run `command`, and relay `io` until the
    /// remote process exits or `cancel` fires.
    async fn run_remote(
        &self,
        stream: DuplexStream,
        command: RemoteCommand,
        io: CommandIo,
        cancel: CancellationToken,
    ) -> Result<(), ShellError>;
}

/// Accepts whatever host key the container presents. The tunnel endpoint is
/// authenticated by the session broker, not by the key.
struct AcceptAnyHostKey;

#[async_trait]
impl client::Handler for AcceptAnyHostKey {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        _server_public_key: &russh_keys::key::PublicKey,
    ) -> Result<bool, Self::Error> {
        Ok(true)
    }
}

/// SSH client built on `russh`.
#[derive(Clone)]
pub struct SshShell {
    config: Arc<client::Config>,
}

impl SshShell {
    pub fn new() -> Self {
        Self::with_config(client::Config::default())
    }

    pub fn with_config(config: client::Config) -> Self {
        Self {
            config: Arc::new(config),
        }
    }

    async fn session(
        &self,
        stream: DuplexStream,
        command: RemoteCommand,
        mut io: CommandIo,
    ) -> Result<(), ShellError> {
        let user = command.effective_user();

        let mut session = client::connect_stream(self.config.clone(), stream, AcceptAnyHostKey)
            .await
            .map_err(|e| ShellError::Handshake(e.to_string()))?;
        let authenticated = session
            .authenticate_none(user)
            .await
            .map_err(|e| ShellError::Handshake(e.to_string()))?;
        if !authenticated {
            return Err(ShellError::Handshake(format!(
                "authentication rejected for user {user}"
            )));
        }
        debug!(user, "SSH handshake complete");

        let mut channel = session
            .channel_open_session()
            .await
            .map_err(|e| ShellError::Channel(e.to_string()))?;
        channel
            .exec(true, command.command.as_bytes())
            .await
            .map_err(|e| ShellError::Channel(e.to_string()))?;
        info!(user, command = %command.command, "Remote command started");

        let mut exit_status = None;
        let mut stdin_open = true;
        let mut buf = vec![0u8; 32 * 1024];

        loop {
            tokio::select! {
                read = io.stdin.read(&mut buf), if stdin_open => {
                    match read? {
                        0 => {
                            stdin_open = false;
                            channel.eof().await.map_err(|e| ShellError::Channel(e.to_string()))?;
                        }
                        n => channel
                            .data(&buf[..n])
                            .await
                            .map_err(|e| ShellError::Channel(e.to_string()))?,
                    }
                }
                msg = channel.wait() => match msg {
                    Some(ChannelMsg::Data { ref data }) => {
                        io.stdout.write_all(data).await?;
                        io.stdout.flush().await?;
                    }
                    Some(ChannelMsg::ExtendedData { ref data, ext }) if ext == STDERR_EXT => {
                        io.stderr.write_all(data).await?;
                        io.stderr.flush().await?;
                    }
                    Some(ChannelMsg::ExitStatus { exit_status: status }) => {
                        exit_status = Some(status);
                    }
                    Some(_) => {}
                    None => break,
                },
            }
        }

        let _ = session
            .disconnect(Disconnect::ByApplication, "", "en")
            .await;

        match exit_status {
            Some(0) => Ok(()),
            Some(exit_code) => Err(ShellError::RemoteExec { exit_code }),
            None => Err(ShellError::MissingExitStatus),
        }
    }
}

impl Default for SshShell {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RemoteShell for SshShell {
    async fn run_remote(
        &self,
        stream: DuplexStream,
        command: RemoteCommand,
        io: CommandIo,
        cancel: CancellationToken,
    ) -> Result<(), ShellError> {
        // Dropping the session future closes the channel and the connection.
        tokio::select! {
            result = self.session(stream, command, io) => result,
            _ = cancel.cancelled() => {
                debug!("Remote session cancelled");
                Err(ShellError::Cancelled)
            }
        }
    }
}
