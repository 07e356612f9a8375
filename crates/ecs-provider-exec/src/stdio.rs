//! Blocking readers moved onto their own OS thread.
//!
//! `tokio::io::stdin()` parks a read on the runtime's blocking pool, and the
//! runtime cannot shut down until that read returns. A reader on a plain
//! thread is abandoned instead, so the process exits as soon as the command
//! is done even if the caller still holds stdin open.

use std::io::{self, Read};
use std::pin::Pin;
use std::task::{ready, Context, Poll};

use tokio::io::{AsyncRead, ReadBuf};
use tokio::sync::mpsc;
use tracing::debug;

const CHUNK_SIZE: usize = 32 * 1024;
const CHANNEL_DEPTH: usize = 4;

/// Async view of a blocking reader serviced by a dedicated thread.
pub struct ThreadReader {
    rx: mpsc::Receiver<io::Result<Vec<u8>>>,
    pending: Vec<u8>,
    pos: usize,
}

impl ThreadReader {
    /// Start reading `reader` on a new thread named `name`.
    pub fn spawn<R>(name: &str, mut reader: R) -> Self
    where
        R: Read + Send + 'static,
    {
        let (tx, rx) = mpsc::channel(CHANNEL_DEPTH);
        let failed = tx.clone();

        let spawned = std::thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                let mut buf = vec![0u8; CHUNK_SIZE];
                loop {
                    let chunk = match reader.read(&mut buf) {
                        Ok(0) => break,
                        Ok(n) => Ok(buf[..n].to_vec()),
                        Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                        Err(e) => Err(e),
                    };
                    let stop = chunk.is_err();
                    if tx.blocking_send(chunk).is_err() || stop {
                        break;
                    }
                }
            });
        if let Err(e) = spawned {
            debug!(error = %e, "Failed to spawn reader thread");
            let _ = failed.try_send(Err(e));
        }

        Self {
            rx,
            pending: Vec::new(),
            pos: 0,
        }
    }

    /// This process's stdin.
    pub fn stdin() -> Self {
        Self::spawn("stdin-reader", io::stdin())
    }
}

impl AsyncRead for ThreadReader {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = &mut *self;
        if this.pos >= this.pending.len() {
            match ready!(this.rx.poll_recv(cx)) {
                Some(Ok(chunk)) => {
                    this.pending = chunk;
                    this.pos = 0;
                }
                Some(Err(e)) => return Poll::Ready(Err(e)),
                None => return Poll::Ready(Ok(())),
            }
        }

        let n = buf.remaining().min(this.pending.len() - this.pos);
        buf.put_slice(&this.pending[this.pos..this.pos + n]);
        this.pos += n;
        Poll::Ready(Ok(()))
    }
}
