use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

use super::Backend;
use crate::channel::{Channel, ChannelInner};
use crate::error::Result;

/// A channel over the process's own stdin/stdout (spec §4.1's "stream"
/// backend) — the shape Vim uses when it spawns the plugin as a job rather
/// than connecting to it over a socket.
///
/// Unlike [`super::SocketBackend`], there is exactly one of these per
/// process and writes are fire-and-forget onto an unbounded channel: stdout
/// is always ready for a short-lived job, so there is no backpressure regime
/// to enforce here (spec §9 Open Question 2 only applies to the socket
/// transport).
pub struct StdioBackend {
    write_tx: mpsc::UnboundedSender<Vec<u8>>,
    write_rx: std::sync::Mutex<Option<mpsc::UnboundedReceiver<Vec<u8>>>>,
    channel: std::sync::Mutex<Weak<ChannelInner>>,
    stopped: AtomicBool,
}

impl StdioBackend {
    pub fn new() -> Self {
        let (write_tx, write_rx) = mpsc::unbounded_channel();
        Self {
            write_tx,
            write_rx: std::sync::Mutex::new(Some(write_rx)),
            channel: std::sync::Mutex::new(Weak::new()),
            stopped: AtomicBool::new(false),
        }
    }

    fn channel(&self) -> Option<Arc<ChannelInner>> {
        self.channel.lock().unwrap().upgrade()
    }

    async fn read_loop(self: Arc<Self>) {
        let mut stdin = tokio::io::stdin();
        let mut buffer = Vec::new();
        let mut chunk = vec![0u8; 8192];

        loop {
            if self.stopped.load(Ordering::SeqCst) {
                break;
            }

            match stdin.read(&mut chunk).await {
                Ok(0) => {
                    debug!("stdin closed");
                    break;
                }
                Ok(n) => {
                    buffer.extend_from_slice(&chunk[..n]);
                    trace!(n, "read bytes from stdin");
                    if let Some(inner) = self.channel() {
                        let channel = Channel::from_inner(inner.clone());
                        inner.feed(&channel, &mut buffer).await;
                    }
                }
                Err(err) => {
                    warn!(%err, "stdin read error");
                    break;
                }
            }
        }
    }

    async fn write_loop(self: Arc<Self>) {
        let mut rx = match self.write_rx.lock().unwrap().take() {
            Some(rx) => rx,
            None => return,
        };
        let mut stdout = tokio::io::stdout();

        while let Some(bytes) = rx.recv().await {
            if let Err(err) = stdout.write_all(&bytes).await {
                warn!(%err, "stdout write error");
                break;
            }
            if let Err(err) = stdout.flush().await {
                warn!(%err, "stdout flush error");
                break;
            }
        }
    }
}

impl Default for StdioBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Backend for StdioBackend {
    fn start(self: Arc<Self>) {
        tokio::spawn(self.clone().read_loop());
        tokio::spawn(self.clone().write_loop());
    }

    fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }

    async fn prepare_to_close(&self) {
        // Fire-and-forget writes mean there's nothing buffered to drain;
        // the write loop simply exits once the channel is closed.
    }

    async fn write(&self, bytes: &[u8]) -> Result<()> {
        let _ = self.write_tx.send(bytes.to_vec());
        Ok(())
    }

    fn set_channel(&self, channel: Weak<ChannelInner>) {
        *self.channel.lock().unwrap() = channel;
    }
}
