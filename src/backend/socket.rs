use std::io::ErrorKind;
use std::os::unix::io::{AsRawFd, RawFd};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use tokio::net::TcpStream;
use tokio::sync::{Mutex, Notify};
use tracing::{debug, trace, warn};

use super::Backend;
use crate::channel::{Channel, ChannelInner};
use crate::error::{Error, Result};

struct WriteState {
    buffer: Vec<u8>,
    position: usize,
}

impl WriteState {
    fn buffered(&self) -> usize {
        self.buffer.len() - self.position
    }
}

/// One accepted TCP connection (spec §3's `Connection` and §4.1/§4.3's
/// `Backend` are the same Rust type here: splitting the stream into owned
/// read/write halves, as the teacher's `VimClient` does, would force the
/// `write_buffer`/`write_position` invariant to live behind two locks instead
/// of one — sharing the stream through an `Arc` and driving it with
/// `readable()`/`try_read` and `writable()`/`try_write` keeps both sides of
/// the invariant under a single mutex).
pub struct SocketBackend {
    stream: Arc<TcpStream>,
    fd: RawFd,
    write_state: Mutex<WriteState>,
    write_ready: Notify,
    drained: Notify,
    preparing_to_close: AtomicBool,
    stopped: AtomicBool,
    max_write_buffer_bytes: usize,
    channel: std::sync::Mutex<Weak<ChannelInner>>,
    on_close: Box<dyn Fn(RawFd) + Send + Sync>,
}

impl SocketBackend {
    pub fn new(
        stream: TcpStream,
        max_write_buffer_bytes: usize,
        on_close: impl Fn(RawFd) + Send + Sync + 'static,
    ) -> Self {
        let fd = stream.as_raw_fd();
        Self {
            stream: Arc::new(stream),
            fd,
            write_state: Mutex::new(WriteState { buffer: Vec::new(), position: 0 }),
            write_ready: Notify::new(),
            drained: Notify::new(),
            preparing_to_close: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
            max_write_buffer_bytes,
            channel: std::sync::Mutex::new(Weak::new()),
            on_close: Box::new(on_close),
        }
    }

    pub fn fd(&self) -> RawFd {
        self.fd
    }

    fn channel(&self) -> Option<Arc<ChannelInner>> {
        self.channel.lock().unwrap().upgrade()
    }

    async fn read_loop(self: Arc<Self>) {
        let mut buffer = Vec::new();
        let mut chunk = vec![0u8; 8192];

        loop {
            if self.stopped.load(Ordering::SeqCst) {
                break;
            }

            if let Err(err) = self.stream.readable().await {
                warn!(fd = self.fd, %err, "socket no longer readable");
                break;
            }

            match self.stream.try_read(&mut chunk) {
                Ok(0) => {
                    debug!(fd = self.fd, "peer closed connection");
                    self.prepare_to_close().await;
                    break;
                }
                Ok(n) => {
                    buffer.extend_from_slice(&chunk[..n]);
                    trace!(fd = self.fd, n, "read bytes from socket");
                    if let Some(inner) = self.channel() {
                        let channel = Channel::from_inner(inner.clone());
                        inner.feed(&channel, &mut buffer).await;
                    }
                }
                Err(err) if err.kind() == ErrorKind::WouldBlock => continue,
                Err(err) => {
                    warn!(fd = self.fd, %err, "socket read error");
                    self.prepare_to_close().await;
                    break;
                }
            }
        }

        (self.on_close)(self.fd);
    }

    /// Drains whatever is currently buffered, writing as much as the socket
    /// will accept without blocking. Spawned once per backend and re-woken
    /// by `write()` whenever the buffer transitions from empty to non-empty.
    async fn writer_loop(self: Arc<Self>) {
        loop {
            self.write_ready.notified().await;

            loop {
                let mut state = self.write_state.lock().await;
                if state.buffered() == 0 {
                    state.buffer.clear();
                    state.position = 0;
                    drop(state);
                    self.drained.notify_waiters();
                    break;
                }

                if let Err(err) = self.stream.writable().await {
                    warn!(fd = self.fd, %err, "socket no longer writable");
                    return;
                }

                let slice_start = state.position;
                match self.stream.try_write(&state.buffer[slice_start..]) {
                    Ok(n) => state.position += n,
                    Err(err) if err.kind() == ErrorKind::WouldBlock => continue,
                    Err(err) => {
                        warn!(fd = self.fd, %err, "socket write error");
                        return;
                    }
                }
            }
        }
    }
}

#[async_trait]
impl Backend for SocketBackend {
    fn start(self: Arc<Self>) {
        tokio::spawn(self.clone().read_loop());
        tokio::spawn(self.clone().writer_loop());
    }

    fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        let _ = self.stream.shutdown(std::net::Shutdown::Both);
    }

    /// Waits for the write buffer to drain, then closes (spec §4.3),
    /// distinct from the unconditional [`Backend::stop`]. Safe to call more
    /// than once or concurrently with a read-side close: once the buffer is
    /// (already, or eventually) empty this just delegates to `stop`, which
    /// is itself idempotent.
    async fn prepare_to_close(&self) {
        self.preparing_to_close.store(true, Ordering::SeqCst);
        loop {
            // Register interest in the next `drained.notify_waiters()` call
            // *before* checking the buffer and dropping the lock — otherwise
            // a drain landing in the gap between the check and the
            // `.await` below would wake nobody and this would hang forever.
            let notified = self.drained.notified();
            let empty = self.write_state.lock().await.buffered() == 0;
            if empty {
                break;
            }
            notified.await;
        }
        self.stop();
    }

    async fn write(&self, bytes: &[u8]) -> Result<()> {
        let mut state = self.write_state.lock().await;

        if state.buffered() == 0 {
            match self.stream.try_write(bytes) {
                Ok(n) if n == bytes.len() => return Ok(()),
                Ok(n) => {
                    state.buffer.clear();
                    state.position = 0;
                    state.buffer.extend_from_slice(&bytes[n..]);
                }
                Err(err) if err.kind() == ErrorKind::WouldBlock => {
                    state.buffer.clear();
                    state.position = 0;
                    state.buffer.extend_from_slice(bytes);
                }
                Err(err) => return Err(err.into()),
            }
        } else {
            state.buffer.extend_from_slice(bytes);
        }

        let buffered = state.buffered();
        drop(state);
        // Notify unconditionally, even over the high-water mark: the bytes
        // are already queued, and skipping this when the writer task is
        // parked (rather than mid-flush) would strand them unflushed.
        self.write_ready.notify_one();

        if buffered > self.max_write_buffer_bytes {
            return Err(Error::Backpressure { buffered, limit: self.max_write_buffer_bytes });
        }
        Ok(())
    }

    fn set_channel(&self, channel: Weak<ChannelInner>) {
        *self.channel.lock().unwrap() = channel;
    }
}
