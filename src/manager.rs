use std::collections::HashMap;
use std::os::unix::io::{AsRawFd, RawFd};
use std::sync::Arc;

use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::backend::SocketBackend;
use crate::channel::Channel;
use crate::config::ResourceLimits;
use crate::delegate::ChannelDelegate;
use crate::error::Result;

/// Owns one [`Channel`] per accepted connection, keyed by file descriptor
/// (spec §4.2). Grounded on the teacher's `ClientManager`, but simplified:
/// where the teacher tracked `ClientId = Uuid` and routed LSP traffic by it,
/// a channel socket has a stable OS-level identity already, so the raw fd is
/// the key and there is no separate id allocator.
pub struct ConnectionManager {
    channels: Mutex<HashMap<RawFd, Channel>>,
    limits: ResourceLimits,
}

impl ConnectionManager {
    pub fn new(limits: ResourceLimits) -> Self {
        Self { channels: Mutex::new(HashMap::new()), limits }
    }

    /// Wraps a freshly accepted socket in a [`SocketBackend`]-backed channel,
    /// starts it, and tracks it under its fd until the backend's own read
    /// loop observes EOF or an error and calls back into [`Self::remove`].
    pub async fn open(self: &Arc<Self>, socket: TcpStream, delegate: Arc<dyn ChannelDelegate>) -> Result<RawFd> {
        let fd = socket.as_raw_fd();
        let manager = Arc::downgrade(self);
        let backend = SocketBackend::new(socket, self.limits.max_write_buffer_bytes, move |fd| {
            if let Some(manager) = manager.upgrade() {
                tokio::spawn(async move { manager.remove(fd).await });
            }
        });
        let channel = Channel::new(Arc::new(backend), delegate);
        channel.start();

        let count = {
            let mut channels = self.channels.lock().await;
            channels.insert(fd, channel);
            channels.len()
        };
        info!(fd, count, "connection accepted");
        Ok(fd)
    }

    /// Drains and closes the channel for `fd`, if still tracked (spec §4.5:
    /// `Remove` calls `prepareToClose`, not the unconditional `stop`, so any
    /// reply still queued when the peer hangs up still goes out).
    pub async fn remove(&self, fd: RawFd) {
        let channel = self.channels.lock().await.remove(&fd);
        if let Some(channel) = channel {
            channel.prepare_to_close().await;
            debug!(fd, "connection removed");
        }
    }

    pub async fn len(&self) -> usize {
        self.channels.lock().await.len()
    }

    /// Stops every tracked channel, e.g. during server shutdown.
    pub async fn stop_all(&self) {
        let channels = self.channels.lock().await;
        for channel in channels.values() {
            channel.stop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn starts_empty() {
        let manager = ConnectionManager::new(ResourceLimits::default());
        assert_eq!(manager.len().await, 0);
    }
}
