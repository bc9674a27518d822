mod socket;
mod stream;

pub use socket::SocketBackend;
pub use stream::StdioBackend;

use std::sync::Arc;

use async_trait::async_trait;

use crate::channel::ChannelInner;
use crate::error::Result;

/// The capability set every transport implements under one [`crate::channel::Channel`]
/// (spec §4.1): start consuming bytes, stop, drain-then-close, and write.
///
/// A backend never owns its channel — only a weak back-reference, set once
/// by the channel that constructs it, so delegate callbacks can carry the
/// right channel identity without creating a retain cycle (spec §9 Design
/// Notes).
#[async_trait]
pub trait Backend: Send + Sync {
    /// Begins consuming bytes. Safe to call once; idempotent after the
    /// backend is already running.
    fn start(self: Arc<Self>);

    /// Requests that reads cease and the underlying descriptor(s) be freed.
    fn stop(&self);

    /// Allows any queued outbound bytes to drain before closing. Contrast
    /// with [`Backend::stop`], which is unconditional.
    async fn prepare_to_close(&self);

    /// Appends `bytes` to the outbound path.
    async fn write(&self, bytes: &[u8]) -> Result<()>;

    /// Installs the (weak) back-reference to the owning channel.
    fn set_channel(&self, channel: std::sync::Weak<ChannelInner>);
}
