use async_trait::async_trait;

use crate::channel::Channel;
use crate::command::Command;
use crate::message::Message;

/// The application-supplied receiver of decoded channel traffic (spec §9
/// Design Notes).
///
/// `on_message` fires for `id > 0` (Vim-originated requests); `on_response_to_command`
/// fires for `id < 0` once the matching entry has been removed from the
/// channel's pending-replies table.
#[async_trait]
pub trait ChannelDelegate: Send + Sync {
    async fn on_message(&self, channel: &Channel, message: Message);

    async fn on_response_to_command(&self, channel: &Channel, response: Message, command: Command);
}
