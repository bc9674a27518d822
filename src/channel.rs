use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use once_cell::sync::Lazy;
use tracing::{debug, instrument, warn};

use crate::backend::Backend;
use crate::command::Command;
use crate::delegate::ChannelDelegate;
use crate::error::{Error, Result};
use crate::message::Message;
use crate::processor::MessageProcessor;

/// Process-wide registry of weak channel handles, so [`Channel::stop_all`]
/// can be called from a single signal handler without every caller
/// threading a `Vec` through their own setup (spec §4.7, mirroring the
/// teacher's module-level singletons in `bridge/event.rs`). The analogous
/// registry for [`crate::server::AcceptServer`] lives in `server.rs`.
static CHANNELS: Lazy<Mutex<Vec<Weak<ChannelInner>>>> = Lazy::new(|| Mutex::new(Vec::new()));

/// Shared state behind the [`Channel`] handle. Kept in its own type so
/// backends can hold a `Weak<ChannelInner>` without owning a `Channel` (which
/// would otherwise round-trip through `Arc<dyn Backend>` and create a cycle).
pub struct ChannelInner {
    backend: Arc<dyn Backend>,
    delegate: Arc<dyn ChannelDelegate>,
    pending_replies: Mutex<HashMap<i64, Command>>,
    processor: Mutex<MessageProcessor>,
    next_local_id: AtomicI64,
}

impl ChannelInner {
    /// Drains every complete frame out of `buffer`, routing each to the
    /// delegate or to a pending-reply entry (spec §4.4, §4.8).
    ///
    /// `id > 0` or an unstructured payload is a request; `id < 0` with a
    /// matching pending entry is a response to one of our own commands;
    /// a structured `id == 0` reply has nothing to correlate and is logged
    /// and dropped.
    pub(crate) async fn feed(self: &Arc<Self>, channel: &Channel, buffer: &mut Vec<u8>) {
        let messages = {
            let mut processor = self.processor.lock().unwrap();
            let messages = processor.process(buffer);
            processor.reset();
            messages
        };

        for message in messages.into_iter().flatten() {
            self.route(channel, message).await;
        }
    }

    async fn route(self: &Arc<Self>, channel: &Channel, message: Message) {
        if message.unstructured || message.id > 0 {
            self.delegate.on_message(channel, message).await;
            return;
        }

        if message.id < 0 {
            let command = self.pending_replies.lock().unwrap().remove(&message.id);
            match command {
                Some(command) => self.delegate.on_response_to_command(channel, message, command).await,
                None => {
                    let err = Error::UnknownResponseId(message.id);
                    warn!(%err, "response dropped");
                }
            }
            return;
        }

        debug!(?message.body, "dropping non-correlating reply with id 0");
    }
}

/// A single Vim JSON channel connection: one backend, one delegate, and the
/// framing/correlation state that sits between them (spec §2, §9).
#[derive(Clone)]
pub struct Channel(Arc<ChannelInner>);

impl Channel {
    pub fn new(backend: Arc<dyn Backend>, delegate: Arc<dyn ChannelDelegate>) -> Self {
        let inner = Arc::new(ChannelInner {
            backend,
            delegate,
            pending_replies: Mutex::new(HashMap::new()),
            processor: Mutex::new(MessageProcessor::new()),
            next_local_id: AtomicI64::new(-1),
        });
        inner.backend.set_channel(Arc::downgrade(&inner));
        CHANNELS.lock().unwrap().push(Arc::downgrade(&inner));
        Self(inner)
    }

    pub(crate) fn from_inner(inner: Arc<ChannelInner>) -> Self {
        Self(inner)
    }

    pub fn start(&self) {
        self.0.backend.clone().start();
    }

    pub fn stop(&self) {
        self.0.backend.stop();
    }

    /// Graceful close: let any queued outbound bytes drain before the
    /// backend actually closes (spec §4.1, §4.5's `Remove`), as opposed to
    /// [`Channel::stop`]'s unconditional teardown.
    pub async fn prepare_to_close(&self) {
        self.0.backend.prepare_to_close().await;
    }

    /// Replies to a Vim-originated request (spec §4.6): `{id, body}`, where
    /// `id` is copied verbatim from the request that's being answered.
    #[instrument(skip(self, body))]
    pub async fn respond_to(&self, request: &Message, body: serde_json::Value) {
        let reply = Message::new(request.id, body);
        let bytes = match reply.encode_bytes() {
            Ok(bytes) => bytes,
            Err(err) => {
                warn!(%err, "failed to encode reply body, dropping");
                return;
            }
        };
        if let Err(err) = self.0.backend.write(&bytes).await {
            warn!(%err, "failed to write reply");
        }
    }

    /// Sends an outgoing command. If it carries a correlation id, the command
    /// is recorded in the pending-replies table *before* the bytes go out,
    /// so a reply arriving on another task can never race ahead of it
    /// (spec §4.8).
    pub async fn send(&self, command: Command) -> Result<()> {
        if let Some(id) = command.id() {
            self.0.pending_replies.lock().unwrap().insert(id, command.clone());
        }
        let bytes = command.encode_bytes()?;
        self.0.backend.write(&bytes).await
    }

    /// Allocates the next auto-assigned correlation id for an `Expr`/`Call`
    /// command that doesn't specify its own (spec §3: ids we originate count
    /// down from -1).
    pub fn next_local_id(&self) -> i64 {
        self.0.next_local_id.fetch_sub(1, Ordering::SeqCst)
    }

    /// Calls [`Channel::start`] on every live channel created via
    /// [`Channel::new`] (spec §4.7's "start everything" lifecycle hook).
    pub fn start_all() {
        for weak in CHANNELS.lock().unwrap().iter() {
            if let Some(inner) = weak.upgrade() {
                inner.backend.clone().start();
            }
        }
    }

    /// Calls [`Channel::stop`] on every live channel, pruning any that have
    /// since been dropped.
    pub fn stop_all() {
        let mut channels = CHANNELS.lock().unwrap();
        channels.retain(|weak| weak.upgrade().is_some());
        for weak in channels.iter() {
            if let Some(inner) = weak.upgrade() {
                inner.backend.stop();
            }
        }
    }

    /// Starts every registered channel, waits on the process-wide listener
    /// group, then parks forever (spec §2, §4.8). This is the entry point a
    /// reference server's `main` hands control to: while any
    /// [`crate::server::AcceptServer`] is still accepting, the listener-group
    /// wait *is* the blocking main loop; once every accept loop has stopped,
    /// parking forever keeps the process alive for whatever other channels
    /// (e.g. a stdio [`crate::backend::StdioBackend`]) are still running on
    /// their own background tasks.
    pub async fn run_forever() {
        Self::start_all();
        crate::server::AcceptServer::wait_all().await;
        std::future::pending::<()>().await;
    }
}
