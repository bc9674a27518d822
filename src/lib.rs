mod backend;
mod channel;
mod command;
mod config;
mod delegate;
mod error;
mod lifecycle;
mod listener_group;
mod manager;
mod message;
mod processor;
mod server;
mod signal;

pub use backend::{Backend, SocketBackend, StdioBackend};
pub use channel::{Channel, ChannelInner};
pub use command::Command;
pub use config::{Config, ResourceLimits, ServerConfig};
pub use delegate::ChannelDelegate;
pub use error::{Error, Result};
pub use lifecycle::LifecycleManager;
pub use listener_group::ListenerGroup;
pub use manager::ConnectionManager;
pub use message::Message;
pub use processor::MessageProcessor;
pub use server::{AcceptServer, ServerState};
pub use signal::Signal;
