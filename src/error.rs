use thiserror::Error;

/// Errors surfaced by the channel runtime.
///
/// Framing, read, and per-connection write errors are recovered locally (see
/// spec §7) and only ever reach the caller wrapped in one of these variants
/// when they are handed to a [`crate::delegate::ChannelDelegate`] or a
/// lifecycle failure callback — they are never raised out of the accept loop
/// as a panic or an unhandled `Result::Err` that unwinds a task.
#[derive(Error, Debug)]
pub enum Error {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("framing error: {0}")]
    Framing(String),

    #[error("response with unknown id {0}")]
    UnknownResponseId(i64),

    #[error("write buffer exceeded {limit} bytes (buffered {buffered})")]
    Backpressure { buffered: usize, limit: usize },

    #[error("configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, Error>;
