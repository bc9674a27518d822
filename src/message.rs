use serde_json::Value;

use crate::error::{Error, Result};

/// One decoded `[id, body]` Vim channel message.
///
/// `id >= 1` means Vim originated the message (a request we may reply to).
/// `id <= -1` means we originated it (an outgoing [`crate::command::Command`]
/// awaiting a reply). `id == 0` is a reply body with nothing to correlate,
/// including the one-element `[{"method": ..., "params": ...}]` shape some
/// Vim plugins emit for fire-and-forget notifications (spec §4.4).
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub id: i64,
    pub body: Value,
    /// Set when this message did not arrive as a well-formed `[id, body]`
    /// pair. Such messages always carry `id == 0` but, per spec §4.4's last
    /// routing bullet, are delivered to the delegate as a request rather
    /// than treated as a non-correlating reply — this flag is how the
    /// channel tells the two `id == 0` cases apart.
    pub unstructured: bool,
}

impl Message {
    pub fn new(id: i64, body: Value) -> Self {
        Self { id, body, unstructured: false }
    }

    /// Parses one already-isolated JSON value into a `Message`, applying the
    /// routing rule from spec §4.4: a two-element array is `[id, body]`;
    /// anything else is treated as an unstructured message with `id == 0`.
    pub fn from_value(value: Value) -> Self {
        match value {
            Value::Array(mut arr) if arr.len() == 2 && arr[0].is_i64() => {
                let body = arr.pop().unwrap();
                let id = arr.pop().unwrap().as_i64().unwrap();
                Message::new(id, body)
            }
            other => Message { id: 0, body: other, unstructured: true },
        }
    }

    pub fn encode(&self) -> Value {
        serde_json::json!([self.id, self.body])
    }

    pub fn encode_bytes(&self) -> Result<Vec<u8>> {
        let mut bytes = serde_json::to_vec(&self.encode())?;
        bytes.push(b'\n');
        Ok(bytes)
    }
}

impl TryFrom<&[u8]> for Message {
    type Error = Error;

    fn try_from(bytes: &[u8]) -> Result<Self> {
        if bytes.is_empty() {
            return Err(Error::Framing("empty buffer".to_string()));
        }
        let value: Value = serde_json::from_slice(bytes)?;
        Ok(Message::from_value(value))
    }
}
