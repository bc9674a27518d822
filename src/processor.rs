use serde_json::Value;
use tracing::{trace, warn};

use crate::message::Message;

/// Per-connection framer and dispatcher (spec §4.4).
///
/// `Reset` and `Initial` are collapsed into one synchronous decode step
/// since `serde_json::Deserializer`'s streaming API makes decoding cheap
/// enough to never need to yield mid-frame; `Complete` is the only state a
/// caller can actually observe blocking further decode — it means the
/// previous batch of decoded messages hasn't finished being handed off yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ProcessorState {
    Reset,
    Complete,
}

pub struct MessageProcessor {
    state: ProcessorState,
}

impl Default for MessageProcessor {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageProcessor {
    pub fn new() -> Self {
        Self { state: ProcessorState::Reset }
    }

    /// Decodes every complete JSON value currently available at the front of
    /// `buffer`, consuming their bytes. Returns `None` (consuming nothing) if
    /// called again before [`Self::reset`] — the caller must retry once the
    /// in-flight hand-off completes (spec §4.4's `process` contract).
    ///
    /// Accepts any number of back-to-back values in one call, resolving
    /// spec §9's Open Question about multiple framed values arriving in a
    /// single chunk on the socket transport.
    pub fn process(&mut self, buffer: &mut Vec<u8>) -> Option<Vec<Message>> {
        if self.state == ProcessorState::Complete {
            return None;
        }

        if buffer.is_empty() {
            return Some(Vec::new());
        }

        let mut stream = serde_json::Deserializer::from_slice(buffer).into_iter::<Value>();
        let mut messages = Vec::new();
        let mut consumed = 0usize;

        loop {
            match stream.next() {
                Some(Ok(value)) => {
                    consumed = stream.byte_offset();
                    trace!(?value, "decoded one framed value");
                    messages.push(Message::from_value(value));
                }
                Some(Err(err)) if err.is_eof() => {
                    // Partial trailing value; wait for more bytes.
                    break;
                }
                Some(Err(err)) => {
                    warn!(%err, "dropping malformed JSON from read buffer");
                    consumed = buffer.len();
                    break;
                }
                None => break,
            }
        }

        buffer.drain(..consumed);
        self.state = ProcessorState::Complete;
        Some(messages)
    }

    /// Returns to `Reset`, allowing the next `process` call to decode again.
    pub fn reset(&mut self) {
        self.state = ProcessorState::Reset;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decodes_single_complete_message() {
        let mut processor = MessageProcessor::new();
        let mut buffer = br#"[1,"hello!"]"#.to_vec();

        let messages = processor.process(&mut buffer).unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].id, 1);
        assert_eq!(messages[0].body, json!("hello!"));
        assert!(buffer.is_empty());
    }

    #[test]
    fn decodes_back_to_back_messages_in_one_chunk() {
        let mut processor = MessageProcessor::new();
        let mut buffer = br#"[1,"a"][2,"b"]"#.to_vec();

        let messages = processor.process(&mut buffer).unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].id, 1);
        assert_eq!(messages[1].id, 2);
        assert!(buffer.is_empty());
    }

    #[test]
    fn leaves_partial_trailing_value_for_next_read() {
        let mut processor = MessageProcessor::new();
        let mut buffer = br#"[1,"a"][2,"b"#.to_vec();

        let messages = processor.process(&mut buffer).unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(buffer, br#"[2,"b"#.to_vec());

        processor.reset();
        buffer.extend_from_slice(br#"oo"]"#);
        let messages = processor.process(&mut buffer).unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].body, json!("boo"));
    }

    #[test]
    fn returns_none_until_reset_is_called() {
        let mut processor = MessageProcessor::new();
        let mut buffer = br#"[1,"a"]"#.to_vec();

        assert!(processor.process(&mut buffer).is_some());
        assert!(processor.process(&mut buffer).is_none());
        processor.reset();
        // nothing left in the buffer now, but the call should be allowed again.
        assert_eq!(processor.process(&mut buffer), Some(Vec::new()));
    }

    #[test]
    fn invalid_json_drops_remaining_bytes() {
        let mut processor = MessageProcessor::new();
        let mut buffer = br#"not json at all"#.to_vec();

        let messages = processor.process(&mut buffer).unwrap();
        assert!(messages.is_empty());
        assert!(buffer.is_empty());
    }

    #[test]
    fn empty_buffer_yields_no_messages_without_error() {
        let mut processor = MessageProcessor::new();
        let mut buffer = Vec::new();
        assert_eq!(processor.process(&mut buffer), Some(Vec::new()));
    }
}
