//! Stream Codec
//!
//! MessagePack values arrive on a byte stream with no length prefix, so
//! the decoder buffers bytes until a complete value parses. A truncated
//! value waits for more bytes; anything else that fails to parse poisons
//! the buffer, which is dropped so the connection can resync.

use std::io::{self, Cursor};

use thiserror::Error;

use crate::network::protocol::ServerMessage;

/// Default cap on buffered, not-yet-decoded bytes.
pub const DEFAULT_MAX_FRAME: usize = 64 * 1024;

/// Codec errors.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("malformed frame: {0}")]
    Malformed(String),

    #[error("frame exceeds {limit} bytes")]
    Oversized { limit: usize },

    #[error("encode failed: {0}")]
    Encode(#[from] rmp_serde::encode::Error),

    #[error("decode failed: {0}")]
    Decode(#[from] rmp_serde::decode::Error),

    #[error("invalid payload: {0}")]
    Payload(#[from] serde_json::Error),
}

/// Incremental decoder for a stream of MessagePack values.
#[derive(Debug)]
pub struct FrameDecoder {
    buffer: Vec<u8>,
    max_frame: usize,
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FRAME)
    }
}

impl FrameDecoder {
    /// Create a decoder that gives up on values larger than `max_frame`.
    pub fn new(max_frame: usize) -> Self {
        Self { buffer: Vec::new(), max_frame }
    }

    /// Append received bytes.
    pub fn feed(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    /// Bytes waiting to be decoded.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Pop the next complete value.
    ///
    /// `Ok(None)` means more bytes are needed. On error the buffer has
    /// already been cleared.
    pub fn next_value(&mut self) -> Result<Option<serde_json::Value>, CodecError> {
        if self.buffer.is_empty() {
            return Ok(None);
        }

        let mut cursor = Cursor::new(self.buffer.as_slice());
        match rmp_serde::from_read::<_, serde_json::Value>(&mut cursor) {
            Ok(value) => {
                let consumed = cursor.position() as usize;
                self.buffer.drain(..consumed);
                Ok(Some(value))
            }
            Err(e) if is_truncated(&e) => {
                if self.buffer.len() > self.max_frame {
                    self.buffer.clear();
                    return Err(CodecError::Oversized { limit: self.max_frame });
                }
                Ok(None)
            }
            Err(e) => {
                self.buffer.clear();
                Err(CodecError::Malformed(e.to_string()))
            }
        }
    }
}

fn is_truncated(err: &rmp_serde::decode::Error) -> bool {
    use rmp_serde::decode::Error;
    match err {
        Error::InvalidMarkerRead(e) | Error::InvalidDataRead(e) => {
            e.kind() == io::ErrorKind::UnexpectedEof
        }
        _ => false,
    }
}

/// Encode a reply for the wire.
pub fn encode(message: &ServerMessage) -> Result<Vec<u8>, CodecError> {
    message.to_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::protocol::ClientCommand;
    use serde_json::json;

    fn frame(value: &serde_json::Value) -> Vec<u8> {
        rmp_serde::to_vec_named(value).unwrap()
    }

    #[test]
    fn test_single_value() {
        let mut dec = FrameDecoder::default();
        dec.feed(&frame(&json!({"type": "whoami"})));
        assert_eq!(dec.next_value().unwrap(), Some(json!({"type": "whoami"})));
        assert_eq!(dec.next_value().unwrap(), None);
        assert_eq!(dec.buffered(), 0);
    }

    #[test]
    fn test_split_across_reads() {
        let bytes = ClientCommand::Connect { username: "alice".into() }.to_bytes().unwrap();
        let mut dec = FrameDecoder::default();
        for chunk in bytes.chunks(3) {
            dec.feed(chunk);
            if dec.buffered() < bytes.len() {
                assert_eq!(dec.next_value().unwrap(), None);
            }
        }
        let value = dec.next_value().unwrap().unwrap();
        assert_eq!(value["username"], "alice");
    }

    #[test]
    fn test_back_to_back_values() {
        let mut bytes = frame(&json!({"type": "map"}));
        bytes.extend(frame(&json!({"type": "what_bombs"})));
        let mut dec = FrameDecoder::default();
        dec.feed(&bytes);
        assert_eq!(dec.next_value().unwrap().unwrap()["type"], "map");
        assert_eq!(dec.next_value().unwrap().unwrap()["type"], "what_bombs");
        assert_eq!(dec.next_value().unwrap(), None);
    }

    #[test]
    fn test_garbage_clears_buffer() {
        let mut dec = FrameDecoder::default();
        // 0xc1 is the one marker MessagePack never uses
        dec.feed(&[0xc1, 0x01, 0x02]);
        assert!(matches!(dec.next_value(), Err(CodecError::Malformed(_))));
        assert_eq!(dec.buffered(), 0);

        dec.feed(&frame(&json!({"type": "map"})));
        assert!(dec.next_value().unwrap().is_some());
    }

    #[test]
    fn test_oversized_partial_rejected() {
        let mut dec = FrameDecoder::new(8);
        // str32 header announcing a 1 MiB string
        dec.feed(&[0xdb, 0x00, 0x10, 0x00, 0x00, b'a', b'b', b'c', b'd', b'e']);
        assert!(matches!(dec.next_value(), Err(CodecError::Oversized { limit: 8 })));
        assert_eq!(dec.buffered(), 0);
    }
}
