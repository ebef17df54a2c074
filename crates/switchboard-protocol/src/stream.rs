//! Incremental decoding of concatenated envelopes.
//!
//! Bytes are appended with [`StreamDecoder::feed`] as they arrive and
//! envelopes are pulled with [`StreamDecoder::next_message`]. A partial
//! envelope at the end of the buffer yields `Ok(None)` and stays buffered
//! until the rest arrives.

use switchboard_types::Message;

use crate::codec;
use crate::error::CodecError;

/// Default upper bound on a single buffered frame.
pub const DEFAULT_MAX_FRAME_BYTES: usize = 64 * 1024;

/// Per-connection inbound byte buffer.
#[derive(Debug)]
pub struct StreamDecoder {
    buf: Vec<u8>,
    max_frame_bytes: usize,
}

impl Default for StreamDecoder {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FRAME_BYTES)
    }
}

impl StreamDecoder {
    /// Create a decoder that rejects frames longer than `max_frame_bytes`.
    pub const fn new(max_frame_bytes: usize) -> Self {
        Self {
            buf: Vec::new(),
            max_frame_bytes,
        }
    }

    /// Append newly received bytes.
    pub fn feed(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Number of bytes waiting for a complete envelope.
    pub const fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Pull the next complete envelope.
    ///
    /// Returns `Ok(None)` when the buffer holds only whitespace or a partial
    /// envelope. A `Malformed` error discards the buffer so the connection
    /// can continue with the next frame. `FrameTooLarge` also discards it,
    /// but the caller is expected to close the connection.
    pub fn next_message(&mut self) -> Result<Option<Message>, CodecError> {
        let start = self
            .buf
            .iter()
            .position(|b| !b.is_ascii_whitespace())
            .unwrap_or(self.buf.len());
        self.buf.drain(..start);
        if self.buf.is_empty() {
            return Ok(None);
        }

        let (item, consumed) = {
            let mut stream =
                serde_json::Deserializer::from_slice(&self.buf).into_iter::<serde_json::Value>();
            let item = stream.next();
            (item, stream.byte_offset())
        };

        match item {
            None => {
                self.buf.clear();
                Ok(None)
            }
            Some(Ok(json)) => {
                if consumed > self.max_frame_bytes {
                    self.buf.clear();
                    return Err(self.too_large());
                }
                self.buf.drain(..consumed);
                codec::from_json(json).map(Some)
            }
            Some(Err(e)) if e.is_eof() => {
                if self.buf.len() > self.max_frame_bytes {
                    self.buf.clear();
                    return Err(self.too_large());
                }
                Ok(None)
            }
            Some(Err(e)) => {
                self.buf.clear();
                Err(CodecError::Malformed(e.to_string()))
            }
        }
    }

    const fn too_large(&self) -> CodecError {
        CodecError::FrameTooLarge {
            limit: self.max_frame_bytes,
        }
    }
}
