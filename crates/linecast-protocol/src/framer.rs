//! Newline framing.
//!
//! Every message on the wire is UTF-8 text terminated by a single `\n`.
//! [`LineFramer`] accumulates raw bytes from a connection and yields each
//! complete line with the delimiter stripped; [`encode_line`] produces the
//! outgoing form.
//!
//! Bytes are buffered undecoded and a line is only decoded once its
//! delimiter has arrived, so a multi-byte character split across two reads
//! still decodes correctly. Invalid UTF-8 is replaced with U+FFFD.

use bytes::{Bytes, BytesMut};

use crate::error::FrameError;

/// Message delimiter.
pub const DELIMITER: u8 = b'\n';

/// Reassembles delimiter-terminated messages from a byte stream.
#[derive(Debug, Default)]
pub struct LineFramer {
    buffer: BytesMut,
    /// Bytes at the front of `buffer` already known to contain no delimiter.
    scanned: usize,
    max_line_length: Option<usize>,
}

impl LineFramer {
    pub fn new() -> Self {
        Self::default()
    }

    /// A framer that rejects an unterminated line longer than `limit` bytes.
    pub fn with_max_line_length(limit: usize) -> Self {
        Self {
            max_line_length: Some(limit),
            ..Self::default()
        }
    }

    /// Append bytes from a read.
    pub fn push(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    /// Extract the next complete message, if one is buffered.
    pub fn next_message(&mut self) -> Option<String> {
        match self.buffer[self.scanned..].iter().position(|b| *b == DELIMITER) {
            Some(offset) => {
                let end = self.scanned + offset;
                let line = self.buffer.split_to(end + 1);
                self.scanned = 0;
                Some(String::from_utf8_lossy(&line[..end]).into_owned())
            }
            None => {
                self.scanned = self.buffer.len();
                None
            }
        }
    }

    /// Lazily drain every complete message currently buffered, in order.
    pub fn messages(&mut self) -> Messages<'_> {
        Messages { framer: self }
    }

    /// Fail if the unterminated remainder is past the configured limit.
    ///
    /// Call after draining; complete lines are never counted.
    pub fn check_limit(&self) -> Result<(), FrameError> {
        match self.max_line_length {
            Some(limit) if self.buffer.len() > limit => Err(FrameError::LineTooLong {
                limit,
                buffered: self.buffer.len(),
            }),
            _ => Ok(()),
        }
    }

    /// Bytes received after the last delimiter.
    pub fn remainder(&self) -> &[u8] {
        &self.buffer
    }

    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn max_line_length(&self) -> Option<usize> {
        self.max_line_length
    }
}

/// Iterator returned by [`LineFramer::messages`].
pub struct Messages<'a> {
    framer: &'a mut LineFramer,
}

impl Iterator for Messages<'_> {
    type Item = String;

    fn next(&mut self) -> Option<String> {
        self.framer.next_message()
    }
}

/// Encode `text` as one wire message (`text` followed by `\n`).
pub fn encode_line(text: &str) -> Result<Bytes, FrameError> {
    if let Some(position) = text.bytes().position(|b| b == DELIMITER) {
        return Err(FrameError::EmbeddedDelimiter { position });
    }
    let mut frame = BytesMut::with_capacity(text.len() + 1);
    frame.extend_from_slice(text.as_bytes());
    frame.extend_from_slice(&[DELIMITER]);
    Ok(frame.freeze())
}
