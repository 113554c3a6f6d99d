//! Splits the inbound byte stream into protocol lines
//!
//! Reads may end anywhere: in the middle of a line, of a field, or of a
//! multi-byte character. The framer keeps whatever has not been terminated
//! yet and hands out complete lines only.

use bytes::BytesMut;

use crate::error::ProtocolError;
use crate::message::InboundMessage;

/// Longest line accepted before the framer gives up on it
pub const DEFAULT_MAX_LINE_LENGTH: usize = 1024 * 1024;

/// One complete protocol line, without its terminator
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    line: String,
}

impl Frame {
    pub fn line(&self) -> &str {
        &self.line
    }

    pub fn fields(&self) -> Vec<&str> {
        self.line.split('\t').collect()
    }

    pub fn parse(&self) -> Result<InboundMessage, ProtocolError> {
        InboundMessage::parse(&self.fields())
    }
}

#[derive(Debug)]
pub struct Framer {
    buffer: BytesMut,
    // bytes of `buffer` already known to contain no newline
    scanned: usize,
    max_line_length: usize,
    discarding: bool,
}

impl Default for Framer {
    fn default() -> Self {
        Self::new()
    }
}

impl Framer {
    pub fn new() -> Self {
        Self::with_max_line_length(DEFAULT_MAX_LINE_LENGTH)
    }

    pub fn with_max_line_length(max_line_length: usize) -> Self {
        Self {
            buffer: BytesMut::new(),
            scanned: 0,
            max_line_length,
            discarding: false,
        }
    }

    /// Append a chunk read from the transport
    pub fn push(&mut self, chunk: &[u8]) {
        self.buffer.extend_from_slice(chunk);
    }

    /// Take the next complete line out of the buffer, if there is one
    pub fn next_frame(&mut self) -> Option<Frame> {
        loop {
            let Some(offset) = self.buffer[self.scanned..]
                .iter()
                .position(|b| *b == b'\n')
            else {
                self.scanned = self.buffer.len();
                self.enforce_limit();
                return None;
            };

            let end = self.scanned + offset;
            let line = self.buffer.split_to(end + 1);
            self.scanned = 0;

            if self.discarding {
                tracing::debug!("resynchronised after oversized line");
                self.discarding = false;
                continue;
            }

            return Some(Frame {
                line: String::from_utf8_lossy(&line[..end]).into_owned(),
            });
        }
    }

    /// Push a chunk and drain every line it completes
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<Frame> {
        self.push(chunk);
        std::iter::from_fn(|| self.next_frame()).collect()
    }

    /// Number of buffered bytes that do not form a complete line yet
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    pub fn clear(&mut self) {
        self.buffer.clear();
        self.scanned = 0;
        self.discarding = false;
    }

    fn enforce_limit(&mut self) {
        if self.discarding {
            self.buffer.clear();
            self.scanned = 0;
        } else if self.buffer.len() > self.max_line_length {
            tracing::error!(
                length = self.buffer.len(),
                limit = self.max_line_length,
                "unterminated line exceeds limit, discarding until next newline"
            );
            self.buffer.clear();
            self.scanned = 0;
            self.discarding = true;
        }
    }
}
