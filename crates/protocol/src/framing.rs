//! Two-stage wire framing.
//!
//! # Wire format
//!
//! ```text
//! HANDSHAKE (one line per direction, UTF-8 JSON):
//!   [json bytes]\n
//!
//! ENCRYPTED FRAMES (everything after the first \n in each direction):
//!   [4 bytes BE: blob length][blob: nonce(12) || ciphertext || tag(16)]
//! ```
//!
//! Bytes that arrive in the same packet as the handshake line but after the
//! `\n` already belong to the encrypted framing; [`LineBuffer`] hands them
//! back so the caller can seed its [`FrameBuffer`].

use crate::consts::{MAX_FRAME_SIZE, MAX_HELLO_SIZE};

/// Size of the frame length prefix.
pub const LEN_PREFIX_SIZE: usize = 4;

/// Errors raised by the framing layer. All of them are fatal for the
/// connection that produced them.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("frame length {len} exceeds maximum {max}")]
    Oversize { len: usize, max: usize },

    #[error("handshake line exceeds {max} bytes")]
    LineTooLong { max: usize },

    #[error("handshake line is not valid UTF-8")]
    InvalidUtf8,
}

/// Encodes one encrypted blob as a length-prefixed frame.
pub fn encode_frame(blob: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(LEN_PREFIX_SIZE + blob.len());
    frame.extend_from_slice(&(blob.len() as u32).to_be_bytes());
    frame.extend_from_slice(blob);
    frame
}

/// Streaming decoder for length-prefixed frames.
///
/// Feed raw socket bytes with [`extend`](Self::extend), peel complete
/// frames off with [`next_frame`](Self::next_frame). Partial frames stay
/// buffered until the rest arrives.
#[derive(Debug)]
pub struct FrameBuffer {
    buf: Vec<u8>,
    max_frame: usize,
}

impl FrameBuffer {
    pub fn new() -> Self {
        Self::with_max_frame(MAX_FRAME_SIZE)
    }

    pub fn with_max_frame(max_frame: usize) -> Self {
        Self {
            buf: Vec::new(),
            max_frame,
        }
    }

    /// Appends raw bytes, typically straight from a socket read.
    pub fn extend(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Bytes currently buffered but not yet consumed as frames.
    pub fn pending(&self) -> usize {
        self.buf.len()
    }

    /// Pops the next complete frame, or `None` if more bytes are needed.
    ///
    /// A declared length above the configured maximum is a fatal error;
    /// the caller must drop the connection.
    pub fn next_frame(&mut self) -> Result<Option<Vec<u8>>, FrameError> {
        if self.buf.len() < LEN_PREFIX_SIZE {
            return Ok(None);
        }

        let mut len_bytes = [0u8; LEN_PREFIX_SIZE];
        len_bytes.copy_from_slice(&self.buf[..LEN_PREFIX_SIZE]);
        let len = u32::from_be_bytes(len_bytes) as usize;

        if len > self.max_frame {
            return Err(FrameError::Oversize {
                len,
                max: self.max_frame,
            });
        }
        if self.buf.len() < LEN_PREFIX_SIZE + len {
            return Ok(None);
        }

        let frame = self.buf[LEN_PREFIX_SIZE..LEN_PREFIX_SIZE + len].to_vec();
        self.buf.drain(..LEN_PREFIX_SIZE + len);
        Ok(Some(frame))
    }
}

impl Default for FrameBuffer {
    fn default() -> Self {
        Self::new()
    }
}

/// Accumulates bytes until the first `\n` of the handshake.
///
/// Returns the line (without the terminator) together with every byte that
/// followed it, which belongs to the next framing stage.
#[derive(Debug)]
pub struct LineBuffer {
    buf: Vec<u8>,
    max_line: usize,
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::with_max_line(MAX_HELLO_SIZE)
    }

    pub fn with_max_line(max_line: usize) -> Self {
        Self {
            buf: Vec::new(),
            max_line,
        }
    }

    /// Feeds bytes; returns `(line, remainder)` once the terminator shows up.
    pub fn push(&mut self, bytes: &[u8]) -> Result<Option<(String, Vec<u8>)>, FrameError> {
        self.buf.extend_from_slice(bytes);

        let Some(pos) = self.buf.iter().position(|&b| b == b'\n') else {
            if self.buf.len() > self.max_line {
                return Err(FrameError::LineTooLong { max: self.max_line });
            }
            return Ok(None);
        };

        let remainder = self.buf.split_off(pos + 1);
        self.buf.pop(); // drop the '\n'
        let line = std::mem::take(&mut self.buf);
        let line = String::from_utf8(line).map_err(|_| FrameError::InvalidUtf8)?;
        Ok(Some((line, remainder)))
    }
}

impl Default for LineBuffer {
    fn default() -> Self {
        Self::new()
    }
}
