//! Incremental frame assembly.
//!
//! Bytes arrive from the socket in arbitrary chunks. The assembler buffers
//! them and hands out one complete frame at a time once the fixed header's
//! remaining length has been fully received. Partial frames stay buffered
//! across calls.

use bytes::{Bytes, BytesMut};

use crate::utils::error::DecodeError;

/// Longest encoding of the remaining-length field.
const MAX_LENGTH_BYTES: usize = 4;

/// Parses the fixed header at the start of `buf`.
///
/// Returns `(remaining_length, header_length)` or `None` if the header is not
/// fully buffered yet.
pub(crate) fn parse_header(buf: &[u8]) -> Result<Option<(usize, usize)>, DecodeError> {
    let mut remaining = 0usize;
    let mut multiplier = 1usize;
    for i in 0..MAX_LENGTH_BYTES {
        let Some(&byte) = buf.get(1 + i) else {
            return Ok(None);
        };
        remaining += (byte & 0x7F) as usize * multiplier;
        if byte & 0x80 == 0 {
            return Ok(Some((remaining, 2 + i)));
        }
        multiplier *= 128;
    }
    Err(DecodeError::MalformedLength)
}

/// Accumulates partial reads and yields complete frames.
#[derive(Debug)]
pub struct FrameAssembler {
    buffer: BytesMut,
    max_frame_bytes: usize,
}

impl FrameAssembler {
    pub fn new(max_frame_bytes: usize) -> Self {
        Self {
            buffer: BytesMut::new(),
            max_frame_bytes,
        }
    }

    /// Appends freshly read bytes.
    pub fn push(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    /// Number of bytes buffered that do not yet form a complete frame.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Splits the next complete frame (header included) off the buffer.
    ///
    /// Returns `Ok(None)` when more bytes are needed. An oversized or
    /// malformed header is an error; the buffer is left untouched so the
    /// caller can close the channel.
    pub fn next_frame(&mut self) -> Result<Option<Bytes>, DecodeError> {
        let Some((remaining, header_len)) = parse_header(&self.buffer)? else {
            return Ok(None);
        };
        let total = header_len + remaining;
        if total > self.max_frame_bytes {
            return Err(DecodeError::FrameTooLarge {
                size: total,
                limit: self.max_frame_bytes,
            });
        }
        if self.buffer.len() < total {
            return Ok(None);
        }
        Ok(Some(self.buffer.split_to(total).freeze()))
    }
}
