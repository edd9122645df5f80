//! Varint-length-prefixed framing of raw IP datagrams over a byte stream.
//!
//! The underlying QUIC stream is a byte stream, not a datagram stream;
//! framing preserves packet boundaries. A LEB128 varint length prefix is
//! used rather than a fixed-width one, so small packets don't pay for bytes
//! they don't need.

use thiserror::Error;
use unsigned_varint::{decode, encode};

/// Maximum framed message size, matching the transport's bounded stream budget.
pub const MAX_MESSAGE_SIZE: usize = 1024 * 1024;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FramingError {
    #[error("message too large: {size} bytes (max {max})")]
    MessageTooLarge { size: usize, max: usize },
    #[error("insufficient data: need {needed} more bytes")]
    InsufficientData { needed: usize },
    #[error("malformed varint length prefix")]
    MalformedLength,
}

/// Prefix `data` with a varint byte count.
pub fn frame(data: &[u8]) -> Result<Vec<u8>, FramingError> {
    if data.len() > MAX_MESSAGE_SIZE {
        return Err(FramingError::MessageTooLarge {
            size: data.len(),
            max: MAX_MESSAGE_SIZE,
        });
    }
    let mut len_buf = encode::usize_buffer();
    let len_bytes = encode::usize(data.len(), &mut len_buf);
    let mut framed = Vec::with_capacity(len_bytes.len() + data.len());
    framed.extend_from_slice(len_bytes);
    framed.extend_from_slice(data);
    Ok(framed)
}

/// The outcome of attempting to pull one frame off the front of a byte buffer.
pub enum FrameResult<'a> {
    /// A full frame was present; `rest` is what follows it in `buf`.
    Frame { payload: &'a [u8], consumed: usize },
    /// Not enough bytes yet to know the frame's length, or to complete it.
    Incomplete,
}

/// Attempt to parse one varint-length-prefixed frame from the front of `buf`.
///
/// Returns `FrameResult::Incomplete` rather than an error when more bytes are
/// simply needed — the caller (a stream reader loop) keeps accumulating and
/// retries.
pub fn try_parse_frame(buf: &[u8]) -> Result<FrameResult<'_>, FramingError> {
    let (len, rest) = match decode::usize(buf) {
        Ok(pair) => pair,
        Err(decode::Error::Insufficient) => return Ok(FrameResult::Incomplete),
        Err(_) => return Err(FramingError::MalformedLength),
    };

    if len > MAX_MESSAGE_SIZE {
        return Err(FramingError::MessageTooLarge {
            size: len,
            max: MAX_MESSAGE_SIZE,
        });
    }

    if rest.len() < len {
        return Ok(FrameResult::Incomplete);
    }

    let prefix_len = buf.len() - rest.len();
    Ok(FrameResult::Frame {
        payload: &rest[..len],
        consumed: prefix_len + len,
    })
}
