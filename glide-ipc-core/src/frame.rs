//! Length-delimited framing for envelopes.
//!
//! Frame format: `[length:varint][envelope:N]`
//!
//! - **length**: protobuf base-128 varint, byte count of the envelope
//! - **envelope**: a protobuf-encoded [`CommandRequest`](crate::proto::CommandRequest),
//!   [`ConnectionRequest`](crate::proto::ConnectionRequest) or
//!   [`Response`](crate::proto::Response)
//!
//! Stream reads are chunked arbitrarily by the transport, so decoding never
//! consumes a frame it cannot fully see: a truncated length prefix or body is
//! reported as "need more data" (`Ok(None)`), not as an error.

use bytes::{Buf, BytesMut};
use prost::Message;

/// Maximum number of bytes in a varint-encoded `u64`.
pub const MAX_VARINT_LEN: usize = 10;

/// Default upper bound on a single envelope (512MB).
///
/// Frames declaring more are treated as malformed rather than buffered.
pub const DEFAULT_MAX_FRAME_SIZE: usize = 512 * 1024 * 1024;

/// Frame codec error types.
#[derive(Debug, Clone, thiserror::Error)]
pub enum FrameError {
    /// Length prefix ran past the maximum varint length.
    #[error("malformed length prefix: more than {MAX_VARINT_LEN} varint bytes")]
    MalformedLength,

    /// Declared envelope size exceeds the configured cap.
    #[error("frame too large: {size} bytes (max {max})")]
    FrameTooLarge {
        /// Declared envelope size.
        size: u64,
        /// Configured cap.
        max: usize,
    },

    /// Envelope bytes are complete but not a valid message.
    #[error("failed to decode envelope: {0}")]
    Decode(#[from] prost::DecodeError),
}

/// Append `message` to `buf` as one length-delimited frame.
pub fn encode_delimited<M: Message>(message: &M, buf: &mut BytesMut) {
    let len = message.encoded_len();
    buf.reserve(MAX_VARINT_LEN + len);
    prost::encoding::encode_varint(len as u64, buf);
    message.encode_raw(buf);
}

/// Parse a varint length prefix from the start of `data`.
///
/// Returns `Ok(None)` when `data` ends inside the varint.
fn read_length_prefix(data: &[u8]) -> Result<Option<(u64, usize)>, FrameError> {
    let mut value: u64 = 0;
    for (i, byte) in data.iter().take(MAX_VARINT_LEN).enumerate() {
        value |= u64::from(byte & 0x7f) << (7 * i);
        if byte & 0x80 == 0 {
            return Ok(Some((value, i + 1)));
        }
    }
    if data.len() >= MAX_VARINT_LEN {
        return Err(FrameError::MalformedLength);
    }
    Ok(None)
}

/// Try to decode one frame starting at `offset`.
///
/// # Returns
///
/// - `Ok(Some((message, next_offset)))` if a complete frame was parsed
/// - `Ok(None)` if more data is needed (not an error condition); the caller
///   keeps `data[offset..]` and retries once more bytes arrive
/// - `Err` if the data is malformed
///
/// # Examples
///
/// ```
/// use bytes::BytesMut;
/// use glide_ipc_core::frame::{decode_delimited, encode_delimited, DEFAULT_MAX_FRAME_SIZE};
/// use glide_ipc_core::proto::Response;
///
/// let response = Response { callback_idx: 3, payload: None, is_push: false };
/// let mut buf = BytesMut::new();
/// encode_delimited(&response, &mut buf);
///
/// // Partial data returns None
/// assert!(decode_delimited::<Response>(&buf[..1], 0, DEFAULT_MAX_FRAME_SIZE)
///     .expect("partial")
///     .is_none());
///
/// // Complete frame returns the message and the offset past it
/// let (decoded, next) = decode_delimited::<Response>(&buf, 0, DEFAULT_MAX_FRAME_SIZE)
///     .expect("complete")
///     .expect("has frame");
/// assert_eq!(decoded, response);
/// assert_eq!(next, buf.len());
/// ```
pub fn decode_delimited<M: Message + Default>(
    data: &[u8],
    offset: usize,
    max_frame_size: usize,
) -> Result<Option<(M, usize)>, FrameError> {
    let rest = data.get(offset..).unwrap_or_default();
    let Some((length, prefix_len)) = read_length_prefix(rest)? else {
        return Ok(None);
    };

    if length > max_frame_size as u64 {
        return Err(FrameError::FrameTooLarge {
            size: length,
            max: max_frame_size,
        });
    }

    let end = prefix_len + length as usize;
    if rest.len() < end {
        return Ok(None);
    }

    let message = M::decode(&rest[prefix_len..end])?;
    Ok(Some((message, offset + end)))
}

/// Accumulates stream chunks and yields complete frames.
///
/// Bytes of a frame that has not fully arrived stay buffered until the next
/// [`extend`](Self::extend) or direct read into [`buffer_mut`](Self::buffer_mut).
#[derive(Debug)]
pub struct FrameDecoder {
    buffer: BytesMut,
    max_frame_size: usize,
}

impl FrameDecoder {
    /// Create a decoder with the given frame size cap.
    pub fn new(max_frame_size: usize) -> Self {
        Self {
            buffer: BytesMut::new(),
            max_frame_size,
        }
    }

    /// Append a chunk read from the stream.
    pub fn extend(&mut self, chunk: &[u8]) {
        self.buffer.extend_from_slice(chunk);
    }

    /// Buffer to read into directly, with at least `additional` spare bytes.
    pub fn buffer_mut(&mut self, additional: usize) -> &mut BytesMut {
        self.buffer.reserve(additional);
        &mut self.buffer
    }

    /// Number of buffered bytes not yet consumed by a frame.
    pub fn remaining(&self) -> usize {
        self.buffer.len()
    }

    /// Decode the next complete frame, if one is buffered.
    pub fn next_frame<M: Message + Default>(&mut self) -> Result<Option<M>, FrameError> {
        match decode_delimited::<M>(&self.buffer, 0, self.max_frame_size)? {
            Some((message, consumed)) => {
                self.buffer.advance(consumed);
                Ok(Some(message))
            }
            None => Ok(None),
        }
    }
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FRAME_SIZE)
    }
}
