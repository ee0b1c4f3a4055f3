//! Tokio codec turning a byte stream into [`Frame`]s and back.
//!
//! Partial reads are buffered by the codec: a frame is yielded only once its full
//! header and the full declared payload are available. A frame whose header does not
//! decode (unknown message type) is consumed and skipped; a declared length above the
//! payload limit is an error because the stream cannot be trusted past it.

use bytes::{Buf, BytesMut};
use tokio_util::codec::{Decoder, Encoder};
use tracing::warn;

use crate::config::MAX_PAYLOAD_SIZE;
use crate::core::frame::{Frame, FrameHeader, FRAME_HEADER_SIZE};
use crate::error::{ProtocolError, Result};

/// Length-delimited frame codec for the 11-byte header format
#[derive(Debug, Clone, Copy)]
pub struct FrameCodec {
    max_payload_size: usize,
}

impl FrameCodec {
    /// Codec with an explicit payload ceiling
    pub fn new(max_payload_size: usize) -> Self {
        Self { max_payload_size }
    }

    pub fn max_payload_size(&self) -> usize {
        self.max_payload_size
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new(MAX_PAYLOAD_SIZE)
    }
}

impl Decoder for FrameCodec {
    type Item = Frame;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>> {
        loop {
            if src.len() < FRAME_HEADER_SIZE {
                return Ok(None);
            }

            let payload_len = u32::from_le_bytes([src[7], src[8], src[9], src[10]]) as usize;
            if payload_len > self.max_payload_size {
                return Err(ProtocolError::OversizedPacket(payload_len));
            }

            let total = FRAME_HEADER_SIZE + payload_len;
            if src.len() < total {
                src.reserve(total - src.len());
                return Ok(None);
            }

            // The length field is intact, so a bad header costs one frame, not the stream.
            match FrameHeader::decode(&src[..FRAME_HEADER_SIZE]) {
                Ok(header) => {
                    src.advance(FRAME_HEADER_SIZE);
                    let payload = src.split_to(payload_len).freeze();
                    return Ok(Some(Frame { header, payload }));
                }
                Err(e) => {
                    warn!(error = %e, skipped = total, "Skipping undecodable frame");
                    src.advance(total);
                }
            }
        }
    }
}

impl Encoder<Frame> for FrameCodec {
    type Error = ProtocolError;

    fn encode(&mut self, frame: Frame, dst: &mut BytesMut) -> Result<()> {
        if frame.payload.len() > self.max_payload_size {
            return Err(ProtocolError::OversizedPacket(frame.payload.len()));
        }
        if frame.header.payload_length as usize != frame.payload.len() {
            return Err(ProtocolError::LengthMismatch {
                declared: frame.header.payload_length,
                actual: frame.payload.len(),
            });
        }

        dst.reserve(frame.wire_size());
        frame.header.encode_into(dst);
        dst.extend_from_slice(&frame.payload);
        Ok(())
    }
}
