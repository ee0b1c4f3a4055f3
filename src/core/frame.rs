//! # Frame Header
//!
//! Every unit on the wire starts with a fixed 11-byte header followed by exactly
//! `payload_length` bytes of payload.
//!
//! ## Wire Format
//! ```text
//! ┌─────────┬──────────────────┬──────┬──────┬──────────────────┬──────────────┐
//! │ Version │ Application ID   │ Type │ Flag │ Payload Length   │ Payload      │
//! │ (1B)    │ (4B LE)          │ (1B) │ (1B) │ (4B LE)          │ (Length B)   │
//! └─────────┴──────────────────┴──────┴──────┴──────────────────┴──────────────┘
//! ```
//!
//! Application id 0 is the system channel; its payloads are packets handled by the
//! command dispatcher. Any other id is routed to the registered application.

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::{ProtocolError, Result};

/// Size of the encoded frame header in bytes.
pub const FRAME_HEADER_SIZE: usize = 11;

/// Frame format version written by this implementation.
pub const FRAME_VERSION: u8 = 1;

/// Application id reserved for system traffic (handshake and commands).
pub const SYSTEM_APPLICATION_ID: u32 = 0;

/// Kind of traffic carried by a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageType {
    /// Protocol control traffic, handled by the node itself
    System = 0,
    /// Application traffic, routed by application id
    App = 1,
}

impl TryFrom<u8> for MessageType {
    type Error = ProtocolError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0 => Ok(MessageType::System),
            1 => Ok(MessageType::App),
            other => Err(ProtocolError::UnknownMessageType(other)),
        }
    }
}

/// Bitset of per-frame behaviour flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct FrameFlags(u8);

impl FrameFlags {
    /// No flags set
    pub const NONE: FrameFlags = FrameFlags(0);
    /// Payload is compressed. Reserved: nothing produces or consumes it yet.
    pub const COMPRESSED: FrameFlags = FrameFlags(0b0000_0001);

    /// Build flags from raw bits, keeping unknown bits intact
    pub const fn from_bits_retain(bits: u8) -> Self {
        FrameFlags(bits)
    }

    /// Raw bit representation
    pub const fn bits(self) -> u8 {
        self.0
    }

    /// Whether every bit of `other` is set
    pub const fn contains(self, other: FrameFlags) -> bool {
        self.0 & other.0 == other.0
    }
}

/// Fixed-size header written before every payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FrameHeader {
    pub version: u8,
    /// Routing key for the multiplexer
    pub application_id: u32,
    pub message_type: MessageType,
    pub flags: FrameFlags,
    /// Exact byte length of the payload following this header
    pub payload_length: u32,
}

impl FrameHeader {
    /// Header for a system frame carrying `payload_length` bytes
    pub fn system(payload_length: u32) -> Self {
        Self {
            version: FRAME_VERSION,
            application_id: SYSTEM_APPLICATION_ID,
            message_type: MessageType::System,
            flags: FrameFlags::NONE,
            payload_length,
        }
    }

    /// Header for an application frame carrying `payload_length` bytes
    pub fn app(application_id: u32, payload_length: u32) -> Self {
        Self {
            version: FRAME_VERSION,
            application_id,
            message_type: MessageType::App,
            flags: FrameFlags::NONE,
            payload_length,
        }
    }

    /// Encode into the fixed 11-byte wire layout
    pub fn encode(&self) -> [u8; FRAME_HEADER_SIZE] {
        let mut buf = [0u8; FRAME_HEADER_SIZE];
        buf[0] = self.version;
        buf[1..5].copy_from_slice(&self.application_id.to_le_bytes());
        buf[5] = self.message_type as u8;
        buf[6] = self.flags.bits();
        buf[7..11].copy_from_slice(&self.payload_length.to_le_bytes());
        buf
    }

    /// Append the encoded header to `dst`
    pub fn encode_into(&self, dst: &mut BytesMut) {
        dst.put_slice(&self.encode());
    }

    /// Decode a header from the first 11 bytes of `src`.
    ///
    /// Extra trailing bytes are ignored; fewer than 11 bytes is `MalformedHeader`.
    pub fn decode(src: &[u8]) -> Result<Self> {
        if src.len() < FRAME_HEADER_SIZE {
            return Err(ProtocolError::MalformedHeader(src.len()));
        }

        let application_id = u32::from_le_bytes([src[1], src[2], src[3], src[4]]);
        let payload_length = u32::from_le_bytes([src[7], src[8], src[9], src[10]]);

        Ok(Self {
            version: src[0],
            application_id,
            message_type: MessageType::try_from(src[5])?,
            flags: FrameFlags::from_bits_retain(src[6]),
            payload_length,
        })
    }

    /// Whether this frame belongs to the system channel
    pub fn is_system(&self) -> bool {
        self.message_type == MessageType::System || self.application_id == SYSTEM_APPLICATION_ID
    }
}

/// A complete frame: header plus the payload it describes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub header: FrameHeader,
    pub payload: Bytes,
}

impl Frame {
    /// Build a system frame around a serialized packet
    pub fn system(payload: impl Into<Bytes>) -> Result<Self> {
        let payload = payload.into();
        let header = FrameHeader::system(payload_length(&payload)?);
        Ok(Self { header, payload })
    }

    /// Build an application frame for `application_id`
    pub fn app(application_id: u32, payload: impl Into<Bytes>) -> Result<Self> {
        let payload = payload.into();
        let header = FrameHeader::app(application_id, payload_length(&payload)?);
        Ok(Self { header, payload })
    }

    /// Pair an existing header with a payload, enforcing the length invariant
    pub fn from_parts(header: FrameHeader, payload: Bytes) -> Result<Self> {
        if header.payload_length as usize != payload.len() {
            return Err(ProtocolError::LengthMismatch {
                declared: header.payload_length,
                actual: payload.len(),
            });
        }
        Ok(Self { header, payload })
    }

    /// Total bytes this frame occupies on the wire
    pub fn wire_size(&self) -> usize {
        FRAME_HEADER_SIZE + self.payload.len()
    }
}

fn payload_length(payload: &Bytes) -> Result<u32> {
    u32::try_from(payload.len()).map_err(|_| ProtocolError::OversizedPacket(payload.len()))
}
