//! # Error Types
//!
//! Error handling for the cluster transport.
//!
//! This module defines every error variant that can surface from the wire codecs,
//! the connection loops, the handshake and the command layer.
//!
//! ## Error Categories
//! - **Transport errors**: closed sockets, EOF, resets, deadlines. Always terminal
//!   for the connection they occur on (see [`ProtocolError::is_terminal`]).
//! - **Protocol errors**: malformed headers, undecodable packets, length mismatches.
//! - **Authorization errors**: surfaced to peers as `DENY` replies, never as failures.
//! - **Application errors**: handler-level failures, logged at the loop boundary.
//!
//! ## Example Usage
//! ```rust
//! use meshlink::core::frame::FrameHeader;
//! use meshlink::error::ProtocolError;
//! use tracing::error;
//!
//! match FrameHeader::decode(&[0u8; 4]) {
//!     Err(ProtocolError::MalformedHeader(len)) => assert_eq!(len, 4),
//!     Err(e) => error!(error = %e, "unexpected error"),
//!     Ok(_) => unreachable!(),
//! }
//! ```

use std::io;
use thiserror::Error;

use crate::core::packet::Command;

/// Static messages used on error and deny paths.
pub mod constants {
    /// Sent as the payload of every `DENY` produced by the ACL
    pub const ERR_UNAUTHORIZED: &str = "not authorized to perform this operation";
    /// Sent as the payload of a `DENY` for commands nobody handles
    pub const ERR_NO_HANDLER: &str = "command not supported";
    /// Sent as the payload of a `DENY` for a `HELLO` after the handshake
    pub const ERR_HELLO_AFTER_HANDSHAKE: &str = "handshake already completed";

    /// Handshake-specific errors
    pub const ERR_HANDSHAKE_NOT_HELLO: &str = "peer did not answer with HELLO";
    pub const ERR_HANDSHAKE_NOT_SYSTEM: &str = "handshake frame is not a system frame";
    pub const ERR_HANDSHAKE_EMPTY_ID: &str = "peer sent an empty node id";
    pub const ERR_HANDSHAKE_ID_TOO_LONG: &str = "peer node id exceeds maximum length";
    pub const ERR_HANDSHAKE_ID_NOT_UTF8: &str = "peer node id is not valid UTF-8";
    pub const ERR_HANDSHAKE_SELF: &str = "peer announced our own node id";

    /// Multiplexer errors
    pub const ERR_MULTIPLEXER_STOPPED: &str = "Multiplexer is not running";

    pub const ERR_LOCK_POISONED: &str = "Synchronization primitive poisoned";
}

/// Primary error type for all transport and protocol operations
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Encode error: {0}")]
    EncodeError(String),

    #[error("Decode error: {0}")]
    DecodeError(String),

    #[error("Malformed frame header: need 11 bytes, got {0}")]
    MalformedHeader(usize),

    #[error("Unknown frame message type: {0}")]
    UnknownMessageType(u8),

    #[error("Frame length mismatch: header declares {declared} bytes, payload has {actual}")]
    LengthMismatch { declared: u32, actual: usize },

    #[error("Payload too large: {0} bytes")]
    OversizedPacket(usize),

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Handshake failed: {0}")]
    HandshakeError(String),

    #[error("Unexpected message type")]
    UnexpectedMessage,

    #[error("No handler for command {0}")]
    NoHandler(Command),

    #[error("Not authorized to perform this operation")]
    Unauthorized,

    #[error("Peer denied request: {0}")]
    Denied(String),

    #[error("Timeout occurred")]
    Timeout,

    #[error("Unknown connection: {0}")]
    UnknownConnection(String),

    #[error("Already linked to peer {0}")]
    DuplicateConnection(String),

    #[error("Application id {0} is reserved")]
    ReservedApplication(u32),

    #[error("Application id {0} is already registered")]
    ApplicationExists(u32),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Custom error: {0}")]
    Custom(String),
}

impl ProtocolError {
    /// Whether this error ends the connection it occurred on.
    ///
    /// Closed sockets, EOF, resets, broken pipes and deadlines are terminal. A frame
    /// that declares an oversized payload is terminal as well because the stream can
    /// no longer be resynchronized.
    pub fn is_terminal(&self) -> bool {
        match self {
            ProtocolError::ConnectionClosed
            | ProtocolError::Timeout
            | ProtocolError::OversizedPacket(_) => true,
            ProtocolError::Io(e) => matches!(
                e.kind(),
                io::ErrorKind::UnexpectedEof
                    | io::ErrorKind::ConnectionReset
                    | io::ErrorKind::ConnectionAborted
                    | io::ErrorKind::BrokenPipe
                    | io::ErrorKind::NotConnected
                    | io::ErrorKind::TimedOut
            ),
            _ => false,
        }
    }
}

/// Type alias for Results using ProtocolError
pub type Result<T> = std::result::Result<T, ProtocolError>;
