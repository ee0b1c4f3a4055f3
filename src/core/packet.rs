//! # Packet Codec
//!
//! The logical message carried inside a frame's payload.
//!
//! Packets are serialized as MessagePack maps with named fields, so the encoding is
//! self-describing: decoding does not depend on field order, and a peer that adds a
//! field does not break older readers. `receive_timestamp` is never transmitted; it is
//! stamped locally by [`unpack`].

use std::fmt;
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{ProtocolError, Result};

/// Packet format version written by this implementation
pub const PACKET_VERSION: i8 = 1;

/// Command carried by a packet.
///
/// The wire representation is a single integer; values this build does not know are
/// preserved as [`Command::Unknown`] so the dispatcher can deny them instead of the
/// decoder failing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "u8", into = "u8")]
pub enum Command {
    /// Handshake greeting carrying the sender's node id
    Hello,
    /// Rejection notice
    Deny,
    /// Response to a request
    Reply,
    /// Ask for the node id
    Id,
    /// Close the connection
    Exit,
    /// Store a blob, reply with its generated key
    Set,
    /// Fetch a blob by key
    Get,
    Unknown(u8),
}

impl Command {
    /// Commands that exist only for protocol bookkeeping
    pub fn is_system(self) -> bool {
        matches!(self, Command::Hello | Command::Deny | Command::Reply)
    }

    pub fn name(self) -> &'static str {
        match self {
            Command::Hello => "HELLO",
            Command::Deny => "DENY",
            Command::Reply => "REPLY",
            Command::Id => "ID",
            Command::Exit => "EXIT",
            Command::Set => "SET",
            Command::Get => "GET",
            Command::Unknown(_) => "UNKNOWN",
        }
    }
}

impl From<u8> for Command {
    fn from(code: u8) -> Self {
        match code {
            0 => Command::Hello,
            1 => Command::Deny,
            2 => Command::Reply,
            3 => Command::Id,
            4 => Command::Exit,
            5 => Command::Set,
            6 => Command::Get,
            other => Command::Unknown(other),
        }
    }
}

impl From<Command> for u8 {
    fn from(command: Command) -> Self {
        match command {
            Command::Hello => 0,
            Command::Deny => 1,
            Command::Reply => 2,
            Command::Id => 3,
            Command::Exit => 4,
            Command::Set => 5,
            Command::Get => 6,
            Command::Unknown(code) => code,
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::Unknown(code) => write!(f, "UNKNOWN({code})"),
            known => f.write_str(known.name()),
        }
    }
}

impl FromStr for Command {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "HELLO" => Ok(Command::Hello),
            "DENY" => Ok(Command::Deny),
            "REPLY" => Ok(Command::Reply),
            "ID" => Ok(Command::Id),
            "EXIT" => Ok(Command::Exit),
            "SET" => Ok(Command::Set),
            "GET" => Ok(Command::Get),
            other => Err(ProtocolError::ConfigError(format!(
                "unknown command name '{other}'"
            ))),
        }
    }
}

/// Application-level message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Packet {
    pub version: i8,
    /// Correlation id; replies echo the id of the request they answer
    pub id: String,
    pub command: Command,
    pub data: Bytes,
    /// ACL token, empty for the anonymous principal
    pub token: String,
    /// Milliseconds since the UNIX epoch, stamped by the sender
    pub send_timestamp: u64,
    /// Milliseconds since the UNIX epoch, stamped locally on decode
    #[serde(skip)]
    pub receive_timestamp: u64,
}

impl Packet {
    /// New request with a fresh correlation id
    pub fn new(command: Command, data: impl Into<Bytes>, token: impl Into<String>) -> Self {
        Self {
            version: PACKET_VERSION,
            id: Uuid::new_v4().to_string(),
            command,
            data: data.into(),
            token: token.into(),
            send_timestamp: current_timestamp(),
            receive_timestamp: 0,
        }
    }

    /// Answer to this packet: same correlation id, same token echoed
    pub fn reply(&self, command: Command, data: impl Into<Bytes>) -> Self {
        Self {
            version: PACKET_VERSION,
            id: self.id.clone(),
            command,
            data: data.into(),
            token: self.token.clone(),
            send_timestamp: current_timestamp(),
            receive_timestamp: 0,
        }
    }

    /// `DENY` answer carrying a human readable reason
    pub fn deny(&self, reason: &str) -> Self {
        self.reply(Command::Deny, Bytes::copy_from_slice(reason.as_bytes()))
    }

    /// Serialize to the wire representation
    pub fn encode(&self) -> Result<Bytes> {
        rmp_serde::to_vec_named(self)
            .map(Bytes::from)
            .map_err(|e| ProtocolError::EncodeError(e.to_string()))
    }

    /// Deserialize from the wire representation without stamping
    pub fn decode(data: &[u8]) -> Result<Self> {
        rmp_serde::from_slice(data).map_err(|e| ProtocolError::DecodeError(e.to_string()))
    }
}

/// Build and serialize a fresh packet, stamping the send time
pub fn pack(command: Command, data: impl Into<Bytes>, token: impl Into<String>) -> Result<Bytes> {
    Packet::new(command, data, token).encode()
}

/// Deserialize a packet and stamp its receive time
pub fn unpack(data: &[u8]) -> Result<Packet> {
    let mut packet = Packet::decode(data)?;
    packet.receive_timestamp = current_timestamp();
    Ok(packet)
}

/// Milliseconds since the UNIX epoch; a clock set before the epoch reads as 0
pub fn current_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
