//! Node identity handshake.
//!
//! The first exchange on every connection, before any other traffic is accepted:
//!
//! 1. The accepting side sends `HELLO` carrying its node id.
//! 2. The dialing side answers with `HELLO` carrying its own node id.
//!
//! Both `HELLO` packets travel in system frames so the handshake shares the frame codec with
//! the connection loops that take over afterwards. Waiting for the peer's `HELLO` is bounded
//! by the handshake timeout on both sides; once it completes no further deadline applies.
//! There is no cryptographic challenge here; peer authentication, where wanted, comes from a
//! TLS layer wrapping the stream before this step.

use std::time::Duration;

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::codec::{FramedRead, FramedWrite};
use tracing::{debug, instrument};

use crate::core::codec::FrameCodec;
use crate::core::frame::Frame;
use crate::core::packet::{unpack, Command, Packet};
use crate::error::{constants, ProtocolError, Result};

/// Longest node id accepted from a peer, in bytes
pub const MAX_NODE_ID_LEN: usize = 128;

/// Accepting side: announce `local_id`, then wait for the peer's `HELLO`.
///
/// Returns the peer's node id. Any failure (deadline, EOF, undecodable packet, wrong command)
/// is returned to the caller, which drops the stream without registering it.
#[instrument(skip(reader, writer), fields(local_id = %local_id))]
pub async fn server_handshake<R, W>(
    reader: &mut FramedRead<R, FrameCodec>,
    writer: &mut FramedWrite<W, FrameCodec>,
    local_id: &str,
    timeout: Duration,
) -> Result<String>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    writer.send(hello_frame(local_id)?).await?;
    let peer_id = read_hello(reader, timeout).await?;
    debug!(peer = %peer_id, "Handshake completed (accepting side)");
    Ok(peer_id)
}

/// Dialing side: wait for the peer's `HELLO`, then answer with `local_id`.
#[instrument(skip(reader, writer), fields(local_id = %local_id))]
pub async fn client_handshake<R, W>(
    reader: &mut FramedRead<R, FrameCodec>,
    writer: &mut FramedWrite<W, FrameCodec>,
    local_id: &str,
    timeout: Duration,
) -> Result<String>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let peer_id = read_hello(reader, timeout).await?;
    writer.send(hello_frame(local_id)?).await?;
    debug!(peer = %peer_id, "Handshake completed (dialing side)");
    Ok(peer_id)
}

/// System frame carrying a `HELLO` packet with `node_id` as its data
pub fn hello_frame(node_id: &str) -> Result<Frame> {
    let packet = Packet::new(Command::Hello, Bytes::copy_from_slice(node_id.as_bytes()), "");
    Frame::system(packet.encode()?)
}

async fn read_hello<R>(reader: &mut FramedRead<R, FrameCodec>, timeout: Duration) -> Result<String>
where
    R: AsyncRead + Unpin,
{
    let frame = match tokio::time::timeout(timeout, reader.next()).await {
        Err(_) => return Err(ProtocolError::Timeout),
        Ok(None) => return Err(ProtocolError::ConnectionClosed),
        Ok(Some(frame)) => frame?,
    };
    expect_hello(&frame)
}

/// Validate a handshake frame and extract the peer's node id
pub fn expect_hello(frame: &Frame) -> Result<String> {
    if !frame.header.is_system() {
        return Err(handshake_error(constants::ERR_HANDSHAKE_NOT_SYSTEM));
    }

    let packet = unpack(&frame.payload)
        .map_err(|e| ProtocolError::HandshakeError(format!("undecodable HELLO: {e}")))?;

    if packet.command != Command::Hello {
        return Err(handshake_error(constants::ERR_HANDSHAKE_NOT_HELLO));
    }

    let peer_id = String::from_utf8(packet.data.to_vec())
        .map_err(|_| handshake_error(constants::ERR_HANDSHAKE_ID_NOT_UTF8))?;

    if peer_id.is_empty() {
        return Err(handshake_error(constants::ERR_HANDSHAKE_EMPTY_ID));
    }
    if peer_id.len() > MAX_NODE_ID_LEN {
        return Err(handshake_error(constants::ERR_HANDSHAKE_ID_TOO_LONG));
    }

    Ok(peer_id)
}

fn handshake_error(message: &str) -> ProtocolError {
    ProtocolError::HandshakeError(message.to_string())
}
