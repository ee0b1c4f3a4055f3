//! Minimal dial-side peer for request/response use.
//!
//! A `Client` dials a node, completes the handshake as the dialing side and then talks to
//! the node's system channel directly, without running a node of its own. It is what a
//! command-line tool or a test needs to issue `ID`/`SET`/`GET`/`EXIT`.
//!
//! ```no_run
//! use meshlink::core::packet::Command;
//! use meshlink::transport::client::Client;
//! use std::time::Duration;
//!
//! # async fn run() -> meshlink::error::Result<()> {
//! let mut client = Client::connect("127.0.0.1:6969", "cli", Duration::from_secs(5)).await?;
//! let reply = client.request(Command::Set, "hello", "token").await?;
//! println!("stored under {}", String::from_utf8_lossy(&reply.data));
//! client.close().await?;
//! # Ok(())
//! # }
//! ```

use std::time::Duration;

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio_util::codec::{FramedRead, FramedWrite};
use tracing::{debug, instrument};

use crate::core::codec::FrameCodec;
use crate::core::frame::Frame;
use crate::core::packet::{unpack, Command, Packet};
use crate::error::{ProtocolError, Result};
use crate::protocol::handshake::client_handshake;
use crate::utils::timeout::with_timeout;

pub struct Client {
    peer_id: String,
    reader: FramedRead<OwnedReadHalf, FrameCodec>,
    writer: FramedWrite<OwnedWriteHalf, FrameCodec>,
    timeout: Duration,
}

impl Client {
    /// Dial `addr` and complete the handshake announcing `local_id`.
    ///
    /// `timeout` bounds the dial, the handshake and every later [`Client::request`].
    #[instrument(skip(local_id, timeout))]
    pub async fn connect(addr: &str, local_id: &str, timeout: Duration) -> Result<Self> {
        let stream = with_timeout(timeout, async { Ok(TcpStream::connect(addr).await?) }).await?;
        stream.set_nodelay(true)?;

        let (read_half, write_half) = stream.into_split();
        let mut reader = FramedRead::new(read_half, FrameCodec::default());
        let mut writer = FramedWrite::new(write_half, FrameCodec::default());

        let peer_id = client_handshake(&mut reader, &mut writer, local_id, timeout).await?;
        debug!(peer = %peer_id, "Client connected");

        Ok(Self {
            peer_id,
            reader,
            writer,
            timeout,
        })
    }

    /// Node id announced by the remote node
    pub fn peer_id(&self) -> &str {
        &self.peer_id
    }

    /// Send a packet on the system channel
    pub async fn send(&mut self, packet: &Packet) -> Result<()> {
        self.writer.send(Frame::system(packet.encode()?)?).await
    }

    /// Send a raw frame, e.g. application traffic
    pub async fn send_frame(&mut self, frame: Frame) -> Result<()> {
        self.writer.send(frame).await
    }

    /// Next frame of any kind
    pub async fn recv_frame(&mut self) -> Result<Frame> {
        match self.reader.next().await {
            Some(frame) => frame,
            None => Err(ProtocolError::ConnectionClosed),
        }
    }

    /// Next system packet; application frames arriving meanwhile are discarded
    pub async fn recv(&mut self) -> Result<Packet> {
        loop {
            let frame = self.recv_frame().await?;
            if frame.header.is_system() {
                return unpack(&frame.payload);
            }
            debug!(
                application_id = frame.header.application_id,
                "Discarding application frame"
            );
        }
    }

    /// Send a command and wait for the `REPLY` or `DENY` carrying the same correlation id
    pub async fn request(
        &mut self,
        command: Command,
        data: impl Into<Bytes>,
        token: &str,
    ) -> Result<Packet> {
        let request = Packet::new(command, data, token);
        self.send(&request).await?;

        let timeout = self.timeout;
        with_timeout(timeout, async {
            loop {
                let packet = self.recv().await?;
                if packet.id == request.id {
                    return Ok(packet);
                }
                debug!(id = %packet.id, command = %packet.command, "Skipping unrelated packet");
            }
        })
        .await
    }

    /// Shut down the write half; the node sees EOF and drops the connection
    pub async fn close(mut self) -> Result<()> {
        self.writer.close().await
    }
}
