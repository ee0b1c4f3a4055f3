//! Per-connection read and write loops.
//!
//! After a successful handshake every connection runs exactly two tasks:
//! - the **read loop** turns the socket into frames and pushes them to the multiplexer
//! - the **write loop** is the only writer of the socket and drains the outbound channel
//!
//! Both observe the connection's cancellation token alongside every blocking operation, and
//! both remove the connection from the registry when they stop, whatever the reason.

use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio_util::codec::{FramedRead, FramedWrite};
use tokio_util::task::TaskTracker;
use tracing::{debug, warn};

use crate::core::codec::FrameCodec;
use crate::error::ProtocolError;
use crate::mux::multiplexer::{InboundFrame, InboundSender};
use crate::transport::registry::{Connection, ConnectionRegistry, Outbound};
use crate::utils::metrics::Metrics;

/// Non-terminal read errors tolerated in a row before the connection is dropped
pub const MAX_CONSECUTIVE_READ_ERRORS: u32 = 8;

/// Bound on flushing and shutting down the write half once the write loop stops
const WRITER_CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

/// Everything a connection's loops need besides the connection itself
#[derive(Clone)]
pub struct ConnectionLoops {
    registry: ConnectionRegistry,
    inbound: InboundSender,
    tracker: TaskTracker,
    metrics: Arc<Metrics>,
}

impl ConnectionLoops {
    pub fn new(
        registry: ConnectionRegistry,
        inbound: InboundSender,
        tracker: TaskTracker,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            registry,
            inbound,
            tracker,
            metrics,
        }
    }

    /// Start the read and write loops for a registered connection
    pub fn spawn<R, W>(
        &self,
        connection: Arc<Connection>,
        reader: FramedRead<R, FrameCodec>,
        writer: FramedWrite<W, FrameCodec>,
        outbound: mpsc::Receiver<Outbound>,
    ) where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        self.tracker.spawn(read_loop(
            Arc::clone(&connection),
            reader,
            self.registry.clone(),
            self.inbound.clone(),
            Arc::clone(&self.metrics),
        ));
        self.tracker.spawn(write_loop(
            connection,
            writer,
            outbound,
            self.registry.clone(),
            Arc::clone(&self.metrics),
        ));
    }
}

async fn read_loop<R>(
    connection: Arc<Connection>,
    mut reader: FramedRead<R, FrameCodec>,
    registry: ConnectionRegistry,
    inbound: InboundSender,
    metrics: Arc<Metrics>,
) where
    R: AsyncRead + Unpin,
{
    let cancel = connection.cancellation().clone();
    let peer = connection.id().to_string();
    let mut consecutive_errors = 0u32;
    // FramedRead yields a single `None` after an error before it resumes reading.
    let mut resuming = false;

    loop {
        let next = tokio::select! {
            _ = cancel.cancelled() => break,
            next = reader.next() => next,
        };

        match next {
            Some(Ok(frame)) => {
                consecutive_errors = 0;
                resuming = false;
                metrics.frame_received(frame.wire_size() as u64);

                let item = InboundFrame {
                    connection_id: peer.clone(),
                    frame,
                };
                let queued = tokio::select! {
                    _ = cancel.cancelled() => break,
                    queued = inbound.send(item) => queued,
                };
                if let Err(e) = queued {
                    debug!(peer = %peer, error = %e, "Inbound queue closed");
                    break;
                }
            }
            Some(Err(e)) if e.is_terminal() => {
                metrics.connection_error();
                debug!(peer = %peer, error = %e, "Read failed, closing connection");
                break;
            }
            Some(Err(e)) => {
                metrics.protocol_error();
                consecutive_errors += 1;
                if consecutive_errors >= MAX_CONSECUTIVE_READ_ERRORS {
                    warn!(peer = %peer, error = %e, "Too many read errors, closing connection");
                    break;
                }
                warn!(peer = %peer, error = %e, "Read error");
                resuming = true;
            }
            None if resuming => resuming = false,
            None => {
                debug!(peer = %peer, "Peer closed connection");
                break;
            }
        }
    }

    registry.close_connection(&connection).await;
}

async fn write_loop<W>(
    connection: Arc<Connection>,
    mut writer: FramedWrite<W, FrameCodec>,
    mut outbound: mpsc::Receiver<Outbound>,
    registry: ConnectionRegistry,
    metrics: Arc<Metrics>,
) where
    W: AsyncWrite + Unpin,
{
    let cancel = connection.cancellation().clone();
    let peer = connection.id().to_string();

    loop {
        let next = tokio::select! {
            _ = cancel.cancelled() => break,
            next = outbound.recv() => next,
        };

        match next {
            Some(Outbound::Frame(frame)) => {
                let size = frame.wire_size() as u64;
                let written = tokio::select! {
                    _ = cancel.cancelled() => break,
                    written = writer.send(frame) => written,
                };
                match written {
                    Ok(()) => metrics.frame_sent(size),
                    Err(e @ ProtocolError::Io(_)) => {
                        metrics.connection_error();
                        debug!(peer = %peer, error = %e, "Write failed, closing connection");
                        break;
                    }
                    Err(e) => {
                        metrics.protocol_error();
                        warn!(peer = %peer, error = %e, "Dropping unwritable frame");
                    }
                }
            }
            Some(Outbound::Close) => {
                debug!(peer = %peer, "Closing connection after flush");
                break;
            }
            None => break,
        }
    }

    if let Ok(Err(e)) = tokio::time::timeout(WRITER_CLOSE_TIMEOUT, writer.close()).await {
        debug!(peer = %peer, error = %e, "Error shutting down write half");
    }
    registry.close_connection(&connection).await;
}
