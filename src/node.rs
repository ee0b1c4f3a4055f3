//! # Cluster Node
//!
//! A running cluster member: listener, connection registry, multiplexer and system channel,
//! all tied to one cancellation root and one task tracker.
//!
//! ## Lifecycle
//! 1. [`Node::start`] binds the listener, starts the worker pools and dials static peers.
//! 2. Every accepted or dialed stream runs the handshake; on success it is registered
//!    under the peer's node id and gets its read and write loops.
//! 3. [`Node::shutdown`] cancels everything and waits, bounded, for all tasks to finish.
//!
//! ## Example
//! ```no_run
//! use meshlink::config::NodeConfig;
//! use meshlink::node::Node;
//!
//! # async fn run() -> meshlink::error::Result<()> {
//! let node = Node::start(NodeConfig::default_with_overrides(|c| {
//!     c.node.node_id = "node-a".into();
//!     c.node.listen_address = "127.0.0.1:6969".into();
//! }))
//! .await?;
//!
//! let chat = node.register_application(7).await?;
//! chat.set_receive_handler(|msg| println!("{} says {:?}", msg.from, msg.payload));
//! chat.broadcast("hi").await?;
//!
//! node.shutdown().await;
//! # Ok(())
//! # }
//! ```

use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::codec::{FramedRead, FramedWrite};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, instrument, warn};

use crate::config::NodeConfig;
use crate::core::codec::FrameCodec;
use crate::core::frame::Frame;
use crate::core::packet::{Command, Packet};
use crate::error::{constants, ProtocolError, Result};
use crate::mux::application::{Application, ApplicationRegistry};
use crate::mux::multiplexer::Multiplexer;
use crate::mux::system::{PendingRequests, SystemHandler};
use crate::protocol::acl::Acl;
use crate::protocol::dispatcher::Dispatcher;
use crate::protocol::handshake::{client_handshake, server_handshake};
use crate::protocol::store::DataStore;
use crate::transport::connection::ConnectionLoops;
use crate::transport::listener::accept_loop;
use crate::transport::registry::{ConnectionRegistry, Direction};
use crate::utils::metrics::{Metrics, MetricsSnapshot, Timer};
use crate::utils::timeout::{with_timeout, SHUTDOWN_TIMEOUT};
use crate::utils::worker::WorkerPool;

#[derive(Clone, Copy)]
enum Side {
    Accepting,
    Dialing,
}

impl Side {
    fn direction(self) -> Direction {
        match self {
            Side::Accepting => Direction::Inbound,
            Side::Dialing => Direction::Outbound,
        }
    }
}

struct NodeInner {
    node_id: String,
    config: NodeConfig,
    local_addr: SocketAddr,
    codec: FrameCodec,
    registry: ConnectionRegistry,
    applications: ApplicationRegistry,
    multiplexer: Multiplexer,
    pending: PendingRequests,
    loops: ConnectionLoops,
    cancel: CancellationToken,
    tracker: TaskTracker,
    metrics: Arc<Metrics>,
}

/// Handle to a running node, cheap to clone
#[derive(Clone)]
pub struct Node {
    inner: Arc<NodeInner>,
}

impl Node {
    /// Validate `config`, bind the listener and start every background task
    #[instrument(skip(config), fields(node_id = %config.node.node_id))]
    pub async fn start(config: NodeConfig) -> Result<Self> {
        config.validate_strict()?;
        let acl = Acl::from_config(&config.acl)?;

        let listener = TcpListener::bind(&config.node.listen_address).await?;
        let local_addr = listener.local_addr()?;

        let node_id = config.node.node_id.clone();
        let cancel = CancellationToken::new();
        let tracker = TaskTracker::new();
        let metrics = Arc::new(Metrics::new());

        let registry = ConnectionRegistry::new(
            node_id.as_str(),
            cancel.clone(),
            config.connection.outbound_buffer_size,
            Arc::clone(&metrics),
        );
        let applications = ApplicationRegistry::new();
        let pending = PendingRequests::new();
        let system = SystemHandler::new(
            Dispatcher::new(node_id.as_str(), acl, DataStore::new()),
            registry.clone(),
            pending.clone(),
            Arc::clone(&metrics),
        );
        let multiplexer = Multiplexer::start(
            &config.multiplexer,
            &WorkerPool::new(tracker.clone(), cancel.clone()),
            registry.clone(),
            applications.clone(),
            system,
            Arc::clone(&metrics),
        );
        let loops = ConnectionLoops::new(
            registry.clone(),
            multiplexer.inbound(),
            tracker.clone(),
            Arc::clone(&metrics),
        );

        let node = Node {
            inner: Arc::new(NodeInner {
                node_id,
                codec: FrameCodec::new(config.connection.max_payload_size),
                config,
                local_addr,
                registry,
                applications,
                multiplexer,
                pending,
                loops,
                cancel: cancel.clone(),
                tracker: tracker.clone(),
                metrics,
            }),
        };

        let acceptor = node.clone();
        tracker.spawn(accept_loop(
            listener,
            cancel,
            tracker.clone(),
            move |stream, addr| {
                let node = acceptor.clone();
                async move {
                    // Failures are logged inside; nothing is reported to the peer.
                    let _ = node.accept_stream(stream, Some(addr)).await;
                }
            },
        ));

        for peer in node.inner.config.node.peers.clone() {
            if peer == node.inner.config.node.listen_address {
                continue;
            }
            let dialer = node.clone();
            tracker.spawn(async move {
                if let Err(e) = dialer.dial(&peer).await {
                    warn!(peer = %peer, error = %e, "Failed to dial static peer");
                }
            });
        }

        info!(addr = %local_addr, "Node started");
        Ok(node)
    }

    pub fn node_id(&self) -> &str {
        &self.inner.node_id
    }

    /// Address the listener is bound to
    pub fn local_addr(&self) -> SocketAddr {
        self.inner.local_addr
    }

    pub fn config(&self) -> &NodeConfig {
        &self.inner.config
    }

    /// Connect to `addr`, run the dialing side of the handshake and register the connection.
    /// Returns the peer's node id.
    #[instrument(skip(self), fields(node_id = %self.inner.node_id))]
    pub async fn dial(&self, addr: &str) -> Result<String> {
        let timeout = self.inner.config.connection.handshake_timeout;
        let stream = with_timeout(timeout, async { Ok(TcpStream::connect(addr).await?) }).await?;
        stream.set_nodelay(true)?;
        let remote_addr = stream.peer_addr().ok();
        self.connect_stream(stream, remote_addr).await
    }

    /// Run the accepting side of the handshake on an established stream, e.g. one a TLS
    /// acceptor has already wrapped, and register it
    pub async fn accept_stream<S>(&self, stream: S, remote_addr: Option<SocketAddr>) -> Result<String>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        self.establish(stream, remote_addr, Side::Accepting).await
    }

    /// Run the dialing side of the handshake on an established stream and register it
    pub async fn connect_stream<S>(&self, stream: S, remote_addr: Option<SocketAddr>) -> Result<String>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        self.establish(stream, remote_addr, Side::Dialing).await
    }

    async fn establish<S>(
        &self,
        stream: S,
        remote_addr: Option<SocketAddr>,
        side: Side,
    ) -> Result<String>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let inner = &self.inner;
        inner.metrics.handshake_attempt();
        let _timer = Timer::start("handshake");

        let (read_half, write_half) = tokio::io::split(stream);
        let mut reader = FramedRead::new(read_half, inner.codec);
        let mut writer = FramedWrite::new(write_half, inner.codec);
        let timeout = inner.config.connection.handshake_timeout;

        let handshake = async {
            let peer_id = match side {
                Side::Accepting => {
                    server_handshake(&mut reader, &mut writer, &inner.node_id, timeout).await?
                }
                Side::Dialing => {
                    client_handshake(&mut reader, &mut writer, &inner.node_id, timeout).await?
                }
            };
            if peer_id == inner.node_id {
                return Err(ProtocolError::HandshakeError(
                    constants::ERR_HANDSHAKE_SELF.to_string(),
                ));
            }
            Ok(peer_id)
        };

        let result = tokio::select! {
            _ = inner.cancel.cancelled() => Err(ProtocolError::ConnectionClosed),
            result = handshake => result,
        };

        let peer_id = match result {
            Ok(peer_id) => peer_id,
            Err(e) => {
                inner.metrics.handshake_failed();
                warn!(remote = ?remote_addr, error = %e, "Handshake failed");
                return Err(e);
            }
        };
        inner.metrics.handshake_success();

        let registered = inner
            .registry
            .create(peer_id.clone(), remote_addr, side.direction())
            .await;
        match registered {
            Ok((connection, outbound)) => {
                inner.loops.spawn(connection, reader, writer, outbound);
                Ok(peer_id)
            }
            // The peer is reachable over the link that was kept; this one is dropped here.
            Err(ProtocolError::DuplicateConnection(_)) => Ok(peer_id),
            Err(e) => Err(e),
        }
    }

    /// Claim application id `id` on every connection of this node
    pub async fn register_application(&self, id: u32) -> Result<Application> {
        let entry = self.inner.applications.register(id).await?;
        Ok(Application::new(
            entry,
            self.inner.applications.clone(),
            self.inner.registry.clone(),
            self.inner.multiplexer.outbound(),
        ))
    }

    /// Send a command to `peer` on the system channel and wait for the packet answering it,
    /// either `REPLY` or `DENY`
    pub async fn request(
        &self,
        peer: &str,
        command: Command,
        data: impl Into<Bytes>,
        token: &str,
    ) -> Result<Packet> {
        let connection = self
            .inner
            .registry
            .get(peer)
            .await
            .ok_or_else(|| ProtocolError::UnknownConnection(peer.to_string()))?;

        let request = Packet::new(command, data, token);
        let reply = self.inner.pending.register(&request.id, peer)?;

        let sent = match request.encode().and_then(Frame::system) {
            Ok(frame) => connection.send(frame).await,
            Err(e) => Err(e),
        };
        if let Err(e) = sent {
            self.inner.pending.cancel(&request.id);
            return Err(e);
        }

        let timeout = self.inner.config.connection.request_timeout;
        let outcome = tokio::select! {
            _ = connection.cancellation().cancelled() => Err(ProtocolError::ConnectionClosed),
            answered = tokio::time::timeout(timeout, reply) => match answered {
                Ok(Ok(packet)) => Ok(packet),
                Ok(Err(_)) => Err(ProtocolError::ConnectionClosed),
                Err(_) => Err(ProtocolError::Timeout),
            },
        };
        if let Err(e) = &outcome {
            self.inner.pending.cancel(&request.id);
            debug!(peer = %peer, id = %request.id, error = %e, "Request failed");
        }
        outcome
    }

    /// Like [`Node::request`], but returns the reply data and turns `DENY` into
    /// [`ProtocolError::Denied`]
    pub async fn call(
        &self,
        peer: &str,
        command: Command,
        data: impl Into<Bytes>,
        token: &str,
    ) -> Result<Bytes> {
        let reply = self.request(peer, command, data, token).await?;
        match reply.command {
            Command::Deny => Err(ProtocolError::Denied(
                String::from_utf8_lossy(&reply.data).into_owned(),
            )),
            _ => Ok(reply.data),
        }
    }

    /// Node ids of every live connection
    pub async fn connections(&self) -> Vec<String> {
        self.inner.registry.ids().await
    }

    /// Close the connection to `peer`; returns whether it existed
    pub async fn close_connection(&self, peer: &str) -> bool {
        self.inner.registry.close(peer).await
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.inner.metrics.snapshot()
    }

    pub fn is_shutdown(&self) -> bool {
        self.inner.cancel.is_cancelled()
    }

    /// Stop accepting, close every connection and wait for all tasks to finish
    #[instrument(skip(self), fields(node_id = %self.inner.node_id))]
    pub async fn shutdown(&self) {
        info!("Shutting down node");
        let inner = &self.inner;

        inner.cancel.cancel();
        inner.registry.shutdown().await;
        inner.tracker.close();

        if tokio::time::timeout(SHUTDOWN_TIMEOUT, inner.tracker.wait())
            .await
            .is_err()
        {
            warn!(
                tasks = inner.tracker.len(),
                "Shutdown timeout reached, tasks still running"
            );
        }

        inner.metrics.log_metrics();
    }
}
