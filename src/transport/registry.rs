//! # Connection Registry
//!
//! Owns every live peer connection, keyed by the node id learned in the handshake.
//!
//! An entry is immutable once created apart from its cancellation, which is idempotent.
//! Each entry gets a child of the node's root [`CancellationToken`]; cancelling it stops the
//! connection's read and write loops, which drop the socket halves on the way out.
//!
//! ## Identity collisions
//! At most one entry exists per id. When a handshake completes for an id that is already
//! registered, both links are ranked by the node id of the side that dialed them:
//! - dialed by the same node (a reconnect): the new link replaces the old one
//! - dialed from opposite ends (two nodes dialing each other): the link dialed by the lower
//!   node id is kept and the other is refused
//!
//! Both ends compute the same ranking, so simultaneous dials settle on one shared link.
//! Every entry carries a serial number so a loop winding down for a replaced entry never
//! removes its successor.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::{mpsc, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::core::frame::Frame;
use crate::core::packet::Packet;
use crate::error::{ProtocolError, Result};
use crate::utils::metrics::Metrics;

/// Item queued for a connection's write loop
#[derive(Debug)]
pub enum Outbound {
    Frame(Frame),
    /// Close the connection once everything queued before it is written
    Close,
}

/// Which end of the link opened the socket
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// The peer dialed us
    Inbound,
    /// We dialed the peer
    Outbound,
}

/// One registered peer link
#[derive(Debug)]
pub struct Connection {
    id: String,
    serial: u64,
    direction: Direction,
    remote_addr: Option<SocketAddr>,
    cancel: CancellationToken,
    outbound: mpsc::Sender<Outbound>,
    established_at: Instant,
}

impl Connection {
    /// Peer node id
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn serial(&self) -> u64 {
        self.serial
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// Node id of the side that dialed this link
    fn dialer<'a>(&'a self, local_id: &'a str) -> &'a str {
        match self.direction {
            Direction::Inbound => &self.id,
            Direction::Outbound => local_id,
        }
    }

    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.remote_addr
    }

    pub fn established_at(&self) -> Instant {
        self.established_at
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Queue a frame for the write loop.
    ///
    /// Waits while the outbound channel is full; fails once the connection is closed.
    pub async fn send(&self, frame: Frame) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(ProtocolError::ConnectionClosed);
        }
        tokio::select! {
            _ = self.cancel.cancelled() => Err(ProtocolError::ConnectionClosed),
            sent = self.outbound.send(Outbound::Frame(frame)) => {
                sent.map_err(|_| ProtocolError::ConnectionClosed)
            }
        }
    }

    /// Wrap a packet in a system frame and queue it
    pub async fn send_packet(&self, packet: &Packet) -> Result<()> {
        self.send(Frame::system(packet.encode()?)?).await
    }

    /// Queue a close marker behind everything already queued
    pub async fn close_after_flush(&self) -> Result<()> {
        self.outbound
            .send(Outbound::Close)
            .await
            .map_err(|_| ProtocolError::ConnectionClosed)
    }
}

struct RegistryInner {
    local_id: String,
    connections: RwLock<HashMap<String, Arc<Connection>>>,
    root: CancellationToken,
    next_serial: AtomicU64,
    outbound_capacity: usize,
    metrics: Arc<Metrics>,
}

/// Concurrent map of live connections, cheap to clone
#[derive(Clone)]
pub struct ConnectionRegistry {
    inner: Arc<RegistryInner>,
}

impl ConnectionRegistry {
    /// Registry for the node `local_id`
    pub fn new(
        local_id: impl Into<String>,
        root: CancellationToken,
        outbound_capacity: usize,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                local_id: local_id.into(),
                connections: RwLock::new(HashMap::new()),
                root,
                next_serial: AtomicU64::new(1),
                outbound_capacity: outbound_capacity.max(1),
                metrics,
            }),
        }
    }

    /// Register a connection for `id` and return it with the receiving end of its outbound
    /// channel.
    ///
    /// If `id` is already registered the collision rule in the module docs decides: either
    /// the existing entry is cancelled and replaced, or this link is refused with
    /// [`ProtocolError::DuplicateConnection`] and the caller drops it.
    pub async fn create(
        &self,
        id: impl Into<String>,
        remote_addr: Option<SocketAddr>,
        direction: Direction,
    ) -> Result<(Arc<Connection>, mpsc::Receiver<Outbound>)> {
        if self.inner.root.is_cancelled() {
            return Err(ProtocolError::ConnectionClosed);
        }

        let id = id.into();
        let (tx, rx) = mpsc::channel(self.inner.outbound_capacity);
        let connection = Arc::new(Connection {
            id: id.clone(),
            serial: self.inner.next_serial.fetch_add(1, Ordering::Relaxed),
            direction,
            remote_addr,
            cancel: self.inner.root.child_token(),
            outbound: tx,
            established_at: Instant::now(),
        });

        let previous = {
            let mut connections = self.inner.connections.write().await;
            if let Some(existing) = connections.get(&id) {
                if self.keeps_existing(existing, &connection) {
                    debug!(
                        peer = %id,
                        kept = ?existing.direction,
                        refused = ?direction,
                        "Peer already linked, refusing redundant connection"
                    );
                    return Err(ProtocolError::DuplicateConnection(id));
                }
            }
            connections.insert(id.clone(), Arc::clone(&connection))
        };

        self.inner.metrics.connection_established();
        if let Some(old) = previous {
            warn!(peer = %id, old_serial = old.serial, "Duplicate peer id, replacing connection");
            old.cancel.cancel();
            self.inner.metrics.connection_closed();
        }

        info!(peer = %id, remote = ?remote_addr, serial = connection.serial, "Connection registered");
        Ok((connection, rx))
    }

    /// Whether `existing` wins over `candidate` for the same peer id
    fn keeps_existing(&self, existing: &Connection, candidate: &Connection) -> bool {
        if existing.is_closed() {
            return false;
        }
        let local_id = self.inner.local_id.as_str();
        let existing_dialer = existing.dialer(local_id);
        let candidate_dialer = candidate.dialer(local_id);
        if existing_dialer == candidate_dialer {
            return false;
        }
        existing_dialer < candidate_dialer
    }

    pub async fn get(&self, id: &str) -> Option<Arc<Connection>> {
        self.inner.connections.read().await.get(id).cloned()
    }

    /// Every live connection
    pub async fn all(&self) -> Vec<Arc<Connection>> {
        self.inner.connections.read().await.values().cloned().collect()
    }

    /// Ids of every live connection
    pub async fn ids(&self) -> Vec<String> {
        self.inner.connections.read().await.keys().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.inner.connections.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.connections.read().await.is_empty()
    }

    /// Cancel and remove the entry for `id`. Returns whether an entry existed.
    pub async fn close(&self, id: &str) -> bool {
        let removed = self.inner.connections.write().await.remove(id);
        match removed {
            Some(connection) => {
                connection.cancel.cancel();
                self.inner.metrics.connection_closed();
                debug!(peer = %id, "Connection closed");
                true
            }
            None => false,
        }
    }

    /// Cancel `connection` and remove it if it is still the registered entry for its id.
    ///
    /// Safe to call any number of times from either loop.
    pub async fn close_connection(&self, connection: &Connection) {
        connection.cancel.cancel();

        let mut connections = self.inner.connections.write().await;
        let is_current = connections
            .get(&connection.id)
            .is_some_and(|current| current.serial == connection.serial);
        if is_current {
            connections.remove(&connection.id);
            drop(connections);
            self.inner.metrics.connection_closed();
            debug!(peer = %connection.id, serial = connection.serial, "Connection closed");
        }
    }

    /// Close every entry
    pub async fn shutdown(&self) {
        let drained: Vec<_> = self.inner.connections.write().await.drain().collect();
        for (id, connection) in drained {
            connection.cancel.cancel();
            self.inner.metrics.connection_closed();
            debug!(peer = %id, "Connection closed on shutdown");
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn registry() -> (ConnectionRegistry, CancellationToken) {
        let root = CancellationToken::new();
        (
            ConnectionRegistry::new("local", root.clone(), 8, Arc::new(Metrics::new())),
            root,
        )
    }

    #[tokio::test]
    async fn duplicate_id_replaces_and_cancels_old() {
        let (registry, _root) = registry();
        let (first, _rx1) = registry.create("B", None, Direction::Inbound).await.unwrap();
        let (second, _rx2) = registry.create("B", None, Direction::Inbound).await.unwrap();

        assert_eq!(registry.len().await, 1);
        assert!(first.is_closed());
        assert!(!second.is_closed());
        assert_eq!(registry.get("B").await.unwrap().serial(), second.serial());
    }

    #[tokio::test]
    async fn crossed_dials_keep_link_dialed_by_lower_id() {
        // "local" < "zed": the link we dialed wins in either arrival order
        let (first, _root_first) = registry();
        let (ours, _rx1) = first.create("zed", None, Direction::Outbound).await.unwrap();
        let refused = first.create("zed", None, Direction::Inbound).await;
        assert!(matches!(refused, Err(ProtocolError::DuplicateConnection(ref id)) if id == "zed"));
        assert!(!ours.is_closed());

        let (second, _root_second) = registry();
        let (theirs, _rx1) = second.create("zed", None, Direction::Inbound).await.unwrap();
        let (ours, _rx2) = second.create("zed", None, Direction::Outbound).await.unwrap();
        assert!(theirs.is_closed());
        assert_eq!(second.get("zed").await.unwrap().serial(), ours.serial());
    }

    #[tokio::test]
    async fn crossed_dials_keep_link_dialed_by_peer_with_lower_id() {
        // "abc" < "local": the link the peer dialed wins in either arrival order
        let (first, _root_first) = registry();
        let (theirs, _rx1) = first.create("abc", None, Direction::Inbound).await.unwrap();
        let refused = first.create("abc", None, Direction::Outbound).await;
        assert!(matches!(refused, Err(ProtocolError::DuplicateConnection(_))));
        assert!(!theirs.is_closed());

        let (second, _root_second) = registry();
        let (ours, _rx1) = second.create("abc", None, Direction::Outbound).await.unwrap();
        let (theirs, _rx2) = second.create("abc", None, Direction::Inbound).await.unwrap();
        assert!(ours.is_closed());
        assert_eq!(second.get("abc").await.unwrap().serial(), theirs.serial());
        assert_eq!(second.len().await, 1);
    }

    #[tokio::test]
    async fn closed_entry_never_blocks_new_link() {
        let (reg, _root_reg) = registry();
        let (ours, _rx1) = reg.create("zed", None, Direction::Outbound).await.unwrap();
        ours.cancellation().cancel();

        let (theirs, _rx2) = reg.create("zed", None, Direction::Inbound).await.unwrap();
        assert_eq!(reg.get("zed").await.unwrap().serial(), theirs.serial());
    }

    #[tokio::test]
    async fn stale_close_keeps_replacement() {
        let (registry, _root) = registry();
        let (first, _rx1) = registry.create("B", None, Direction::Inbound).await.unwrap();
        let (second, _rx2) = registry.create("B", None, Direction::Inbound).await.unwrap();

        registry.close_connection(&first).await;
        assert_eq!(registry.get("B").await.unwrap().serial(), second.serial());

        registry.close_connection(&second).await;
        registry.close_connection(&second).await;
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn close_is_idempotent() {
        let (registry, _root) = registry();
        let (conn, _rx) = registry.create("A", None, Direction::Inbound).await.unwrap();

        assert!(registry.close("A").await);
        assert!(!registry.close("A").await);
        assert!(conn.is_closed());
        assert!(matches!(
            conn.send(Frame::app(1, bytes::Bytes::new()).unwrap()).await,
            Err(ProtocolError::ConnectionClosed)
        ));
    }

    #[tokio::test]
    async fn root_cancellation_reaches_every_entry() {
        let (registry, root) = registry();
        let (a, _rxa) = registry.create("A", None, Direction::Inbound).await.unwrap();
        let (b, _rxb) = registry.create("B", None, Direction::Inbound).await.unwrap();

        root.cancel();
        assert!(a.is_closed());
        assert!(b.is_closed());
        assert!(registry.create("C", None, Direction::Inbound).await.is_err());

        registry.shutdown().await;
        assert!(registry.is_empty().await);
    }

    #[tokio::test]
    async fn send_queues_frames_in_order() {
        let (registry, _root) = registry();
        let (conn, mut rx) = registry.create("A", None, Direction::Inbound).await.unwrap();

        for n in 0u8..3 {
            conn.send(Frame::app(1, vec![n]).unwrap()).await.unwrap();
        }
        conn.close_after_flush().await.unwrap();

        for n in 0u8..3 {
            match rx.recv().await.unwrap() {
                Outbound::Frame(frame) => assert_eq!(frame.payload.as_ref(), &[n]),
                Outbound::Close => panic!("close marker out of order"),
            }
        }
        assert!(matches!(rx.recv().await.unwrap(), Outbound::Close));
    }
}
