//! System channel: packets carried in frames with application id 0.
//!
//! Replies (`REPLY`, `DENY`) resolve pending requests issued by this node and are never
//! dispatched. Everything else goes through the ACL-gated dispatcher, and whatever it
//! produces is queued on the originating connection's outbound channel.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::core::packet::{unpack, Command, Packet};
use crate::error::{constants, ProtocolError, Result};
use crate::protocol::dispatcher::{policy_denial, Dispatcher};
use crate::transport::registry::{Connection, ConnectionRegistry};
use crate::utils::metrics::Metrics;

struct Waiter {
    peer: String,
    reply: oneshot::Sender<Packet>,
}

/// Requests awaiting a reply, keyed by correlation id.
///
/// Each request is bound to the peer it was sent to; only that peer can answer it.
#[derive(Clone, Default)]
pub struct PendingRequests {
    waiting: Arc<Mutex<HashMap<String, Waiter>>>,
}

impl PendingRequests {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for the reply to request `id` sent to `peer`
    pub fn register(&self, id: &str, peer: &str) -> Result<oneshot::Receiver<Packet>> {
        let (tx, rx) = oneshot::channel();
        self.waiting
            .lock()
            .map_err(|_| ProtocolError::Custom(constants::ERR_LOCK_POISONED.to_string()))?
            .insert(
                id.to_string(),
                Waiter {
                    peer: peer.to_string(),
                    reply: tx,
                },
            );
        Ok(rx)
    }

    /// Complete the request `reply` answers if `from` is the peer it was sent to.
    /// Returns false when nobody is waiting for it or it came from another peer.
    pub fn resolve(&self, from: &str, reply: Packet) -> bool {
        let waiter = match self.waiting.lock() {
            Ok(mut waiting) => match waiting.get(&reply.id) {
                Some(waiter) if waiter.peer == from => waiting.remove(&reply.id),
                Some(waiter) => {
                    warn!(peer = %from, expected = %waiter.peer, id = %reply.id, "Reply from wrong peer ignored");
                    None
                }
                None => None,
            },
            Err(_) => None,
        };
        match waiter {
            Some(waiter) => waiter.reply.send(reply).is_ok(),
            None => false,
        }
    }

    pub fn cancel(&self, id: &str) {
        if let Ok(mut waiting) = self.waiting.lock() {
            waiting.remove(id);
        }
    }

    pub fn len(&self) -> usize {
        self.waiting.lock().map(|w| w.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Clone)]
pub struct SystemHandler {
    dispatcher: Dispatcher,
    registry: ConnectionRegistry,
    pending: PendingRequests,
    metrics: Arc<Metrics>,
}

impl SystemHandler {
    pub fn new(
        dispatcher: Dispatcher,
        registry: ConnectionRegistry,
        pending: PendingRequests,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            dispatcher,
            registry,
            pending,
            metrics,
        }
    }

    /// Handle one system payload read from `connection_id`
    pub async fn handle(&self, connection_id: &str, payload: Bytes) {
        let packet = match unpack(&payload) {
            Ok(packet) => packet,
            Err(e) => {
                self.metrics.protocol_error();
                warn!(peer = %connection_id, error = %e, "Dropping undecodable system packet");
                return;
            }
        };

        if matches!(packet.command, Command::Reply | Command::Deny) {
            if !self.pending.resolve(connection_id, packet) {
                debug!(peer = %connection_id, "Reply without a pending request");
            }
            return;
        }

        let Some(connection) = self.registry.get(connection_id).await else {
            debug!(peer = %connection_id, command = %packet.command, "Connection gone before dispatch");
            return;
        };

        match self.dispatcher.dispatch(&packet).await {
            Ok(outcome) => {
                for reply in &outcome.replies {
                    self.send(&connection, reply).await;
                }
                if outcome.close {
                    debug!(peer = %connection_id, "Peer requested close");
                    if connection.close_after_flush().await.is_err() {
                        self.registry.close_connection(&connection).await;
                    }
                }
            }
            Err(e) => match policy_denial(&packet, &e) {
                Some(deny) => {
                    debug!(peer = %connection_id, command = %packet.command, error = %e, "Protocol violation");
                    self.send(&connection, &deny).await;
                }
                None => {
                    warn!(peer = %connection_id, command = %packet.command, error = %e, "Command failed, no reply sent");
                }
            },
        }
    }

    async fn send(&self, connection: &Connection, packet: &Packet) {
        if packet.command == Command::Deny {
            self.metrics.deny_sent();
        }
        if let Err(e) = connection.send_packet(packet).await {
            debug!(peer = %connection.id(), error = %e, "Reply not queued");
        }
    }
}
