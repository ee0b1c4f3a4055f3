//! # Applications
//!
//! Logical channels sharing the node's connections. Each application owns one application
//! id; inbound app frames carrying that id are handed to its receive handler, and
//! [`Application::send`] queues payloads for the outbound workers.
//!
//! Application id 0 belongs to the system channel and cannot be registered.

use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, warn};

use crate::core::frame::SYSTEM_APPLICATION_ID;
use crate::error::{constants, ProtocolError, Result};
use crate::mux::multiplexer::SendRequest;
use crate::transport::registry::ConnectionRegistry;

/// Payload delivered to an application
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    /// Node id of the sending peer
    pub from: String,
    pub application_id: u32,
    pub payload: Bytes,
}

/// Callback invoked by an inbound worker for every message of an application.
///
/// Messages from one peer arrive in the order they were read; the callback should hand
/// heavy work off instead of blocking the worker.
pub type ReceiveHandler = Arc<dyn Fn(InboundMessage) + Send + Sync>;

pub(crate) struct ApplicationEntry {
    id: u32,
    handler: std::sync::RwLock<Option<ReceiveHandler>>,
}

impl ApplicationEntry {
    fn set_handler(&self, handler: ReceiveHandler) {
        match self.handler.write() {
            Ok(mut slot) => *slot = Some(handler),
            Err(poisoned) => *poisoned.into_inner() = Some(handler),
        }
    }

    /// Hand `message` to the handler; returns false when no handler is set
    pub(crate) fn deliver(&self, message: InboundMessage) -> bool {
        let handler = match self.handler.read() {
            Ok(slot) => slot.clone(),
            Err(_) => {
                warn!(application = self.id, "{}", constants::ERR_LOCK_POISONED);
                None
            }
        };

        match handler {
            Some(handler) => {
                handler(message);
                true
            }
            None => false,
        }
    }
}

/// Registered applications by id
#[derive(Clone, Default)]
pub struct ApplicationRegistry {
    entries: Arc<RwLock<HashMap<u32, Arc<ApplicationEntry>>>>,
}

impl ApplicationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) async fn register(&self, id: u32) -> Result<Arc<ApplicationEntry>> {
        if id == SYSTEM_APPLICATION_ID {
            return Err(ProtocolError::ReservedApplication(id));
        }

        let mut entries = self.entries.write().await;
        if entries.contains_key(&id) {
            return Err(ProtocolError::ApplicationExists(id));
        }

        let entry = Arc::new(ApplicationEntry {
            id,
            handler: std::sync::RwLock::new(None),
        });
        entries.insert(id, Arc::clone(&entry));
        debug!(application = id, "Application registered");
        Ok(entry)
    }

    pub(crate) async fn get(&self, id: u32) -> Option<Arc<ApplicationEntry>> {
        self.entries.read().await.get(&id).cloned()
    }

    /// Remove `entry` if it is still the registration for its id
    async fn remove(&self, entry: &Arc<ApplicationEntry>) -> bool {
        let mut entries = self.entries.write().await;
        let is_current = entries
            .get(&entry.id)
            .is_some_and(|current| Arc::ptr_eq(current, entry));
        if is_current {
            entries.remove(&entry.id);
            debug!(application = entry.id, "Application deregistered");
        }
        is_current
    }

    pub async fn ids(&self) -> Vec<u32> {
        self.entries.read().await.keys().copied().collect()
    }

    pub async fn contains(&self, id: u32) -> bool {
        self.entries.read().await.contains_key(&id)
    }
}

/// Handle returned by `Node::register_application`
pub struct Application {
    entry: Arc<ApplicationEntry>,
    applications: ApplicationRegistry,
    connections: ConnectionRegistry,
    outbound: mpsc::Sender<SendRequest>,
}

impl Application {
    pub(crate) fn new(
        entry: Arc<ApplicationEntry>,
        applications: ApplicationRegistry,
        connections: ConnectionRegistry,
        outbound: mpsc::Sender<SendRequest>,
    ) -> Self {
        Self {
            entry,
            applications,
            connections,
            outbound,
        }
    }

    pub fn id(&self) -> u32 {
        self.entry.id
    }

    /// Queue `payload` for the nodes in `targets`; an empty list means every connected node.
    ///
    /// Targets that are not connected when the frame is routed are skipped. Waits while the
    /// outbound queue is full.
    pub async fn send(&self, payload: impl Into<Bytes>, targets: &[String]) -> Result<()> {
        let request = SendRequest {
            application_id: self.entry.id,
            payload: payload.into(),
            targets: targets.to_vec(),
        };
        self.outbound
            .send(request)
            .await
            .map_err(|_| ProtocolError::Custom(constants::ERR_MULTIPLEXER_STOPPED.to_string()))
    }

    /// Queue `payload` for every connected node
    pub async fn broadcast(&self, payload: impl Into<Bytes>) -> Result<()> {
        self.send(payload, &[]).await
    }

    /// Install the callback for inbound messages, replacing any previous one
    pub fn set_receive_handler<F>(&self, handler: F)
    where
        F: Fn(InboundMessage) + Send + Sync + 'static,
    {
        self.entry.set_handler(Arc::new(handler));
    }

    /// Node ids currently reachable
    pub async fn nodes(&self) -> Vec<String> {
        self.connections.ids().await
    }

    /// Release the application id. Frames for it are dropped from now on.
    pub async fn deregister(self) {
        self.applications.remove(&self.entry).await;
    }
}
