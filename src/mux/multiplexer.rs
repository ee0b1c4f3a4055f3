//! # Multiplexer
//!
//! Routes frames between connections and applications.
//!
//! ## Inbound
//! Read loops push every frame into one of `inbound_workers` shards, chosen by a stable hash
//! of the connection id. Each shard has a single worker, so frames from one connection are
//! handled in the order they were read. A worker strips the header and passes the payload
//! to the system channel (application id 0) or to the registered application; frames for
//! unknown application ids are dropped.
//!
//! ## Outbound
//! Applications queue `SendRequest`s on one shared channel drained by `outbound_workers`
//! workers. A worker wraps the payload in a fresh app frame and queues it on every target
//! connection; targets that are not connected are skipped.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::config::MultiplexerConfig;
use crate::core::frame::Frame;
use crate::error::{constants, ProtocolError, Result};
use crate::mux::application::{ApplicationRegistry, InboundMessage};
use crate::mux::system::SystemHandler;
use crate::transport::registry::ConnectionRegistry;
use crate::utils::metrics::Metrics;
use crate::utils::worker::WorkerPool;

/// Frame read from a connection
#[derive(Debug)]
pub struct InboundFrame {
    pub connection_id: String,
    pub frame: Frame,
}

/// Application payload to deliver to some or all peers
#[derive(Debug, Clone)]
pub struct SendRequest {
    pub application_id: u32,
    pub payload: Bytes,
    /// Empty means every connected peer
    pub targets: Vec<String>,
}

/// Entry point of the inbound shards, held by every read loop
#[derive(Clone)]
pub struct InboundSender {
    shards: Arc<[mpsc::Sender<InboundFrame>]>,
}

impl InboundSender {
    /// Queue a frame on its connection's shard, waiting while the shard is full
    pub async fn send(&self, item: InboundFrame) -> Result<()> {
        let shard = shard_for(&item.connection_id, self.shards.len());
        self.shards[shard]
            .send(item)
            .await
            .map_err(|_| ProtocolError::Custom(constants::ERR_MULTIPLEXER_STOPPED.to_string()))
    }
}

fn shard_for(connection_id: &str, shards: usize) -> usize {
    let mut hasher = DefaultHasher::new();
    connection_id.hash(&mut hasher);
    (hasher.finish() % shards.max(1) as u64) as usize
}

#[derive(Clone)]
struct Router {
    connections: ConnectionRegistry,
    applications: ApplicationRegistry,
    system: SystemHandler,
    metrics: Arc<Metrics>,
}

impl Router {
    async fn route_inbound(&self, item: InboundFrame) {
        let InboundFrame {
            connection_id,
            frame,
        } = item;

        if frame.header.is_system() {
            self.system.handle(&connection_id, frame.payload).await;
            return;
        }

        let application_id = frame.header.application_id;
        let Some(application) = self.applications.get(application_id).await else {
            self.metrics.frame_dropped();
            debug!(peer = %connection_id, application_id, "No application registered, dropping frame");
            return;
        };

        let delivered = application.deliver(InboundMessage {
            from: connection_id,
            application_id,
            payload: frame.payload,
        });
        if !delivered {
            self.metrics.frame_dropped();
            debug!(application_id, "Application has no receive handler, dropping frame");
        }
    }

    async fn route_outbound(&self, request: SendRequest) {
        let frame = match Frame::app(request.application_id, request.payload) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(application_id = request.application_id, error = %e, "Cannot frame outbound payload");
                return;
            }
        };

        let targets = if request.targets.is_empty() {
            self.connections.all().await
        } else {
            let mut found = Vec::with_capacity(request.targets.len());
            for id in &request.targets {
                match self.connections.get(id).await {
                    Some(connection) => found.push(connection),
                    None => debug!(peer = %id, "Unknown target, skipping"),
                }
            }
            found
        };

        for connection in targets {
            if let Err(e) = connection.send(frame.clone()).await {
                debug!(peer = %connection.id(), error = %e, "Outbound frame not queued");
            }
        }
    }
}

/// Running inbound and outbound worker pools
#[derive(Clone)]
pub struct Multiplexer {
    inbound: InboundSender,
    outbound: mpsc::Sender<SendRequest>,
}

impl Multiplexer {
    /// Spawn both worker pools on `pool`
    pub fn start(
        config: &MultiplexerConfig,
        pool: &WorkerPool,
        connections: ConnectionRegistry,
        applications: ApplicationRegistry,
        system: SystemHandler,
        metrics: Arc<Metrics>,
    ) -> Self {
        let router = Router {
            connections,
            applications,
            system,
            metrics,
        };

        let shard_count = config.inbound_workers.max(1);
        let shard_capacity = (config.buffer_size / shard_count).max(1);
        let (senders, receivers): (Vec<_>, Vec<_>) = (0..shard_count)
            .map(|_| mpsc::channel::<InboundFrame>(shard_capacity))
            .unzip();

        let inbound_router = router.clone();
        pool.spawn_dedicated("mux-inbound", receivers, move |item| {
            let router = inbound_router.clone();
            async move { router.route_inbound(item).await }
        });

        let (outbound, outbound_rx) = mpsc::channel::<SendRequest>(config.buffer_size.max(1));
        pool.spawn_shared(
            "mux-outbound",
            config.outbound_workers,
            outbound_rx,
            move |request| {
                let router = router.clone();
                async move { router.route_outbound(request).await }
            },
        );

        Self {
            inbound: InboundSender {
                shards: senders.into(),
            },
            outbound,
        }
    }

    pub fn inbound(&self) -> InboundSender {
        self.inbound.clone()
    }

    pub fn outbound(&self) -> mpsc::Sender<SendRequest> {
        self.outbound.clone()
    }
}
