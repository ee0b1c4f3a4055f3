use crate::core::packet::{Command, Packet};
use crate::error::{constants, ProtocolError, Result};
use crate::protocol::acl::Acl;
use crate::protocol::store::DataStore;
use bytes::Bytes;
use std::sync::Arc;
use tracing::debug;

/// Outcome of dispatching one packet: packets to queue on the connection and whether the
/// connection should be closed once they are flushed.
#[derive(Debug, Default)]
pub struct Dispatch {
    pub replies: Vec<Packet>,
    pub close: bool,
}

impl Dispatch {
    fn reply(packet: Packet) -> Self {
        Self {
            replies: vec![packet],
            close: false,
        }
    }
}

/// Command dispatcher gated by the ACL.
/// Holds no per-connection state; the blob store is shared by every connection of a node.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    node_id: Arc<str>,
    acl: Arc<Acl>,
    store: DataStore,
}

impl Dispatcher {
    pub fn new(node_id: impl Into<Arc<str>>, acl: Acl, store: DataStore) -> Self {
        Self {
            node_id: node_id.into(),
            acl: Arc::new(acl),
            store,
        }
    }

    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    pub fn store(&self) -> &DataStore {
        &self.store
    }

    /// Authorize and execute `packet`.
    ///
    /// An unauthorized command is not an error: it yields a `DENY` reply. `HELLO` outside the
    /// handshake returns `UnexpectedMessage` and any command without a handler returns
    /// `NoHandler`; callers answer both with [`policy_denial`].
    pub async fn dispatch(&self, packet: &Packet) -> Result<Dispatch> {
        // Replies are answers, never requests.
        if matches!(packet.command, Command::Reply | Command::Deny) {
            return Ok(Dispatch::default());
        }

        if !self.acl.authorize(packet.command, &packet.token) {
            debug!(command = %packet.command, id = %packet.id, "Command denied by ACL");
            return Ok(Dispatch::reply(packet.deny(constants::ERR_UNAUTHORIZED)));
        }

        match packet.command {
            Command::Id => Ok(Dispatch::reply(packet.reply(
                Command::Reply,
                Bytes::copy_from_slice(self.node_id.as_bytes()),
            ))),
            Command::Exit => Ok(Dispatch {
                replies: vec![packet.reply(Command::Reply, Bytes::new())],
                close: true,
            }),
            Command::Set => {
                let key = self.store.set(packet.data.clone()).await;
                Ok(Dispatch::reply(packet.reply(Command::Reply, Bytes::from(key))))
            }
            Command::Get => {
                let key = String::from_utf8_lossy(&packet.data);
                let value = self.store.get(&key).await.unwrap_or_default();
                Ok(Dispatch::reply(packet.reply(Command::Reply, value)))
            }
            Command::Hello => Err(ProtocolError::UnexpectedMessage),
            other => Err(ProtocolError::NoHandler(other)),
        }
    }
}

/// `DENY` answer for dispatch errors that reflect a protocol violation by the peer.
/// Returns `None` for errors that are local failures and must not be reported.
pub fn policy_denial(packet: &Packet, error: &ProtocolError) -> Option<Packet> {
    match error {
        ProtocolError::UnexpectedMessage => {
            Some(packet.deny(constants::ERR_HELLO_AFTER_HANDSHAKE))
        }
        ProtocolError::NoHandler(_) => Some(packet.deny(constants::ERR_NO_HANDLER)),
        ProtocolError::Unauthorized => Some(packet.deny(constants::ERR_UNAUTHORIZED)),
        _ => None,
    }
}
