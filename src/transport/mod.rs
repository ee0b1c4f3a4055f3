//! # Transport Layer
//!
//! Sockets, connection lifecycle and the tasks that own them.
//!
//! ## Components
//! - **Registry**: live connections keyed by peer node id
//! - **Connection**: the read loop and the single-writer write loop of each connection
//! - **Listener**: TCP accept loop
//! - **Client**: dial-side peer for request/response tools
//!
//! Any `AsyncRead + AsyncWrite` stream can carry a connection, so a TLS layer can wrap the
//! socket before the handshake and hand the encrypted stream over.

pub mod client;
pub mod connection;
pub mod listener;
pub mod registry;

pub use registry::{Connection, ConnectionRegistry, Direction, Outbound};
