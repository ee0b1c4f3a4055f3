//! # meshlink
//!
//! Node-to-node transport for small clusters.
//!
//! Every node listens on TCP and dials its peers, forming a full mesh. Each link starts
//! with a `HELLO` handshake that establishes the peer's node id, then carries length-framed
//! traffic in both directions:
//!
//! - **System frames** (application id 0) carry packets for the built-in commands
//!   (`ID`, `EXIT`, `SET`, `GET`), gated by a token-based ACL and answered with `REPLY` or
//!   `DENY`.
//! - **Application frames** are routed by application id to handlers registered through
//!   [`Node::register_application`], so independent subsystems share one socket per peer.
//!
//! ## Layout
//! - [`core`](crate::core): frame header, frame codec, packet codec
//! - [`protocol`]: handshake, ACL, command dispatcher
//! - [`transport`]: connection registry, read/write loops, listener, client
//! - [`mux`]: multiplexer worker pools and the application façade
//! - [`node`]: the running node tying it all together
//!
//! ## Concurrency
//! One read task and one write task per connection; the write task is the only writer of
//! its socket. Inbound frames are sharded to a fixed pool of workers by connection, so
//! frames from one peer are handled in order. Cancellation flows from the node's root token
//! to one child token per connection.

pub mod config;
pub mod core;
pub mod error;
pub mod mux;
pub mod node;
pub mod protocol;
pub mod transport;
pub mod utils;

pub use config::NodeConfig;
pub use crate::core::frame::{Frame, FrameFlags, FrameHeader, MessageType};
pub use crate::core::packet::{Command, Packet};
pub use error::{ProtocolError, Result};
pub use mux::{Application, InboundMessage};
pub use node::Node;
