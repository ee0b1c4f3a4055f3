//! # Multiplexing
//!
//! Lets independent applications share the node's connections.
//!
//! ## Components
//! - **Multiplexer**: inbound and outbound worker pools routing by application id
//! - **Application**: registration handle for a logical channel
//! - **System**: the reserved channel 0 carrying commands and their replies

pub mod application;
pub mod multiplexer;
pub mod system;

pub use application::{Application, ApplicationRegistry, InboundMessage, ReceiveHandler};
pub use multiplexer::{InboundFrame, InboundSender, Multiplexer, SendRequest};
pub use system::{PendingRequests, SystemHandler};
