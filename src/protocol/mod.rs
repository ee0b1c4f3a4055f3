//! # Protocol Layer
//!
//! What a node does with system traffic once frames are off the wire.
//!
//! ## Components
//! - **Handshake**: `HELLO` exchange establishing the peer's node id
//! - **ACL**: allow-lists per principal, selected by the packet token
//! - **Dispatcher**: executes authorized commands and builds replies
//! - **Store**: in-memory blobs behind `SET`/`GET`
//!
//! ## Commands
//! | Command | Anonymous | Privileged | Reply |
//! |---------|-----------|------------|-------|
//! | `ID`    | no        | yes        | node id |
//! | `EXIT`  | yes       | yes        | empty, then close |
//! | `SET`   | no        | yes        | generated key |
//! | `GET`   | yes       | yes        | stored bytes or empty |

pub mod acl;
pub mod dispatcher;
pub mod handshake;
pub mod store;

#[cfg(test)]
mod tests;
