//! # Core Protocol Components
//!
//! Wire formats shared by every connection.
//!
//! ## Components
//! - **Frame**: fixed 11-byte header plus payload, the unit read from and written to sockets
//! - **Codec**: Tokio codec buffering partial reads into whole frames
//! - **Packet**: self-describing message carried inside system frames
//!
//! ## Wire Format
//! ```text
//! [Version(1)] [Application ID(4, LE)] [Type(1)] [Flags(1)] [Length(4, LE)] [Payload(N)]
//! ```
//!
//! ## Limits
//! - Maximum payload size defaults to 16MB and is checked before allocation
//! - A declared length that exceeds the limit ends the connection

pub mod codec;
pub mod frame;
pub mod packet;
