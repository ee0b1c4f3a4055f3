//! # Utility Modules
//!
//! Supporting utilities shared by the transport and multiplexer layers.
//!
//! ## Components
//! - **Logging**: Structured logging configuration
//! - **Metrics**: Thread-safe observability counters
//! - **Timeout**: Deadline defaults and async timeout wrappers
//! - **Worker**: Fixed-size worker pools over mpsc channels

pub mod logging;
pub mod metrics;
pub mod timeout;
pub mod worker;

pub use metrics::{Metrics, MetricsSnapshot};
pub use worker::WorkerPool;
