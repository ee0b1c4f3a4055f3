//! Timeout defaults and async deadline helpers.

use std::future::Future;
use std::time::Duration;

use crate::error::{ProtocolError, Result};

/// Default deadline for request/response round trips
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Default deadline for the peer's `HELLO`
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);

/// Upper bound on waiting for tasks during node shutdown
pub const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

/// Run a fallible future, failing with [`ProtocolError::Timeout`] once `duration` elapses
pub async fn with_timeout<F, T>(duration: Duration, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    tokio::time::timeout(duration, fut)
        .await
        .map_err(|_| ProtocolError::Timeout)?
}
