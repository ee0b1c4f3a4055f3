//! TCP accept loop.

use std::future::Future;
use std::net::SocketAddr;
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{error, info, instrument};

/// Pause after a failed accept, e.g. when the process is out of file descriptors
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(100);

/// Accept connections until `cancel` fires, running `on_accept` for each one as a tracked
/// task. The handler owns the stream from then on.
#[instrument(skip_all, fields(addr = ?listener.local_addr().ok()))]
pub async fn accept_loop<F, Fut>(
    listener: TcpListener,
    cancel: CancellationToken,
    tracker: TaskTracker,
    on_accept: F,
) where
    F: Fn(TcpStream, SocketAddr) -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    info!("Accepting connections");

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                info!("Listener stopped");
                break;
            }

            accept_result = listener.accept() => {
                match accept_result {
                    Ok((stream, addr)) => {
                        if let Err(e) = stream.set_nodelay(true) {
                            error!(remote = %addr, error = %e, "Failed to set TCP_NODELAY");
                        }
                        tracker.spawn(on_accept(stream, addr));
                    }
                    Err(e) => {
                        error!(error = %e, "Error accepting connection");
                        tokio::time::sleep(ACCEPT_ERROR_BACKOFF).await;
                    }
                }
            }
        }
    }
}
