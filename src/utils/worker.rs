//! Fixed-size worker pools draining mpsc channels.
//!
//! Every worker runs on the node's [`TaskTracker`] and stops when the node's cancellation
//! token fires or its input channel closes, whichever comes first.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct WorkerPool {
    tracker: TaskTracker,
    cancel: CancellationToken,
}

impl WorkerPool {
    pub fn new(tracker: TaskTracker, cancel: CancellationToken) -> Self {
        Self { tracker, cancel }
    }

    /// Spawn `count` workers competing for items from one receiver.
    ///
    /// No ordering holds between items handled by different workers.
    pub fn spawn_shared<T, F, Fut>(
        &self,
        pool: &'static str,
        count: usize,
        rx: mpsc::Receiver<T>,
        handler: F,
    ) where
        T: Send + 'static,
        F: Fn(T) -> Fut + Clone + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let rx = Arc::new(Mutex::new(rx));
        for worker in 0..count.max(1) {
            let rx = Arc::clone(&rx);
            let handler = handler.clone();
            let cancel = self.cancel.clone();

            self.tracker.spawn(async move {
                loop {
                    let item = tokio::select! {
                        _ = cancel.cancelled() => break,
                        item = async { rx.lock().await.recv().await } => item,
                    };
                    match item {
                        Some(item) => handler(item).await,
                        None => break,
                    }
                }
                debug!(pool, worker, "Worker stopped");
            });
        }
    }

    /// Spawn one worker per receiver; items on a receiver are handled in order.
    pub fn spawn_dedicated<T, F, Fut>(
        &self,
        pool: &'static str,
        receivers: Vec<mpsc::Receiver<T>>,
        handler: F,
    ) where
        T: Send + 'static,
        F: Fn(T) -> Fut + Clone + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        for (worker, mut rx) in receivers.into_iter().enumerate() {
            let handler = handler.clone();
            let cancel = self.cancel.clone();

            self.tracker.spawn(async move {
                loop {
                    let item = tokio::select! {
                        _ = cancel.cancelled() => break,
                        item = rx.recv() => item,
                    };
                    match item {
                        Some(item) => handler(item).await,
                        None => break,
                    }
                }
                debug!(pool, worker, "Worker stopped");
            });
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn shared_pool_drains_channel() {
        let tracker = TaskTracker::new();
        let cancel = CancellationToken::new();
        let pool = WorkerPool::new(tracker.clone(), cancel.clone());

        let seen = Arc::new(AtomicUsize::new(0));
        let (tx, rx) = mpsc::channel(16);
        let counter = Arc::clone(&seen);
        pool.spawn_shared("test", 3, rx, move |n: usize| {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(n, Ordering::SeqCst);
            }
        });

        for n in 1..=10 {
            tx.send(n).await.unwrap();
        }
        drop(tx);

        tracker.close();
        tokio::time::timeout(Duration::from_secs(2), tracker.wait())
            .await
            .unwrap();
        assert_eq!(seen.load(Ordering::SeqCst), 55);
    }

    #[tokio::test]
    async fn dedicated_workers_preserve_order() {
        let tracker = TaskTracker::new();
        let cancel = CancellationToken::new();
        let pool = WorkerPool::new(tracker.clone(), cancel.clone());

        let order = Arc::new(std::sync::Mutex::new(Vec::new()));
        let (tx, rx) = mpsc::channel(64);
        let sink = Arc::clone(&order);
        pool.spawn_dedicated("test", vec![rx], move |n: u32| {
            let sink = Arc::clone(&sink);
            async move {
                sink.lock().unwrap().push(n);
            }
        });

        for n in 0..50 {
            tx.send(n).await.unwrap();
        }
        drop(tx);
        tracker.close();
        tracker.wait().await;

        assert_eq!(*order.lock().unwrap(), (0..50).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn cancellation_stops_idle_workers() {
        let tracker = TaskTracker::new();
        let cancel = CancellationToken::new();
        let pool = WorkerPool::new(tracker.clone(), cancel.clone());

        let (_tx, rx) = mpsc::channel::<()>(1);
        pool.spawn_shared("idle", 2, rx, |_| async {});

        cancel.cancel();
        tracker.close();
        tokio::time::timeout(Duration::from_secs(2), tracker.wait())
            .await
            .unwrap();
    }
}
