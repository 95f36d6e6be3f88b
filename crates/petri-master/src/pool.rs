//! The worker client pool: a bounded blocking reservoir of compute handles.
//!
//! The pool is a channel of client handles, nothing more. `add` enqueues,
//! `checkout` dequeues and blocks while the pool is empty; that blocking is
//! the backpressure contract the scheduler relies on. A checked-out client
//! that is never added back is gone for good, which is how failing workers
//! leave the fleet.

use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};
use tracing::warn;

use petri_wire::ComputeService;

/// One checked-out compute slot.
pub type PooledClient = Arc<dyn ComputeService>;

pub struct WorkerPool {
    tx: mpsc::Sender<PooledClient>,
    rx: Mutex<mpsc::Receiver<PooledClient>>,
}

impl WorkerPool {
    /// A pool holding at most `capacity` idle clients.
    pub fn new(capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity);
        Self {
            tx,
            rx: Mutex::new(rx),
        }
    }

    /// Take a client out of the pool, waiting as long as it takes for one to
    /// become available. Returns `None` only if the pool itself has shut down.
    pub async fn checkout(&self) -> Option<PooledClient> {
        self.rx.lock().await.recv().await
    }

    /// Put a client into the pool: a fresh one from a registration, or a
    /// healthy one coming back after a successful call.
    pub async fn add(&self, client: PooledClient) {
        if self.tx.send(client).await.is_err() {
            warn!("worker pool is closed, dropping client");
        }
    }

    /// Number of clients currently sitting idle in the pool.
    pub fn idle(&self) -> usize {
        self.tx.max_capacity() - self.tx.capacity()
    }
}
