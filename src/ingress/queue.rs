//! Bounded run queue between ingress and the worker pool.

use tokio::sync::mpsc;

use crate::config::IngressConfig;
use crate::error::{AutoPrError, Result};

use super::event::WorkItem;

/// Sending half of the run queue (held by the ingress).
#[derive(Clone)]
pub struct RunQueue {
    tx: mpsc::Sender<WorkItem>,
}

/// Receiving half (held by the worker pool).
pub struct RunQueueReceiver {
    rx: mpsc::Receiver<WorkItem>,
}

impl RunQueue {
    /// Create a bounded queue with the given capacity.
    pub fn bounded(capacity: usize) -> (Self, RunQueueReceiver) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, RunQueueReceiver { rx })
    }

    /// Enqueue without waiting; a full queue is backpressure, not a wait.
    pub fn try_enqueue(&self, item: WorkItem, config: &IngressConfig) -> Result<()> {
        self.tx.try_send(item).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => AutoPrError::QueueFull {
                capacity: config.queue_capacity,
                retry_after_secs: config.retry_after_secs,
            },
            mpsc::error::TrySendError::Closed(_) => AutoPrError::Internal {
                details: "run queue receiver dropped".to_string(),
            },
        })
    }
}

impl RunQueueReceiver {
    /// Await the next item; `None` when all senders are gone.
    pub async fn recv(&mut self) -> Option<WorkItem> {
        self.rx.recv().await
    }

    /// Non-blocking receive for tests and drain loops.
    pub fn try_recv(&mut self) -> Option<WorkItem> {
        self.rx.try_recv().ok()
    }
}
