//! Bounded FIFO between the listeners and the dispatcher.
//!
//! Senders wait while the queue is full, so a stalled dispatcher slows
//! producers down instead of losing lines.

use bytes::Bytes;
use tokio::sync::mpsc;

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
#[error("queue closed")]
pub struct Closed;

pub fn bounded(capacity: usize) -> (QueueSender, QueueReceiver) {
    let (tx, rx) = mpsc::channel(capacity);
    (QueueSender { tx }, QueueReceiver { rx })
}

#[derive(Clone, Debug)]
pub struct QueueSender {
    tx: mpsc::Sender<Bytes>,
}

impl QueueSender {
    /// Enqueues a message, waiting for room if the queue is full.
    pub async fn send(&self, message: Bytes) -> Result<(), Closed> {
        self.tx.send(message).await.map_err(|_| Closed)
    }

    pub fn max_capacity(&self) -> usize {
        self.tx.max_capacity()
    }

    /// Number of messages currently waiting.
    pub fn depth(&self) -> usize {
        self.tx.max_capacity() - self.tx.capacity()
    }
}

#[derive(Debug)]
pub struct QueueReceiver {
    rx: mpsc::Receiver<Bytes>,
}

impl QueueReceiver {
    pub async fn recv(&mut self) -> Option<Bytes> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<Bytes> {
        self.rx.try_recv().ok()
    }

    /// Refuses further sends. Messages already queued can still be received.
    pub fn close(&mut self) {
        self.rx.close();
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}
