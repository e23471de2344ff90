//! The single consumer of the message queue.
//!
//! Messages are written to the active backend strictly in queue order. A
//! failed write is retried, against whatever backend is active after the
//! switch latency, until it succeeds; a dequeued message is never skipped.
//! While a message is being retried nothing else is dequeued, so a long
//! outage fills the queue and pushes back on the listeners.

use crate::metrics_defs::{OUTGOING_BYTES, OUTGOING_WRITE_ERRORS};
use crate::queue::QueueReceiver;
use crate::upstreams::Upstreams;
use bytes::Bytes;
use shared::counter;
use std::time::Duration;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

/// What happened to the messages the dispatcher handled.
///
/// `flushed` and `dropped` describe the shutdown pass: after cancellation
/// every message still queued, plus one caught mid-retry, gets a single
/// write attempt to the active backend. The first failure ends the pass and
/// everything not yet written is dropped.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DrainSummary {
    pub delivered: u64,
    pub flushed: usize,
    pub dropped: usize,
}

pub struct Dispatcher {
    upstreams: Upstreams,
    active: watch::Receiver<Option<usize>>,
    queue: QueueReceiver,
    switch_latency: Duration,
}

impl Dispatcher {
    pub fn new(
        upstreams: Upstreams,
        active: watch::Receiver<Option<usize>>,
        queue: QueueReceiver,
        switch_latency: Duration,
    ) -> Self {
        Self {
            upstreams,
            active,
            queue,
            switch_latency,
        }
    }

    pub async fn run(mut self, cancel: CancellationToken) -> DrainSummary {
        let mut delivered = 0;
        let mut pending = None;

        loop {
            let message = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                message = self.queue.recv() => match message {
                    Some(message) => message,
                    None => break,
                },
            };

            if self.deliver(&message, &cancel).await {
                delivered += 1;
            } else {
                pending = Some(message);
                break;
            }
        }

        let mut summary = self.drain(pending).await;
        summary.delivered = delivered;
        tracing::info!(
            delivered = summary.delivered,
            flushed = summary.flushed,
            dropped = summary.dropped,
            "dispatcher stopped"
        );
        summary
    }

    /// Writes `message` until it lands. Returns false on cancellation, or
    /// once the active rank can no longer change.
    async fn deliver(&mut self, message: &Bytes, cancel: &CancellationToken) -> bool {
        loop {
            let Some(rank) = self.wait_for_active(cancel).await else {
                return false;
            };
            let Some(backend) = self.upstreams.get(rank).cloned() else {
                tracing::error!(rank, "active backend is not registered, waiting for a switch");
                let changed = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return false,
                    changed = self.active.changed() => changed,
                };
                if changed.is_err() {
                    return false;
                }
                continue;
            };

            let written = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    // The write was abandoned mid-message.
                    backend.disconnect().await;
                    return false;
                }
                written = backend.write(message) => written,
            };

            match written {
                Ok(written) => {
                    counter!(OUTGOING_BYTES, "backend" => backend.address().to_string())
                        .increment(written as u64);
                    return true;
                }
                Err(e) => {
                    tracing::warn!(
                        backend = %backend.address(),
                        error = %e,
                        "backend write failed"
                    );
                    counter!(OUTGOING_WRITE_ERRORS, "backend" => backend.address().to_string())
                        .increment(1);
                    backend.disconnect().await;

                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => return false,
                        _ = tokio::time::sleep(self.switch_latency) => {}
                    }
                }
            }
        }
    }

    async fn wait_for_active(&mut self, cancel: &CancellationToken) -> Option<usize> {
        let current = *self.active.borrow_and_update();
        if current.is_some() {
            return current;
        }

        tracing::debug!("no active backend, waiting");
        tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            active = self.active.wait_for(Option::is_some) => active.ok().and_then(|rank| *rank),
        }
    }

    /// Each write is bounded by the backend write timeout and the first
    /// failure ends the pass, so a stalled collector delays shutdown by at
    /// most one timeout.
    async fn drain(&mut self, pending: Option<Bytes>) -> DrainSummary {
        self.queue.close();

        let active = *self.active.borrow();
        let target = active.and_then(|rank| self.upstreams.get(rank).cloned());
        let mut summary = DrainSummary::default();
        let mut failed = target.is_none();

        let queue = &mut self.queue;
        let remaining = pending
            .into_iter()
            .chain(std::iter::from_fn(|| queue.try_recv()));

        for message in remaining {
            match &target {
                Some(backend) if !failed => match backend.write(&message).await {
                    Ok(written) => {
                        counter!(OUTGOING_BYTES, "backend" => backend.address().to_string())
                            .increment(written as u64);
                        summary.flushed += 1;
                    }
                    Err(e) => {
                        tracing::warn!(
                            backend = %backend.address(),
                            error = %e,
                            "flush on shutdown failed"
                        );
                        failed = true;
                        summary.dropped += 1;
                    }
                },
                _ => summary.dropped += 1,
            }
        }

        summary
    }
}
