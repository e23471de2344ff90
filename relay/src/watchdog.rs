//! Periodic backend health probing and active backend selection.
//!
//! The watchdog is the only writer of the active backend. Every cycle it
//! reconnects whatever it can and promotes the lowest-ranked connected
//! backend, which covers both failover and fail-back. A flapping backend can
//! therefore switch at most once per probe interval.

use crate::metrics_defs::UPSTREAM_SWITCHES;
use crate::upstreams::Upstreams;
use shared::counter;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

pub struct Watchdog {
    upstreams: Upstreams,
    interval: Duration,
    active: watch::Sender<Option<usize>>,
}

impl Watchdog {
    pub fn new(upstreams: Upstreams, interval: Duration) -> Self {
        let (active, _) = watch::channel(None);
        Self {
            upstreams,
            interval,
            active,
        }
    }

    /// A handle observing the rank of the active backend.
    pub fn subscribe(&self) -> watch::Receiver<Option<usize>> {
        self.active.subscribe()
    }

    pub fn active(&self) -> Option<usize> {
        *self.active.borrow()
    }

    /// Runs a single probe cycle and returns the active rank afterwards.
    pub async fn probe(&self) -> Option<usize> {
        for backend in self.upstreams.iter() {
            backend.check_alive().await;
            if let Err(e) = backend.connect().await {
                tracing::warn!(backend = %backend.address(), error = %e, "backend unavailable");
            }
        }

        let Some(candidate) = self.upstreams.first_connected() else {
            tracing::error!("all backends down");
            return self.active();
        };

        let current = self.active();
        if current == Some(candidate) {
            return current;
        }

        let to = self.address(candidate);
        match current {
            None => tracing::info!(to = %to, "activating backend"),
            Some(from) => {
                tracing::warn!(from = %self.address(from), to = %to, "switching active backend");
                counter!(UPSTREAM_SWITCHES).increment(1);
            }
        }
        self.active.send_replace(Some(candidate));

        Some(candidate)
    }

    pub async fn run(self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => break,
                        _ = self.probe() => {}
                    }
                }
            }
        }

        tracing::info!("watchdog stopped");
    }

    fn address(&self, rank: usize) -> &str {
        self.upstreams.get(rank).map_or("<unknown>", |b| b.address())
    }
}
