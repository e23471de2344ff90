//! A high-availability relay for statsd lines.
//!
//! Lines arrive over UDP and TCP, are validated, queued, and forwarded to
//! the highest-priority reachable backend. See [`Relay`] for the wiring.

pub mod backend;
pub mod config;
pub mod dispatcher;
pub mod errors;
pub mod listener;
pub mod metrics_defs;
pub mod protocol;
pub mod queue;
pub mod reporter;
pub mod upstreams;
pub mod watchdog;

use config::Config;
use dispatcher::{Dispatcher, DrainSummary};
use errors::RelayError;
use listener::Listener;
use reporter::Reporter;
use std::net::SocketAddr;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use upstreams::Upstreams;
use watchdog::Watchdog;

const DEFAULT_REPORT_INTERVAL: Duration = Duration::from_secs(60);

/// A bound relay, ready to run.
///
/// Binding acquires the sockets and is the only step that can fail. Once
/// running, failures are handled inside the component that sees them.
pub struct Relay {
    upstreams: Upstreams,
    listener: Listener,
    watchdog: Watchdog,
    dispatcher: Dispatcher,
    reporter: Reporter,
}

impl Relay {
    pub async fn bind(config: &Config) -> Result<Self, RelayError> {
        Self::bind_with_report_interval(config, DEFAULT_REPORT_INTERVAL).await
    }

    pub async fn bind_with_report_interval(
        config: &Config,
        report_interval: Duration,
    ) -> Result<Self, RelayError> {
        let upstreams = Upstreams::try_new(config)?;
        let (queue_tx, queue_rx) = queue::bounded(config.cache_size);
        let listener = Listener::bind(config, queue_tx.clone()).await?;

        let watchdog = Watchdog::new(upstreams.clone(), config.reconnect_interval());
        let dispatcher = Dispatcher::new(
            upstreams.clone(),
            watchdog.subscribe(),
            queue_rx,
            config.switch_latency(),
        );
        let reporter = Reporter::new(
            upstreams.clone(),
            queue_tx,
            watchdog.subscribe(),
            report_interval,
        );

        Ok(Self {
            upstreams,
            listener,
            watchdog,
            dispatcher,
            reporter,
        })
    }

    pub fn udp_local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.udp_local_addr()
    }

    pub fn tcp_local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.tcp_local_addr()
    }

    /// Runs until `cancel` fires, then stops every task, makes one flush pass
    /// over queued messages and closes all backend connections.
    pub async fn run(self, cancel: CancellationToken) -> DrainSummary {
        let listener = tokio::spawn(self.listener.run(cancel.clone()));
        let watchdog = tokio::spawn(self.watchdog.run(cancel.clone()));
        let reporter = tokio::spawn(self.reporter.run(cancel.clone()));

        // The dispatcher must stop after the listeners so nothing is queued
        // behind its final flush.
        let dispatcher_cancel = CancellationToken::new();
        let dispatcher = tokio::spawn(self.dispatcher.run(dispatcher_cancel.clone()));

        cancel.cancelled().await;
        tracing::info!("shutting down");

        let tasks = [
            ("listener", listener),
            ("watchdog", watchdog),
            ("reporter", reporter),
        ];
        for (name, task) in tasks {
            if let Err(e) = task.await {
                tracing::error!(task = name, error = %e, "task failed");
            }
        }

        dispatcher_cancel.cancel();
        let summary = match dispatcher.await {
            Ok(summary) => summary,
            Err(e) => {
                tracing::error!(task = "dispatcher", error = %e, "task failed");
                DrainSummary::default()
            }
        };

        self.upstreams.disconnect_all().await;
        summary
    }
}
