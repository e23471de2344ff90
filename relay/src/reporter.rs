use crate::metrics_defs::{CACHE_MAX_SIZE, CACHE_USED, UPSTREAM_ACTIVE_RANK, UPSTREAM_CONNECTED};
use crate::queue::QueueSender;
use crate::upstreams::Upstreams;
use shared::gauge;
use std::time::Duration;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

/// Publishes queue and backend state as gauges on a fixed cadence.
pub struct Reporter {
    upstreams: Upstreams,
    queue: QueueSender,
    active: watch::Receiver<Option<usize>>,
    interval: Duration,
}

impl Reporter {
    pub fn new(
        upstreams: Upstreams,
        queue: QueueSender,
        active: watch::Receiver<Option<usize>>,
        interval: Duration,
    ) -> Self {
        Self {
            upstreams,
            queue,
            active,
            interval,
        }
    }

    pub fn report(&self) {
        gauge!(CACHE_MAX_SIZE).set(self.queue.max_capacity() as f64);
        gauge!(CACHE_USED).set(self.queue.depth() as f64);

        for backend in self.upstreams.iter() {
            let connected = if backend.is_connected() { 1.0 } else { 0.0 };
            gauge!(UPSTREAM_CONNECTED, "backend" => backend.address().to_string()).set(connected);
        }

        let rank = (*self.active.borrow()).map_or(-1.0, |rank| rank as f64);
        gauge!(UPSTREAM_ACTIVE_RANK).set(rank);
    }

    pub async fn run(self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.interval);
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => self.report(),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::queue;
    use bytes::Bytes;
    use metrics_util::debugging::{DebugValue, DebuggingRecorder, Snapshotter};
    use std::collections::HashMap;
    use tokio::net::TcpListener;

    fn gauges(snapshotter: &Snapshotter) -> HashMap<String, f64> {
        snapshotter
            .snapshot()
            .into_vec()
            .into_iter()
            .filter_map(|(key, _, _, value)| {
                let DebugValue::Gauge(value) = value else {
                    return None;
                };
                let key = key.key();
                let mut name = key.name().to_string();
                for label in key.labels() {
                    name.push_str(&format!("[{}={}]", label.key(), label.value()));
                }
                Some((name, value.into_inner()))
            })
            .collect()
    }

    #[tokio::test]
    async fn reports_queue_and_backend_state() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let live = listener.local_addr().unwrap().to_string();
        let config = Config {
            servers: vec!["127.0.0.1:1".to_string(), live.clone()],
            ..Default::default()
        };
        let upstreams = Upstreams::try_new(&config).unwrap();
        upstreams.get(1).unwrap().connect().await.unwrap();

        let (tx, _rx) = queue::bounded(8);
        tx.send(Bytes::from_static(b"a:1|c\n")).await.unwrap();
        tx.send(Bytes::from_static(b"b:1|c\n")).await.unwrap();
        let (_active_tx, active_rx) = watch::channel(Some(1));

        let reporter = Reporter::new(upstreams, tx, active_rx, Duration::from_secs(60));
        let recorder = DebuggingRecorder::new();
        let snapshotter = recorder.snapshotter();
        metrics::with_local_recorder(&recorder, || reporter.report());

        let gauges = gauges(&snapshotter);
        assert_eq!(gauges["cache.max_size"], 8.0);
        assert_eq!(gauges["cache.used"], 2.0);
        assert_eq!(gauges["upstream.connected[backend=127.0.0.1:1]"], 0.0);
        assert_eq!(gauges[&format!("upstream.connected[backend={live}]")], 1.0);
        assert_eq!(gauges["upstream.active_rank"], 1.0);
    }
}
