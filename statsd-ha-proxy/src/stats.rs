use crate::config::StatsConfig;
use metrics_exporter_statsd::StatsdBuilder;
use shared::metrics_defs::describe_all;

const QUEUE_SIZE: usize = 5000;
const BUFFER_SIZE: usize = 1024;

#[derive(thiserror::Error, Debug)]
pub enum MetricsError {
    #[error("could not build statsd exporter: {0}")]
    Build(String),
    #[error("a metrics recorder is already installed")]
    AlreadyInstalled,
}

/// Installs the statsd exporter as the global recorder and describes every
/// relay metric to it.
pub fn install(config: &StatsConfig) -> Result<(), MetricsError> {
    let recorder = StatsdBuilder::from(config.host.as_str(), config.port)
        .with_queue_size(QUEUE_SIZE)
        .with_buffer_size(BUFFER_SIZE)
        .build(Some(config.prefix.as_str()))
        .map_err(|e| MetricsError::Build(e.to_string()))?;

    metrics::set_global_recorder(recorder).map_err(|_| MetricsError::AlreadyInstalled)?;
    describe_all(relay::metrics_defs::ALL_METRICS);

    tracing::info!(
        host = %config.host,
        port = config.port,
        prefix = %config.prefix,
        "statsd metrics exporter installed"
    );

    Ok(())
}
