use crate::config::LogLevel;
use std::fs::OpenOptions;
use std::io;
use std::sync::Mutex;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

#[derive(thiserror::Error, Debug)]
pub enum LoggingError {
    #[error("could not open log file {path}: {source}")]
    OpenFile {
        path: String,
        #[source]
        source: io::Error,
    },
    #[error("could not install log subscriber: {0}")]
    Init(#[from] tracing_subscriber::util::TryInitError),
}

/// Where log lines go: `stdout`, `stderr`, or a file opened for appending.
fn make_writer(log_file: &str) -> Result<(BoxMakeWriter, bool), LoggingError> {
    match log_file {
        "" | "stdout" => Ok((BoxMakeWriter::new(io::stdout), true)),
        "stderr" => Ok((BoxMakeWriter::new(io::stderr), true)),
        path => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .map_err(|source| LoggingError::OpenFile {
                    path: path.to_string(),
                    source,
                })?;
            Ok((BoxMakeWriter::new(Mutex::new(file)), false))
        }
    }
}

/// `RUST_LOG` wins over the configured level when set.
fn filter(level: LogLevel) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.as_str()))
}

pub fn init(log_file: &str, level: LogLevel) -> Result<(), LoggingError> {
    let (writer, ansi) = make_writer(log_file)?;

    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_target(true)
                .with_ansi(ansi)
                .with_writer(writer),
        )
        .with(filter(level))
        .try_init()?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opens_log_file_for_append() {
        let dir = tempfile::tempdir().expect("create temp dir");
        let path = dir.path().join("relay.log");
        std::fs::write(&path, "existing\n").unwrap();

        let (writer, ansi) = make_writer(path.to_str().unwrap()).expect("open log file");
        assert!(!ansi);

        let subscriber = tracing_subscriber::registry()
            .with(fmt::layer().with_ansi(false).with_writer(writer))
            .with(EnvFilter::new("info"));
        tracing::subscriber::with_default(subscriber, || {
            tracing::info!(backend = "statsite1:8125", "connected to backend");
            tracing::debug!("filtered out");
        });

        let contents = std::fs::read_to_string(&path).unwrap();
        assert!(contents.starts_with("existing\n"));
        assert!(contents.contains("connected to backend"));
        assert!(contents.contains("statsite1:8125"));
        assert!(!contents.contains("filtered out"));
    }

    #[test]
    fn unopenable_log_file_is_an_error() {
        assert!(matches!(
            make_writer("/nonexistent/dir/relay.log"),
            Err(LoggingError::OpenFile { .. })
        ));
    }
}
