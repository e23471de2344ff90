mod config;
mod logging;
mod stats;

use clap::{ArgAction, Parser};
use config::Config;
use std::path::PathBuf;
use std::process;
use tokio_util::sync::CancellationToken;

/// High-availability relay for statsd metrics.
#[derive(Parser)]
#[command(name = "statsd-ha-proxy", version, disable_version_flag = true)]
struct Cli {
    /// Print version and exit
    #[arg(short = 'v', long = "version", action = ArgAction::Version)]
    version: (),

    /// Path to the YAML config file
    #[arg(short = 'c', long = "config", default_value = "config.yml")]
    config: PathBuf,

    /// Print the default config as YAML and exit
    #[arg(long = "print-default-config")]
    print_default_config: bool,
}

fn main() {
    let cli = Cli::parse();

    if cli.print_default_config {
        match Config::default().to_yaml() {
            Ok(yaml) => {
                print!("{yaml}");
                return;
            }
            Err(e) => fail(e),
        }
    }

    let config = Config::from_file(&cli.config).unwrap_or_else(|e| fail(e));
    if let Err(e) = logging::init(&config.log_file, config.log_level) {
        fail(e);
    }

    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .unwrap_or_else(|e| fail(e));

    if let Err(e) = rt.block_on(run(config)) {
        fail(e);
    }
}

async fn run(config: Config) -> Result<(), relay::errors::RelayError> {
    if config.stats.enabled
        && let Err(e) = stats::install(&config.stats)
    {
        tracing::error!(error = %e, "metrics disabled");
    }

    let relay =
        relay::Relay::bind_with_report_interval(&config.relay, config.stats.interval()).await?;
    tracing::info!(
        servers = ?config.relay.servers,
        cache_size = config.relay.cache_size,
        "statsd-ha-proxy started"
    );

    let cancel = CancellationToken::new();
    tokio::spawn(shutdown_signal(cancel.clone()));
    relay.run(cancel).await;

    tracing::info!("statsd-ha-proxy stopped");
    Ok(())
}

async fn shutdown_signal(cancel: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for SIGINT");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("received SIGINT"),
        _ = terminate => tracing::info!("received SIGTERM"),
    }
    cancel.cancel();
}

fn fail(e: impl std::fmt::Display) -> ! {
    eprintln!("statsd-ha-proxy: {e}");
    process::exit(1);
}
