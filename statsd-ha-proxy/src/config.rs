use relay::config::{Config as RelayConfig, ValidationError};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::time::Duration;

#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    #[default]
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub const fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

/// Self-monitoring metrics, pushed to a statsd collector.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct StatsConfig {
    pub enabled: bool,
    pub host: String,
    pub port: u16,
    pub prefix: String,
    /// Gauge reporting cadence, in seconds.
    pub interval: u64,
}

impl Default for StatsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            host: "127.0.0.1".to_string(),
            port: 8125,
            prefix: "statsd_ha_proxy".to_string(),
            interval: 60,
        }
    }
}

impl StatsConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval.max(1))
    }
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct Config {
    /// `stdout`, `stderr`, or a path to append to.
    pub log_file: String,
    pub log_level: LogLevel,
    #[serde(flatten)]
    pub relay: RelayConfig,
    pub stats: StatsConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_file: "stdout".to_string(),
            log_level: LogLevel::default(),
            relay: RelayConfig::default(),
            stats: StatsConfig::default(),
        }
    }
}

impl Config {
    pub fn from_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        let file = File::open(path)?;
        let config: Config = serde_yaml::from_reader(file)?;
        config.relay.validate()?;

        Ok(config)
    }

    pub fn to_yaml(&self) -> Result<String, ConfigError> {
        Ok(serde_yaml::to_string(self)?)
    }
}

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("could not load config from file: {0}")]
    LoadError(#[from] std::io::Error),
    #[error("could not parse config: {0}")]
    ParseError(#[from] serde_yaml::Error),
    #[error("invalid config: {0}")]
    InvalidConfig(#[from] ValidationError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_tmp_file(s: &str) -> tempfile::NamedTempFile {
        let mut tmp = tempfile::NamedTempFile::new().expect("create temp file");
        write!(tmp, "{}", s).expect("write yaml");

        tmp
    }

    #[test]
    fn full_config() {
        let yaml = r#"
            log_file: /var/log/statsd-ha-proxy.log
            log_level: warn
            listen: ":9125"
            servers:
              - statsite-a:8125
              - statsite-b:8125
              - statsite-c:8125
            timeout: 250
            reconnect_interval: 2000
            cache_size: 5000
            switch_upstream_latency: 3
            stats:
              enabled: true
              host: metrics.internal
              prefix: relay
            "#;
        let tmp = write_tmp_file(yaml);
        let config = Config::from_file(tmp.path()).expect("load config");

        assert_eq!(config.log_file, "/var/log/statsd-ha-proxy.log");
        assert_eq!(config.log_level, LogLevel::Warn);
        assert_eq!(config.relay.listen_addr(), "0.0.0.0:9125");
        assert_eq!(config.relay.servers.len(), 3);
        assert_eq!(config.relay.servers[0], "statsite-a:8125");
        assert_eq!(config.relay.connect_timeout(), Duration::from_millis(250));
        assert_eq!(config.relay.cache_size, 5000);
        assert_eq!(config.relay.switch_latency(), Duration::from_secs(3));
        assert!(config.stats.enabled);
        assert_eq!(config.stats.host, "metrics.internal");
        assert_eq!(config.stats.port, 8125);
        assert_eq!(config.stats.prefix, "relay");
    }

    #[test]
    fn empty_file_uses_defaults() {
        let tmp = write_tmp_file("{}");
        let config = Config::from_file(tmp.path()).expect("load config");
        assert_eq!(config.log_file, "stdout");
        assert_eq!(config.log_level, LogLevel::Debug);
        assert_eq!(config.relay, RelayConfig::default());
        assert!(!config.stats.enabled);
    }

    #[test]
    fn default_config_round_trips() {
        let yaml = Config::default().to_yaml().expect("serialize");
        let tmp = write_tmp_file(&yaml);
        let config = Config::from_file(tmp.path()).expect("load config");
        assert_eq!(config, Config::default());
    }

    #[test]
    fn errors() {
        assert!(matches!(
            Config::from_file(std::path::Path::new("/nonexistent/config.yml")),
            Err(ConfigError::LoadError(_))
        ));

        let tmp = write_tmp_file("servers: 12\n");
        assert!(matches!(
            Config::from_file(tmp.path()),
            Err(ConfigError::ParseError(_))
        ));

        let tmp = write_tmp_file("cache_size: 0\n");
        assert!(matches!(
            Config::from_file(tmp.path()),
            Err(ConfigError::InvalidConfig(ValidationError::Zero("cache_size")))
        ));
    }
}
