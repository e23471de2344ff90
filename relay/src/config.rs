use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ValidationError {
    #[error("listen address cannot be empty")]
    EmptyListen,

    #[error("at least one server must be configured")]
    NoServers,

    #[error("empty server address")]
    EmptyServer,

    #[error("duplicate server address: {0}")]
    DuplicateServer(String),

    #[error("{0} must be greater than 0")]
    Zero(&'static str),
}

/// Relay configuration.
///
/// Every field has a default, so a partial YAML document is a valid config.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Address the UDP and TCP listeners bind to. A bare `:port` binds all
    /// IPv4 interfaces.
    pub listen: String,
    /// Backend collectors, in priority order. The first entry is preferred.
    pub servers: Vec<String>,
    /// Backend connect timeout, in milliseconds.
    pub timeout: u64,
    /// Backend write timeout, in milliseconds. A collector that stops reading
    /// for this long is treated as failed.
    pub write_timeout: u64,
    /// Watchdog probe interval, in milliseconds.
    pub reconnect_interval: u64,
    /// Capacity of the queue between listeners and dispatcher, in messages.
    pub cache_size: usize,
    /// Dispatcher pause after a failed write, in seconds.
    pub switch_upstream_latency: u64,
    /// Longest accepted inbound line, in bytes.
    pub max_line_length: usize,
    /// Idle timeout for producer TCP connections, in milliseconds. 0 disables it.
    pub tcp_read_timeout: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen: ":8125".to_string(),
            servers: vec!["statsite1:8125".to_string(), "statsite2:8125".to_string()],
            timeout: 1000,
            write_timeout: 5000,
            reconnect_interval: 10_000,
            cache_size: 1_000_000,
            switch_upstream_latency: 10,
            max_line_length: 8192,
            tcp_read_timeout: 0,
        }
    }
}

impl Config {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.listen.trim().is_empty() {
            return Err(ValidationError::EmptyListen);
        }

        if self.servers.is_empty() {
            return Err(ValidationError::NoServers);
        }

        let mut seen = HashSet::new();
        for server in &self.servers {
            if server.trim().is_empty() {
                return Err(ValidationError::EmptyServer);
            }
            if !seen.insert(server) {
                return Err(ValidationError::DuplicateServer(server.clone()));
            }
        }

        let non_zero = [
            ("timeout", self.timeout),
            ("write_timeout", self.write_timeout),
            ("reconnect_interval", self.reconnect_interval),
            ("cache_size", self.cache_size as u64),
            ("switch_upstream_latency", self.switch_upstream_latency),
            ("max_line_length", self.max_line_length as u64),
        ];
        for (name, value) in non_zero {
            if value == 0 {
                return Err(ValidationError::Zero(name));
            }
        }

        Ok(())
    }

    /// The address to bind, with a missing host filled in as `0.0.0.0`.
    pub fn listen_addr(&self) -> String {
        if self.listen.starts_with(':') {
            format!("0.0.0.0{}", self.listen)
        } else {
            self.listen.clone()
        }
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.timeout)
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout)
    }

    pub fn reconnect_interval(&self) -> Duration {
        Duration::from_millis(self.reconnect_interval)
    }

    pub fn switch_latency(&self) -> Duration {
        Duration::from_secs(self.switch_upstream_latency)
    }

    pub fn tcp_read_timeout(&self) -> Option<Duration> {
        (self.tcp_read_timeout > 0).then(|| Duration::from_millis(self.tcp_read_timeout))
    }
}
