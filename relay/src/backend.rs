use parking_lot::Mutex;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;

#[derive(thiserror::Error, Debug)]
pub enum BackendError {
    #[error("failed to connect to {address}: {source}")]
    Connect {
        address: String,
        #[source]
        source: io::Error,
    },
    #[error("timed out connecting to {address} after {timeout:?}")]
    ConnectTimeout { address: String, timeout: Duration },
    #[error("not connected")]
    NotConnected,
    #[error("connection closed by peer")]
    Closed,
    #[error("write failed: {0}")]
    Write(#[from] io::Error),
    #[error("timed out writing to {address} after {timeout:?}")]
    WriteTimeout { address: String, timeout: Duration },
}

#[derive(Debug, Default, Clone, Copy)]
struct Times {
    last_uptime: Option<Instant>,
    last_downtime: Option<Instant>,
}

/// One downstream collector and its TCP connection.
///
/// The connection is only reached through `connect`, `disconnect`, `write`
/// and `check_alive`, which serialize on an async mutex. `connected` mirrors
/// whether the slot is filled so status can be read without the lock. Writes
/// are bounded by `write_timeout`, so the lock is never held longer than that
/// by a collector that stops reading.
#[derive(Debug)]
pub struct Backend {
    address: String,
    rank: usize,
    connect_timeout: Duration,
    write_timeout: Duration,
    connection: tokio::sync::Mutex<Option<TcpStream>>,
    connected: AtomicBool,
    times: Mutex<Times>,
    bytes_sent: AtomicU64,
}

impl Backend {
    pub fn new(
        address: impl Into<String>,
        rank: usize,
        connect_timeout: Duration,
        write_timeout: Duration,
    ) -> Self {
        Self {
            address: address.into(),
            rank,
            connect_timeout,
            write_timeout,
            connection: tokio::sync::Mutex::new(None),
            connected: AtomicBool::new(false),
            times: Mutex::new(Times::default()),
            bytes_sent: AtomicU64::new(0),
        }
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    /// Position in the configured server list. Lower is preferred.
    pub fn rank(&self) -> usize {
        self.rank
    }

    pub fn bytes_sent(&self) -> u64 {
        self.bytes_sent.load(Ordering::Relaxed)
    }

    pub fn last_uptime(&self) -> Option<Instant> {
        self.times.lock().last_uptime
    }

    pub fn last_downtime(&self) -> Option<Instant> {
        self.times.lock().last_downtime
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    /// Opens the connection unless one is already held.
    pub async fn connect(&self) -> Result<(), BackendError> {
        let mut connection = self.connection.lock().await;
        if connection.is_some() {
            return Ok(());
        }

        let stream = tokio::time::timeout(self.connect_timeout, TcpStream::connect(&self.address))
            .await
            .map_err(|_| BackendError::ConnectTimeout {
                address: self.address.clone(),
                timeout: self.connect_timeout,
            })?
            .map_err(|source| BackendError::Connect {
                address: self.address.clone(),
                source,
            })?;
        if let Err(e) = stream.set_nodelay(true) {
            tracing::debug!(backend = %self.address, error = %e, "failed to set TCP_NODELAY");
        }

        *connection = Some(stream);
        self.connected.store(true, Ordering::Release);
        self.times.lock().last_uptime = Some(Instant::now());
        tracing::info!(backend = %self.address, rank = self.rank, "connected to backend");

        Ok(())
    }

    /// Drops the connection if one is held. Returns whether anything was closed.
    pub async fn disconnect(&self) -> bool {
        let mut connection = self.connection.lock().await;
        let closed = self.release(&mut connection);
        if closed {
            tracing::info!(backend = %self.address, rank = self.rank, "disconnected from backend");
        }
        closed
    }

    /// Drops the connection if the peer has closed it. Returns whether a live
    /// connection is held afterwards.
    pub async fn check_alive(&self) -> bool {
        let mut connection = self.connection.lock().await;
        let Some(stream) = connection.as_ref() else {
            return false;
        };

        match peer_state(stream) {
            Ok(()) => true,
            Err(e) => {
                self.release(&mut connection);
                tracing::warn!(backend = %self.address, error = %e, "backend connection lost");
                false
            }
        }
    }

    /// Writes one message. Any failure, including a timeout, drops the
    /// connection since part of the message may already be on the wire.
    pub async fn write(&self, message: &[u8]) -> Result<usize, BackendError> {
        let mut connection = self.connection.lock().await;
        let stream = connection.as_mut().ok_or(BackendError::NotConnected)?;

        let result = match peer_state(stream) {
            Ok(()) => tokio::time::timeout(self.write_timeout, stream.write_all(message))
                .await
                .map_err(|_| BackendError::WriteTimeout {
                    address: self.address.clone(),
                    timeout: self.write_timeout,
                })
                .and_then(|written| written.map_err(BackendError::Write)),
            Err(e) => Err(e),
        };

        if let Err(e) = result {
            self.release(&mut connection);
            return Err(e);
        }

        self.bytes_sent.fetch_add(message.len() as u64, Ordering::Relaxed);
        Ok(message.len())
    }

    /// Empties the connection slot. Must be called with the slot locked.
    fn release(&self, connection: &mut Option<TcpStream>) -> bool {
        if connection.take().is_none() {
            return false;
        }
        self.connected.store(false, Ordering::Release);
        self.times.lock().last_downtime = Some(Instant::now());
        true
    }
}

/// Collectors never write to us, so a readable EOF means the peer is gone.
fn peer_state(stream: &TcpStream) -> Result<(), BackendError> {
    let mut scratch = [0u8; 64];
    loop {
        match stream.try_read(&mut scratch) {
            Ok(0) => return Err(BackendError::Closed),
            Ok(_) => continue,
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(()),
            Err(e) => return Err(BackendError::Write(e)),
        }
    }
}
