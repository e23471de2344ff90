//! UDP and TCP ingestion.
//!
//! Each UDP datagram carries one line. TCP connections carry
//! newline-delimited lines and get one task each. Lines are validated inline
//! and accepted ones are queued with a `\n` terminator for the backend stream.

use crate::config::Config;
use crate::errors::RelayError;
use crate::metrics_defs::{INCOMING_BYTES, INCOMING_LINES, INCOMING_REJECTED};
use crate::protocol::{self, trim_newline};
use crate::queue::QueueSender;
use bytes::BytesMut;
use shared::counter;
use std::io;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::net::{TcpListener, TcpStream, UdpSocket};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

pub struct Listener {
    udp: UdpSocket,
    tcp: TcpListener,
    ingest: Ingest,
    max_line_length: usize,
    read_timeout: Option<Duration>,
}

impl Listener {
    pub async fn bind(config: &Config, queue: QueueSender) -> Result<Self, RelayError> {
        let address = config.listen_addr();

        let udp = UdpSocket::bind(&address)
            .await
            .map_err(|source| RelayError::Bind {
                transport: "udp",
                address: address.clone(),
                source,
            })?;
        let tcp = TcpListener::bind(&address)
            .await
            .map_err(|source| RelayError::Bind {
                transport: "tcp",
                address: address.clone(),
                source,
            })?;

        tracing::info!(address = %address, "listening for metrics on udp and tcp");

        Ok(Self {
            udp,
            tcp,
            ingest: Ingest {
                queue,
                transport: "udp",
            },
            max_line_length: config.max_line_length,
            read_timeout: config.tcp_read_timeout(),
        })
    }

    pub fn udp_local_addr(&self) -> io::Result<SocketAddr> {
        self.udp.local_addr()
    }

    pub fn tcp_local_addr(&self) -> io::Result<SocketAddr> {
        self.tcp.local_addr()
    }

    /// Serves both transports until cancelled. A failing UDP socket does not
    /// stop TCP ingestion and vice versa.
    pub async fn run(self, cancel: CancellationToken) {
        let tcp = TcpServer {
            ingest: Ingest {
                transport: "tcp",
                ..self.ingest.clone()
            },
            max_line_length: self.max_line_length,
            read_timeout: self.read_timeout,
        };

        tokio::join!(
            run_udp(self.udp, self.ingest, self.max_line_length, cancel.clone()),
            tcp.run(self.tcp, cancel),
        );
    }
}

#[derive(Clone)]
struct Ingest {
    queue: QueueSender,
    transport: &'static str,
}

impl Ingest {
    /// Validates and queues one line. Returns false when the listener should
    /// stop, either on cancellation or because the queue is gone.
    async fn line(&self, line: &[u8], cancel: &CancellationToken) -> bool {
        if line.is_empty() {
            return true;
        }

        let valid = match protocol::validate(line) {
            Ok(valid) => valid,
            Err(rejection) => {
                tracing::warn!(
                    transport = self.transport,
                    error = %rejection,
                    "dropping invalid line"
                );
                counter!(INCOMING_REJECTED, "transport" => self.transport).increment(1);
                return true;
            }
        };

        let mut message = BytesMut::with_capacity(valid.as_bytes().len() + 1);
        message.extend_from_slice(valid.as_bytes());
        message.extend_from_slice(b"\n");

        let sent = tokio::select! {
            biased;
            _ = cancel.cancelled() => return false,
            sent = self.queue.send(message.freeze()) => sent,
        };
        if sent.is_err() {
            tracing::debug!(transport = self.transport, "queue closed, stopping");
            return false;
        }

        counter!(INCOMING_BYTES, "transport" => self.transport).increment(line.len() as u64);
        counter!(INCOMING_LINES, "transport" => self.transport).increment(1);
        true
    }

    fn reject_oversized(&self, peer: SocketAddr, limit: usize) {
        tracing::warn!(
            transport = self.transport,
            peer = %peer,
            limit,
            "line exceeds maximum length"
        );
        counter!(INCOMING_REJECTED, "transport" => self.transport).increment(1);
    }
}

async fn run_udp(
    socket: UdpSocket,
    ingest: Ingest,
    max_line_length: usize,
    cancel: CancellationToken,
) {
    // Room for a CRLF terminator plus one byte to notice truncation.
    let mut buf = vec![0u8; max_line_length + 3];

    loop {
        let (len, peer) = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            received = socket.recv_from(&mut buf) => match received {
                Ok(received) => received,
                Err(e) => {
                    tracing::error!(error = %e, "udp receive failed, udp listener stopped");
                    return;
                }
            },
        };

        let line = trim_newline(&buf[..len]);
        if len == buf.len() || line.len() > max_line_length {
            ingest.reject_oversized(peer, max_line_length);
            continue;
        }

        if !ingest.line(line, &cancel).await {
            break;
        }
    }

    tracing::info!("udp listener stopped");
}

struct TcpServer {
    ingest: Ingest,
    max_line_length: usize,
    read_timeout: Option<Duration>,
}

impl TcpServer {
    async fn run(self, listener: TcpListener, cancel: CancellationToken) {
        let mut connections = JoinSet::new();

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                Some(_) = connections.join_next(), if !connections.is_empty() => {}
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        tracing::debug!(peer = %peer, "producer connected");
                        let connection = Connection {
                            ingest: self.ingest.clone(),
                            peer,
                            max_line_length: self.max_line_length,
                            read_timeout: self.read_timeout,
                        };
                        connections.spawn(connection.handle(stream, cancel.clone()));
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "tcp accept failed");
                        tokio::select! {
                            biased;
                            _ = cancel.cancelled() => break,
                            _ = tokio::time::sleep(ACCEPT_BACKOFF) => {}
                        }
                    }
                },
            }
        }

        drop(listener);
        while connections.join_next().await.is_some() {}
        tracing::info!("tcp listener stopped");
    }
}

struct Connection {
    ingest: Ingest,
    peer: SocketAddr,
    max_line_length: usize,
    read_timeout: Option<Duration>,
}

impl Connection {
    async fn handle(self, stream: TcpStream, cancel: CancellationToken) {
        let mut reader = BufReader::new(stream);
        let mut line = Vec::with_capacity(256);

        loop {
            let read = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                read = async {
                    match self.read_timeout {
                        Some(timeout) => tokio::time::timeout(
                            timeout,
                            read_line(&mut reader, &mut line, self.max_line_length),
                        )
                        .await,
                        None => Ok(read_line(&mut reader, &mut line, self.max_line_length).await),
                    }
                } => read,
            };

            match read {
                Ok(Ok(LineRead::Line)) => {
                    if !self.ingest.line(trim_newline(&line), &cancel).await {
                        break;
                    }
                }
                Ok(Ok(LineRead::TooLong)) => {
                    self.ingest.reject_oversized(self.peer, self.max_line_length);
                    break;
                }
                Ok(Ok(LineRead::Eof)) => break,
                Ok(Err(e)) => {
                    tracing::debug!(peer = %self.peer, error = %e, "{}", read_failure(&e));
                    break;
                }
                Err(_) => {
                    tracing::debug!(peer = %self.peer, "producer idle, closing connection");
                    break;
                }
            }
        }

        tracing::debug!(peer = %self.peer, "producer disconnected");
    }
}

#[derive(Debug, PartialEq, Eq)]
enum LineRead {
    Line,
    TooLong,
    Eof,
}

/// Reads up to and including the next `\n`, or to EOF. Gives up as soon as
/// the line content grows past `max_len`, leaving the rest unread.
async fn read_line<R: AsyncBufRead + Unpin>(
    reader: &mut R,
    buf: &mut Vec<u8>,
    max_len: usize,
) -> io::Result<LineRead> {
    buf.clear();

    loop {
        let available = reader.fill_buf().await?;
        if available.is_empty() {
            if buf.is_empty() {
                return Ok(LineRead::Eof);
            }
            break;
        }

        let (take, done) = match available.iter().position(|&b| b == b'\n') {
            Some(pos) => (pos + 1, true),
            None => (available.len(), false),
        };
        if buf.len() + take > max_len + 2 {
            return Ok(LineRead::TooLong);
        }

        buf.extend_from_slice(&available[..take]);
        reader.consume(take);
        if done {
            break;
        }
    }

    if trim_newline(buf).len() > max_len {
        return Ok(LineRead::TooLong);
    }
    Ok(LineRead::Line)
}

fn read_failure(e: &io::Error) -> &'static str {
    match e.kind() {
        io::ErrorKind::ConnectionReset
        | io::ErrorKind::ConnectionAborted
        | io::ErrorKind::BrokenPipe => "producer reset connection",
        _ => "tcp read failed",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::{self, QueueReceiver};
    use bytes::Bytes;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    struct Harness {
        udp: SocketAddr,
        tcp: SocketAddr,
        rx: QueueReceiver,
        cancel: CancellationToken,
        task: tokio::task::JoinHandle<()>,
    }

    async fn start(config: Config) -> Harness {
        let (tx, rx) = queue::bounded(64);
        let listener = Listener::bind(&config, tx).await.unwrap();
        let udp = listener.udp_local_addr().unwrap();
        let tcp = listener.tcp_local_addr().unwrap();
        let cancel = CancellationToken::new();
        let task = tokio::spawn(listener.run(cancel.clone()));
        Harness {
            udp,
            tcp,
            rx,
            cancel,
            task,
        }
    }

    fn local_config() -> Config {
        Config {
            listen: "127.0.0.1:0".to_string(),
            max_line_length: 32,
            ..Default::default()
        }
    }

    async fn next(rx: &mut QueueReceiver) -> Bytes {
        tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("timed out waiting for a line")
            .expect("queue closed")
    }

    #[tokio::test]
    async fn udp_lines_are_validated_and_queued() {
        let mut harness = start(local_config()).await;
        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();

        let datagrams: [&[u8]; 5] = [b"a:1|c\n", b"garbage", b"", b"b:2|ms", &[b'x'; 64]];
        for datagram in datagrams {
            client.send_to(datagram, harness.udp).await.unwrap();
        }
        client.send_to(b"c:3|g\r\n", harness.udp).await.unwrap();

        assert_eq!(next(&mut harness.rx).await, "a:1|c\n");
        assert_eq!(next(&mut harness.rx).await, "b:2|ms\n");
        assert_eq!(next(&mut harness.rx).await, "c:3|g\n");

        harness.cancel.cancel();
        harness.task.await.unwrap();
    }

    #[tokio::test]
    async fn tcp_lines_are_validated_and_queued() {
        let mut harness = start(local_config()).await;
        let mut client = TcpStream::connect(harness.tcp).await.unwrap();

        client
            .write_all(b"x:1|c\ngarbage\n\ny:2|g|@0.5\r\nz:3|h")
            .await
            .unwrap();
        client.shutdown().await.unwrap();

        assert_eq!(next(&mut harness.rx).await, "x:1|c\n");
        assert_eq!(next(&mut harness.rx).await, "y:2|g|@0.5\n");
        assert_eq!(next(&mut harness.rx).await, "z:3|h\n");

        harness.cancel.cancel();
        harness.task.await.unwrap();
    }

    #[tokio::test]
    async fn oversized_tcp_line_disconnects_producer() {
        let mut harness = start(local_config()).await;
        let mut client = TcpStream::connect(harness.tcp).await.unwrap();

        client.write_all(b"ok:1|c\n").await.unwrap();
        assert_eq!(next(&mut harness.rx).await, "ok:1|c\n");

        let long = format!("{}:1|c\nafter:1|c\n", "a".repeat(64));
        client.write_all(long.as_bytes()).await.unwrap();

        let mut buf = [0u8; 8];
        let read = tokio::time::timeout(Duration::from_secs(5), client.read(&mut buf))
            .await
            .expect("connection was not closed");
        assert!(matches!(read, Ok(0) | Err(_)));
        assert!(harness.rx.try_recv().is_none());

        harness.cancel.cancel();
        harness.task.await.unwrap();
    }

    #[tokio::test]
    async fn idle_producer_is_disconnected() {
        let harness = start(Config {
            tcp_read_timeout: 100,
            ..local_config()
        })
        .await;
        let mut client = TcpStream::connect(harness.tcp).await.unwrap();

        let mut buf = [0u8; 8];
        let read = tokio::time::timeout(Duration::from_secs(5), client.read(&mut buf))
            .await
            .expect("idle connection was not closed");
        assert!(matches!(read, Ok(0) | Err(_)));

        harness.cancel.cancel();
        harness.task.await.unwrap();
    }

    #[tokio::test]
    async fn bind_failure_is_reported() {
        let taken = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let config = Config {
            listen: taken.local_addr().unwrap().to_string(),
            ..Default::default()
        };
        let (tx, _rx) = queue::bounded(1);

        // The UDP port may be free, so either transport can be the one that fails.
        match Listener::bind(&config, tx).await {
            Err(RelayError::Bind { address, .. }) => assert_eq!(address, config.listen),
            other => panic!("expected bind error, got {:?}", other.map(|_| ())),
        }
    }

    #[tokio::test]
    async fn read_line_limits() {
        let mut reader = BufReader::new(&b"abc\nabcdef\r\nabcdefgh\nxy"[..]);
        let mut buf = Vec::new();

        assert_eq!(read_line(&mut reader, &mut buf, 6).await.unwrap(), LineRead::Line);
        assert_eq!(buf, b"abc\n");
        assert_eq!(read_line(&mut reader, &mut buf, 6).await.unwrap(), LineRead::Line);
        assert_eq!(buf, b"abcdef\r\n");
        assert_eq!(read_line(&mut reader, &mut buf, 6).await.unwrap(), LineRead::TooLong);
    }

    #[tokio::test]
    async fn read_line_returns_unterminated_tail() {
        let mut reader = BufReader::new(&b"xy"[..]);
        let mut buf = Vec::new();
        assert_eq!(read_line(&mut reader, &mut buf, 6).await.unwrap(), LineRead::Line);
        assert_eq!(buf, b"xy");
        assert_eq!(read_line(&mut reader, &mut buf, 6).await.unwrap(), LineRead::Eof);
    }

    #[test]
    fn read_failures_are_described() {
        for kind in [
            io::ErrorKind::ConnectionReset,
            io::ErrorKind::ConnectionAborted,
            io::ErrorKind::BrokenPipe,
        ] {
            assert_eq!(read_failure(&kind.into()), "producer reset connection");
        }
        assert_eq!(
            read_failure(&io::ErrorKind::InvalidData.into()),
            "tcp read failed"
        );
    }
}
