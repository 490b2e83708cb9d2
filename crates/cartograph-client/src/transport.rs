//! Request/response transport over the service's local socket
//!
//! One [`Transport`] owns one persistent channel. Calls are strictly
//! sequential: the channel lock is held from the write of a request until
//! its response line has been read. The channel only returns to the
//! transport after a complete response, so a call abandoned mid-flight
//! takes its channel down with it and the next call reconnects.

use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use cartograph_protocol::{codes, Method, Request, Response};
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::UnixStream;
use tokio::sync::Mutex;
use tracing::{debug, trace, warn};

use crate::config::Endpoint;
use crate::error::{Error, Result};

const READ_CHUNK: usize = 64 * 1024;

/// The wire boundary as seen by the facade
///
/// Implemented once per channel technology; [`Transport`] is the Unix socket
/// implementation. Test doubles implement it directly.
#[async_trait]
pub trait Exchange: Send + Sync {
    /// Send one request and return the service's result or error payload
    ///
    /// `Err` is reserved for failures of the channel itself (connection,
    /// timeout, malformed frames).
    async fn exchange(&self, method: Method, params: Value) -> Result<Response>;
}

/// Opens the byte stream a [`Transport`] talks over
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    type Stream: AsyncRead + AsyncWrite + Unpin + Send + 'static;

    async fn connect(&self) -> io::Result<Self::Stream>;

    /// Human-readable endpoint, used in error messages
    fn describe(&self) -> String;
}

/// Connects to a Unix domain socket
#[derive(Debug, Clone)]
pub struct UnixConnector {
    path: PathBuf,
}

impl UnixConnector {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl Connector for UnixConnector {
    type Stream = UnixStream;

    async fn connect(&self) -> io::Result<UnixStream> {
        UnixStream::connect(&self.path).await
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}

/// An open channel plus bytes read past the last delimiter
struct Channel<S> {
    stream: S,
    buffer: Vec<u8>,
}

impl<S: AsyncRead + Unpin> Channel<S> {
    fn new(stream: S) -> Self {
        Self {
            stream,
            buffer: Vec::new(),
        }
    }

    /// Read up to the next `\n`; bytes after it stay buffered
    async fn read_frame(&mut self) -> Result<Vec<u8>> {
        let mut chunk = vec![0u8; READ_CHUNK];
        loop {
            if let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
                let mut frame: Vec<u8> = self.buffer.drain(..=pos).collect();
                frame.pop();
                return Ok(frame);
            }

            let n = self.stream.read(&mut chunk).await.map_err(|e| {
                Error::connection(codes::CONNECTION, format!("Failed to read response: {e}"))
            })?;
            if n == 0 {
                return Err(Error::connection(
                    codes::CONNECTION_CLOSED,
                    "Connection closed by the cartography service. \
                     The process may have crashed; check that it is still running.",
                ));
            }
            self.buffer.extend_from_slice(&chunk[..n]);
        }
    }
}

enum WriteFailure {
    Broken(io::Error),
    Io(io::Error),
    TimedOut,
}

fn is_broken_channel(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::BrokenPipe | io::ErrorKind::ConnectionReset
    )
}

/// Map a failed connect to the error that names its remedy
fn connect_error(endpoint: &str, err: io::Error) -> Error {
    match err.kind() {
        io::ErrorKind::NotFound => Error::connection(
            codes::SOCKET_NOT_FOUND,
            format!(
                "Cannot connect to the cartography service at {endpoint}: no socket there. \
                 The service may not be running; start it and retry."
            ),
        ),
        io::ErrorKind::PermissionDenied => Error::connection(
            codes::PERMISSION_DENIED,
            format!(
                "Permission denied on {endpoint}. \
                 Check the socket's file permissions or restart the service as this user."
            ),
        ),
        io::ErrorKind::ConnectionRefused => Error::connection(
            codes::CONNECTION_REFUSED,
            format!(
                "The cartography service refused the connection at {endpoint}. \
                 The process may have crashed; restart it."
            ),
        ),
        _ => Error::connection(
            codes::CONNECTION,
            format!("Cannot connect to the cartography service at {endpoint}: {err}"),
        ),
    }
}

/// Persistent, lazily-connected channel to the cartography service
pub struct Transport<C: Connector = UnixConnector> {
    connector: C,
    timeout: Duration,
    channel: Mutex<Option<Channel<C::Stream>>>,
    reconnects: AtomicU64,
}

impl Transport<UnixConnector> {
    pub fn new(endpoint: &Endpoint) -> Self {
        Self::with_connector(UnixConnector::new(endpoint.socket_path()), endpoint.timeout())
    }
}

impl<C: Connector> Transport<C> {
    pub fn with_connector(connector: C, timeout: Duration) -> Self {
        Self {
            connector,
            timeout,
            channel: Mutex::new(None),
            reconnects: AtomicU64::new(0),
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// How many times a broken channel was re-opened mid-call
    pub fn reconnects(&self) -> u64 {
        self.reconnects.load(Ordering::Relaxed)
    }

    pub async fn is_connected(&self) -> bool {
        self.channel.lock().await.is_some()
    }

    /// Open the channel now instead of on the first `send`
    pub async fn connect(&self) -> Result<()> {
        let mut slot = self.channel.lock().await;
        if slot.is_none() {
            *slot = Some(self.open().await?);
        }
        Ok(())
    }

    /// Release the channel and drop any partially buffered response
    ///
    /// Calling this on a closed transport does nothing.
    pub async fn close(&self) {
        if self.channel.lock().await.take().is_some() {
            debug!(endpoint = %self.connector.describe(), "Closed channel");
        }
    }

    /// Send one request and wait for its response
    ///
    /// Connects first if needed. A broken channel detected on write is
    /// re-opened once and the write retried; any other failure tears the
    /// connection down so the next call starts fresh.
    pub async fn send(&self, method: Method, params: Value) -> Result<Response> {
        let request = Request::new(method, params);
        let line = request.to_json_line().map_err(|e| {
            Error::invalid_input(format!("Cannot serialize {method} request: {e}"))
        })?;

        trace!(method = %method, id = %request.id, "Sending request");
        let start = Instant::now();

        let mut slot = self.channel.lock().await;
        // Out of the slot while in flight: if this future is dropped, the
        // channel and any reply still queued on it go with it.
        let result = match self.round_trip(slot.take(), method, line.as_bytes()).await {
            Ok((response, channel)) => {
                *slot = Some(channel);
                Ok(response)
            }
            Err(e) => Err(e),
        };

        debug!(
            method = %method,
            id = %request.id,
            ok = result.is_ok(),
            total_ms = start.elapsed().as_micros() as f64 / 1000.0,
            "Request finished"
        );
        result
    }

    async fn round_trip(
        &self,
        channel: Option<Channel<C::Stream>>,
        method: Method,
        line: &[u8],
    ) -> Result<(Response, Channel<C::Stream>)> {
        let mut channel = match channel {
            Some(channel) => channel,
            None => self.open().await?,
        };

        match self.write(&mut channel, line).await {
            Ok(()) => {}
            Err(WriteFailure::Broken(e)) => {
                warn!(method = %method, error = %e, "Channel broken on write, reconnecting once");
                drop(channel);
                channel = self.open().await?;
                self.reconnects.fetch_add(1, Ordering::Relaxed);

                if let Err(failure) = self.write(&mut channel, line).await {
                    return Err(self.write_error(method, failure));
                }
            }
            Err(failure) => return Err(self.write_error(method, failure)),
        }

        let frame = match tokio::time::timeout(self.timeout, channel.read_frame()).await {
            Ok(frame) => frame?,
            Err(_) => {
                return Err(Error::timeout(
                    codes::RECV_TIMEOUT,
                    format!(
                        "Timed out after {:.1}s waiting for the {method} response. \
                         The operation may need a longer timeout.",
                        self.timeout.as_secs_f64()
                    ),
                ))
            }
        };

        Ok((Response::from_line(&frame)?, channel))
    }

    async fn open(&self) -> Result<Channel<C::Stream>> {
        let endpoint = self.connector.describe();
        let start = Instant::now();
        let stream = match tokio::time::timeout(self.timeout, self.connector.connect()).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => return Err(connect_error(&endpoint, e)),
            Err(_) => {
                return Err(Error::timeout(
                    codes::CONNECT_TIMEOUT,
                    format!(
                        "Timed out after {:.1}s connecting to {endpoint}.",
                        self.timeout.as_secs_f64()
                    ),
                ))
            }
        };
        debug!(
            endpoint = %endpoint,
            connect_ms = start.elapsed().as_micros() as f64 / 1000.0,
            "Connected to cartography service"
        );
        Ok(Channel::new(stream))
    }

    async fn write(
        &self,
        channel: &mut Channel<C::Stream>,
        line: &[u8],
    ) -> std::result::Result<(), WriteFailure> {
        let stream = &mut channel.stream;
        let write = async {
            stream.write_all(line).await?;
            stream.flush().await
        };
        match tokio::time::timeout(self.timeout, write).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) if is_broken_channel(&e) => Err(WriteFailure::Broken(e)),
            Ok(Err(e)) => Err(WriteFailure::Io(e)),
            Err(_) => Err(WriteFailure::TimedOut),
        }
    }

    fn write_error(&self, method: Method, failure: WriteFailure) -> Error {
        match failure {
            WriteFailure::Broken(e) => Error::connection(
                codes::CONNECTION,
                format!("Channel broke again after reconnecting while sending {method}: {e}"),
            ),
            WriteFailure::Io(e) => Error::connection(
                codes::CONNECTION,
                format!("Failed to send {method} request: {e}"),
            ),
            WriteFailure::TimedOut => Error::timeout(
                codes::SEND_TIMEOUT,
                format!(
                    "Timed out after {:.1}s sending the {method} request. \
                     The service may be overloaded.",
                    self.timeout.as_secs_f64()
                ),
            ),
        }
    }
}

#[async_trait]
impl<C: Connector> Exchange for Transport<C> {
    async fn exchange(&self, method: Method, params: Value) -> Result<Response> {
        self.send(method, params).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use std::collections::VecDeque;
    use std::sync::atomic::AtomicUsize;
    use tokio::io::{AsyncBufReadExt, BufReader, DuplexStream};

    /// Hands out pre-made in-memory streams, one per connect
    struct DuplexConnector {
        streams: std::sync::Mutex<VecDeque<DuplexStream>>,
        connects: AtomicUsize,
    }

    impl DuplexConnector {
        fn new(streams: Vec<DuplexStream>) -> Self {
            Self {
                streams: std::sync::Mutex::new(streams.into()),
                connects: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl Connector for DuplexConnector {
        type Stream = DuplexStream;

        async fn connect(&self) -> io::Result<DuplexStream> {
            self.connects.fetch_add(1, Ordering::SeqCst);
            self.streams
                .lock()
                .unwrap()
                .pop_front()
                .ok_or_else(|| io::Error::from(io::ErrorKind::ConnectionRefused))
        }

        fn describe(&self) -> String {
            "duplex".to_string()
        }
    }

    /// Read one request from `server` and answer with `reply`
    async fn answer(server: DuplexStream, reply: Response) -> Request {
        let (read, mut write) = tokio::io::split(server);
        let mut lines = BufReader::new(read).lines();
        let line = lines.next_line().await.unwrap().unwrap();
        let request: Request = serde_json::from_str(&line).unwrap();
        let out = reply.to_json_line(&request.id).unwrap();
        write.write_all(out.as_bytes()).await.unwrap();
        request
    }

    fn transport(streams: Vec<DuplexStream>) -> Transport<DuplexConnector> {
        Transport::with_connector(DuplexConnector::new(streams), Duration::from_millis(200))
    }

    #[tokio::test]
    async fn test_send_round_trip() {
        let (client, server) = tokio::io::duplex(4096);
        let transport = transport(vec![client]);

        let server = tokio::spawn(answer(
            server,
            Response::result(serde_json::json!({"ok": true})),
        ));
        let resp = transport
            .send(Method::Status, serde_json::json!({}))
            .await
            .unwrap();
        assert_eq!(resp, Response::result(serde_json::json!({"ok": true})));

        let request = server.await.unwrap();
        assert_eq!(request.method, Method::Status);
        assert!(transport.is_connected().await);
    }

    #[tokio::test]
    async fn test_broken_pipe_reconnects_once() {
        let (first, dead) = tokio::io::duplex(4096);
        drop(dead);
        let (second, server) = tokio::io::duplex(4096);
        let transport = transport(vec![first, second]);

        let server = tokio::spawn(answer(server, Response::result(serde_json::json!({"ok": 1}))));
        let resp = transport
            .send(Method::Query, serde_json::json!({"domain": "example.com"}))
            .await
            .unwrap();
        assert!(!resp.is_error());
        server.await.unwrap();

        assert_eq!(transport.reconnects(), 1);
        assert_eq!(transport.connector.connects.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_second_broken_pipe_propagates() {
        let (first, dead_a) = tokio::io::duplex(4096);
        let (second, dead_b) = tokio::io::duplex(4096);
        drop(dead_a);
        drop(dead_b);
        let transport = transport(vec![first, second]);

        let err = transport
            .send(Method::Map, serde_json::json!({}))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Connection);
        assert_eq!(err.code(), "E_CONNECTION");
        assert_eq!(transport.reconnects(), 1);
        assert!(!transport.is_connected().await);
    }

    #[tokio::test]
    async fn test_remainder_stays_buffered() {
        let (client, server) = tokio::io::duplex(4096);
        let transport = transport(vec![client]);

        let server = tokio::spawn(async move {
            let (read, mut write) = tokio::io::split(server);
            let mut lines = BufReader::new(read).lines();
            lines.next_line().await.unwrap().unwrap();
            // Both answers in one write; the second must wait in the buffer.
            write
                .write_all(b"{\"result\":{\"n\":1}}\n{\"result\":{\"n\":2}}\n")
                .await
                .unwrap();
            lines.next_line().await.unwrap().unwrap();
            (lines, write)
        });

        let first = transport.send(Method::Status, serde_json::json!({})).await.unwrap();
        let second = transport.send(Method::Status, serde_json::json!({})).await.unwrap();
        assert_eq!(first, Response::result(serde_json::json!({"n": 1})));
        assert_eq!(second, Response::result(serde_json::json!({"n": 2})));
        let _keep_open = server.await.unwrap();
    }

    #[tokio::test]
    async fn test_split_frames_are_reassembled() {
        let (client, server) = tokio::io::duplex(4096);
        let transport = transport(vec![client]);

        let server = tokio::spawn(async move {
            let (read, mut write) = tokio::io::split(server);
            let mut lines = BufReader::new(read).lines();
            lines.next_line().await.unwrap().unwrap();
            write.write_all(b"{\"result\":").await.unwrap();
            write.flush().await.unwrap();
            tokio::time::sleep(Duration::from_millis(20)).await;
            write.write_all(b"{\"hops\":2}}\n").await.unwrap();
            (lines, write)
        });

        let resp = transport.send(Method::Pathfind, serde_json::json!({})).await.unwrap();
        assert_eq!(resp, Response::result(serde_json::json!({"hops": 2})));
        let _keep_open = server.await.unwrap();
    }

    #[tokio::test]
    async fn test_closed_without_data() {
        let (client, server) = tokio::io::duplex(4096);
        let transport = transport(vec![client]);

        let server = tokio::spawn(async move {
            let mut lines = BufReader::new(server).lines();
            lines.next_line().await.unwrap().unwrap();
            // Dropping the stream closes the channel with no reply.
        });

        let err = transport
            .send(Method::Status, serde_json::json!({}))
            .await
            .unwrap_err();
        server.await.unwrap();
        assert_eq!(err.code(), "E_CONNECTION_CLOSED");
        assert_eq!(err.kind(), ErrorKind::Connection);
        assert!(!transport.is_connected().await);
    }

    #[tokio::test]
    async fn test_receive_timeout_tears_down_connection() {
        let (client, _silent_server) = tokio::io::duplex(4096);
        let transport = transport(vec![client]);

        let err = transport
            .send(Method::Map, serde_json::json!({}))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Timeout);
        assert_eq!(err.code(), "E_RECV_TIMEOUT");
        assert!(!transport.is_connected().await);
    }

    #[tokio::test]
    async fn test_abandoned_call_does_not_leak_its_reply() {
        let (first, first_server) = tokio::io::duplex(4096);
        let (second, second_server) = tokio::io::duplex(4096);
        let transport = transport(vec![first, second]);

        let slow = tokio::spawn(async move {
            let (read, mut write) = tokio::io::split(first_server);
            let mut lines = BufReader::new(read).lines();
            lines.next_line().await.unwrap().unwrap();
            tokio::time::sleep(Duration::from_millis(60)).await;
            // The caller is gone by now; the reply may not even be writable.
            let _ = write.write_all(b"{\"result\":{\"call\":1}}\n").await;
        });
        let fast = tokio::spawn(answer(
            second_server,
            Response::result(serde_json::json!({"call": 2})),
        ));

        let abandoned = tokio::time::timeout(
            Duration::from_millis(20),
            transport.send(Method::Query, serde_json::json!({"call": 1})),
        )
        .await;
        assert!(abandoned.is_err());
        assert!(!transport.is_connected().await);

        let resp = transport
            .send(Method::Query, serde_json::json!({"call": 2}))
            .await
            .unwrap();
        assert_eq!(resp, Response::result(serde_json::json!({"call": 2})));
        assert_eq!(fast.await.unwrap().params["call"], 2);
        assert_eq!(transport.connector.connects.load(Ordering::SeqCst), 2);
        slow.await.unwrap();
    }

    #[tokio::test]
    async fn test_send_timeout_when_peer_never_reads() {
        // A tiny pipe that nobody drains fills up and blocks the write.
        let (client, _stalled_server) = tokio::io::duplex(8);
        let transport = transport(vec![client]);

        let err = transport
            .send(Method::Map, serde_json::json!({"domain": "example.com"}))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "E_SEND_TIMEOUT");
        assert_eq!(transport.reconnects(), 0);
    }

    #[tokio::test]
    async fn test_malformed_response_is_protocol_error() {
        let (client, server) = tokio::io::duplex(4096);
        let transport = transport(vec![client]);

        let server = tokio::spawn(async move {
            let (read, mut write) = tokio::io::split(server);
            let mut lines = BufReader::new(read).lines();
            lines.next_line().await.unwrap().unwrap();
            write.write_all(b"{\"id\":\"x\"}\n").await.unwrap();
            (lines, write)
        });

        let err = transport
            .send(Method::Status, serde_json::json!({}))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Protocol);
        let _keep_open = server.await.unwrap();
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let (client, _server) = tokio::io::duplex(4096);
        let transport = transport(vec![client]);

        transport.connect().await.unwrap();
        assert!(transport.is_connected().await);
        transport.close().await;
        transport.close().await;
        assert!(!transport.is_connected().await);
    }

    #[tokio::test]
    async fn test_missing_socket() {
        let tmp = tempfile::TempDir::new().unwrap();
        let endpoint = Endpoint::new(tmp.path().join("absent.sock"), Duration::from_secs(1));
        let transport = Transport::new(&endpoint);

        let err = transport
            .send(Method::Status, serde_json::json!({}))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "E_SOCKET_NOT_FOUND");
        assert!(err.message().contains("absent.sock"));
    }

    #[tokio::test]
    async fn test_refused_socket() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("stale.sock");
        // Bound once, then abandoned: the file stays but nobody listens.
        drop(std::os::unix::net::UnixListener::bind(&path).unwrap());

        let transport = Transport::new(&Endpoint::new(&path, Duration::from_secs(1)));
        let err = transport.connect().await.unwrap_err();
        assert_eq!(err.code(), "E_CONNECTION_REFUSED");
    }

    #[test]
    fn test_connect_error_mapping() {
        let cases = [
            (io::ErrorKind::NotFound, "E_SOCKET_NOT_FOUND"),
            (io::ErrorKind::PermissionDenied, "E_PERMISSION_DENIED"),
            (io::ErrorKind::ConnectionRefused, "E_CONNECTION_REFUSED"),
            (io::ErrorKind::AddrInUse, "E_CONNECTION"),
        ];
        for (kind, code) in cases {
            let err = connect_error("/tmp/x.sock", io::Error::from(kind));
            assert_eq!(err.code(), code, "{kind:?}");
            assert_eq!(err.kind(), ErrorKind::Connection);
        }
    }
}
