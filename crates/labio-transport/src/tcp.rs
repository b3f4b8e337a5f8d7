//! Raw TCP transport.
//!
//! This module provides [`TcpTransport`], which implements the [`Transport`]
//! trait for instruments that expose a plain socket:
//! - the streaming data port of a capacitive displacement controller
//!   (binary packets on port 10001)
//! - SCPI sockets of data loggers (ASCII lines on port 5025)
//!
//! # Example
//!
//! ```no_run
//! use labio_transport::TcpTransport;
//! use labio_core::transport::Transport;
//! use std::time::Duration;
//!
//! # async fn example() -> labio_core::Result<()> {
//! let transport = TcpTransport::connect("192.168.254.174:5025").await?;
//! transport.send(b"*IDN?\n").await?;
//!
//! let mut buf = [0u8; 4096];
//! let n = transport.receive(&mut buf, Duration::from_secs(2)).await?;
//! # Ok(())
//! # }
//! ```

use async_trait::async_trait;
use labio_core::error::{Error, Result};
use labio_core::transport::{Connector, Transport};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::Mutex;

/// Default connection timeout (5 seconds).
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Raw TCP transport.
///
/// The stream is split on connect; each half sits behind its own lock so a
/// pending `receive` never delays a `send`.
#[derive(Debug)]
pub struct TcpTransport {
    reader: Mutex<Option<OwnedReadHalf>>,
    writer: Mutex<Option<OwnedWriteHalf>>,
    connected: AtomicBool,
    /// The address string for logging/debugging.
    addr: String,
}

impl TcpTransport {
    /// Connect to a TCP endpoint using the default timeout.
    pub async fn connect(addr: &str) -> Result<Self> {
        Self::connect_with_timeout(addr, DEFAULT_CONNECT_TIMEOUT).await
    }

    /// Connect to a TCP endpoint with a specified timeout.
    ///
    /// # Arguments
    ///
    /// * `addr` - A `host:port` string (e.g., `"192.168.254.173:10001"`)
    /// * `timeout` - Maximum time to wait for the connection to be established
    pub async fn connect_with_timeout(addr: &str, timeout: Duration) -> Result<Self> {
        let stream = open_stream(addr, timeout).await?;
        tracing::info!(addr = %addr, "TCP connection established");
        Ok(Self::from_stream(stream, addr.to_string()))
    }

    /// Wrap an existing `TcpStream` as a `TcpTransport`.
    ///
    /// Useful when the connection has been established externally, e.g.
    /// accepted from a listener in tests.
    pub fn from_stream(stream: TcpStream, addr: String) -> Self {
        tracing::debug!(addr = %addr, "Wrapping TCP stream");
        let (reader, writer) = stream.into_split();
        Self {
            reader: Mutex::new(Some(reader)),
            writer: Mutex::new(Some(writer)),
            connected: AtomicBool::new(true),
            addr,
        }
    }

    /// Get the address string this transport was connected to.
    pub fn addr(&self) -> &str {
        &self.addr
    }
}

#[async_trait]
impl Transport for TcpTransport {
    async fn send(&self, data: &[u8]) -> Result<()> {
        let mut guard = self.writer.lock().await;
        let writer = guard.as_mut().ok_or(Error::NotConnected)?;
        write_all(writer, data, &self.addr).await
    }

    async fn receive(&self, buf: &mut [u8], timeout: Duration) -> Result<usize> {
        let mut guard = self.reader.lock().await;
        let reader = guard.as_mut().ok_or(Error::NotConnected)?;
        read_some(reader, buf, timeout, &self.addr).await
    }

    async fn close(&self) -> Result<()> {
        self.connected.store(false, Ordering::SeqCst);
        let writer = self.writer.lock().await.take();
        if let Some(mut writer) = writer {
            tracing::debug!(addr = %self.addr, "Closing TCP connection");
            if let Err(e) = writer.shutdown().await {
                tracing::warn!(
                    addr = %self.addr,
                    error = %e,
                    "Failed to shutdown TCP stream (continuing anyway)"
                );
            }
            tracing::info!(addr = %self.addr, "TCP connection closed");
        }
        self.reader.lock().await.take();
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

/// Opens [`TcpTransport`]s to a fixed `host:port`.
#[derive(Debug, Clone)]
pub struct TcpEndpoint {
    /// `host:port` to connect to.
    pub addr: String,
    /// Maximum time to wait for the TCP handshake.
    pub connect_timeout: Duration,
}

impl TcpEndpoint {
    /// Endpoint for `host:port` with the default connect timeout.
    pub fn new(host: &str, port: u16) -> Self {
        Self {
            addr: format!("{host}:{port}"),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }

    /// Override the connect timeout.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }
}

#[async_trait]
impl Connector for TcpEndpoint {
    async fn open(&self) -> Result<Arc<dyn Transport>> {
        let transport = TcpTransport::connect_with_timeout(&self.addr, self.connect_timeout).await?;
        Ok(Arc::new(transport))
    }

    fn endpoint(&self) -> String {
        self.addr.clone()
    }
}

/// Connect with a timeout and disable Nagle's algorithm.
///
/// Shared with the Telnet transport, which runs over the same kind of
/// socket.
pub(crate) async fn open_stream(addr: &str, timeout: Duration) -> Result<TcpStream> {
    tracing::debug!(
        addr = %addr,
        timeout_ms = timeout.as_millis() as u64,
        "Connecting to TCP endpoint"
    );

    let stream = tokio::time::timeout(timeout, TcpStream::connect(addr))
        .await
        .map_err(|_| {
            tracing::error!(addr = %addr, "TCP connection timed out");
            Error::Timeout
        })?
        .map_err(|e| {
            tracing::error!(addr = %addr, error = %e, "TCP connection failed");
            map_connect_error(e, addr)
        })?;

    // Commands are small and latency-sensitive.
    if let Err(e) = stream.set_nodelay(true) {
        tracing::warn!(
            addr = %addr,
            error = %e,
            "Failed to set TCP_NODELAY (continuing anyway)"
        );
    }

    Ok(stream)
}

pub(crate) async fn write_all(writer: &mut OwnedWriteHalf, data: &[u8], addr: &str) -> Result<()> {
    tracing::trace!(addr = %addr, bytes = data.len(), data = ?data, "Sending data");

    writer.write_all(data).await.map_err(|e| {
        tracing::error!(addr = %addr, error = %e, "Failed to send data");
        map_io_error(e)
    })?;
    writer.flush().await.map_err(|e| {
        tracing::error!(addr = %addr, error = %e, "Failed to flush TCP stream");
        map_io_error(e)
    })?;

    Ok(())
}

pub(crate) async fn read_some(
    reader: &mut OwnedReadHalf,
    buf: &mut [u8],
    timeout: Duration,
    addr: &str,
) -> Result<usize> {
    match tokio::time::timeout(timeout, reader.read(buf)).await {
        Ok(Ok(0)) => {
            // 0 bytes read means the peer has closed the connection.
            tracing::warn!(addr = %addr, "Peer closed connection (0 bytes read)");
            Err(Error::ConnectionLost)
        }
        Ok(Ok(n)) => {
            tracing::trace!(addr = %addr, bytes = n, "Received data");
            Ok(n)
        }
        Ok(Err(e)) => {
            tracing::error!(addr = %addr, error = %e, "Failed to receive data");
            Err(map_io_error(e))
        }
        Err(_) => Err(Error::Timeout),
    }
}

/// Map a connection-time I/O error to the appropriate [`Error`] variant.
fn map_connect_error(e: std::io::Error, addr: &str) -> Error {
    match e.kind() {
        std::io::ErrorKind::ConnectionRefused => {
            Error::Transport(format!("connection refused: {}", addr))
        }
        _ => Error::Io(e),
    }
}

/// Map a data-path I/O error to the appropriate [`Error`] variant.
fn map_io_error(e: std::io::Error) -> Error {
    match e.kind() {
        std::io::ErrorKind::ConnectionReset
        | std::io::ErrorKind::BrokenPipe
        | std::io::ErrorKind::NotConnected
        | std::io::ErrorKind::ConnectionAborted => Error::ConnectionLost,
        _ => Error::Io(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Bind a listener on a random port and return it with its address.
    async fn test_listener() -> (TcpListener, String) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        (listener, addr)
    }

    #[tokio::test]
    async fn connect_send_receive() {
        let (listener, addr) = test_listener().await;

        let server = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 256];
            let n = stream.read(&mut buf).await.unwrap();
            stream.write_all(&buf[..n]).await.unwrap();
            stream.flush().await.unwrap();
        });

        let transport = TcpTransport::connect(&addr).await.unwrap();
        assert!(transport.is_connected());

        transport.send(b"route:mon:data?\n").await.unwrap();

        let mut buf = [0u8; 256];
        let n = transport
            .receive(&mut buf, Duration::from_secs(2))
            .await
            .unwrap();
        assert_eq!(&buf[..n], b"route:mon:data?\n");

        transport.close().await.unwrap();
        server.await.unwrap();
    }

    #[tokio::test]
    async fn connect_refused() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        drop(listener);

        let result = TcpTransport::connect(&addr).await;
        match result {
            Err(Error::Transport(msg)) => assert!(msg.contains("connection refused")),
            other => panic!("expected Transport error, got: {:?}", other),
        }
    }

    #[tokio::test]
    async fn receive_timeout() {
        let (listener, addr) = test_listener().await;

        let server = tokio::spawn(async move {
            let (_stream, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(5)).await;
        });

        let transport = TcpTransport::connect(&addr).await.unwrap();
        let mut buf = [0u8; 256];
        let result = transport
            .receive(&mut buf, Duration::from_millis(100))
            .await;
        assert!(matches!(result, Err(Error::Timeout)));

        transport.close().await.unwrap();
        server.abort();
    }

    #[tokio::test]
    async fn send_while_receive_pending() {
        let (listener, addr) = test_listener().await;

        let server = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 16];
            let n = stream.read(&mut buf).await.unwrap();
            stream.write_all(&buf[..n]).await.unwrap();
        });

        let transport = Arc::new(TcpTransport::connect(&addr).await.unwrap());

        // A long receive is in flight on another task while we send.
        let rx = {
            let transport = Arc::clone(&transport);
            tokio::spawn(async move {
                let mut buf = [0u8; 16];
                let n = transport
                    .receive(&mut buf, Duration::from_secs(2))
                    .await
                    .unwrap();
                buf[..n].to_vec()
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        transport.send(b"ping").await.unwrap();

        assert_eq!(rx.await.unwrap(), b"ping");
        server.await.unwrap();
    }

    #[tokio::test]
    async fn disconnection_detection() {
        let (listener, addr) = test_listener().await;

        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            drop(stream);
        });

        let transport = TcpTransport::connect(&addr).await.unwrap();
        server.await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        let mut buf = [0u8; 256];
        let result = transport.receive(&mut buf, Duration::from_secs(2)).await;
        assert!(
            matches!(result, Err(Error::ConnectionLost)),
            "expected ConnectionLost, got: {:?}",
            result
        );
    }

    #[tokio::test]
    async fn operations_after_close_return_not_connected() {
        let (listener, addr) = test_listener().await;

        let server = tokio::spawn(async move {
            let (_stream, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(5)).await;
        });

        let transport = TcpTransport::connect(&addr).await.unwrap();
        transport.close().await.unwrap();
        assert!(!transport.is_connected());

        assert!(matches!(
            transport.send(b"should fail").await,
            Err(Error::NotConnected)
        ));
        let mut buf = [0u8; 8];
        assert!(matches!(
            transport.receive(&mut buf, Duration::from_millis(10)).await,
            Err(Error::NotConnected)
        ));

        // Closing again is a no-op.
        transport.close().await.unwrap();
        server.abort();
    }

    #[tokio::test]
    async fn endpoint_opens_transport() {
        let (listener, addr) = test_listener().await;
        let port = listener.local_addr().unwrap().port();

        let server = tokio::spawn(async move {
            let (_stream, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_millis(200)).await;
        });

        let endpoint = TcpEndpoint::new("127.0.0.1", port);
        assert_eq!(endpoint.endpoint(), addr);

        let transport = endpoint.open().await.unwrap();
        assert!(transport.is_connected());
        transport.close().await.unwrap();
        server.abort();
    }
}
