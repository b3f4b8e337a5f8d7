//! Telnet transport.
//!
//! Command ports of network instruments are frequently plain Telnet
//! servers that open with a burst of option negotiation. [`TelnetTransport`]
//! behaves like a minimal network virtual terminal: it refuses every option
//! the server offers or requests, strips all `IAC` sequences out of the
//! received data and escapes `0xFF` in outgoing data. Everything else is a
//! raw TCP byte stream.

use async_trait::async_trait;
use labio_core::error::{Error, Result};
use labio_core::transport::{Connector, Transport};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::Mutex;

use crate::tcp::{DEFAULT_CONNECT_TIMEOUT, open_stream, read_some, write_all};

/// Default Telnet port.
pub const DEFAULT_TELNET_PORT: u16 = 23;

const IAC: u8 = 255;
const DONT: u8 = 254;
const DO: u8 = 253;
const WONT: u8 = 252;
const WILL: u8 = 251;
const SB: u8 = 250;
const SE: u8 = 240;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
enum ParseState {
    #[default]
    Data,
    Iac,
    Negotiate(u8),
    Subnegotiation,
    SubnegotiationIac,
}

/// Incremental Telnet stream parser.
///
/// Keeps its state across calls so that a command split over two TCP
/// segments is still recognised.
#[derive(Debug, Default)]
pub struct TelnetParser {
    state: ParseState,
}

impl TelnetParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed received bytes.
    ///
    /// Payload bytes are appended to `data`; negotiation replies that must
    /// be sent back to the peer are appended to `replies`.
    pub fn feed(&mut self, input: &[u8], data: &mut Vec<u8>, replies: &mut Vec<u8>) {
        for &byte in input {
            self.state = match (self.state, byte) {
                (ParseState::Data, IAC) => ParseState::Iac,
                (ParseState::Data, b) => {
                    data.push(b);
                    ParseState::Data
                }
                (ParseState::Iac, IAC) => {
                    data.push(IAC);
                    ParseState::Data
                }
                (ParseState::Iac, cmd @ (DO | DONT | WILL | WONT)) => ParseState::Negotiate(cmd),
                (ParseState::Iac, SB) => ParseState::Subnegotiation,
                // NOP, GA, AYT and friends carry no option byte.
                (ParseState::Iac, _) => ParseState::Data,
                (ParseState::Negotiate(cmd), option) => {
                    match cmd {
                        DO => replies.extend_from_slice(&[IAC, WONT, option]),
                        WILL => replies.extend_from_slice(&[IAC, DONT, option]),
                        // DONT/WONT confirm a state we are already in.
                        _ => {}
                    }
                    tracing::trace!(command = cmd, option, "Refused telnet option");
                    ParseState::Data
                }
                (ParseState::Subnegotiation, IAC) => ParseState::SubnegotiationIac,
                (ParseState::Subnegotiation, _) => ParseState::Subnegotiation,
                (ParseState::SubnegotiationIac, SE) => ParseState::Data,
                (ParseState::SubnegotiationIac, _) => ParseState::Subnegotiation,
            };
        }
    }
}

/// Double every `0xFF` so it is not taken for `IAC`.
pub fn escape_iac(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len());
    for &b in data {
        out.push(b);
        if b == IAC {
            out.push(IAC);
        }
    }
    out
}

struct TelnetReader {
    half: OwnedReadHalf,
    parser: TelnetParser,
}

/// Telnet transport for instrument command ports.
pub struct TelnetTransport {
    reader: Mutex<Option<TelnetReader>>,
    writer: Mutex<Option<OwnedWriteHalf>>,
    connected: AtomicBool,
    addr: String,
}

impl TelnetTransport {
    /// Connect to a Telnet endpoint using the default timeout.
    pub async fn connect(addr: &str) -> Result<Self> {
        Self::connect_with_timeout(addr, DEFAULT_CONNECT_TIMEOUT).await
    }

    /// Connect to a Telnet endpoint with a specified timeout.
    pub async fn connect_with_timeout(addr: &str, timeout: Duration) -> Result<Self> {
        let stream = open_stream(addr, timeout).await?;
        tracing::info!(addr = %addr, "Telnet session established");
        Ok(Self::from_stream(stream, addr.to_string()))
    }

    /// Wrap an already connected stream.
    pub fn from_stream(stream: TcpStream, addr: String) -> Self {
        let (half, writer) = stream.into_split();
        Self {
            reader: Mutex::new(Some(TelnetReader {
                half,
                parser: TelnetParser::new(),
            })),
            writer: Mutex::new(Some(writer)),
            connected: AtomicBool::new(true),
            addr,
        }
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    async fn reply(&self, replies: &[u8]) -> Result<()> {
        let mut guard = self.writer.lock().await;
        let writer = guard.as_mut().ok_or(Error::NotConnected)?;
        write_all(writer, replies, &self.addr).await
    }
}

#[async_trait]
impl Transport for TelnetTransport {
    async fn send(&self, data: &[u8]) -> Result<()> {
        let escaped = escape_iac(data);
        let mut guard = self.writer.lock().await;
        let writer = guard.as_mut().ok_or(Error::NotConnected)?;
        write_all(writer, &escaped, &self.addr).await
    }

    async fn receive(&self, buf: &mut [u8], timeout: Duration) -> Result<usize> {
        let mut guard = self.reader.lock().await;
        let reader = guard.as_mut().ok_or(Error::NotConnected)?;

        let deadline = tokio::time::Instant::now() + timeout;
        let mut raw = vec![0u8; buf.len()];
        let mut data = Vec::with_capacity(buf.len());
        let mut replies = Vec::new();

        // Negotiation-only segments produce no payload; keep reading until
        // payload arrives or the deadline passes.
        loop {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                return Err(Error::Timeout);
            }

            let n = read_some(&mut reader.half, &mut raw, remaining, &self.addr).await?;
            reader.parser.feed(&raw[..n], &mut data, &mut replies);

            if !replies.is_empty() {
                self.reply(&replies).await?;
                replies.clear();
            }
            if !data.is_empty() {
                // The parser never yields more payload than raw input.
                let len = data.len().min(buf.len());
                buf[..len].copy_from_slice(&data[..len]);
                return Ok(len);
            }
        }
    }

    async fn close(&self) -> Result<()> {
        self.connected.store(false, Ordering::SeqCst);
        let writer = self.writer.lock().await.take();
        if let Some(mut writer) = writer {
            tracing::debug!(addr = %self.addr, "Closing telnet session");
            if let Err(e) = writer.shutdown().await {
                tracing::warn!(
                    addr = %self.addr,
                    error = %e,
                    "Failed to shutdown telnet stream (continuing anyway)"
                );
            }
            tracing::info!(addr = %self.addr, "Telnet session closed");
        }
        self.reader.lock().await.take();
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

/// Opens [`TelnetTransport`]s to a fixed `host:port`.
#[derive(Debug, Clone)]
pub struct TelnetEndpoint {
    pub addr: String,
    pub connect_timeout: Duration,
}

impl TelnetEndpoint {
    pub fn new(host: &str, port: u16) -> Self {
        Self {
            addr: format!("{host}:{port}"),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }
}

#[async_trait]
impl Connector for TelnetEndpoint {
    async fn open(&self) -> Result<Arc<dyn Transport>> {
        let transport =
            TelnetTransport::connect_with_timeout(&self.addr, self.connect_timeout).await?;
        Ok(Arc::new(transport))
    }

    fn endpoint(&self) -> String {
        format!("telnet://{}", self.addr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    fn parse(parser: &mut TelnetParser, input: &[u8]) -> (Vec<u8>, Vec<u8>) {
        let mut data = Vec::new();
        let mut replies = Vec::new();
        parser.feed(input, &mut data, &mut replies);
        (data, replies)
    }

    #[test]
    fn plain_data_passes_through() {
        let mut parser = TelnetParser::new();
        let (data, replies) = parse(&mut parser, b"$VER1.0OK\r\n");
        assert_eq!(data, b"$VER1.0OK\r\n");
        assert!(replies.is_empty());
    }

    #[test]
    fn do_and_will_are_refused() {
        let mut parser = TelnetParser::new();
        // DO ECHO, WILL SUPPRESS-GO-AHEAD, then payload.
        let (data, replies) = parse(&mut parser, &[IAC, DO, 1, IAC, WILL, 3, b'h', b'i']);
        assert_eq!(data, b"hi");
        assert_eq!(replies, vec![IAC, WONT, 1, IAC, DONT, 3]);
    }

    #[test]
    fn dont_and_wont_need_no_reply() {
        let mut parser = TelnetParser::new();
        let (data, replies) = parse(&mut parser, &[IAC, DONT, 1, IAC, WONT, 3]);
        assert!(data.is_empty());
        assert!(replies.is_empty());
    }

    #[test]
    fn escaped_iac_is_data() {
        let mut parser = TelnetParser::new();
        let (data, _) = parse(&mut parser, &[b'a', IAC, IAC, b'b']);
        assert_eq!(data, vec![b'a', IAC, b'b']);
    }

    #[test]
    fn subnegotiation_is_skipped() {
        let mut parser = TelnetParser::new();
        let (data, replies) = parse(&mut parser, &[IAC, SB, 24, 1, 2, IAC, SE, b'x']);
        assert_eq!(data, b"x");
        assert!(replies.is_empty());
    }

    #[test]
    fn command_split_across_segments() {
        let mut parser = TelnetParser::new();
        let (data, replies) = parse(&mut parser, &[b'a', IAC]);
        assert_eq!(data, b"a");
        assert!(replies.is_empty());

        let (data, replies) = parse(&mut parser, &[DO]);
        assert!(data.is_empty());
        assert!(replies.is_empty());

        let (data, replies) = parse(&mut parser, &[31, b'b']);
        assert_eq!(data, b"b");
        assert_eq!(replies, vec![IAC, WONT, 31]);
    }

    #[test]
    fn escape_doubles_iac() {
        assert_eq!(escape_iac(&[1, IAC, 2]), vec![1, IAC, IAC, 2]);
        assert_eq!(escape_iac(b"$VER\r\n"), b"$VER\r\n");
    }

    #[tokio::test]
    async fn negotiation_is_answered_and_stripped() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        let server = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            stream.write_all(&[IAC, DO, 1]).await.unwrap();
            stream.flush().await.unwrap();

            let mut reply = [0u8; 3];
            stream.read_exact(&mut reply).await.unwrap();
            assert_eq!(reply, [IAC, WONT, 1]);

            stream.write_all(b"$VER1.0OK\r\n").await.unwrap();
            stream.flush().await.unwrap();
        });

        let transport = TelnetTransport::connect(&addr).await.unwrap();
        let mut buf = [0u8; 64];
        let n = transport
            .receive(&mut buf, Duration::from_secs(2))
            .await
            .unwrap();
        assert_eq!(&buf[..n], b"$VER1.0OK\r\n");

        transport.close().await.unwrap();
        server.await.unwrap();
    }

    #[tokio::test]
    async fn negotiation_only_times_out() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        let server = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            stream.write_all(&[IAC, WONT, 1]).await.unwrap();
            tokio::time::sleep(Duration::from_secs(2)).await;
        });

        let transport = TelnetTransport::connect(&addr).await.unwrap();
        let mut buf = [0u8; 64];
        let result = transport
            .receive(&mut buf, Duration::from_millis(150))
            .await;
        assert!(matches!(result, Err(Error::Timeout)));

        server.abort();
    }
}
