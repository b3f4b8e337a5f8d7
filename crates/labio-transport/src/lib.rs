//! Transport implementations for labio.
//!
//! This crate provides concrete implementations of the
//! [`Transport`](labio_core::Transport) trait from `labio-core`, plus a
//! [`Connector`](labio_core::Connector) for each that the I/O engine uses to
//! open the link on demand:
//!
//! - [`SerialTransport`] / [`SerialEndpoint`]: USB virtual COM ports and
//!   RS-232 connections (motion stages)
//! - [`TcpTransport`] / [`TcpEndpoint`]: raw sockets (binary data streams,
//!   SCPI ports)
//! - [`TelnetTransport`] / [`TelnetEndpoint`]: Telnet command ports with
//!   option negotiation refused and stripped
//!
//! # Example
//!
//! ```no_run
//! use labio_transport::TelnetTransport;
//! use labio_core::transport::Transport;
//! use std::time::Duration;
//!
//! # async fn example() -> labio_core::Result<()> {
//! let transport = TelnetTransport::connect("192.168.254.173:23").await?;
//! transport.send(b"$VER\r\n").await?;
//!
//! let mut buf = [0u8; 256];
//! let n = transport.receive(&mut buf, Duration::from_secs(2)).await?;
//! # Ok(())
//! # }
//! ```

pub mod serial;
pub mod tcp;
pub mod telnet;

pub use serial::{
    DEFAULT_BAUD_RATE, DataBits, FlowControl, Parity, SerialConfig, SerialEndpoint,
    SerialTransport, StopBits,
};
pub use tcp::{DEFAULT_CONNECT_TIMEOUT, TcpEndpoint, TcpTransport};
pub use telnet::{DEFAULT_TELNET_PORT, TelnetEndpoint, TelnetParser, TelnetTransport};
