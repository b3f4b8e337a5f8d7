//! Transport and connector traits.
//!
//! The [`Transport`] trait abstracts over the byte-level link to an
//! instrument. Implementations exist for serial ports, raw TCP sockets and
//! Telnet sessions (in `labio-transport`), and a scriptable mock lives in
//! `labio-test-harness`.
//!
//! A [`Connector`] knows how to open one kind of transport. The I/O engine
//! holds a connector rather than a live transport so that it can open the
//! link on `connect` and drop it on `disconnect`.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use crate::error::Result;

/// Asynchronous byte-level transport to an instrument.
///
/// Methods take `&self`: the I/O engine runs its input and output loops
/// concurrently against the same transport, so implementations keep their
/// read side and write side independently locked. A `receive` waiting for
/// its timeout must never hold up a `send`.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Send raw bytes to the instrument.
    ///
    /// Returns once all bytes have been handed to the OS and flushed.
    async fn send(&self, data: &[u8]) -> Result<()>;

    /// Receive bytes from the instrument into the provided buffer.
    ///
    /// Returns the number of bytes read. Waits up to `timeout` for data;
    /// returns [`Error::Timeout`](crate::error::Error::Timeout) if nothing
    /// arrives and [`Error::ConnectionLost`](crate::error::Error::ConnectionLost)
    /// if the peer went away.
    async fn receive(&self, buf: &mut [u8], timeout: Duration) -> Result<usize>;

    /// Close the transport connection.
    ///
    /// Closing twice is a no-op. After `close()`, `send()` and `receive()`
    /// return [`Error::NotConnected`](crate::error::Error::NotConnected).
    async fn close(&self) -> Result<()>;

    /// Check whether the transport is currently connected.
    fn is_connected(&self) -> bool;
}

/// Opens a [`Transport`] to a fixed endpoint.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Establish the connection.
    async fn open(&self) -> Result<Arc<dyn Transport>>;

    /// Human-readable endpoint description for logs (`/dev/ttyACM0`,
    /// `192.168.254.173:23`).
    fn endpoint(&self) -> String;
}
