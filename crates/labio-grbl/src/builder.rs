//! GrblBuilder -- fluent builder for [`GrblSession`] instances.
//!
//! # Example
//!
//! ```no_run
//! use labio_grbl::GrblBuilder;
//! use std::time::Duration;
//!
//! # async fn example() -> labio_core::Result<()> {
//! let mut session = GrblBuilder::new()
//!     .serial_port("/dev/ttyACM0")
//!     .command_timeout(Duration::from_millis(500))
//!     .build()?;
//! session.connect().await?;
//! let status = session.query_status().await?;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;
use std::time::Duration;

use labio_core::error::{Error, Result};
use labio_core::transport::Connector;
use labio_transport::{DEFAULT_BAUD_RATE, SerialEndpoint};

use crate::session::{DEFAULT_STARTUP_TIMEOUT, GrblSession, SessionConfig};

/// Fluent builder for [`GrblSession`].
#[derive(Debug, Clone)]
pub struct GrblBuilder {
    serial_port: Option<String>,
    baud_rate: u32,
    config: SessionConfig,
}

impl GrblBuilder {
    pub fn new() -> Self {
        GrblBuilder {
            serial_port: None,
            baud_rate: DEFAULT_BAUD_RATE,
            config: SessionConfig::default(),
        }
    }

    /// Set the serial port path (e.g. "/dev/ttyACM0" or "COM3").
    pub fn serial_port(mut self, port: &str) -> Self {
        self.serial_port = Some(port.to_string());
        self
    }

    /// Override the baud rate (default: 115200).
    pub fn baud_rate(mut self, baud: u32) -> Self {
        self.baud_rate = baud;
        self
    }

    /// Set the wait for each reply line (default: 1s).
    pub fn command_timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout = timeout;
        self
    }

    /// Set the wait for the welcome banner on connect (default: 2s).
    pub fn startup_timeout(mut self, timeout: Duration) -> Self {
        self.config.startup_timeout = timeout;
        self
    }

    /// Set the wait for a homing cycle to finish (default: 60s).
    pub fn homing_timeout(mut self, timeout: Duration) -> Self {
        self.config.homing_timeout = timeout;
        self
    }

    /// Build a session on the configured serial port. Does not connect.
    pub fn build(&self) -> Result<GrblSession> {
        let port = self
            .serial_port
            .as_deref()
            .filter(|p| !p.is_empty())
            .ok_or_else(|| Error::InvalidParameter("serial port is required for build()".into()))?;
        let endpoint = SerialEndpoint::new(port, self.baud_rate);
        Ok(self.build_with_connector(Arc::new(endpoint)))
    }

    /// Build a session with a caller-provided connector.
    ///
    /// This is the entry point for testing (pass a `MockConnector` from
    /// `labio-test-harness`).
    pub fn build_with_connector(&self, connector: Arc<dyn Connector>) -> GrblSession {
        GrblSession::new(connector, self.config.clone())
    }
}

impl Default for GrblBuilder {
    fn default() -> Self {
        Self::new()
    }
}
