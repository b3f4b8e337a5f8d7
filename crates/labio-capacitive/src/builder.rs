//! CapacitiveBuilder -- fluent builder for the command and data channels of
//! a capacitive displacement controller.
//!
//! # Example
//!
//! ```no_run
//! use labio_capacitive::CapacitiveBuilder;
//! use std::time::Duration;
//!
//! # async fn example() -> labio_core::Result<()> {
//! let builder = CapacitiveBuilder::new()
//!     .host("192.168.254.173")
//!     .timeout(Duration::from_secs(1));
//!
//! let mut control = builder.build_control()?;
//! control.connect().await?;
//! let version = control.command("VER").await?;
//!
//! let mut data = builder.build_data()?;
//! data.connect().await?;
//! let samples = data.read_samples(100, &[0, 1]).await?;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;
use std::time::Duration;

use labio_core::error::{Error, Result};
use labio_core::transport::Connector;
use labio_transport::{TcpEndpoint, TelnetEndpoint};

use crate::control::{ControlChannel, DEFAULT_CONTROL_PORT};
use crate::data::{DataChannel, DEFAULT_DATA_PORT};

/// Fluent builder for [`ControlChannel`] and [`DataChannel`].
#[derive(Debug, Clone)]
pub struct CapacitiveBuilder {
    host: Option<String>,
    control_port: u16,
    data_port: u16,
    timeout: Duration,
    connect_timeout: Duration,
}

impl CapacitiveBuilder {
    pub fn new() -> Self {
        CapacitiveBuilder {
            host: None,
            control_port: DEFAULT_CONTROL_PORT,
            data_port: DEFAULT_DATA_PORT,
            timeout: Duration::from_secs(3),
            connect_timeout: Duration::from_secs(3),
        }
    }

    /// Set the controller's IP address or host name.
    pub fn host(mut self, host: &str) -> Self {
        self.host = Some(host.to_string());
        self
    }

    /// Override the command port (default: 23).
    pub fn control_port(mut self, port: u16) -> Self {
        self.control_port = port;
        self
    }

    /// Override the data port (default: 10001). Controllers report a
    /// non-default port in reply to `GDP`.
    pub fn data_port(mut self, port: u16) -> Self {
        self.data_port = port;
        self
    }

    /// Set the reply timeout of the command channel and the idle timeout
    /// of the data channel (default: 3s).
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the TCP connect timeout (default: 3s).
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    fn require_host(&self, what: &str) -> Result<&str> {
        self.host
            .as_deref()
            .filter(|h| !h.is_empty())
            .ok_or_else(|| Error::InvalidParameter(format!("host is required for {what}")))
    }

    /// Build a command channel over Telnet. Does not connect.
    pub fn build_control(&self) -> Result<ControlChannel> {
        let host = self.require_host("build_control()")?;
        let endpoint =
            TelnetEndpoint::new(host, self.control_port).connect_timeout(self.connect_timeout);
        Ok(self.build_control_with_connector(Arc::new(endpoint)))
    }

    /// Build a data channel over raw TCP. Does not connect.
    pub fn build_data(&self) -> Result<DataChannel> {
        let host = self.require_host("build_data()")?;
        let endpoint = TcpEndpoint::new(host, self.data_port).connect_timeout(self.connect_timeout);
        Ok(self.build_data_with_connector(Arc::new(endpoint)))
    }

    /// Build a command channel with a caller-provided connector.
    ///
    /// This is the entry point for testing (pass a `MockConnector` from
    /// `labio-test-harness`).
    pub fn build_control_with_connector(&self, connector: Arc<dyn Connector>) -> ControlChannel {
        ControlChannel::new(connector, self.timeout)
    }

    /// Build a data channel with a caller-provided connector.
    pub fn build_data_with_connector(&self, connector: Arc<dyn Connector>) -> DataChannel {
        DataChannel::new(connector, self.timeout)
    }
}

impl Default for CapacitiveBuilder {
    fn default() -> Self {
        Self::new()
    }
}
