//! DataLoggerBuilder -- fluent builder for [`DataLogger`] instances.
//!
//! # Example
//!
//! ```no_run
//! use labio_scpi::DataLoggerBuilder;
//!
//! # async fn example() -> labio_core::Result<()> {
//! let mut logger = DataLoggerBuilder::new().host("192.168.254.174").build()?;
//! logger.connect().await?;
//! logger.configure(101).await?;
//! logger.display("EXAMPLE").await?;
//! let temperature = logger.get_data().await?;
//! logger.disconnect().await?;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;
use std::time::Duration;

use labio_core::error::{Error, Result};
use labio_core::transport::Connector;
use labio_transport::TcpEndpoint;

use crate::logger::{DEFAULT_SCPI_PORT, DataLogger};

/// Fluent builder for [`DataLogger`].
#[derive(Debug, Clone)]
pub struct DataLoggerBuilder {
    host: Option<String>,
    port: u16,
    timeout: Duration,
    connect_timeout: Duration,
}

impl DataLoggerBuilder {
    pub fn new() -> Self {
        DataLoggerBuilder {
            host: None,
            port: DEFAULT_SCPI_PORT,
            timeout: Duration::from_secs(2),
            connect_timeout: Duration::from_secs(2),
        }
    }

    /// Set the logger's IP address or host name.
    pub fn host(mut self, host: &str) -> Self {
        self.host = Some(host.to_string());
        self
    }

    /// Override the SCPI port (default: 5025).
    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Set the query reply timeout (default: 2s).
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the TCP connect timeout (default: 2s).
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Build a logger on the configured SCPI socket. Does not connect.
    pub fn build(&self) -> Result<DataLogger> {
        let host = self
            .host
            .as_deref()
            .filter(|h| !h.is_empty())
            .ok_or_else(|| Error::InvalidParameter("host is required for build()".into()))?;
        let endpoint = TcpEndpoint::new(host, self.port).connect_timeout(self.connect_timeout);
        Ok(self.build_with_connector(Arc::new(endpoint)))
    }

    /// Build a logger with a caller-provided connector.
    ///
    /// This is the entry point for testing (pass a `MockConnector` from
    /// `labio-test-harness`).
    pub fn build_with_connector(&self, connector: Arc<dyn Connector>) -> DataLogger {
        DataLogger::new(connector, self.timeout)
    }
}

impl Default for DataLoggerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use labio_test_harness::{MockConnector, MockTransport};

    #[test]
    fn builder_defaults() {
        let builder = DataLoggerBuilder::new();
        assert_eq!(builder.port, 5025);
        assert_eq!(builder.timeout, Duration::from_secs(2));
        assert!(builder.host.is_none());
    }

    #[test]
    fn host_is_required() {
        assert!(matches!(
            DataLoggerBuilder::new().build(),
            Err(Error::InvalidParameter(_))
        ));
        assert!(matches!(
            DataLoggerBuilder::new().host("").build(),
            Err(Error::InvalidParameter(_))
        ));
    }

    #[test]
    fn build_describes_tcp_endpoint() {
        let logger = DataLoggerBuilder::new()
            .host("192.168.254.174")
            .build()
            .unwrap();
        assert_eq!(logger.engine().endpoint(), "192.168.254.174:5025");
        assert!(!logger.is_connected());
    }

    #[tokio::test]
    async fn build_with_connector() {
        let mock = MockTransport::new();
        let mut logger = DataLoggerBuilder::new()
            .timeout(Duration::from_millis(300))
            .build_with_connector(Arc::new(MockConnector::new(mock.clone())));
        logger.connect().await.unwrap();

        mock.expect(b"route:mon:data?\n", b"+1.90000000E+01\n");
        assert_eq!(logger.get_data().await.unwrap(), 19.0);
    }
}
