//! Data logger session over a SCPI socket.
//!
//! Only temperature monitoring of a single thermocouple channel is
//! supported. Settings commands are not acknowledged by the instrument;
//! they are queued and written in order before the next query.

use std::sync::Arc;
use std::time::Duration;

use labio_core::error::{Error, Result};
use labio_core::transport::Connector;
use labio_engine::{Framing, IoConfig, IoEngine};

use crate::protocol::{channel_list, encode_command, parse_reading, quote_text};

/// Default TCP port of the SCPI socket.
pub const DEFAULT_SCPI_PORT: u16 = 5025;

const MONITOR_DATA: &str = "route:mon:data?";
const OPERATION_COMPLETE: &str = "*OPC?";

/// SCPI data logger.
pub struct DataLogger {
    engine: IoEngine,
}

impl DataLogger {
    /// Create a disconnected logger over `connector`.
    ///
    /// `timeout` bounds the wait for each query reply.
    pub fn new(connector: Arc<dyn Connector>, timeout: Duration) -> Self {
        let config = IoConfig {
            timeout,
            input: Some(Framing::lines()),
            ..IoConfig::default()
        };
        Self {
            engine: IoEngine::new(connector, config),
        }
    }

    pub async fn connect(&mut self) -> Result<()> {
        self.engine.connect().await
    }

    /// Restore the default front panel, then close the socket.
    ///
    /// A failure to restore the panel is logged; the socket is closed
    /// regardless.
    pub async fn disconnect(&mut self) -> Result<()> {
        if self.engine.is_connected() {
            if let Err(e) = self.reset_display().await {
                tracing::debug!(error = %e, "could not reset display before disconnect");
            }
        }
        self.engine.disconnect().await
    }

    pub fn is_connected(&self) -> bool {
        self.engine.is_connected()
    }

    /// Reset the instrument and monitor the temperature of `channel`
    /// (e.g. 101) with a type K thermocouple.
    pub async fn configure(&self, channel: u16) -> Result<()> {
        let channels = channel_list(channel);
        self.send("*RST").await?;
        self.send(&format!("configure:temperature tc,k,{channels}")).await?;
        self.send(&format!("route:mon:chan {channels}")).await?;
        self.send("route:mon:stat on").await?;
        tracing::info!(channel, "data logger monitoring thermocouple");
        Ok(())
    }

    /// Current value of the monitored channel.
    ///
    /// # Errors
    ///
    /// [`Error::UnexpectedResponse`] if the reply is not a number,
    /// [`Error::Timeout`] if none arrives.
    pub async fn get_data(&self) -> Result<f64> {
        let reply = self.query(MONITOR_DATA).await?;
        parse_reading(MONITOR_DATA, &reply)
    }

    /// Show `text` on the front panel.
    pub async fn display(&self, text: &str) -> Result<()> {
        self.send(&format!("display:text {}", quote_text(text))).await
    }

    /// Clear custom front-panel text and wait until the instrument has
    /// processed every queued command.
    pub async fn reset_display(&self) -> Result<()> {
        self.send("display:text:clear").await?;
        self.wait_complete().await
    }

    /// Block until the instrument has worked through all pending commands.
    pub async fn wait_complete(&self) -> Result<()> {
        let reply = self.query(OPERATION_COMPLETE).await?;
        if reply != "1" {
            return Err(Error::UnexpectedResponse {
                command: OPERATION_COMPLETE.into(),
                raw: reply,
            });
        }
        Ok(())
    }

    /// Send a query and return its reply line without line endings.
    pub async fn query(&self, command: &str) -> Result<String> {
        let reply = self.engine.request(encode_command(command), None).await?;
        let line = String::from_utf8_lossy(&reply).trim().to_string();
        tracing::debug!(command, reply = %line, "scpi query");
        Ok(line)
    }

    /// Send a command that has no reply.
    pub async fn send(&self, command: &str) -> Result<()> {
        tracing::debug!(command, "scpi command");
        self.engine.send(encode_command(command)).await
    }

    /// The underlying engine.
    pub fn engine(&self) -> &IoEngine {
        &self.engine
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use labio_test_harness::{MockConnector, MockTcpServer, MockTransport};
    use labio_transport::TcpEndpoint;

    async fn connected(mock: &MockTransport) -> DataLogger {
        let connector = MockConnector::new(mock.clone());
        let mut logger = DataLogger::new(Arc::new(connector), Duration::from_millis(300));
        logger.connect().await.unwrap();
        logger
    }

    #[tokio::test]
    async fn configure_then_read_temperature() {
        let mock = MockTransport::new();
        let mut logger = connected(&mock).await;

        mock.expect(b"*RST\n", b"");
        mock.expect(b"configure:temperature tc,k,(@101)\n", b"");
        mock.expect(b"route:mon:chan (@101)\n", b"");
        mock.expect(b"route:mon:stat on\n", b"");
        mock.expect(b"route:mon:data?\n", b"+2.34500000E+01\n");

        logger.configure(101).await.unwrap();
        assert_eq!(logger.get_data().await.unwrap(), 23.45);
        assert_eq!(mock.remaining_expectations(), 0);

        mock.expect(b"display:text:clear\n", b"");
        mock.expect(b"*OPC?\n", b"1\n");
        logger.disconnect().await.unwrap();
    }

    #[tokio::test]
    async fn display_quotes_text() {
        let mock = MockTransport::new();
        let logger = connected(&mock).await;

        mock.expect(b"display:text 'EXAMPLE'\n", b"");
        mock.expect(b"*OPC?\n", b"1\n");
        logger.display("EXAMPLE").await.unwrap();
        logger.wait_complete().await.unwrap();
        assert_eq!(mock.remaining_expectations(), 0);
    }

    #[tokio::test]
    async fn disconnect_resets_display_first() {
        let mock = MockTransport::new();
        let mut logger = connected(&mock).await;

        mock.expect(b"display:text:clear\n", b"");
        mock.expect(b"*OPC?\n", b"1\n");
        logger.disconnect().await.unwrap();

        assert!(!logger.is_connected());
        assert_eq!(
            mock.sent_data(),
            vec![b"display:text:clear\n".to_vec(), b"*OPC?\n".to_vec()]
        );
    }

    #[tokio::test]
    async fn silent_logger_still_disconnects() {
        let mock = MockTransport::new();
        let mut logger = connected(&mock).await;

        logger.disconnect().await.unwrap();
        assert!(!logger.is_connected());
        assert_eq!(mock.sent_data()[0], b"display:text:clear\n");
    }

    #[tokio::test]
    async fn non_numeric_reading_is_rejected() {
        let mock = MockTransport::new();
        let logger = connected(&mock).await;

        mock.expect(b"route:mon:data?\n", b"OVLD\n");
        assert!(matches!(
            logger.get_data().await,
            Err(Error::UnexpectedResponse { .. })
        ));
    }

    #[tokio::test]
    async fn commands_before_connect_fail() {
        let logger = DataLogger::new(
            Arc::new(MockConnector::default()),
            Duration::from_millis(100),
        );
        assert!(matches!(logger.configure(101).await, Err(Error::NotConnected)));
        assert!(matches!(logger.get_data().await, Err(Error::NotConnected)));
    }

    #[tokio::test]
    async fn over_tcp() {
        let mut server = MockTcpServer::new().await.unwrap();
        server
            .expect(b"route:mon:data?\n", b"+2.10000000E+01\n")
            .expect(b"display:text:clear\n", b"")
            .expect(b"*OPC?\n", b"1\n");
        server.start();

        let endpoint = TcpEndpoint::new("127.0.0.1", server.port());
        let mut logger = DataLogger::new(Arc::new(endpoint), Duration::from_secs(2));
        logger.connect().await.unwrap();
        assert_eq!(logger.get_data().await.unwrap(), 21.0);

        logger.disconnect().await.unwrap();
        server.wait().await.unwrap();
    }
}
