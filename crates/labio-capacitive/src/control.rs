//! Command channel of a capacitive displacement controller.
//!
//! The controller's command port is a Telnet server. Each command is
//! answered by exactly one line, so [`ControlChannel`] is a line-framed
//! engine with a strict request/response discipline on top of
//! [`decode_response`].

use std::sync::Arc;
use std::time::Duration;

use labio_core::error::{Error, Result};
use labio_core::transport::Connector;
use labio_engine::{Framing, IoConfig, IoEngine};

use crate::protocol::{decode_response, encode_command};

/// Default Telnet port of the command socket.
pub const DEFAULT_CONTROL_PORT: u16 = 23;

/// How long `connect` listens for a greeting before the first command.
const BANNER_WAIT: Duration = Duration::from_millis(100);

/// Request/response access to the controller's command socket.
pub struct ControlChannel {
    engine: IoEngine,
}

impl ControlChannel {
    /// Create a disconnected channel over `connector`.
    ///
    /// `timeout` bounds the wait for each reply.
    pub fn new(connector: Arc<dyn Connector>, timeout: Duration) -> Self {
        let config = IoConfig {
            timeout,
            // Some firmware omits the final line ending.
            input: Some(Framing::Lines {
                terminator: b'\n',
                flush_on_idle: true,
            }),
            ..IoConfig::default()
        };
        Self {
            engine: IoEngine::new(connector, config),
        }
    }

    /// Open the command socket and discard whatever the controller sends
    /// unprompted right after the connection is made.
    pub async fn connect(&mut self) -> Result<()> {
        self.engine.connect().await?;

        loop {
            match self.engine.next_inbound(Some(BANNER_WAIT)).await {
                Ok(line) => {
                    tracing::debug!(line = ?line, "discarding greeting");
                }
                Err(Error::Timeout) => return Ok(()),
                Err(e) => {
                    if let Err(close) = self.engine.disconnect().await {
                        tracing::debug!(error = %close, "close after failed greeting read");
                    }
                    return Err(e);
                }
            }
        }
    }

    pub async fn disconnect(&mut self) -> Result<()> {
        self.engine.disconnect().await
    }

    pub fn is_connected(&self) -> bool {
        self.engine.is_connected()
    }

    /// Send `command` (without the leading `$`) and return the reply payload.
    ///
    /// # Errors
    ///
    /// [`Error::UnknownCommand`], [`Error::WrongParameter`] or
    /// [`Error::UnexpectedResponse`] as reported by the decoder;
    /// [`Error::Timeout`] if no reply arrives.
    pub async fn command(&self, command: &str) -> Result<String> {
        let reply = self.engine.request(encode_command(command), None).await?;
        let line = String::from_utf8_lossy(&reply);
        tracing::debug!(command, reply = %line.trim_end(), "control command");
        decode_response(command, &line)
    }

    /// Send `command` without waiting for the reply.
    pub async fn send(&self, command: &str) -> Result<()> {
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
    use labio_transport::TelnetEndpoint;

    async fn connected(mock: &MockTransport) -> ControlChannel {
        let connector = MockConnector::new(mock.clone());
        let mut channel = ControlChannel::new(Arc::new(connector), Duration::from_millis(500));
        channel.connect().await.unwrap();
        channel
    }

    #[tokio::test]
    async fn version_query() {
        let mock = MockTransport::new();
        let channel = connected(&mock).await;
        mock.expect(b"$VER\r\n", b"$VER1.0OK\r\n");

        assert_eq!(channel.command("VER").await.unwrap(), "1.0");
    }

    #[tokio::test]
    async fn reply_without_line_ending() {
        let mock = MockTransport::new();
        let channel = connected(&mock).await;
        mock.expect(b"$STI256\r\n", b"$STI256256OK");

        assert_eq!(channel.command("STI256").await.unwrap(), "256");
    }

    #[tokio::test]
    async fn unknown_command_is_reported() {
        let mock = MockTransport::new();
        let channel = connected(&mock).await;
        mock.expect(b"$FOO\r\n", b"$UNKNOWN COMMAND\r\n");

        assert!(matches!(
            channel.command("FOO").await,
            Err(Error::UnknownCommand(cmd)) if cmd == "FOO"
        ));

        // The channel is still usable.
        mock.expect(b"$VER\r\n", b"$VER1.0OK\r\n");
        assert_eq!(channel.command("VER").await.unwrap(), "1.0");
    }

    #[tokio::test]
    async fn greeting_is_discarded() {
        let mock = MockTransport::new();
        mock.push_inbound(b"DT6220 ready\r\n");
        let channel = connected(&mock).await;
        mock.expect(b"$VER\r\n", b"$VER1.0OK\r\n");

        assert_eq!(channel.command("VER").await.unwrap(), "1.0");
    }

    #[tokio::test]
    async fn broken_link_during_greeting_fails_connect() {
        let mock = MockTransport::new();
        mock.fail_next_receive();
        let connector = MockConnector::new(mock.clone());
        let mut channel = ControlChannel::new(Arc::new(connector), Duration::from_millis(300));

        assert!(matches!(channel.connect().await, Err(Error::ConnectionLost)));
        assert!(!channel.is_connected());
    }

    #[tokio::test]
    async fn silent_controller_times_out() {
        let mock = MockTransport::new();
        let channel = connected(&mock).await;

        assert!(matches!(
            channel.command("VER").await,
            Err(Error::Timeout)
        ));
    }

    #[tokio::test]
    async fn send_does_not_wait() {
        let mock = MockTransport::new();
        let channel = connected(&mock).await;
        channel.send("GMD").await.unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(mock.sent_data(), vec![b"$GMD\r\n".to_vec()]);
    }

    #[tokio::test]
    async fn over_telnet_with_negotiation() {
        const IAC: u8 = 255;
        const WILL: u8 = 251;
        const DONT: u8 = 254;

        let mut server = MockTcpServer::new().await.unwrap();
        server
            .send(&[IAC, WILL, 1])
            .expect(&[IAC, DONT, 1], b"")
            .expect(b"$VER\r\n", b"$VER1.0OK\r\n");
        server.start();

        let endpoint = TelnetEndpoint::new("127.0.0.1", server.port());
        let mut channel = ControlChannel::new(Arc::new(endpoint), Duration::from_secs(2));
        channel.connect().await.unwrap();

        assert_eq!(channel.command("VER").await.unwrap(), "1.0");
        channel.disconnect().await.unwrap();
        server.wait().await.unwrap();
    }
}
