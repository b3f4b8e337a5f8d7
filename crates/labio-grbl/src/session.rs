//! GrblSession -- request cycles against a grbl motion controller.
//!
//! grbl answers every line it receives with `ok` or `error:<n>`, possibly
//! preceded by informational lines (`$$` prints one `$<id>=<value>` per
//! setting before its `ok`). A status query `?` is the exception: it is a
//! real-time command and is answered by a single `<...>` report with no
//! `ok`. An `ALARM:<n>` may interrupt any cycle.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use labio_core::error::{Error, Result};
use labio_core::transport::Connector;
use labio_engine::{Framing, IoConfig, IoEngine};
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::protocol::{Message, MessageKind, StatusReport, classify, encode_command};

/// How long `connect` waits for the welcome banner by default.
pub const DEFAULT_STARTUP_TIMEOUT: Duration = Duration::from_secs(2);

/// Default interval between status polls in
/// [`wait_until_idle`](GrblSession::wait_until_idle).
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Timing knobs of a [`GrblSession`].
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Wait for each reply line.
    pub timeout: Duration,
    /// Wait for the welcome banner after opening the port.
    pub startup_timeout: Duration,
    /// Wait for the `ok` after `$H`; homing runs before grbl answers.
    pub homing_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(1),
            startup_timeout: DEFAULT_STARTUP_TIMEOUT,
            homing_timeout: Duration::from_secs(60),
        }
    }
}

/// Parsed output of `$$`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Settings {
    values: BTreeMap<u16, String>,
}

impl Settings {
    /// Collect the `Setting` lines among `messages`.
    pub fn from_messages(messages: &[Message]) -> Self {
        let values = messages
            .iter()
            .filter(|m| m.kind == MessageKind::Setting)
            .filter_map(|m| Some((m.group(0).parse().ok()?, m.group(1).trim().to_string())))
            .collect();
        Settings { values }
    }

    /// Raw value of setting `$<id>`.
    pub fn get(&self, id: u16) -> Option<&str> {
        self.values.get(&id).map(String::as_str)
    }

    /// Numeric value of setting `$<id>`.
    pub fn get_f64(&self, id: u16) -> Result<f64> {
        let raw = self
            .get(id)
            .ok_or_else(|| Error::Protocol(format!("setting ${} not reported", id)))?;
        // grbl 0.9 appends a comment: `$100=250.000 (x, step/mm)`.
        let value = raw.split_whitespace().next().unwrap_or(raw);
        value
            .parse()
            .map_err(|_| Error::Protocol(format!("setting ${} is not numeric: {:?}", id, raw)))
    }

    fn axes(&self, first: u16) -> Result<[f64; 3]> {
        Ok([
            self.get_f64(first)?,
            self.get_f64(first + 1)?,
            self.get_f64(first + 2)?,
        ])
    }

    /// Steps per mm for X, Y, Z (`$100`-`$102`).
    pub fn resolution(&self) -> Result<[f64; 3]> {
        self.axes(100)
    }

    /// Maximum rate in mm/min for X, Y, Z (`$110`-`$112`).
    pub fn max_feed(&self) -> Result<[f64; 3]> {
        self.axes(110)
    }

    /// Maximum travel in mm for X, Y, Z (`$130`-`$132`).
    pub fn max_travel(&self) -> Result<[f64; 3]> {
        self.axes(130)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Coordinate interpretation of [`GrblSession::move_to`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoveMode {
    /// `G90`
    Absolute,
    /// `G91`
    Relative,
}

/// A session with a grbl controller over a line-framed engine.
pub struct GrblSession {
    engine: IoEngine,
    config: SessionConfig,
    version: Option<String>,
    settings: Mutex<Option<Settings>>,
}

impl GrblSession {
    /// Create a disconnected session over `connector`.
    pub fn new(connector: Arc<dyn Connector>, config: SessionConfig) -> Self {
        let io = IoConfig {
            timeout: config.timeout,
            input: Some(Framing::lines()),
            ..IoConfig::default()
        };
        Self {
            engine: IoEngine::new(connector, io),
            config,
            version: None,
            settings: Mutex::new(None),
        }
    }

    /// Open the port and wait for the welcome banner.
    ///
    /// grbl prints `Grbl <version> ['$' for help]` after a reset. A
    /// controller that was not reset by opening the port stays silent; that
    /// is logged and the session is usable anyway.
    pub async fn connect(&mut self) -> Result<()> {
        self.engine.connect().await?;

        let deadline = Instant::now() + self.config.startup_timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            let line = match self.engine.next_inbound(Some(remaining)).await {
                Ok(line) => line,
                Err(Error::Timeout) => {
                    tracing::warn!(
                        endpoint = %self.engine.endpoint(),
                        timeout_ms = self.config.startup_timeout.as_millis() as u64,
                        "no grbl welcome banner"
                    );
                    return Ok(());
                }
                Err(e) => {
                    if let Err(close) = self.engine.disconnect().await {
                        tracing::debug!(error = %close, "close after failed banner read");
                    }
                    return Err(e);
                }
            };

            match classify(&String::from_utf8_lossy(&line)) {
                Ok(msg) if msg.kind == MessageKind::Welcome => {
                    tracing::info!(version = msg.group(0), "grbl ready");
                    self.version = Some(msg.group(0).to_string());
                    return Ok(());
                }
                Ok(msg) => tracing::debug!(kind = ?msg.kind, "skipping startup line"),
                Err(e) => tracing::debug!(error = %e, "skipping startup line"),
            }
        }
    }

    pub async fn disconnect(&mut self) -> Result<()> {
        self.engine.disconnect().await
    }

    pub fn is_connected(&self) -> bool {
        self.engine.is_connected()
    }

    /// Firmware version from the welcome banner, if one was seen.
    pub fn firmware_version(&self) -> Option<&str> {
        self.version.as_deref()
    }

    /// The underlying engine.
    pub fn engine(&self) -> &IoEngine {
        &self.engine
    }

    fn ensure_connected(&self) -> Result<()> {
        if self.engine.is_connected() {
            Ok(())
        } else {
            Err(Error::NotConnected)
        }
    }

    /// Send `command` and collect the lines grbl prints before its `ok`.
    ///
    /// Empty lines are dropped; everything else that is not terminal is
    /// returned in arrival order.
    ///
    /// # Errors
    ///
    /// [`Error::Device`] for `error:<n>`, [`Error::Alarm`] for `ALARM:<n>`,
    /// [`Error::UnrecognizedResponse`] for a line of unknown shape.
    pub async fn execute(&self, command: &str) -> Result<Vec<Message>> {
        self.execute_with_timeout(command, self.config.timeout).await
    }

    /// [`execute`](Self::execute) with an explicit per-line timeout.
    pub async fn execute_with_timeout(
        &self,
        command: &str,
        timeout: Duration,
    ) -> Result<Vec<Message>> {
        self.ensure_connected()?;
        tracing::debug!(command, "grbl command");

        let mut line = self
            .engine
            .request(encode_command(command), Some(timeout))
            .await?;
        let mut collected = Vec::new();
        loop {
            let msg = classify(&String::from_utf8_lossy(&line))?;
            if let Some(err) = msg.to_error() {
                tracing::warn!(command, error = %err, "grbl command failed");
                return Err(err);
            }
            match msg.kind {
                MessageKind::Ok => return Ok(collected),
                MessageKind::Empty => {}
                _ => collected.push(msg),
            }
            line = self.engine.next_inbound(Some(timeout)).await?;
        }
    }

    /// Send `?` and return the next status report.
    pub async fn query_status(&self) -> Result<StatusReport> {
        self.ensure_connected()?;

        let mut line = self.engine.request(encode_command("?"), None).await?;
        loop {
            let msg = classify(&String::from_utf8_lossy(&line))?;
            if let Some(err) = msg.to_error() {
                return Err(err);
            }
            if msg.kind == MessageKind::Status {
                return StatusReport::from_message(&msg);
            }
            tracing::debug!(kind = ?msg.kind, "skipping line while waiting for status");
            line = self.engine.next_inbound(None).await?;
        }
    }

    /// Poll the status every `poll_interval` until the machine is idle.
    ///
    /// There is no overall deadline; drop the future to give up.
    pub async fn wait_until_idle(&self, poll_interval: Duration) -> Result<StatusReport> {
        loop {
            let status = self.query_status().await?;
            if status.is_idle() {
                return Ok(status);
            }
            tracing::trace!(state = %status.state, "waiting for idle");
            tokio::time::sleep(poll_interval).await;
        }
    }

    /// The controller's settings, read with `$$` on first use.
    pub async fn settings(&self) -> Result<Settings> {
        self.ensure_connected()?;
        let mut cache = self.settings.lock().await;
        if let Some(settings) = cache.as_ref() {
            return Ok(settings.clone());
        }

        let settings = Settings::from_messages(&self.execute("$$").await?);
        tracing::debug!(count = settings.len(), "grbl settings loaded");
        *cache = Some(settings.clone());
        Ok(settings)
    }

    /// Forget cached settings; the next [`settings`](Self::settings) call
    /// reads them again.
    pub async fn invalidate_settings(&self) {
        self.settings.lock().await.take();
    }

    /// Write setting `$<id>` and drop the cached copy.
    pub async fn set_setting(&self, id: u16, value: &str) -> Result<()> {
        self.execute(&format!("${}={}", id, value)).await?;
        self.invalidate_settings().await;
        Ok(())
    }

    /// Run the homing cycle (`$H`).
    pub async fn home(&self) -> Result<()> {
        self.execute_with_timeout("$H", self.config.homing_timeout)
            .await
            .map(|_| ())
    }

    /// Clear an alarm lock (`$X`).
    pub async fn unlock(&self) -> Result<()> {
        self.execute("$X").await.map(|_| ())
    }

    /// Rapid move to `(x, y)`.
    pub async fn move_to(&self, x: f64, y: f64, mode: MoveMode) -> Result<()> {
        let modal = match mode {
            MoveMode::Absolute => "G90",
            MoveMode::Relative => "G91",
        };
        self.execute(&format!("{} G0 X{:.3} Y{:.3}", modal, x, y))
            .await
            .map(|_| ())
    }

    /// Relative jog by `(dx, dy)` at `feed` mm/min (`$J=`).
    pub async fn jog(&self, dx: f64, dy: f64, feed: f64) -> Result<()> {
        if feed.is_nan() || feed <= 0.0 {
            return Err(Error::InvalidParameter(format!(
                "jog feed must be positive, got {}",
                feed
            )));
        }
        self.execute(&format!("$J=G91 X{:.3} Y{:.3} F{}", dx, dy, feed))
            .await
            .map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use labio_test_harness::{MockConnector, MockTransport};

    const WELCOME: &[u8] = b"\r\nGrbl 1.1h ['$' for help]\r\n";

    fn config() -> SessionConfig {
        SessionConfig {
            timeout: Duration::from_millis(300),
            startup_timeout: Duration::from_millis(300),
            homing_timeout: Duration::from_millis(300),
        }
    }

    async fn connected(mock: &MockTransport) -> GrblSession {
        mock.push_inbound(WELCOME);
        let mut session = GrblSession::new(Arc::new(MockConnector::new(mock.clone())), config());
        session.connect().await.unwrap();
        session
    }

    #[tokio::test]
    async fn broken_port_during_banner_fails_connect() {
        let mock = MockTransport::new();
        mock.fail_next_receive();
        let mut session = GrblSession::new(Arc::new(MockConnector::new(mock.clone())), config());

        assert!(matches!(session.connect().await, Err(Error::ConnectionLost)));
        assert!(!session.is_connected());
    }

    #[tokio::test]
    async fn connect_reads_welcome() {
        let mock = MockTransport::new();
        let session = connected(&mock).await;
        assert!(session.is_connected());
        assert_eq!(session.firmware_version(), Some("1.1h"));
    }

    #[tokio::test]
    async fn connect_without_welcome_still_succeeds() {
        let mock = MockTransport::new();
        let mut session = GrblSession::new(Arc::new(MockConnector::new(mock.clone())), config());
        session.connect().await.unwrap();
        assert!(session.is_connected());
        assert_eq!(session.firmware_version(), None);
    }

    #[tokio::test]
    async fn connect_failure_is_reported() {
        let connector = MockConnector::default();
        connector.set_fail_open(true);
        let mut session = GrblSession::new(Arc::new(connector), config());
        assert!(session.connect().await.is_err());
        assert!(!session.is_connected());
    }

    #[tokio::test]
    async fn operations_require_connection() {
        let mock = MockTransport::new();
        let session = GrblSession::new(Arc::new(MockConnector::new(mock)), config());
        assert!(matches!(session.execute("G0 X1").await, Err(Error::NotConnected)));
        assert!(matches!(session.query_status().await, Err(Error::NotConnected)));
        assert!(matches!(session.settings().await, Err(Error::NotConnected)));
    }

    #[tokio::test]
    async fn execute_ok() {
        let mock = MockTransport::new();
        let session = connected(&mock).await;
        mock.expect(b"G0 X10\n", b"ok\r\n");

        assert!(session.execute("G0 X10").await.unwrap().is_empty());
        assert_eq!(mock.remaining_expectations(), 0);
    }

    #[tokio::test]
    async fn execute_collects_informational_lines() {
        let mock = MockTransport::new();
        let session = connected(&mock).await;
        mock.expect(
            b"$G\n",
            b"[GC:G0 G54 G17 G21 G90 G94 M5 M9 T0 F0 S0]\r\n\r\nok\r\n",
        );

        let lines = session.execute("$G").await.unwrap();
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].kind, MessageKind::Message);
        assert_eq!(lines[0].group(0), "GC");
    }

    #[tokio::test]
    async fn execute_error_maps_to_device_error() {
        let mock = MockTransport::new();
        let session = connected(&mock).await;
        mock.expect(b"$Q\n", b"error:3\r\n");

        match session.execute("$Q").await {
            Err(Error::Device { code, description }) => {
                assert_eq!(code, 3);
                assert!(description.contains("Invalid statement"));
            }
            other => panic!("expected Device, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn execute_alarm_maps_to_alarm() {
        let mock = MockTransport::new();
        let session = connected(&mock).await;
        mock.expect(b"G0 X999\n", b"ALARM:2\r\n[MSG:Reset to continue]\r\n");

        assert!(matches!(
            session.execute("G0 X999").await,
            Err(Error::Alarm { code: 2, .. })
        ));
    }

    #[tokio::test]
    async fn unrecognized_line_fails_cycle() {
        let mock = MockTransport::new();
        let session = connected(&mock).await;
        mock.expect(b"G4 P0\n", b"garbage\r\nok\r\n");

        assert!(matches!(
            session.execute("G4 P0").await,
            Err(Error::UnrecognizedResponse(_))
        ));

        // The trailing ok is stale by the next command and gets discarded.
        mock.expect(b"G4 P0\n", b"ok\r\n");
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(session.execute("G4 P0").await.is_ok());
    }

    #[tokio::test]
    async fn missing_ok_times_out() {
        let mock = MockTransport::new();
        let session = connected(&mock).await;
        mock.expect(b"G0 X1\n", b"");

        assert!(matches!(session.execute("G0 X1").await, Err(Error::Timeout)));
    }

    #[tokio::test]
    async fn query_status_sends_realtime_byte() {
        let mock = MockTransport::new();
        let session = connected(&mock).await;
        mock.expect(b"?", b"<Idle|MPos:1.000,2.000,0.000|FS:0,0>\r\n");

        let status = session.query_status().await.unwrap();
        assert!(status.is_idle());
        assert_eq!(status.position, vec![1.0, 2.0, 0.0]);
        assert_eq!(mock.sent_data(), vec![b"?".to_vec()]);
    }

    #[tokio::test]
    async fn query_status_skips_stray_lines() {
        let mock = MockTransport::new();
        let session = connected(&mock).await;
        mock.expect(b"?", b"ok\r\n<Jog|WPos:0.5,0.0,0.0>\r\n");

        let status = session.query_status().await.unwrap();
        assert_eq!(status.state, "Jog");
    }

    #[tokio::test]
    async fn wait_until_idle_polls() {
        let mock = MockTransport::new();
        let session = connected(&mock).await;
        mock.expect(b"?", b"<Run|MPos:0.0,0.0,0.0>\r\n");
        mock.expect(b"?", b"<Hold:0|MPos:1.0,0.0,0.0>\r\n");
        mock.expect(b"?", b"<IDLE|MPos:2.0,0.0,0.0>\r\n");

        let status = session
            .wait_until_idle(Duration::from_millis(10))
            .await
            .unwrap();
        assert_eq!(status.position[0], 2.0);
        assert_eq!(mock.remaining_expectations(), 0);
    }

    #[tokio::test]
    async fn wait_until_idle_stops_on_alarm() {
        let mock = MockTransport::new();
        let session = connected(&mock).await;
        mock.expect(b"?", b"<Run|MPos:0.0,0.0,0.0>\r\n");
        mock.expect(b"?", b"ALARM:1\r\n");

        assert!(matches!(
            session.wait_until_idle(Duration::from_millis(10)).await,
            Err(Error::Alarm { code: 1, .. })
        ));
    }

    const SETTINGS: &[u8] = b"$100=250.000\r\n$101=250.000\r\n$102=400.000\r\n\
$110=500.000\r\n$111=500.000\r\n$112=300.000\r\n\
$130=200.000\r\n$131=200.000\r\n$132=50.000\r\nok\r\n";

    #[tokio::test]
    async fn settings_are_cached() {
        let mock = MockTransport::new();
        let session = connected(&mock).await;
        mock.expect(b"$$\n", SETTINGS);

        let settings = session.settings().await.unwrap();
        assert_eq!(settings.len(), 9);
        assert_eq!(settings.resolution().unwrap(), [250.0, 250.0, 400.0]);
        assert_eq!(settings.max_feed().unwrap(), [500.0, 500.0, 300.0]);
        assert_eq!(settings.max_travel().unwrap(), [200.0, 200.0, 50.0]);

        // Served from the cache: no second `$$`.
        let again = session.settings().await.unwrap();
        assert_eq!(again, settings);
        assert_eq!(mock.sent_data().len(), 1);
    }

    #[tokio::test]
    async fn invalidate_forces_reload() {
        let mock = MockTransport::new();
        let session = connected(&mock).await;
        mock.expect(b"$$\n", SETTINGS);
        session.settings().await.unwrap();

        session.invalidate_settings().await;
        mock.expect(b"$$\n", b"$100=80.000\r\nok\r\n");
        let settings = session.settings().await.unwrap();
        assert_eq!(settings.get(100), Some("80.000"));
        assert!(matches!(settings.resolution(), Err(Error::Protocol(_))));
    }

    #[tokio::test]
    async fn set_setting_invalidates_cache() {
        let mock = MockTransport::new();
        let session = connected(&mock).await;
        mock.expect(b"$$\n", SETTINGS);
        session.settings().await.unwrap();

        mock.expect(b"$110=600\n", b"ok\r\n");
        session.set_setting(110, "600").await.unwrap();

        mock.expect(b"$$\n", b"$110=600.000\r\nok\r\n");
        assert_eq!(session.settings().await.unwrap().get(110), Some("600.000"));
    }

    #[test]
    fn settings_tolerate_legacy_comments() {
        let msg = classify("$100=250.000 (x, step/mm)").unwrap();
        let settings = Settings::from_messages(&[msg]);
        assert_eq!(settings.get_f64(100).unwrap(), 250.0);
    }

    #[tokio::test]
    async fn motion_commands() {
        let mock = MockTransport::new();
        let session = connected(&mock).await;
        mock.expect(b"$H\n", b"ok\r\n");
        mock.expect(b"$X\n", b"[MSG:Caution: Unlocked]\r\nok\r\n");
        mock.expect(b"G90 G0 X10.000 Y-2.500\n", b"ok\r\n");
        mock.expect(b"$J=G91 X0.060 Y0.000 F100\n", b"ok\r\n");

        session.home().await.unwrap();
        session.unlock().await.unwrap();
        session.move_to(10.0, -2.5, MoveMode::Absolute).await.unwrap();
        session.jog(0.06, 0.0, 100.0).await.unwrap();
        assert_eq!(mock.remaining_expectations(), 0);
    }

    #[tokio::test]
    async fn jog_rejects_bad_feed() {
        let mock = MockTransport::new();
        let session = connected(&mock).await;
        assert!(matches!(
            session.jog(1.0, 0.0, 0.0).await,
            Err(Error::InvalidParameter(_))
        ));
    }
}
