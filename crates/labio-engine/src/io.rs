//! The I/O engine: two worker tasks around one transport.
//!
//! [`IoEngine`] turns a [`Transport`] into a queue-mediated request/response
//! facility. On [`connect`](IoEngine::connect) it opens the link through its
//! [`Connector`] and spawns up to two tasks:
//!
//! - the **input loop** polls `receive` with a short timeout, cuts the bytes
//!   into units per [`Framing`], and pushes them onto the inbound FIFO;
//! - the **output loop** waits on the outbound FIFO and writes each payload
//!   to the transport in submission order.
//!
//! Callers talk to the loops only through the two channels. A failure inside
//! either loop lands in a single fault slot, stops both loops, and is
//! returned by the next [`submit_command`](IoEngine::submit_command),
//! [`next_inbound`](IoEngine::next_inbound) or
//! [`disconnect`](IoEngine::disconnect).
//!
//! There is no request correlation on the wire. At most one
//! response-expecting call may be outstanding; a second one fails with
//! [`Error::RequestInFlight`] instead of stealing the first one's answer.

use std::sync::Arc;
use std::sync::Mutex as StdMutex;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use labio_core::error::{Error, Result};
use labio_core::transport::{Connector, Transport};

use crate::framing::Framing;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Configuration for an [`IoEngine`].
#[derive(Debug, Clone)]
pub struct IoConfig {
    /// Default wait for a response when the caller passes no timeout.
    pub timeout: Duration,
    /// Receive timeout of one input-loop iteration. Bounds how long
    /// `disconnect` waits for the input loop and how soon an idle partial
    /// line is flushed.
    pub poll_interval: Duration,
    /// Inbound framing; `None` disables the input loop.
    pub input: Option<Framing>,
    /// Whether to run the output loop.
    pub output: bool,
    /// Depth of each FIFO channel.
    pub queue_capacity: usize,
    /// Size of the input loop's receive buffer.
    pub read_chunk: usize,
}

impl Default for IoConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(2),
            poll_interval: Duration::from_millis(100),
            input: Some(Framing::lines()),
            output: true,
            queue_capacity: 1024,
            read_chunk: 65536,
        }
    }
}

/// Connection lifecycle of an [`IoEngine`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Disconnected,
    Connecting,
    Connected,
    Disconnecting,
}

/// Holds the first failure raised inside a worker loop.
#[derive(Debug, Default)]
struct FaultSlot {
    inner: StdMutex<FaultState>,
}

#[derive(Debug, Default)]
struct FaultState {
    error: Option<Error>,
    surfaced: bool,
}

impl FaultSlot {
    fn lock(&self) -> std::sync::MutexGuard<'_, FaultState> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Store `error` unless a fault is already recorded.
    fn record(&self, error: Error) {
        let mut state = self.lock();
        if state.error.is_none() && !state.surfaced {
            state.error = Some(error);
        } else {
            debug!(error = %error, "secondary loop failure ignored");
        }
    }

    /// `Err` with the recorded fault the first time, `ConnectionLost` after.
    fn check(&self) -> Result<()> {
        let mut state = self.lock();
        if let Some(error) = state.error.take() {
            state.surfaced = true;
            return Err(error);
        }
        if state.surfaced {
            return Err(Error::ConnectionLost);
        }
        Ok(())
    }

    /// The recorded fault, or `fallback` if the loops ended cleanly.
    fn error_or(&self, fallback: Error) -> Error {
        match self.check() {
            Err(error) => error,
            Ok(()) => fallback,
        }
    }
}

/// Everything that exists only while connected.
struct Link {
    transport: Arc<dyn Transport>,
    outbound_tx: Option<mpsc::Sender<Bytes>>,
    /// Only ever `try_lock`ed: holding the guard marks a response-expecting
    /// call in progress.
    inbound_rx: Option<Mutex<mpsc::Receiver<Bytes>>>,
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

/// Asynchronous engine around one transport. See the module docs.
pub struct IoEngine {
    connector: Arc<dyn Connector>,
    config: IoConfig,
    state: EngineState,
    link: Option<Link>,
    fault: Arc<FaultSlot>,
}

// ---------------------------------------------------------------------------
// Lifecycle
// ---------------------------------------------------------------------------

impl IoEngine {
    /// Create a disconnected engine.
    pub fn new(connector: Arc<dyn Connector>, config: IoConfig) -> Self {
        Self {
            connector,
            config,
            state: EngineState::Disconnected,
            link: None,
            fault: Arc::new(FaultSlot::default()),
        }
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state == EngineState::Connected
    }

    pub fn config(&self) -> &IoConfig {
        &self.config
    }

    /// Endpoint description of the underlying connector.
    pub fn endpoint(&self) -> String {
        self.connector.endpoint()
    }

    /// Open the transport and start the configured loops.
    ///
    /// Fails with [`Error::AlreadyConnected`] unless the engine is
    /// disconnected. If opening fails the engine stays disconnected.
    pub async fn connect(&mut self) -> Result<()> {
        if self.state != EngineState::Disconnected {
            return Err(Error::AlreadyConnected);
        }

        let endpoint = self.connector.endpoint();
        self.state = EngineState::Connecting;
        self.fault = Arc::new(FaultSlot::default());
        debug!(endpoint = %endpoint, "engine connecting");

        let transport = match self.connector.open().await {
            Ok(transport) => transport,
            Err(e) => {
                tracing::error!(endpoint = %endpoint, error = %e, "engine connect failed");
                self.state = EngineState::Disconnected;
                return Err(e);
            }
        };

        let cancel = CancellationToken::new();
        let capacity = self.config.queue_capacity.max(1);
        let mut tasks = Vec::with_capacity(2);

        let inbound_rx = self.config.input.as_ref().map(|framing| {
            let (tx, rx) = mpsc::channel(capacity);
            tasks.push(tokio::spawn(input_loop(
                Arc::clone(&transport),
                framing.clone(),
                self.config.poll_interval,
                self.config.read_chunk.max(1),
                tx,
                cancel.clone(),
                Arc::clone(&self.fault),
            )));
            Mutex::new(rx)
        });

        let outbound_tx = self.config.output.then(|| {
            let (tx, rx) = mpsc::channel(capacity);
            tasks.push(tokio::spawn(output_loop(
                Arc::clone(&transport),
                rx,
                cancel.clone(),
                Arc::clone(&self.fault),
            )));
            tx
        });

        self.link = Some(Link {
            transport,
            outbound_tx,
            inbound_rx,
            cancel,
            tasks,
        });
        self.state = EngineState::Connected;
        tracing::info!(endpoint = %endpoint, "engine connected");
        Ok(())
    }

    /// Stop both loops, wait for them to exit, drop queued units and close
    /// the transport.
    ///
    /// A no-op returning `Ok(())` when already disconnected, including after
    /// a failed `connect`. Returns a loop fault that no earlier call has
    /// reported yet.
    pub async fn disconnect(&mut self) -> Result<()> {
        let Some(link) = self.link.take() else {
            debug!("disconnect on disconnected engine ignored");
            self.state = EngineState::Disconnected;
            return Ok(());
        };

        let endpoint = self.connector.endpoint();
        self.state = EngineState::Disconnecting;
        debug!(endpoint = %endpoint, "engine disconnecting");

        let Link {
            transport,
            outbound_tx,
            inbound_rx,
            cancel,
            tasks,
        } = link;

        cancel.cancel();
        for task in tasks {
            if let Err(e) = task.await {
                tracing::error!(endpoint = %endpoint, error = %e, "engine loop panicked");
                self.fault
                    .record(Error::Transport(format!("engine loop panicked: {e}")));
            }
        }

        drop(outbound_tx);
        if let Some(rx) = inbound_rx {
            let mut rx = rx.into_inner();
            rx.close();
            let mut discarded = 0usize;
            while rx.try_recv().is_ok() {
                discarded += 1;
            }
            if discarded > 0 {
                debug!(endpoint = %endpoint, discarded, "discarded unread inbound units");
            }
        }

        let closed = transport.close().await;
        self.state = EngineState::Disconnected;
        tracing::info!(endpoint = %endpoint, "engine disconnected");

        let unreported = {
            let mut state = self.fault.lock();
            state.surfaced = true;
            state.error.take()
        };
        match unreported {
            Some(error) => Err(error),
            None => closed,
        }
    }

    fn link(&self) -> Result<&Link> {
        match (&self.link, self.state) {
            (Some(link), EngineState::Connected) => Ok(link),
            _ => Err(Error::NotConnected),
        }
    }
}

impl Drop for IoEngine {
    fn drop(&mut self) {
        if let Some(link) = &self.link {
            debug!("engine dropped while connected, stopping loops");
            link.cancel.cancel();
        }
    }
}

// ---------------------------------------------------------------------------
// Requests
// ---------------------------------------------------------------------------

impl IoEngine {
    /// Queue `payload` for the output loop and, if `expect_response`, wait
    /// for the next inbound unit.
    ///
    /// `timeout` defaults to [`IoConfig::timeout`]. Units that were already
    /// queued before the command was sent are answers nobody waited for;
    /// they are discarded so they cannot be taken for this command's reply.
    pub async fn submit_command(
        &self,
        payload: impl Into<Bytes>,
        expect_response: bool,
        timeout: Option<Duration>,
    ) -> Result<Option<Bytes>> {
        let link = self.link()?;
        self.fault.check()?;
        let timeout = timeout.unwrap_or(self.config.timeout);
        let payload = payload.into();

        let mut inbound = if expect_response {
            let rx = link.inbound_rx.as_ref().ok_or_else(|| {
                Error::InvalidParameter("engine has no input loop to read a response from".into())
            })?;
            let mut guard = rx.try_lock().map_err(|_| Error::RequestInFlight)?;
            while let Ok(stale) = guard.try_recv() {
                tracing::warn!(
                    endpoint = %self.connector.endpoint(),
                    unit = ?stale,
                    "discarding stale inbound unit"
                );
            }
            Some(guard)
        } else {
            None
        };

        let outbound = link.outbound_tx.as_ref().ok_or_else(|| {
            Error::InvalidParameter("engine has no output loop to send with".into())
        })?;
        tracing::trace!(bytes = payload.len(), "queueing command");
        let command = payload.clone();
        match tokio::time::timeout(timeout, outbound.send(payload)).await {
            Ok(Ok(())) => {}
            Ok(Err(_)) => return Err(self.fault.error_or(Error::ConnectionLost)),
            Err(_) => {
                self.log_timeout(&command, timeout, "output queue full");
                return Err(Error::Timeout);
            }
        }

        match inbound.as_mut() {
            Some(rx) => match self.receive_unit(rx, timeout).await {
                Err(Error::Timeout) => {
                    self.log_timeout(&command, timeout, "no response to command");
                    Err(Error::Timeout)
                }
                result => result.map(Some),
            },
            None => Ok(None),
        }
    }

    fn log_timeout(&self, command: &Bytes, timeout: Duration, message: &str) {
        tracing::warn!(
            endpoint = %self.connector.endpoint(),
            command = %String::from_utf8_lossy(command).trim_end(),
            timeout_ms = timeout.as_millis() as u64,
            "{message}"
        );
    }

    /// Send `payload` and wait for one inbound unit.
    pub async fn request(
        &self,
        payload: impl Into<Bytes>,
        timeout: Option<Duration>,
    ) -> Result<Bytes> {
        self.submit_command(payload, true, timeout)
            .await?
            .ok_or(Error::Timeout)
    }

    /// Send `payload` without waiting for anything.
    pub async fn send(&self, payload: impl Into<Bytes>) -> Result<()> {
        self.submit_command(payload, false, None).await.map(|_| ())
    }

    /// Wait for the next inbound unit without sending anything.
    ///
    /// Used for multi-line replies, unsolicited banners and streams.
    pub async fn next_inbound(&self, timeout: Option<Duration>) -> Result<Bytes> {
        let link = self.link()?;
        self.fault.check()?;
        let rx = link.inbound_rx.as_ref().ok_or_else(|| {
            Error::InvalidParameter("engine has no input loop to read from".into())
        })?;
        let mut guard = rx.try_lock().map_err(|_| Error::RequestInFlight)?;
        self.receive_unit(&mut guard, timeout.unwrap_or(self.config.timeout))
            .await
    }

    async fn receive_unit(
        &self,
        rx: &mut mpsc::Receiver<Bytes>,
        timeout: Duration,
    ) -> Result<Bytes> {
        match tokio::time::timeout(timeout, rx.recv()).await {
            Ok(Some(unit)) => Ok(unit),
            // The input loop is gone; it only leaves early on a fault.
            Ok(None) => Err(self.fault.error_or(Error::ConnectionLost)),
            Err(_) => {
                self.fault.check()?;
                tracing::debug!(
                    endpoint = %self.connector.endpoint(),
                    timeout_ms = timeout.as_millis() as u64,
                    "timed out waiting for inbound unit"
                );
                Err(Error::Timeout)
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Loops
// ---------------------------------------------------------------------------

async fn input_loop(
    transport: Arc<dyn Transport>,
    framing: Framing,
    poll_interval: Duration,
    read_chunk: usize,
    inbound_tx: mpsc::Sender<Bytes>,
    cancel: CancellationToken,
    fault: Arc<FaultSlot>,
) {
    debug!(?framing, "input loop started");
    let mut deframer = framing.deframer();
    let mut buf = vec![0u8; read_chunk];

    'outer: loop {
        let received = tokio::select! {
            biased;

            _ = cancel.cancelled() => break,

            r = transport.receive(&mut buf, poll_interval) => r,
        };

        let units = match received {
            Ok(n) => deframer.push(&buf[..n]),
            Err(Error::Timeout) => deframer.idle().into_iter().collect(),
            Err(e) => {
                tracing::error!(error = %e, "input loop failed");
                fault.record(e);
                cancel.cancel();
                break;
            }
        };

        for unit in units {
            tracing::trace!(unit = ?unit, "inbound unit");
            let delivered = tokio::select! {
                biased;

                _ = cancel.cancelled() => false,

                r = inbound_tx.send(unit) => r.is_ok(),
            };
            if !delivered {
                break 'outer;
            }
        }
    }

    debug!("input loop stopped");
}

async fn output_loop(
    transport: Arc<dyn Transport>,
    mut outbound_rx: mpsc::Receiver<Bytes>,
    cancel: CancellationToken,
    fault: Arc<FaultSlot>,
) {
    debug!("output loop started");

    loop {
        let next = tokio::select! {
            biased;

            _ = cancel.cancelled() => {
                outbound_rx.close();
                let mut unsent = 0usize;
                while outbound_rx.try_recv().is_ok() {
                    unsent += 1;
                }
                if unsent > 0 {
                    tracing::warn!(unsent, "discarding unsent commands");
                }
                break;
            }

            cmd = outbound_rx.recv() => cmd,
        };
        let Some(payload) = next else {
            break;
        };

        if let Err(e) = transport.send(&payload).await {
            tracing::error!(error = %e, "output loop failed");
            fault.record(e);
            cancel.cancel();
            break;
        }
    }

    debug!("output loop stopped");
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
