//! Mock transport for deterministic testing of the I/O engine and protocol
//! sessions.
//!
//! [`MockTransport`] implements the [`Transport`] trait over an in-memory
//! inbound byte queue. Bytes reach the queue three ways: scripted
//! request/response pairs ([`expect`](MockTransport::expect)), direct
//! injection ([`push_inbound`](MockTransport::push_inbound)), or echo of
//! every sent payload. `receive` honours its timeout, so the engine's input
//! loop polls a mock exactly like a real port.
//!
//! The handle is cheaply cloneable; a test keeps one clone to script and
//! inspect the link while the engine owns another.
//!
//! # Example
//!
//! ```
//! use labio_test_harness::MockTransport;
//!
//! let mock = MockTransport::new();
//! // When the session sends "$VER\r\n", answer with the echoed reply.
//! mock.expect(b"$VER\r\n", b"$VER1.0OK\r\n");
//! ```

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::Notify;

use labio_core::error::{Error, Result};
use labio_core::transport::{Connector, Transport};

/// A pre-loaded request/response pair for the mock transport.
#[derive(Debug, Clone)]
struct Expectation {
    /// The exact bytes we expect to be sent.
    request: Vec<u8>,
    /// The bytes queued for `receive()` when the request matches.
    response: Vec<u8>,
}

#[derive(Debug)]
struct State {
    expectations: VecDeque<Expectation>,
    inbound: VecDeque<u8>,
    max_chunk: Option<usize>,
    echo: bool,
    connected: bool,
    fail_next_receive: bool,
    fail_next_send: bool,
    sent_log: Vec<Vec<u8>>,
}

/// A mock [`Transport`] for testing without hardware.
///
/// Expectations are consumed in order. A `send()` whose data does not match
/// the next expectation fails with [`Error::Protocol`]. With no expectations
/// queued, sends are only recorded.
#[derive(Debug, Clone)]
pub struct MockTransport {
    state: Arc<Mutex<State>>,
    data_ready: Arc<Notify>,
}

impl MockTransport {
    /// Create a new mock transport in the connected state.
    pub fn new() -> Self {
        MockTransport {
            state: Arc::new(Mutex::new(State {
                expectations: VecDeque::new(),
                inbound: VecDeque::new(),
                max_chunk: None,
                echo: false,
                connected: true,
                fail_next_receive: false,
                fail_next_send: false,
                sent_log: Vec::new(),
            })),
            data_ready: Arc::new(Notify::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        // A panicking test thread must not cascade into every other clone.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Add an expected request/response pair.
    pub fn expect(&self, request: &[u8], response: &[u8]) {
        self.lock().expectations.push_back(Expectation {
            request: request.to_vec(),
            response: response.to_vec(),
        });
    }

    /// Queue bytes as if the device had sent them unprompted.
    pub fn push_inbound(&self, data: &[u8]) {
        self.lock().inbound.extend(data.iter().copied());
        self.data_ready.notify_one();
    }

    /// Deliver inbound bytes in pieces of at most `size` bytes per
    /// `receive()` call.
    pub fn set_max_chunk(&self, size: usize) {
        self.lock().max_chunk = Some(size.max(1));
    }

    /// Loop every sent payload back to the inbound queue.
    pub fn set_echo(&self, echo: bool) {
        self.lock().echo = echo;
    }

    /// Make the next `receive()` fail with [`Error::ConnectionLost`].
    pub fn fail_next_receive(&self) {
        self.lock().fail_next_receive = true;
        self.data_ready.notify_one();
    }

    /// Make the next `send()` fail with [`Error::ConnectionLost`].
    pub fn fail_next_send(&self) {
        self.lock().fail_next_send = true;
    }

    /// All payloads sent through this transport, one element per `send()`.
    pub fn sent_data(&self) -> Vec<Vec<u8>> {
        self.lock().sent_log.clone()
    }

    /// Return the number of expectations that have not yet been consumed.
    pub fn remaining_expectations(&self) -> usize {
        self.lock().expectations.len()
    }

    /// Number of inbound bytes not yet received.
    pub fn pending_inbound(&self) -> usize {
        self.lock().inbound.len()
    }

    /// Set the connected state of the mock transport.
    ///
    /// When set to `false`, subsequent `send()` and `receive()` calls will
    /// return [`Error::NotConnected`].
    pub fn set_connected(&self, connected: bool) {
        self.lock().connected = connected;
        self.data_ready.notify_one();
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&self, data: &[u8]) -> Result<()> {
        let mut state = self.lock();
        if !state.connected {
            return Err(Error::NotConnected);
        }
        if state.fail_next_send {
            state.fail_next_send = false;
            return Err(Error::ConnectionLost);
        }

        state.sent_log.push(data.to_vec());

        if let Some(expectation) = state.expectations.pop_front() {
            if data != expectation.request.as_slice() {
                return Err(Error::Protocol(format!(
                    "unexpected send data: expected {:02X?}, got {:02X?}",
                    expectation.request, data
                )));
            }
            state.inbound.extend(expectation.response);
        }
        if state.echo {
            state.inbound.extend(data.iter().copied());
        }
        let ready = !state.inbound.is_empty();
        drop(state);

        if ready {
            self.data_ready.notify_one();
        }
        Ok(())
    }

    async fn receive(&self, buf: &mut [u8], timeout: Duration) -> Result<usize> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            {
                let mut state = self.lock();
                if !state.connected {
                    return Err(Error::NotConnected);
                }
                if state.fail_next_receive {
                    state.fail_next_receive = false;
                    return Err(Error::ConnectionLost);
                }
                if !state.inbound.is_empty() {
                    let limit = state.max_chunk.unwrap_or(usize::MAX).min(buf.len());
                    let n = state.inbound.len().min(limit);
                    for (slot, byte) in buf.iter_mut().zip(state.inbound.drain(..n)) {
                        *slot = byte;
                    }
                    // Leftover bytes must wake the next receive immediately.
                    if !state.inbound.is_empty() {
                        self.data_ready.notify_one();
                    }
                    return Ok(n);
                }
            }

            // `notify_one` stores a permit when nobody waits, so data pushed
            // between the check above and this await is not missed.
            if tokio::time::timeout_at(deadline, self.data_ready.notified())
                .await
                .is_err()
            {
                return Err(Error::Timeout);
            }
        }
    }

    async fn close(&self) -> Result<()> {
        let mut state = self.lock();
        state.connected = false;
        state.inbound.clear();
        drop(state);
        self.data_ready.notify_one();
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.lock().connected
    }
}

/// A [`Connector`] that hands out clones of one [`MockTransport`].
///
/// Every successful `open()` marks the transport connected again, so a test
/// can exercise connect/disconnect/connect cycles.
#[derive(Debug, Clone, Default)]
pub struct MockConnector {
    transport: MockTransport,
    fail_open: Arc<AtomicBool>,
    opens: Arc<AtomicUsize>,
}

impl MockConnector {
    pub fn new(transport: MockTransport) -> Self {
        Self {
            transport,
            fail_open: Arc::new(AtomicBool::new(false)),
            opens: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Make subsequent `open()` calls fail with [`Error::Transport`].
    pub fn set_fail_open(&self, fail: bool) {
        self.fail_open.store(fail, Ordering::SeqCst);
    }

    /// Number of successful `open()` calls so far.
    pub fn open_count(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    pub fn transport(&self) -> &MockTransport {
        &self.transport
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn open(&self) -> Result<Arc<dyn Transport>> {
        if self.fail_open.load(Ordering::SeqCst) {
            return Err(Error::Transport("mock endpoint refused connection".into()));
        }
        self.transport.set_connected(true);
        self.opens.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(self.transport.clone()))
    }

    fn endpoint(&self) -> String {
        "mock".into()
    }
}
