//! Streaming data channel of a capacitive displacement controller.
//!
//! Acquisition starts as soon as the data socket is connected; the
//! controller then pushes packets at its sampling rate whether or not
//! anybody reads them. [`DataChannel`] runs an input-only engine that
//! queues raw chunks and reassembles them on demand in
//! [`read_samples`](DataChannel::read_samples).

use std::sync::Arc;
use std::time::Duration;

use bytes::BytesMut;
use labio_core::error::{Error, Result};
use labio_core::transport::Connector;
use labio_engine::{Framing, IoConfig, IoEngine};

use crate::stream::{PREAMBLE_LEN, SampleAssembler, Samples};

/// Default TCP port of the data socket.
pub const DEFAULT_DATA_PORT: u16 = 10001;

/// Reader for the binary measurement stream.
pub struct DataChannel {
    engine: IoEngine,
    /// Start of the next packet, left over by the previous read.
    carry: BytesMut,
    /// Preamble still being searched for after a malformed packet.
    resync: Option<[u8; PREAMBLE_LEN]>,
}

impl DataChannel {
    /// Create a disconnected channel over `connector`.
    ///
    /// `timeout` is how long a read waits for more bytes before it gives up
    /// and returns what it has.
    pub fn new(connector: Arc<dyn Connector>, timeout: Duration) -> Self {
        let config = IoConfig {
            timeout,
            input: Some(Framing::Chunks),
            output: false,
            ..IoConfig::default()
        };
        Self {
            engine: IoEngine::new(connector, config),
            carry: BytesMut::new(),
            resync: None,
        }
    }

    /// Connect the data socket, which starts acquisition.
    pub async fn connect(&mut self) -> Result<()> {
        self.carry.clear();
        self.resync = None;
        self.engine.connect().await
    }

    pub async fn disconnect(&mut self) -> Result<()> {
        self.carry.clear();
        self.resync = None;
        self.engine.disconnect().await
    }

    pub fn is_connected(&self) -> bool {
        self.engine.is_connected()
    }

    /// Read `count` frames of `channels` (0-based) from the stream.
    ///
    /// If the stream goes quiet for longer than the channel timeout the
    /// frames collected so far are returned; check
    /// [`Samples::frame_count`].
    ///
    /// # Errors
    ///
    /// [`Error::InsufficientChannels`] when a packet advertises fewer
    /// channels than requested, [`Error::InvalidParameter`] for an empty or
    /// duplicated channel list, [`Error::Protocol`] for malformed packets,
    /// and transport faults from the engine. A malformed packet is dropped,
    /// so the next read continues with the packet after it.
    pub async fn read_samples(&mut self, count: usize, channels: &[usize]) -> Result<Samples> {
        if !self.engine.is_connected() {
            return Err(Error::NotConnected);
        }

        let carry = std::mem::take(&mut self.carry);
        let mut assembler = SampleAssembler::with_buffer(count, channels, carry)?
            .with_resync(self.resync.take());
        if let Err(e) = assembler.push(&[]) {
            self.stash(assembler);
            return Err(e);
        }

        while !assembler.is_complete() {
            match self.engine.next_inbound(None).await {
                Ok(chunk) => {
                    if let Err(e) = assembler.push(&chunk) {
                        self.stash(assembler);
                        return Err(e);
                    }
                }
                Err(Error::Timeout) => {
                    tracing::warn!(
                        endpoint = %self.engine.endpoint(),
                        requested = count,
                        collected = assembler.collected(),
                        "no data available, returning partial samples"
                    );
                    break;
                }
                Err(e) => return Err(e),
            }
        }

        self.resync = assembler.pending_resync();
        let (samples, rest) = assembler.finish();
        self.carry = rest;
        Ok(samples)
    }

    /// Keep what a failed read left unconsumed for the next one.
    fn stash(&mut self, assembler: SampleAssembler) {
        self.resync = assembler.pending_resync();
        self.carry = assembler.finish().1;
    }
}
