//! Streaming data-socket decoding.
//!
//! The data port sends packets back to back, little-endian throughout:
//!
//! ```text
//! offset  size  field
//!  0      4     preamble (ASCII)
//!  4      4     item number            i32
//!  8      4     serial number          i32
//! 12      8     channel bit field      i64, two bits per channel, 01 = present
//! 20      4     unused
//! 24      2     bytes per frame        i16
//! 26      2     frame count            i16
//! 28      4     frame counter          i32
//! 32      ...   frame_count frames of bytes_per_frame bytes,
//!               one i32 per active channel
//! ```
//!
//! TCP delivers this as an arbitrarily chunked byte stream. A header can be
//! split over two reads and one read can hold the tail of one packet and
//! the head of the next. [`SampleAssembler`] accumulates chunks and peels
//! complete packets off the front.
//!
//! A malformed packet is dropped and the assembler skips ahead to the next
//! occurrence of its preamble, so one bad packet costs one failed read.

use std::collections::BTreeMap;

use bytes::{Buf, BytesMut};
use labio_core::error::{Error, Result};

/// Size of the fixed packet header in bytes.
pub const HEADER_LEN: usize = 32;

/// Size of the ASCII preamble that opens every packet.
pub const PREAMBLE_LEN: usize = 4;

/// Width of one channel value inside a frame.
pub const SAMPLE_WIDTH: usize = 4;

/// Full-scale raw value; a reading of `FULL_SCALE` equals the sensor range.
pub const FULL_SCALE: f64 = 0xFF_FFFF as f64;

/// Decoded packet header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHeader {
    pub preamble: [u8; PREAMBLE_LEN],
    pub item_number: i32,
    pub serial_number: i32,
    pub channel_field: i64,
    pub bytes_per_frame: u16,
    pub frame_count: u16,
    pub frame_counter: i32,
}

impl PacketHeader {
    /// Parse the first [`HEADER_LEN`] bytes of `data`.
    ///
    /// Fails with [`Error::Protocol`] on short input or negative frame
    /// geometry.
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < HEADER_LEN {
            return Err(Error::Protocol(format!(
                "packet header needs {} bytes, got {}",
                HEADER_LEN,
                data.len()
            )));
        }

        let mut buf = &data[..HEADER_LEN];
        let mut preamble = [0u8; PREAMBLE_LEN];
        buf.copy_to_slice(&mut preamble);
        let item_number = buf.get_i32_le();
        let serial_number = buf.get_i32_le();
        let channel_field = buf.get_i64_le();
        buf.advance(4);
        let bytes_per_frame = buf.get_i16_le();
        let frame_count = buf.get_i16_le();
        let frame_counter = buf.get_i32_le();

        let bytes_per_frame = u16::try_from(bytes_per_frame).map_err(|_| {
            Error::Protocol(format!("negative bytes per frame {bytes_per_frame}"))
        })?;
        let frame_count = u16::try_from(frame_count)
            .map_err(|_| Error::Protocol(format!("negative frame count {frame_count}")))?;

        Ok(Self {
            preamble,
            item_number,
            serial_number,
            channel_field,
            bytes_per_frame,
            frame_count,
            frame_counter,
        })
    }

    /// Encode back to the 32-byte wire form.
    pub fn encode(&self) -> [u8; HEADER_LEN] {
        let mut out = [0u8; HEADER_LEN];
        out[0..4].copy_from_slice(&self.preamble);
        out[4..8].copy_from_slice(&self.item_number.to_le_bytes());
        out[8..12].copy_from_slice(&self.serial_number.to_le_bytes());
        out[12..20].copy_from_slice(&self.channel_field.to_le_bytes());
        out[24..26].copy_from_slice(&(self.bytes_per_frame as i16).to_le_bytes());
        out[26..28].copy_from_slice(&(self.frame_count as i16).to_le_bytes());
        out[28..32].copy_from_slice(&self.frame_counter.to_le_bytes());
        out
    }

    /// Number of set bits in the channel field.
    pub fn active_channel_count(&self) -> usize {
        self.channel_field.count_ones() as usize
    }

    /// Payload bytes following the header.
    pub fn payload_size(&self) -> usize {
        self.bytes_per_frame as usize * self.frame_count as usize
    }

    /// Header plus payload.
    pub fn packet_len(&self) -> usize {
        HEADER_LEN + self.payload_size()
    }
}

/// Per-channel samples collected from the stream.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Samples {
    /// Requested channel index -> samples in arrival order.
    pub data: BTreeMap<usize, Vec<i32>>,
    /// Frames collected; every channel holds this many values.
    pub frame_count: usize,
}

impl Samples {
    fn for_channels(channels: &[usize]) -> Self {
        Self {
            data: channels.iter().map(|&ch| (ch, Vec::new())).collect(),
            frame_count: 0,
        }
    }

    pub fn channel(&self, channel: usize) -> Option<&[i32]> {
        self.data.get(&channel).map(Vec::as_slice)
    }

    pub fn len(&self) -> usize {
        self.frame_count
    }

    pub fn is_empty(&self) -> bool {
        self.frame_count == 0
    }

    /// Raw values of every channel converted to sensor units.
    pub fn scaled(&self, range: f64) -> BTreeMap<usize, Vec<f64>> {
        self.data
            .iter()
            .map(|(&ch, values)| {
                (
                    ch,
                    values.iter().map(|&raw| scale_to_range(raw, range)).collect(),
                )
            })
            .collect()
    }
}

/// Convert a raw reading to the sensor's measuring range.
pub fn scale_to_range(raw: i32, range: f64) -> f64 {
    raw as f64 / FULL_SCALE * range
}

/// Reassembles packets from stream chunks until `target` frames have been
/// collected for the requested channels.
#[derive(Debug)]
pub struct SampleAssembler {
    buf: BytesMut,
    channels: Vec<usize>,
    /// Highest requested channel index.
    max_channel: usize,
    target: usize,
    samples: Samples,
    /// Preamble to search for after a malformed packet.
    resync: Option<[u8; PREAMBLE_LEN]>,
}

impl SampleAssembler {
    /// Collect `target` frames of `channels` (0-based indices).
    ///
    /// Fails with [`Error::InvalidParameter`] if `channels` is empty or
    /// names a channel twice.
    pub fn new(target: usize, channels: &[usize]) -> Result<Self> {
        Self::with_buffer(target, channels, BytesMut::new())
    }

    /// Like [`new`](Self::new), starting from bytes left over by an earlier
    /// read.
    pub fn with_buffer(target: usize, channels: &[usize], buf: BytesMut) -> Result<Self> {
        let Some(&max_channel) = channels.iter().max() else {
            return Err(Error::InvalidParameter("no channels requested".into()));
        };
        let mut seen = channels.to_vec();
        seen.sort_unstable();
        seen.dedup();
        if seen.len() != channels.len() {
            return Err(Error::InvalidParameter(format!(
                "duplicate channel in {channels:?}"
            )));
        }

        Ok(Self {
            buf,
            channels: channels.to_vec(),
            max_channel,
            target,
            samples: Samples::for_channels(channels),
            resync: None,
        })
    }

    /// Continue a resync left pending by an earlier read.
    pub fn with_resync(mut self, preamble: Option<[u8; PREAMBLE_LEN]>) -> Self {
        self.resync = preamble;
        self
    }

    /// Preamble still being searched for after a malformed packet.
    pub fn pending_resync(&self) -> Option<[u8; PREAMBLE_LEN]> {
        self.resync
    }

    pub fn is_complete(&self) -> bool {
        self.samples.frame_count >= self.target
    }

    /// Frames collected so far.
    pub fn collected(&self) -> usize {
        self.samples.frame_count
    }

    /// Bytes buffered but not yet consumed.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Append a chunk and consume every complete packet it finishes.
    ///
    /// On [`Error::InsufficientChannels`] the packet stays at the front of
    /// the buffer for a later request with fewer channels. On
    /// [`Error::Protocol`] the malformed packet is discarded.
    pub fn push(&mut self, chunk: &[u8]) -> Result<()> {
        self.buf.extend_from_slice(chunk);
        if !self.resynchronize() {
            return Ok(());
        }

        while !self.is_complete() && self.buf.len() >= HEADER_LEN {
            let header = match PacketHeader::parse(&self.buf) {
                Ok(header) => header,
                Err(e) => {
                    self.discard_packet(None);
                    return Err(e);
                }
            };
            if header.frame_count > 0 {
                if let Err(e) = self.validate(&header) {
                    if matches!(e, Error::Protocol(_)) {
                        self.discard_packet(Some(header.packet_len()));
                    }
                    return Err(e);
                }
            }

            let packet_len = header.packet_len();
            if self.buf.len() < packet_len {
                break;
            }

            let packet = self.buf.split_to(packet_len);
            self.take_frames(&header, &packet[HEADER_LEN..]);
        }

        Ok(())
    }

    /// Drop the packet at the front of the buffer. `packet_len` is known
    /// when the header itself was readable.
    fn discard_packet(&mut self, packet_len: Option<usize>) {
        if let Some(len) = packet_len.filter(|&len| self.buf.len() >= len) {
            self.buf.advance(len);
            tracing::warn!(dropped = len, "discarded malformed packet");
            return;
        }

        let mut preamble = [0u8; PREAMBLE_LEN];
        preamble.copy_from_slice(&self.buf[..PREAMBLE_LEN]);
        self.buf.advance(1);
        self.resync = Some(preamble);
        self.resynchronize();
        tracing::warn!(
            preamble = %String::from_utf8_lossy(&preamble),
            buffered = self.buf.len(),
            "discarded malformed packet, searching for next preamble"
        );
    }

    /// Skip to the pending preamble, if any. Returns `false` while it has
    /// not been seen yet; the tail that could start it stays buffered.
    fn resynchronize(&mut self) -> bool {
        let Some(preamble) = self.resync else {
            return true;
        };
        match self.buf.windows(PREAMBLE_LEN).position(|w| w == preamble.as_slice()) {
            Some(pos) => {
                self.buf.advance(pos);
                self.resync = None;
                true
            }
            None => {
                let keep = self.buf.len().min(PREAMBLE_LEN - 1);
                self.buf.advance(self.buf.len() - keep);
                false
            }
        }
    }

    fn validate(&self, header: &PacketHeader) -> Result<()> {
        let available = header.active_channel_count();
        if self.max_channel >= available {
            return Err(Error::InsufficientChannels {
                requested: self.max_channel,
                available,
            });
        }
        let needed = (self.max_channel + 1) * SAMPLE_WIDTH;
        if (header.bytes_per_frame as usize) < needed {
            return Err(Error::Protocol(format!(
                "frame of {} bytes cannot hold channel {}",
                header.bytes_per_frame, self.max_channel
            )));
        }
        Ok(())
    }

    fn take_frames(&mut self, header: &PacketHeader, payload: &[u8]) {
        let width = header.bytes_per_frame as usize;
        // Frames past the target are dropped with the rest of the packet.
        for frame in payload.chunks_exact(width.max(1)).take(header.frame_count as usize) {
            if self.is_complete() {
                break;
            }
            for &ch in &self.channels {
                let offset = ch * SAMPLE_WIDTH;
                let mut raw = [0u8; SAMPLE_WIDTH];
                raw.copy_from_slice(&frame[offset..offset + SAMPLE_WIDTH]);
                if let Some(values) = self.samples.data.get_mut(&ch) {
                    values.push(i32::from_le_bytes(raw));
                }
            }
            self.samples.frame_count += 1;
        }
    }

    /// Collected samples and the unconsumed remainder of the stream.
    pub fn finish(self) -> (Samples, BytesMut) {
        (self.samples, self.buf)
    }
}

/// Build a packet for tests and simulators: `frames[i][c]` is the value of
/// channel `c` in frame `i`. All frames must have the same width.
pub fn encode_packet(frame_counter: i32, frames: &[Vec<i32>]) -> Vec<u8> {
    let channels = frames.first().map_or(0, Vec::len);
    let channel_field = (0..channels).fold(0i64, |field, ch| field | (1i64 << (2 * ch)));
    let header = PacketHeader {
        preamble: *b"MEAS",
        item_number: 0,
        serial_number: 0,
        channel_field,
        bytes_per_frame: (channels * SAMPLE_WIDTH) as u16,
        frame_count: frames.len() as u16,
        frame_counter,
    };

    let mut out = header.encode().to_vec();
    for frame in frames {
        for value in frame {
            out.extend_from_slice(&value.to_le_bytes());
        }
    }
    out
}
