//! Inbound framing: how the input loop cuts the received byte stream into
//! the units it queues for callers.
//!
//! Text instruments answer one line per message, so [`Framing::Lines`]
//! splits on a terminator byte. Binary streams have no record boundary the
//! engine could know about; [`Framing::Chunks`] hands every received chunk
//! over untouched and leaves reassembly to the decoder.

use bytes::{Bytes, BytesMut};

/// Upper bound on a buffered partial line.
///
/// Text replies are a few dozen bytes; anything longer without a terminator
/// is line noise or a binary stream on the wrong port.
pub const MAX_LINE: usize = 64 * 1024;

/// How received bytes are grouped into inbound units.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Framing {
    /// One unit per `terminator`-delimited line, terminator removed.
    ///
    /// With `flush_on_idle`, a partial line is emitted as-is when a receive
    /// times out. Devices that omit the final line ending need this.
    Lines { terminator: u8, flush_on_idle: bool },
    /// One unit per received chunk.
    Chunks,
}

impl Framing {
    /// `\n`-terminated lines without idle flush.
    pub fn lines() -> Self {
        Framing::Lines {
            terminator: b'\n',
            flush_on_idle: false,
        }
    }

    pub(crate) fn deframer(&self) -> Deframer {
        match *self {
            Framing::Lines {
                terminator,
                flush_on_idle,
            } => Deframer::Lines {
                splitter: LineSplitter::new(terminator),
                flush_on_idle,
            },
            Framing::Chunks => Deframer::Chunks,
        }
    }
}

/// Per-connection framing state owned by the input loop.
pub(crate) enum Deframer {
    Lines {
        splitter: LineSplitter,
        flush_on_idle: bool,
    },
    Chunks,
}

impl Deframer {
    pub(crate) fn push(&mut self, data: &[u8]) -> Vec<Bytes> {
        match self {
            Deframer::Lines { splitter, .. } => splitter.push(data),
            Deframer::Chunks => vec![Bytes::copy_from_slice(data)],
        }
    }

    /// Called when a receive times out.
    pub(crate) fn idle(&mut self) -> Option<Bytes> {
        match self {
            Deframer::Lines {
                splitter,
                flush_on_idle: true,
            } => splitter.flush(),
            _ => None,
        }
    }
}

/// Accumulates bytes and yields complete lines.
#[derive(Debug)]
pub struct LineSplitter {
    terminator: u8,
    buf: BytesMut,
}

impl LineSplitter {
    pub fn new(terminator: u8) -> Self {
        Self {
            terminator,
            buf: BytesMut::new(),
        }
    }

    /// Append `data` and return every line it completes, in order.
    pub fn push(&mut self, data: &[u8]) -> Vec<Bytes> {
        self.buf.extend_from_slice(data);

        let mut lines = Vec::new();
        while let Some(pos) = self.buf.iter().position(|&b| b == self.terminator) {
            let mut line = self.buf.split_to(pos + 1);
            line.truncate(pos);
            lines.push(line.freeze());
        }

        if self.buf.len() > MAX_LINE {
            tracing::warn!(
                len = self.buf.len(),
                "line buffer overflow without terminator, discarding"
            );
            self.buf.clear();
        }

        lines
    }

    /// Take the buffered partial line, if any.
    pub fn flush(&mut self) -> Option<Bytes> {
        if self.buf.is_empty() {
            None
        } else {
            Some(self.buf.split().freeze())
        }
    }

    /// Number of buffered bytes not yet part of a complete line.
    pub fn pending(&self) -> usize {
        self.buf.len()
    }
}
