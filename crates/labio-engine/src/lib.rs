//! Asynchronous, queue-mediated I/O engine for labio transports.
//!
//! One [`IoEngine`] wraps one transport. It runs an input loop that turns
//! received bytes into inbound units and an output loop that writes queued
//! commands, and offers callers a strictly serialized request/response
//! facility on top of the two FIFO channels.
//!
//! # Architecture
//!
//! - [`framing`] -- how received bytes are cut into inbound units
//! - [`io`] -- engine types, the connect/disconnect lifecycle and the loops

pub mod framing;
pub mod io;

pub use framing::{Framing, LineSplitter};
pub use io::{EngineState, IoConfig, IoEngine};
