//! Capacitive displacement controller protocols for labio.
//!
//! The controller exposes two sockets:
//!
//! - a Telnet **command port** speaking a `$<command>\r\n` line protocol
//!   ([`protocol`], [`ControlChannel`]);
//! - a raw TCP **data port** streaming binary multi-channel sample packets
//!   ([`stream`], [`DataChannel`]).
//!
//! Use [`CapacitiveBuilder`] to configure both.

pub mod builder;
pub mod control;
pub mod data;
pub mod protocol;
pub mod stream;

pub use builder::CapacitiveBuilder;
pub use control::{ControlChannel, DEFAULT_CONTROL_PORT};
pub use data::{DataChannel, DEFAULT_DATA_PORT};
pub use protocol::{ControlResponse, classify_response, decode_response, encode_command};
pub use stream::{PacketHeader, SampleAssembler, Samples, scale_to_range};
