//! SCPI data logger protocol for labio.
//!
//! Switch/measure units such as the Agilent 34970A accept SCPI commands on
//! a raw TCP socket (port 5025), one `\n`-terminated line per command.
//! Queries end in `?` and are answered with one line.
//!
//! - [`protocol`]: command encoding and reply parsing.
//! - [`DataLogger`]: thermocouple monitoring and front-panel text.
//! - [`DataLoggerBuilder`]: host, port and timeouts.

pub mod builder;
pub mod logger;
pub mod protocol;

pub use builder::DataLoggerBuilder;
pub use logger::{DEFAULT_SCPI_PORT, DataLogger};
pub use protocol::{channel_list, encode_command, parse_reading, quote_text};
