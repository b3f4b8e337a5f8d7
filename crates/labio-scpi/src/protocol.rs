//! SCPI command encoding and reply parsing.
//!
//! ```text
//! -> route:mon:data?\n
//! <- +2.34500000E+01\n
//! ```

use labio_core::error::{Error, Result};

/// Line terminator of commands and replies.
pub const TERMINATOR: u8 = b'\n';

/// Encode a command for the wire. Embedded CR and LF are removed so one
/// call never turns into two commands.
pub fn encode_command(command: &str) -> Vec<u8> {
    let mut out: Vec<u8> = command
        .bytes()
        .filter(|b| !matches!(b, b'\r' | b'\n'))
        .collect();
    out.push(TERMINATOR);
    out
}

/// Channel list for a single channel: `(@101)`.
pub fn channel_list(channel: u16) -> String {
    format!("(@{channel})")
}

/// Quote `text` as a SCPI string parameter. Embedded quotes are doubled.
pub fn quote_text(text: &str) -> String {
    format!("'{}'", text.replace('\'', "''"))
}

/// Parse a numeric reply such as `+2.34500000E+01`.
///
/// # Errors
///
/// [`Error::UnexpectedResponse`] if `raw` is not a number.
pub fn parse_reading(command: &str, raw: &str) -> Result<f64> {
    let text = raw.trim();
    text.parse::<f64>().map_err(|_| Error::UnexpectedResponse {
        command: command.to_string(),
        raw: text.to_string(),
    })
}
