//! Command-socket line protocol.
//!
//! Commands go out as `$<command>\r\n`. The controller echoes the command
//! and appends its answer and `OK`:
//!
//! ```text
//! -> $VER\r\n
//! <- $VER1.0OK\r\n
//! ```
//!
//! Failures are reported with one of two fixed sentinels, either on their
//! own or after the echo: `$UNKNOWN COMMAND` and `$WRONG PARAMETER`.

use labio_core::error::{Error, Result};

/// Prefix of every command and every echo.
pub const PREFIX: char = '$';

/// Suffix of a successful reply.
pub const OK_SUFFIX: &str = "OK";

/// Reply to a command the controller does not know.
pub const UNKNOWN_COMMAND: &str = "$UNKNOWN COMMAND";

/// Reply to a known command with an invalid argument.
pub const WRONG_PARAMETER: &str = "$WRONG PARAMETER";

/// Classification of one reply line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlResponse {
    /// Echo matched and the reply ended in `OK`; carries the payload between
    /// them.
    Ok(String),
    UnknownCommand,
    WrongParameter,
    /// Anything else, with the line as received (line endings removed).
    Unexpected(String),
}

/// Remove CR and LF from a command; they would split it on the wire.
pub fn sanitize_command(command: &str) -> String {
    command.chars().filter(|c| !matches!(c, '\r' | '\n')).collect()
}

/// Encode a command for the wire: `$<command>\r\n`.
pub fn encode_command(command: &str) -> Vec<u8> {
    let command = sanitize_command(command);
    let mut out = Vec::with_capacity(command.len() + 3);
    out.push(PREFIX as u8);
    out.extend_from_slice(command.as_bytes());
    out.extend_from_slice(b"\r\n");
    out
}

/// Classify the reply `raw` to `command`.
pub fn classify_response(command: &str, raw: &str) -> ControlResponse {
    let command = sanitize_command(command);
    let line = raw.trim_matches(|c| matches!(c, '\r' | '\n'));

    if let Some(rest) = line
        .strip_prefix(PREFIX)
        .and_then(|l| l.strip_prefix(command.as_str()))
    {
        if let Some(payload) = rest.strip_suffix(OK_SUFFIX) {
            return ControlResponse::Ok(payload.to_string());
        }
        if let Some(kind) = sentinel(rest) {
            return kind;
        }
    }

    sentinel(line).unwrap_or_else(|| ControlResponse::Unexpected(line.to_string()))
}

fn sentinel(text: &str) -> Option<ControlResponse> {
    match text {
        UNKNOWN_COMMAND => Some(ControlResponse::UnknownCommand),
        WRONG_PARAMETER => Some(ControlResponse::WrongParameter),
        _ => None,
    }
}

/// Decode the reply `raw` to `command` into its payload.
///
/// # Errors
///
/// [`Error::UnknownCommand`] and [`Error::WrongParameter`] for the two
/// sentinels, [`Error::UnexpectedResponse`] (carrying the raw line) for any
/// other shape.
pub fn decode_response(command: &str, raw: &str) -> Result<String> {
    match classify_response(command, raw) {
        ControlResponse::Ok(payload) => Ok(payload),
        ControlResponse::UnknownCommand => Err(Error::UnknownCommand(sanitize_command(command))),
        ControlResponse::WrongParameter => Err(Error::WrongParameter(sanitize_command(command))),
        ControlResponse::Unexpected(line) => Err(Error::UnexpectedResponse {
            command: sanitize_command(command),
            raw: line,
        }),
    }
}
