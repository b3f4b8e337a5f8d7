//! Error types for labio.
//!
//! All fallible operations across the workspace return [`Result<T>`], which
//! uses [`Error`] as the error type. Transport failures, timeouts, protocol
//! violations and device-reported failures are all captured here so that a
//! caller can tell them apart without inspecting strings.

/// The error type for all labio operations.
///
/// The variants fall into a handful of families:
///
/// - transport failures ([`Transport`](Error::Transport), [`Io`](Error::Io),
///   [`ConnectionLost`](Error::ConnectionLost)) are fatal to the connection;
/// - [`Timeout`](Error::Timeout) is recoverable, the caller may retry;
/// - protocol violations ([`Protocol`](Error::Protocol),
///   [`UnexpectedResponse`](Error::UnexpectedResponse),
///   [`UnrecognizedResponse`](Error::UnrecognizedResponse)) end the current
///   exchange but not the connection;
/// - device failures ([`UnknownCommand`](Error::UnknownCommand),
///   [`WrongParameter`](Error::WrongParameter), [`Device`](Error::Device),
///   [`Alarm`](Error::Alarm)) carry what the instrument reported;
/// - the rest are caller errors.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A transport-level error (serial port, TCP socket, Telnet session).
    #[error("transport error: {0}")]
    Transport(String),

    /// An underlying I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The connection to the instrument was lost unexpectedly.
    #[error("connection lost")]
    ConnectionLost,

    /// Timed out waiting for a response or for more bytes.
    #[error("timeout waiting for response")]
    Timeout,

    /// A protocol-level error (malformed frame, impossible header).
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The command socket answered with something that is neither an
    /// acknowledgement nor a known failure sentinel.
    #[error("unexpected response to command '{command}': {raw:?}")]
    UnexpectedResponse {
        /// The command the response was matched against.
        command: String,
        /// The raw response line.
        raw: String,
    },

    /// A line from the motion firmware matched none of the known patterns.
    #[error("unrecognized response: {0:?}")]
    UnrecognizedResponse(String),

    /// The command socket reported `$UNKNOWN COMMAND`.
    #[error("unknown command: {0}")]
    UnknownCommand(String),

    /// The command socket reported `$WRONG PARAMETER`.
    #[error("wrong parameter in command: {0}")]
    WrongParameter(String),

    /// The device reported a coded error.
    #[error("device error {code}: {description}")]
    Device {
        /// Numeric error code as sent by the device.
        code: u16,
        /// Description from the static error table.
        description: &'static str,
    },

    /// The device raised a coded alarm.
    #[error("device alarm {code}: {description}")]
    Alarm {
        /// Numeric alarm code as sent by the device.
        code: u16,
        /// Description from the static alarm table.
        description: &'static str,
    },

    /// A numeric error or alarm code is missing from the lookup table.
    #[error("unknown {table} code {code}")]
    UnknownCode {
        /// Which table was consulted (`"error"` or `"alarm"`).
        table: &'static str,
        /// The code that could not be resolved.
        code: u16,
    },

    /// A requested channel is not advertised by the device.
    #[error(
        "channel {requested} requested but device streams only {available} channel(s)"
    )]
    InsufficientChannels {
        /// Highest requested channel index (0-based).
        requested: usize,
        /// Number of active channels advertised in the packet header.
        available: usize,
    },

    /// An invalid parameter was passed to an operation.
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    /// No connection to the instrument has been established.
    #[error("not connected")]
    NotConnected,

    /// `connect` was called on an engine that is not disconnected.
    #[error("already connected")]
    AlreadyConnected,

    /// A response-expecting request was issued while another one is still
    /// waiting for its answer.
    #[error("another request is awaiting its response")]
    RequestInFlight,
}

/// A convenience `Result` alias using [`Error`] as the error type.
pub type Result<T> = std::result::Result<T, Error>;
