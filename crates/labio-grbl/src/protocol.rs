//! grbl line classification.
//!
//! Every line the firmware prints falls into one of a fixed set of shapes.
//! [`classify`] tries them in priority order and the first match wins:
//!
//! | Kind          | Example                                   |
//! |---------------|-------------------------------------------|
//! | `Ok`          | `ok`                                      |
//! | `Error`       | `error:3`                                 |
//! | `Welcome`     | `Grbl 1.1h ['$' for help]`                |
//! | `Alarm`       | `ALARM:1`                                 |
//! | `Setting`     | `$100=250.000`                            |
//! | `Startup`     | `$N0=G20`                                 |
//! | `Message`     | `[MSG:Reset to continue]`                 |
//! | `StartupExec` | `>G54G20:ok`                              |
//! | `Status`      | `<Idle\|MPos:0.000,0.000,0.000\|FS:0,0>`   |
//! | `Empty`       | (blank line)                              |
//!
//! A line matching none of them is [`Error::UnrecognizedResponse`].

use std::sync::LazyLock;

use labio_core::error::{Error, Result};
use regex::Regex;

use crate::codes;

/// Category of one firmware line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    Ok,
    Error,
    Welcome,
    Alarm,
    Setting,
    Startup,
    Message,
    StartupExec,
    Status,
    Empty,
}

impl MessageKind {
    /// Whether this kind ends a request cycle.
    pub fn is_terminal(self) -> bool {
        matches!(self, MessageKind::Ok | MessageKind::Error | MessageKind::Alarm)
    }
}

/// A classified line with its capture groups.
///
/// Groups per kind:
///
/// - `Error`, `Alarm`: `[code]`
/// - `Welcome`: `[version]`
/// - `Setting`, `Startup`: `[id, value]`
/// - `Message`: `[tag, text]`
/// - `StartupExec`: `[line, result]`
/// - `Status`: `[state, position kind, coordinates, extra fields]`
/// - `Ok`, `Empty`: none
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub kind: MessageKind,
    pub groups: Vec<String>,
}

impl Message {
    /// Capture group `index`, or `""` if absent.
    pub fn group(&self, index: usize) -> &str {
        self.groups.get(index).map(String::as_str).unwrap_or("")
    }

    /// Numeric code of an `Error` or `Alarm` line.
    pub fn code(&self) -> Result<u16> {
        match self.kind {
            MessageKind::Error | MessageKind::Alarm => self
                .group(0)
                .parse()
                .map_err(|_| Error::Protocol(format!("code out of range: {:?}", self.group(0)))),
            _ => Err(Error::Protocol(format!("{:?} line carries no code", self.kind))),
        }
    }

    /// The failure an `Error` or `Alarm` line stands for, if any.
    pub fn to_error(&self) -> Option<Error> {
        let code = match self.kind {
            MessageKind::Error | MessageKind::Alarm => match self.code() {
                Ok(code) => code,
                Err(e) => return Some(e),
            },
            _ => return None,
        };
        Some(match self.kind {
            MessageKind::Alarm => codes::device_alarm(code),
            _ => codes::device_error(code),
        })
    }
}

/// Patterns in priority order.
const PATTERNS: &[(MessageKind, &str)] = &[
    (MessageKind::Ok, r"^ok$"),
    (MessageKind::Error, r"^error:(\d+)$"),
    (MessageKind::Welcome, r"^Grbl (\S+) \['\$' for help\]$"),
    (MessageKind::Alarm, r"^ALARM:(\d+)$"),
    (MessageKind::Setting, r"^\$(\d+)=(.*)$"),
    (MessageKind::Startup, r"^\$N(\d+)=(.*)$"),
    (MessageKind::Message, r"^\[([A-Za-z]+):(.*)\]$"),
    (MessageKind::StartupExec, r"^>(.*):(ok|error:\d+)$"),
    (
        MessageKind::Status,
        r"^<([A-Za-z]+(?::\d+)?)\|(MPos|WPos):([-+0-9.,]+)((?:\|[^|>]*)*)>$",
    ),
    (MessageKind::Empty, r"^$"),
];

static TABLE: LazyLock<Vec<(MessageKind, Regex)>> = LazyLock::new(|| {
    PATTERNS
        .iter()
        .filter_map(|&(kind, pattern)| match Regex::new(pattern) {
            Ok(re) => Some((kind, re)),
            Err(e) => {
                tracing::error!(?kind, error = %e, "invalid grbl pattern");
                None
            }
        })
        .collect()
});

/// Classify one line. Trailing CR/LF is ignored.
///
/// # Errors
///
/// [`Error::UnrecognizedResponse`] if no pattern matches.
pub fn classify(line: &str) -> Result<Message> {
    let line = line.trim_end_matches(['\r', '\n']);

    for (kind, re) in TABLE.iter() {
        if let Some(caps) = re.captures(line) {
            let groups = caps
                .iter()
                .skip(1)
                .map(|m| m.map(|m| m.as_str().to_string()).unwrap_or_default())
                .collect();
            return Ok(Message {
                kind: *kind,
                groups,
            });
        }
    }

    Err(Error::UnrecognizedResponse(line.to_string()))
}

/// Single-byte commands grbl acts on immediately, without a line ending.
pub const REALTIME_COMMANDS: &[u8] = b"?!~\x18";

/// Encode a command for the wire.
///
/// Real-time commands go out as their single byte; everything else gets a
/// `\n`. Embedded CR/LF is removed.
pub fn encode_command(command: &str) -> Vec<u8> {
    let bytes = command.as_bytes();
    if bytes.len() == 1 && REALTIME_COMMANDS.contains(&bytes[0]) {
        return bytes.to_vec();
    }

    let mut out: Vec<u8> = bytes
        .iter()
        .copied()
        .filter(|b| !matches!(b, b'\r' | b'\n'))
        .collect();
    out.push(b'\n');
    out
}

/// Which coordinate system a status report's position is in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PositionKind {
    /// `MPos`: machine coordinates.
    Machine,
    /// `WPos`: work coordinates.
    Work,
}

/// A decoded `<...>` status report.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusReport {
    /// Machine state without sub-state, e.g. `Idle`, `Run`, `Hold`.
    pub state: String,
    /// Sub-state code for `Hold:<n>` and `Door:<n>`.
    pub sub_state: Option<u8>,
    pub position_kind: PositionKind,
    /// One value per axis.
    pub position: Vec<f64>,
    /// Remaining `name:value` fields (`FS`, `Bf`, `WCO`, `Ov`, ...), in order.
    pub fields: Vec<(String, String)>,
}

impl StatusReport {
    /// Decode a classified status line.
    pub fn from_message(message: &Message) -> Result<Self> {
        if message.kind != MessageKind::Status {
            return Err(Error::Protocol(format!(
                "expected a status report, got {:?}",
                message.kind
            )));
        }

        let (state, sub_state) = match message.group(0).split_once(':') {
            Some((state, sub)) => {
                let sub = sub
                    .parse()
                    .map_err(|_| Error::Protocol(format!("bad sub-state: {:?}", sub)))?;
                (state.to_string(), Some(sub))
            }
            None => (message.group(0).to_string(), None),
        };

        let position_kind = match message.group(1) {
            "WPos" => PositionKind::Work,
            _ => PositionKind::Machine,
        };

        let position = message
            .group(2)
            .split(',')
            .map(|v| {
                v.parse::<f64>()
                    .map_err(|_| Error::Protocol(format!("bad coordinate: {:?}", v)))
            })
            .collect::<Result<Vec<_>>>()?;

        let fields = message
            .group(3)
            .split('|')
            .filter(|f| !f.is_empty())
            .map(|f| match f.split_once(':') {
                Some((name, value)) => (name.to_string(), value.to_string()),
                None => (f.to_string(), String::new()),
            })
            .collect();

        Ok(StatusReport {
            state,
            sub_state,
            position_kind,
            position,
            fields,
        })
    }

    /// Whether the machine reports `Idle` (case-insensitive).
    pub fn is_idle(&self) -> bool {
        self.state.eq_ignore_ascii_case("idle")
    }

    /// Value of the extra field `name`, if reported.
    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kind(line: &str) -> MessageKind {
        classify(line).unwrap().kind
    }

    #[test]
    fn all_patterns_compile() {
        assert_eq!(TABLE.len(), PATTERNS.len());
    }

    #[test]
    fn classifies_each_kind() {
        assert_eq!(kind("ok"), MessageKind::Ok);
        assert_eq!(kind("error:22"), MessageKind::Error);
        assert_eq!(kind("Grbl 1.1h ['$' for help]"), MessageKind::Welcome);
        assert_eq!(kind("ALARM:2"), MessageKind::Alarm);
        assert_eq!(kind("$110=500.000"), MessageKind::Setting);
        assert_eq!(kind("$N0=G20G54"), MessageKind::Startup);
        assert_eq!(kind("[MSG:Reset to continue]"), MessageKind::Message);
        assert_eq!(kind(">G54G20:ok"), MessageKind::StartupExec);
        assert_eq!(kind("<Idle|MPos:0.000,0.000,0.000|FS:0,0>"), MessageKind::Status);
        assert_eq!(kind(""), MessageKind::Empty);
    }

    #[test]
    fn line_endings_are_stripped() {
        assert_eq!(kind("ok\r\n"), MessageKind::Ok);
        assert_eq!(kind("\r"), MessageKind::Empty);
    }

    #[test]
    fn groups_are_captured() {
        let msg = classify("$100=250.000").unwrap();
        assert_eq!(msg.groups, vec!["100", "250.000"]);

        let msg = classify("Grbl 1.1f ['$' for help]").unwrap();
        assert_eq!(msg.group(0), "1.1f");

        let msg = classify("[GC:G0 G54 G17 G21 G90 G94 M5 M9 T0 F0 S0]").unwrap();
        assert_eq!(msg.group(0), "GC");
        assert_eq!(msg.group(1), "G0 G54 G17 G21 G90 G94 M5 M9 T0 F0 S0");

        let msg = classify(">G1X5:error:22").unwrap();
        assert_eq!(msg.groups, vec!["G1X5", "error:22"]);
    }

    #[test]
    fn startup_line_is_not_a_setting() {
        // `$N0=` must not be taken for a numbered setting.
        assert_eq!(kind("$N1="), MessageKind::Startup);
    }

    #[test]
    fn unrecognized_line_fails() {
        match classify("Hello world") {
            Err(Error::UnrecognizedResponse(line)) => assert_eq!(line, "Hello world"),
            other => panic!("expected UnrecognizedResponse, got {:?}", other),
        }
        assert!(classify("error:").is_err());
        assert!(classify("<Idle>").is_err());
    }

    #[test]
    fn error_line_maps_to_device_error() {
        let msg = classify("error:3").unwrap();
        assert_eq!(msg.code().unwrap(), 3);
        match msg.to_error() {
            Some(Error::Device { code, description }) => {
                assert_eq!(code, 3);
                assert_eq!(description, codes::error_description(3).unwrap());
            }
            other => panic!("expected Device, got {:?}", other),
        }
    }

    #[test]
    fn alarm_line_maps_to_alarm() {
        let msg = classify("ALARM:9").unwrap();
        assert!(matches!(msg.to_error(), Some(Error::Alarm { code: 9, .. })));
    }

    #[test]
    fn unknown_error_code_fails_loudly() {
        let msg = classify("error:99").unwrap();
        assert!(matches!(
            msg.to_error(),
            Some(Error::UnknownCode { table: "error", code: 99 })
        ));
        let msg = classify("error:70000").unwrap();
        assert!(matches!(msg.to_error(), Some(Error::Protocol(_))));
    }

    #[test]
    fn non_failure_has_no_error() {
        assert!(classify("ok").unwrap().to_error().is_none());
        assert!(classify("ok").unwrap().code().is_err());
    }

    #[test]
    fn terminal_kinds() {
        assert!(MessageKind::Ok.is_terminal());
        assert!(MessageKind::Error.is_terminal());
        assert!(MessageKind::Alarm.is_terminal());
        assert!(!MessageKind::Status.is_terminal());
        assert!(!MessageKind::Setting.is_terminal());
    }

    #[test]
    fn status_report_fields() {
        let msg = classify("<Run|MPos:-1.500,2.000,0.000|FS:500,0|WCO:0.000,0.000,0.000>").unwrap();
        let report = StatusReport::from_message(&msg).unwrap();
        assert_eq!(report.state, "Run");
        assert_eq!(report.sub_state, None);
        assert_eq!(report.position_kind, PositionKind::Machine);
        assert_eq!(report.position, vec![-1.5, 2.0, 0.0]);
        assert_eq!(report.field("FS"), Some("500,0"));
        assert_eq!(report.field("WCO"), Some("0.000,0.000,0.000"));
        assert_eq!(report.field("Ov"), None);
        assert!(!report.is_idle());
    }

    #[test]
    fn status_report_with_sub_state_and_work_position() {
        let msg = classify("<Hold:0|WPos:10.000,0.000,5.250>").unwrap();
        let report = StatusReport::from_message(&msg).unwrap();
        assert_eq!(report.state, "Hold");
        assert_eq!(report.sub_state, Some(0));
        assert_eq!(report.position_kind, PositionKind::Work);
        assert!(report.fields.is_empty());

        let msg = classify("<Door:1|MPos:0.000,0.000,0.000|Pn:D>").unwrap();
        let report = StatusReport::from_message(&msg).unwrap();
        assert_eq!(report.state, "Door");
        assert_eq!(report.sub_state, Some(1));
        assert_eq!(report.field("Pn"), Some("D"));
    }

    #[test]
    fn idle_is_case_insensitive() {
        for line in ["<Idle|MPos:0,0,0>", "<IDLE|MPos:0,0,0>", "<idle|MPos:0,0,0>"] {
            let report = StatusReport::from_message(&classify(line).unwrap()).unwrap();
            assert!(report.is_idle(), "{}", line);
        }
    }

    #[test]
    fn status_report_requires_status_kind() {
        let msg = classify("ok").unwrap();
        assert!(matches!(
            StatusReport::from_message(&msg),
            Err(Error::Protocol(_))
        ));
    }

    #[test]
    fn bad_coordinate_is_protocol_error() {
        let msg = classify("<Idle|MPos:1..0,2>").unwrap();
        assert!(matches!(
            StatusReport::from_message(&msg),
            Err(Error::Protocol(_))
        ));
    }

    #[test]
    fn encode_realtime_and_line_commands() {
        assert_eq!(encode_command("?"), b"?");
        assert_eq!(encode_command("!"), b"!");
        assert_eq!(encode_command("$$"), b"$$\n");
        assert_eq!(encode_command("G0 X10\r\n"), b"G0 X10\n");
        assert_eq!(encode_command("$H"), b"$H\n");
    }
}
