//! grbl motion controller protocol for labio.
//!
//! grbl is the G-code firmware found on Arduino-based XY stages. It speaks
//! a line-oriented text protocol over a USB serial port. This crate
//! provides:
//!
//! - **Code tables** ([`codes`]) -- grbl 1.1 error and alarm descriptions.
//! - **Line classifier** ([`protocol`]) -- pattern table that sorts every
//!   firmware line into a [`MessageKind`], plus status report decoding.
//! - **Session** ([`session`]) -- request cycles, status polling and the
//!   settings cache on top of an [`IoEngine`](labio_engine::IoEngine).
//! - **Builder** ([`builder`]) -- serial port and timeout configuration.
//!
//! # Example
//!
//! ```
//! use labio_grbl::protocol::{classify, MessageKind, StatusReport};
//!
//! let msg = classify("<Idle|MPos:10.000,5.000,0.000|FS:0,0>").unwrap();
//! assert_eq!(msg.kind, MessageKind::Status);
//!
//! let status = StatusReport::from_message(&msg).unwrap();
//! assert!(status.is_idle());
//! assert_eq!(status.position, vec![10.0, 5.0, 0.0]);
//! ```

pub mod builder;
pub mod codes;
pub mod protocol;
pub mod session;

pub use builder::GrblBuilder;
pub use codes::{alarm_description, error_description};
pub use protocol::{Message, MessageKind, PositionKind, StatusReport, classify};
pub use session::{
    DEFAULT_POLL_INTERVAL, DEFAULT_STARTUP_TIMEOUT, GrblSession, MoveMode, SessionConfig,
    Settings,
};
