//! # labio -- Asynchronous I/O for Laboratory Instruments
//!
//! `labio` talks to bench instruments over serial ports, Telnet and raw TCP.
//! It was built for automated scanning measurements: a grbl-driven XY stage
//! positions a capacitive displacement sensor whose controller streams
//! samples over the network, while a SCPI data logger records the
//! temperature.
//!
//! ## Quick Start
//!
//! ```toml
//! [dependencies]
//! labio = "0.1"
//! tokio = { version = "1", features = ["full"] }
//! ```
//!
//! Home the stage, move it, then read a block of samples:
//!
//! ```no_run
//! use labio::capacitive::CapacitiveBuilder;
//! use labio::grbl::{GrblBuilder, MoveMode, DEFAULT_POLL_INTERVAL};
//!
//! #[tokio::main]
//! async fn main() -> labio::Result<()> {
//!     let mut stage = GrblBuilder::new().serial_port("/dev/ttyACM0").build()?;
//!     stage.connect().await?;
//!     stage.home().await?;
//!     stage.move_to(10.0, 20.0, MoveMode::Absolute).await?;
//!     stage.wait_until_idle(DEFAULT_POLL_INTERVAL).await?;
//!
//!     let sensor = CapacitiveBuilder::new().host("192.168.254.173");
//!     let mut data = sensor.build_data()?;
//!     data.connect().await?;
//!     let samples = data.read_samples(1000, &[0]).await?;
//!     println!("{} samples", samples.len());
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! | Crate               | Purpose                                          |
//! |---------------------|--------------------------------------------------|
//! | `labio-core`        | [`Transport`] / [`Connector`] traits, [`Error`]  |
//! | `labio-transport`   | Serial, Telnet and TCP transports                |
//! | `labio-engine`      | [`IoEngine`](engine::IoEngine): input/output loops and FIFOs |
//! | `labio-capacitive`  | `$cmd` line protocol and binary sample stream    |
//! | `labio-grbl`        | grbl line classifier, request cycle, status polling |
//! | `labio-scpi`        | SCPI data logger: thermocouple monitoring, display text |
//! | **`labio`**         | This facade crate -- re-exports everything       |
//!
//! ## Feature Flags
//!
//! | Feature      | Enables                        | Default |
//! |--------------|--------------------------------|---------|
//! | `capacitive` | [`capacitive`] module          | yes     |
//! | `grbl`       | [`grbl`] module                | yes     |
//! | `scpi`       | [`scpi`] module                | yes     |

pub use labio_core::*;

/// Transports and their connectors.
pub mod transport {
    pub use labio_transport::*;
}

/// The I/O engine and its framing.
pub mod engine {
    pub use labio_engine::*;
}

/// Capacitive displacement controller backend.
///
/// Provides [`ControlChannel`](capacitive::ControlChannel) for the Telnet
/// command port and [`DataChannel`](capacitive::DataChannel) for the binary
/// sample stream, both built by
/// [`CapacitiveBuilder`](capacitive::CapacitiveBuilder).
#[cfg(feature = "capacitive")]
pub mod capacitive {
    pub use labio_capacitive::*;
}

/// grbl motion controller backend.
///
/// Provides [`GrblSession`](grbl::GrblSession) and
/// [`GrblBuilder`](grbl::GrblBuilder).
#[cfg(feature = "grbl")]
pub mod grbl {
    pub use labio_grbl::*;
}

/// SCPI data logger backend.
///
/// Provides [`DataLogger`](scpi::DataLogger) and
/// [`DataLoggerBuilder`](scpi::DataLoggerBuilder).
#[cfg(feature = "scpi")]
pub mod scpi {
    pub use labio_scpi::*;
}
