//! labio-core: error type and transport traits shared by every labio crate.
//!
//! Protocol crates and the I/O engine depend only on these abstractions, so
//! they can be exercised against the mocks in `labio-test-harness` without
//! any instrument attached.
//!
//! # Key types
//!
//! - [`Transport`] -- byte-level communication channel
//! - [`Connector`] -- opens a [`Transport`] to one endpoint
//! - [`Error`] / [`Result`] -- error handling

pub mod error;
pub mod transport;

pub use error::{Error, Result};
pub use transport::{Connector, Transport};
