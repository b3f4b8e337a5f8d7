//! labio-test-harness: mock transports and servers for testing labio.
//!
//! This crate provides [`MockTransport`] and [`MockConnector`] for
//! deterministic unit testing of the I/O engine and instrument sessions
//! without hardware, and [`MockTcpServer`] for exercising the socket
//! transports end to end.

pub mod mock_tcp;
pub mod mock_transport;

pub use mock_tcp::MockTcpServer;
pub use mock_transport::{MockConnector, MockTransport};
