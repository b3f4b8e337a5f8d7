//! Mock TCP server for socket-level testing.
//!
//! [`MockTcpServer`] is a localhost listener that plays a script against a
//! single client: wait for an exact request and answer it, push bytes
//! unprompted, pause, or hang up. It stands in for an instrument's Telnet
//! command port or binary data port without real hardware.
//!
//! # Example
//!
//! ```
//! use labio_test_harness::MockTcpServer;
//!
//! # async fn example() -> labio_core::Result<()> {
//! let mut server = MockTcpServer::new().await?;
//!
//! // When the client sends "$VER\r\n", respond with the echoed reply.
//! server.expect(b"$VER\r\n", b"$VER1.0OK\r\n");
//! server.start();
//!
//! let addr = server.addr().to_string();
//! // ... connect and test ...
//! # Ok(())
//! # }
//! ```

use labio_core::error::{Error, Result};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

/// One step of the server script.
#[derive(Debug, Clone)]
enum Step {
    /// Read exactly `request`, then write `response`.
    Expect { request: Vec<u8>, response: Vec<u8> },
    /// Write bytes without waiting for a request.
    Send(Vec<u8>),
    Pause(Duration),
    /// Drop the connection.
    HangUp,
}

/// A mock TCP server that accepts one connection and plays its script.
///
/// After the last step the server keeps the connection open until the
/// client closes it, unless the script ends with
/// [`hang_up`](MockTcpServer::hang_up).
pub struct MockTcpServer {
    addr: String,
    listener: Option<TcpListener>,
    steps: Vec<Step>,
    server_handle: Option<JoinHandle<std::result::Result<(), String>>>,
}

impl MockTcpServer {
    /// Create a new mock TCP server listening on a random port.
    ///
    /// The listener is bound immediately, so a client may connect before
    /// [`start`](MockTcpServer::start); the connection is accepted once the
    /// script runs.
    pub async fn new() -> Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .map_err(|e| Error::Transport(format!("failed to bind mock TCP server: {}", e)))?;
        let addr = listener.local_addr().map_err(Error::Io)?.to_string();

        Ok(Self {
            addr,
            listener: Some(listener),
            steps: Vec::new(),
            server_handle: None,
        })
    }

    /// Add an expected request/response pair.
    pub fn expect(&mut self, request: &[u8], response: &[u8]) -> &mut Self {
        self.steps.push(Step::Expect {
            request: request.to_vec(),
            response: response.to_vec(),
        });
        self
    }

    /// Write `data` to the client without waiting for a request.
    pub fn send(&mut self, data: &[u8]) -> &mut Self {
        self.steps.push(Step::Send(data.to_vec()));
        self
    }

    /// Write `data` in pieces of `chunk` bytes, pausing `gap` between them.
    pub fn send_chunked(&mut self, data: &[u8], chunk: usize, gap: Duration) -> &mut Self {
        for piece in data.chunks(chunk.max(1)) {
            self.steps.push(Step::Send(piece.to_vec()));
            self.steps.push(Step::Pause(gap));
        }
        self
    }

    pub fn pause(&mut self, duration: Duration) -> &mut Self {
        self.steps.push(Step::Pause(duration));
        self
    }

    /// Close the connection at this point of the script.
    pub fn hang_up(&mut self) -> &mut Self {
        self.steps.push(Step::HangUp);
        self
    }

    /// Address the server is listening on (e.g. `"127.0.0.1:54321"`).
    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// Port the server is listening on.
    pub fn port(&self) -> u16 {
        self.addr
            .rsplit(':')
            .next()
            .and_then(|p| p.parse().ok())
            .unwrap_or_default()
    }

    /// Spawn the script. Calling `start` twice has no effect.
    pub fn start(&mut self) {
        let Some(listener) = self.listener.take() else {
            return;
        };
        let steps = std::mem::take(&mut self.steps);

        self.server_handle = Some(tokio::spawn(async move {
            let (mut stream, _) = listener
                .accept()
                .await
                .map_err(|e| format!("failed to accept connection: {}", e))?;
            run_script(&mut stream, &steps).await
        }));
    }

    /// Wait for the server task to complete and return any errors.
    pub async fn wait(self) -> std::result::Result<(), String> {
        if let Some(handle) = self.server_handle {
            handle
                .await
                .map_err(|e| format!("server task panicked: {}", e))?
        } else {
            Ok(())
        }
    }
}

async fn run_script(stream: &mut TcpStream, steps: &[Step]) -> std::result::Result<(), String> {
    for (i, step) in steps.iter().enumerate() {
        match step {
            Step::Expect { request, response } => {
                let mut buf = vec![0u8; request.len()];
                stream.read_exact(&mut buf).await.map_err(|e| {
                    format!("step {}: client went away before sending request: {}", i, e)
                })?;
                if &buf != request {
                    return Err(format!(
                        "step {}: request mismatch: expected {:02X?}, got {:02X?}",
                        i, request, buf
                    ));
                }
                write(stream, response, i).await?;
            }
            Step::Send(data) => write(stream, data, i).await?,
            Step::Pause(duration) => tokio::time::sleep(*duration).await,
            Step::HangUp => return Ok(()),
        }
    }

    // Hold the connection until the client closes it.
    let mut sink = [0u8; 256];
    loop {
        match stream.read(&mut sink).await {
            Ok(0) | Err(_) => return Ok(()),
            Ok(_) => {}
        }
    }
}

async fn write(stream: &mut TcpStream, data: &[u8], step: usize) -> std::result::Result<(), String> {
    stream
        .write_all(data)
        .await
        .map_err(|e| format!("step {}: write error: {}", step, e))?;
    stream
        .flush()
        .await
        .map_err(|e| format!("step {}: flush error: {}", step, e))
}
