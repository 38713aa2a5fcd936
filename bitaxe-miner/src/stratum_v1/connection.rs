//! TCP connection management with line-delimited I/O.
//!
//! Stratum v1 uses newline-delimited JSON over TCP. [`Connection`] frames the
//! stream with a [`LinesCodec`], which buffers partial reads until a newline
//! arrives and keeps whatever follows it for the next call. The [`Transport`]
//! trait abstracts line I/O, allowing channel-based mocks for deterministic
//! testing.

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_util::codec::{Framed, LinesCodec};
use tracing::{debug, trace};

use super::error::{StratumError, StratumResult};

/// Longest line accepted from a pool.
pub const MAX_LINE_LENGTH: usize = 1024 * 1024;

/// Line-level I/O for Stratum protocol.
///
/// Lines are exchanged without their terminating newline.
#[async_trait]
pub trait Transport: Send {
    /// Read one complete, non-empty line.
    ///
    /// Returns `None` on clean connection close (EOF).
    async fn read_line(&mut self) -> StratumResult<Option<String>>;

    /// Write one line, appending the newline.
    async fn write_line(&mut self, line: &str) -> StratumResult<()>;
}

/// Line-framed TCP connection to a pool.
pub struct Connection {
    framed: Framed<TcpStream, LinesCodec>,
}

impl Connection {
    pub fn new(stream: TcpStream) -> Self {
        Self {
            framed: Framed::new(stream, LinesCodec::new_with_max_length(MAX_LINE_LENGTH)),
        }
    }

    /// Connect to a Stratum pool.
    ///
    /// `host` may carry a `stratum+tcp://` or `tcp://` scheme, which is
    /// ignored.
    pub async fn connect(host: &str, port: u16) -> StratumResult<Self> {
        let host = host
            .strip_prefix("stratum+tcp://")
            .or_else(|| host.strip_prefix("tcp://"))
            .unwrap_or(host);

        debug!(host, port, "Connecting to pool");

        let stream = TcpStream::connect((host, port))
            .await
            .map_err(|e| StratumError::ConnectionFailed(format!("{host}:{port}: {e}")))?;

        debug!("Connected to pool");

        Ok(Self::new(stream))
    }
}

#[async_trait]
impl Transport for Connection {
    async fn read_line(&mut self) -> StratumResult<Option<String>> {
        while let Some(line) = self.framed.next().await {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            trace!(rx = %line, "Received line");
            return Ok(Some(line));
        }
        Ok(None)
    }

    async fn write_line(&mut self, line: &str) -> StratumResult<()> {
        trace!(tx = %line, "Sending line");
        self.framed.send(line).await?;
        Ok(())
    }
}

/// Channel-based transport for deterministic testing.
///
/// Backed by tokio mpsc channels rather than TCP, so it works with
/// `tokio::time::pause()` without triggering auto-advance on real I/O.
/// Create a pair with [`MockTransport::pair()`]; the transport is the
/// client's side, the handle is the test's side. Dropping the handle reads
/// as EOF.
#[cfg(test)]
pub(crate) struct MockTransport {
    rx: tokio::sync::mpsc::UnboundedReceiver<String>,
    tx: tokio::sync::mpsc::UnboundedSender<String>,
}

/// Test-side handle for a [`MockTransport`].
#[cfg(test)]
pub(crate) struct MockTransportHandle {
    tx: tokio::sync::mpsc::UnboundedSender<String>,
    rx: tokio::sync::mpsc::UnboundedReceiver<String>,
}

#[cfg(test)]
impl MockTransport {
    /// Create a linked (transport, handle) pair.
    pub fn pair() -> (Self, MockTransportHandle) {
        let (client_tx, handle_rx) = tokio::sync::mpsc::unbounded_channel();
        let (handle_tx, client_rx) = tokio::sync::mpsc::unbounded_channel();

        let transport = MockTransport {
            rx: client_rx,
            tx: client_tx,
        };
        let handle = MockTransportHandle {
            tx: handle_tx,
            rx: handle_rx,
        };
        (transport, handle)
    }
}

#[cfg(test)]
#[async_trait]
impl Transport for MockTransport {
    async fn read_line(&mut self) -> StratumResult<Option<String>> {
        Ok(self.rx.recv().await)
    }

    async fn write_line(&mut self, line: &str) -> StratumResult<()> {
        self.tx
            .send(line.to_string())
            .map_err(|_| StratumError::Disconnected)
    }
}

#[cfg(test)]
impl MockTransportHandle {
    /// Send a line to the client.
    pub fn send(&self, line: impl Into<String>) {
        self.tx.send(line.into()).expect("transport dropped");
    }

    /// Receive a line the client wrote, parsed as JSON.
    pub async fn recv(&mut self) -> serde_json::Value {
        let line = self.rx.recv().await.expect("transport dropped");
        serde_json::from_str(&line).expect("client wrote invalid JSON")
    }
}
