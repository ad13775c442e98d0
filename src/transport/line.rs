//! Line framing over any async byte stream
//!
//! Serial ports and TCP sockets both deliver an unstructured byte stream. [`LineChannel`]
//! turns such a stream into newline-delimited frames with a bounded read, and is shared by
//! the serial and network transports.
//!
//! Any type implementing `AsyncRead + AsyncWrite + Unpin + Send` can back a channel:
//! - `tokio_serial::SerialStream` (real hardware)
//! - `tokio::net::TcpStream` (Ethernet rigs)
//! - `tokio::io::DuplexStream` (testing)

use crate::error::TransportError;
use crate::protocol::LINE_TERMINATOR;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tracing::debug;

/// Trait alias for async stream I/O.
pub trait StreamIo: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> StreamIo for T {}

/// Type-erased boxed stream.
pub type DynStream = Box<dyn StreamIo>;

/// Newline-framed channel over a byte stream.
pub struct LineChannel {
    stream: BufReader<DynStream>,
    /// Bytes of the frame currently being read. Survives a cancelled `read_until`.
    partial: Vec<u8>,
    /// Peer description for log messages.
    peer: String,
}

impl LineChannel {
    pub fn new(stream: DynStream, peer: impl Into<String>) -> Self {
        Self {
            stream: BufReader::new(stream),
            partial: Vec::new(),
            peer: peer.into(),
        }
    }

    pub fn peer(&self) -> &str {
        &self.peer
    }

    /// Drop everything received but not yet consumed.
    ///
    /// Called before each write so a late reply to an earlier command cannot be mistaken
    /// for the reply to the next one.
    fn discard_stale(&mut self) {
        let buffered = self.stream.buffer().len();
        let stale = buffered + self.partial.len();
        if stale > 0 {
            debug!(peer = %self.peer, bytes = stale, "Discarding stale input");
        }
        self.stream.consume(buffered);
        self.partial.clear();
    }

    /// Write one complete frame and flush it.
    pub async fn write_frame(&mut self, frame: &[u8]) -> Result<(), TransportError> {
        self.discard_stale();

        let port = self.stream.get_mut();
        port.write_all(frame)
            .await
            .map_err(|e| TransportError::SendFailed(format!("write to {}: {}", self.peer, e)))?;
        port.flush()
            .await
            .map_err(|e| TransportError::SendFailed(format!("flush to {}: {}", self.peer, e)))?;

        debug!(peer = %self.peer, frame = %String::from_utf8_lossy(frame).trim_end(), "Sent");
        Ok(())
    }

    /// Read one frame, waiting at most `timeout`.
    ///
    /// The terminator and any trailing whitespace are stripped. On timeout the partially
    /// read line is discarded and an empty frame is returned.
    pub async fn read_frame(&mut self, timeout: Duration) -> Result<Vec<u8>, TransportError> {
        let read = self.stream.read_until(LINE_TERMINATOR, &mut self.partial);
        let outcome = tokio::time::timeout(timeout, read).await;

        match outcome {
            Err(_) => {
                if !self.partial.is_empty() {
                    debug!(
                        peer = %self.peer,
                        bytes = self.partial.len(),
                        "Timed out mid-line, discarding partial frame"
                    );
                    self.partial.clear();
                }
                debug!(peer = %self.peer, ?timeout, "No response");
                Ok(Vec::new())
            }
            Ok(Ok(0)) => Err(TransportError::ConnectionClosed),
            Ok(Ok(_)) => {
                let mut frame = std::mem::take(&mut self.partial);
                while frame.last().is_some_and(|b| b.is_ascii_whitespace()) {
                    frame.pop();
                }
                debug!(peer = %self.peer, frame = %String::from_utf8_lossy(&frame), "Received");
                Ok(frame)
            }
            Ok(Err(e)) => {
                self.partial.clear();
                Err(TransportError::Io(e))
            }
        }
    }

    /// Flush and shut down the write half.
    pub async fn close(mut self) {
        if let Err(e) = self.stream.get_mut().shutdown().await {
            debug!(peer = %self.peer, error = %e, "Error while closing stream");
        }
    }
}
