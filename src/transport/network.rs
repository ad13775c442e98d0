//! Network transport for Ethernet-attached rigs
//!
//! Same newline framing as the serial transport, carried over a TCP stream.
//! The address is `host:port`; the rate argument of `connect` is ignored.

use super::line::LineChannel;
use super::{Transport, TransportKind};
use crate::error::TransportError;
use async_trait::async_trait;
use std::time::Duration;
use tokio::net::TcpStream;
use tracing::{debug, info};

const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(3);

/// TCP transport
pub struct NetworkTransport {
    connect_timeout: Duration,
    channel: Option<LineChannel>,
}

impl NetworkTransport {
    pub fn new() -> Self {
        Self {
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            channel: None,
        }
    }

    /// Bound the time spent establishing the connection.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    async fn release(&mut self) {
        if let Some(channel) = self.channel.take() {
            let peer = channel.peer().to_string();
            channel.close().await;
            debug!(%peer, "Network link closed");
        }
    }
}

impl Default for NetworkTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for NetworkTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Network
    }

    async fn connect(&mut self, address: &str, _rate: u32) -> Result<(), TransportError> {
        self.release().await;

        if !address.contains(':') {
            return Err(TransportError::InvalidAddress(format!(
                "{} (expected host:port)",
                address
            )));
        }

        let stream = tokio::time::timeout(self.connect_timeout, TcpStream::connect(address))
            .await
            .map_err(|_| {
                TransportError::ConnectionFailed(format!(
                    "Timed out connecting to {} after {:?}",
                    address, self.connect_timeout
                ))
            })?
            .map_err(|e| {
                TransportError::ConnectionFailed(format!("Failed to connect to {}: {}", address, e))
            })?;
        stream.set_nodelay(true)?;

        self.channel = Some(LineChannel::new(Box::new(stream), address));
        info!(%address, "Network link established");
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<(), TransportError> {
        self.release().await;
        Ok(())
    }

    async fn send(&mut self, frame: &[u8]) -> Result<(), TransportError> {
        let channel = self.channel.as_mut().ok_or(TransportError::NotConnected)?;
        channel.write_frame(frame).await
    }

    async fn receive(&mut self, timeout: Duration) -> Result<Vec<u8>, TransportError> {
        let channel = self.channel.as_mut().ok_or(TransportError::NotConnected)?;
        match channel.read_frame(timeout).await {
            Err(TransportError::ConnectionClosed) => {
                self.channel = None;
                Err(TransportError::ConnectionClosed)
            }
            other => other,
        }
    }

    fn is_connected(&self) -> bool {
        self.channel.is_some()
    }
}
