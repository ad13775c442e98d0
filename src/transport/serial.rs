//! Serial transport for RS-232 / USB-serial rigs
//!
//! Protocol settings: 8N1, no flow control, newline-framed responses.
//! Opening the port runs on the blocking pool so a slow driver cannot stall the runtime.
//!
//! Requires the `serial` feature (enabled by default). Without it, `connect` fails with
//! [`TransportError::FeatureNotEnabled`] and the controller falls back to simulation mode.

use super::line::{DynStream, LineChannel};
use super::{Transport, TransportKind};
use crate::error::TransportError;
use async_trait::async_trait;
use std::time::Duration;
use tracing::{debug, info};

/// Serial transport
pub struct SerialTransport {
    /// Port path of the current or last connection attempt (e.g. "/dev/ttyUSB0", "COM3")
    port_name: String,
    baud_rate: u32,
    channel: Option<LineChannel>,
}

impl SerialTransport {
    pub fn new() -> Self {
        Self {
            port_name: String::new(),
            baud_rate: 0,
            channel: None,
        }
    }

    /// Attach an already-open stream, bypassing `connect`.
    ///
    /// Useful for pseudo-terminals and for tests driven by `tokio::io::duplex`.
    pub fn with_stream(stream: DynStream, label: impl Into<String>) -> Self {
        let label = label.into();
        Self {
            port_name: label.clone(),
            baud_rate: 0,
            channel: Some(LineChannel::new(stream, label)),
        }
    }

    pub fn port_name(&self) -> &str {
        &self.port_name
    }

    async fn release(&mut self) {
        if let Some(channel) = self.channel.take() {
            channel.close().await;
            debug!(port = %self.port_name, "Serial port closed");
        }
    }
}

impl Default for SerialTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(feature = "serial")]
async fn open_serial_async(
    port_path: &str,
    baud_rate: u32,
) -> Result<tokio_serial::SerialStream, TransportError> {
    use tokio_serial::SerialPortBuilderExt;

    let path = port_path.to_string();
    tokio::task::spawn_blocking(move || {
        tokio_serial::new(&path, baud_rate)
            .data_bits(tokio_serial::DataBits::Eight)
            .parity(tokio_serial::Parity::None)
            .stop_bits(tokio_serial::StopBits::One)
            .flow_control(tokio_serial::FlowControl::None)
            .open_native_async()
            .map_err(|e| {
                TransportError::ConnectionFailed(format!(
                    "Failed to open serial port '{}' at {} baud: {}",
                    path, baud_rate, e
                ))
            })
    })
    .await
    .map_err(|e| TransportError::ConnectionFailed(format!("serial open task failed: {}", e)))?
}

#[async_trait]
impl Transport for SerialTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Serial
    }

    async fn connect(&mut self, address: &str, rate: u32) -> Result<(), TransportError> {
        self.release().await;
        self.port_name = address.to_string();
        self.baud_rate = rate;

        if address.trim().is_empty() {
            return Err(TransportError::InvalidAddress(address.to_string()));
        }
        if rate == 0 {
            return Err(TransportError::ConnectionFailed(
                "baud rate must be non-zero".to_string(),
            ));
        }

        #[cfg(feature = "serial")]
        {
            let port = open_serial_async(address, rate).await?;
            self.channel = Some(LineChannel::new(Box::new(port), address));
            info!(port = %address, baud = rate, "Serial port opened");
            Ok(())
        }

        #[cfg(not(feature = "serial"))]
        {
            Err(TransportError::FeatureNotEnabled("serial".to_string()))
        }
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
