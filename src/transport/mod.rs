//! Hardware transports
//!
//! A [`Transport`] is the byte-level link to the test rig. It knows how to open and close
//! the link and how to exchange one line-framed frame in each direction; it knows nothing
//! about the meaning of the bytes (that is [`crate::protocol`]).
//!
//! # Variants
//!
//! - [`SerialTransport`] - RS-232 / USB-serial via tokio-serial (feature `serial`)
//! - [`NetworkTransport`] - TCP stream, same framing
//! - [`SimulatedTransport`] - in-process device model for simulation and tests
//!
//! Use [`create_transport`] to build one from a configuration string.
//!
//! # Contract
//!
//! - `connect` may be called repeatedly; any previous handle is released first
//! - `disconnect` always succeeds, even if the link was never opened
//! - `receive` never waits longer than its timeout and returns an empty frame on timeout

pub mod line;
pub mod network;
pub mod serial;
pub mod simulated;

pub use line::{DynStream, LineChannel, StreamIo};
pub use network::NetworkTransport;
pub use serial::SerialTransport;
pub use simulated::{SimulatedHandle, SimulatedTransport, SimulationProfile};

use crate::error::TransportError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

/// Transport shared between the controller and in-flight exchanges.
///
/// The async mutex makes one command and its response a single atomic exchange.
pub type SharedTransport = Arc<Mutex<Box<dyn Transport>>>;

/// Wrap a boxed transport for sharing.
pub fn share(transport: Box<dyn Transport>) -> SharedTransport {
    Arc::new(Mutex::new(transport))
}

/// Which transport implementation to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    #[default]
    Serial,
    Network,
    Simulated,
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            TransportKind::Serial => "serial",
            TransportKind::Network => "network",
            TransportKind::Simulated => "simulated",
        };
        f.write_str(label)
    }
}

impl FromStr for TransportKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "serial" | "usb" => Ok(TransportKind::Serial),
            "network" | "ethernet" | "tcp" => Ok(TransportKind::Network),
            "simulated" | "sim" | "mock" => Ok(TransportKind::Simulated),
            other => Err(format!(
                "Unknown transport '{}'. Must be one of: serial, network, simulated",
                other
            )),
        }
    }
}

/// Byte-level command/response link.
#[async_trait]
pub trait Transport: Send {
    /// Which variant this is.
    fn kind(&self) -> TransportKind;

    /// Open the link. `rate` is the baud rate for serial links and ignored otherwise.
    async fn connect(&mut self, address: &str, rate: u32) -> Result<(), TransportError>;

    /// Close the link and release its resources.
    async fn disconnect(&mut self) -> Result<(), TransportError>;

    /// Write one complete frame (terminator included).
    async fn send(&mut self, frame: &[u8]) -> Result<(), TransportError>;

    /// Read one frame, without its terminator.
    ///
    /// Returns an empty vector if nothing arrived within `timeout`.
    async fn receive(&mut self, timeout: Duration) -> Result<Vec<u8>, TransportError>;

    fn is_connected(&self) -> bool;
}

/// Build a transport for the given kind.
///
/// `connect_timeout` bounds how long opening a network link may take.
pub fn create_transport(kind: TransportKind, connect_timeout: Duration) -> Box<dyn Transport> {
    match kind {
        TransportKind::Serial => Box::new(SerialTransport::new()),
        TransportKind::Network => Box::new(NetworkTransport::new().with_connect_timeout(connect_timeout)),
        TransportKind::Simulated => Box::new(SimulatedTransport::new()),
    }
}
