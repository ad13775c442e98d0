//! Custom error types for the controller.
//!
//! This module defines the crate-level error type, `ControllerError`, together with the
//! layer-specific errors it wraps. Using the `thiserror` crate, it provides a consistent way
//! to describe everything that can go wrong between the configuration file and the wire.
//!
//! ## Error Hierarchy
//!
//! - **`TransportError`**: connect/send/receive failures of a [`Transport`](crate::transport::Transport).
//!   Timeouts are *not* errors at this layer; `receive` returns an empty frame instead.
//! - **`DecodeError`** / **`EncodeError`**: codec failures (see [`crate::protocol`]).
//! - **`TransitionError`**: an operation that is illegal for the current
//!   [`EquipmentStatus`](crate::controller::EquipmentStatus).
//! - **`ControllerError`**: everything above plus configuration, I/O and JSON errors, used
//!   by collaborators such as config loading and suite files.
//!
//! The controller's public operations never return these errors directly. They are turned
//! into boolean results, `TestResult::notes` and the last-error string at the orchestrator
//! boundary, so a device fault can never take down the host process.

use thiserror::Error;

pub use crate::controller::state::TransitionError;
pub use crate::protocol::{DecodeError, EncodeError};

/// Convenience alias for results using the crate error type.
pub type AppResult<T> = std::result::Result<T, ControllerError>;

/// An error that can occur when interacting with a transport.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Not connected")]
    NotConnected,

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Send failed: {0}")]
    SendFailed(String),

    #[error("Connection closed by peer")]
    ConnectionClosed,

    #[error("Invalid address '{0}'")]
    InvalidAddress(String),

    #[error("Feature '{0}' is not enabled. Please build with --features {0}")]
    FeatureNotEnabled(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl TransportError {
    /// Whether retrying the same operation on the same link can succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, TransportError::SendFailed(_) | TransportError::Io(_))
    }
}

/// Crate-level error type.
#[derive(Error, Debug)]
pub enum ControllerError {
    #[error("Configuration error: {0}")]
    Config(#[from] Box<figment::Error>),

    #[error("Configuration validation error: {0}")]
    Configuration(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Protocol error: {0}")]
    Decode(#[from] DecodeError),

    #[error("Invalid command: {0}")]
    Encode(#[from] EncodeError),

    #[error("{0}")]
    Transition(#[from] TransitionError),

    #[error("Failed to initialize logging: {0}")]
    Logging(String),
}

impl From<figment::Error> for ControllerError {
    fn from(err: figment::Error) -> Self {
        ControllerError::Config(Box::new(err))
    }
}
