//! Test and calibration exchanges
//!
//! Sequences one command/response exchange on top of a shared transport and the codec, and
//! turns every outcome into a structured value. Nothing here touches equipment status; the
//! controller decides whether an exchange may run and what it means for the lifecycle.
//!
//! The transport mutex is held from the first send attempt until the response (or the
//! timeout), so concurrent callers never interleave commands and replies. Waiting for the
//! mutex counts against the same response deadline, so a queued call is never slower than
//! its own timeout.

use crate::error::TransportError;
use crate::protocol::{self, Command, DecodeError, DeviceStatus, Measurement};
use crate::transport::SharedTransport;
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, warn};

pub const NOTE_NOT_RUNNING: &str = "Equipment not in running state";
pub const NOTE_NOT_CONNECTED: &str = "Hardware not connected";
pub const NOTE_SEND_FAILED: &str = "Failed to send test command";
pub const NOTE_NO_RESPONSE: &str = "No response from device";
pub const NOTE_COMPLETED: &str = "Test completed successfully";
pub const NOTE_LINK_BUSY: &str = "Device busy: link held by another exchange";

/// Outcome of one `run_test` call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestResult {
    /// Unique per invocation, e.g. `TEST_20240131142501123_7`
    pub test_id: String,
    pub device_id: String,
    pub passed: bool,
    pub measurement_value: f64,
    pub units: String,
    pub timestamp: DateTime<Local>,
    pub notes: String,
}

impl TestResult {
    /// A failed result with no measurement.
    pub fn failure(
        test_id: impl Into<String>,
        device_id: impl Into<String>,
        notes: impl Into<String>,
    ) -> Self {
        Self {
            test_id: test_id.into(),
            device_id: device_id.into(),
            passed: false,
            measurement_value: 0.0,
            units: String::new(),
            timestamp: Local::now(),
            notes: notes.into(),
        }
    }

    /// A result carrying a decoded measurement and the device's verdict.
    pub fn from_measurement(
        test_id: impl Into<String>,
        device_id: impl Into<String>,
        measurement: Measurement,
    ) -> Self {
        Self {
            test_id: test_id.into(),
            device_id: device_id.into(),
            passed: measurement.passed(),
            measurement_value: measurement.value,
            units: measurement.unit,
            timestamp: Local::now(),
            notes: NOTE_COMPLETED.to_string(),
        }
    }
}

/// Time-derived, per-controller unique test ids.
#[derive(Debug, Default)]
pub struct TestIdGenerator {
    seq: AtomicU64,
}

impl TestIdGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_id(&self) -> String {
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        format!("TEST_{}_{}", Local::now().format("%Y%m%d%H%M%S%3f"), seq)
    }
}

/// Timeout and retry policy for one exchange.
#[derive(Debug, Clone, Copy)]
pub struct ExchangeSettings {
    pub response_timeout: Duration,
    /// Additional send attempts after the first failure
    pub max_retries: u32,
}

/// Where an exchange broke down.
#[derive(Debug, Error)]
pub enum ExchangeError {
    /// Another exchange held the link for the whole response window
    #[error("link busy for {0:?}")]
    Busy(Duration),
    /// The command never reached the device
    #[error("send failed: {0}")]
    Send(TransportError),
    /// The command went out but reading the reply failed
    #[error("receive failed: {0}")]
    Receive(TransportError),
}

/// Send `command` and wait for one reply frame. An empty frame means timeout.
///
/// The whole call, including the wait for the link, is bounded by
/// `settings.response_timeout`.
pub async fn exchange(
    transport: &SharedTransport,
    command: &Command,
    settings: ExchangeSettings,
) -> Result<Vec<u8>, ExchangeError> {
    let frame = command.encode();
    let deadline = Instant::now() + settings.response_timeout;
    let mut link = tokio::time::timeout_at(deadline, transport.lock())
        .await
        .map_err(|_| ExchangeError::Busy(settings.response_timeout))?;

    if !link.is_connected() {
        return Err(ExchangeError::Send(TransportError::NotConnected));
    }

    let mut attempt = 0;
    loop {
        match link.send(&frame).await {
            Ok(()) => break,
            Err(e) if e.is_retryable() && attempt < settings.max_retries => {
                attempt += 1;
                warn!(
                    command = %command,
                    attempt,
                    max = settings.max_retries,
                    error = %e,
                    "Send failed, retrying"
                );
            }
            Err(e) => return Err(ExchangeError::Send(e)),
        }
    }

    let remaining = deadline.saturating_duration_since(Instant::now());
    let reply = link
        .receive(remaining)
        .await
        .map_err(ExchangeError::Receive)?;
    debug!(command = %command, reply = %String::from_utf8_lossy(&reply), "Exchange complete");
    Ok(reply)
}

/// Run `TEST:<device>[:<param>]*` and classify the reply.
pub async fn execute_test(
    transport: &SharedTransport,
    test_id: String,
    device_id: &str,
    params: &[String],
    settings: ExchangeSettings,
) -> TestResult {
    let command = Command::test(device_id, params.iter().cloned());
    if let Err(e) = command.validate() {
        return TestResult::failure(test_id, device_id, format!("Invalid test command: {}", e));
    }

    let reply = match exchange(transport, &command, settings).await {
        Ok(reply) => reply,
        Err(ExchangeError::Send(TransportError::NotConnected)) => {
            return TestResult::failure(test_id, device_id, NOTE_NOT_CONNECTED);
        }
        Err(ExchangeError::Busy(_)) => {
            return TestResult::failure(test_id, device_id, NOTE_LINK_BUSY);
        }
        Err(ExchangeError::Send(e)) => {
            return TestResult::failure(test_id, device_id, format!("{}: {}", NOTE_SEND_FAILED, e));
        }
        Err(ExchangeError::Receive(e)) => {
            return TestResult::failure(test_id, device_id, format!("Communication error: {}", e));
        }
    };

    match protocol::decode_measurement(&reply) {
        Ok(measurement) => TestResult::from_measurement(test_id, device_id, measurement),
        Err(DecodeError::Empty) => TestResult::failure(test_id, device_id, NOTE_NO_RESPONSE),
        Err(DecodeError::Malformed { raw, .. }) => {
            TestResult::failure(test_id, device_id, format!("Invalid response format: {}", raw))
        }
    }
}

/// Send `CALIBRATE` and wait for `CAL_OK`. The error is the human-readable reason.
pub async fn execute_calibration(
    transport: &SharedTransport,
    settings: ExchangeSettings,
) -> Result<(), String> {
    let reply = exchange(transport, &Command::calibrate(), settings)
        .await
        .map_err(|e| match e {
            ExchangeError::Send(TransportError::NotConnected) => {
                format!("Calibration failed: {}", NOTE_NOT_CONNECTED)
            }
            ExchangeError::Busy(_) => format!("Calibration failed: {}", NOTE_LINK_BUSY),
            other => format!("Calibration failed: {}", other),
        })?;

    if protocol::is_calibration_ok(&reply) {
        Ok(())
    } else if reply.is_empty() {
        Err(format!("Calibration failed: {}", NOTE_NO_RESPONSE))
    } else {
        Err(format!(
            "Calibration failed: unexpected response '{}'",
            String::from_utf8_lossy(&reply)
        ))
    }
}

/// Send `STATUS` and decode the reply.
pub async fn query_status(
    transport: &SharedTransport,
    settings: ExchangeSettings,
) -> Result<DeviceStatus, String> {
    let reply = exchange(transport, &Command::status(), settings)
        .await
        .map_err(|e| match e {
            ExchangeError::Send(TransportError::NotConnected) => NOTE_NOT_CONNECTED.to_string(),
            ExchangeError::Busy(_) => NOTE_LINK_BUSY.to_string(),
            other => format!("Status query failed: {}", other),
        })?;

    protocol::decode_status(&reply).map_err(|e| match e {
        DecodeError::Empty => NOTE_NO_RESPONSE.to_string(),
        other => other.to_string(),
    })
}
