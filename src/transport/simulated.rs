//! Simulated transport
//!
//! In-process stand-in for a test rig. It answers the line protocol with synthetic replies
//! and can be scripted from tests through a [`SimulatedHandle`]:
//! - Queued replies, silence (timeout) and peer hang-ups
//! - One-shot connect failures and counted send failures
//! - Per-device failure mode
//! - Log of every command sent
//!
//! Unscripted `TEST` commands produce a measurement around the profile's nominal value with
//! bounded noise; it passes when within the transport's tolerance (the controller uses
//! `measurement_tolerance`), and fails outright with the profile's failure probability.

use super::{Transport, TransportKind};
use crate::error::TransportError;
use crate::protocol::{CALIBRATION_OK, SEPARATOR};
use async_trait::async_trait;
use parking_lot::Mutex;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Pass band used until [`SimulatedTransport::with_tolerance`] says otherwise.
pub const DEFAULT_TOLERANCE: f64 = 0.1;

/// Behaviour of the synthetic device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationProfile {
    /// Value a healthy device reports.
    pub nominal_value: f64,
    pub unit: String,
    /// Half-width of the uniform noise added to each measurement.
    pub noise: f64,
    /// Chance that a measurement fails outright.
    pub failure_probability: f64,
    /// Delay applied to connect and to each reply.
    pub latency_ms: u64,
}

impl Default for SimulationProfile {
    fn default() -> Self {
        Self {
            nominal_value: 5.0,
            unit: "V".to_string(),
            noise: 0.05,
            failure_probability: 0.1,
            latency_ms: 10,
        }
    }
}

impl SimulationProfile {
    /// Profile that always reports exactly `nominal_value` and always passes.
    pub fn ideal(nominal_value: f64, unit: impl Into<String>) -> Self {
        Self {
            nominal_value,
            unit: unit.into(),
            noise: 0.0,
            failure_probability: 0.0,
            latency_ms: 0,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if !self.nominal_value.is_finite() {
            return Err("simulation.nominal_value must be finite".to_string());
        }
        if !(self.noise.is_finite() && self.noise >= 0.0) {
            return Err("simulation.noise must be a non-negative number".to_string());
        }
        if !(0.0..=1.0).contains(&self.failure_probability) {
            return Err(format!(
                "simulation.failure_probability must be within [0, 1], got {}",
                self.failure_probability
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
enum Reply {
    Line(Vec<u8>),
    Silence,
    Hangup,
}

#[derive(Debug)]
struct SimState {
    profile: SimulationProfile,
    /// Maximum deviation from nominal that still passes.
    tolerance: f64,
    connected: bool,
    address: String,
    scripted: VecDeque<Reply>,
    pending: Option<Reply>,
    sent: Vec<String>,
    fail_next_connect: bool,
    failing_sends: u32,
    failing_devices: HashSet<String>,
}

impl SimState {
    fn new(profile: SimulationProfile) -> Self {
        Self {
            profile,
            tolerance: DEFAULT_TOLERANCE,
            connected: false,
            address: String::new(),
            scripted: VecDeque::new(),
            pending: None,
            sent: Vec::new(),
            fail_next_connect: false,
            failing_sends: 0,
            failing_devices: HashSet::new(),
        }
    }

    fn synthesize(&self, command: &str) -> Reply {
        let mut tokens = command.split(SEPARATOR);
        let line = match tokens.next().unwrap_or_default() {
            "TEST" => self.measure(tokens.next().unwrap_or_default()),
            "CALIBRATE" => CALIBRATION_OK.to_string(),
            "STATUS" => "STATUS:READY:OK".to_string(),
            _ => "ERR:UNKNOWN_COMMAND".to_string(),
        };
        Reply::Line(line.into_bytes())
    }

    fn measure(&self, device_id: &str) -> String {
        let p = &self.profile;
        let mut rng = rand::thread_rng();

        let broken = self.failing_devices.contains(device_id);
        if broken || rng.gen::<f64>() < p.failure_probability {
            let value = rng.gen_range(-1.0..10.0);
            return format!("RESULT:{:.4}:{}:FAIL", value, p.unit);
        }

        let noise = if p.noise > 0.0 {
            rng.gen_range(-p.noise..=p.noise)
        } else {
            0.0
        };
        let value = p.nominal_value + noise;
        let verdict = if (value - p.nominal_value).abs() <= self.tolerance {
            "PASS"
        } else {
            "FAIL"
        };
        format!("RESULT:{:.4}:{}:{}", value, p.unit, verdict)
    }
}

/// Test-side control over a [`SimulatedTransport`], usable after the transport has been
/// handed to a controller.
#[derive(Debug, Clone)]
pub struct SimulatedHandle {
    state: Arc<Mutex<SimState>>,
}

impl SimulatedHandle {
    /// Queue a reply line for the next command (terminator optional).
    pub fn push_response(&self, line: impl AsRef<[u8]>) {
        let mut bytes = line.as_ref().to_vec();
        while bytes.last().is_some_and(|b| b.is_ascii_whitespace()) {
            bytes.pop();
        }
        self.state.lock().scripted.push_back(Reply::Line(bytes));
    }

    /// The next command gets no reply; the read times out.
    pub fn push_silence(&self) {
        self.state.lock().scripted.push_back(Reply::Silence);
    }

    /// The peer closes the link instead of replying to the next command.
    pub fn push_hangup(&self) {
        self.state.lock().scripted.push_back(Reply::Hangup);
    }

    /// Make the next `connect` fail.
    pub fn fail_next_connect(&self) {
        self.state.lock().fail_next_connect = true;
    }

    /// Make the next `count` sends fail.
    pub fn fail_next_sends(&self, count: u32) {
        self.state.lock().failing_sends = count;
    }

    /// Force every measurement from `device_id` to fail.
    pub fn set_device_failure(&self, device_id: &str, failing: bool) {
        let mut state = self.state.lock();
        if failing {
            state.failing_devices.insert(device_id.to_string());
        } else {
            state.failing_devices.remove(device_id);
        }
    }

    pub fn set_profile(&self, profile: SimulationProfile) {
        self.state.lock().profile = profile;
    }

    pub fn set_tolerance(&self, tolerance: f64) {
        self.state.lock().tolerance = tolerance;
    }

    /// Every command received so far, without terminators.
    pub fn sent_commands(&self) -> Vec<String> {
        self.state.lock().sent.clone()
    }

    pub fn clear_sent(&self) {
        self.state.lock().sent.clear();
    }

    pub fn is_connected(&self) -> bool {
        self.state.lock().connected
    }

    /// Address passed to the most recent `connect`.
    pub fn address(&self) -> String {
        self.state.lock().address.clone()
    }
}

/// Simulated transport
///
/// # Example
///
/// ```
/// use mechatest::transport::{SimulatedTransport, Transport};
/// use std::time::Duration;
///
/// # tokio_test::block_on(async {
/// let mut sim = SimulatedTransport::new();
/// let handle = sim.handle();
/// handle.push_response("RESULT:4.98:V:PASS");
///
/// sim.connect("sim0", 0).await.unwrap();
/// sim.send(b"TEST:D1\n").await.unwrap();
/// let reply = sim.receive(Duration::from_millis(100)).await.unwrap();
/// assert_eq!(reply, b"RESULT:4.98:V:PASS");
/// assert_eq!(handle.sent_commands(), vec!["TEST:D1"]);
/// # })
/// ```
pub struct SimulatedTransport {
    state: Arc<Mutex<SimState>>,
}

impl SimulatedTransport {
    pub fn new() -> Self {
        Self::with_profile(SimulationProfile::default())
    }

    pub fn with_profile(profile: SimulationProfile) -> Self {
        Self {
            state: Arc::new(Mutex::new(SimState::new(profile))),
        }
    }

    /// Maximum deviation from nominal that still passes.
    pub fn with_tolerance(self, tolerance: f64) -> Self {
        self.state.lock().tolerance = tolerance;
        self
    }

    pub fn handle(&self) -> SimulatedHandle {
        SimulatedHandle {
            state: Arc::clone(&self.state),
        }
    }

    fn latency(&self) -> Duration {
        Duration::from_millis(self.state.lock().profile.latency_ms)
    }
}

impl Default for SimulatedTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for SimulatedTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Simulated
    }

    async fn connect(&mut self, address: &str, _rate: u32) -> Result<(), TransportError> {
        {
            let mut state = self.state.lock();
            state.connected = false;
            state.pending = None;
            state.address = address.to_string();
            if std::mem::take(&mut state.fail_next_connect) {
                return Err(TransportError::ConnectionFailed(format!(
                    "simulated device at '{}' unreachable",
                    address
                )));
            }
        }

        tokio::time::sleep(self.latency()).await;
        self.state.lock().connected = true;
        debug!(%address, "Simulated device connected");
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<(), TransportError> {
        let mut state = self.state.lock();
        state.connected = false;
        state.pending = None;
        Ok(())
    }

    async fn send(&mut self, frame: &[u8]) -> Result<(), TransportError> {
        let mut state = self.state.lock();
        if !state.connected {
            return Err(TransportError::NotConnected);
        }
        if state.failing_sends > 0 {
            state.failing_sends -= 1;
            return Err(TransportError::SendFailed(
                "simulated write failure".to_string(),
            ));
        }

        let command = String::from_utf8_lossy(frame).trim_end().to_string();
        let reply = match state.scripted.pop_front() {
            Some(reply) => reply,
            None => state.synthesize(&command),
        };
        debug!(%command, "Simulated device received");
        state.sent.push(command);
        state.pending = Some(reply);
        Ok(())
    }

    async fn receive(&mut self, timeout: Duration) -> Result<Vec<u8>, TransportError> {
        let reply = {
            let mut state = self.state.lock();
            if !state.connected {
                return Err(TransportError::NotConnected);
            }
            state.pending.take()
        };

        match reply {
            Some(Reply::Line(bytes)) => {
                let latency = self.latency();
                if latency >= timeout {
                    tokio::time::sleep(timeout).await;
                    return Ok(Vec::new());
                }
                tokio::time::sleep(latency).await;
                Ok(bytes)
            }
            Some(Reply::Hangup) => {
                self.state.lock().connected = false;
                Err(TransportError::ConnectionClosed)
            }
            Some(Reply::Silence) | None => {
                tokio::time::sleep(timeout).await;
                Ok(Vec::new())
            }
        }
    }

    fn is_connected(&self) -> bool {
        self.state.lock().connected
    }
}
