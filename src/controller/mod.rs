//! Equipment Controller
//!
//! Owns the equipment status, the transport handle and the subscriber list, and is the only
//! entry point collaborators use. All operations take `&self`; wrap the controller in an
//! `Arc` to share it between tasks.
//!
//! # Locking
//!
//! - `shared` (`parking_lot::Mutex`): status, last error, configuration, transport handle.
//!   Held only for checks and mutations, never across an `.await`.
//! - `gate` (`tokio::sync::Mutex`): serializes "commit status + notify subscribers", so
//!   subscribers see changes in commit order. Callbacks run with `shared` released and may
//!   call [`EquipmentController::status`].
//! - The transport's own async mutex makes a command and its reply one exchange.
//!
//! # Example
//!
//! ```
//! use mechatest::config::EquipmentConfig;
//! use mechatest::controller::{EquipmentController, EquipmentStatus};
//! use mechatest::transport::{SimulatedTransport, SimulationProfile};
//!
//! # tokio_test::block_on(async {
//! let controller = EquipmentController::new();
//! let sim = SimulatedTransport::with_profile(SimulationProfile::ideal(5.0, "V"));
//!
//! assert!(controller.initialize_with_transport(EquipmentConfig::simulated(), Box::new(sim)).await);
//! assert!(controller.start().await);
//!
//! let result = controller.run_test("D1", &["voltage", "5.0"]).await;
//! assert!(result.passed);
//! assert_eq!(controller.status(), EquipmentStatus::Running);
//! # })
//! ```

pub mod notifier;
pub mod state;

pub use notifier::{StatusCallback, SubscriptionId};
pub use state::{EquipmentStatus, Operation, TransitionError};

use crate::config::EquipmentConfig;
use crate::health::{self, HealthMetrics, MetricsContext, MetricsMode, MetricsSource};
use crate::orchestrator::{self, ExchangeSettings, TestIdGenerator, TestResult, NOTE_NOT_CONNECTED};
use crate::protocol::DeviceStatus;
use crate::transport::{self, SharedTransport, SimulatedTransport, Transport, TransportKind};
use notifier::Notifier;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, instrument, warn};

/// Message delivered with the status change that ends a successful `initialize`.
pub const MSG_INITIALIZED: &str = "Equipment initialized successfully";
/// Message delivered when `initialize` falls back to simulation mode.
pub const MSG_INITIALIZED_SIMULATION: &str = "Equipment initialized (simulation mode)";

struct Shared {
    status: EquipmentStatus,
    last_error: String,
    config: EquipmentConfig,
    link: Option<SharedTransport>,
    simulation: bool,
    metrics: Arc<dyn MetricsSource>,
    metrics_injected: bool,
    started_at: Instant,
    /// Bumped on every entry into `Maintenance`; a calibration only commits its own.
    calibration_epoch: u64,
}

impl Shared {
    fn refuse(&mut self, err: TransitionError) {
        debug!(operation = %err.operation, from = %err.from, reason = %err.reason, "Operation refused");
        self.last_error = err.reason;
    }

    fn test_settings(&self) -> ExchangeSettings {
        ExchangeSettings {
            response_timeout: self.config.timeouts.test_response(),
            max_retries: self.config.max_retry_attempts,
        }
    }

    fn calibration_settings(&self) -> ExchangeSettings {
        ExchangeSettings {
            response_timeout: self.config.timeouts.calibration_response(),
            max_retries: self.config.max_retry_attempts,
        }
    }

    fn status_settings(&self) -> ExchangeSettings {
        ExchangeSettings {
            response_timeout: self.config.timeouts.status_query(),
            max_retries: self.config.max_retry_attempts,
        }
    }
}

#[derive(Debug, Default)]
struct TestCounters {
    run: AtomicU64,
    failed: AtomicU64,
}

impl TestCounters {
    fn record(&self, passed: bool) {
        self.run.fetch_add(1, Ordering::Relaxed);
        if !passed {
            self.failed.fetch_add(1, Ordering::Relaxed);
        }
    }
}

/// Finite-state controller for one piece of test equipment.
pub struct EquipmentController {
    shared: Mutex<Shared>,
    gate: tokio::sync::Mutex<()>,
    notifier: Notifier,
    ids: TestIdGenerator,
    counters: TestCounters,
}

impl Default for EquipmentController {
    fn default() -> Self {
        Self::new()
    }
}

impl EquipmentController {
    /// A controller in `Idle` with no transport.
    pub fn new() -> Self {
        Self {
            shared: Mutex::new(Shared {
                status: EquipmentStatus::Idle,
                last_error: String::new(),
                config: EquipmentConfig::default(),
                link: None,
                simulation: false,
                metrics: Arc::from(health::source_for(MetricsMode::default())),
                metrics_injected: false,
                started_at: Instant::now(),
                calibration_epoch: 0,
            }),
            gate: tokio::sync::Mutex::new(()),
            notifier: Notifier::new(),
            ids: TestIdGenerator::new(),
            counters: TestCounters::default(),
        }
    }

    /// Use `source` for health metrics regardless of the configured mode.
    pub fn with_metrics_source(self, source: impl MetricsSource + 'static) -> Self {
        {
            let mut shared = self.shared.lock();
            shared.metrics = Arc::new(source);
            shared.metrics_injected = true;
        }
        self
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Build the configured transport and connect it.
    ///
    /// Always leaves the status `Idle`. Returns `false` when the device could not be reached;
    /// the controller then runs in simulation mode and `last_error` says why.
    pub async fn initialize(&self, config: EquipmentConfig) -> bool {
        let transport: Box<dyn Transport> = match config.transport {
            TransportKind::Simulated => Box::new(
                SimulatedTransport::with_profile(config.simulation.clone())
                    .with_tolerance(config.measurement_tolerance),
            ),
            kind => transport::create_transport(kind, config.timeouts.connect()),
        };
        self.initialize_with_transport(config, transport).await
    }

    /// Like [`initialize`](Self::initialize), with a caller-supplied transport.
    #[instrument(skip_all, fields(transport = %transport.kind(), port = %config.device_port))]
    pub async fn initialize_with_transport(
        &self,
        config: EquipmentConfig,
        mut transport: Box<dyn Transport>,
    ) -> bool {
        let _gate = self.gate.lock().await;

        let previous = self.shared.lock().link.take();
        if let Some(previous) = previous {
            release(previous).await;
        }

        let connected = match config.validate() {
            Err(reason) => Err(format!("Invalid configuration: {}", reason)),
            Ok(()) => {
                let attempt = transport.connect(&config.device_port, config.baud_rate);
                match tokio::time::timeout(config.timeouts.connect(), attempt).await {
                    Ok(Ok(())) => Ok(()),
                    Ok(Err(e)) => Err(format!(
                        "Failed to connect to device on port {}: {}",
                        config.device_port, e
                    )),
                    Err(_) => Err(format!(
                        "Failed to connect to device on port {}: timed out after {:?}",
                        config.device_port,
                        config.timeouts.connect()
                    )),
                }
            }
        };

        let ok = connected.is_ok();
        {
            let mut shared = self.shared.lock();
            if !shared.metrics_injected {
                let mode = if ok { config.metrics } else { MetricsMode::Simulated };
                shared.metrics = Arc::from(health::source_for(mode));
            }
            shared.config = config;
            shared.started_at = Instant::now();
            match connected {
                Ok(()) => {
                    shared.link = Some(transport::share(transport));
                    shared.simulation = false;
                    shared.last_error.clear();
                }
                Err(reason) => {
                    warn!(%reason, "Hardware unavailable, continuing in simulation mode");
                    shared.link = None;
                    shared.simulation = true;
                    shared.last_error = reason;
                }
            }
        }

        let message = if ok {
            MSG_INITIALIZED
        } else {
            MSG_INITIALIZED_SIMULATION
        };
        self.commit(EquipmentStatus::Idle, message);
        ok
    }

    /// Disconnect the transport. Waits for an in-flight exchange to finish first.
    pub async fn shutdown(&self) {
        let link = self.shared.lock().link.take();
        if let Some(link) = link {
            release(link).await;
            info!("Hardware disconnected");
        }
    }

    // =========================================================================
    // Transitions
    // =========================================================================

    /// `Idle`/`Paused` to `Running`.
    pub async fn start(&self) -> bool {
        self.transition(Operation::Start, "Equipment started").await
    }

    /// Return to `Idle` from any status. Already `Idle` is a silent success.
    pub async fn stop(&self) -> bool {
        let _gate = self.gate.lock().await;
        if self.shared.lock().status == EquipmentStatus::Idle {
            return true;
        }
        self.commit(EquipmentStatus::Idle, "Equipment stopped");
        true
    }

    /// `Running` to `Paused`.
    pub async fn pause(&self) -> bool {
        self.transition(Operation::Pause, "Equipment paused").await
    }

    /// `Paused` to `Running`.
    pub async fn resume(&self) -> bool {
        self.transition(Operation::Resume, "Equipment resumed").await
    }

    async fn transition(&self, operation: Operation, message: &str) -> bool {
        let _gate = self.gate.lock().await;
        let target = {
            let mut shared = self.shared.lock();
            match shared.status.apply(operation) {
                Ok(target) => target,
                Err(err) => {
                    shared.refuse(err);
                    return false;
                }
            }
        };
        self.commit(target, message);
        true
    }

    /// Write the status and notify. The caller holds `gate`.
    fn commit(&self, status: EquipmentStatus, message: &str) {
        let previous = std::mem::replace(&mut self.shared.lock().status, status);
        info!(from = %previous, to = %status, "{}", message);
        self.notifier.notify(status, message);
    }

    // =========================================================================
    // Test and calibration
    // =========================================================================

    /// Run one device test. Only legal while `Running`; never fails, the outcome is in the
    /// returned result.
    #[instrument(skip(self, params))]
    pub async fn run_test<S>(&self, device_id: &str, params: &[S]) -> TestResult
    where
        S: AsRef<str> + Sync,
    {
        let test_id = self.ids.next_id();

        let (link, settings) = {
            let mut shared = self.shared.lock();
            if let Err(err) = shared.status.apply(Operation::RunTest) {
                let note = err.reason.clone();
                shared.refuse(err);
                return TestResult::failure(test_id, device_id, note);
            }
            (shared.link.clone(), shared.test_settings())
        };

        let result = match link {
            Some(link) => {
                let params: Vec<String> = params.iter().map(|p| p.as_ref().to_string()).collect();
                orchestrator::execute_test(&link, test_id, device_id, &params, settings).await
            }
            None => TestResult::failure(test_id, device_id, NOTE_NOT_CONNECTED),
        };

        self.counters.record(result.passed);
        if result.passed {
            info!(test_id = %result.test_id, value = result.measurement_value, units = %result.units, "Test passed");
        } else {
            warn!(test_id = %result.test_id, notes = %result.notes, "Test failed");
        }
        result
    }

    /// Calibrate the rig. Only legal while `Idle`.
    ///
    /// Moves to `Maintenance`, waits for the rig to settle, then expects `CAL_OK`. Ends in
    /// `Idle` on success and `Error` otherwise. If another caller changed the status in the
    /// meantime (e.g. `stop`), returns `false` and leaves that status alone.
    #[instrument(skip(self))]
    pub async fn calibrate(&self) -> bool {
        let epoch = {
            let _gate = self.gate.lock().await;
            let (target, epoch) = {
                let mut shared = self.shared.lock();
                match shared.status.apply(Operation::Calibrate) {
                    Ok(target) => {
                        shared.calibration_epoch += 1;
                        (target, shared.calibration_epoch)
                    }
                    Err(err) => {
                        shared.refuse(err);
                        return false;
                    }
                }
            };
            self.commit(target, "Calibration in progress");
            epoch
        };

        let (link, settle, settings) = {
            let shared = self.shared.lock();
            (
                shared.link.clone(),
                shared.config.timeouts.calibration_settle(),
                shared.calibration_settings(),
            )
        };

        let outcome = match link {
            Some(link) => {
                tokio::time::sleep(settle).await;
                if self.calibration_current(epoch) {
                    orchestrator::execute_calibration(&link, settings).await
                } else {
                    Err("Calibration abandoned before CALIBRATE was sent".to_string())
                }
            }
            None => Err(format!("Calibration failed: {}", NOTE_NOT_CONNECTED)),
        };

        let _gate = self.gate.lock().await;
        let outcome = {
            let mut shared = self.shared.lock();
            if shared.status != EquipmentStatus::Maintenance {
                shared.last_error = format!(
                    "Calibration interrupted: status changed to {}",
                    shared.status
                );
                warn!(status = %shared.status, "Calibration result discarded");
                return false;
            }
            if shared.calibration_epoch != epoch {
                shared.last_error =
                    "Calibration interrupted: superseded by a newer calibration".to_string();
                warn!(epoch, current = shared.calibration_epoch, "Calibration result discarded");
                return false;
            }
            if let Err(reason) = &outcome {
                shared.last_error = reason.clone();
            }
            outcome
        };

        match outcome {
            Ok(()) => {
                self.commit(EquipmentStatus::Idle, "Calibration completed successfully");
                true
            }
            Err(_) => {
                self.commit(EquipmentStatus::Error, "Calibration failed");
                false
            }
        }
    }

    /// Whether the calibration that entered `Maintenance` as `epoch` still owns it.
    fn calibration_current(&self, epoch: u64) -> bool {
        let shared = self.shared.lock();
        shared.status == EquipmentStatus::Maintenance && shared.calibration_epoch == epoch
    }

    /// Ask the device for its own status. Refused during calibration.
    pub async fn query_device_status(&self) -> Option<DeviceStatus> {
        let (link, settings) = {
            let mut shared = self.shared.lock();
            if let Err(err) = shared.status.apply(Operation::QueryStatus) {
                shared.refuse(err);
                return None;
            }
            (shared.link.clone(), shared.status_settings())
        };

        let outcome = match link {
            Some(link) => orchestrator::query_status(&link, settings).await,
            None => Err(NOTE_NOT_CONNECTED.to_string()),
        };

        match outcome {
            Ok(status) => Some(status),
            Err(reason) => {
                warn!(%reason, "Device status query failed");
                self.shared.lock().last_error = reason;
                None
            }
        }
    }

    // =========================================================================
    // Queries
    // =========================================================================

    /// Current equipment status.
    pub fn status(&self) -> EquipmentStatus {
        self.shared.lock().status
    }

    /// Reason for the most recent refused or failed operation; empty if none.
    pub fn last_error(&self) -> String {
        self.shared.lock().last_error.clone()
    }

    /// `true` after an `initialize` that could not reach the hardware.
    pub fn is_simulation(&self) -> bool {
        self.shared.lock().simulation
    }

    /// Configuration passed to the latest `initialize`.
    pub fn config(&self) -> EquipmentConfig {
        self.shared.lock().config.clone()
    }

    /// Point-in-time health snapshot with every key of [`health::METRIC_KEYS`].
    pub fn health_metrics(&self) -> HealthMetrics {
        let (source, started_at) = {
            let shared = self.shared.lock();
            (Arc::clone(&shared.metrics), shared.started_at)
        };
        let ctx = MetricsContext {
            uptime: started_at.elapsed(),
            tests_run: self.counters.run.load(Ordering::Relaxed),
            tests_failed: self.counters.failed.load(Ordering::Relaxed),
        };
        source.sample(&ctx)
    }

    // =========================================================================
    // Subscribers
    // =========================================================================

    /// Register a callback for every committed status change.
    pub fn subscribe<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(EquipmentStatus, &str) + Send + Sync + 'static,
    {
        self.notifier.subscribe(Arc::new(callback))
    }

    /// Returns `false` if `id` was not subscribed.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.notifier.unsubscribe(id)
    }
}

async fn release(link: SharedTransport) {
    let mut transport = link.lock().await;
    if let Err(e) = transport.disconnect().await {
        warn!(error = %e, "Error while disconnecting transport");
    }
}
