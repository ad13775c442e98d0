//! Equipment health metrics.
//!
//! A snapshot is a name → value map with a stable key set ([`METRIC_KEYS`]). Values come
//! from a [`MetricsSource`]; the controller supplies uptime and test counters through
//! [`MetricsContext`] so `UptimeHours` and `ErrorRate` reflect the real session.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

/// Metric name → value, ordered by name.
pub type HealthMetrics = BTreeMap<String, f64>;

pub const TEMPERATURE: &str = "Temperature";
pub const VIBRATION: &str = "Vibration";
pub const POWER_CONSUMPTION: &str = "PowerConsumption";
pub const UPTIME_HOURS: &str = "UptimeHours";
pub const ERROR_RATE: &str = "ErrorRate";

/// Keys present in every snapshot.
pub const METRIC_KEYS: [&str; 5] = [
    TEMPERATURE,
    VIBRATION,
    POWER_CONSUMPTION,
    UPTIME_HOURS,
    ERROR_RATE,
];

const BASE_TEMPERATURE_C: f64 = 23.5;
const BASE_VIBRATION_G: f64 = 0.02;
const BASE_POWER_W: f64 = 125.3;
const BASE_ERROR_RATE: f64 = 0.001;

/// Which built-in source to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricsMode {
    /// Baselines with bounded random jitter
    #[default]
    Simulated,
    /// Baselines only
    Baseline,
}

/// Session figures the controller passes to a source.
#[derive(Debug, Clone, Copy, Default)]
pub struct MetricsContext {
    pub uptime: Duration,
    pub tests_run: u64,
    pub tests_failed: u64,
}

impl MetricsContext {
    pub fn uptime_hours(&self) -> f64 {
        self.uptime.as_secs_f64() / 3600.0
    }

    /// Failed fraction of tests run, or the nominal rate before any test.
    pub fn error_rate(&self) -> f64 {
        if self.tests_run == 0 {
            BASE_ERROR_RATE
        } else {
            self.tests_failed as f64 / self.tests_run as f64
        }
    }
}

/// Produces health snapshots. Must be cheap and must not block.
pub trait MetricsSource: Send + Sync {
    fn sample(&self, ctx: &MetricsContext) -> HealthMetrics;
}

/// Build the source for a configured mode.
pub fn source_for(mode: MetricsMode) -> Box<dyn MetricsSource> {
    match mode {
        MetricsMode::Simulated => Box::new(SimulatedMetrics),
        MetricsMode::Baseline => Box::new(BaselineMetrics),
    }
}

fn snapshot(temperature: f64, vibration: f64, power: f64, ctx: &MetricsContext) -> HealthMetrics {
    [
        (TEMPERATURE, temperature),
        (VIBRATION, vibration),
        (POWER_CONSUMPTION, power),
        (UPTIME_HOURS, ctx.uptime_hours()),
        (ERROR_RATE, ctx.error_rate()),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v))
    .collect()
}

/// Deterministic baselines.
#[derive(Debug, Clone, Copy, Default)]
pub struct BaselineMetrics;

impl MetricsSource for BaselineMetrics {
    fn sample(&self, ctx: &MetricsContext) -> HealthMetrics {
        snapshot(BASE_TEMPERATURE_C, BASE_VIBRATION_G, BASE_POWER_W, ctx)
    }
}

/// Baselines with uniform jitter: ±1 °C, ±50 % vibration, ±5 W. Never negative.
#[derive(Debug, Clone, Copy, Default)]
pub struct SimulatedMetrics;

impl MetricsSource for SimulatedMetrics {
    fn sample(&self, ctx: &MetricsContext) -> HealthMetrics {
        let mut rng = rand::thread_rng();
        let temperature = BASE_TEMPERATURE_C + rng.gen_range(-1.0..=1.0);
        let vibration = BASE_VIBRATION_G * rng.gen_range(0.5..=1.5);
        let power = BASE_POWER_W + rng.gen_range(-5.0..=5.0);
        snapshot(temperature.max(0.0), vibration.max(0.0), power.max(0.0), ctx)
    }
}

/// Returns the same snapshot every time, ignoring the context.
#[derive(Debug, Clone, Default)]
pub struct FixedMetrics(pub HealthMetrics);

impl MetricsSource for FixedMetrics {
    fn sample(&self, _ctx: &MetricsContext) -> HealthMetrics {
        self.0.clone()
    }
}
