//! Test suites and batches
//!
//! A suite is a named list of tests loaded from JSON:
//!
//! ```json
//! {
//!   "name": "motor_acceptance",
//!   "description": "Incoming inspection for drive units",
//!   "tests": [
//!     { "name": "supply", "parameters": ["voltage", "5.0"], "expected_range": [4.9, 5.1], "critical": true },
//!     { "name": "idle_current", "parameters": ["current", "0.1"] }
//!   ]
//! }
//! ```
//!
//! Each test goes through [`EquipmentController::run_test`]. A passing measurement outside
//! `expected_range` is downgraded to a failure, and a failed `critical` test ends the suite
//! for that device. A batch runs one suite across several devices, one after another or with
//! a bounded number of devices in flight.

use crate::controller::EquipmentController;
use crate::error::AppResult;
use crate::orchestrator::TestResult;
use chrono::{DateTime, Local};
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{error, info};

fn default_test_name() -> String {
    "Unknown Test".to_string()
}

fn default_max_workers() -> usize {
    4
}

/// One test within a suite.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestCase {
    #[serde(default = "default_test_name")]
    pub name: String,
    /// Appended to `TEST:<device>` in order
    #[serde(default)]
    pub parameters: Vec<String>,
    /// Inclusive `[min, max]` the measurement must fall into
    #[serde(default)]
    pub expected_range: Option<(f64, f64)>,
    /// Stop the suite for this device if this test fails
    #[serde(default)]
    pub critical: bool,
}

/// Named, ordered list of tests.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestSuite {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub tests: Vec<TestCase>,
    /// Logged before the tests run
    #[serde(default)]
    pub setup_commands: Vec<String>,
    /// Logged after the tests run
    #[serde(default)]
    pub teardown_commands: Vec<String>,
}

impl TestSuite {
    pub fn from_json(json: &str) -> AppResult<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Load a suite from a JSON file.
    pub fn load<P: AsRef<Path>>(path: P) -> AppResult<Self> {
        let json = std::fs::read_to_string(path.as_ref())?;
        let suite = Self::from_json(&json)?;
        info!(suite = %suite.name, tests = suite.tests.len(), "Loaded test suite");
        Ok(suite)
    }
}

/// Devices to run a suite on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestBatch {
    pub devices: Vec<String>,
    #[serde(default)]
    pub parallel: bool,
    /// Devices in flight at once when `parallel`
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,
}

impl TestBatch {
    pub fn sequential(devices: Vec<String>) -> Self {
        Self {
            devices,
            parallel: false,
            max_workers: default_max_workers(),
        }
    }

    pub fn parallel(devices: Vec<String>, max_workers: usize) -> Self {
        Self {
            devices,
            parallel: true,
            max_workers,
        }
    }
}

/// Runs suites through a controller.
pub struct SuiteRunner<'a> {
    controller: &'a EquipmentController,
}

impl<'a> SuiteRunner<'a> {
    pub fn new(controller: &'a EquipmentController) -> Self {
        Self { controller }
    }

    /// Run one test case and apply the suite-level checks.
    pub async fn run_case(&self, device_id: &str, case: &TestCase) -> TestResult {
        info!(test = %case.name, device = %device_id, "Running test");
        let mut result = self.controller.run_test(device_id, case.parameters.as_slice()).await;

        if let Some((min, max)) = case.expected_range {
            if result.passed && !(min..=max).contains(&result.measurement_value) {
                result.passed = false;
                result
                    .notes
                    .push_str(&format!(" (Outside expected range: {}-{})", min, max));
            }
        }

        result.notes = format!("Test: {}. {}", case.name, result.notes);
        result
    }

    /// Run every test of `suite` on one device, in order.
    pub async fn run(&self, suite: &TestSuite, device_id: &str) -> Vec<TestResult> {
        info!(suite = %suite.name, device = %device_id, "Running test suite");
        for cmd in &suite.setup_commands {
            info!(device = %device_id, "Setup: {}", cmd);
        }

        let mut results = Vec::with_capacity(suite.tests.len());
        for case in &suite.tests {
            let result = self.run_case(device_id, case).await;
            let stop = !result.passed && case.critical;
            results.push(result);
            if stop {
                error!(test = %case.name, device = %device_id, "Critical test failed, stopping suite execution");
                break;
            }
        }

        for cmd in &suite.teardown_commands {
            info!(device = %device_id, "Teardown: {}", cmd);
        }
        results
    }

    /// Run `suite` on every device of `batch`. Results are keyed by device id.
    pub async fn run_batch(
        &self,
        suite: &TestSuite,
        batch: &TestBatch,
    ) -> BTreeMap<String, Vec<TestResult>> {
        if !batch.parallel {
            let mut out = BTreeMap::new();
            for device in &batch.devices {
                out.insert(device.clone(), self.run(suite, device).await);
            }
            return out;
        }

        stream::iter(batch.devices.iter())
            .map(|device| async move { (device.clone(), self.run(suite, device).await) })
            .buffer_unordered(batch.max_workers.max(1))
            .collect()
            .await
    }
}

/// Per-device aggregate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceStats {
    pub total_tests: usize,
    pub passed: usize,
    pub failed: usize,
    /// Percent
    pub pass_rate: f64,
    pub avg_measurement: f64,
}

/// Aggregate over a set of results.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SuiteSummary {
    pub total_tests: usize,
    pub passed: usize,
    pub failed: usize,
    /// Percent; 0 when no tests ran
    pub pass_rate: f64,
    pub generated_at: DateTime<Local>,
    pub device_statistics: BTreeMap<String, DeviceStats>,
}

fn percent(part: usize, whole: usize) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 * 100.0 / whole as f64
    }
}

impl SuiteSummary {
    pub fn from_results<'r, I>(results: I) -> Self
    where
        I: IntoIterator<Item = &'r TestResult>,
    {
        let mut by_device: BTreeMap<String, Vec<&TestResult>> = BTreeMap::new();
        for r in results {
            by_device.entry(r.device_id.clone()).or_default().push(r);
        }

        let device_statistics: BTreeMap<String, DeviceStats> = by_device
            .into_iter()
            .map(|(device, rs)| {
                let total = rs.len();
                let passed = rs.iter().filter(|r| r.passed).count();
                let sum: f64 = rs.iter().map(|r| r.measurement_value).sum();
                let stats = DeviceStats {
                    total_tests: total,
                    passed,
                    failed: total - passed,
                    pass_rate: percent(passed, total),
                    avg_measurement: sum / total as f64,
                };
                (device, stats)
            })
            .collect();

        let total_tests: usize = device_statistics.values().map(|s| s.total_tests).sum();
        let passed: usize = device_statistics.values().map(|s| s.passed).sum();

        Self {
            total_tests,
            passed,
            failed: total_tests - passed,
            pass_rate: percent(passed, total_tests),
            generated_at: Local::now(),
            device_statistics,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(device: &str, passed: bool, value: f64) -> TestResult {
        TestResult {
            passed,
            measurement_value: value,
            ..TestResult::failure("T", device, "")
        }
    }

    #[test]
    fn test_parse_suite_with_defaults() {
        let suite = TestSuite::from_json(
            r#"{
                "name": "smoke",
                "tests": [
                    { "name": "supply", "parameters": ["voltage", "5.0"], "expected_range": [4.9, 5.1], "critical": true },
                    { "parameters": [] }
                ]
            }"#,
        )
        .unwrap();

        assert_eq!(suite.name, "smoke");
        assert!(suite.description.is_empty());
        assert_eq!(suite.tests[0].expected_range, Some((4.9, 5.1)));
        assert!(suite.tests[0].critical);
        assert_eq!(suite.tests[1].name, "Unknown Test");
        assert!(!suite.tests[1].critical);
    }

    #[test]
    fn test_malformed_suite_is_an_error() {
        assert!(TestSuite::from_json("{ \"name\": 3 }").is_err());
        assert!(TestSuite::load("/nonexistent/suite.json").is_err());
    }

    #[test]
    fn test_batch_defaults() {
        let batch: TestBatch = serde_json::from_str(r#"{ "devices": ["D1", "D2"] }"#).unwrap();
        assert!(!batch.parallel);
        assert_eq!(batch.max_workers, 4);
    }

    #[test]
    fn test_summary_statistics() {
        let results = vec![
            result("D1", true, 5.0),
            result("D1", false, 3.0),
            result("D2", true, 1.0),
            result("D1", true, 4.0),
        ];
        let summary = SuiteSummary::from_results(&results);

        assert_eq!(summary.total_tests, 4);
        assert_eq!(summary.passed, 3);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.pass_rate, 75.0);

        let d1 = &summary.device_statistics["D1"];
        assert_eq!(d1.total_tests, 3);
        assert_eq!(d1.failed, 1);
        assert_eq!(d1.avg_measurement, 4.0);
        assert_eq!(summary.device_statistics["D2"].pass_rate, 100.0);
    }

    #[test]
    fn test_empty_summary() {
        let summary = SuiteSummary::from_results(&Vec::new());
        assert_eq!(summary.total_tests, 0);
        assert_eq!(summary.pass_rate, 0.0);
        assert!(summary.device_statistics.is_empty());
    }
}
