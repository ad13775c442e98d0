//! Integration tests for device test execution
//!
//! Covers the command that reaches the wire, reply classification, retries, and the
//! health counters fed by results.

mod common;

use common::{connected_controller, fast_config, running_controller};
use mechatest::controller::EquipmentController;
use mechatest::health::{self, FixedMetrics, HealthMetrics};
use mechatest::orchestrator::{NOTE_COMPLETED, NOTE_NOT_CONNECTED, NOTE_NOT_RUNNING, NOTE_NO_RESPONSE};
use mechatest::config::EquipmentConfig;
use mechatest::transport::{SimulatedTransport, SimulationProfile};
use mechatest::EquipmentStatus;
use std::collections::HashSet;

// =============================================================================
// Wire format and replies
// =============================================================================

#[tokio::test]
async fn test_command_reaches_device_in_order() {
    let (controller, handle) = running_controller().await;
    handle.push_response("RESULT:4.98:V:PASS");

    let result = controller
        .run_test("D1", &["voltage", "5.0", "current", "0.1"])
        .await;

    assert_eq!(handle.sent_commands(), vec!["TEST:D1:voltage:5.0:current:0.1"]);
    assert!(result.passed);
    assert_eq!(result.device_id, "D1");
    assert_eq!(result.measurement_value, 4.98);
    assert_eq!(result.units, "V");
    assert_eq!(result.notes, NOTE_COMPLETED);
}

#[tokio::test]
async fn test_device_verdict_is_reported() {
    let (controller, handle) = running_controller().await;
    handle.push_response("RESULT:7.25:mm:FAIL");

    let result = controller.run_test("D2", &["stroke"]).await;

    assert!(!result.passed);
    assert_eq!(result.measurement_value, 7.25);
    assert_eq!(result.units, "mm");
    assert_eq!(controller.status(), EquipmentStatus::Running);
}

#[tokio::test]
async fn test_malformed_reply() {
    let (controller, handle) = running_controller().await;
    handle.push_response("GARBAGE");

    let result = controller.run_test::<&str>("D1", &[]).await;

    assert!(!result.passed);
    assert_eq!(result.notes, "Invalid response format: GARBAGE");
}

#[tokio::test]
async fn test_silent_device_times_out() {
    let (controller, handle) = running_controller().await;
    handle.push_silence();

    let result = controller.run_test::<&str>("D1", &[]).await;

    assert!(!result.passed);
    assert_eq!(result.notes, NOTE_NO_RESPONSE);
    assert_eq!(controller.status(), EquipmentStatus::Running);
}

#[tokio::test]
async fn test_hangup_reports_communication_error() {
    let (controller, handle) = running_controller().await;
    handle.push_hangup();

    let result = controller.run_test::<&str>("D1", &[]).await;
    assert!(result.notes.starts_with("Communication error"));

    let result = controller.run_test::<&str>("D1", &[]).await;
    assert_eq!(result.notes, NOTE_NOT_CONNECTED);
}

#[tokio::test]
async fn test_separator_in_parameter_is_rejected() {
    let (controller, handle) = running_controller().await;

    let result = controller.run_test("D1", &["a:b"]).await;

    assert!(!result.passed);
    assert!(result.notes.starts_with("Invalid test command"));
    assert!(handle.sent_commands().is_empty());
}

// =============================================================================
// Preconditions
// =============================================================================

#[tokio::test]
async fn test_not_running_sends_nothing() {
    let (controller, handle) = connected_controller().await;

    let result = controller.run_test("D1", &["voltage", "5.0"]).await;

    assert!(!result.passed);
    assert_eq!(result.notes, NOTE_NOT_RUNNING);
    assert_eq!(controller.last_error(), NOTE_NOT_RUNNING);
    assert!(handle.sent_commands().is_empty());

    assert!(controller.start().await);
    assert!(controller.pause().await);
    let result = controller.run_test::<&str>("D1", &[]).await;
    assert_eq!(result.notes, NOTE_NOT_RUNNING);
    assert!(handle.sent_commands().is_empty());
}

#[tokio::test]
async fn test_simulation_fallback_reports_not_connected() {
    let controller = EquipmentController::new();
    let sim = SimulatedTransport::new();
    sim.handle().fail_next_connect();

    assert!(
        !controller
            .initialize_with_transport(fast_config(), Box::new(sim))
            .await
    );
    assert!(controller.start().await);

    let result = controller.run_test::<&str>("D1", &[]).await;
    assert!(!result.passed);
    assert_eq!(result.notes, NOTE_NOT_CONNECTED);
}

// =============================================================================
// Retries
// =============================================================================

#[tokio::test]
async fn test_transient_send_failures_are_retried() {
    let (controller, handle) = running_controller().await;
    handle.fail_next_sends(2);

    let result = controller.run_test::<&str>("D1", &[]).await;

    assert!(result.passed, "notes: {}", result.notes);
    assert_eq!(handle.sent_commands(), vec!["TEST:D1"]);
}

#[tokio::test]
async fn test_retries_are_bounded() {
    let (controller, handle) = running_controller().await;
    let retries = controller.config().max_retry_attempts;
    handle.fail_next_sends(retries + 1);

    let result = controller.run_test::<&str>("D1", &[]).await;

    assert!(!result.passed);
    assert!(result.notes.starts_with("Failed to send test command"));
    assert!(handle.sent_commands().is_empty());
}

// =============================================================================
// Results and metrics
// =============================================================================

#[tokio::test]
async fn test_ids_are_unique() {
    let (controller, _handle) = running_controller().await;

    let mut ids = HashSet::new();
    for _ in 0..20 {
        let result = controller.run_test::<&str>("D1", &[]).await;
        assert!(ids.insert(result.test_id));
    }
}

#[tokio::test]
async fn test_simulated_failures_are_per_device() {
    let (controller, handle) = running_controller().await;
    handle.set_device_failure("BAD", true);

    assert!(!controller.run_test::<&str>("BAD", &[]).await.passed);
    assert!(controller.run_test::<&str>("GOOD", &[]).await.passed);
}

#[tokio::test]
async fn test_health_metrics_have_every_key() {
    let (controller, _handle) = running_controller().await;

    let metrics = controller.health_metrics();
    for key in health::METRIC_KEYS {
        assert!(metrics.contains_key(key), "missing {}", key);
    }
    assert!(metrics[health::UPTIME_HOURS] >= 0.0);
    assert_eq!(metrics[health::ERROR_RATE], 0.001);
}

#[tokio::test]
async fn test_error_rate_counts_failed_results() {
    let (controller, handle) = running_controller().await;
    handle.push_response("RESULT:1.0:V:FAIL");
    handle.push_response("RESULT:5.0:V:PASS");
    handle.push_response("RESULT:1.0:V:FAIL");
    handle.push_response("RESULT:5.0:V:PASS");
    for _ in 0..4 {
        controller.run_test::<&str>("D1", &[]).await;
    }

    assert_eq!(controller.health_metrics()[health::ERROR_RATE], 0.5);
}

#[tokio::test]
async fn test_fixed_metrics_source() {
    let fixed: HealthMetrics = health::METRIC_KEYS
        .iter()
        .map(|k| (k.to_string(), 1.0))
        .collect();
    let controller =
        EquipmentController::new().with_metrics_source(FixedMetrics(fixed.clone()));
    let sim = SimulatedTransport::with_profile(SimulationProfile::ideal(5.0, "V"));
    assert!(
        controller
            .initialize_with_transport(fast_config(), Box::new(sim))
            .await
    );

    assert_eq!(controller.health_metrics(), fixed);
}

fn noisy_rig(tolerance: f64) -> EquipmentConfig {
    let mut config = fast_config();
    config.measurement_tolerance = tolerance;
    config.simulation = SimulationProfile {
        noise: 0.05,
        failure_probability: 0.0,
        latency_ms: 0,
        ..SimulationProfile::default()
    };
    config
}

#[tokio::test]
async fn test_measurement_tolerance_sets_simulated_pass_band() {
    let strict = EquipmentController::new();
    assert!(strict.initialize(noisy_rig(0.0)).await);
    assert!(strict.start().await);
    let mut failed = 0;
    for _ in 0..10 {
        if !strict.run_test::<&str>("D1", &[]).await.passed {
            failed += 1;
        }
    }
    assert!(failed >= 9, "only {} of 10 failed", failed);

    let lenient = EquipmentController::new();
    assert!(lenient.initialize(noisy_rig(0.5)).await);
    assert!(lenient.start().await);
    for _ in 0..10 {
        let result = lenient.run_test::<&str>("D1", &[]).await;
        assert!(result.passed, "{} {}", result.measurement_value, result.notes);
    }
}
