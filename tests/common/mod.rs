//! Shared fixtures for the integration tests

#![allow(dead_code)]

use mechatest::config::{EquipmentConfig, TimeoutConfig};
use mechatest::controller::{EquipmentController, EquipmentStatus};
use mechatest::transport::{SimulatedHandle, SimulatedTransport, SimulationProfile};
use parking_lot::Mutex;
use std::sync::Arc;

/// Simulated configuration with timeouts short enough for tests.
pub fn fast_config() -> EquipmentConfig {
    EquipmentConfig {
        timeouts: TimeoutConfig {
            test_response_ms: 200,
            calibration_response_ms: 200,
            calibration_settle_ms: 20,
            connect_ms: 500,
            status_query_ms: 200,
        },
        ..EquipmentConfig::simulated()
    }
}

/// Controller connected to a noise-free simulated rig that always passes at 5.0 V.
pub async fn connected_controller() -> (EquipmentController, SimulatedHandle) {
    let controller = EquipmentController::new();
    let sim = SimulatedTransport::with_profile(SimulationProfile::ideal(5.0, "V"));
    let handle = sim.handle();
    assert!(
        controller
            .initialize_with_transport(fast_config(), Box::new(sim))
            .await
    );
    (controller, handle)
}

/// Same as [`connected_controller`], already `Running`.
pub async fn running_controller() -> (EquipmentController, SimulatedHandle) {
    let (controller, handle) = connected_controller().await;
    assert!(controller.start().await);
    (controller, handle)
}

/// Status changes seen by a subscriber, in delivery order.
pub type Recorded = Arc<Mutex<Vec<(EquipmentStatus, String)>>>;

pub fn record(controller: &EquipmentController) -> Recorded {
    let seen: Recorded = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    controller.subscribe(move |status, message| {
        sink.lock().push((status, message.to_string()));
    });
    seen
}

pub fn statuses(recorded: &Recorded) -> Vec<EquipmentStatus> {
    recorded.lock().iter().map(|(s, _)| *s).collect()
}
