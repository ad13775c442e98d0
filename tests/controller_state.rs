//! Integration tests for the equipment status lifecycle
//!
//! Drives the controller through its legal and illegal transitions and checks what
//! subscribers observe.

mod common;

use common::{connected_controller, record, statuses};
use mechatest::controller::{EquipmentController, MSG_INITIALIZED};
use mechatest::EquipmentStatus;
use parking_lot::Mutex;
use std::sync::Arc;

// =============================================================================
// Transitions
// =============================================================================

#[tokio::test]
async fn test_full_lifecycle_notifies_in_order() {
    let (controller, _handle) = connected_controller().await;
    let seen = record(&controller);

    assert!(controller.start().await);
    assert!(controller.pause().await);
    assert!(controller.resume().await);
    assert!(controller.stop().await);

    assert_eq!(
        statuses(&seen),
        vec![
            EquipmentStatus::Running,
            EquipmentStatus::Paused,
            EquipmentStatus::Running,
            EquipmentStatus::Idle,
        ]
    );
    let messages: Vec<String> = seen.lock().iter().map(|(_, m)| m.clone()).collect();
    assert_eq!(
        messages,
        vec![
            "Equipment started",
            "Equipment paused",
            "Equipment resumed",
            "Equipment stopped",
        ]
    );
}

#[tokio::test]
async fn test_start_from_paused() {
    let (controller, _handle) = connected_controller().await;
    assert!(controller.start().await);
    assert!(controller.pause().await);

    assert!(controller.start().await);
    assert_eq!(controller.status(), EquipmentStatus::Running);
}

#[tokio::test]
async fn test_illegal_transitions_leave_status_untouched() {
    let (controller, _handle) = connected_controller().await;
    let seen = record(&controller);

    assert!(!controller.pause().await);
    assert_eq!(controller.last_error(), "Equipment must be running to pause");
    assert!(!controller.resume().await);
    assert_eq!(controller.last_error(), "Equipment must be paused to resume");

    assert!(controller.start().await);
    assert!(!controller.start().await);
    assert_eq!(
        controller.last_error(),
        "Equipment must be in IDLE or PAUSED state to start"
    );
    assert!(!controller.calibrate().await);
    assert_eq!(controller.last_error(), "Equipment must be idle for calibration");

    assert_eq!(controller.status(), EquipmentStatus::Running);
    assert_eq!(statuses(&seen), vec![EquipmentStatus::Running]);
}

#[tokio::test]
async fn test_stop_while_idle_is_silent() {
    let (controller, _handle) = connected_controller().await;
    let seen = record(&controller);

    assert!(controller.stop().await);
    assert_eq!(controller.status(), EquipmentStatus::Idle);
    assert!(seen.lock().is_empty());
}

#[tokio::test]
async fn test_successful_transition_keeps_previous_error() {
    let (controller, _handle) = connected_controller().await;
    assert!(!controller.pause().await);

    assert!(controller.start().await);
    assert_eq!(controller.last_error(), "Equipment must be running to pause");
}

#[tokio::test]
async fn test_initialize_notifies_idle() {
    let controller = EquipmentController::new();
    let seen = record(&controller);

    assert!(controller.initialize(common::fast_config()).await);
    assert!(!controller.is_simulation());
    assert_eq!(
        seen.lock().clone(),
        vec![(EquipmentStatus::Idle, MSG_INITIALIZED.to_string())]
    );
}

#[tokio::test]
async fn test_reinitialize_returns_to_idle() {
    let (controller, _handle) = connected_controller().await;
    assert!(controller.start().await);

    assert!(controller.initialize(common::fast_config()).await);
    assert_eq!(controller.status(), EquipmentStatus::Idle);
}

// =============================================================================
// Subscribers
// =============================================================================

#[tokio::test]
async fn test_callback_may_read_status() {
    let controller = Arc::new(EquipmentController::new());
    let observed = Arc::new(Mutex::new(Vec::new()));

    let weak = Arc::downgrade(&controller);
    let sink = Arc::clone(&observed);
    controller.subscribe(move |delivered, _| {
        if let Some(controller) = weak.upgrade() {
            sink.lock().push((delivered, controller.status()));
        }
    });

    assert!(controller.start().await);
    assert!(controller.stop().await);

    assert_eq!(
        observed.lock().clone(),
        vec![
            (EquipmentStatus::Running, EquipmentStatus::Running),
            (EquipmentStatus::Idle, EquipmentStatus::Idle),
        ]
    );
}

#[tokio::test]
async fn test_unsubscribed_callback_stops_receiving() {
    let controller = EquipmentController::new();
    let seen = Arc::new(Mutex::new(0usize));
    let sink = Arc::clone(&seen);
    let id = controller.subscribe(move |_, _| *sink.lock() += 1);

    assert!(controller.start().await);
    assert!(controller.unsubscribe(id));
    assert!(!controller.unsubscribe(id));
    assert!(controller.stop().await);

    assert_eq!(*seen.lock(), 1);
}

#[tokio::test]
async fn test_panicking_subscriber_does_not_block_others() {
    let controller = EquipmentController::new();
    controller.subscribe(|_, _| panic!("subscriber bug"));
    let seen = record(&controller);

    assert!(controller.start().await);
    assert_eq!(controller.status(), EquipmentStatus::Running);
    assert_eq!(statuses(&seen), vec![EquipmentStatus::Running]);
}
