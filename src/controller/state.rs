//! Equipment status and the transition table.
//!
//! # State Machine
//!
//! ```text
//!            start                 pause
//!   Idle ───────────> Running ───────────> Paused
//!    │ ▲                 ▲  ◄─────────────  │
//!    │ │                 │      resume      │
//!    │ │                 └──────────────────┘
//!    │ │                        start
//!    │ └─────── stop (from any status) ──────────
//!    │
//!    │ calibrate
//!    ▼
//!  Maintenance ──CAL_OK──> Idle
//!        └────other────> Error
//! ```
//!
//! `run_test` is legal only while `Running` and leaves the status unchanged.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Lifecycle status of the test equipment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EquipmentStatus {
    /// Powered and connected (or simulated), nothing in progress
    #[default]
    Idle,
    /// Accepting test requests
    Running,
    /// Test session suspended
    Paused,
    /// Last calibration failed; `stop` recovers
    Error,
    /// Calibration in progress
    Maintenance,
}

impl EquipmentStatus {
    pub fn can_start(&self) -> bool {
        matches!(self, EquipmentStatus::Idle | EquipmentStatus::Paused)
    }

    pub fn can_pause(&self) -> bool {
        matches!(self, EquipmentStatus::Running)
    }

    pub fn can_resume(&self) -> bool {
        matches!(self, EquipmentStatus::Paused)
    }

    pub fn can_calibrate(&self) -> bool {
        matches!(self, EquipmentStatus::Idle)
    }

    pub fn can_run_test(&self) -> bool {
        matches!(self, EquipmentStatus::Running)
    }

    /// Status an operation leads to from here, or why it is refused.
    pub fn apply(self, operation: Operation) -> Result<EquipmentStatus, TransitionError> {
        let (allowed, target, reason) = match operation {
            Operation::Start => (
                self.can_start(),
                EquipmentStatus::Running,
                "Equipment must be in IDLE or PAUSED state to start",
            ),
            Operation::Stop => (true, EquipmentStatus::Idle, ""),
            Operation::Pause => (
                self.can_pause(),
                EquipmentStatus::Paused,
                "Equipment must be running to pause",
            ),
            Operation::Resume => (
                self.can_resume(),
                EquipmentStatus::Running,
                "Equipment must be paused to resume",
            ),
            Operation::Calibrate => (
                self.can_calibrate(),
                EquipmentStatus::Maintenance,
                "Equipment must be idle for calibration",
            ),
            Operation::RunTest => (self.can_run_test(), self, "Equipment not in running state"),
            Operation::QueryStatus => (
                self != EquipmentStatus::Maintenance,
                self,
                "Device busy: calibration in progress",
            ),
        };

        if allowed {
            Ok(target)
        } else {
            Err(TransitionError {
                operation,
                from: self,
                reason: reason.to_string(),
            })
        }
    }
}

impl fmt::Display for EquipmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            EquipmentStatus::Idle => "IDLE",
            EquipmentStatus::Running => "RUNNING",
            EquipmentStatus::Paused => "PAUSED",
            EquipmentStatus::Error => "ERROR",
            EquipmentStatus::Maintenance => "MAINTENANCE",
        };
        f.write_str(label)
    }
}

impl FromStr for EquipmentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "IDLE" => Ok(EquipmentStatus::Idle),
            "RUNNING" => Ok(EquipmentStatus::Running),
            "PAUSED" => Ok(EquipmentStatus::Paused),
            "ERROR" => Ok(EquipmentStatus::Error),
            "MAINTENANCE" => Ok(EquipmentStatus::Maintenance),
            other => Err(format!("Unknown equipment status '{}'", other)),
        }
    }
}

/// Operations gated by the status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Start,
    Stop,
    Pause,
    Resume,
    Calibrate,
    RunTest,
    QueryStatus,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Operation::Start => "start",
            Operation::Stop => "stop",
            Operation::Pause => "pause",
            Operation::Resume => "resume",
            Operation::Calibrate => "calibrate",
            Operation::RunTest => "run_test",
            Operation::QueryStatus => "query_device_status",
        };
        f.write_str(label)
    }
}

/// An operation was refused in the current status.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{reason}")]
pub struct TransitionError {
    pub operation: Operation,
    pub from: EquipmentStatus,
    pub reason: String,
}
