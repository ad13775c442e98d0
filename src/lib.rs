//! # mechatest
//!
//! Control library for mechatronic test rigs. The rig is driven over a line-oriented
//! command/response link (serial, USB-serial or Ethernet) through a finite-state
//! [`EquipmentController`](controller::EquipmentController) that gates which operations are
//! legal, runs device tests and calibrations, and reports status changes and health metrics.
//!
//! ## Crate Structure
//!
//! - **`controller`**: The `EquipmentController`, its status state machine (`state`) and the
//!   status-change subscriber list (`notifier`).
//! - **`transport`**: The `Transport` trait and its serial, network and simulated variants,
//!   plus the shared newline framing.
//! - **`protocol`**: Encoding of outbound commands and decoding of `RESULT`, `CAL_OK` and
//!   `STATUS` replies.
//! - **`orchestrator`**: One test, calibration or status exchange on top of a transport,
//!   producing a `TestResult`.
//! - **`health`**: Health metric snapshots and their pluggable sources.
//! - **`suite`**: JSON test suites, device batches and result summaries.
//! - **`config`**: Figment-based configuration (TOML file + `MECHATEST_*` environment).
//! - **`logging`**: `tracing-subscriber` setup with console and file output.
//! - **`error`**: Error types shared across the crate.

pub mod config;
pub mod controller;
pub mod error;
pub mod health;
pub mod logging;
pub mod orchestrator;
pub mod protocol;
pub mod suite;
pub mod transport;

pub use config::EquipmentConfig;
pub use controller::{EquipmentController, EquipmentStatus, SubscriptionId};
pub use orchestrator::TestResult;
