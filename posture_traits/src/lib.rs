#![cfg_attr(all(not(debug_assertions), not(test)), deny(warnings))]
#![cfg_attr(
    all(not(debug_assertions), not(test)),
    deny(clippy::all, clippy::pedantic, clippy::nursery)
)]
#![allow(clippy::module_name_repetitions, clippy::missing_errors_doc)]
#![cfg_attr(not(test), deny(clippy::unwrap_used, clippy::expect_used))]
//! Traits that define the persistence abstractions used by the system.
//!
//! `store` defines the repository traits (daily logs, calibration records,
//! settings) plus the row value types they exchange.
//!
//! Other crates depend only on these traits, enabling an in-memory store for
//! tests and a SQLite store in production while keeping `posture_core`
//! persistence-agnostic. Pipeline timing needs no abstraction here: every
//! delta-time derivation works off the timestamps carried by the frames
//! themselves.
pub mod store;

pub use store::{
    CalibrationStore, DailyLog, DailyLogDelta, DailyLogStore, NewCalibrationBaseline,
    NewPostureCalibration, PostureCalibrationRecord, Sensitivity, SettingsStore, StoreResult,
};
