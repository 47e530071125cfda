#![cfg_attr(all(not(debug_assertions), not(test)), deny(warnings))]
#![cfg_attr(
    all(not(debug_assertions), not(test)),
    deny(clippy::all, clippy::pedantic, clippy::nursery)
)]
#![allow(clippy::module_name_repetitions, clippy::missing_errors_doc)]
#![cfg_attr(not(test), deny(clippy::unwrap_used, clippy::expect_used))]
//! Posture inference pipeline (detector-agnostic).
//!
//! This crate turns a stream of face/pose landmark frames into a discrete
//! telemetry tick: presence, reliability, a smoothed score in [0, 100], a
//! three-level zone, and a categorical risk state. All persistence goes
//! through `posture_traits` store traits.
//!
//! ## Architecture
//!
//! - **Geometry**: EHD, DPR, and head-pose kernels (`geometry` module)
//! - **Conditioning**: per-metric EMA, outlier and rate gates (`signal`)
//! - **Presence**: frame-count hysteresis (`presence`)
//! - **Guardrails**: dwell-time hysteresis bank (`guardrails`)
//! - **Risk**: baseline-relative evaluation and the 4-state machine
//!   (`risk`, `fsm`), wrapped by the envelope overlay (`envelope`)
//! - **Score**: weighted penalties, EMA, freeze policy, zones (`score`)
//! - **Calibration**: event-driven baseline collection (`calibration`)
//! - **Aggregation**: per-day zone seconds, averages, streak (`aggregate`)
//! - **Worker**: dedicated thread with bounded channels (`worker`)

pub mod aggregate;
pub mod calibration;
pub mod engine;
pub mod envelope;
pub mod error;
pub mod fsm;
pub mod geometry;
pub mod guardrails;
pub mod mocks;
pub mod presence;
pub mod risk;
pub mod score;
pub mod signal;
pub mod types;
pub mod util;
pub mod worker;

pub use engine::{ConfigUpdate, Engine, EngineEvent};
pub use error::{CalibrationFailReason, EngineError, FrameError};
pub use types::{
    Baseline, DetectionReliability, EngineFrame, EngineState, EngineTick, MetricValues,
    PresenceLabel, RiskThresholds, Zone,
};
pub use worker::{ControlMessage, EngineWorker};
