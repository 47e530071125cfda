//! Domain errors for the posture engine, plus the stable calibration failure
//! taxonomy the host maps to user-facing messages.
use thiserror::Error;

/// Why a calibration session ended in `failed`. Display strings are stable;
/// the CLI and the host event payloads rely on them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CalibrationFailReason {
    InsufficientSamples,
    LowQuality,
    UnreliableDetection,
    Timeout,
    Unknown,
}

impl core::fmt::Display for CalibrationFailReason {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            CalibrationFailReason::InsufficientSamples => write!(f, "insufficient_samples"),
            CalibrationFailReason::LowQuality => write!(f, "low_quality"),
            CalibrationFailReason::UnreliableDetection => write!(f, "unreliable_detection"),
            CalibrationFailReason::Timeout => write!(f, "timeout"),
            CalibrationFailReason::Unknown => write!(f, "unknown"),
        }
    }
}

/// Rejected detector payloads. Raised only by the boundary validator.
#[derive(Debug, Error)]
pub enum FrameError {
    #[error("malformed frame payload: {0}")]
    Malformed(#[source] serde_json::Error),
    #[error("frame timestamps must be finite")]
    InvalidTimestamp,
    #[error("face mesh too short: got {got} landmarks")]
    ShortFaceMesh { got: usize },
    #[error("pose landmark sequence has wrong shape: got {got}")]
    BadPoseShape { got: usize },
    #[error("face transform must have 16 elements, got {got}")]
    BadTransformShape { got: usize },
}

/// Non-fatal engine faults surfaced to the host as `engineError` events.
/// The pipeline continues with its previous state after any of these.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EngineError {
    #[error("frame rejected: {0}")]
    Frame(String),
    #[error("persistence failed: {0}")]
    Persistence(String),
    #[error("calibration failed: {reason}: {message}")]
    Calibration {
        reason: CalibrationFailReason,
        message: String,
    },
    #[error("worker channel closed")]
    ChannelClosed,
}

pub type Result<T> = eyre::Result<T>;
pub use eyre::Report;
