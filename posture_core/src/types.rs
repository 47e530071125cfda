//! Frame payloads, metric series, and the outward engine tick.
//!
//! Wire types serialize with camelCase field names and SCREAMING enum values
//! so the emitted JSON is stable across transports. All of these are plain
//! values; nothing here holds references into pipeline state.

use serde::{Deserialize, Serialize};

use crate::error::FrameError;

/// A single detector landmark. Coordinates are normalized [0, 1] image space
/// unless the containing sequence is a world-landmark sequence (metric,
/// camera-centered).
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Landmark {
    pub x: f32,
    pub y: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub z: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub visibility: Option<f32>,
}

/// Face landmarker output: at least 468 landmarks, optional 4x4 face
/// transform (stored column-major), and an overall confidence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FaceLandmarks {
    pub landmarks: Vec<Landmark>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transformation_matrix: Option<Vec<f32>>,
    pub confidence: f32,
}

/// Pose landmarker output: 33 image landmarks with visibility, optional
/// world landmarks, and an overall confidence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PoseLandmarks {
    pub landmarks: Vec<Landmark>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub world_landmarks: Option<Vec<Landmark>>,
    pub confidence: f32,
}

/// Presence as labelled by the upstream detector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PresenceLabel {
    Present,
    Absent,
    Multiple,
}

/// Reliability as labelled by the upstream detector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DetectionReliability {
    Ok,
    Low,
    Unreliable,
    #[default]
    Unknown,
}

/// One validated detector frame, the unit of work for the whole pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineFrame {
    pub frame_id: u64,
    /// Wall-clock capture time, ms since epoch.
    pub captured_at: f64,
    /// Monotonic processing time, ms.
    pub processed_at: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub face: Option<FaceLandmarks>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pose: Option<PoseLandmarks>,
    pub presence: PresenceLabel,
    pub reliability: DetectionReliability,
    /// Illumination confidence estimated by the detector, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub illumination: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_width: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_height: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fps: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dominant_track_id: Option<String>,
}

/// Pose landmark indices the kernels rely on.
pub mod pose_index {
    pub const LEFT_EAR: usize = 7;
    pub const RIGHT_EAR: usize = 8;
    pub const LEFT_SHOULDER: usize = 11;
    pub const RIGHT_SHOULDER: usize = 12;
    pub const LEFT_HIP: usize = 23;
    pub const RIGHT_HIP: usize = 24;
    pub const LANDMARK_COUNT: usize = 33;
}

/// Minimum face mesh size accepted at the boundary.
pub const FACE_LANDMARK_COUNT: usize = 468;

impl EngineFrame {
    /// Boundary validator: deserialize and sanity-check one detector payload.
    /// This is the only place malformed detector output is rejected; the rest
    /// of the pipeline assumes structural validity.
    pub fn from_json(value: &serde_json::Value) -> Result<Self, FrameError> {
        let frame: EngineFrame =
            serde_json::from_value(value.clone()).map_err(FrameError::Malformed)?;
        frame.check()?;
        Ok(frame)
    }

    fn check(&self) -> Result<(), FrameError> {
        if !self.captured_at.is_finite() || !self.processed_at.is_finite() {
            return Err(FrameError::InvalidTimestamp);
        }
        if let Some(face) = &self.face {
            if face.landmarks.len() < FACE_LANDMARK_COUNT {
                return Err(FrameError::ShortFaceMesh {
                    got: face.landmarks.len(),
                });
            }
            if let Some(m) = &face.transformation_matrix
                && m.len() != 16
            {
                return Err(FrameError::BadTransformShape { got: m.len() });
            }
        }
        if let Some(pose) = &self.pose {
            if pose.landmarks.len() != pose_index::LANDMARK_COUNT {
                return Err(FrameError::BadPoseShape {
                    got: pose.landmarks.len(),
                });
            }
            if let Some(world) = &pose.world_landmarks
                && world.len() != pose_index::LANDMARK_COUNT
            {
                return Err(FrameError::BadPoseShape { got: world.len() });
            }
        }
        Ok(())
    }
}

/// Which signal a metric series carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetricKey {
    Pitch,
    Yaw,
    Roll,
    Ehd,
    Dpr,
}

impl MetricKey {
    pub const ALL: [MetricKey; 5] = [
        MetricKey::Pitch,
        MetricKey::Yaw,
        MetricKey::Roll,
        MetricKey::Ehd,
        MetricKey::Dpr,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            MetricKey::Pitch => "pitch",
            MetricKey::Yaw => "yaw",
            MetricKey::Roll => "roll",
            MetricKey::Ehd => "ehd",
            MetricKey::Dpr => "dpr",
        }
    }
}

/// Where a metric value came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum MetricSource {
    #[serde(rename = "pose-world")]
    PoseWorld,
    #[serde(rename = "pose-image")]
    PoseImage,
    #[serde(rename = "face-transform")]
    FaceTransform,
    #[serde(rename = "solve-pnp")]
    SolvePnp,
    #[serde(rename = "dpr-baseline")]
    DprBaseline,
    #[default]
    #[serde(rename = "unknown")]
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MetricConfidence {
    High,
    Low,
    #[default]
    None,
}

/// One metric's per-frame record: raw input, smoothed output, provenance and
/// the gating flags the signal processor set while producing it.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricSeries {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub smoothed: Option<f32>,
    pub source: MetricSource,
    pub confidence: MetricConfidence,
    pub outlier: bool,
    pub gated: bool,
    pub reliability_paused: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricFlags {
    pub yaw_deweighted: bool,
    pub low_confidence: bool,
    pub baseline_pending: bool,
}

/// The full smoothed-metrics snapshot for one frame.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricValues {
    pub frame_id: u64,
    pub timestamp_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub baseline_face_size: Option<f32>,
    pub pitch: MetricSeries,
    pub yaw: MetricSeries,
    pub roll: MetricSeries,
    pub ehd: MetricSeries,
    pub dpr: MetricSeries,
    pub flags: MetricFlags,
}

impl MetricValues {
    pub fn series(&self, key: MetricKey) -> &MetricSeries {
        match key {
            MetricKey::Pitch => &self.pitch,
            MetricKey::Yaw => &self.yaw,
            MetricKey::Roll => &self.roll,
            MetricKey::Ehd => &self.ehd,
            MetricKey::Dpr => &self.dpr,
        }
    }

    pub fn series_mut(&mut self, key: MetricKey) -> &mut MetricSeries {
        match key {
            MetricKey::Pitch => &mut self.pitch,
            MetricKey::Yaw => &mut self.yaw,
            MetricKey::Roll => &mut self.roll,
            MetricKey::Ehd => &mut self.ehd,
            MetricKey::Dpr => &mut self.dpr,
        }
    }
}

/// Calibrated neutral posture.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Baseline {
    pub pitch_deg: f32,
    pub ehd: f32,
    pub dpr: f32,
    pub quality: f32,
    pub sample_count: u32,
}

/// Absolute deviation thresholds applied on top of a baseline.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RiskThresholds {
    pub pitch_deg: f32,
    pub ehd: f32,
    pub dpr: f32,
}

/// Three-level user-facing classification of the smoothed score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Zone {
    Green,
    Yellow,
    Red,
}

/// Outward engine state: the four risk states plus the envelope overlays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EngineState {
    Initial,
    Good,
    AtRisk,
    BadPosture,
    Recovering,
    Idle,
    Unreliable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TickPresence {
    Present,
    Absent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TickReliability {
    Ok,
    Unreliable,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TickMetrics {
    pub pitch_deg: f32,
    pub ehd_norm: f32,
    pub dpr: f32,
    pub conf: f32,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TickDiagnostics {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_width: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fps: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dominant_track_id: Option<String>,
}

impl TickDiagnostics {
    pub fn is_empty(&self) -> bool {
        self.input_width.is_none() && self.fps.is_none() && self.dominant_track_id.is_none()
    }
}

/// The atomic outward message of the pipeline, one per detection frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineTick {
    /// Monotonic milliseconds.
    pub t: u64,
    pub presence: TickPresence,
    pub reliability: TickReliability,
    pub metrics: TickMetrics,
    /// Smoothed score, rounded to one decimal.
    pub score: f32,
    pub zone: Zone,
    pub state: EngineState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diagnostics: Option<TickDiagnostics>,
}
