//! Ear-shoulder horizontal displacement.
//!
//! EHD is the horizontal offset of the mean of both ears from the mean of
//! both shoulders, measured in shoulder-widths. World landmarks are preferred
//! over image landmarks when the detector provides them.

use crate::types::{Landmark, MetricConfidence, MetricSource, PoseLandmarks, pose_index};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EhdSample {
    pub value: f32,
    pub source: MetricSource,
    pub confidence: MetricConfidence,
}

/// Map an overall pose confidence to a metric confidence level.
#[inline]
pub fn pose_metric_confidence(confidence: f32) -> MetricConfidence {
    if confidence >= 0.3 {
        MetricConfidence::High
    } else if confidence >= 0.1 {
        MetricConfidence::Low
    } else {
        MetricConfidence::None
    }
}

const MIN_SHOULDER_WIDTH: f32 = 1e-5;

pub fn compute_ehd(pose: &PoseLandmarks) -> Option<EhdSample> {
    let (landmarks, source): (&[Landmark], MetricSource) = match &pose.world_landmarks {
        Some(world) => (world.as_slice(), MetricSource::PoseWorld),
        None => (pose.landmarks.as_slice(), MetricSource::PoseImage),
    };

    let left_ear = landmarks.get(pose_index::LEFT_EAR)?;
    let right_ear = landmarks.get(pose_index::RIGHT_EAR)?;
    let left_shoulder = landmarks.get(pose_index::LEFT_SHOULDER)?;
    let right_shoulder = landmarks.get(pose_index::RIGHT_SHOULDER)?;

    let xs = [left_ear.x, right_ear.x, left_shoulder.x, right_shoulder.x];
    if xs.iter().any(|v| !v.is_finite()) {
        return None;
    }

    let shoulder_width = (left_shoulder.x - right_shoulder.x).abs();
    if shoulder_width < MIN_SHOULDER_WIDTH {
        return None;
    }

    let ear_center = (left_ear.x + right_ear.x) / 2.0;
    let shoulder_center = (left_shoulder.x + right_shoulder.x) / 2.0;
    let value = (ear_center - shoulder_center).abs() / shoulder_width;
    if !value.is_finite() {
        return None;
    }

    Some(EhdSample {
        value,
        source,
        confidence: pose_metric_confidence(pose.confidence),
    })
}
