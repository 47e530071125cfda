//! Depth-perception ratio: current face bounding-box size relative to the
//! calibrated baseline face size. A proxy for distance from the camera.

use crate::types::{FaceLandmarks, MetricSource};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DprSample {
    pub ratio: f32,
    /// The face size that produced this ratio; the caller latches it as the
    /// baseline on the first high-confidence sample.
    pub face_size: f32,
    pub source: MetricSource,
}

/// Geometric-mean size of the axis-aligned landmark bounding box.
pub fn face_size(face: &FaceLandmarks) -> Option<f32> {
    let mut min_x = f32::INFINITY;
    let mut max_x = f32::NEG_INFINITY;
    let mut min_y = f32::INFINITY;
    let mut max_y = f32::NEG_INFINITY;
    for lm in &face.landmarks {
        if !lm.x.is_finite() || !lm.y.is_finite() {
            return None;
        }
        min_x = min_x.min(lm.x);
        max_x = max_x.max(lm.x);
        min_y = min_y.min(lm.y);
        max_y = max_y.max(lm.y);
    }
    let width = max_x - min_x;
    let height = max_y - min_y;
    if !(width > 0.0 && height > 0.0) {
        return None;
    }
    let size = (width * height).sqrt();
    size.is_finite().then_some(size)
}

pub fn compute_dpr(face: &FaceLandmarks, baseline_face_size: Option<f32>) -> Option<DprSample> {
    let size = face_size(face)?;
    match baseline_face_size {
        Some(baseline) if baseline > 0.0 && baseline.is_finite() => {
            let ratio = size / baseline;
            ratio.is_finite().then_some(DprSample {
                ratio,
                face_size: size,
                source: MetricSource::DprBaseline,
            })
        }
        // No baseline yet: neutral ratio until the caller latches one.
        _ => Some(DprSample {
            ratio: 1.0,
            face_size: size,
            source: MetricSource::Unknown,
        }),
    }
}
