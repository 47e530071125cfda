//! Synthetic frames and test helpers.
//!
//! `FrameSynth` fabricates detector frames whose geometry decodes to chosen
//! metric values: the head pose is embedded as a face transform, EHD is laid
//! out through ear/shoulder landmarks, and DPR through the face bounding box
//! relative to the first emitted frame. Used by the scenario tests and the
//! CLI's synth mode.

use crate::types::{
    DetectionReliability, EngineFrame, FACE_LANDMARK_COUNT, FaceLandmarks, Landmark,
    PoseLandmarks, PresenceLabel, pose_index,
};

/// Target metric values for one synthetic frame.
#[derive(Debug, Clone, Copy)]
pub struct FrameSpec {
    pub pitch_deg: f32,
    pub yaw_deg: f32,
    pub roll_deg: f32,
    pub ehd: f32,
    /// Face size relative to the first frame (the latched DPR baseline).
    pub dpr: f32,
    pub confidence: f32,
    pub present: bool,
    pub reliability: DetectionReliability,
    pub illumination: Option<f32>,
}

impl Default for FrameSpec {
    fn default() -> Self {
        Self {
            pitch_deg: 0.0,
            yaw_deg: 0.0,
            roll_deg: 0.0,
            ehd: 0.0,
            dpr: 1.0,
            confidence: 0.9,
            present: true,
            reliability: DetectionReliability::Ok,
            illumination: Some(0.8),
        }
    }
}

impl FrameSpec {
    pub fn upright() -> Self {
        Self {
            pitch_deg: 2.0,
            ehd: 0.01,
            ..Self::default()
        }
    }

    pub fn slumped() -> Self {
        Self {
            pitch_deg: 18.0,
            ehd: 0.35,
            dpr: 1.15,
            ..Self::default()
        }
    }

    pub fn absent() -> Self {
        Self {
            present: false,
            confidence: 0.0,
            ..Self::default()
        }
    }
}

const BASE_FACE_SIZE: f32 = 0.2;
const SHOULDER_WIDTH: f32 = 0.2;

/// Stateful frame fabricator: monotonic ids and timestamps at a fixed rate.
#[derive(Debug)]
pub struct FrameSynth {
    next_frame_id: u64,
    processed_ms: f64,
    wall_ms: f64,
    pub frame_interval_ms: f64,
}

impl FrameSynth {
    pub fn new() -> Self {
        Self::at_rate(10.0)
    }

    pub fn at_rate(fps: f64) -> Self {
        Self {
            next_frame_id: 0,
            processed_ms: 0.0,
            wall_ms: 1_700_000_000_000.0,
            frame_interval_ms: 1000.0 / fps.max(1.0),
        }
    }

    /// Override the wall clock for the next frame (day-rollover tests).
    pub fn set_wall_ms(&mut self, wall_ms: f64) {
        self.wall_ms = wall_ms;
    }

    pub fn processed_ms(&self) -> f64 {
        self.processed_ms
    }

    pub fn frame(&mut self, spec: &FrameSpec) -> EngineFrame {
        let frame_id = self.next_frame_id;
        self.next_frame_id += 1;
        self.processed_ms += self.frame_interval_ms;
        self.wall_ms += self.frame_interval_ms;

        let (face, pose) = if spec.present {
            (Some(self.face(spec)), Some(self.pose(spec)))
        } else {
            (None, None)
        };

        EngineFrame {
            frame_id,
            captured_at: self.wall_ms,
            processed_at: self.processed_ms,
            face,
            pose,
            presence: if spec.present {
                PresenceLabel::Present
            } else {
                PresenceLabel::Absent
            },
            reliability: spec.reliability,
            illumination: spec.illumination,
            input_width: Some(1280),
            input_height: Some(720),
            fps: None,
            dominant_track_id: None,
        }
    }

    /// Emit `n` frames of the same spec, returning them in order.
    pub fn frames(&mut self, spec: &FrameSpec, n: usize) -> Vec<EngineFrame> {
        (0..n).map(|_| self.frame(spec)).collect()
    }

    fn face(&self, spec: &FrameSpec) -> FaceLandmarks {
        let size = BASE_FACE_SIZE * spec.dpr;
        let mut landmarks = vec![
            Landmark {
                x: 0.5,
                y: 0.5,
                ..Landmark::default()
            };
            FACE_LANDMARK_COUNT
        ];
        // Two opposite corners span the target bounding box.
        landmarks[10] = Landmark {
            x: 0.5 - size / 2.0,
            y: 0.5 - size / 2.0,
            ..Landmark::default()
        };
        landmarks[11] = Landmark {
            x: 0.5 + size / 2.0,
            y: 0.5 + size / 2.0,
            ..Landmark::default()
        };
        FaceLandmarks {
            landmarks,
            transformation_matrix: Some(transform_matrix(
                spec.pitch_deg,
                spec.yaw_deg,
                spec.roll_deg,
            )),
            confidence: spec.confidence,
        }
    }

    fn pose(&self, spec: &FrameSpec) -> PoseLandmarks {
        let mut landmarks = vec![
            Landmark {
                x: 0.5,
                y: 0.5,
                z: Some(0.0),
                visibility: Some(0.9),
            };
            pose_index::LANDMARK_COUNT
        ];
        let ear_x = 0.5 + spec.ehd * SHOULDER_WIDTH;
        landmarks[pose_index::LEFT_EAR].x = ear_x;
        landmarks[pose_index::RIGHT_EAR].x = ear_x;
        landmarks[pose_index::LEFT_SHOULDER].x = 0.5 + SHOULDER_WIDTH / 2.0;
        landmarks[pose_index::RIGHT_SHOULDER].x = 0.5 - SHOULDER_WIDTH / 2.0;
        PoseLandmarks {
            landmarks,
            world_landmarks: None,
            confidence: spec.confidence,
        }
    }
}

impl Default for FrameSynth {
    fn default() -> Self {
        Self::new()
    }
}

/// Column-major 4x4 carrying the rotation for the given intrinsic angles.
pub fn transform_matrix(pitch_deg: f32, yaw_deg: f32, roll_deg: f32) -> Vec<f32> {
    let (p, y, r) = (
        f64::from(pitch_deg).to_radians(),
        f64::from(yaw_deg).to_radians(),
        f64::from(roll_deg).to_radians(),
    );
    let rot = nalgebra::Rotation3::from_euler_angles(p, y, r);
    let mut m = vec![0.0f32; 16];
    for c in 0..3 {
        for row in 0..3 {
            m[c * 4 + row] = rot.matrix()[(row, c)] as f32;
        }
    }
    m[15] = 1.0;
    m
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry;

    #[test]
    fn synthetic_frames_decode_to_their_spec() {
        let mut synth = FrameSynth::new();
        let frame = synth.frame(&FrameSpec {
            pitch_deg: 12.0,
            ehd: 0.25,
            ..FrameSpec::default()
        });

        let face = frame.face.as_ref().unwrap();
        let angles = geometry::estimate_head_pose(face, 1280.0, 720.0, 60.0).unwrap();
        assert!((angles.pitch_deg - 12.0).abs() < 1e-2);

        let ehd = geometry::compute_ehd(frame.pose.as_ref().unwrap()).unwrap();
        assert!((ehd.value - 0.25).abs() < 1e-4);
    }

    #[test]
    fn dpr_is_relative_to_the_first_frame() {
        let mut synth = FrameSynth::new();
        let first = synth.frame(&FrameSpec::default());
        let base = geometry::face_size(first.face.as_ref().unwrap()).unwrap();
        let bigger = synth.frame(&FrameSpec {
            dpr: 1.15,
            ..FrameSpec::default()
        });
        let sample =
            geometry::compute_dpr(bigger.face.as_ref().unwrap(), Some(base)).unwrap();
        assert!((sample.ratio - 1.15).abs() < 1e-3);
    }

    #[test]
    fn timestamps_advance_at_the_frame_rate() {
        let mut synth = FrameSynth::at_rate(10.0);
        let a = synth.frame(&FrameSpec::default());
        let b = synth.frame(&FrameSpec::default());
        assert!((b.processed_at - a.processed_at - 100.0).abs() < 1e-9);
        assert_eq!(b.frame_id, a.frame_id + 1);
    }
}
