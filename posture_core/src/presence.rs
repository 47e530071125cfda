//! Presence detection with frame-count hysteresis.
//!
//! A frame qualifies when either the face or the pose clears its confidence
//! threshold, pose additionally requiring both shoulders (and optionally both
//! hips) to be visible. Streaks of qualifying / non-qualifying frames drive
//! the PRESENT/ABSENT transitions.

use posture_config::PresenceCfg;

use crate::types::{EngineFrame, pose_index};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresenceState {
    Present,
    Absent,
}

/// Value snapshot of the detector, exposed per frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PresenceSnapshot {
    pub state: PresenceState,
    pub consecutive_frames: u32,
    pub last_state_change_ms: u64,
    pub last_updated_ms: u64,
    pub face_confidence: Option<f32>,
    pub pose_confidence: Option<f32>,
}

#[derive(Debug)]
pub struct PresenceDetector {
    cfg: PresenceCfg,
    state: PresenceState,
    qualifying_streak: u32,
    non_qualifying_streak: u32,
    last_state_change_ms: u64,
    last_updated_ms: u64,
}

impl PresenceDetector {
    pub fn new(cfg: PresenceCfg) -> Self {
        Self {
            cfg,
            state: PresenceState::Absent,
            qualifying_streak: 0,
            non_qualifying_streak: 0,
            last_state_change_ms: 0,
            last_updated_ms: 0,
        }
    }

    pub fn state(&self) -> PresenceState {
        self.state
    }

    pub fn update(&mut self, frame: &EngineFrame, now_ms: u64) -> PresenceSnapshot {
        let face_conf = frame.face.as_ref().map(|f| f.confidence);
        let pose_conf = frame.pose.as_ref().map(|p| p.confidence);

        let face_ok = face_conf.is_some_and(|c| c >= self.cfg.face_confidence);
        let pose_ok = frame.pose.as_ref().is_some_and(|p| {
            p.confidence >= self.cfg.pose_confidence && self.upper_body_visible(p)
        });
        let qualifying = face_ok || pose_ok;

        if qualifying {
            self.qualifying_streak += 1;
            self.non_qualifying_streak = 0;
            if self.state == PresenceState::Absent
                && self.qualifying_streak >= self.cfg.present_consecutive_frames
            {
                self.state = PresenceState::Present;
                self.last_state_change_ms = now_ms;
                tracing::debug!(streak = self.qualifying_streak, "presence: PRESENT");
            }
        } else {
            self.non_qualifying_streak += 1;
            self.qualifying_streak = 0;
            if self.state == PresenceState::Present
                && self.non_qualifying_streak >= self.cfg.absent_consecutive_frames
            {
                self.state = PresenceState::Absent;
                self.last_state_change_ms = now_ms;
                tracing::debug!(streak = self.non_qualifying_streak, "presence: ABSENT");
            }
        }
        self.last_updated_ms = now_ms;

        PresenceSnapshot {
            state: self.state,
            consecutive_frames: match self.state {
                PresenceState::Present => self.qualifying_streak,
                PresenceState::Absent => self.non_qualifying_streak,
            },
            last_state_change_ms: self.last_state_change_ms,
            last_updated_ms: self.last_updated_ms,
            face_confidence: face_conf,
            pose_confidence: pose_conf,
        }
    }

    fn upper_body_visible(&self, pose: &crate::types::PoseLandmarks) -> bool {
        let visible = |idx: usize| {
            pose.landmarks
                .get(idx)
                .and_then(|lm| lm.visibility)
                .is_some_and(|v| v >= self.cfg.pose_visibility)
        };
        let shoulders =
            visible(pose_index::LEFT_SHOULDER) && visible(pose_index::RIGHT_SHOULDER);
        if !shoulders {
            return false;
        }
        if self.cfg.require_hips {
            return visible(pose_index::LEFT_HIP) && visible(pose_index::RIGHT_HIP);
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{
        DetectionReliability, FaceLandmarks, Landmark, PoseLandmarks, PresenceLabel,
        FACE_LANDMARK_COUNT,
    };

    fn face_frame(conf: f32) -> EngineFrame {
        EngineFrame {
            frame_id: 0,
            captured_at: 0.0,
            processed_at: 0.0,
            face: Some(FaceLandmarks {
                landmarks: vec![Landmark::default(); FACE_LANDMARK_COUNT],
                transformation_matrix: None,
                confidence: conf,
            }),
            pose: None,
            presence: PresenceLabel::Present,
            reliability: DetectionReliability::Ok,
            illumination: None,
            input_width: None,
            input_height: None,
            fps: None,
            dominant_track_id: None,
        }
    }

    fn pose_frame(conf: f32, shoulder_vis: f32) -> EngineFrame {
        let mut landmarks = vec![Landmark::default(); pose_index::LANDMARK_COUNT];
        landmarks[pose_index::LEFT_SHOULDER].visibility = Some(shoulder_vis);
        landmarks[pose_index::RIGHT_SHOULDER].visibility = Some(shoulder_vis);
        EngineFrame {
            face: None,
            pose: Some(PoseLandmarks {
                landmarks,
                world_landmarks: None,
                confidence: conf,
            }),
            ..face_frame(0.0)
        }
    }

    #[test]
    fn enters_present_after_the_configured_streak() {
        let cfg = PresenceCfg::default();
        let mut det = PresenceDetector::new(cfg);
        for i in 0..4 {
            let snap = det.update(&face_frame(0.9), i);
            assert_eq!(snap.state, PresenceState::Absent, "frame {i}");
        }
        let snap = det.update(&face_frame(0.9), 4);
        assert_eq!(snap.state, PresenceState::Present);
        assert_eq!(snap.last_state_change_ms, 4);
    }

    #[test]
    fn exits_to_absent_after_the_longer_streak() {
        let mut det = PresenceDetector::new(PresenceCfg::default());
        for i in 0..5 {
            det.update(&face_frame(0.9), i);
        }
        assert_eq!(det.state(), PresenceState::Present);
        for i in 0..9 {
            let snap = det.update(&face_frame(0.1), 100 + i);
            assert_eq!(snap.state, PresenceState::Present, "frame {i}");
        }
        let snap = det.update(&face_frame(0.1), 200);
        assert_eq!(snap.state, PresenceState::Absent);
    }

    #[test]
    fn a_single_good_frame_resets_the_absence_streak() {
        let mut det = PresenceDetector::new(PresenceCfg::default());
        for i in 0..5 {
            det.update(&face_frame(0.9), i);
        }
        for i in 0..8 {
            det.update(&face_frame(0.1), 10 + i);
        }
        det.update(&face_frame(0.9), 50);
        for i in 0..9 {
            det.update(&face_frame(0.1), 60 + i);
        }
        assert_eq!(det.state(), PresenceState::Present);
    }

    #[test]
    fn pose_requires_visible_shoulders() {
        let mut det = PresenceDetector::new(PresenceCfg::default());
        for i in 0..10 {
            det.update(&pose_frame(0.9, 0.1), i);
        }
        assert_eq!(det.state(), PresenceState::Absent);

        let mut det = PresenceDetector::new(PresenceCfg::default());
        for i in 0..5 {
            det.update(&pose_frame(0.9, 0.8), i);
        }
        assert_eq!(det.state(), PresenceState::Present);
    }

    #[test]
    fn hips_requirement_is_optional() {
        let cfg = PresenceCfg {
            require_hips: true,
            ..PresenceCfg::default()
        };
        let mut det = PresenceDetector::new(cfg);
        // Shoulders visible but hips not: never qualifies.
        for i in 0..10 {
            det.update(&pose_frame(0.9, 0.8), i);
        }
        assert_eq!(det.state(), PresenceState::Absent);
    }
}
