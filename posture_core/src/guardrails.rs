//! Reliability guardrails with enter/exit dwell-time hysteresis.
//!
//! Four guardrails watch the conditioned stream: yaw and roll magnitude,
//! detection confidence, and illumination. Orientation dominates: while yaw
//! or roll is over threshold the confidence and illumination rails are reset
//! instead of evaluated, so a turned head never double-reports.

use posture_config::GuardrailCfg;

use crate::types::DetectionReliability;

/// One enter/exit dwell-time hysteresis cell.
#[derive(Debug, Clone, Copy, Default)]
struct DwellState {
    active: bool,
    enter_accum_s: f32,
    exit_accum_s: f32,
}

impl DwellState {
    /// Advance by `dt` seconds with the raw condition either met or not.
    /// Returns the post-update active flag.
    fn advance(&mut self, condition: bool, dt: f32, enter_s: f32, exit_s: f32) -> bool {
        if self.active {
            if condition {
                self.exit_accum_s = 0.0;
            } else {
                self.exit_accum_s += dt;
                if self.exit_accum_s >= exit_s {
                    self.active = false;
                    self.enter_accum_s = 0.0;
                    self.exit_accum_s = 0.0;
                }
            }
        } else if condition {
            self.enter_accum_s += dt;
            if self.enter_accum_s > enter_s {
                self.active = true;
                self.enter_accum_s = 0.0;
                self.exit_accum_s = 0.0;
            }
        } else {
            self.enter_accum_s = 0.0;
        }
        self.active
    }

    fn reset(&mut self) {
        *self = DwellState::default();
    }
}

/// Per-frame guardrail inputs, all optional: a missing signal neither enters
/// nor exits its rail.
#[derive(Debug, Clone, Copy, Default)]
pub struct GuardrailInputs {
    pub yaw_deg: Option<f32>,
    pub roll_deg: Option<f32>,
    pub face_confidence: Option<f32>,
    pub pose_confidence: Option<f32>,
    pub illumination: Option<f32>,
    pub detection_reliability: DetectionReliability,
}

/// Why the bank currently reports UNRELIABLE.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardrailReason {
    YawExcessive,
    RollExcessive,
    LowConfidence,
    PoorIllumination,
}

impl GuardrailReason {
    pub fn as_str(self) -> &'static str {
        match self {
            GuardrailReason::YawExcessive => "yaw-excessive",
            GuardrailReason::RollExcessive => "roll-excessive",
            GuardrailReason::LowConfidence => "low-confidence",
            GuardrailReason::PoorIllumination => "poor-illumination",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReliabilityAssessment {
    pub reliability: DetectionReliability,
    pub reasons: Vec<GuardrailReason>,
}

#[derive(Debug)]
pub struct GuardrailBank {
    cfg: GuardrailCfg,
    yaw: DwellState,
    roll: DwellState,
    confidence: DwellState,
    illumination: DwellState,
    last_eval_ms: Option<u64>,
}

impl GuardrailBank {
    pub fn new(cfg: GuardrailCfg) -> Self {
        Self {
            cfg,
            yaw: DwellState::default(),
            roll: DwellState::default(),
            confidence: DwellState::default(),
            illumination: DwellState::default(),
            last_eval_ms: None,
        }
    }

    pub fn set_cfg(&mut self, cfg: GuardrailCfg) {
        self.cfg = cfg;
    }

    pub fn evaluate(&mut self, inputs: &GuardrailInputs, now_ms: u64) -> ReliabilityAssessment {
        let dt = match self.last_eval_ms {
            Some(prev) => ((now_ms.saturating_sub(prev)) as f32 / 1000.0).clamp(0.0, 1.0),
            None => 0.0,
        };
        self.last_eval_ms = Some(now_ms);

        let yaw_active = match inputs.yaw_deg {
            Some(yaw) if yaw.is_finite() => {
                let over = if self.yaw.active {
                    yaw.abs() > self.cfg.yaw.exit_threshold_deg
                } else {
                    yaw.abs() > self.cfg.yaw.enter_threshold_deg
                };
                self.yaw.advance(
                    over,
                    dt,
                    self.cfg.yaw.enter_seconds,
                    self.cfg.yaw.exit_seconds,
                )
            }
            _ => self.yaw.active,
        };
        let roll_active = match inputs.roll_deg {
            Some(roll) if roll.is_finite() => {
                let over = if self.roll.active {
                    roll.abs() > self.cfg.roll.exit_threshold_deg
                } else {
                    roll.abs() > self.cfg.roll.enter_threshold_deg
                };
                self.roll.advance(
                    over,
                    dt,
                    self.cfg.roll.enter_seconds,
                    self.cfg.roll.exit_seconds,
                )
            }
            _ => self.roll.active,
        };

        let mut reasons = Vec::new();
        if yaw_active {
            reasons.push(GuardrailReason::YawExcessive);
        }
        if roll_active {
            reasons.push(GuardrailReason::RollExcessive);
        }

        let confidence_fine = inputs
            .face_confidence
            .is_some_and(|c| c >= self.cfg.confidence.face_threshold)
            && inputs
                .pose_confidence
                .map_or(true, |c| c >= self.cfg.confidence.pose_threshold);
        let detector_clean = inputs.detection_reliability == DetectionReliability::Ok
            && confidence_fine
            && inputs
                .illumination
                .map_or(true, |i| i >= self.cfg.illumination.threshold);

        if yaw_active || roll_active || detector_clean {
            // Orientation dominates; a clean detector read also clears the
            // secondary rails outright.
            self.confidence.reset();
            self.illumination.reset();
        } else {
            let conf_low = match (inputs.face_confidence, inputs.pose_confidence) {
                (None, None) => false,
                (face, pose) => {
                    face.is_some_and(|c| c < self.cfg.confidence.face_threshold)
                        || pose.is_some_and(|c| c < self.cfg.confidence.pose_threshold)
                }
            };
            if self.confidence.advance(
                conf_low,
                dt,
                self.cfg.confidence.enter_seconds,
                self.cfg.confidence.exit_seconds,
            ) {
                reasons.push(GuardrailReason::LowConfidence);
            }

            let illum_low = inputs
                .illumination
                .is_some_and(|i| i < self.cfg.illumination.threshold);
            if self.illumination.advance(
                illum_low,
                dt,
                self.cfg.illumination.enter_seconds,
                self.cfg.illumination.exit_seconds,
            ) {
                reasons.push(GuardrailReason::PoorIllumination);
            }
        }

        let reliability = if reasons.is_empty() {
            DetectionReliability::Ok
        } else {
            DetectionReliability::Unreliable
        };
        ReliabilityAssessment {
            reliability,
            reasons,
        }
    }
}
