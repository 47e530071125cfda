//! Risk evaluation: smoothed metrics against the calibrated baseline.
//!
//! The evaluator produces one assessment per frame. Hold conditions (missing
//! calibration, pending DPR baseline, too few finite signals, a degenerate
//! pitch) freeze the downstream state machine instead of feeding it
//! garbage; each hold collects a human-readable reason.

use posture_config::RiskCfg;

use crate::types::{Baseline, MetricValues, RiskThresholds};

/// Per-frame output of the evaluator.
#[derive(Debug, Clone, PartialEq)]
pub struct RiskAssessment {
    pub conditions_met: bool,
    pub recovery_conditions_met: bool,
    pub should_hold: bool,
    pub reasons: Vec<String>,
    /// Positive deviations from baseline, `None` when the signal is absent.
    pub d_pitch: Option<f32>,
    pub d_ehd: Option<f32>,
    pub d_dpr: Option<f32>,
}

impl RiskAssessment {
    /// A neutral held assessment, used when the coordinator freezes the tick.
    pub fn held(reason: &str) -> Self {
        Self {
            conditions_met: false,
            recovery_conditions_met: false,
            should_hold: true,
            reasons: vec![reason.to_string()],
            d_pitch: None,
            d_ehd: None,
            d_dpr: None,
        }
    }
}

#[derive(Debug)]
pub struct RiskEvaluator {
    cfg: RiskCfg,
}

impl RiskEvaluator {
    pub fn new(cfg: RiskCfg) -> Self {
        Self { cfg }
    }

    pub fn set_cfg(&mut self, cfg: RiskCfg) {
        self.cfg = cfg;
    }

    pub fn cfg(&self) -> &RiskCfg {
        &self.cfg
    }

    /// Assess one frame of smoothed metrics. `calibration` is the active
    /// baseline, `thresholds` the absolute deviation thresholds derived from
    /// the calibration's sensitivity.
    pub fn assess(
        &self,
        metrics: &MetricValues,
        calibration: Option<&Baseline>,
        thresholds: &RiskThresholds,
    ) -> RiskAssessment {
        let mut reasons = Vec::new();
        let mut should_hold = false;

        let Some(baseline) = calibration else {
            return RiskAssessment {
                conditions_met: false,
                recovery_conditions_met: false,
                should_hold: true,
                reasons: vec!["missing calibration".to_string()],
                d_pitch: None,
                d_ehd: None,
                d_dpr: None,
            };
        };

        let pitch = metrics.pitch.smoothed.filter(|v| v.is_finite());
        let ehd = metrics.ehd.smoothed.filter(|v| v.is_finite());
        let dpr = metrics.dpr.smoothed.filter(|v| v.is_finite());

        let d_pitch = pitch.map(|v| (v - baseline.pitch_deg).max(0.0));
        let d_ehd = ehd.map(|v| (v - baseline.ehd).max(0.0));
        let d_dpr = dpr.map(|v| (v - baseline.dpr).max(0.0));

        let available = [d_pitch, d_ehd, d_dpr].iter().filter(|d| d.is_some()).count();
        if d_pitch.is_none() || available < 2 {
            should_hold = true;
            reasons.push("insufficient signals".to_string());
        }

        if let Some(p) = pitch
            && p.abs() >= self.cfg.degenerate_pitch_deg
        {
            should_hold = true;
            reasons.push(format!("degenerate pose: pitch {p:.1} deg"));
        }

        if metrics.flags.baseline_pending {
            should_hold = true;
            reasons.push("baseline pending".to_string());
        }

        let recovery = |threshold: f32| {
            (threshold * (1.0 - self.cfg.hysteresis_delta_pct / 100.0)).max(0.0)
        };

        let conditions_met = !should_hold
            && d_pitch.is_some_and(|d| d > thresholds.pitch_deg)
            && (d_ehd.is_some_and(|d| d > thresholds.ehd)
                || d_dpr.is_some_and(|d| d > thresholds.dpr));

        let recovery_conditions_met = !should_hold
            && d_pitch.is_some_and(|d| d < recovery(thresholds.pitch_deg))
            && (d_ehd.is_some_and(|d| d < recovery(thresholds.ehd))
                || d_dpr.is_some_and(|d| d < recovery(thresholds.dpr)));

        RiskAssessment {
            conditions_met,
            recovery_conditions_met,
            should_hold,
            reasons,
            d_pitch,
            d_ehd,
            d_dpr,
        }
    }
}

/// Derive absolute thresholds for a baseline and sensitivity.
pub fn thresholds_for(
    baseline: &Baseline,
    sensitivity: posture_traits::Sensitivity,
    custom: Option<&RiskThresholds>,
    cfg: &posture_config::CalibrationCfg,
) -> RiskThresholds {
    use posture_traits::Sensitivity;
    match sensitivity {
        Sensitivity::Custom => {
            let fallback = RiskThresholds {
                pitch_deg: cfg.delta_pitch_deg,
                ehd: cfg.delta_ehd,
                dpr: cfg.delta_dpr,
            };
            let custom = custom.copied().unwrap_or(fallback);
            // Custom thresholds are absolute values; convert to offsets from
            // the baseline and clamp to the per-metric bounds.
            RiskThresholds {
                pitch_deg: (custom.pitch_deg - baseline.pitch_deg)
                    .clamp(0.0, cfg.max_pitch_offset_deg),
                ehd: (custom.ehd - baseline.ehd).clamp(0.0, cfg.max_ehd_offset),
                dpr: (custom.dpr - baseline.dpr).clamp(0.0, cfg.max_dpr_offset),
            }
        }
        preset => {
            let factor = match preset {
                Sensitivity::Low => 1.3,
                Sensitivity::Medium => 1.0,
                Sensitivity::High => 0.7,
                Sensitivity::Custom => unreachable!(),
            };
            RiskThresholds {
                pitch_deg: cfg.delta_pitch_deg * factor,
                ehd: cfg.delta_ehd * factor,
                dpr: cfg.delta_dpr * factor,
            }
        }
    }
}
