//! Live configuration snapshots with clamped overrides.
//!
//! The store owns one value per group (signal, score, guardrails). `update`
//! merges an override struct into the live snapshot and returns the new
//! value; each numeric field is range-clamped and non-finite inputs are
//! dropped. `reset` restores the group's defaults. Consumers read a snapshot
//! copy at frame entry; the store itself is only touched between frames.

use serde::Deserialize;

use crate::{GuardrailCfg, MetricSignalCfg, ScoreCfg, SignalCfg};

/// Optional per-metric signal overrides.
#[derive(Debug, Clone, Copy, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct MetricSignalOverrides {
    pub alpha: Option<f32>,
    pub window_seconds: Option<f32>,
    pub rate_limit_per_second: Option<f32>,
    pub outlier_threshold_per_second: Option<f32>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct SignalOverrides {
    pub confidence_threshold: Option<f32>,
    pub ignore_reliability_pause: Option<bool>,
    pub pitch: MetricSignalOverrides,
    pub yaw: MetricSignalOverrides,
    pub roll: MetricSignalOverrides,
    pub ehd: MetricSignalOverrides,
    pub dpr: MetricSignalOverrides,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct ScoreOverrides {
    pub pitch_per_deg: Option<f32>,
    pub ehd_per_unit: Option<f32>,
    pub dpr_per_unit: Option<f32>,
    pub ema_alpha: Option<f32>,
    pub neutral: Option<f32>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct GuardrailAxisOverrides {
    pub enter_threshold_deg: Option<f32>,
    pub exit_threshold_deg: Option<f32>,
    pub enter_seconds: Option<f32>,
    pub exit_seconds: Option<f32>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct GuardrailOverrides {
    pub yaw: GuardrailAxisOverrides,
    pub roll: GuardrailAxisOverrides,
    pub confidence_face_threshold: Option<f32>,
    pub confidence_pose_threshold: Option<f32>,
    pub illumination_threshold: Option<f32>,
}

/// Apply `value` if it is finite and within `[lo, hi]` after clamping.
#[inline]
fn merge_clamped(slot: &mut f32, value: Option<f32>, lo: f32, hi: f32) {
    if let Some(v) = value
        && v.is_finite()
    {
        *slot = v.clamp(lo, hi);
    }
}

fn merge_metric(cfg: &mut MetricSignalCfg, ov: &MetricSignalOverrides) {
    if let Some(a) = ov.alpha
        && a.is_finite()
        && a > 0.0
        && a <= 1.0
    {
        cfg.alpha = Some(a);
    }
    if let Some(w) = ov.window_seconds
        && w.is_finite()
        && w > 0.0
    {
        cfg.window_seconds = w.clamp(0.05, 60.0);
    }
    if let Some(r) = ov.rate_limit_per_second
        && r.is_finite()
        && r > 0.0
    {
        cfg.rate_limit_per_second = Some(r);
    }
    if let Some(t) = ov.outlier_threshold_per_second
        && t.is_finite()
        && t > 0.0
    {
        cfg.outlier_threshold_per_second = Some(t);
    }
}

/// Process-wide configuration store: three grouped snapshots with
/// `get`/`update`/`reset` each.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConfigStore {
    signal: SignalCfg,
    score: ScoreCfg,
    guardrails: GuardrailCfg,
}

impl ConfigStore {
    pub fn new(signal: SignalCfg, score: ScoreCfg, guardrails: GuardrailCfg) -> Self {
        Self {
            signal,
            score,
            guardrails,
        }
    }

    pub fn signal(&self) -> SignalCfg {
        self.signal
    }

    pub fn score(&self) -> ScoreCfg {
        self.score
    }

    pub fn guardrails(&self) -> GuardrailCfg {
        self.guardrails
    }

    /// Merge signal overrides into the live snapshot and return it.
    pub fn update_signal(&mut self, ov: &SignalOverrides) -> SignalCfg {
        merge_clamped(&mut self.signal.confidence_threshold, ov.confidence_threshold, 0.0, 1.0);
        if let Some(b) = ov.ignore_reliability_pause {
            self.signal.ignore_reliability_pause = b;
        }
        merge_metric(&mut self.signal.pitch, &ov.pitch);
        merge_metric(&mut self.signal.yaw, &ov.yaw);
        merge_metric(&mut self.signal.roll, &ov.roll);
        merge_metric(&mut self.signal.ehd, &ov.ehd);
        merge_metric(&mut self.signal.dpr, &ov.dpr);
        self.signal
    }

    pub fn update_score(&mut self, ov: &ScoreOverrides) -> ScoreCfg {
        merge_clamped(&mut self.score.pitch_per_deg, ov.pitch_per_deg, 0.0, 50.0);
        merge_clamped(&mut self.score.ehd_per_unit, ov.ehd_per_unit, 0.0, 2_000.0);
        merge_clamped(&mut self.score.dpr_per_unit, ov.dpr_per_unit, 0.0, 2_000.0);
        if let Some(a) = ov.ema_alpha
            && a.is_finite()
            && a > 0.0
            && a <= 1.0
        {
            self.score.ema_alpha = a;
        }
        merge_clamped(&mut self.score.neutral, ov.neutral, 0.0, 100.0);
        self.score
    }

    pub fn update_guardrails(&mut self, ov: &GuardrailOverrides) -> GuardrailCfg {
        for (axis, axis_ov) in [
            (&mut self.guardrails.yaw, &ov.yaw),
            (&mut self.guardrails.roll, &ov.roll),
        ] {
            merge_clamped(&mut axis.enter_threshold_deg, axis_ov.enter_threshold_deg, 1.0, 90.0);
            merge_clamped(&mut axis.exit_threshold_deg, axis_ov.exit_threshold_deg, 0.0, 90.0);
            merge_clamped(&mut axis.enter_seconds, axis_ov.enter_seconds, 0.0, 60.0);
            merge_clamped(&mut axis.exit_seconds, axis_ov.exit_seconds, 0.0, 60.0);
            // Preserve the exit <= enter invariant after any merge.
            if axis.exit_threshold_deg > axis.enter_threshold_deg {
                axis.exit_threshold_deg = axis.enter_threshold_deg;
            }
        }
        merge_clamped(
            &mut self.guardrails.confidence.face_threshold,
            ov.confidence_face_threshold,
            0.0,
            1.0,
        );
        merge_clamped(
            &mut self.guardrails.confidence.pose_threshold,
            ov.confidence_pose_threshold,
            0.0,
            1.0,
        );
        merge_clamped(
            &mut self.guardrails.illumination.threshold,
            ov.illumination_threshold,
            0.0,
            1.0,
        );
        self.guardrails
    }

    pub fn reset_signal(&mut self) -> SignalCfg {
        self.signal = SignalCfg::default();
        self.signal
    }

    pub fn reset_score(&mut self) -> ScoreCfg {
        self.score = ScoreCfg::default();
        self.score
    }

    pub fn reset_guardrails(&mut self) -> GuardrailCfg {
        self.guardrails = GuardrailCfg::default();
        self.guardrails
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_update_is_a_noop() {
        let mut store = ConfigStore::default();
        let before = store.clone();
        store.update_signal(&SignalOverrides::default());
        store.update_score(&ScoreOverrides::default());
        store.update_guardrails(&GuardrailOverrides::default());
        assert_eq!(store, before);
    }

    #[test]
    fn out_of_range_values_are_clamped() {
        let mut store = ConfigStore::default();
        let cfg = store.update_score(&ScoreOverrides {
            neutral: Some(250.0),
            ..ScoreOverrides::default()
        });
        assert_eq!(cfg.neutral, 100.0);
    }

    #[test]
    fn non_finite_values_are_dropped() {
        let mut store = ConfigStore::default();
        let before = store.score();
        let cfg = store.update_score(&ScoreOverrides {
            pitch_per_deg: Some(f32::NAN),
            ema_alpha: Some(f32::INFINITY),
            ..ScoreOverrides::default()
        });
        assert_eq!(cfg, before);
    }

    #[test]
    fn guardrail_merge_preserves_exit_below_enter() {
        let mut store = ConfigStore::default();
        let cfg = store.update_guardrails(&GuardrailOverrides {
            yaw: GuardrailAxisOverrides {
                enter_threshold_deg: Some(20.0),
                exit_threshold_deg: Some(40.0),
                ..GuardrailAxisOverrides::default()
            },
            ..GuardrailOverrides::default()
        });
        assert!(cfg.yaw.exit_threshold_deg <= cfg.yaw.enter_threshold_deg);
    }

    #[test]
    fn reset_restores_defaults() {
        let mut store = ConfigStore::default();
        store.update_score(&ScoreOverrides {
            neutral: Some(50.0),
            ..ScoreOverrides::default()
        });
        assert_eq!(store.reset_score(), ScoreCfg::default());
    }
}
