//! Score processing: weighted penalties, EMA smoothing, freeze policy, and
//! the zone mapping.
//!
//! Penalties apply only to positive deviations from the baseline. When the
//! frame cannot be scored (unreliable, metrics missing, baseline pending,
//! low confidence) the score freezes at the previous EMA and the sample
//! records why.

use posture_config::ScoreCfg;

use crate::risk::RiskAssessment;
use crate::types::{DetectionReliability, MetricValues, Zone};

/// Why a sample was frozen instead of scored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FreezeReason {
    Unreliable,
    MissingMetrics,
    BaselinePending,
    LowConfidence,
}

impl FreezeReason {
    pub fn as_str(self) -> &'static str {
        match self {
            FreezeReason::Unreliable => "unreliable",
            FreezeReason::MissingMetrics => "missing-metrics",
            FreezeReason::BaselinePending => "baseline-pending",
            FreezeReason::LowConfidence => "low-confidence",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoreSample {
    pub raw: f32,
    pub ema: f32,
    pub zone: Zone,
    pub frozen: bool,
    pub reason: Option<FreezeReason>,
}

/// floor(ema) >= 80 is GREEN, >= 60 YELLOW, below that RED.
pub fn zone_for(ema: f32) -> Zone {
    let floored = ema.floor();
    if floored >= 80.0 {
        Zone::Green
    } else if floored >= 60.0 {
        Zone::Yellow
    } else {
        Zone::Red
    }
}

#[derive(Debug)]
pub struct ScoreProcessor {
    cfg: ScoreCfg,
    ema: Option<f32>,
}

impl ScoreProcessor {
    pub fn new(cfg: ScoreCfg) -> Self {
        Self { cfg, ema: None }
    }

    pub fn set_cfg(&mut self, cfg: ScoreCfg) {
        self.cfg = cfg;
    }

    pub fn neutral(&self) -> f32 {
        self.cfg.neutral
    }

    /// Freeze this frame at the held EMA (or neutral) without consulting the
    /// assessment. Used by the coordinator when the user is absent.
    pub fn hold(&self, reason: FreezeReason) -> ScoreSample {
        let held = self.ema.unwrap_or(self.cfg.neutral);
        ScoreSample {
            raw: held,
            ema: held,
            zone: zone_for(held),
            frozen: true,
            reason: Some(reason),
        }
    }

    /// Score one frame from the risk assessment's deviations.
    pub fn process(
        &mut self,
        assessment: &RiskAssessment,
        metrics: &MetricValues,
        reliability: DetectionReliability,
    ) -> ScoreSample {
        if let Some(reason) = self.freeze_reason(assessment, metrics, reliability) {
            let held = self.ema.unwrap_or(self.cfg.neutral);
            return ScoreSample {
                raw: held,
                ema: held,
                zone: zone_for(held),
                frozen: true,
                reason: Some(reason),
            };
        }

        let penalty = |dev: Option<f32>, weight: f32| dev.map_or(0.0, |d| d.max(0.0) * weight);
        let raw = (100.0
            - penalty(assessment.d_pitch, self.cfg.pitch_per_deg)
            - penalty(assessment.d_ehd, self.cfg.ehd_per_unit)
            - penalty(assessment.d_dpr, self.cfg.dpr_per_unit))
        .clamp(0.0, 100.0);

        let ema = match self.ema {
            None => raw,
            Some(prev) => self.cfg.ema_alpha * raw + (1.0 - self.cfg.ema_alpha) * prev,
        };
        self.ema = Some(ema);

        ScoreSample {
            raw,
            ema,
            zone: zone_for(ema),
            frozen: false,
            reason: None,
        }
    }

    fn freeze_reason(
        &self,
        assessment: &RiskAssessment,
        metrics: &MetricValues,
        reliability: DetectionReliability,
    ) -> Option<FreezeReason> {
        if reliability == DetectionReliability::Unreliable {
            return Some(FreezeReason::Unreliable);
        }
        if assessment.d_pitch.is_none()
            && assessment.d_ehd.is_none()
            && assessment.d_dpr.is_none()
        {
            return Some(FreezeReason::MissingMetrics);
        }
        if metrics.flags.baseline_pending {
            return Some(FreezeReason::BaselinePending);
        }
        if metrics.flags.low_confidence {
            return Some(FreezeReason::LowConfidence);
        }
        None
    }
}
