//! Event-driven calibration flow.
//!
//! `idle -> collecting -> validating -> complete | failed`. The flow is a
//! pull-based state machine: the coordinator feeds it conditioned metric
//! frames and drains the events it emits. It never calls back into the rest
//! of the pipeline.

use posture_config::CalibrationCfg;
use posture_traits::Sensitivity;

use crate::error::CalibrationFailReason;
use crate::risk::thresholds_for;
use crate::types::{Baseline, DetectionReliability, MetricValues, RiskThresholds};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CalibrationPhase {
    Idle,
    Collecting,
    Validating,
    Complete,
    Failed,
}

impl CalibrationPhase {
    pub fn as_str(self) -> &'static str {
        match self {
            CalibrationPhase::Idle => "idle",
            CalibrationPhase::Collecting => "collecting",
            CalibrationPhase::Validating => "validating",
            CalibrationPhase::Complete => "complete",
            CalibrationPhase::Failed => "failed",
        }
    }
}

/// Host request starting a session; optional fields fall back to config.
#[derive(Debug, Clone, Default)]
pub struct CalibrationRequest {
    pub sensitivity: Sensitivity,
    pub custom_thresholds: Option<RiskThresholds>,
    pub target_samples: Option<u32>,
    pub min_quality: Option<f32>,
    pub validation_duration_ms: Option<u64>,
}

/// What the user should do with the finished calibration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CalibrationSuggestion {
    RecoverableUnreliable,
    RecalibrateLowQuality,
    AdjustSensitivity,
    Ok,
}

impl CalibrationSuggestion {
    pub fn as_str(self) -> &'static str {
        match self {
            CalibrationSuggestion::RecoverableUnreliable => "recoverable-unreliable",
            CalibrationSuggestion::RecalibrateLowQuality => "recalibrate_low_quality",
            CalibrationSuggestion::AdjustSensitivity => "adjust_sensitivity",
            CalibrationSuggestion::Ok => "ok",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ValidationSummary {
    pub unreliable_frames: u32,
    pub total_frames: u32,
    pub unreliable_ratio: f32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CalibrationOutcome {
    pub baseline: Baseline,
    pub sensitivity: Sensitivity,
    pub thresholds: RiskThresholds,
    pub validation: ValidationSummary,
    pub suggestion: CalibrationSuggestion,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CalibrationEvent {
    Progress {
        phase: CalibrationPhase,
        collected_samples: u32,
        target_samples: u32,
        stability_score: f32,
        quality_score: Option<f32>,
        rejected_invalid: u32,
        rejected_unreliable: u32,
    },
    Complete(CalibrationOutcome),
    Failed {
        reason: CalibrationFailReason,
        message: String,
    },
}

/// Online mean/variance accumulator (Welford).
#[derive(Debug, Clone, Copy, Default)]
struct Moments {
    n: u32,
    mean: f64,
    m2: f64,
}

impl Moments {
    fn push(&mut self, x: f32) {
        self.n += 1;
        let x = f64::from(x);
        let delta = x - self.mean;
        self.mean += delta / f64::from(self.n);
        self.m2 += delta * (x - self.mean);
    }

    fn mean(&self) -> f32 {
        self.mean as f32
    }

    fn stddev(&self) -> f32 {
        if self.n < 2 {
            return 0.0;
        }
        ((self.m2 / f64::from(self.n)).sqrt()) as f32
    }
}

/// Rejected-unreliable frames tolerated per accepted target sample before
/// the session aborts as unreliable detection.
const UNRELIABLE_ABORT_FACTOR: u32 = 4;

#[derive(Debug)]
pub struct CalibrationFlow {
    cfg: CalibrationCfg,
    phase: CalibrationPhase,
    request: CalibrationRequest,
    started_at_ms: u64,
    validation_started_ms: u64,
    pitch: Moments,
    ehd: Moments,
    dpr: Moments,
    sample_count: u32,
    rejected_invalid: u32,
    rejected_unreliable: u32,
    baseline: Option<Baseline>,
    validation_total: u32,
    validation_unreliable: u32,
}

impl CalibrationFlow {
    pub fn new(cfg: CalibrationCfg) -> Self {
        Self {
            cfg,
            phase: CalibrationPhase::Idle,
            request: CalibrationRequest::default(),
            started_at_ms: 0,
            validation_started_ms: 0,
            pitch: Moments::default(),
            ehd: Moments::default(),
            dpr: Moments::default(),
            sample_count: 0,
            rejected_invalid: 0,
            rejected_unreliable: 0,
            baseline: None,
            validation_total: 0,
            validation_unreliable: 0,
        }
    }

    pub fn phase(&self) -> CalibrationPhase {
        self.phase
    }

    pub fn is_active(&self) -> bool {
        matches!(
            self.phase,
            CalibrationPhase::Collecting | CalibrationPhase::Validating
        )
    }

    pub fn start(&mut self, request: CalibrationRequest, now_ms: u64) {
        let cfg = self.cfg;
        *self = Self::new(cfg);
        self.request = request;
        self.phase = CalibrationPhase::Collecting;
        self.started_at_ms = now_ms;
        tracing::info!(
            sensitivity = self.request.sensitivity.as_str(),
            target = self.target_samples(),
            "calibration started"
        );
    }

    /// Cancellation transitions straight to `failed { unknown }`.
    pub fn cancel(&mut self) -> Option<CalibrationEvent> {
        if !self.is_active() {
            return None;
        }
        self.phase = CalibrationPhase::Failed;
        Some(CalibrationEvent::Failed {
            reason: CalibrationFailReason::Unknown,
            message: "calibration cancelled".to_string(),
        })
    }

    fn target_samples(&self) -> u32 {
        self.request
            .target_samples
            .unwrap_or(self.cfg.target_samples)
            .max(1)
    }

    fn min_quality(&self) -> f32 {
        self.request.min_quality.unwrap_or(self.cfg.min_quality)
    }

    fn validation_duration_ms(&self) -> u64 {
        self.request
            .validation_duration_ms
            .unwrap_or(self.cfg.validation_duration_ms)
    }

    /// Running quality estimate from the accumulated spread.
    fn quality(&self) -> f32 {
        let pitch_term = (100.0 - 50.0 * self.pitch.stddev()).max(0.0);
        let ehd_term = (100.0 - 500.0 * self.ehd.stddev()).max(0.0);
        ((pitch_term + ehd_term) / 2.0).round()
    }

    /// Feed one conditioned frame; returns the events it produced.
    pub fn ingest(
        &mut self,
        metrics: &MetricValues,
        reliability: DetectionReliability,
        frame_confidence: Option<f32>,
        now_ms: u64,
    ) -> Vec<CalibrationEvent> {
        match self.phase {
            CalibrationPhase::Collecting => self.ingest_collecting(metrics, reliability, frame_confidence, now_ms),
            CalibrationPhase::Validating => self.ingest_validating(reliability, frame_confidence, now_ms),
            _ => Vec::new(),
        }
    }

    fn ingest_collecting(
        &mut self,
        metrics: &MetricValues,
        reliability: DetectionReliability,
        frame_confidence: Option<f32>,
        now_ms: u64,
    ) -> Vec<CalibrationEvent> {
        if now_ms.saturating_sub(self.started_at_ms) > self.cfg.max_collection_duration_ms {
            return vec![self.fail_timeout()];
        }

        let pitch = metrics.pitch.smoothed.filter(|v| v.is_finite());
        let ehd = metrics.ehd.smoothed.filter(|v| v.is_finite());
        let dpr = metrics.dpr.smoothed.filter(|v| v.is_finite());
        if pitch.is_none() && ehd.is_none() && dpr.is_none() {
            self.rejected_invalid += 1;
            return vec![self.progress()];
        }

        let confidence = frame_confidence.unwrap_or(0.0);
        if confidence < self.cfg.min_confidence {
            if reliability == DetectionReliability::Unreliable {
                self.rejected_unreliable += 1;
                if self.rejected_unreliable
                    > self.target_samples() * UNRELIABLE_ABORT_FACTOR
                {
                    self.phase = CalibrationPhase::Failed;
                    return vec![CalibrationEvent::Failed {
                        reason: CalibrationFailReason::UnreliableDetection,
                        message: format!(
                            "{} unreliable frames rejected before {} samples were collected",
                            self.rejected_unreliable,
                            self.target_samples()
                        ),
                    }];
                }
                return vec![self.progress()];
            }
            // Below threshold but not unreliable: coerce the confidence up
            // and keep the sample.
        }

        if let Some(v) = pitch {
            self.pitch.push(v);
        }
        if let Some(v) = ehd {
            self.ehd.push(v);
        }
        if let Some(v) = dpr {
            self.dpr.push(v);
        }
        self.sample_count += 1;

        if self.sample_count >= self.target_samples() {
            let quality = self.quality();
            if quality < self.min_quality() {
                self.phase = CalibrationPhase::Failed;
                return vec![CalibrationEvent::Failed {
                    reason: CalibrationFailReason::LowQuality,
                    message: format!(
                        "baseline quality {quality:.0} below minimum {:.0}",
                        self.min_quality()
                    ),
                }];
            }
            self.baseline = Some(Baseline {
                pitch_deg: self.pitch.mean(),
                ehd: self.ehd.mean(),
                dpr: if self.dpr.n > 0 { self.dpr.mean() } else { 1.0 },
                quality,
                sample_count: self.sample_count,
            });
            self.phase = CalibrationPhase::Validating;
            self.validation_started_ms = now_ms;
            tracing::info!(quality, samples = self.sample_count, "calibration validating");
        }
        vec![self.progress()]
    }

    fn ingest_validating(
        &mut self,
        reliability: DetectionReliability,
        frame_confidence: Option<f32>,
        now_ms: u64,
    ) -> Vec<CalibrationEvent> {
        self.validation_total += 1;
        let low_confidence = frame_confidence.unwrap_or(0.0) < self.cfg.min_confidence;
        if reliability == DetectionReliability::Unreliable || low_confidence {
            self.validation_unreliable += 1;
        }

        if now_ms.saturating_sub(self.validation_started_ms) >= self.validation_duration_ms() {
            return vec![self.complete()];
        }
        vec![self.progress()]
    }

    fn complete(&mut self) -> CalibrationEvent {
        // Validating phase is only entered with a baseline in place.
        let Some(baseline) = self.baseline else {
            self.phase = CalibrationPhase::Failed;
            return CalibrationEvent::Failed {
                reason: CalibrationFailReason::Unknown,
                message: "validation finished without a baseline".to_string(),
            };
        };
        let ratio = if self.validation_total > 0 {
            self.validation_unreliable as f32 / self.validation_total as f32
        } else {
            0.0
        };
        let suggestion = if ratio > 0.1 {
            CalibrationSuggestion::RecoverableUnreliable
        } else if baseline.quality < self.min_quality() {
            CalibrationSuggestion::RecalibrateLowQuality
        } else if baseline.quality < 80.0 {
            CalibrationSuggestion::AdjustSensitivity
        } else {
            CalibrationSuggestion::Ok
        };
        let thresholds = thresholds_for(
            &baseline,
            self.request.sensitivity,
            self.request.custom_thresholds.as_ref(),
            &self.cfg,
        );
        self.phase = CalibrationPhase::Complete;
        tracing::info!(
            quality = baseline.quality,
            unreliable_ratio = ratio,
            suggestion = suggestion.as_str(),
            "calibration complete"
        );
        CalibrationEvent::Complete(CalibrationOutcome {
            baseline,
            sensitivity: self.request.sensitivity,
            thresholds,
            validation: ValidationSummary {
                unreliable_frames: self.validation_unreliable,
                total_frames: self.validation_total,
                unreliable_ratio: ratio,
            },
            suggestion,
        })
    }

    fn fail_timeout(&mut self) -> CalibrationEvent {
        self.phase = CalibrationPhase::Failed;
        // A timeout with almost nothing collected is an input problem, not a
        // slow user.
        if self.sample_count < self.target_samples().min(10) {
            CalibrationEvent::Failed {
                reason: CalibrationFailReason::InsufficientSamples,
                message: format!(
                    "only {} of {} samples before timeout",
                    self.sample_count,
                    self.target_samples()
                ),
            }
        } else {
            CalibrationEvent::Failed {
                reason: CalibrationFailReason::Timeout,
                message: "collection exceeded the maximum duration".to_string(),
            }
        }
    }

    fn progress(&self) -> CalibrationEvent {
        CalibrationEvent::Progress {
            phase: self.phase,
            collected_samples: self.sample_count,
            target_samples: self.target_samples(),
            stability_score: self.quality(),
            quality_score: self.baseline.map(|b| b.quality),
            rejected_invalid: self.rejected_invalid,
            rejected_unreliable: self.rejected_unreliable,
        }
    }
}
