#![cfg_attr(all(not(debug_assertions), not(test)), deny(warnings))]
#![cfg_attr(
    all(not(debug_assertions), not(test)),
    deny(clippy::all, clippy::pedantic, clippy::nursery)
)]
#![allow(clippy::module_name_repetitions, clippy::missing_errors_doc)]
//! Config schemas for the posture engine.
//!
//! - `EngineCfg` and sub-structs are deserialized from TOML and validated.
//! - `ConfigStore` owns the three live snapshot groups (signal, score,
//!   guardrails) and applies range-clamped overrides; out-of-range or
//!   non-finite values in an override are dropped, never errors.
//! - `seed_from_env` reads `POSTURE_*` variables once at startup.

mod store;

pub use store::{
    ConfigStore, GuardrailAxisOverrides, GuardrailOverrides, MetricSignalOverrides,
    ScoreOverrides, SignalOverrides,
};

use serde::{Deserialize, Serialize};

/// Per-metric smoothing/limiting knobs for the signal processor.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricSignalCfg {
    /// Fixed EMA alpha. When absent the alpha is derived from the frame
    /// delta and `window_seconds`.
    pub alpha: Option<f32>,
    /// Smoothing window in seconds used to derive alpha when `alpha` is None.
    pub window_seconds: f32,
    /// Max accepted change per second; larger deltas are clamped.
    pub rate_limit_per_second: Option<f32>,
    /// Deltas steeper than this per second are rejected as outliers.
    pub outlier_threshold_per_second: Option<f32>,
}

impl Default for MetricSignalCfg {
    fn default() -> Self {
        Self {
            alpha: None,
            window_seconds: 2.0,
            rate_limit_per_second: None,
            outlier_threshold_per_second: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SignalCfg {
    /// Frame-level confidence gate; frames below this never update smoothers.
    pub confidence_threshold: f32,
    /// When true, UNRELIABLE frames still update smoothers (debug aid).
    pub ignore_reliability_pause: bool,
    pub pitch: MetricSignalCfg,
    pub yaw: MetricSignalCfg,
    pub roll: MetricSignalCfg,
    pub ehd: MetricSignalCfg,
    pub dpr: MetricSignalCfg,
}

impl Default for SignalCfg {
    fn default() -> Self {
        Self {
            confidence_threshold: 0.3,
            ignore_reliability_pause: false,
            pitch: MetricSignalCfg {
                rate_limit_per_second: Some(45.0),
                outlier_threshold_per_second: Some(120.0),
                ..MetricSignalCfg::default()
            },
            yaw: MetricSignalCfg {
                rate_limit_per_second: Some(60.0),
                outlier_threshold_per_second: Some(180.0),
                ..MetricSignalCfg::default()
            },
            roll: MetricSignalCfg {
                rate_limit_per_second: Some(60.0),
                outlier_threshold_per_second: Some(180.0),
                ..MetricSignalCfg::default()
            },
            ehd: MetricSignalCfg {
                rate_limit_per_second: Some(0.8),
                outlier_threshold_per_second: Some(2.5),
                ..MetricSignalCfg::default()
            },
            dpr: MetricSignalCfg {
                rate_limit_per_second: Some(0.6),
                outlier_threshold_per_second: Some(2.0),
                ..MetricSignalCfg::default()
            },
        }
    }
}

/// Score weighting, smoothing and the neutral fallback.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoreCfg {
    /// Penalty per degree of pitch deviation above baseline.
    pub pitch_per_deg: f32,
    /// Penalty per unit of EHD deviation above baseline.
    pub ehd_per_unit: f32,
    /// Penalty per unit of DPR deviation above baseline.
    pub dpr_per_unit: f32,
    /// EMA alpha for the smoothed score.
    pub ema_alpha: f32,
    /// Score reported before any sample has been produced.
    pub neutral: f32,
}

impl Default for ScoreCfg {
    fn default() -> Self {
        Self {
            pitch_per_deg: 3.0,
            ehd_per_unit: 250.0,
            dpr_per_unit: 150.0,
            ema_alpha: 0.2,
            neutral: 35.0,
        }
    }
}

/// Enter/exit dwell hysteresis for one orientation guardrail axis.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GuardrailAxisCfg {
    pub enter_threshold_deg: f32,
    pub exit_threshold_deg: f32,
    pub enter_seconds: f32,
    pub exit_seconds: f32,
}

impl Default for GuardrailAxisCfg {
    fn default() -> Self {
        Self {
            enter_threshold_deg: 30.0,
            exit_threshold_deg: 25.0,
            enter_seconds: 1.0,
            exit_seconds: 1.5,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfidenceGuardrailCfg {
    pub face_threshold: f32,
    pub pose_threshold: f32,
    pub enter_seconds: f32,
    pub exit_seconds: f32,
}

impl Default for ConfidenceGuardrailCfg {
    fn default() -> Self {
        Self {
            face_threshold: 0.3,
            pose_threshold: 0.3,
            enter_seconds: 1.5,
            exit_seconds: 1.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IlluminationGuardrailCfg {
    pub threshold: f32,
    pub enter_seconds: f32,
    pub exit_seconds: f32,
}

impl Default for IlluminationGuardrailCfg {
    fn default() -> Self {
        Self {
            threshold: 0.25,
            enter_seconds: 2.0,
            exit_seconds: 1.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct GuardrailCfg {
    pub yaw: GuardrailAxisCfg,
    pub roll: GuardrailAxisCfg,
    pub confidence: ConfidenceGuardrailCfg,
    pub illumination: IlluminationGuardrailCfg,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PresenceCfg {
    pub face_confidence: f32,
    pub pose_confidence: f32,
    pub pose_visibility: f32,
    /// Also require both hips to be visible for a qualifying pose.
    pub require_hips: bool,
    pub present_consecutive_frames: u32,
    pub absent_consecutive_frames: u32,
}

impl Default for PresenceCfg {
    fn default() -> Self {
        Self {
            face_confidence: 0.4,
            pose_confidence: 0.4,
            pose_visibility: 0.25,
            require_hips: false,
            present_consecutive_frames: 5,
            absent_consecutive_frames: 10,
        }
    }
}

/// Risk evaluator + state machine timing.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskCfg {
    /// Continuous seconds of met conditions before AT_RISK becomes BAD_POSTURE.
    pub trigger_seconds: f32,
    /// Continuous seconds of recovery before BAD_POSTURE resolves to GOOD.
    pub recovery_seconds: f32,
    /// Recovery thresholds are `threshold * (1 - pct/100)`, floored at 0.
    pub hysteresis_delta_pct: f32,
    /// |pitch| at or beyond this is a degenerate pose and holds the machine.
    pub degenerate_pitch_deg: f32,
    /// Per-tick delta clamp for the risk timers, in seconds.
    pub max_delta_seconds: f32,
}

impl Default for RiskCfg {
    fn default() -> Self {
        Self {
            trigger_seconds: 3.0,
            recovery_seconds: 3.0,
            hysteresis_delta_pct: 25.0,
            degenerate_pitch_deg: 75.0,
            max_delta_seconds: 0.5,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnvelopeCfg {
    pub absence_to_idle_ms: u64,
    pub presence_resume_ms: u64,
    pub sleep_after_absence_ms: u64,
    pub resume_boost_ms: u64,
}

impl Default for EnvelopeCfg {
    fn default() -> Self {
        Self {
            absence_to_idle_ms: 5_000,
            presence_resume_ms: 2_000,
            sleep_after_absence_ms: 60_000,
            resume_boost_ms: 4_000,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CalibrationCfg {
    pub target_samples: u32,
    pub min_quality: f32,
    pub validation_duration_ms: u64,
    pub max_collection_duration_ms: u64,
    /// Samples below this confidence are coerced up to it, unless the frame
    /// is also UNRELIABLE in which case the sample is rejected.
    pub min_confidence: f32,
    /// Base threshold deltas applied on top of the baseline.
    pub delta_pitch_deg: f32,
    pub delta_ehd: f32,
    pub delta_dpr: f32,
    /// Per-metric bounds for custom thresholds expressed as offsets from the
    /// baseline.
    pub max_pitch_offset_deg: f32,
    pub max_ehd_offset: f32,
    pub max_dpr_offset: f32,
}

impl Default for CalibrationCfg {
    fn default() -> Self {
        Self {
            target_samples: 50,
            min_quality: 40.0,
            validation_duration_ms: 30_000,
            max_collection_duration_ms: 80_000,
            min_confidence: 0.3,
            delta_pitch_deg: 12.0,
            delta_ehd: 0.18,
            delta_dpr: 0.12,
            max_pitch_offset_deg: 30.0,
            max_ehd_offset: 0.6,
            max_dpr_offset: 0.5,
        }
    }
}

/// Virtual intrinsics used only by the fallback PnP head-pose solver.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeometryCfg {
    /// Assumed horizontal field of view in degrees, clamped to [35, 110].
    pub horizontal_fov_deg: f32,
}

impl Default for GeometryCfg {
    fn default() -> Self {
        Self {
            horizontal_fov_deg: 60.0,
        }
    }
}

/// Top-level engine configuration, deserializable from TOML.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineCfg {
    pub signal: SignalCfg,
    pub score: ScoreCfg,
    pub guardrails: GuardrailCfg,
    pub presence: PresenceCfg,
    pub risk: RiskCfg,
    pub envelope: EnvelopeCfg,
    pub calibration: CalibrationCfg,
    pub geometry: GeometryCfg,
}

pub fn load_toml(s: &str) -> Result<EngineCfg, toml::de::Error> {
    toml::from_str::<EngineCfg>(s)
}

impl EngineCfg {
    pub fn validate(&self) -> eyre::Result<()> {
        // Signal
        if !(0.0..=1.0).contains(&self.signal.confidence_threshold) {
            eyre::bail!("signal.confidence_threshold must be in [0.0, 1.0]");
        }
        for (name, m) in [
            ("pitch", &self.signal.pitch),
            ("yaw", &self.signal.yaw),
            ("roll", &self.signal.roll),
            ("ehd", &self.signal.ehd),
            ("dpr", &self.signal.dpr),
        ] {
            if !(m.window_seconds > 0.0) || !m.window_seconds.is_finite() {
                eyre::bail!("signal.{name}.window_seconds must be > 0");
            }
            if let Some(alpha) = m.alpha
                && !(alpha > 0.0 && alpha <= 1.0)
            {
                eyre::bail!("signal.{name}.alpha must be in (0.0, 1.0]");
            }
            if let Some(rate) = m.rate_limit_per_second
                && !(rate > 0.0 && rate.is_finite())
            {
                eyre::bail!("signal.{name}.rate_limit_per_second must be > 0");
            }
            if let Some(thr) = m.outlier_threshold_per_second
                && !(thr > 0.0 && thr.is_finite())
            {
                eyre::bail!("signal.{name}.outlier_threshold_per_second must be > 0");
            }
        }

        // Score
        if !(self.score.ema_alpha > 0.0 && self.score.ema_alpha <= 1.0) {
            eyre::bail!("score.ema_alpha must be in (0.0, 1.0]");
        }
        if !(0.0..=100.0).contains(&self.score.neutral) {
            eyre::bail!("score.neutral must be in [0.0, 100.0]");
        }
        for (name, w) in [
            ("pitch_per_deg", self.score.pitch_per_deg),
            ("ehd_per_unit", self.score.ehd_per_unit),
            ("dpr_per_unit", self.score.dpr_per_unit),
        ] {
            if w.is_sign_negative() || !w.is_finite() {
                eyre::bail!("score.{name} must be >= 0");
            }
        }

        // Guardrails
        for (name, axis) in [("yaw", &self.guardrails.yaw), ("roll", &self.guardrails.roll)] {
            if axis.exit_threshold_deg > axis.enter_threshold_deg {
                eyre::bail!("guardrails.{name}: exit threshold must not exceed enter threshold");
            }
            if axis.enter_seconds < 0.0 || axis.exit_seconds < 0.0 {
                eyre::bail!("guardrails.{name}: dwell times must be >= 0");
            }
        }
        if !(0.0..=1.0).contains(&self.guardrails.confidence.face_threshold)
            || !(0.0..=1.0).contains(&self.guardrails.confidence.pose_threshold)
        {
            eyre::bail!("guardrails.confidence thresholds must be in [0.0, 1.0]");
        }
        if !(0.0..=1.0).contains(&self.guardrails.illumination.threshold) {
            eyre::bail!("guardrails.illumination.threshold must be in [0.0, 1.0]");
        }

        // Presence
        if self.presence.present_consecutive_frames == 0 {
            eyre::bail!("presence.present_consecutive_frames must be >= 1");
        }
        if self.presence.absent_consecutive_frames == 0 {
            eyre::bail!("presence.absent_consecutive_frames must be >= 1");
        }
        if !(0.0..=1.0).contains(&self.presence.pose_visibility) {
            eyre::bail!("presence.pose_visibility must be in [0.0, 1.0]");
        }

        // Risk
        if !(self.risk.trigger_seconds > 0.0) {
            eyre::bail!("risk.trigger_seconds must be > 0");
        }
        if !(self.risk.recovery_seconds > 0.0) {
            eyre::bail!("risk.recovery_seconds must be > 0");
        }
        if !(0.0..=100.0).contains(&self.risk.hysteresis_delta_pct) {
            eyre::bail!("risk.hysteresis_delta_pct must be in [0.0, 100.0]");
        }
        if !(self.risk.max_delta_seconds > 0.0) {
            eyre::bail!("risk.max_delta_seconds must be > 0");
        }

        // Calibration
        if self.calibration.target_samples == 0 {
            eyre::bail!("calibration.target_samples must be >= 1");
        }
        if !(0.0..=100.0).contains(&self.calibration.min_quality) {
            eyre::bail!("calibration.min_quality must be in [0.0, 100.0]");
        }
        if self.calibration.validation_duration_ms == 0 {
            eyre::bail!("calibration.validation_duration_ms must be >= 1");
        }
        if self.calibration.max_collection_duration_ms == 0 {
            eyre::bail!("calibration.max_collection_duration_ms must be >= 1");
        }
        if !(0.0..=1.0).contains(&self.calibration.min_confidence) {
            eyre::bail!("calibration.min_confidence must be in [0.0, 1.0]");
        }

        // Geometry: FOV is clamped at use, only reject nonsense here
        if !self.geometry.horizontal_fov_deg.is_finite() || self.geometry.horizontal_fov_deg <= 0.0
        {
            eyre::bail!("geometry.horizontal_fov_deg must be a positive number");
        }

        Ok(())
    }
}

/// Read `POSTURE_*` environment variables once and fold them into `cfg`.
/// Unset or unparseable variables leave the current value untouched.
pub fn seed_from_env(cfg: &mut EngineCfg) {
    fn env_f32(name: &str) -> Option<f32> {
        std::env::var(name).ok()?.trim().parse::<f32>().ok().filter(|v| v.is_finite())
    }
    fn env_u64(name: &str) -> Option<u64> {
        std::env::var(name).ok()?.trim().parse::<u64>().ok()
    }

    if let Some(v) = env_f32("POSTURE_CONFIDENCE_THRESHOLD") {
        cfg.signal.confidence_threshold = v.clamp(0.0, 1.0);
    }
    if let Some(v) = env_f32("POSTURE_SCORE_EMA_ALPHA")
        && v > 0.0
        && v <= 1.0
    {
        cfg.score.ema_alpha = v;
    }
    if let Some(v) = env_f32("POSTURE_NEUTRAL_SCORE") {
        cfg.score.neutral = v.clamp(0.0, 100.0);
    }
    if let Some(v) = env_f32("POSTURE_TRIGGER_SECONDS")
        && v > 0.0
    {
        cfg.risk.trigger_seconds = v;
    }
    if let Some(v) = env_f32("POSTURE_RECOVERY_SECONDS")
        && v > 0.0
    {
        cfg.risk.recovery_seconds = v;
    }
    if let Some(v) = env_u64("POSTURE_ABSENCE_TO_IDLE_MS")
        && v > 0
    {
        cfg.envelope.absence_to_idle_ms = v;
    }
    if let Some(v) = env_f32("POSTURE_YAW_ENTER_DEG")
        && v > 0.0
    {
        cfg.guardrails.yaw.enter_threshold_deg = v;
        cfg.guardrails.yaw.exit_threshold_deg = cfg.guardrails.yaw.exit_threshold_deg.min(v);
    }
    if let Some(v) = env_f32("POSTURE_FOV_DEG")
        && v > 0.0
    {
        cfg.geometry.horizontal_fov_deg = v;
    }
}
