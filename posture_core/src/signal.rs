//! Per-metric signal conditioning: confidence gate, outlier gate, rate
//! limiter, and EMA smoothing.
//!
//! The processor never drops a frame: when a sample is gated, paused, or
//! rejected as an outlier it re-emits the previous smoothed value and leaves
//! its state untouched. Flags on the returned series record what happened.

use posture_config::{MetricSignalCfg, SignalCfg};

use crate::types::{
    DetectionReliability, MetricConfidence, MetricKey, MetricSeries, MetricSource,
};

/// EMA with a first-sample seed.
#[derive(Debug, Clone, Copy, Default)]
struct Ema {
    value: Option<f32>,
}

impl Ema {
    fn update(&mut self, x: f32, alpha: f32) -> f32 {
        let y = match self.value {
            None => x,
            Some(prev) => prev + alpha * (x - prev),
        };
        self.value = Some(y);
        y
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct MetricState {
    smoother: Ema,
    last_raw: Option<f32>,
}

/// One raw sample handed to [`SignalProcessor::process`].
#[derive(Debug, Clone, Copy)]
pub struct RawSample {
    pub raw: Option<f32>,
    pub source: MetricSource,
    pub confidence: MetricConfidence,
}

/// Frame context shared by every metric in the frame.
#[derive(Debug, Clone, Copy)]
pub struct FrameContext {
    pub delta_seconds: f32,
    pub reliability: DetectionReliability,
}

#[derive(Debug)]
pub struct SignalProcessor {
    cfg: SignalCfg,
    gate_blocked: bool,
    pitch: MetricState,
    yaw: MetricState,
    roll: MetricState,
    ehd: MetricState,
    dpr: MetricState,
}

impl SignalProcessor {
    pub fn new(cfg: SignalCfg) -> Self {
        Self {
            cfg,
            gate_blocked: false,
            pitch: MetricState::default(),
            yaw: MetricState::default(),
            roll: MetricState::default(),
            ehd: MetricState::default(),
            dpr: MetricState::default(),
        }
    }

    /// Refresh the config snapshot and evaluate the frame-level confidence
    /// gate. Rejects null, non-finite, non-positive, or below-threshold
    /// confidences.
    pub fn begin_frame(&mut self, cfg: SignalCfg, frame_confidence: Option<f32>) {
        self.cfg = cfg;
        self.gate_blocked = match frame_confidence {
            Some(c) if c.is_finite() && c > 0.0 => c < self.cfg.confidence_threshold,
            _ => true,
        };
    }

    pub fn gate_blocked(&self) -> bool {
        self.gate_blocked
    }

    /// Condition one metric sample. Returns the full series record for the
    /// frame, including the previous smoothed value when no update happened.
    pub fn process(&mut self, key: MetricKey, sample: RawSample, ctx: &FrameContext) -> MetricSeries {
        let metric_cfg = *self.metric_cfg(key);
        let ignore_pause = self.cfg.ignore_reliability_pause;
        let gate_blocked = self.gate_blocked;
        let state = self.state_mut(key);

        let gated = gate_blocked || sample.confidence != MetricConfidence::High;
        let paused =
            ctx.reliability == DetectionReliability::Unreliable && !ignore_pause;

        let mut series = MetricSeries {
            raw: sample.raw,
            smoothed: state.smoother.value,
            source: sample.source,
            confidence: sample.confidence,
            outlier: false,
            gated,
            reliability_paused: paused,
        };

        let raw = match sample.raw {
            Some(v) if v.is_finite() => v,
            _ => return series,
        };
        if gated || paused {
            return series;
        }

        let delta_seconds = ctx.delta_seconds.clamp(1e-3, 0.5);

        if let Some(last) = state.last_raw {
            let delta = raw - last;
            if let Some(outlier_thr) = metric_cfg.outlier_threshold_per_second
                && (delta.abs() / delta_seconds) > outlier_thr
            {
                series.outlier = true;
                tracing::trace!(
                    metric = key.as_str(),
                    delta,
                    delta_seconds,
                    "outlier sample rejected"
                );
                return series;
            }
        }

        // Rate limit the accepted delta before smoothing.
        let limited = match (state.last_raw, metric_cfg.rate_limit_per_second) {
            (Some(last), Some(rate)) => {
                let max_step = rate * delta_seconds;
                last + (raw - last).clamp(-max_step, max_step)
            }
            _ => raw,
        };

        let alpha = metric_cfg
            .alpha
            .unwrap_or_else(|| (3.0 * delta_seconds / metric_cfg.window_seconds).clamp(0.01, 1.0));
        series.smoothed = Some(state.smoother.update(limited, alpha));
        state.last_raw = Some(raw);
        series
    }

    fn metric_cfg(&self, key: MetricKey) -> &MetricSignalCfg {
        match key {
            MetricKey::Pitch => &self.cfg.pitch,
            MetricKey::Yaw => &self.cfg.yaw,
            MetricKey::Roll => &self.cfg.roll,
            MetricKey::Ehd => &self.cfg.ehd,
            MetricKey::Dpr => &self.cfg.dpr,
        }
    }

    fn state_mut(&mut self, key: MetricKey) -> &mut MetricState {
        match key {
            MetricKey::Pitch => &mut self.pitch,
            MetricKey::Yaw => &mut self.yaw,
            MetricKey::Roll => &mut self.roll,
            MetricKey::Ehd => &mut self.ehd,
            MetricKey::Dpr => &mut self.dpr,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn high(raw: f32) -> RawSample {
        RawSample {
            raw: Some(raw),
            source: MetricSource::FaceTransform,
            confidence: MetricConfidence::High,
        }
    }

    fn ctx(delta: f32) -> FrameContext {
        FrameContext {
            delta_seconds: delta,
            reliability: DetectionReliability::Ok,
        }
    }

    fn processor() -> SignalProcessor {
        let mut p = SignalProcessor::new(SignalCfg::default());
        p.begin_frame(SignalCfg::default(), Some(0.9));
        p
    }

    #[test]
    fn first_sample_seeds_the_smoother() {
        let mut p = processor();
        let s = p.process(MetricKey::Pitch, high(10.0), &ctx(0.1));
        assert_eq!(s.smoothed, Some(10.0));
        assert!(!s.gated && !s.outlier && !s.reliability_paused);
    }

    #[test]
    fn smoothing_moves_toward_the_raw_value() {
        let mut p = processor();
        p.process(MetricKey::Pitch, high(0.0), &ctx(0.1));
        let s = p.process(MetricKey::Pitch, high(2.0), &ctx(0.1));
        let y = s.smoothed.unwrap();
        assert!(y > 0.0 && y < 2.0, "smoothed {y}");
    }

    #[test]
    fn low_confidence_samples_are_gated() {
        let mut p = processor();
        p.process(MetricKey::Pitch, high(5.0), &ctx(0.1));
        let s = p.process(
            MetricKey::Pitch,
            RawSample {
                raw: Some(50.0),
                source: MetricSource::FaceTransform,
                confidence: MetricConfidence::Low,
            },
            &ctx(0.1),
        );
        assert!(s.gated);
        assert_eq!(s.smoothed, Some(5.0));
    }

    #[test]
    fn frame_gate_blocks_every_metric() {
        let mut p = processor();
        p.begin_frame(SignalCfg::default(), Some(0.1));
        let s = p.process(MetricKey::Ehd, high(0.5), &ctx(0.1));
        assert!(s.gated);
        assert_eq!(s.smoothed, None);
    }

    #[test]
    fn null_and_non_finite_confidence_block_the_gate() {
        let mut p = processor();
        p.begin_frame(SignalCfg::default(), None);
        assert!(p.gate_blocked());
        p.begin_frame(SignalCfg::default(), Some(f32::NAN));
        assert!(p.gate_blocked());
        p.begin_frame(SignalCfg::default(), Some(0.0));
        assert!(p.gate_blocked());
    }

    #[test]
    fn unreliable_frames_pause_updates() {
        let mut p = processor();
        p.process(MetricKey::Pitch, high(5.0), &ctx(0.1));
        let s = p.process(
            MetricKey::Pitch,
            high(20.0),
            &FrameContext {
                delta_seconds: 0.1,
                reliability: DetectionReliability::Unreliable,
            },
        );
        assert!(s.reliability_paused);
        assert_eq!(s.smoothed, Some(5.0));
    }

    #[test]
    fn steep_deltas_are_rejected_as_outliers() {
        let mut p = processor();
        p.process(MetricKey::Pitch, high(0.0), &ctx(0.1));
        // 60 degrees in 100ms = 600 deg/s, far past the 120 deg/s default.
        let s = p.process(MetricKey::Pitch, high(60.0), &ctx(0.1));
        assert!(s.outlier);
        assert_eq!(s.smoothed, Some(0.0));
        // The outlier did not update last_raw: a sane follow-up is accepted.
        let s = p.process(MetricKey::Pitch, high(1.0), &ctx(0.1));
        assert!(!s.outlier);
    }

    #[test]
    fn rate_limit_clamps_accepted_deltas() {
        let mut cfg = SignalCfg::default();
        cfg.pitch.alpha = Some(1.0);
        cfg.pitch.rate_limit_per_second = Some(10.0);
        cfg.pitch.outlier_threshold_per_second = Some(1_000.0);
        let mut p = SignalProcessor::new(cfg);
        p.begin_frame(cfg, Some(0.9));
        p.process(MetricKey::Pitch, high(0.0), &ctx(0.1));
        let s = p.process(MetricKey::Pitch, high(5.0), &ctx(0.1));
        // 10 deg/s * 0.1 s = 1 degree of accepted movement.
        assert!((s.smoothed.unwrap() - 1.0).abs() < 1e-6);
    }

    #[test]
    fn derived_alpha_tracks_the_window() {
        let mut cfg = SignalCfg::default();
        cfg.pitch.window_seconds = 3.0;
        let mut p = SignalProcessor::new(cfg);
        p.begin_frame(cfg, Some(0.9));
        p.process(MetricKey::Pitch, high(0.0), &ctx(0.1));
        let s = p.process(MetricKey::Pitch, high(1.0), &ctx(0.1));
        // alpha = 3 * 0.1 / 3.0 = 0.1
        assert!((s.smoothed.unwrap() - 0.1).abs() < 1e-6);
    }
}
