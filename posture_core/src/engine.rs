//! Per-frame coordinator and tick builder.
//!
//! One `Engine` owns every pipeline stage and walks a frame through them in
//! a fixed order: presence, geometry, signal conditioning, guardrails, risk
//! evaluation, state machines, score, calibration, tick assembly. The tick
//! is a pure value; nothing in here escapes by reference.

use posture_config::{
    ConfigStore, EngineCfg, GuardrailOverrides, ScoreOverrides, SignalOverrides,
};
use posture_traits::Sensitivity;

use crate::calibration::{CalibrationEvent, CalibrationFlow, CalibrationRequest};
use crate::envelope::EnvelopeStateMachine;
use crate::error::EngineError;
use crate::fsm::{RiskStateMachine, RiskTransition};
use crate::geometry;
use crate::guardrails::{GuardrailBank, GuardrailInputs, GuardrailReason};
use crate::presence::{PresenceDetector, PresenceState};
use crate::risk::{RiskEvaluator, thresholds_for};
use crate::score::{FreezeReason, ScoreProcessor, ScoreSample};
use crate::signal::{FrameContext, RawSample, SignalProcessor};
use crate::types::{
    Baseline, DetectionReliability, EngineFrame, EngineState, EngineTick, MetricConfidence,
    MetricFlags, MetricKey, MetricSource, MetricValues, RiskThresholds, TickDiagnostics,
    TickMetrics, TickPresence, TickReliability, Zone,
};
use crate::util::{clamp_delta_seconds, round_half_away};

/// Everything the engine can emit besides (and including) the tick.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    Tick(EngineTick),
    Transition(RiskTransition),
    Calibration(CalibrationEvent),
    Error(EngineError),
}

/// Grouped overrides carried by a `config.update` control message.
#[derive(Debug, Clone, Default, serde::Deserialize)]
#[serde(default)]
pub struct ConfigUpdate {
    pub signal: Option<SignalOverrides>,
    pub score: Option<ScoreOverrides>,
    pub guardrails: Option<GuardrailOverrides>,
}

pub struct Engine {
    cfg: EngineCfg,
    store: ConfigStore,
    signal: SignalProcessor,
    presence: PresenceDetector,
    guardrails: GuardrailBank,
    evaluator: RiskEvaluator,
    fsm: RiskStateMachine,
    envelope: EnvelopeStateMachine,
    score: ScoreProcessor,
    calibration: CalibrationFlow,

    baseline: Option<Baseline>,
    thresholds: RiskThresholds,
    baseline_face_size: Option<f32>,
    pending_calibration: Option<CalibrationRequest>,

    last_frame_ms: Option<f64>,
    last_score: Option<(f32, Zone)>,
}

impl core::fmt::Debug for Engine {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Engine")
            .field("risk_state", &self.fsm.state())
            .field("has_baseline", &self.baseline.is_some())
            .field("calibration", &self.calibration.phase())
            .finish()
    }
}

impl Engine {
    pub fn new(cfg: EngineCfg) -> Self {
        let store = ConfigStore::new(cfg.signal, cfg.score, cfg.guardrails);
        let thresholds = RiskThresholds {
            pitch_deg: cfg.calibration.delta_pitch_deg,
            ehd: cfg.calibration.delta_ehd,
            dpr: cfg.calibration.delta_dpr,
        };
        Self {
            signal: SignalProcessor::new(cfg.signal),
            presence: PresenceDetector::new(cfg.presence),
            guardrails: GuardrailBank::new(cfg.guardrails),
            evaluator: RiskEvaluator::new(cfg.risk),
            fsm: RiskStateMachine::new(cfg.risk),
            envelope: EnvelopeStateMachine::new(cfg.envelope),
            score: ScoreProcessor::new(cfg.score),
            calibration: CalibrationFlow::new(cfg.calibration),
            store,
            baseline: None,
            thresholds,
            baseline_face_size: None,
            pending_calibration: None,
            last_frame_ms: None,
            last_score: None,
            cfg,
        }
    }

    /// Install an active calibration, e.g. loaded from the store at startup
    /// or adopted from a completed session.
    pub fn set_calibration(
        &mut self,
        baseline: Baseline,
        sensitivity: Sensitivity,
        custom: Option<RiskThresholds>,
    ) {
        self.thresholds =
            thresholds_for(&baseline, sensitivity, custom.as_ref(), &self.cfg.calibration);
        self.baseline = Some(baseline);
    }

    pub fn baseline(&self) -> Option<&Baseline> {
        self.baseline.as_ref()
    }

    pub fn thresholds(&self) -> &RiskThresholds {
        &self.thresholds
    }

    /// `calibration.apply`: install new absolute risk thresholds.
    pub fn apply_thresholds(&mut self, thresholds: RiskThresholds) {
        self.thresholds = thresholds;
        tracing::info!(
            pitch = thresholds.pitch_deg,
            ehd = thresholds.ehd,
            dpr = thresholds.dpr,
            "risk thresholds applied"
        );
    }

    /// Queue a calibration session; it starts on the next frame so its
    /// timing shares the frame clock.
    pub fn start_calibration(&mut self, request: CalibrationRequest) {
        self.pending_calibration = Some(request);
    }

    pub fn cancel_calibration(&mut self) -> Option<EngineEvent> {
        self.calibration.cancel().map(EngineEvent::Calibration)
    }

    /// `config.update`: merge grouped overrides and propagate the snapshots.
    pub fn update_config(&mut self, update: &ConfigUpdate) {
        if let Some(signal) = &update.signal {
            self.cfg.signal = self.store.update_signal(signal);
        }
        if let Some(score) = &update.score {
            self.cfg.score = self.store.update_score(score);
            self.score.set_cfg(self.cfg.score);
        }
        if let Some(guardrails) = &update.guardrails {
            self.cfg.guardrails = self.store.update_guardrails(guardrails);
            self.guardrails.set_cfg(self.cfg.guardrails);
        }
    }

    /// Walk one frame through the pipeline. Always returns a tick; the event
    /// list carries the tick plus transitions and calibration output.
    pub fn process_frame(&mut self, frame: &EngineFrame) -> (EngineTick, Vec<EngineEvent>) {
        let now_ms = frame.processed_at.max(0.0) as u64;
        let delta_seconds = match self.last_frame_ms {
            Some(prev) => clamp_delta_seconds((frame.processed_at - prev) / 1000.0),
            None => 0.1,
        };
        let frame_interval_ms = self.last_frame_ms.map(|prev| frame.processed_at - prev);
        self.last_frame_ms = Some(frame.processed_at);

        let mut events = Vec::new();

        // 1. Presence.
        let presence_snapshot = self.presence.update(frame, now_ms);
        let present = presence_snapshot.state == PresenceState::Present;

        // 2. Geometry + signal conditioning.
        let frame_confidence = frame_conf(frame);
        let metrics = self.condition_metrics(frame, now_ms, delta_seconds, frame_confidence);

        // 3. Guardrails over the conditioned stream.
        let assessment_inputs = GuardrailInputs {
            yaw_deg: metrics.yaw.smoothed,
            roll_deg: metrics.roll.smoothed,
            face_confidence: frame.face.as_ref().map(|f| f.confidence),
            pose_confidence: frame.pose.as_ref().map(|p| p.confidence),
            illumination: frame.illumination,
            detection_reliability: frame.reliability,
        };
        let guard = self.guardrails.evaluate(&assessment_inputs, now_ms);
        let reliability = guard.reliability;
        let unreliable = reliability == DetectionReliability::Unreliable;

        let mut metrics = metrics;
        metrics.flags.yaw_deweighted = guard.reasons.iter().any(|r| {
            matches!(r, GuardrailReason::YawExcessive | GuardrailReason::RollExcessive)
        });

        // 4. Risk evaluation; the state machine is frozen while the user is
        // away or the signal cannot be trusted.
        let freeze = !present || unreliable;
        let assessment = self
            .evaluator
            .assess(&metrics, self.baseline.as_ref(), &self.thresholds);
        if let Some(transition) = self.fsm.tick(&assessment, now_ms, freeze) {
            events.push(EngineEvent::Transition(transition));
        }

        // 5. Score.
        let sample: ScoreSample = if present {
            self.score.process(&assessment, &metrics, reliability)
        } else {
            self.score.hold(FreezeReason::MissingMetrics)
        };
        let (score, zone) = if sample.frozen {
            self.last_score
                .unwrap_or((self.score.neutral(), sample.zone))
        } else {
            let pair = (sample.ema, sample.zone);
            self.last_score = Some(pair);
            pair
        };

        // 6. Envelope resolves the outward state.
        let out = self
            .envelope
            .tick(presence_snapshot.state, reliability, self.fsm.state(), now_ms);

        // 7. Calibration consumes the conditioned frame.
        if let Some(request) = self.pending_calibration.take() {
            self.calibration.start(request, now_ms);
        }
        if self.calibration.is_active() {
            for event in self
                .calibration
                .ingest(&metrics, reliability, frame_confidence, now_ms)
            {
                if let CalibrationEvent::Complete(outcome) = &event {
                    // Adopt the fresh baseline; persistence stays with the host.
                    self.set_calibration(
                        outcome.baseline,
                        outcome.sensitivity,
                        None,
                    );
                    self.thresholds = outcome.thresholds;
                }
                events.push(EngineEvent::Calibration(event));
            }
        }

        let tick = self.build_tick(frame, &metrics, present, unreliable, score, zone, out.state, now_ms, frame_interval_ms);
        events.push(EngineEvent::Tick(tick.clone()));
        (tick, events)
    }

    fn condition_metrics(
        &mut self,
        frame: &EngineFrame,
        now_ms: u64,
        delta_seconds: f32,
        frame_confidence: Option<f32>,
    ) -> MetricValues {
        self.signal.begin_frame(self.cfg.signal, frame_confidence);

        let width = frame.input_width.map_or(640.0, |w| w as f32);
        let height = frame.input_height.map_or(480.0, |h| h as f32);

        let euler = frame.face.as_ref().and_then(|face| {
            geometry::estimate_head_pose(face, width, height, self.cfg.geometry.horizontal_fov_deg)
        });
        let face_conf = frame
            .face
            .as_ref()
            .map_or(MetricConfidence::None, |f| {
                geometry::pose_metric_confidence(f.confidence)
            });

        let ehd = frame.pose.as_ref().and_then(geometry::compute_ehd);

        let dpr = frame
            .face
            .as_ref()
            .and_then(|face| geometry::compute_dpr(face, self.baseline_face_size));
        // One-shot DPR baseline latch on the first high-confidence face.
        if self.baseline_face_size.is_none()
            && face_conf == MetricConfidence::High
            && let Some(sample) = &dpr
        {
            self.baseline_face_size = Some(sample.face_size);
            tracing::debug!(face_size = sample.face_size, "dpr baseline latched");
        }

        let ctx = FrameContext {
            delta_seconds,
            reliability: frame.reliability,
        };

        let angle = |v: Option<f32>, source| RawSample {
            raw: v,
            source,
            confidence: if v.is_some() { face_conf } else { MetricConfidence::None },
        };
        let euler_source = euler.map_or(MetricSource::Unknown, |e| e.source);

        let pitch = self.signal.process(
            MetricKey::Pitch,
            angle(euler.map(|e| e.pitch_deg), euler_source),
            &ctx,
        );
        let yaw = self.signal.process(
            MetricKey::Yaw,
            angle(euler.map(|e| e.yaw_deg), euler_source),
            &ctx,
        );
        let roll = self.signal.process(
            MetricKey::Roll,
            angle(euler.map(|e| e.roll_deg), euler_source),
            &ctx,
        );
        let ehd_series = self.signal.process(
            MetricKey::Ehd,
            RawSample {
                raw: ehd.map(|e| e.value),
                source: ehd.map_or(MetricSource::Unknown, |e| e.source),
                confidence: ehd.map_or(MetricConfidence::None, |e| e.confidence),
            },
            &ctx,
        );
        let dpr_series = self.signal.process(
            MetricKey::Dpr,
            RawSample {
                raw: dpr.as_ref().map(|d| d.ratio),
                source: dpr.as_ref().map_or(MetricSource::Unknown, |d| d.source),
                confidence: dpr.as_ref().map_or(MetricConfidence::None, |_| face_conf),
            },
            &ctx,
        );

        MetricValues {
            frame_id: frame.frame_id,
            timestamp_ms: now_ms,
            baseline_face_size: self.baseline_face_size,
            pitch,
            yaw,
            roll,
            ehd: ehd_series,
            dpr: dpr_series,
            flags: MetricFlags {
                yaw_deweighted: false,
                low_confidence: self.signal.gate_blocked(),
                baseline_pending: self.baseline_face_size.is_none(),
            },
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn build_tick(
        &self,
        frame: &EngineFrame,
        metrics: &MetricValues,
        present: bool,
        unreliable: bool,
        score: f32,
        zone: Zone,
        state: EngineState,
        now_ms: u64,
        frame_interval_ms: Option<f64>,
    ) -> EngineTick {
        let conf = frame_conf(frame).unwrap_or(0.0).clamp(0.0, 1.0);
        let tick_metrics = if present {
            TickMetrics {
                pitch_deg: round_half_away(metrics.pitch.smoothed.unwrap_or(0.0), 3),
                ehd_norm: round_half_away(metrics.ehd.smoothed.unwrap_or(0.0), 3),
                dpr: round_half_away(metrics.dpr.smoothed.unwrap_or(0.0), 3),
                conf,
            }
        } else {
            TickMetrics {
                pitch_deg: 0.0,
                ehd_norm: 0.0,
                dpr: 0.0,
                conf: 0.0,
            }
        };

        let fps = frame.fps.or_else(|| {
            frame_interval_ms
                .filter(|ms| *ms > 0.0)
                .map(|ms| round_half_away((1000.0 / ms) as f32, 1))
        });
        let diagnostics = TickDiagnostics {
            input_width: frame.input_width,
            fps,
            dominant_track_id: frame.dominant_track_id.clone(),
        };

        EngineTick {
            t: now_ms,
            presence: if present {
                TickPresence::Present
            } else {
                TickPresence::Absent
            },
            reliability: if unreliable {
                TickReliability::Unreliable
            } else {
                TickReliability::Ok
            },
            metrics: tick_metrics,
            score: round_half_away(score, 1),
            zone,
            state,
            diagnostics: (!diagnostics.is_empty()).then_some(diagnostics),
        }
    }
}

/// Overall frame confidence: the best of the available detector confidences.
fn frame_conf(frame: &EngineFrame) -> Option<f32> {
    match (
        frame.face.as_ref().map(|f| f.confidence),
        frame.pose.as_ref().map(|p| p.confidence),
    ) {
        (Some(f), Some(p)) => Some(f.max(p)),
        (Some(f), None) => Some(f),
        (None, Some(p)) => Some(p),
        (None, None) => None,
    }
}
