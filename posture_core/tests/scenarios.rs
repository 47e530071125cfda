//! End-to-end pipeline scenarios: a calibrated engine fed synthetic frames.
//!
//! Smoothing is pinned to alpha = 1 and the outlier/rate gates are disabled
//! so the scenarios exercise the state machines and score policy against
//! step inputs, not the smoother's settling time.

use posture_config::{EngineCfg, MetricSignalCfg};
use posture_core::engine::{Engine, EngineEvent};
use posture_core::fsm::RiskState;
use posture_core::mocks::{FrameSpec, FrameSynth};
use posture_core::types::{
    Baseline, EngineState, EngineTick, TickPresence, TickReliability, Zone,
};
use posture_traits::Sensitivity;
use rstest::rstest;

fn passthrough_metric() -> MetricSignalCfg {
    MetricSignalCfg {
        alpha: Some(1.0),
        window_seconds: 2.0,
        rate_limit_per_second: None,
        outlier_threshold_per_second: None,
    }
}

fn scenario_engine() -> Engine {
    let mut cfg = EngineCfg::default();
    cfg.signal.pitch = passthrough_metric();
    cfg.signal.yaw = passthrough_metric();
    cfg.signal.roll = passthrough_metric();
    cfg.signal.ehd = passthrough_metric();
    cfg.signal.dpr = passthrough_metric();
    let mut engine = Engine::new(cfg);
    engine.set_calibration(
        Baseline {
            pitch_deg: 0.0,
            ehd: 0.0,
            dpr: 1.0,
            quality: 90.0,
            sample_count: 50,
        },
        Sensitivity::Medium,
        None,
    );
    engine
}

struct Run {
    ticks: Vec<EngineTick>,
    transitions: Vec<(RiskState, RiskState, u64)>,
}

fn drive(engine: &mut Engine, synth: &mut FrameSynth, spec: &FrameSpec, frames: usize) -> Run {
    let mut run = Run {
        ticks: Vec::new(),
        transitions: Vec::new(),
    };
    for _ in 0..frames {
        let frame = synth.frame(spec);
        let (tick, events) = engine.process_frame(&frame);
        for event in events {
            if let EngineEvent::Transition(t) = event {
                run.transitions.push((t.from, t.to, t.at_ms));
            }
        }
        run.ticks.push(tick);
    }
    run
}

fn assert_tick_invariants(ticks: &[EngineTick]) {
    for tick in ticks {
        assert!((0.0..=100.0).contains(&tick.score), "score {}", tick.score);
        assert!(matches!(tick.zone, Zone::Green | Zone::Yellow | Zone::Red));
        assert!(matches!(
            tick.state,
            EngineState::Initial
                | EngineState::Good
                | EngineState::AtRisk
                | EngineState::BadPosture
                | EngineState::Recovering
                | EngineState::Idle
                | EngineState::Unreliable
        ));
    }
}

/// S1: clean posture run. 10 seconds of upright frames end GREEN/GOOD with
/// no risk transitions past the initial settling.
#[test]
fn clean_posture_run_stays_good() {
    let mut engine = scenario_engine();
    let mut synth = FrameSynth::new();
    let run = drive(&mut engine, &mut synth, &FrameSpec::upright(), 100);

    assert_tick_invariants(&run.ticks);
    let last = run.ticks.last().unwrap();
    assert!(last.score >= 90.0, "score {}", last.score);
    assert_eq!(last.zone, Zone::Green);
    assert_eq!(last.state, EngineState::Good);
    assert_eq!(last.presence, TickPresence::Present);
    assert_eq!(last.reliability, TickReliability::Ok);
    assert!(run.transitions.is_empty(), "{:?}", run.transitions);
}

/// S2: slump. GOOD -> AT_RISK on the first live frame, AT_RISK ->
/// BAD_POSTURE once the trigger dwell elapses, score deep in RED.
#[test]
fn slump_reaches_bad_posture_after_the_trigger_dwell() {
    let mut engine = scenario_engine();
    let mut synth = FrameSynth::new();
    let run = drive(&mut engine, &mut synth, &FrameSpec::slumped(), 50);

    assert_tick_invariants(&run.ticks);
    let at_risk = run
        .transitions
        .iter()
        .find(|(_, to, _)| *to == RiskState::AtRisk)
        .expect("AT_RISK transition");
    let bad = run
        .transitions
        .iter()
        .find(|(_, to, _)| *to == RiskState::BadPosture)
        .expect("BAD_POSTURE transition");
    assert_eq!(at_risk.0, RiskState::Good);
    assert_eq!(bad.0, RiskState::AtRisk);
    let dwell_ms = bad.2 - at_risk.2;
    assert!(
        (2_800..=3_600).contains(&dwell_ms),
        "trigger dwell {dwell_ms}ms"
    );

    let last = run.ticks.last().unwrap();
    assert!(last.score <= 30.0, "score {}", last.score);
    assert_eq!(last.zone, Zone::Red);
    assert_eq!(last.state, EngineState::BadPosture);
}

/// S3: recovery. Straighten up out of a slump: BAD_POSTURE -> RECOVERING at
/// once, RECOVERING -> GOOD after the recovery dwell, score climbing
/// monotonically from the recovery onset.
#[test]
fn recovery_resolves_to_good_with_a_climbing_score() {
    let mut engine = scenario_engine();
    let mut synth = FrameSynth::new();
    drive(&mut engine, &mut synth, &FrameSpec::slumped(), 50);

    let run = drive(&mut engine, &mut synth, &FrameSpec::upright(), 50);
    assert_tick_invariants(&run.ticks);

    let recovering = run
        .transitions
        .iter()
        .find(|(_, to, _)| *to == RiskState::Recovering)
        .expect("RECOVERING transition");
    assert_eq!(recovering.0, RiskState::BadPosture);
    let good = run
        .transitions
        .iter()
        .find(|(_, to, _)| *to == RiskState::Good)
        .expect("GOOD transition");
    assert_eq!(good.0, RiskState::Recovering);
    let dwell_ms = good.2 - recovering.2;
    assert!(
        (2_800..=3_600).contains(&dwell_ms),
        "recovery dwell {dwell_ms}ms"
    );

    // Score climbs monotonically from the recovery onset.
    let scores: Vec<f32> = run.ticks.iter().map(|t| t.score).collect();
    for pair in scores.windows(2) {
        assert!(pair[1] >= pair[0] - 1e-3, "score dropped: {pair:?}");
    }
    assert_eq!(run.ticks.last().unwrap().state, EngineState::Good);
}

/// S4: absence. After sustained absence the envelope goes IDLE, the risk
/// timers stay frozen, and the score holds.
#[test]
fn absence_goes_idle_and_freezes_the_score() {
    let mut engine = scenario_engine();
    let mut synth = FrameSynth::new();
    let before = drive(&mut engine, &mut synth, &FrameSpec::upright(), 100);
    let held_score = before.ticks.last().unwrap().score;

    // 8 seconds away: 1s of exit hysteresis, then the 5s idle dwell.
    let run = drive(&mut engine, &mut synth, &FrameSpec::absent(), 80);
    assert_tick_invariants(&run.ticks);
    let last = run.ticks.last().unwrap();
    assert_eq!(last.state, EngineState::Idle);
    assert_eq!(last.presence, TickPresence::Absent);
    assert_eq!(last.score, held_score, "score must hold while absent");
    assert_eq!(last.metrics.pitch_deg, 0.0);
    assert_eq!(last.metrics.conf, 0.0);
    assert!(run.transitions.is_empty(), "risk FSM must stay frozen");
}

/// S5: unreliable. A sustained head turn trips the yaw guardrail; outward
/// state and reliability flip to UNRELIABLE and the score freezes.
#[test]
fn sustained_yaw_becomes_unreliable_and_freezes_the_score() {
    let mut engine = scenario_engine();
    let mut synth = FrameSynth::new();
    let before = drive(&mut engine, &mut synth, &FrameSpec::upright(), 100);
    let held_score = before.ticks.last().unwrap().score;

    let turned = FrameSpec {
        yaw_deg: 35.0,
        ..FrameSpec::upright()
    };
    let run = drive(&mut engine, &mut synth, &turned, 30);
    assert_tick_invariants(&run.ticks);
    let last = run.ticks.last().unwrap();
    assert_eq!(last.reliability, TickReliability::Unreliable);
    assert_eq!(last.state, EngineState::Unreliable);
    assert_eq!(last.score, held_score, "score must freeze while unreliable");

    // The rail respected its enter dwell: the first second stayed OK.
    for tick in &run.ticks[..9] {
        assert_eq!(tick.reliability, TickReliability::Ok);
    }
}

/// Both orientation axes trip their guardrail the same way.
#[rstest]
#[case::yaw(35.0, 0.0)]
#[case::roll(0.0, 35.0)]
fn sustained_orientation_trips_the_guardrail(#[case] yaw: f32, #[case] roll: f32) {
    let mut engine = scenario_engine();
    let mut synth = FrameSynth::new();
    drive(&mut engine, &mut synth, &FrameSpec::upright(), 100);
    let turned = FrameSpec {
        yaw_deg: yaw,
        roll_deg: roll,
        ..FrameSpec::upright()
    };
    let run = drive(&mut engine, &mut synth, &turned, 30);
    let last = run.ticks.last().unwrap();
    assert_eq!(last.reliability, TickReliability::Unreliable);
    assert_eq!(last.state, EngineState::Unreliable);
}

/// Returning from a head turn clears UNRELIABLE after the exit dwell and
/// resumes from the preserved internal state.
#[test]
fn reliability_recovers_after_the_exit_dwell() {
    let mut engine = scenario_engine();
    let mut synth = FrameSynth::new();
    drive(&mut engine, &mut synth, &FrameSpec::upright(), 100);
    let turned = FrameSpec {
        yaw_deg: 35.0,
        ..FrameSpec::upright()
    };
    drive(&mut engine, &mut synth, &turned, 30);

    let run = drive(&mut engine, &mut synth, &FrameSpec::upright(), 30);
    let last = run.ticks.last().unwrap();
    assert_eq!(last.reliability, TickReliability::Ok);
    assert_eq!(last.state, EngineState::Good);
}

/// The tick serializes to the stable wire shape.
#[test]
fn ticks_serialize_with_stable_field_names() {
    let mut engine = scenario_engine();
    let mut synth = FrameSynth::new();
    let run = drive(&mut engine, &mut synth, &FrameSpec::upright(), 30);
    let json = serde_json::to_value(run.ticks.last().unwrap()).unwrap();
    assert!(json.get("t").is_some());
    assert_eq!(json["presence"], "PRESENT");
    assert_eq!(json["reliability"], "OK");
    assert_eq!(json["zone"], "GREEN");
    assert!(json["metrics"].get("pitchDeg").is_some());
    assert!(json["metrics"].get("ehdNorm").is_some());
    let back: EngineTick = serde_json::from_value(json).unwrap();
    assert_eq!(&back, run.ticks.last().unwrap());
}
