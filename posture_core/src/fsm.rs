//! Core risk state machine: GOOD, AT_RISK, BAD_POSTURE, RECOVERING.
//!
//! Driven by two dwell timers. `timeInConditions` accumulates while risk
//! conditions hold and promotes AT_RISK to BAD_POSTURE at the trigger
//! threshold; `timeInRecovery` accumulates while recovery conditions hold
//! and resolves BAD_POSTURE back to GOOD through RECOVERING.

use posture_config::RiskCfg;

use crate::risk::RiskAssessment;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RiskState {
    Good,
    AtRisk,
    BadPosture,
    Recovering,
}

impl RiskState {
    pub fn as_str(self) -> &'static str {
        match self {
            RiskState::Good => "GOOD",
            RiskState::AtRisk => "AT_RISK",
            RiskState::BadPosture => "BAD_POSTURE",
            RiskState::Recovering => "RECOVERING",
        }
    }
}

/// Emitted on every state change, with enough context to reconstruct why.
#[derive(Debug, Clone, PartialEq)]
pub struct RiskTransition {
    pub from: RiskState,
    pub to: RiskState,
    pub at_ms: u64,
    pub time_in_conditions_s: f32,
    pub time_in_recovery_s: f32,
    pub d_pitch: Option<f32>,
    pub d_ehd: Option<f32>,
    pub d_dpr: Option<f32>,
    pub reasons: Vec<String>,
}

#[derive(Debug)]
pub struct RiskStateMachine {
    cfg: RiskCfg,
    state: RiskState,
    time_in_conditions_s: f32,
    time_in_recovery_s: f32,
    last_tick_ms: Option<u64>,
}

impl RiskStateMachine {
    pub fn new(cfg: RiskCfg) -> Self {
        Self {
            cfg,
            state: RiskState::Good,
            time_in_conditions_s: 0.0,
            time_in_recovery_s: 0.0,
            last_tick_ms: None,
        }
    }

    pub fn set_cfg(&mut self, cfg: RiskCfg) {
        self.cfg = cfg;
    }

    pub fn state(&self) -> RiskState {
        self.state
    }

    pub fn timers(&self) -> (f32, f32) {
        (self.time_in_conditions_s, self.time_in_recovery_s)
    }

    /// Advance the machine by one frame. With `freeze` set the timestamp
    /// still advances but the state and timers are untouched, so a pause
    /// never manufactures dwell time.
    pub fn tick(
        &mut self,
        assessment: &RiskAssessment,
        now_ms: u64,
        freeze: bool,
    ) -> Option<RiskTransition> {
        let dt = match self.last_tick_ms {
            Some(prev) => {
                (((now_ms.saturating_sub(prev)) as f64) / 1000.0).min(f64::from(self.cfg.max_delta_seconds)) as f32
            }
            None => 0.0,
        };
        self.last_tick_ms = Some(now_ms);

        if freeze || assessment.should_hold {
            return None;
        }

        let from = self.state;
        match self.state {
            RiskState::Good => {
                if assessment.conditions_met {
                    self.state = RiskState::AtRisk;
                    self.time_in_conditions_s += dt;
                } else {
                    self.time_in_conditions_s = 0.0;
                    self.time_in_recovery_s = 0.0;
                }
            }
            RiskState::AtRisk => {
                if assessment.conditions_met {
                    self.time_in_conditions_s =
                        (self.time_in_conditions_s + dt).min(self.cfg.trigger_seconds);
                    if self.time_in_conditions_s >= self.cfg.trigger_seconds {
                        self.state = RiskState::BadPosture;
                        self.time_in_recovery_s = 0.0;
                    }
                } else {
                    self.state = RiskState::Good;
                    self.time_in_conditions_s = 0.0;
                    self.time_in_recovery_s = 0.0;
                }
            }
            RiskState::BadPosture => {
                if assessment.conditions_met {
                    self.time_in_conditions_s = self.cfg.trigger_seconds;
                    self.time_in_recovery_s = 0.0;
                } else if assessment.recovery_conditions_met {
                    self.state = RiskState::Recovering;
                    self.time_in_recovery_s += dt;
                    if self.time_in_recovery_s >= self.cfg.recovery_seconds {
                        self.state = RiskState::Good;
                        self.time_in_conditions_s = 0.0;
                        self.time_in_recovery_s = 0.0;
                    }
                } else {
                    self.state = RiskState::AtRisk;
                    self.time_in_conditions_s = 0.0;
                    self.time_in_recovery_s = 0.0;
                }
            }
            RiskState::Recovering => {
                if assessment.conditions_met {
                    // Back to AT_RISK, never straight to BAD_POSTURE.
                    self.state = RiskState::AtRisk;
                    self.time_in_recovery_s = 0.0;
                    self.time_in_conditions_s += dt;
                } else if assessment.recovery_conditions_met {
                    self.time_in_recovery_s += dt;
                    if self.time_in_recovery_s >= self.cfg.recovery_seconds {
                        self.state = RiskState::Good;
                        self.time_in_conditions_s = 0.0;
                        self.time_in_recovery_s = 0.0;
                    }
                } else {
                    self.state = RiskState::AtRisk;
                    self.time_in_conditions_s = 0.0;
                    self.time_in_recovery_s = 0.0;
                }
            }
        }

        if self.state != from {
            let transition = RiskTransition {
                from,
                to: self.state,
                at_ms: now_ms,
                time_in_conditions_s: self.time_in_conditions_s,
                time_in_recovery_s: self.time_in_recovery_s,
                d_pitch: assessment.d_pitch,
                d_ehd: assessment.d_ehd,
                d_dpr: assessment.d_dpr,
                reasons: assessment.reasons.clone(),
            };
            tracing::debug!(
                from = from.as_str(),
                to = self.state.as_str(),
                t_cond = self.time_in_conditions_s,
                t_rec = self.time_in_recovery_s,
                "risk transition"
            );
            Some(transition)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn met() -> RiskAssessment {
        RiskAssessment {
            conditions_met: true,
            recovery_conditions_met: false,
            should_hold: false,
            reasons: vec![],
            d_pitch: Some(18.0),
            d_ehd: Some(0.35),
            d_dpr: Some(0.15),
        }
    }

    fn recovering() -> RiskAssessment {
        RiskAssessment {
            conditions_met: false,
            recovery_conditions_met: true,
            should_hold: false,
            reasons: vec![],
            d_pitch: Some(2.0),
            d_ehd: Some(0.01),
            d_dpr: Some(0.0),
        }
    }

    fn neither() -> RiskAssessment {
        RiskAssessment {
            conditions_met: false,
            recovery_conditions_met: false,
            should_hold: false,
            reasons: vec![],
            d_pitch: Some(10.0),
            d_ehd: Some(0.1),
            d_dpr: Some(0.05),
        }
    }

    /// Drive the machine at 10 fps for `seconds`, returning the last now_ms.
    fn run(fsm: &mut RiskStateMachine, a: &RiskAssessment, from_ms: u64, seconds: f32) -> u64 {
        let steps = (seconds * 10.0) as u64;
        let mut now = from_ms;
        for _ in 0..steps {
            now += 100;
            fsm.tick(a, now, false);
        }
        now
    }

    #[test]
    fn good_to_at_risk_is_immediate() {
        let mut fsm = RiskStateMachine::new(RiskCfg::default());
        let t = fsm.tick(&met(), 0, false);
        assert_eq!(t.unwrap().to, RiskState::AtRisk);
        // Staying AT_RISK emits no further transition.
        assert!(fsm.tick(&met(), 100, false).is_none());
        assert_eq!(fsm.state(), RiskState::AtRisk);
    }

    #[test]
    fn bad_posture_requires_the_trigger_dwell() {
        let mut fsm = RiskStateMachine::new(RiskCfg::default());
        fsm.tick(&met(), 0, false);
        let now = run(&mut fsm, &met(), 0, 2.5);
        assert_eq!(fsm.state(), RiskState::AtRisk);
        run(&mut fsm, &met(), now, 1.0);
        assert_eq!(fsm.state(), RiskState::BadPosture);
    }

    #[test]
    fn at_risk_resets_to_good_when_conditions_clear() {
        let mut fsm = RiskStateMachine::new(RiskCfg::default());
        fsm.tick(&met(), 0, false);
        run(&mut fsm, &met(), 0, 1.0);
        assert_eq!(fsm.state(), RiskState::AtRisk);
        fsm.tick(&neither(), 2_000, false);
        assert_eq!(fsm.state(), RiskState::Good);
        assert_eq!(fsm.timers(), (0.0, 0.0));
    }

    #[test]
    fn recovery_path_resolves_to_good() {
        let mut fsm = RiskStateMachine::new(RiskCfg::default());
        fsm.tick(&met(), 0, false);
        let now = run(&mut fsm, &met(), 0, 4.0);
        assert_eq!(fsm.state(), RiskState::BadPosture);
        let t = fsm.tick(&recovering(), now + 100, false);
        assert_eq!(fsm.state(), RiskState::Recovering);
        assert_eq!(t.unwrap().to, RiskState::Recovering);
        let now = run(&mut fsm, &recovering(), now + 100, 3.5);
        assert_eq!(fsm.state(), RiskState::Good, "at {now}");
    }

    #[test]
    fn recovering_relapse_goes_to_at_risk_not_bad_posture() {
        let mut fsm = RiskStateMachine::new(RiskCfg::default());
        fsm.tick(&met(), 0, false);
        let now = run(&mut fsm, &met(), 0, 4.0);
        assert_eq!(fsm.state(), RiskState::BadPosture);
        let now = run(&mut fsm, &recovering(), now, 1.0);
        assert_eq!(fsm.state(), RiskState::Recovering);
        let t = fsm.tick(&met(), now + 100, false);
        assert_eq!(t.unwrap().to, RiskState::AtRisk);
    }

    #[test]
    fn bad_posture_with_neither_falls_back_to_at_risk() {
        let mut fsm = RiskStateMachine::new(RiskCfg::default());
        fsm.tick(&met(), 0, false);
        let now = run(&mut fsm, &met(), 0, 4.0);
        assert_eq!(fsm.state(), RiskState::BadPosture);
        fsm.tick(&neither(), now + 100, false);
        assert_eq!(fsm.state(), RiskState::AtRisk);
        assert_eq!(fsm.timers(), (0.0, 0.0));
    }

    #[test]
    fn freeze_advances_time_without_accumulating() {
        let mut fsm = RiskStateMachine::new(RiskCfg::default());
        fsm.tick(&met(), 0, false);
        run(&mut fsm, &met(), 0, 1.0);
        let (t_cond, _) = fsm.timers();
        assert!(t_cond > 0.0);
        // A long frozen gap: state and timers untouched, timestamp advanced.
        fsm.tick(&met(), 60_000, true);
        assert_eq!(fsm.state(), RiskState::AtRisk);
        assert_eq!(fsm.timers().0, t_cond);
        // Next live tick accumulates only its own clamped dt.
        fsm.tick(&met(), 60_100, false);
        assert!(fsm.timers().0 - t_cond <= 0.5 + 1e-6);
    }

    #[test]
    fn hold_freezes_the_state() {
        let mut fsm = RiskStateMachine::new(RiskCfg::default());
        fsm.tick(&met(), 0, false);
        run(&mut fsm, &met(), 0, 1.0);
        assert_eq!(fsm.state(), RiskState::AtRisk);
        let held = RiskAssessment::held("missing calibration");
        for i in 0..100 {
            assert!(fsm.tick(&held, 10_000 + i * 100, false).is_none());
        }
        assert_eq!(fsm.state(), RiskState::AtRisk);
    }

    #[test]
    fn delta_is_clamped_between_ticks() {
        let mut fsm = RiskStateMachine::new(RiskCfg::default());
        fsm.tick(&met(), 0, false);
        fsm.tick(&met(), 100, false);
        assert_eq!(fsm.state(), RiskState::AtRisk);
        // A 60s gap counts as at most max_delta_seconds of dwell.
        fsm.tick(&met(), 60_000, false);
        assert!(fsm.timers().0 <= RiskCfg::default().max_delta_seconds + 0.2);
        assert_eq!(fsm.state(), RiskState::AtRisk);
    }

    #[test]
    fn transitions_carry_the_assessment_context() {
        let mut fsm = RiskStateMachine::new(RiskCfg::default());
        fsm.tick(&neither(), 0, false);
        let t = fsm.tick(&met(), 100, false).unwrap();
        assert_eq!(t.from, RiskState::Good);
        assert_eq!(t.to, RiskState::AtRisk);
        assert_eq!(t.d_pitch, Some(18.0));
    }
}
