//! Engine envelope state machine.
//!
//! Overlays INITIAL, IDLE and UNRELIABLE on the core risk state using
//! presence and reliability. The envelope never reaches into the risk
//! machine: it consumes a value snapshot of the recommended state each frame.

use posture_config::EnvelopeCfg;

use crate::fsm::RiskState;
use crate::presence::PresenceState;
use crate::types::{DetectionReliability, EngineState};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EnvelopeOutput {
    /// The externally reported state for this frame.
    pub state: EngineState,
    /// Hint: the host may stop the camera after sustained absence.
    pub should_sleep: bool,
    /// Hint: sampling may be boosted briefly after the user returns.
    pub should_boost: bool,
}

/// Internal envelope position; UNRELIABLE is an override, not a position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Position {
    Initial,
    Tracking,
    Idle,
}

#[derive(Debug)]
pub struct EnvelopeStateMachine {
    cfg: EnvelopeCfg,
    position: Position,
    absent_since_ms: Option<u64>,
    present_since_ms: Option<u64>,
    resume_boost_until_ms: u64,
    last_presence: Option<PresenceState>,
}

impl EnvelopeStateMachine {
    pub fn new(cfg: EnvelopeCfg) -> Self {
        Self {
            cfg,
            position: Position::Initial,
            absent_since_ms: None,
            present_since_ms: None,
            resume_boost_until_ms: 0,
            last_presence: None,
        }
    }

    pub fn set_cfg(&mut self, cfg: EnvelopeCfg) {
        self.cfg = cfg;
    }

    pub fn is_tracking(&self) -> bool {
        self.position == Position::Tracking
    }

    pub fn tick(
        &mut self,
        presence: PresenceState,
        reliability: DetectionReliability,
        risk_state: RiskState,
        now_ms: u64,
    ) -> EnvelopeOutput {
        // Presence edges.
        if self.last_presence != Some(presence) {
            match presence {
                PresenceState::Absent => {
                    self.absent_since_ms = Some(now_ms);
                    self.present_since_ms = None;
                }
                PresenceState::Present => {
                    self.present_since_ms = Some(now_ms);
                    self.absent_since_ms = None;
                    if self.last_presence == Some(PresenceState::Absent) {
                        self.resume_boost_until_ms = now_ms + self.cfg.resume_boost_ms;
                    }
                }
            }
            self.last_presence = Some(presence);
        }

        let absence_ms = self
            .absent_since_ms
            .map(|since| now_ms.saturating_sub(since));
        let presence_ms = self
            .present_since_ms
            .map(|since| now_ms.saturating_sub(since));

        match presence {
            PresenceState::Absent => {
                if absence_ms.is_some_and(|ms| ms >= self.cfg.absence_to_idle_ms)
                    && self.position != Position::Idle
                {
                    self.position = Position::Idle;
                    tracing::debug!(absence_ms, "envelope: IDLE");
                }
            }
            PresenceState::Present => {
                if matches!(self.position, Position::Initial | Position::Idle)
                    && presence_ms.is_some_and(|ms| ms >= self.cfg.presence_resume_ms)
                {
                    self.position = Position::Tracking;
                    tracing::debug!(presence_ms, "envelope: tracking resumed");
                }
            }
        }

        let state = if reliability == DetectionReliability::Unreliable {
            EngineState::Unreliable
        } else {
            match self.position {
                Position::Initial => EngineState::Initial,
                Position::Idle => EngineState::Idle,
                Position::Tracking => match risk_state {
                    RiskState::Good => EngineState::Good,
                    RiskState::AtRisk => EngineState::AtRisk,
                    RiskState::BadPosture => EngineState::BadPosture,
                    RiskState::Recovering => EngineState::Recovering,
                },
            }
        };

        EnvelopeOutput {
            state,
            should_sleep: presence == PresenceState::Absent
                && absence_ms.is_some_and(|ms| ms >= self.cfg.sleep_after_absence_ms),
            should_boost: presence == PresenceState::Present
                && now_ms <= self.resume_boost_until_ms,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn machine() -> EnvelopeStateMachine {
        EnvelopeStateMachine::new(EnvelopeCfg::default())
    }

    #[test]
    fn starts_in_initial_until_presence_settles() {
        let mut env = machine();
        let out = env.tick(PresenceState::Present, DetectionReliability::Ok, RiskState::Good, 0);
        assert_eq!(out.state, EngineState::Initial);
        // 2s of presence promotes to tracking.
        let out =
            env.tick(PresenceState::Present, DetectionReliability::Ok, RiskState::Good, 2_000);
        assert_eq!(out.state, EngineState::Good);
    }

    #[test]
    fn sustained_absence_becomes_idle() {
        let mut env = machine();
        env.tick(PresenceState::Present, DetectionReliability::Ok, RiskState::Good, 0);
        env.tick(PresenceState::Present, DetectionReliability::Ok, RiskState::Good, 2_000);
        env.tick(PresenceState::Absent, DetectionReliability::Ok, RiskState::Good, 3_000);
        let out = env.tick(PresenceState::Absent, DetectionReliability::Ok, RiskState::Good, 8_000);
        assert_eq!(out.state, EngineState::Idle);
    }

    #[test]
    fn short_absence_does_not_idle() {
        let mut env = machine();
        env.tick(PresenceState::Present, DetectionReliability::Ok, RiskState::Good, 0);
        env.tick(PresenceState::Present, DetectionReliability::Ok, RiskState::Good, 2_000);
        let out = env.tick(PresenceState::Absent, DetectionReliability::Ok, RiskState::Good, 5_000);
        assert_eq!(out.state, EngineState::Good);
    }

    #[test]
    fn unreliable_overrides_without_mutating() {
        let mut env = machine();
        env.tick(PresenceState::Present, DetectionReliability::Ok, RiskState::Good, 0);
        env.tick(PresenceState::Present, DetectionReliability::Ok, RiskState::Good, 2_000);
        let out = env.tick(
            PresenceState::Present,
            DetectionReliability::Unreliable,
            RiskState::AtRisk,
            3_000,
        );
        assert_eq!(out.state, EngineState::Unreliable);
        // Back to OK: the internal position was preserved.
        let out =
            env.tick(PresenceState::Present, DetectionReliability::Ok, RiskState::AtRisk, 3_100);
        assert_eq!(out.state, EngineState::AtRisk);
    }

    #[test]
    fn tracking_mirrors_the_risk_state() {
        let mut env = machine();
        env.tick(PresenceState::Present, DetectionReliability::Ok, RiskState::Good, 0);
        env.tick(PresenceState::Present, DetectionReliability::Ok, RiskState::Good, 2_000);
        for (risk, expected) in [
            (RiskState::AtRisk, EngineState::AtRisk),
            (RiskState::BadPosture, EngineState::BadPosture),
            (RiskState::Recovering, EngineState::Recovering),
            (RiskState::Good, EngineState::Good),
        ] {
            let out = env.tick(PresenceState::Present, DetectionReliability::Ok, risk, 3_000);
            assert_eq!(out.state, expected);
        }
    }

    #[test]
    fn sleep_hint_after_a_minute_of_absence() {
        let mut env = machine();
        env.tick(PresenceState::Absent, DetectionReliability::Ok, RiskState::Good, 0);
        let out = env.tick(PresenceState::Absent, DetectionReliability::Ok, RiskState::Good, 59_000);
        assert!(!out.should_sleep);
        let out = env.tick(PresenceState::Absent, DetectionReliability::Ok, RiskState::Good, 60_000);
        assert!(out.should_sleep);
    }

    #[test]
    fn resume_boost_fires_on_the_return_edge() {
        let mut env = machine();
        env.tick(PresenceState::Absent, DetectionReliability::Ok, RiskState::Good, 0);
        let out = env.tick(PresenceState::Present, DetectionReliability::Ok, RiskState::Good, 10_000);
        assert!(out.should_boost);
        let out = env.tick(PresenceState::Present, DetectionReliability::Ok, RiskState::Good, 13_900);
        assert!(out.should_boost);
        let out = env.tick(PresenceState::Present, DetectionReliability::Ok, RiskState::Good, 14_100);
        assert!(!out.should_boost);
    }

    #[test]
    fn idle_recovers_through_the_presence_dwell() {
        let mut env = machine();
        env.tick(PresenceState::Absent, DetectionReliability::Ok, RiskState::Good, 0);
        env.tick(PresenceState::Absent, DetectionReliability::Ok, RiskState::Good, 6_000);
        let out = env.tick(PresenceState::Present, DetectionReliability::Ok, RiskState::Good, 7_000);
        assert_eq!(out.state, EngineState::Idle);
        let out = env.tick(PresenceState::Present, DetectionReliability::Ok, RiskState::Good, 9_000);
        assert_eq!(out.state, EngineState::Good);
    }
}
