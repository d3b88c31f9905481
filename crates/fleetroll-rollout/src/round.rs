//! One batch-replace step of a deployment.
//!
//! ```text
//! LAUNCHING → WARMING → HEALTH_CHECKING → COMMITTING → COMMITTED
//!     │           │             │
//!     └───────────┴─────────────┴──────→ FAILED
//! ```
//!
//! Once a round enters COMMITTING it can no longer fail: old members are
//! retired and the round is counted as committed.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use tracing::debug;

use fleetroll_core::{FleetMember, MemberId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoundState {
    Launching,
    Warming,
    HealthChecking,
    Committing,
    Committed,
    Failed,
}

impl RoundState {
    /// Whether `self → next` is a legal transition.
    pub fn allows(self, next: RoundState) -> bool {
        use RoundState::*;
        matches!(
            (self, next),
            (Launching, Warming)
                | (Warming, HealthChecking)
                | (HealthChecking, Committing)
                | (Committing, Committed)
                | (Launching | Warming | HealthChecking, Failed)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, RoundState::Committed | RoundState::Failed)
    }
}

/// Working state of the in-flight round. Owned by the orchestrator.
#[derive(Debug, Clone)]
pub struct DeploymentRound {
    /// 1-based.
    pub number: u32,
    pub state: RoundState,
    /// Old members this round replaces, in replacement order.
    pub retiring: Vec<FleetMember>,
    /// New members launched so far.
    pub launched: Vec<FleetMember>,
    /// Launched members the registry already knows about.
    pub registered: HashSet<MemberId>,
}

impl DeploymentRound {
    pub fn new(number: u32, retiring: Vec<FleetMember>) -> Self {
        Self {
            number,
            state: RoundState::Launching,
            retiring,
            launched: Vec::new(),
            registered: HashSet::new(),
        }
    }

    /// Move to `next`. Illegal transitions are ignored and return false.
    pub fn transition(&mut self, next: RoundState) -> bool {
        if !self.state.allows(next) {
            debug!(round = self.number, from = ?self.state, to = ?next, "ignoring illegal round transition");
            return false;
        }
        debug!(round = self.number, from = ?self.state, to = ?next, "round transition");
        self.state = next;
        true
    }

    pub fn retiring_ids(&self) -> Vec<MemberId> {
        self.retiring.iter().map(|m| m.id.clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round() -> DeploymentRound {
        DeploymentRound::new(1, vec![FleetMember::provisioning("old-1", "v1", 0)])
    }

    #[test]
    fn happy_path_transitions() {
        let mut r = round();
        assert!(r.transition(RoundState::Warming));
        assert!(r.transition(RoundState::HealthChecking));
        assert!(r.transition(RoundState::Committing));
        assert!(r.transition(RoundState::Committed));
        assert!(r.state.is_terminal());
    }

    #[test]
    fn any_pre_commit_state_can_fail() {
        for path in [
            vec![],
            vec![RoundState::Warming],
            vec![RoundState::Warming, RoundState::HealthChecking],
        ] {
            let mut r = round();
            for s in path {
                assert!(r.transition(s));
            }
            assert!(r.transition(RoundState::Failed));
        }
    }

    #[test]
    fn committing_cannot_fail() {
        let mut r = round();
        r.transition(RoundState::Warming);
        r.transition(RoundState::HealthChecking);
        r.transition(RoundState::Committing);
        assert!(!r.transition(RoundState::Failed));
        assert_eq!(r.state, RoundState::Committing);
    }

    #[test]
    fn states_cannot_be_skipped() {
        let mut r = round();
        assert!(!r.transition(RoundState::HealthChecking));
        assert!(!r.transition(RoundState::Committed));
        assert_eq!(r.state, RoundState::Launching);
        assert_eq!(r.retiring_ids(), vec!["old-1".to_string()]);
    }
}
