//! Undo the in-flight round.
//!
//! Rollback only touches members the round launched. The old members it
//! would have replaced are still serving and are left alone.

use futures::future::join_all;
use tracing::{info, warn};

use fleetroll_core::{CollaboratorError, LifecycleState, MemberId, RetryPolicy};
use fleetroll_state::EventKind;

use crate::collaborators::{Collaborators, within};
use crate::events::EventLog;
use crate::plan::DeploymentPlan;
use crate::round::{DeploymentRound, RoundState};

/// What the rollback managed to clean up.
#[derive(Debug, Default)]
pub struct RollbackReport {
    pub terminated: Vec<MemberId>,
    /// Members that could not be cleaned up, with the error that stopped them.
    pub errors: Vec<(MemberId, CollaboratorError)>,
}

/// Terminate and deregister every member `round` launched. Best effort:
/// failures are logged and reported, never raised.
pub async fn roll_back_round(
    round: &mut DeploymentRound,
    plan: &DeploymentPlan,
    collaborators: &Collaborators,
    events: &mut EventLog,
) -> RollbackReport {
    let mut report = RollbackReport::default();
    let retry: RetryPolicy = plan.retry;

    if round.registered.is_empty() && round.launched.is_empty() {
        round.transition(RoundState::Failed);
        return report;
    }

    info!(
        round = round.number,
        launched = round.launched.len(),
        "rolling back round"
    );

    // Deregister first so the registry never lists a member being torn down.
    for member in &round.launched {
        if !round.registered.contains(&member.id) {
            continue;
        }
        let registry = &collaborators.registry;
        let id = member.id.as_str();
        match retry
            .run("deregister", || registry.deregister(id))
            .await
        {
            Ok(()) => {
                round.registered.remove(&member.id);
            }
            Err(e) => {
                warn!(member = %member.id, error = %e, "rollback deregister failed");
                report.errors.push((member.id.clone(), e));
            }
        }
    }

    let launcher = &collaborators.launcher;
    let results = join_all(round.launched.iter().map(|m| {
        let id = m.id.as_str();
        async move {
            let outcome = retry
                .run("terminate", || within(plan.terminate_timeout, launcher.terminate(id)))
                .await;
            (id, outcome)
        }
    }))
    .await;

    let mut terminated = Vec::new();
    for (id, outcome) in results {
        match outcome {
            Ok(()) => terminated.push(id.to_string()),
            Err(e) => {
                warn!(member = %id, error = %e, "rollback terminate failed");
                report.errors.push((id.to_string(), e));
            }
        }
    }

    for member in round.launched.iter_mut() {
        if terminated.contains(&member.id) {
            member.lifecycle = LifecycleState::Terminated;
            events.emit(
                round.number,
                EventKind::MemberTerminated {
                    member_id: member.id.clone(),
                },
            );
        }
    }

    report.terminated = terminated;
    round.transition(RoundState::Failed);
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    use tokio::sync::broadcast;

    use fleetroll_core::FleetMember;
    use fleetroll_state::StateStore;

    use crate::collaborators::{FleetRegistry, InstanceLauncher};
    use crate::sim::SimulatedFleet;

    #[tokio::test(start_paused = true)]
    async fn rollback_removes_new_members_and_keeps_old_ones() {
        let fleet = Arc::new(SimulatedFleet::new("web").with_members("v1", 2));
        let collaborators = Collaborators::from_fleet(fleet.clone());
        let plan = DeploymentPlan::new("web", "v2", 2, 50).with_warmup(Duration::ZERO);
        let store = StateStore::open_in_memory().unwrap();
        let (tx, _rx) = broadcast::channel(16);
        let mut events = EventLog::new("dep-1", store.clone(), tx);

        let old = fleet.members();
        let mut round = DeploymentRound::new(1, vec![old[0].clone()]);
        let new = fleet.launch("v2").await.unwrap();
        fleet.register(&new).await.unwrap();
        round.registered.insert(new.id.clone());
        round.launched.push(new.clone());

        let report = roll_back_round(&mut round, &plan, &collaborators, &mut events).await;

        assert_eq!(report.terminated, vec![new.id.clone()]);
        assert!(report.errors.is_empty());
        assert_eq!(round.state, RoundState::Failed);
        assert_eq!(fleet.count_on("v1"), 2);
        assert_eq!(fleet.count_on("v2"), 0);
        let listed: Vec<FleetMember> = fleet.list().await.unwrap();
        assert!(listed.iter().all(|m| m.version == "v1"));
        assert_eq!(store.list_events("dep-1").unwrap().len(), 1);
    }

    #[tokio::test]
    async fn rollback_of_empty_round_is_a_no_op() {
        let fleet = Arc::new(SimulatedFleet::new("web").with_members("v1", 1));
        let collaborators = Collaborators::from_fleet(fleet.clone());
        let plan = DeploymentPlan::new("web", "v2", 1, 50);
        let (tx, _rx) = broadcast::channel(4);
        let mut events = EventLog::new("dep-1", StateStore::open_in_memory().unwrap(), tx);

        let mut round = DeploymentRound::new(1, fleet.members());
        let report = roll_back_round(&mut round, &plan, &collaborators, &mut events).await;
        assert!(report.terminated.is_empty());
        assert_eq!(round.state, RoundState::Failed);
        assert_eq!(fleet.terminated().len(), 0);
    }
}
