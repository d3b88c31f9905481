//! Rolling deployment orchestrator.
//!
//! Drives one deployment per fleet through strictly sequential rounds:
//!
//! 1. Take the fleet lease (or fail with `Busy`).
//! 2. Select up to B old-version members, oldest first.
//! 3. Launch B replacements concurrently, register them, wait out warmup.
//! 4. Poll their health until all are healthy, one is unhealthy, or the
//!    round times out.
//! 5. Commit: drain, stop and deregister the old members.
//!
//! A failing round is rolled back on its own and ends the deployment.
//! Rounds that already committed stay on the new version.

use std::collections::HashSet;

use futures::future::join_all;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use uuid::Uuid;

use fleetroll_core::{
    CancelHandle, CancelSignal, DeploymentId, FleetMember, HealthStatus, LifecycleState, MemberId,
    cancel_pair, epoch_millis,
};
use fleetroll_health::{HealthPoller, PollOutcome};
use fleetroll_state::{
    DeploymentEvent, DeploymentOutcome, DeploymentRecord, DeploymentStatus, EventKind,
    LeaseAcquire, StateStore,
};

use crate::collaborators::{Collaborators, within};
use crate::error::{DeployError, DeployResult};
use crate::events::EventLog;
use crate::plan::{DeploymentPlan, replacement_queue};
use crate::rollback::roll_back_round;
use crate::round::{DeploymentRound, RoundState};

const EVENT_CHANNEL_CAPACITY: usize = 256;

const TASK_ABORTED: &str = "deployment task aborted";

/// Runs deployments against one fleet's collaborators.
///
/// Cheap to clone; clones share the state store and the event channel.
#[derive(Clone)]
pub struct Orchestrator {
    collaborators: Collaborators,
    state: StateStore,
    events: broadcast::Sender<DeploymentEvent>,
}

/// A running deployment.
#[derive(Debug)]
pub struct DeploymentHandle {
    id: DeploymentId,
    cancel: CancelHandle,
    task: JoinHandle<DeploymentOutcome>,
}

impl DeploymentHandle {
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Request cancellation. The in-flight round is rolled back and the
    /// outcome becomes `FAILED(cancelled)`.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    /// Wait for the terminal outcome.
    pub async fn wait(self) -> DeploymentOutcome {
        match self.task.await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(deployment = %self.id, error = %e, "deployment task aborted");
                DeploymentOutcome::Failed {
                    reason: format!("{TASK_ABORTED}: {e}"),
                }
            }
        }
    }
}

impl Orchestrator {
    pub fn new(collaborators: Collaborators, state: StateStore) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            collaborators,
            state,
            events,
        }
    }

    /// Live event stream. Subscribe before `start` to see every event;
    /// the persisted log in the state store has all of them regardless.
    pub fn subscribe(&self) -> broadcast::Receiver<DeploymentEvent> {
        self.events.subscribe()
    }

    pub fn state(&self) -> &StateStore {
        &self.state
    }

    /// Validate `plan`, take the fleet lease and spawn the deployment.
    ///
    /// Fails without side effects when the plan is invalid or another
    /// deployment holds the fleet. Must be called within a tokio runtime.
    pub fn start(&self, plan: DeploymentPlan) -> DeployResult<DeploymentHandle> {
        plan.validate()?;

        let id = format!("dep-{}", Uuid::new_v4().simple());
        match self.state.acquire_lease(&plan.fleet_id, &id)? {
            LeaseAcquire::Acquired(_) => {}
            LeaseAcquire::Held(lease) => {
                warn!(fleet = %plan.fleet_id, holder = %lease.deployment_id, "fleet is busy");
                return Err(DeployError::Busy {
                    fleet_id: plan.fleet_id,
                    holder: lease.deployment_id,
                });
            }
        }

        let record = DeploymentRecord {
            id: id.clone(),
            fleet_id: plan.fleet_id.clone(),
            target_version: plan.target_version.clone(),
            status: DeploymentStatus::Running,
            batch_size: plan.batch_size(),
            min_healthy_floor: plan.min_healthy_floor(),
            rounds_planned: 0,
            rounds_committed: 0,
            started_at: epoch_millis(),
            finished_at: None,
            outcome: None,
        };
        let lease = LeaseGuard {
            state: self.state.clone(),
            fleet_id: plan.fleet_id.clone(),
            deployment_id: id.clone(),
            armed: true,
        };
        self.state.put_deployment(&record)?;

        info!(
            deployment = %id,
            fleet = %plan.fleet_id,
            target = %plan.target_version,
            capacity = plan.capacity,
            batch_size = record.batch_size,
            floor = record.min_healthy_floor,
            "deployment started"
        );

        let (cancel, signal) = cancel_pair();
        let task = tokio::spawn(self.clone().run(plan, record, signal, lease));
        Ok(DeploymentHandle { id, cancel, task })
    }

    /// Run a deployment to completion.
    pub async fn deploy(&self, plan: DeploymentPlan) -> DeployResult<DeploymentOutcome> {
        let handle = self.start(plan)?;
        Ok(handle.wait().await)
    }

    async fn run(
        self,
        plan: DeploymentPlan,
        mut record: DeploymentRecord,
        mut cancel: CancelSignal,
        lease: LeaseGuard,
    ) -> DeploymentOutcome {
        let mut events = EventLog::new(record.id.clone(), self.state.clone(), self.events.clone());

        let outcome = self
            .drive(&plan, &mut record, &mut events, &mut cancel)
            .await;

        record.status = outcome.status();
        record.finished_at = Some(epoch_millis());
        record.outcome = Some(outcome.clone());
        self.save(&record);
        events.emit(
            0,
            EventKind::DeploymentFinished {
                outcome: outcome.clone(),
            },
        );
        lease.release();

        match &outcome {
            DeploymentOutcome::Succeeded { .. } => {
                info!(deployment = %record.id, rounds = record.rounds_committed, %outcome, "deployment finished")
            }
            _ => warn!(deployment = %record.id, rounds = record.rounds_committed, %outcome, "deployment finished"),
        }
        outcome
    }

    async fn drive(
        &self,
        plan: &DeploymentPlan,
        record: &mut DeploymentRecord,
        events: &mut EventLog,
        cancel: &mut CancelSignal,
    ) -> DeploymentOutcome {
        let mut retired: HashSet<MemberId> = HashSet::new();

        let members = match self.list_members(plan).await {
            Ok(members) => members,
            Err(e) => {
                return DeploymentOutcome::Failed {
                    reason: format!("registry unavailable: {e}"),
                };
            }
        };
        if members.len() != plan.capacity as usize {
            warn!(
                deployment = %record.id,
                listed = members.len(),
                capacity = plan.capacity,
                "fleet size differs from plan capacity"
            );
        }

        let mut queue = replacement_queue(&members, &plan.target_version, &retired);
        let previous_version = queue
            .first()
            .map(|m| m.version.clone())
            .unwrap_or_else(|| plan.target_version.clone());

        record.rounds_planned = plan.rounds_for(queue.len());
        self.save(record);
        events.emit(
            0,
            EventKind::DeploymentStarted {
                fleet_id: plan.fleet_id.clone(),
                target_version: plan.target_version.clone(),
                batch_size: record.batch_size,
                min_healthy_floor: record.min_healthy_floor,
                rounds_planned: record.rounds_planned,
            },
        );

        let batch = plan.batch_size() as usize;
        let mut upgraded = members
            .iter()
            .filter(|m| m.version == plan.target_version)
            .count() as u32;
        let mut number = 0u32;

        loop {
            if number > 0 {
                queue = match self.list_members(plan).await {
                    Ok(members) => replacement_queue(&members, &plan.target_version, &retired),
                    Err(e) => {
                        return DeploymentOutcome::Failed {
                            reason: format!("registry unavailable after round {number}: {e}"),
                        };
                    }
                };
            }
            if queue.is_empty() {
                return DeploymentOutcome::Succeeded {
                    version: plan.target_version.clone(),
                };
            }
            if cancel.is_cancelled() {
                info!(deployment = %record.id, committed = number, "cancelled between rounds");
                return DeploymentOutcome::Failed {
                    reason: "cancelled".into(),
                };
            }

            number += 1;
            queue.truncate(batch);
            let mut round = DeploymentRound::new(number, std::mem::take(&mut queue));
            info!(
                deployment = %record.id,
                round = number,
                replacing = ?round.retiring_ids(),
                "round started"
            );

            match self.run_round(plan, &mut round, events, cancel).await {
                Ok(()) => {
                    upgraded += round.launched.len() as u32;
                    events.emit(number, EventKind::RoundCommitted { in_service: upgraded });
                    retired.extend(round.retiring_ids());
                    record.rounds_committed = number;
                    self.save(record);
                    info!(deployment = %record.id, round = number, upgraded, "round committed");
                }
                Err(e) => {
                    // A cancel that raced a launch or registry failure still
                    // ends the deployment as cancelled.
                    let cancelled = matches!(e, DeployError::Cancelled) || cancel.is_cancelled();
                    let reason = e.to_string();
                    warn!(deployment = %record.id, round = number, %reason, "round failed, rolling back");
                    events.emit(
                        number,
                        EventKind::RollbackTriggered {
                            reason: reason.clone(),
                        },
                    );
                    let report = roll_back_round(&mut round, plan, &self.collaborators, events).await;
                    if !report.errors.is_empty() {
                        error!(
                            deployment = %record.id,
                            round = number,
                            leaked = ?report.errors.iter().map(|(id, _)| id).collect::<Vec<_>>(),
                            "rollback left members behind"
                        );
                    }
                    if cancelled {
                        return DeploymentOutcome::Failed {
                            reason: DeployError::Cancelled.to_string(),
                        };
                    }
                    return DeploymentOutcome::RolledBack {
                        reason,
                        previous_version,
                        committed_rounds: number - 1,
                    };
                }
            }
        }
    }

    /// One round, up to and including commit. An `Err` leaves the round
    /// for the caller to roll back.
    async fn run_round(
        &self,
        plan: &DeploymentPlan,
        round: &mut DeploymentRound,
        events: &mut EventLog,
        cancel: &mut CancelSignal,
    ) -> DeployResult<()> {
        let n = round.number;
        events.emit(
            n,
            EventKind::RoundStarted {
                replacing: round.retiring_ids(),
            },
        );

        // LAUNCHING. In-flight launches are not interrupted by cancellation so
        // every member that comes up is known to the rollback.
        let launcher = &self.collaborators.launcher;
        let version = plan.target_version.as_str();
        let launches = join_all(
            round
                .retiring
                .iter()
                .map(|_| within(plan.launch_timeout, launcher.launch(version))),
        )
        .await;

        let mut failure = None;
        for result in launches {
            match result {
                Ok(member) => {
                    info!(round = n, member = %member.id, version, "member launched");
                    events.emit(
                        n,
                        EventKind::MemberLaunched {
                            member_id: member.id.clone(),
                        },
                    );
                    round.launched.push(member);
                }
                Err(e) => {
                    warn!(round = n, error = %e, "launch failed");
                    failure.get_or_insert_with(|| e.to_string());
                }
            }
        }
        if let Some(reason) = failure {
            events.emit(
                n,
                EventKind::LaunchFailed {
                    reason: reason.clone(),
                },
            );
            return Err(DeployError::LaunchFailure(reason));
        }

        let retry = plan.retry;
        let registry = &self.collaborators.registry;
        for member in &round.launched {
            retry
                .run("register", || registry.register(member))
                .await
                .map_err(DeployError::Registry)?;
            round.registered.insert(member.id.clone());
        }

        if cancel.is_cancelled() {
            return Err(DeployError::Cancelled);
        }

        // WARMING
        round.transition(RoundState::Warming);
        events.emit(
            n,
            EventKind::RoundWarming {
                warmup_ms: plan.warmup.as_millis() as u64,
            },
        );
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(DeployError::Cancelled),
            _ = tokio::time::sleep(plan.warmup) => {}
        }

        // HEALTH_CHECKING
        round.transition(RoundState::HealthChecking);
        events.emit(n, EventKind::RoundHealthChecking);
        let poller = HealthPoller::new(self.collaborators.oracle.clone(), plan.health);
        let report = poller.poll(&round.launched, cancel).await;
        for member in round.launched.iter_mut() {
            if let Some(status) = report.last_status.get(&member.id) {
                member.health = *status;
            }
        }
        match report.outcome {
            PollOutcome::AllHealthy => {
                events.emit(
                    n,
                    EventKind::RoundHealthy {
                        elapsed_ms: report.elapsed.as_millis() as u64,
                        polls: report.polls,
                    },
                );
            }
            PollOutcome::Unhealthy { member_id } => {
                return Err(DeployError::HealthCheckFailure { member_id });
            }
            PollOutcome::TimedOut { pending } => {
                return Err(DeployError::HealthCheckTimeout {
                    elapsed: report.elapsed,
                    pending: pending.len(),
                });
            }
            PollOutcome::Cancelled => return Err(DeployError::Cancelled),
        }

        // COMMITTING. Irrevocable from here on.
        round.transition(RoundState::Committing);
        self.commit(plan, round, events).await;
        round.transition(RoundState::Committed);
        Ok(())
    }

    /// Retire the round's old members and put the new ones in service.
    /// Failures are logged; the replacements are already proven healthy.
    async fn commit(&self, plan: &DeploymentPlan, round: &mut DeploymentRound, events: &mut EventLog) {
        let n = round.number;
        for member in round.retiring.iter_mut() {
            member.lifecycle = LifecycleState::Draining;
            events.emit(
                n,
                EventKind::MemberDraining {
                    member_id: member.id.clone(),
                },
            );
        }

        let retry = plan.retry;
        let launcher = &self.collaborators.launcher;
        let stops = join_all(round.retiring.iter().map(|m| {
            let id = m.id.as_str();
            async move {
                let result = retry
                    .run("terminate", || within(plan.terminate_timeout, launcher.terminate(id)))
                    .await;
                (id, result)
            }
        }))
        .await;
        for (id, result) in stops {
            if let Err(e) = result {
                error!(round = n, member = %id, error = %e, "failed to stop old member");
            }
        }

        let registry = &self.collaborators.registry;
        for member in round.retiring.iter_mut() {
            let id = member.id.as_str();
            if let Err(e) = retry.run("deregister", || registry.deregister(id)).await {
                error!(round = n, member = %member.id, error = %e, "failed to deregister old member");
            }
            member.lifecycle = LifecycleState::Terminated;
            info!(round = n, member = %member.id, "old member retired");
            events.emit(
                n,
                EventKind::MemberTerminated {
                    member_id: member.id.clone(),
                },
            );
        }

        for member in round.launched.iter_mut() {
            member.lifecycle = LifecycleState::InService;
            member.health = HealthStatus::Healthy;
        }
    }

    async fn list_members(&self, plan: &DeploymentPlan) -> Result<Vec<FleetMember>, DeployError> {
        let registry = &self.collaborators.registry;
        plan.retry
            .run("list", || registry.list())
            .await
            .map_err(|e| {
                error!(fleet = %plan.fleet_id, error = %e, "failed to list fleet members");
                DeployError::Registry(e)
            })
    }

    fn save(&self, record: &DeploymentRecord) {
        if let Err(e) = self.state.put_deployment(record) {
            error!(deployment = %record.id, error = %e, "failed to persist deployment record");
        }
    }

}

/// Holds the fleet lease for one deployment.
///
/// `release` is the normal exit. If the guard is dropped while still armed,
/// the task panicked or was aborted: the record is closed as failed and the
/// lease is released so the fleet does not stay busy.
struct LeaseGuard {
    state: StateStore,
    fleet_id: String,
    deployment_id: DeploymentId,
    armed: bool,
}

impl LeaseGuard {
    fn release(mut self) {
        self.armed = false;
        self.release_lease();
    }

    fn release_lease(&self) {
        match self.state.release_lease(&self.fleet_id, &self.deployment_id) {
            Ok(true) => {}
            Ok(false) => warn!(fleet = %self.fleet_id, deployment = %self.deployment_id, "lease was not held at release"),
            Err(e) => error!(fleet = %self.fleet_id, deployment = %self.deployment_id, error = %e, "failed to release lease"),
        }
    }

    fn close_record(&self) {
        let mut record = match self.state.get_deployment(&self.deployment_id) {
            Ok(Some(record)) if record.outcome.is_none() => record,
            Ok(_) => return,
            Err(e) => {
                error!(deployment = %self.deployment_id, error = %e, "failed to load deployment record");
                return;
            }
        };
        let outcome = DeploymentOutcome::Failed {
            reason: TASK_ABORTED.into(),
        };
        record.status = outcome.status();
        record.finished_at = Some(epoch_millis());
        record.outcome = Some(outcome);
        if let Err(e) = self.state.put_deployment(&record) {
            error!(deployment = %self.deployment_id, error = %e, "failed to persist deployment record");
        }
    }
}

impl Drop for LeaseGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        error!(
            fleet = %self.fleet_id,
            deployment = %self.deployment_id,
            "deployment ended without finishing, releasing lease"
        );
        self.close_record();
        self.release_lease();
    }
}
