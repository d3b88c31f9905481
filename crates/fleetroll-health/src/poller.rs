//! Bounded health polling for one round of new members.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use fleetroll_core::{CancelSignal, FleetMember, HealthStatus, MemberId};

use crate::checker::HealthTracker;
use crate::oracle::HealthOracle;

/// Deadline used when `started + timeout` does not fit in an `Instant`.
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365 * 30);

/// How a round's members are polled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthPolicy {
    /// Fixed delay between polls.
    pub poll_interval: Duration,
    /// Round-level budget, measured from the first poll.
    pub timeout: Duration,
    /// Consecutive UNHEALTHY observations that fail a member.
    pub unhealthy_threshold: u32,
    /// Consecutive HEALTHY observations that pass a member.
    pub healthy_threshold: u32,
}

impl Default for HealthPolicy {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            timeout: Duration::from_secs(300),
            unhealthy_threshold: 1,
            healthy_threshold: 1,
        }
    }
}

/// Why a poll returned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    AllHealthy,
    /// The first member to cross its unhealthy threshold.
    Unhealthy { member_id: MemberId },
    /// The deadline passed; `pending` were not yet healthy.
    TimedOut { pending: Vec<MemberId> },
    Cancelled,
}

/// Result of a poll, with elapsed-time accounting.
#[derive(Debug, Clone)]
pub struct PollReport {
    pub outcome: PollOutcome,
    pub elapsed: Duration,
    /// Number of poll ticks issued.
    pub polls: u32,
    /// Last verdict per member.
    pub last_status: BTreeMap<MemberId, HealthStatus>,
}

/// Polls the health oracle until a round settles.
#[derive(Clone)]
pub struct HealthPoller {
    oracle: Arc<dyn HealthOracle>,
    policy: HealthPolicy,
}

impl HealthPoller {
    pub fn new(oracle: Arc<dyn HealthOracle>, policy: HealthPolicy) -> Self {
        Self { oracle, policy }
    }

    pub fn policy(&self) -> &HealthPolicy {
        &self.policy
    }

    /// Poll `members` until all are healthy, one is unhealthy, the round
    /// times out, or `cancel` fires.
    ///
    /// A member that passed its healthy threshold keeps that verdict for the
    /// rest of the poll and is not checked again.
    pub async fn poll(&self, members: &[FleetMember], cancel: &mut CancelSignal) -> PollReport {
        let started = Instant::now();
        let deadline = started
            .checked_add(self.policy.timeout)
            .unwrap_or_else(|| started + FAR_FUTURE);
        let mut trackers: BTreeMap<MemberId, HealthTracker> = members
            .iter()
            .map(|m| {
                (
                    m.id.clone(),
                    HealthTracker::new(
                        self.policy.unhealthy_threshold,
                        self.policy.healthy_threshold,
                    ),
                )
            })
            .collect();
        let mut polls = 0u32;

        let outcome = loop {
            if cancel.is_cancelled() {
                break PollOutcome::Cancelled;
            }
            if members.is_empty() {
                break PollOutcome::AllHealthy;
            }
            if Instant::now() >= deadline {
                break PollOutcome::TimedOut {
                    pending: pending(&trackers),
                };
            }

            polls += 1;
            let unsettled: Vec<&FleetMember> = members
                .iter()
                .filter(|m| {
                    trackers
                        .get(&m.id)
                        .is_some_and(|t| t.status() != HealthStatus::Healthy)
                })
                .collect();
            let checks = join_all(unsettled.iter().map(|m| self.observe(m)));
            let observations = tokio::select! {
                biased;
                _ = cancel.cancelled() => break PollOutcome::Cancelled,
                res = tokio::time::timeout_at(deadline, checks) => match res {
                    Ok(observations) => observations,
                    Err(_) => break PollOutcome::TimedOut { pending: pending(&trackers) },
                },
            };

            for (member, observed) in unsettled.iter().zip(observations) {
                if let Some(tracker) = trackers.get_mut(&member.id) {
                    tracker.record(observed);
                }
            }

            if let Some((id, _)) = trackers
                .iter()
                .find(|(_, t)| t.status() == HealthStatus::Unhealthy)
            {
                break PollOutcome::Unhealthy {
                    member_id: id.clone(),
                };
            }
            if trackers.values().all(|t| t.status() == HealthStatus::Healthy) {
                break PollOutcome::AllHealthy;
            }

            debug!(
                poll = polls,
                pending = pending(&trackers).len(),
                "members not yet healthy"
            );

            let next = Instant::now()
                .checked_add(self.policy.poll_interval)
                .map_or(deadline, |t| t.min(deadline));
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break PollOutcome::Cancelled,
                _ = tokio::time::sleep_until(next) => {}
            }
        };

        let elapsed = started.elapsed();
        match &outcome {
            PollOutcome::AllHealthy => info!(members = members.len(), polls, ?elapsed, "all members healthy"),
            PollOutcome::Unhealthy { member_id } => warn!(member = %member_id, polls, ?elapsed, "member unhealthy"),
            PollOutcome::TimedOut { pending } => warn!(pending = pending.len(), polls, ?elapsed, "health check timed out"),
            PollOutcome::Cancelled => info!(polls, ?elapsed, "health polling cancelled"),
        }

        PollReport {
            outcome,
            elapsed,
            polls,
            last_status: trackers
                .iter()
                .map(|(id, t)| (id.clone(), t.status()))
                .collect(),
        }
    }

    /// One oracle observation. Oracle errors read as UNKNOWN.
    async fn observe(&self, member: &FleetMember) -> HealthStatus {
        match self.oracle.check(member).await {
            Ok(status) => status,
            Err(e) => {
                debug!(member = %member.id, error = %e, "health oracle error, treating as unknown");
                HealthStatus::Unknown
            }
        }
    }
}

fn pending(trackers: &BTreeMap<MemberId, HealthTracker>) -> Vec<MemberId> {
    trackers
        .iter()
        .filter(|(_, t)| t.status() != HealthStatus::Healthy)
        .map(|(id, _)| id.clone())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use fleetroll_core::{CollaboratorError, cancel_pair};

    /// Replays a scripted sequence per member; the last entry repeats.
    struct ScriptedOracle {
        scripts: HashMap<String, Vec<Result<HealthStatus, CollaboratorError>>>,
        calls: Mutex<HashMap<String, usize>>,
    }

    impl ScriptedOracle {
        fn new(scripts: Vec<(&str, Vec<Result<HealthStatus, CollaboratorError>>)>) -> Arc<Self> {
            Arc::new(Self {
                scripts: scripts
                    .into_iter()
                    .map(|(id, s)| (id.to_string(), s))
                    .collect(),
                calls: Mutex::new(HashMap::new()),
            })
        }

        fn calls(&self, id: &str) -> usize {
            self.calls.lock().unwrap().get(id).copied().unwrap_or(0)
        }
    }

    #[async_trait]
    impl HealthOracle for ScriptedOracle {
        async fn check(&self, member: &FleetMember) -> Result<HealthStatus, CollaboratorError> {
            let mut calls = self.calls.lock().unwrap();
            let n = calls.entry(member.id.clone()).or_insert(0);
            let script = &self.scripts[&member.id];
            let result = script[(*n).min(script.len() - 1)].clone();
            *n += 1;
            result
        }
    }

    fn members(ids: &[&str]) -> Vec<FleetMember> {
        ids.iter()
            .map(|id| FleetMember::provisioning(*id, "v2", 0))
            .collect()
    }

    fn policy() -> HealthPolicy {
        HealthPolicy {
            poll_interval: Duration::from_secs(5),
            timeout: Duration::from_secs(60),
            unhealthy_threshold: 1,
            healthy_threshold: 1,
        }
    }

    use HealthStatus::{Healthy, Unhealthy, Unknown};

    #[tokio::test(start_paused = true)]
    async fn all_healthy_on_first_poll() {
        let oracle = ScriptedOracle::new(vec![("a", vec![Ok(Healthy)]), ("b", vec![Ok(Healthy)])]);
        let poller = HealthPoller::new(oracle, policy());
        let report = poller
            .poll(&members(&["a", "b"]), &mut CancelSignal::never())
            .await;

        assert_eq!(report.outcome, PollOutcome::AllHealthy);
        assert_eq!(report.polls, 1);
        assert_eq!(report.elapsed, Duration::ZERO);
        assert_eq!(report.last_status["a"], Healthy);
    }

    #[tokio::test(start_paused = true)]
    async fn unknown_keeps_polling_until_healthy() {
        let oracle = ScriptedOracle::new(vec![
            ("a", vec![Ok(Unknown), Ok(Unknown), Ok(Healthy)]),
            ("b", vec![Ok(Healthy)]),
        ]);
        let poller = HealthPoller::new(oracle.clone(), policy());
        let report = poller
            .poll(&members(&["a", "b"]), &mut CancelSignal::never())
            .await;

        assert_eq!(report.outcome, PollOutcome::AllHealthy);
        assert_eq!(report.polls, 3);
        assert!(report.elapsed >= Duration::from_secs(10));
        assert!(report.elapsed < Duration::from_secs(11));
        assert_eq!(oracle.calls("a"), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn first_unhealthy_fails_the_round() {
        let oracle = ScriptedOracle::new(vec![
            ("a", vec![Ok(Unknown), Ok(Unhealthy)]),
            ("b", vec![Ok(Healthy)]),
        ]);
        let poller = HealthPoller::new(oracle, policy());
        let report = poller
            .poll(&members(&["a", "b"]), &mut CancelSignal::never())
            .await;

        assert_eq!(
            report.outcome,
            PollOutcome::Unhealthy {
                member_id: "a".into()
            }
        );
        assert_eq!(report.polls, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn unhealthy_below_threshold_then_timeout() {
        let oracle = ScriptedOracle::new(vec![("a", vec![
            Ok(Unhealthy),
            Ok(Unhealthy),
            Ok(Unknown),
        ])]);
        let poller = HealthPoller::new(
            oracle,
            HealthPolicy {
                unhealthy_threshold: 3,
                timeout: Duration::from_secs(20),
                ..policy()
            },
        );
        let report = poller.poll(&members(&["a"]), &mut CancelSignal::never()).await;

        assert_eq!(
            report.outcome,
            PollOutcome::TimedOut {
                pending: vec!["a".into()]
            }
        );
        assert!(report.elapsed >= Duration::from_secs(20));
        assert!(report.elapsed < Duration::from_secs(21));
        // Polls at t=0, 5, 10, 15; the deadline lands before a fifth.
        assert_eq!(report.polls, 4);
    }

    #[tokio::test(start_paused = true)]
    async fn oracle_errors_read_as_unknown() {
        let oracle = ScriptedOracle::new(vec![("a", vec![
            Err(CollaboratorError::Transient("lb busy".into())),
            Ok(Healthy),
        ])]);
        let poller = HealthPoller::new(oracle, policy());
        let report = poller.poll(&members(&["a"]), &mut CancelSignal::never()).await;
        assert_eq!(report.outcome, PollOutcome::AllHealthy);
        assert_eq!(report.polls, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_interrupts_polling() {
        let oracle = ScriptedOracle::new(vec![("a", vec![Ok(Unknown)])]);
        let poller = HealthPoller::new(oracle, policy());
        let (handle, mut signal) = cancel_pair();

        let task = tokio::spawn(async move {
            poller.poll(&members(&["a"]), &mut signal).await
        });
        tokio::time::sleep(Duration::from_secs(12)).await;
        handle.cancel();

        let report = task.await.unwrap();
        assert_eq!(report.outcome, PollOutcome::Cancelled);
        assert!(report.elapsed < policy().timeout);
    }

    #[tokio::test(start_paused = true)]
    async fn passed_member_is_not_polled_again() {
        let oracle = ScriptedOracle::new(vec![
            ("a", vec![Ok(Healthy), Ok(Unknown)]),
            ("b", vec![Ok(Unknown), Ok(Unknown), Ok(Healthy)]),
        ]);
        let poller = HealthPoller::new(oracle.clone(), policy());
        let report = poller
            .poll(&members(&["a", "b"]), &mut CancelSignal::never())
            .await;

        assert_eq!(report.outcome, PollOutcome::AllHealthy);
        assert_eq!(report.polls, 3);
        assert_eq!(oracle.calls("a"), 1);
        assert_eq!(oracle.calls("b"), 3);
        assert_eq!(report.last_status["a"], Healthy);
    }

    #[tokio::test(start_paused = true)]
    async fn unbounded_timeout_does_not_overflow() {
        let oracle = ScriptedOracle::new(vec![("a", vec![Ok(Unknown), Ok(Healthy)])]);
        let poller = HealthPoller::new(
            oracle,
            HealthPolicy {
                timeout: Duration::MAX,
                poll_interval: Duration::MAX,
                ..policy()
            },
        );
        let (handle, mut signal) = cancel_pair();
        let task = tokio::spawn(async move {
            poller.poll(&members(&["a"]), &mut signal).await
        });
        tokio::time::sleep(Duration::from_secs(3600)).await;
        handle.cancel();

        let report = task.await.unwrap();
        assert_eq!(report.outcome, PollOutcome::Cancelled);
        assert_eq!(report.polls, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn empty_member_set_is_trivially_healthy() {
        let oracle = ScriptedOracle::new(vec![]);
        let poller = HealthPoller::new(oracle, policy());
        let report = poller.poll(&[], &mut CancelSignal::never()).await;
        assert_eq!(report.outcome, PollOutcome::AllHealthy);
        assert_eq!(report.polls, 0);
    }
}
