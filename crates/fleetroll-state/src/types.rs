//! Persisted domain types: leases, deployment records, outcomes and events.

use serde::{Deserialize, Serialize};

use fleetroll_core::{DeploymentId, FleetId, MemberId};

// ── Lease ─────────────────────────────────────────────────────────

/// Exclusive claim on a fleet by one deployment.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Lease {
    pub fleet_id: FleetId,
    pub deployment_id: DeploymentId,
    /// Unix timestamp (milliseconds) when the lease was taken.
    pub acquired_at: u64,
}

// ── Outcome ───────────────────────────────────────────────────────

/// Terminal result of one deployment invocation. Produced once, never mutated.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DeploymentOutcome {
    /// Every member now runs `version`.
    Succeeded { version: String },
    /// The in-flight round was undone; earlier rounds stay committed.
    RolledBack {
        reason: String,
        previous_version: String,
        committed_rounds: u32,
    },
    /// The deployment stopped without a rollback-able round (or was cancelled).
    Failed { reason: String },
}

impl DeploymentOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, DeploymentOutcome::Succeeded { .. })
    }

    pub fn status(&self) -> DeploymentStatus {
        match self {
            DeploymentOutcome::Succeeded { .. } => DeploymentStatus::Succeeded,
            DeploymentOutcome::RolledBack { .. } => DeploymentStatus::RolledBack,
            DeploymentOutcome::Failed { .. } => DeploymentStatus::Failed,
        }
    }

    /// Human summary of how far a rolled-back deployment got.
    pub fn progress(&self) -> Option<String> {
        match self {
            DeploymentOutcome::RolledBack {
                committed_rounds, ..
            } => Some(format!(
                "deployment partially applied up to round {committed_rounds}"
            )),
            _ => None,
        }
    }
}

impl std::fmt::Display for DeploymentOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeploymentOutcome::Succeeded { version } => write!(f, "SUCCEEDED({version})"),
            DeploymentOutcome::RolledBack {
                reason,
                previous_version,
                committed_rounds,
            } => write!(
                f,
                "ROLLED_BACK({reason}, deployment partially applied up to round {committed_rounds}, previous version {previous_version})"
            ),
            DeploymentOutcome::Failed { reason } => write!(f, "FAILED({reason})"),
        }
    }
}

// ── Record ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeploymentStatus {
    Running,
    Succeeded,
    RolledBack,
    Failed,
}

/// Progress and result of one deployment, updated as rounds commit.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeploymentRecord {
    pub id: DeploymentId,
    pub fleet_id: FleetId,
    pub target_version: String,
    pub status: DeploymentStatus,
    pub batch_size: u32,
    pub min_healthy_floor: u32,
    pub rounds_planned: u32,
    pub rounds_committed: u32,
    /// Unix timestamp (milliseconds).
    pub started_at: u64,
    pub finished_at: Option<u64>,
    pub outcome: Option<DeploymentOutcome>,
}

// ── Events ────────────────────────────────────────────────────────

/// One step of a deployment, in emission order.
///
/// Events inform observers only; replaying or dropping them never changes
/// orchestrator state.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DeploymentEvent {
    pub deployment_id: DeploymentId,
    /// Monotonic per deployment, starting at 0.
    pub seq: u64,
    /// Round number (1-based); 0 for deployment-level events.
    pub round: u32,
    /// Unix timestamp (milliseconds).
    pub at: u64,
    pub kind: EventKind,
}

impl DeploymentEvent {
    /// Key in the events table; zero-padded so lexical order is emission order.
    pub fn table_key(&self) -> String {
        format!("{}:{:010}", self.deployment_id, self.seq)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventKind {
    DeploymentStarted {
        fleet_id: FleetId,
        target_version: String,
        batch_size: u32,
        min_healthy_floor: u32,
        rounds_planned: u32,
    },
    RoundStarted {
        replacing: Vec<MemberId>,
    },
    MemberLaunched {
        member_id: MemberId,
    },
    LaunchFailed {
        reason: String,
    },
    RoundWarming {
        warmup_ms: u64,
    },
    RoundHealthChecking,
    RoundHealthy {
        elapsed_ms: u64,
        polls: u32,
    },
    MemberDraining {
        member_id: MemberId,
    },
    MemberTerminated {
        member_id: MemberId,
    },
    RoundCommitted {
        in_service: u32,
    },
    RollbackTriggered {
        reason: String,
    },
    DeploymentFinished {
        outcome: DeploymentOutcome,
    },
}
