//! Fleet member data model.
//!
//! The fleet registry is the source of truth for which members exist; the
//! orchestrator owns their lifecycle state for the duration of a deployment.

use std::cmp::Ordering;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

/// Opaque identifier of a fleet member.
pub type MemberId = String;

/// Identity of a fleet (one logical application).
pub type FleetId = String;

/// Identifier of a single deployment invocation.
pub type DeploymentId = String;

/// A running (or starting) instance of the application.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FleetMember {
    pub id: MemberId,
    /// Artifact version this member runs.
    pub version: String,
    pub lifecycle: LifecycleState,
    pub health: HealthStatus,
    /// Unix timestamp (milliseconds) when the member was created.
    pub created_at: u64,
    /// Probe address (`ip:port`), if the member exposes one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
}

impl FleetMember {
    /// A freshly launched member: provisioning, health not yet known.
    pub fn provisioning(id: impl Into<MemberId>, version: impl Into<String>, created_at: u64) -> Self {
        Self {
            id: id.into(),
            version: version.into(),
            lifecycle: LifecycleState::Provisioning,
            health: HealthStatus::Unknown,
            created_at,
            address: None,
        }
    }

    /// Whether this member can still be selected for replacement.
    pub fn is_replaceable(&self) -> bool {
        matches!(
            self.lifecycle,
            LifecycleState::InService | LifecycleState::Provisioning
        )
    }

    /// Replacement order: oldest first, ties broken by id.
    pub fn replacement_order(&self, other: &Self) -> Ordering {
        self.created_at
            .cmp(&other.created_at)
            .then_with(|| self.id.cmp(&other.id))
    }
}

/// Lifecycle of a fleet member.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    Provisioning,
    InService,
    Draining,
    Terminated,
}

/// Health as reported by the health oracle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    Unhealthy,
    Unknown,
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            HealthStatus::Healthy => "healthy",
            HealthStatus::Unhealthy => "unhealthy",
            HealthStatus::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

/// Current unix time in milliseconds.
pub fn epoch_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
