//! Deployment error taxonomy.

use std::time::Duration;

use thiserror::Error;

use fleetroll_core::{CollaboratorError, MemberId};
use fleetroll_state::StateError;

/// Errors raised while starting or running a deployment.
///
/// Only `Busy`, `InvalidPlan` and `State` escape `Orchestrator::start`;
/// the rest end a round and are folded into the terminal outcome.
#[derive(Debug, Error)]
pub enum DeployError {
    #[error("fleet {fleet_id} is busy: deployment {holder} is active")]
    Busy { fleet_id: String, holder: String },

    #[error("invalid plan: {0}")]
    InvalidPlan(String),

    #[error("launch failed: {0}")]
    LaunchFailure(String),

    #[error("health check failed: member {member_id} reported unhealthy")]
    HealthCheckFailure { member_id: MemberId },

    #[error("health check timed out after {elapsed:?}: {pending} member(s) not healthy")]
    HealthCheckTimeout { elapsed: Duration, pending: usize },

    #[error("registry error: {0}")]
    Registry(CollaboratorError),

    #[error("cancelled")]
    Cancelled,

    #[error("state store error: {0}")]
    State(#[from] StateError),
}

pub type DeployResult<T> = Result<T, DeployError>;
