//! The health oracle collaborator.

use async_trait::async_trait;

use fleetroll_core::{CollaboratorError, FleetMember, HealthStatus};

/// Reports the health of a fleet member, typically as seen by the load
/// balancer in front of the fleet.
#[async_trait]
pub trait HealthOracle: Send + Sync {
    async fn check(&self, member: &FleetMember) -> Result<HealthStatus, CollaboratorError>;
}
