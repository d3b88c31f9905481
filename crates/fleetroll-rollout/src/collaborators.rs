//! External collaborators the orchestrator drives.
//!
//! The artifact store is deliberately absent: members pull the artifact
//! themselves at startup, so it only shows up as launch failures.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use fleetroll_core::{CollaboratorError, FleetMember};
use fleetroll_health::HealthOracle;

/// Source of truth for which members exist in the fleet.
#[async_trait]
pub trait FleetRegistry: Send + Sync {
    async fn list(&self) -> Result<Vec<FleetMember>, CollaboratorError>;
    async fn register(&self, member: &FleetMember) -> Result<(), CollaboratorError>;
    async fn deregister(&self, id: &str) -> Result<(), CollaboratorError>;
}

/// Starts and stops members running a given artifact version.
#[async_trait]
pub trait InstanceLauncher: Send + Sync {
    async fn launch(&self, version: &str) -> Result<FleetMember, CollaboratorError>;
    async fn terminate(&self, id: &str) -> Result<(), CollaboratorError>;
}

/// The capability set an orchestrator is handed for one fleet.
#[derive(Clone)]
pub struct Collaborators {
    pub registry: Arc<dyn FleetRegistry>,
    pub launcher: Arc<dyn InstanceLauncher>,
    pub oracle: Arc<dyn HealthOracle>,
}

impl Collaborators {
    pub fn new(
        registry: Arc<dyn FleetRegistry>,
        launcher: Arc<dyn InstanceLauncher>,
        oracle: Arc<dyn HealthOracle>,
    ) -> Self {
        Self {
            registry,
            launcher,
            oracle,
        }
    }

    /// Use one object for all three roles.
    pub fn from_fleet<T>(fleet: Arc<T>) -> Self
    where
        T: FleetRegistry + InstanceLauncher + HealthOracle + 'static,
    {
        Self {
            registry: fleet.clone(),
            launcher: fleet.clone(),
            oracle: fleet,
        }
    }
}

/// Bound a collaborator call by `limit`.
pub(crate) async fn within<T, F>(limit: Duration, call: F) -> Result<T, CollaboratorError>
where
    F: Future<Output = Result<T, CollaboratorError>>,
{
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result,
        Err(_) => Err(CollaboratorError::TimedOut(limit)),
    }
}
