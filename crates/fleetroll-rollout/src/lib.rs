//! fleetroll rolling deployments: replace a fleet batch by batch without
//! dropping below a minimum healthy capacity.
//!
//! This crate drives a fleet from "every member on version A" to "every
//! member on version B". Each round launches a batch of new members,
//! waits out their warmup, polls their health, and only then retires the
//! old members they replace. A failing round is rolled back on its own;
//! rounds that already committed stay on the new version.
//!
//! # Components
//!
//! - **`plan`**: `DeploymentPlan`, batch size and capacity floor
//! - **`round`**: one batch-replace step and its state machine
//! - **`orchestrator`**: the control loop (start, deploy, cancel)
//! - **`rollback`**: undoing the in-flight round
//! - **`events`**: ordered event emission (persisted + broadcast)
//! - **`collaborators`**: fleet registry and instance launcher contracts
//! - **`sim`**: an in-memory fleet implementing every collaborator

pub mod collaborators;
pub mod error;
pub mod events;
pub mod orchestrator;
pub mod plan;
pub mod rollback;
pub mod round;
pub mod sim;

pub use collaborators::{Collaborators, FleetRegistry, InstanceLauncher};
pub use error::{DeployError, DeployResult};
pub use events::EventLog;
pub use orchestrator::{DeploymentHandle, Orchestrator};
pub use plan::DeploymentPlan;
pub use round::{DeploymentRound, RoundState};
pub use sim::{HealthScript, SimulatedFleet};
