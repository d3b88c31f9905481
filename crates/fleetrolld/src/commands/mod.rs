pub mod deploy;
pub mod inspect;
pub mod serve;

use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use tracing::{info, warn};

use fleetroll_core::FleetConfig;
use fleetroll_rollout::{DeploymentPlan, SimulatedFleet};
use fleetroll_state::StateStore;

/// Open the store under `data_dir`, or an in-memory one.
pub fn open_store(data_dir: Option<&Path>) -> anyhow::Result<StateStore> {
    match data_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("creating data dir {}", dir.display()))?;
            let path = dir.join("fleetroll.redb");
            let store = StateStore::open(&path)?;
            info!(path = ?path, "state store opened");
            Ok(store)
        }
        None => {
            info!("using in-memory state store");
            Ok(StateStore::open_in_memory()?)
        }
    }
}

/// Load `fleet.toml` and build the plan and simulated fleet it describes.
pub fn load_fleet(config_path: &Path) -> anyhow::Result<(FleetConfig, DeploymentPlan, Arc<SimulatedFleet>)> {
    let config = FleetConfig::from_file(config_path)
        .with_context(|| format!("loading {}", config_path.display()))?;
    let plan = DeploymentPlan::from_config(&config)?;
    let sim = config
        .simulation
        .as_ref()
        .context("fleet.toml has no [simulation] section describing the fleet")?;
    if config.health.is_some() {
        warn!(fleet = %config.fleet.id, "[health] is ignored: the simulated fleet reports its own health");
    }
    let fleet = Arc::new(SimulatedFleet::from_simulation(&config.fleet.id, sim)?);
    info!(
        fleet = %config.fleet.id,
        members = sim.members,
        current = %sim.current_version,
        "simulated fleet ready"
    );
    Ok((config, plan, fleet))
}
