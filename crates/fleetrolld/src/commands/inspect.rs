//! Offline commands: scaffold a config, list history, break a lease.

use std::path::Path;

use anyhow::Context;
use tracing::{info, warn};

use fleetroll_core::FleetConfig;
use fleetroll_state::DeploymentRecord;

use super::open_store;

pub fn init(fleet: &str, current: &str, target: &str, output: &Path) -> anyhow::Result<()> {
    if output.exists() {
        anyhow::bail!("{} already exists", output.display());
    }
    let config = FleetConfig::scaffold(fleet, current, target);
    let content = config.to_toml_string()?;
    std::fs::write(output, content).with_context(|| format!("writing {}", output.display()))?;
    info!(path = %output.display(), fleet, "wrote fleet config");
    Ok(())
}

pub fn history(data_dir: &Path, fleet: Option<&str>) -> anyhow::Result<()> {
    let store = open_store(Some(data_dir))?;
    let records = match fleet {
        Some(fleet) => store.list_deployments_for_fleet(fleet)?,
        None => store.list_deployments()?,
    };

    if records.is_empty() {
        println!("no deployments recorded");
        return Ok(());
    }

    println!(
        "{:<38} {:<12} {:<10} {:<12} {:>7}  OUTCOME",
        "DEPLOYMENT", "FLEET", "TARGET", "STATUS", "ROUNDS"
    );
    for record in &records {
        println!("{}", format_record(record));
    }
    Ok(())
}

fn format_record(record: &DeploymentRecord) -> String {
    let outcome = record
        .outcome
        .as_ref()
        .map(ToString::to_string)
        .unwrap_or_else(|| "-".to_string());
    format!(
        "{:<38} {:<12} {:<10} {:<12} {:>7}  {}",
        record.id,
        record.fleet_id,
        record.target_version,
        format!("{:?}", record.status).to_lowercase(),
        format!("{}/{}", record.rounds_committed, record.rounds_planned),
        outcome
    )
}

pub fn unlock(data_dir: &Path, fleet: &str) -> anyhow::Result<()> {
    let store = open_store(Some(data_dir))?;
    match store.break_lease(fleet)? {
        Some(lease) => {
            warn!(fleet, holder = %lease.deployment_id, "lease broken");
            println!("released lease on {fleet} held by {}", lease.deployment_id);
        }
        None => println!("fleet {fleet} is not leased"),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleetroll_state::{DeploymentOutcome, DeploymentStatus};

    #[test]
    fn record_line_shows_progress_and_outcome() {
        let record = DeploymentRecord {
            id: "dep-1".into(),
            fleet_id: "web".into(),
            target_version: "v2".into(),
            status: DeploymentStatus::RolledBack,
            batch_size: 2,
            min_healthy_floor: 2,
            rounds_planned: 2,
            rounds_committed: 1,
            started_at: 0,
            finished_at: Some(10),
            outcome: Some(DeploymentOutcome::RolledBack {
                reason: "launch failed: quota".into(),
                previous_version: "v1".into(),
                committed_rounds: 1,
            }),
        };
        let line = format_record(&record);
        assert!(line.contains("rolledback"));
        assert!(line.contains("1/2"));
        assert!(line.contains("ROLLED_BACK(launch failed: quota"));
    }

    #[test]
    fn init_refuses_to_overwrite() {
        let dir = std::env::temp_dir().join(format!("fleetrolld-init-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("fleet.toml");

        init("web", "v1", "v2", &path).unwrap();
        let config = FleetConfig::from_file(&path).unwrap();
        assert_eq!(config.deployment.target_version, "v2");
        assert!(init("web", "v1", "v3", &path).is_err());

        std::fs::remove_dir_all(&dir).unwrap();
    }
}
