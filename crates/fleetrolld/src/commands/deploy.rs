//! `fleetrolld deploy`: one deployment, events streamed as JSON lines.

use std::path::Path;

use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

use fleetroll_rollout::{Collaborators, Orchestrator};
use fleetroll_state::EventKind;

use super::{load_fleet, open_store};

pub async fn run(config_path: &Path, data_dir: Option<&Path>) -> anyhow::Result<()> {
    let (config, plan, fleet) = load_fleet(config_path)?;
    let target = plan.target_version.clone();
    let store = open_store(data_dir)?;

    let orchestrator = Orchestrator::new(Collaborators::from_fleet(fleet.clone()), store);
    let mut events = orchestrator.subscribe();

    let handle = orchestrator.start(plan)?;
    let deployment_id = handle.id().to_string();

    let printer_id = deployment_id.clone();
    let printer = tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) if event.deployment_id == printer_id => {
                    match serde_json::to_string(&event) {
                        Ok(line) => println!("{line}"),
                        Err(e) => warn!(error = %e, "failed to encode event"),
                    }
                    if matches!(event.kind, EventKind::DeploymentFinished { .. }) {
                        break;
                    }
                }
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "event stream lagged; see the persisted log")
                }
                Err(RecvError::Closed) => break,
            }
        }
    });

    let cancel = handle.cancel_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupt received, cancelling deployment");
            cancel.cancel();
        }
    });

    let outcome = handle.wait().await;
    if let Err(e) = printer.await {
        warn!(error = %e, "event printer stopped");
    }

    info!(
        deployment = %deployment_id,
        fleet = %config.fleet.id,
        on_target = fleet.count_on(&target),
        terminated = fleet.terminated().len(),
        min_serving = fleet.min_serving(),
        "fleet after deployment"
    );
    println!("{outcome}");

    if outcome.is_success() {
        Ok(())
    } else {
        anyhow::bail!("deployment {deployment_id} did not succeed: {outcome}")
    }
}
