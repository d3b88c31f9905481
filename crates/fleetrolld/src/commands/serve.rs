//! `fleetrolld serve`: REST API for the configured fleet.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::Path;

use tracing::info;

use fleetroll_api::{ApiState, FleetEntry, build_router};
use fleetroll_rollout::{Collaborators, Orchestrator};

use super::{load_fleet, open_store};

pub async fn run(config_path: &Path, port: u16, data_dir: Option<&Path>) -> anyhow::Result<()> {
    let (config, plan, fleet) = load_fleet(config_path)?;
    let store = open_store(data_dir)?;

    let orchestrator = Orchestrator::new(Collaborators::from_fleet(fleet), store.clone());
    let fleets = HashMap::from([(
        config.fleet.id.clone(),
        FleetEntry {
            orchestrator,
            defaults: plan,
        },
    )]);
    let state = ApiState::new(store, fleets);
    let router = build_router(state.clone());

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, fleet = %config.fleet.id, "API server listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            if tokio::signal::ctrl_c().await.is_err() {
                std::future::pending::<()>().await;
            }
            info!("shutdown signal received");
        })
        .await?;

    state.drain().await;
    info!("API server stopped");
    Ok(())
}
