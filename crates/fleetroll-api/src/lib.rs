//! fleetroll-api: REST API for fleet deployments.
//!
//! A driver starts a deployment, then polls its record or event log until
//! the outcome is set.
//!
//! # API Routes
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | POST | `/api/v1/fleets/{fleet}/deployments` | Start a deployment |
//! | GET | `/api/v1/fleets/{fleet}/lease` | Current fleet lease |
//! | GET | `/api/v1/deployments` | List deployment records |
//! | GET | `/api/v1/deployments/{id}` | Deployment record and outcome |
//! | GET | `/api/v1/deployments/{id}/events` | Ordered event log |
//! | POST | `/api/v1/deployments/{id}/cancel` | Cancel an active deployment |

pub mod handlers;

use std::collections::HashMap;
use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinSet;
use tracing::{info, warn};

use fleetroll_core::{CancelHandle, DeploymentId, FleetId};
use fleetroll_rollout::{DeploymentPlan, Orchestrator};
use fleetroll_state::StateStore;

/// A fleet the API can deploy to.
#[derive(Clone)]
pub struct FleetEntry {
    pub orchestrator: Orchestrator,
    /// Timings and capacity used when a request leaves them out.
    pub defaults: DeploymentPlan,
}

/// Cancel handles of deployments started through this API and still running.
pub type ActiveDeployments = Arc<RwLock<HashMap<DeploymentId, CancelHandle>>>;

/// Shared state for API handlers.
#[derive(Clone)]
pub struct ApiState {
    pub store: StateStore,
    pub fleets: Arc<HashMap<FleetId, FleetEntry>>,
    pub active: ActiveDeployments,
    /// One task per started deployment, finishing with it.
    watchers: Arc<Mutex<JoinSet<()>>>,
}

impl ApiState {
    pub fn new(store: StateStore, fleets: HashMap<FleetId, FleetEntry>) -> Self {
        Self {
            store,
            fleets: Arc::new(fleets),
            active: Arc::new(RwLock::new(HashMap::new())),
            watchers: Arc::new(Mutex::new(JoinSet::new())),
        }
    }

    /// Cancel every active deployment and wait until each has rolled back
    /// its in-flight round and released its fleet lease.
    pub async fn drain(&self) {
        for (id, cancel) in self.active.read().await.iter() {
            info!(deployment = %id, "cancelling active deployment");
            cancel.cancel();
        }
        let mut watchers = self.watchers.lock().await;
        while let Some(joined) = watchers.join_next().await {
            if let Err(e) = joined {
                warn!(error = %e, "deployment watcher failed");
            }
        }
    }
}

/// Build the API router.
pub fn build_router(state: ApiState) -> Router {
    let api_routes = Router::new()
        .route(
            "/fleets/{fleet}/deployments",
            post(handlers::start_deployment),
        )
        .route("/fleets/{fleet}/lease", get(handlers::get_lease))
        .route("/deployments", get(handlers::list_deployments))
        .route("/deployments/{id}", get(handlers::get_deployment))
        .route("/deployments/{id}/events", get(handlers::list_events))
        .route("/deployments/{id}/cancel", post(handlers::cancel_deployment))
        .with_state(state);

    Router::new().nest("/api/v1", api_routes)
}
