//! REST API handlers.
//!
//! Reads go straight to the `StateStore`; starts and cancels go through the
//! fleet's orchestrator.

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use tracing::info;

use fleetroll_rollout::DeployError;

use crate::ApiState;

/// Response wrapper for consistent API format.
#[derive(serde::Serialize)]
struct ApiResponse<T: serde::Serialize> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<T: serde::Serialize> ApiResponse<T> {
    fn ok(data: T) -> Json<Self> {
        Json(Self {
            success: true,
            data: Some(data),
            error: None,
        })
    }
}

fn error_response(msg: &str, status: StatusCode) -> impl IntoResponse {
    (
        status,
        Json(ApiResponse::<()> {
            success: false,
            data: None,
            error: Some(msg.to_string()),
        }),
    )
}

// ── Deployments ────────────────────────────────────────────────

/// Request body to start a deployment. Omitted fields use the fleet defaults.
#[derive(Debug, serde::Deserialize, serde::Serialize)]
pub struct StartDeploymentRequest {
    pub target_version: String,
    pub capacity: Option<u32>,
    pub min_healthy_percent: Option<u32>,
}

/// POST /api/v1/fleets/:fleet/deployments
pub async fn start_deployment(
    State(state): State<ApiState>,
    Path(fleet): Path<String>,
    Json(req): Json<StartDeploymentRequest>,
) -> impl IntoResponse {
    let Some(entry) = state.fleets.get(&fleet) else {
        return error_response("fleet not found", StatusCode::NOT_FOUND).into_response();
    };

    let mut plan = entry.defaults.clone();
    plan.target_version = req.target_version;
    if let Some(capacity) = req.capacity {
        plan.capacity = capacity;
    }
    if let Some(percent) = req.min_healthy_percent {
        plan.min_healthy_percent = percent;
    }

    let handle = match entry.orchestrator.start(plan) {
        Ok(handle) => handle,
        Err(e @ DeployError::Busy { .. }) => {
            return error_response(&e.to_string(), StatusCode::CONFLICT).into_response();
        }
        Err(e @ DeployError::InvalidPlan(_)) => {
            return error_response(&e.to_string(), StatusCode::BAD_REQUEST).into_response();
        }
        Err(e) => {
            return error_response(&e.to_string(), StatusCode::INTERNAL_SERVER_ERROR)
                .into_response();
        }
    };

    let id = handle.id().to_string();
    state
        .active
        .write()
        .await
        .insert(id.clone(), handle.cancel_handle());

    let active = state.active.clone();
    let watched = id.clone();
    let mut watchers = state.watchers.lock().await;
    while watchers.try_join_next().is_some() {}
    watchers.spawn(async move {
        let outcome = handle.wait().await;
        active.write().await.remove(&watched);
        info!(deployment = %watched, %outcome, "deployment no longer active");
    });
    drop(watchers);

    (
        StatusCode::ACCEPTED,
        ApiResponse::ok(serde_json::json!({
            "deployment_id": id,
            "fleet_id": fleet,
            "status": "running",
        })),
    )
        .into_response()
}

/// GET /api/v1/deployments
pub async fn list_deployments(State(state): State<ApiState>) -> impl IntoResponse {
    match state.store.list_deployments() {
        Ok(records) => ApiResponse::ok(records).into_response(),
        Err(e) => error_response(&e.to_string(), StatusCode::INTERNAL_SERVER_ERROR).into_response(),
    }
}

/// GET /api/v1/deployments/:id
pub async fn get_deployment(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match state.store.get_deployment(&id) {
        Ok(Some(record)) => ApiResponse::ok(record).into_response(),
        Ok(None) => error_response("deployment not found", StatusCode::NOT_FOUND).into_response(),
        Err(e) => error_response(&e.to_string(), StatusCode::INTERNAL_SERVER_ERROR).into_response(),
    }
}

/// GET /api/v1/deployments/:id/events
pub async fn list_events(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    match state.store.get_deployment(&id) {
        Ok(Some(_)) => {}
        Ok(None) => {
            return error_response("deployment not found", StatusCode::NOT_FOUND).into_response();
        }
        Err(e) => {
            return error_response(&e.to_string(), StatusCode::INTERNAL_SERVER_ERROR)
                .into_response();
        }
    }
    match state.store.list_events(&id) {
        Ok(events) => ApiResponse::ok(events).into_response(),
        Err(e) => error_response(&e.to_string(), StatusCode::INTERNAL_SERVER_ERROR).into_response(),
    }
}

/// POST /api/v1/deployments/:id/cancel
pub async fn cancel_deployment(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    let active = state.active.read().await;
    match active.get(&id) {
        Some(cancel) => {
            cancel.cancel();
            info!(deployment = %id, "cancellation requested");
            (
                StatusCode::ACCEPTED,
                ApiResponse::ok(serde_json::json!({
                    "deployment_id": id,
                    "status": "cancelling",
                })),
            )
                .into_response()
        }
        None => error_response("no active deployment with that id", StatusCode::NOT_FOUND)
            .into_response(),
    }
}

// ── Leases ─────────────────────────────────────────────────────

/// GET /api/v1/fleets/:fleet/lease
pub async fn get_lease(
    State(state): State<ApiState>,
    Path(fleet): Path<String>,
) -> impl IntoResponse {
    match state.store.get_lease(&fleet) {
        Ok(Some(lease)) => ApiResponse::ok(lease).into_response(),
        Ok(None) => error_response("fleet is not leased", StatusCode::NOT_FOUND).into_response(),
        Err(e) => error_response(&e.to_string(), StatusCode::INTERNAL_SERVER_ERROR).into_response(),
    }
}
