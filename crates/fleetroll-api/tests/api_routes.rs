//! API routes driven through the router with `tower::ServiceExt::oneshot`.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::response::Response;
use tower::ServiceExt;

use fleetroll_api::{ApiState, FleetEntry, build_router};
use fleetroll_rollout::{Collaborators, DeploymentPlan, Orchestrator, SimulatedFleet};
use fleetroll_state::StateStore;

fn router_for(fleet: Arc<SimulatedFleet>) -> Router {
    build_router(state_for(fleet))
}

fn state_for(fleet: Arc<SimulatedFleet>) -> ApiState {
    let store = StateStore::open_in_memory().unwrap();
    let orchestrator = Orchestrator::new(Collaborators::from_fleet(fleet), store.clone());
    let defaults =
        DeploymentPlan::new("web", "v1", 2, 50).with_warmup(Duration::from_secs(5));
    let fleets = HashMap::from([(
        "web".to_string(),
        FleetEntry {
            orchestrator,
            defaults,
        },
    )]);
    ApiState::new(store, fleets)
}

fn sim() -> Arc<SimulatedFleet> {
    Arc::new(SimulatedFleet::new("web").with_members("v1", 2))
}

fn post(uri: &str, body: serde_json::Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(serde_json::to_vec(&body).unwrap()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

async fn json(resp: Response) -> serde_json::Value {
    let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test(start_paused = true)]
async fn start_and_poll_until_succeeded() {
    let fleet = sim();
    let router = router_for(fleet.clone());

    let resp = router
        .clone()
        .oneshot(post(
            "/api/v1/fleets/web/deployments",
            serde_json::json!({ "target_version": "v2" }),
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::ACCEPTED);
    let body = json(resp).await;
    assert_eq!(body["success"], true);
    let id = body["data"]["deployment_id"].as_str().unwrap().to_string();

    tokio::time::sleep(Duration::from_secs(120)).await;

    let resp = router
        .clone()
        .oneshot(get(&format!("/api/v1/deployments/{id}")))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let record = json(resp).await;
    assert_eq!(record["data"]["status"], "succeeded");
    assert_eq!(record["data"]["outcome"]["status"], "succeeded");
    assert_eq!(record["data"]["outcome"]["version"], "v2");
    assert_eq!(record["data"]["rounds_committed"], 2);

    let resp = router
        .clone()
        .oneshot(get(&format!("/api/v1/deployments/{id}/events")))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let events = json(resp).await;
    let events = events["data"].as_array().unwrap();
    assert_eq!(events[0]["kind"]["type"], "deployment_started");
    assert_eq!(
        events.last().unwrap()["kind"]["type"],
        "deployment_finished"
    );

    let resp = router
        .clone()
        .oneshot(get("/api/v1/fleets/web/lease"))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);

    let resp = router.oneshot(get("/api/v1/deployments")).await.unwrap();
    let list = json(resp).await;
    assert_eq!(list["data"].as_array().unwrap().len(), 1);
    assert_eq!(fleet.count_on("v2"), 2);
}

#[tokio::test(start_paused = true)]
async fn busy_fleet_conflicts_and_cancel_fails_the_deployment() {
    let fleet = sim();
    let router = router_for(fleet.clone());

    let resp = router
        .clone()
        .oneshot(post(
            "/api/v1/fleets/web/deployments",
            serde_json::json!({ "target_version": "v2" }),
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::ACCEPTED);
    let id = json(resp).await["data"]["deployment_id"]
        .as_str()
        .unwrap()
        .to_string();

    let resp = router
        .clone()
        .oneshot(post(
            "/api/v1/fleets/web/deployments",
            serde_json::json!({ "target_version": "v3" }),
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::CONFLICT);
    assert_eq!(json(resp).await["success"], false);

    let resp = router
        .clone()
        .oneshot(get("/api/v1/fleets/web/lease"))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(json(resp).await["data"]["deployment_id"], id.as_str());

    let resp = router
        .clone()
        .oneshot(post(
            &format!("/api/v1/deployments/{id}/cancel"),
            serde_json::json!({}),
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::ACCEPTED);

    tokio::time::sleep(Duration::from_secs(60)).await;

    let resp = router
        .clone()
        .oneshot(get(&format!("/api/v1/deployments/{id}")))
        .await
        .unwrap();
    let record = json(resp).await;
    assert_eq!(record["data"]["status"], "failed");
    assert_eq!(record["data"]["outcome"]["reason"], "cancelled");
    assert_eq!(fleet.count_on("v1"), 2);
    assert_eq!(fleet.count_on("v2"), 0);

    // No longer active.
    let resp = router
        .oneshot(post(
            &format!("/api/v1/deployments/{id}/cancel"),
            serde_json::json!({}),
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn unknown_fleet_is_not_found() {
    let router = router_for(sim());
    let resp = router
        .oneshot(post(
            "/api/v1/fleets/db/deployments",
            serde_json::json!({ "target_version": "v2" }),
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn invalid_plan_is_bad_request() {
    let router = router_for(sim());
    let resp = router
        .clone()
        .oneshot(post(
            "/api/v1/fleets/web/deployments",
            serde_json::json!({ "target_version": "v2", "min_healthy_percent": 0 }),
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let body = json(resp).await;
    assert!(body["error"].as_str().unwrap().starts_with("invalid plan"));

    let resp = router
        .oneshot(get("/api/v1/fleets/web/lease"))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn unknown_deployment_is_not_found() {
    let router = router_for(sim());
    for uri in [
        "/api/v1/deployments/dep-missing",
        "/api/v1/deployments/dep-missing/events",
    ] {
        let resp = router.clone().oneshot(get(uri)).await.unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND, "{uri}");
    }
}

#[tokio::test]
async fn empty_deployment_list() {
    let router = router_for(sim());
    let resp = router.oneshot(get("/api/v1/deployments")).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let body = json(resp).await;
    assert_eq!(body["data"], serde_json::json!([]));
}

#[tokio::test(start_paused = true)]
async fn drain_waits_for_cancelled_deployments_to_release_the_lease() {
    let fleet = sim();
    let state = state_for(fleet.clone());
    let router = build_router(state.clone());

    let resp = router
        .oneshot(post(
            "/api/v1/fleets/web/deployments",
            serde_json::json!({ "target_version": "v2" }),
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::ACCEPTED);
    let id = json(resp).await["data"]["deployment_id"]
        .as_str()
        .unwrap()
        .to_string();
    assert!(state.store.get_lease("web").unwrap().is_some());

    state.drain().await;

    assert!(state.store.get_lease("web").unwrap().is_none());
    assert!(state.active.read().await.is_empty());
    let record = state.store.get_deployment(&id).unwrap().unwrap();
    assert_eq!(
        record.outcome.map(|o| o.to_string()),
        Some("FAILED(cancelled)".to_string())
    );
    assert_eq!(fleet.count_on("v1"), 2);
    assert_eq!(fleet.count_on("v2"), 0);
}
