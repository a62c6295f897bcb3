//! Common test utilities and helpers for fleet-api tests

#![allow(dead_code)]

use axum::{
    body::Body,
    http::{Request, Response},
    Router,
};
use fleet_hypervisor::InMemoryHypervisor;
use fleet_orchestrator::test_utils::{start_test_fleet, test_config};
use fleet_orchestrator::Fleet;
use std::sync::Arc;

/// Start a fleet over the given simulated pools with an in-memory database
pub async fn create_test_fleet(pools: &[&str]) -> (Fleet, Arc<InMemoryHypervisor>) {
    let hypervisor = Arc::new(InMemoryHypervisor::with_demo_pools(pools.iter().copied()));
    let fleet = start_test_fleet(test_config(pools), hypervisor.clone())
        .await
        .expect("Failed to start test fleet");
    (fleet, hypervisor)
}

/// Helper to extract JSON body from axum response
pub async fn extract_json_body<T>(response: Response<Body>) -> T
where
    T: serde::de::DeserializeOwned,
{
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("Failed to read response body");

    serde_json::from_slice(&body).expect("Failed to deserialize JSON")
}

/// TestClient to encapsulate API interaction logic
pub struct TestClient {
    pub app: Router,
    pub fleet: Fleet,
    pub hypervisor: Arc<InMemoryHypervisor>,
}

impl TestClient {
    /// Client over a fresh fleet with the pool `p1`
    pub async fn new() -> Self {
        Self::with_pools(&["p1"]).await
    }

    pub async fn with_pools(pools: &[&str]) -> Self {
        let (fleet, hypervisor) = create_test_fleet(pools).await;
        Self {
            app: fleet_api::create_app(fleet.clone()),
            fleet,
            hypervisor,
        }
    }

    /// Send a request to the API
    pub async fn send_request(&self, request: Request<Body>) -> Response<Body> {
        // Router is cheap to clone
        use tower::ServiceExt;
        self.app.clone().oneshot(request).await.unwrap()
    }

    pub async fn get(&self, uri: &str) -> Response<Body> {
        let request = Request::builder()
            .method("GET")
            .uri(uri)
            .body(Body::empty())
            .unwrap();
        self.send_request(request).await
    }

    /// Post raw JSON text, so tests can send bodies no Rust type would produce
    pub async fn post_raw(&self, uri: &str, body: &str) -> Response<Body> {
        let request = Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();
        self.send_request(request).await
    }

    pub async fn post<T: serde::Serialize>(&self, uri: &str, body: &T) -> Response<Body> {
        let body = serde_json::to_string(body).expect("Failed to serialize request body");
        self.post_raw(uri, &body).await
    }

    /// Post without a body, as the power-action routes expect
    pub async fn post_empty(&self, uri: &str) -> Response<Body> {
        let request = Request::builder()
            .method("POST")
            .uri(uri)
            .body(Body::empty())
            .unwrap();
        self.send_request(request).await
    }

    pub async fn put<T: serde::Serialize>(&self, uri: &str, body: &T) -> Response<Body> {
        let request = Request::builder()
            .method("PUT")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(serde_json::to_string(body).unwrap()))
            .unwrap();
        self.send_request(request).await
    }

    /// Uuid of the demo VM `name` in `pool`
    pub async fn vm_uuid(&self, pool: &str, name: &str) -> String {
        self.fleet
            .list_vms(pool)
            .await
            .unwrap()
            .into_iter()
            .find(|vm| vm.name_label == name)
            .map(|vm| vm.uuid)
            .unwrap_or_else(|| panic!("no VM named {name} in {pool}"))
    }
}
