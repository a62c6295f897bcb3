//! Integration tests for REST API endpoints
//!
//! Tests submission, status polling, resource-shaped lifecycle routes,
//! inventory passthroughs and the error body contract.

mod common;

use axum::http::StatusCode;
use common::{extract_json_body, TestClient};
use fleet_orchestrator::test_utils::wait_for_terminal;
use fleet_orchestrator::{Operation, OperationState};
use serde_json::{json, Value};
use std::time::Duration;

const WAIT: Duration = Duration::from_secs(5);

#[tokio::test]
async fn test_health_endpoints() {
    let client = TestClient::new().await;

    let response = client.get("/health").await;
    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = extract_json_body(response).await;
    assert_eq!(body["service"], "fleet-api");

    let response = client.get("/health/ready").await;
    let body: Value = extract_json_body(response).await;
    assert_eq!(body["status"], "ready");
    assert_eq!(body["backend"], "memory");
}

#[tokio::test]
async fn test_submit_then_poll_until_succeeded() {
    let client = TestClient::new().await;
    let vm = client.vm_uuid("p1", "p1-db-01").await;

    let response = client
        .post(
            "/api/v1/operations",
            &json!({ "pool": "p1", "resource_uuid": vm, "kind": "start" }),
        )
        .await;
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let body: Value = extract_json_body(response).await;
    assert_eq!(body["state"], "queued");
    let id = body["operation_id"].as_str().unwrap().to_string();

    wait_for_terminal(&client.fleet, &id, WAIT).await;

    let response = client.get(&format!("/api/v1/operations/{id}")).await;
    assert_eq!(response.status(), StatusCode::OK);
    let op: Operation = extract_json_body(response).await;
    assert_eq!(op.state, OperationState::Succeeded);
    assert_eq!(op.result, Some(json!({ "power_state": "Running" })));
}

#[tokio::test]
async fn test_busy_resource_returns_conflict_with_existing_id() {
    let client = TestClient::new().await;
    client.hypervisor.set_latency(Duration::from_millis(300));
    let vm = client.vm_uuid("p1", "p1-db-01").await;

    let response = client
        .post_empty(&format!("/api/v1/pools/p1/vms/{vm}/start"))
        .await;
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let first: Value = extract_json_body(response).await;

    let response = client
        .post(
            "/api/v1/operations",
            &json!({ "pool": "p1", "resource_uuid": vm, "kind": "stop" }),
        )
        .await;
    assert_eq!(response.status(), StatusCode::CONFLICT);
    let body: Value = extract_json_body(response).await;
    assert_eq!(body["error_kind"], "resource_busy");
    assert_eq!(body["existing_operation_id"], first["operation_id"]);
}

#[tokio::test]
async fn test_invalid_requests_return_bad_request() {
    let client = TestClient::new().await;

    let cases = [
        // Unknown kind
        r#"{"pool": "p1", "resource_uuid": "u1", "kind": "migrate"}"#,
        // Unknown pool
        r#"{"pool": "p9", "resource_uuid": "u1", "kind": "start"}"#,
        // Missing resource uuid
        r#"{"pool": "p1", "kind": "destroy"}"#,
        // Unknown payload field
        r#"{"pool": "p1", "resource_uuid": "u1", "kind": "stop", "payload": {"now": true}}"#,
        // Not JSON
        "start everything",
    ];

    for case in cases {
        let response = client.post_raw("/api/v1/operations", case).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST, "body: {case}");
        let body: Value = extract_json_body(response).await;
        assert_eq!(body["error_kind"], "invalid_request");
        assert!(body["error"].as_str().is_some_and(|e| !e.is_empty()));
    }

    let response = client.get("/api/v1/locks").await;
    let locks: Vec<Value> = extract_json_body(response).await;
    assert!(locks.is_empty());
}

#[tokio::test]
async fn test_unknown_operation_returns_not_found() {
    let client = TestClient::new().await;

    let response = client.get("/api/v1/operations/does-not-exist").await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let body: Value = extract_json_body(response).await;
    assert_eq!(body["error_kind"], "not_found");
}

#[tokio::test]
async fn test_destroy_running_vm_records_remote_rejection() {
    let client = TestClient::new().await;
    let vm = client.vm_uuid("p1", "p1-web-01").await;

    let response = client
        .post_empty(&format!("/api/v1/pools/p1/vms/{vm}/destroy"))
        .await;
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let body: Value = extract_json_body(response).await;
    let id = body["operation_id"].as_str().unwrap();

    let op = wait_for_terminal(&client.fleet, id, WAIT).await;
    assert_eq!(op.state, OperationState::Failed);
    assert!(op.error.unwrap().contains("vm running"));

    // The lock is gone, so the retry is accepted
    let response = client
        .post_empty(&format!("/api/v1/pools/p1/vms/{vm}/destroy"))
        .await;
    assert_eq!(response.status(), StatusCode::ACCEPTED);
}

#[tokio::test]
async fn test_forced_stop_is_recorded_in_payload() {
    let client = TestClient::new().await;
    let vm = client.vm_uuid("p1", "p1-web-01").await;

    let response = client
        .post_empty(&format!("/api/v1/pools/p1/vms/{vm}/stop?force=true"))
        .await;
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let body: Value = extract_json_body(response).await;
    let id = body["operation_id"].as_str().unwrap();

    let op = wait_for_terminal(&client.fleet, id, WAIT).await;
    assert_eq!(op.state, OperationState::Succeeded);
    assert_eq!(op.request.payload.get("force"), Some(&json!(true)));
    assert_eq!(op.result, Some(json!({ "power_state": "Halted" })));
}

#[tokio::test]
async fn test_deploy_and_update_vm_through_pool_routes() {
    let client = TestClient::new().await;

    let response = client
        .post(
            "/api/v1/pools/p1/vms",
            &json!({
                "name": "app-01",
                "template": "debian-12",
                "cpu_cores": 2,
                "puppetmaster": "puppet.example.com"
            }),
        )
        .await;
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let body: Value = extract_json_body(response).await;
    let op = wait_for_terminal(&client.fleet, body["operation_id"].as_str().unwrap(), WAIT).await;
    assert_eq!(op.state, OperationState::Succeeded);
    let uuid = op.result.unwrap()["uuid"].as_str().unwrap().to_string();

    let response = client
        .put(
            &format!("/api/v1/pools/p1/vms/{uuid}"),
            &json!({ "description": "frontend", "backup": true }),
        )
        .await;
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let body: Value = extract_json_body(response).await;
    wait_for_terminal(&client.fleet, body["operation_id"].as_str().unwrap(), WAIT).await;

    let response = client.get(&format!("/api/v1/pools/p1/vms/{uuid}")).await;
    assert_eq!(response.status(), StatusCode::OK);
    let details: Value = extract_json_body(response).await;
    assert_eq!(details["name_label"], "app-01");
    assert_eq!(details["name_description"], "frontend");
    assert_eq!(details["vcpus"], 2);
    assert_eq!(details["other_config"]["XenCenter.CustomFields.backup"], "1");
    assert_eq!(details["other_config"]["puppetmaster"], "puppet.example.com");
    assert_eq!(details["disks"][0]["device"], "xvda");
    assert_eq!(details["disks"][0]["sr_name"], "Local storage");
}

#[tokio::test]
async fn test_deploy_without_template_is_rejected() {
    let client = TestClient::new().await;

    let response = client
        .post("/api/v1/pools/p1/vms", &json!({ "name": "app-01" }))
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_network_create_and_update() {
    let client = TestClient::new().await;

    let response = client
        .post(
            "/api/v1/pools/p1/networks",
            &json!({ "name": "dmz", "vlan": 300 }),
        )
        .await;
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let body: Value = extract_json_body(response).await;
    let op = wait_for_terminal(&client.fleet, body["operation_id"].as_str().unwrap(), WAIT).await;
    let uuid = op.result.unwrap()["uuid"].as_str().unwrap().to_string();

    let response = client
        .put(
            &format!("/api/v1/pools/p1/networks/{uuid}"),
            &json!({ "description": "public services" }),
        )
        .await;
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let body: Value = extract_json_body(response).await;
    wait_for_terminal(&client.fleet, body["operation_id"].as_str().unwrap(), WAIT).await;

    let response = client.get(&format!("/api/v1/pools/p1/networks/{uuid}")).await;
    let details: Value = extract_json_body(response).await;
    assert_eq!(details["name_label"], "dmz");
    assert_eq!(details["name_description"], "public services");
    assert_eq!(details["vlan"], 300);

    let response = client.get("/api/v1/pools/p1/networks").await;
    let networks: Vec<Value> = extract_json_body(response).await;
    assert_eq!(networks.len(), 2);
}

#[tokio::test]
async fn test_inventory_routes() {
    let client = TestClient::with_pools(&["p1", "p2"]).await;

    let response = client.get("/api/v1/pools").await;
    assert_eq!(response.status(), StatusCode::OK);
    let pools: Vec<Value> = extract_json_body(response).await;
    assert_eq!(pools.len(), 2);
    assert_eq!(pools[0]["name"], "p1");
    assert_eq!(pools[0]["running"], 0);

    let hosts: Vec<Value> = extract_json_body(client.get("/api/v1/pools/p2/hosts").await).await;
    assert_eq!(hosts.len(), 2);

    let templates: Vec<Value> =
        extract_json_body(client.get("/api/v1/pools/p1/templates").await).await;
    assert!(templates.iter().any(|t| t["name_label"] == "debian-12"));

    let vms: Vec<Value> = extract_json_body(client.get("/api/v1/pools/p1/vms").await).await;
    assert_eq!(vms.len(), 2);
}

#[tokio::test]
async fn test_inventory_error_mapping() {
    let client = TestClient::new().await;

    let response = client.get("/api/v1/pools/p9/vms").await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = client.get("/api/v1/pools/p1/vms/no-such-vm").await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    client.hypervisor.set_unreachable("p1", true);
    let response = client.get("/api/v1/pools/p1/hosts").await;
    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    let body: Value = extract_json_body(response).await;
    assert_eq!(body["error_kind"], "unreachable");
}

#[tokio::test]
async fn test_list_operations_with_filters() {
    let client = TestClient::new().await;
    let web = client.vm_uuid("p1", "p1-web-01").await;
    let db = client.vm_uuid("p1", "p1-db-01").await;

    for uri in [
        format!("/api/v1/pools/p1/vms/{web}/restart"),
        format!("/api/v1/pools/p1/vms/{db}/start"),
    ] {
        let body: Value = extract_json_body(client.post_empty(&uri).await).await;
        wait_for_terminal(&client.fleet, body["operation_id"].as_str().unwrap(), WAIT).await;
    }

    let all: Vec<Operation> = extract_json_body(client.get("/api/v1/operations").await).await;
    assert_eq!(all.len(), 2);

    let restarts: Vec<Operation> =
        extract_json_body(client.get("/api/v1/operations?kind=restart").await).await;
    assert_eq!(restarts.len(), 1);
    assert_eq!(restarts[0].resource_uuid, web);

    let for_db: Vec<Operation> = extract_json_body(
        client
            .get(&format!("/api/v1/operations?resource_uuid={db}&state=succeeded"))
            .await,
    )
    .await;
    assert_eq!(for_db.len(), 1);

    let response = client.get("/api/v1/operations?state=sideways").await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_openapi_document_lists_routes() {
    let client = TestClient::new().await;

    let response = client.get("/api-docs/openapi.json").await;
    assert_eq!(response.status(), StatusCode::OK);
    let doc: Value = extract_json_body(response).await;
    assert!(doc["paths"]["/api/v1/operations"].is_object());
    assert!(doc["paths"]["/api/v1/pools/{pool}/vms/{uuid}/stop"].is_object());
}
