mod helpers;

use std::sync::Arc;

use serde_json::json;

use lodestar::engine::Engine;
use lodestar::store::MemoryStore;
use lodestar::web;

use helpers::FakeOracle;

/// Bind the router to an ephemeral port and return its base URL.
async fn spawn_app(oracle: Arc<FakeOracle>) -> String {
    let store = Arc::new(MemoryStore::new());
    let engine = Arc::new(Engine::new(store, oracle));
    let router = web::router(engine);

    let listener = tokio::net::TcpListener::bind(("127.0.0.1", 0))
        .await
        .expect("Failed to bind listener");
    let addr = listener.local_addr().expect("Failed to read local addr");
    tokio::spawn(async move {
        axum::serve(listener, router).await.expect("Server failed");
    });
    format!("http://{addr}")
}

#[tokio::test]
async fn test_health() {
    let base = spawn_app(Arc::new(FakeOracle::denying())).await;
    let resp = reqwest::get(format!("{base}/health"))
        .await
        .expect("Failed to reach server");
    assert_eq!(resp.status(), 200);
    assert_eq!(resp.text().await.expect("Failed to read body"), "OK");
}

#[tokio::test]
async fn test_namespace_document_refresh_check_roundtrip() {
    let base = spawn_app(Arc::new(FakeOracle::granting(&[("viewer", "document:123")]))).await;
    let client = reqwest::Client::new();

    // The path segment wins over the id in the body
    let resp = client
        .put(format!("{base}/namespace/acme"))
        .json(&json!({ "id": "ignored", "authorizationStoreId": "store1" }))
        .send()
        .await
        .expect("Failed to save namespace");
    assert_eq!(resp.status(), 200);

    let resp = client
        .put(format!("{base}/namespace/acme/doc/doc1"))
        .json(&json!({
            "policies": [{
                "action": "read",
                "resourceType": "document",
                "rule": "principalId == \"user:bob\" && rel(\"viewer\")"
            }]
        }))
        .send()
        .await
        .expect("Failed to save document");
    assert_eq!(resp.status(), 200);

    let resp = client
        .post(format!("{base}/namespace/acme/refresh"))
        .send()
        .await
        .expect("Failed to refresh");
    assert_eq!(resp.status(), 200);
    assert_eq!(resp.text().await.expect("Failed to read body"), "OK");

    let resp = client
        .post(format!("{base}/namespace/acme"))
        .json(&json!({ "principalId": "user:bob", "resourceId": "document:123" }))
        .send()
        .await
        .expect("Failed to check permissions");
    assert_eq!(resp.status(), 200);
    let actions: Vec<String> = resp.json().await.expect("Failed to decode actions");
    assert_eq!(actions, vec!["read"]);

    // Wrong principal: empty decision, still a 200
    let resp = client
        .post(format!("{base}/namespace/acme"))
        .json(&json!({ "principalId": "user:eve", "resourceId": "document:123" }))
        .send()
        .await
        .expect("Failed to check permissions");
    assert_eq!(resp.status(), 200);
    let actions: Vec<String> = resp.json().await.expect("Failed to decode actions");
    assert!(actions.is_empty());
}

#[tokio::test]
async fn test_unknown_namespace_is_404() {
    let base = spawn_app(Arc::new(FakeOracle::denying())).await;
    let client = reqwest::Client::new();

    let resp = client
        .post(format!("{base}/namespace/ghost"))
        .json(&json!({ "principalId": "user:bob", "resourceId": "document:123" }))
        .send()
        .await
        .expect("Failed to check permissions");
    assert_eq!(resp.status(), 404);

    let body: serde_json::Value = resp.json().await.expect("Failed to decode error");
    let message = body["error"].as_str().expect("error field");
    assert!(message.contains("ghost"), "unexpected error: {message}");
}

#[tokio::test]
async fn test_malformed_caller_rule_is_400() {
    let base = spawn_app(Arc::new(FakeOracle::denying())).await;
    let client = reqwest::Client::new();

    let resp = client
        .put(format!("{base}/namespace/acme"))
        .json(&json!({ "authorizationStoreId": "store1" }))
        .send()
        .await
        .expect("Failed to save namespace");
    assert_eq!(resp.status(), 200);

    let resp = client
        .post(format!("{base}/namespace/acme"))
        .json(&json!({
            "principalId": "user:bob",
            "resourceId": "document:123",
            "policies": [{ "action": "read", "resourceType": "document", "rule": "((" }]
        }))
        .send()
        .await
        .expect("Failed to check permissions");
    assert_eq!(resp.status(), 400);

    let body: serde_json::Value = resp.json().await.expect("Failed to decode error");
    assert!(body["error"].as_str().is_some());
}

#[tokio::test]
async fn test_missing_store_id_is_500() {
    let base = spawn_app(Arc::new(FakeOracle::denying())).await;
    let client = reqwest::Client::new();

    let resp = client
        .put(format!("{base}/namespace/acme"))
        .json(&json!({ "authorizationStoreId": "" }))
        .send()
        .await
        .expect("Failed to save namespace");
    assert_eq!(resp.status(), 200);

    let resp = client
        .post(format!("{base}/namespace/acme"))
        .json(&json!({ "principalId": "user:bob", "resourceId": "document:123" }))
        .send()
        .await
        .expect("Failed to check permissions");
    assert_eq!(resp.status(), 500);
}
