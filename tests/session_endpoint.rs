//! End-to-end tests for the stub driver's session endpoint over HTTP.

use std::net::SocketAddr;
use std::sync::Arc;

use machina::stub::sessions::{ADMIN_USER, DEFAULT_SESSION_USER, SessionEndpoint};
use machina::{Driver, InMemoryRegistry, StaticConfigSource, StubDriver};
use reqwest::{Client, StatusCode};
use serde_json::{Value, json};

fn url(addr: SocketAddr, path: &str) -> String {
    format!("http://{addr}{path}")
}

async fn list(client: &Client, addr: SocketAddr) -> Vec<Value> {
    let body: Value = client
        .get(url(addr, "/sessions/anyone"))
        .send()
        .await
        .expect("request")
        .error_for_status()
        .expect("status")
        .json()
        .await
        .expect("json body");
    body["data"].as_array().cloned().expect("data array")
}

fn row(user: &str, label: &str) -> Value {
    json!([null, user, null, label])
}

#[tokio::test]
async fn default_session_opens_and_closes() {
    let endpoint = SessionEndpoint::start().await.expect("endpoint starts");
    let addr = endpoint.local_addr();
    let client = Client::new();

    assert_eq!(
        list(&client, addr).await,
        vec![row(DEFAULT_SESSION_USER, "Inactive")]
    );

    let opened = client
        .post(url(addr, "/sessionOpen"))
        .send()
        .await
        .expect("open");
    assert_eq!(opened.status(), StatusCode::OK);
    assert_eq!(
        list(&client, addr).await,
        vec![row(DEFAULT_SESSION_USER, "Active")]
    );

    let closed = client
        .post(url(addr, "/sessionClose"))
        .send()
        .await
        .expect("close");
    assert_eq!(closed.status(), StatusCode::OK);
    assert_eq!(
        list(&client, addr).await,
        vec![row(DEFAULT_SESSION_USER, "Inactive")]
    );

    endpoint.shutdown().await;
}

#[tokio::test]
async fn named_sessions_follow_open_and_delete() {
    let endpoint = SessionEndpoint::start().await.expect("endpoint starts");
    let addr = endpoint.local_addr();
    let client = Client::new();

    client
        .post(url(addr, "/sessionOpen"))
        .json(&json!({"username": "alice"}))
        .send()
        .await
        .expect("open")
        .error_for_status()
        .expect("accepted");
    let rows = list(&client, addr).await;
    assert!(rows.contains(&row("alice", "Active")));
    assert!(rows.contains(&row(DEFAULT_SESSION_USER, "Inactive")));

    client
        .delete(url(addr, "/sessions/alice"))
        .send()
        .await
        .expect("delete")
        .error_for_status()
        .expect("accepted");
    assert_eq!(
        list(&client, addr).await,
        vec![row(DEFAULT_SESSION_USER, "Inactive")]
    );

    client
        .post(url(addr, "/sessionOpen"))
        .send()
        .await
        .expect("open default");
    client
        .delete(url(addr, &format!("/sessions/{ADMIN_USER}")))
        .send()
        .await
        .expect("delete admin");
    assert_eq!(
        list(&client, addr).await,
        vec![row(DEFAULT_SESSION_USER, "Inactive")]
    );

    endpoint.shutdown().await;
}

#[tokio::test]
async fn malformed_open_body_is_rejected() {
    let endpoint = SessionEndpoint::start().await.expect("endpoint starts");
    let addr = endpoint.local_addr();
    let response = Client::new()
        .post(url(addr, "/sessionOpen"))
        .body("{not json")
        .send()
        .await
        .expect("request");
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert!(
        endpoint
            .sessions()
            .snapshot()
            .await
            .iter()
            .all(|session| !session.active)
    );
    endpoint.shutdown().await;
}

#[tokio::test]
async fn drivers_get_independent_endpoints() {
    let first = StubDriver::new(
        Arc::new(InMemoryRegistry::new()),
        Arc::new(StaticConfigSource::new()),
    );
    let second = StubDriver::new(
        Arc::new(InMemoryRegistry::new()),
        Arc::new(StaticConfigSource::new()),
    );
    first.initialize().await.expect("first initialize");
    second.initialize().await.expect("second initialize");

    let first_addr = first.session_endpoint_addr().await.expect("first endpoint");
    let second_addr = second.session_endpoint_addr().await.expect("second endpoint");
    assert_ne!(first_addr, second_addr);

    let client = Client::new();
    client
        .post(url(first_addr, "/sessionOpen"))
        .send()
        .await
        .expect("open on first");
    assert_eq!(
        list(&client, second_addr).await,
        vec![row(DEFAULT_SESSION_USER, "Inactive")]
    );

    first.shutdown().await;
    assert!(
        Client::new()
            .get(url(first_addr, "/sessions/anyone"))
            .send()
            .await
            .is_err(),
        "endpoint still answering after shutdown"
    );
    second.shutdown().await;
}
