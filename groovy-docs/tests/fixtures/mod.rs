#![allow(dead_code)]

use axum::body::{self, Body};
use axum::http::{Request, StatusCode};
use axum::Router;
use groovy_docs::api::{router, AppState};
use groovy_docs_core::auth::TokenVerifier;
use groovy_docs_core::Store;
use serde_json::Value;
use std::sync::Arc;
use tempfile::TempDir;
use tower::util::ServiceExt;

pub struct TestApp {
    pub dir: TempDir,
    pub state: AppState,
    pub app: Router,
}

pub fn test_app() -> TestApp {
    test_app_with(None, true)
}

pub fn test_app_with(verifier: Option<Arc<dyn TokenVerifier>>, dev_headers: bool) -> TestApp {
    let dir = tempfile::tempdir().unwrap();
    let store = Store::new(dir.path()).unwrap();
    let state = AppState::new(store, verifier, dev_headers);
    let app = router(state.clone());
    TestApp { dir, state, app }
}

pub fn request(method: &str, uri: &str, headers: &[(&str, &str)], body: Option<Value>) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    for (name, value) in headers {
        builder = builder.header(*name, *value);
    }
    match body {
        Some(json) => builder
            .header("content-type", "application/json")
            .body(Body::from(json.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

/// Response status and JSON body (`Null` when empty or not JSON).
pub async fn send(app: &Router, req: Request<Body>) -> (StatusCode, Value) {
    let resp = app.clone().oneshot(req).await.unwrap();
    let status = resp.status();
    let bytes = body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, json)
}

/// Call as a personal user through the development header.
pub async fn call(app: &Router, method: &str, uri: &str, user: &str, body: Option<Value>) -> (StatusCode, Value) {
    send(app, request(method, uri, &[("X-User-Id", user)], body)).await
}

/// Call as an organization member through the development headers.
pub async fn call_in_org(
    app: &Router,
    method: &str,
    uri: &str,
    user: &str,
    org: &str,
    role: &str,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let headers = [("X-User-Id", user), ("X-Org-Id", org), ("X-Org-Role", role)];
    send(app, request(method, uri, &headers, body)).await
}

pub fn id(v: &Value) -> String {
    v["id"].as_str().unwrap().to_string()
}

pub async fn create(app: &Router, user: &str, parent: Option<&str>, node_type: &str, title: &str) -> String {
    let (status, body) = call(
        app,
        "POST",
        "/nodes",
        user,
        Some(serde_json::json!({
            "parent_id": parent,
            "node_type": node_type,
            "title": title,
            "content": "",
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{}", body);
    id(&body)
}
