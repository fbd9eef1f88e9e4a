//! Shared fixtures for the integration suites: an in-memory application and
//! a tiny request helper that speaks the response envelope.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use serde_json::Value;
use tower::ServiceExt;
use uuid::Uuid;

use selah::database::test_database;
use selah::server::{self, AppState};
use selah::Config;

pub struct TestApp {
    pub state: Arc<AppState>,
    pub router: Router,
}

pub async fn spawn_app() -> TestApp {
    spawn_app_with(Config::for_tests()).await
}

pub async fn spawn_app_with(config: Config) -> TestApp {
    let db = test_database().await;
    let state = AppState::build(config, db);
    let router = server::router(state.clone());
    TestApp { state, router }
}

pub struct RequestSpec<'a> {
    pub method: &'a str,
    pub path: &'a str,
    pub bearer: Option<&'a str>,
    pub body: Option<Value>,
    pub extra_headers: Vec<(&'a str, String)>,
}

impl<'a> RequestSpec<'a> {
    pub fn get(path: &'a str) -> Self {
        Self {
            method: "GET",
            path,
            bearer: None,
            body: None,
            extra_headers: Vec::new(),
        }
    }

    pub fn post(path: &'a str, body: Value) -> Self {
        Self {
            method: "POST",
            path,
            bearer: None,
            body: Some(body),
            extra_headers: Vec::new(),
        }
    }

    pub fn with_bearer(mut self, token: &'a str) -> Self {
        self.bearer = Some(token);
        self
    }

    pub fn with_header(mut self, name: &'a str, value: String) -> Self {
        self.extra_headers.push((name, value));
        self
    }
}

/// Send a request through the router and decode the JSON body.
pub async fn send(app: &TestApp, spec: RequestSpec<'_>) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(spec.method).uri(spec.path);
    if let Some(token) = spec.bearer {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }
    for (name, value) in &spec.extra_headers {
        builder = builder.header(*name, value.as_str());
    }

    let request = match spec.body {
        Some(body) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(serde_json::to_vec(&body).unwrap()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), 1 << 20)
        .await
        .unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

/// A signed-in user: row in `users` plus a bearer token.
pub async fn signed_in_user(app: &TestApp) -> (Uuid, String) {
    let email = format!("{}@example.com", Uuid::new_v4().simple());
    let user_id = selah::auth::oauth::upsert_user(app.state.db.pool(), &email)
        .await
        .unwrap();
    let token = app.state.auth.issue_user_token(user_id).unwrap();
    (user_id, token)
}

/// Assert the envelope is a success and unwrap `data`.
pub fn data(value: &Value) -> &Value {
    assert_eq!(value["success"], Value::Bool(true), "expected success envelope: {value}");
    &value["data"]
}

/// Assert the envelope is an error and return its code.
pub fn error_code(value: &Value) -> &str {
    assert_eq!(value["success"], Value::Bool(false), "expected error envelope: {value}");
    value["error"]["code"].as_str().unwrap()
}
