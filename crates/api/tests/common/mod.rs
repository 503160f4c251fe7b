//! Shared helpers for HTTP-level integration tests.
//!
//! [`build_test_app`] assembles the production router over a `MemoryStore`
//! and a `MemoryBackend`; requests go through `tower::ServiceExt::oneshot`
//! without a TCP listener.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Method, Request, Response};
use axum::Router;
use ccf_api::config::ServerConfig;
use ccf_api::router::build_app_router;
use ccf_api::state::AppState;
use ccf_backend::MemoryBackend;
use ccf_core::retry::RetryPolicy;
use ccf_db::MemoryStore;
use ccf_events::CompletionInbox;
use ccf_orchestrator::{Orchestrator, OrchestratorConfig};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;

/// Server configuration with the development CORS origin.
pub fn test_config() -> ServerConfig {
    ServerConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        cors_origins: vec!["http://localhost:5173".to_string()],
        request_timeout_secs: 30,
        shutdown_timeout_secs: 5,
    }
}

/// The router plus handles on the in-memory collaborators behind it.
pub struct TestApp {
    pub router: Router,
    pub store: Arc<MemoryStore>,
    pub backend: Arc<MemoryBackend>,
    pub inbox: Arc<CompletionInbox>,
    pub orchestrator: Orchestrator,
}

impl TestApp {
    /// A fresh router sharing this app's state.
    pub fn app(&self) -> Router {
        self.router.clone()
    }

    /// Create a connector through the API and return its id.
    pub async fn create_connector(&self, name: &str) -> String {
        let response = post_json(self.app(), "/api/v1/connectors", connector_body(name)).await;
        let json = body_json(response).await;
        json["data"]["connector_id"]
            .as_str()
            .expect("created connector should have an id")
            .to_string()
    }

    /// Start a job through the API and return its id.
    pub async fn start_job(&self, connector_id: &str) -> String {
        let response = post_json(
            self.app(),
            &format!("/api/v1/connectors/{connector_id}/jobs"),
            json!({}),
        )
        .await;
        let json = body_json(response).await;
        json["data"]["job_id"]
            .as_str()
            .expect("started job should have an id")
            .to_string()
    }
}

pub fn build_test_app() -> TestApp {
    let store = Arc::new(MemoryStore::default());
    let inbox = Arc::new(CompletionInbox::default());
    let backend = Arc::new(MemoryBackend::new(Arc::clone(&inbox)));
    let orchestrator = Orchestrator::new(
        store.clone(),
        backend.clone(),
        OrchestratorConfig {
            dispatch_retry: RetryPolicy {
                max_attempts: 2,
                initial_delay: Duration::from_millis(10),
                max_delay: Duration::from_millis(50),
                multiplier: 2.0,
                jitter: false,
            },
            ..OrchestratorConfig::default()
        },
    );

    let config = test_config();
    let state = AppState {
        store: store.clone(),
        orchestrator: orchestrator.clone(),
    };

    TestApp {
        router: build_app_router(state, &config),
        store,
        backend,
        inbox,
        orchestrator,
    }
}

/// A valid `POST /connectors` body.
pub fn connector_body(name: &str) -> Value {
    json!({
        "name": name,
        "description": "Nightly CRM export",
        "container_spec": {
            "image_uri": "registry.local/connectors/crm:1.0",
            "execution_role": "role/ccf-execution",
            "resource_requirements": { "cpu": 0.5, "memory_mib": 1024 },
            "timeout_secs": 900
        }
    })
}

pub async fn send(app: Router, method: Method, uri: &str, body: Option<Value>) -> Response<Body> {
    let builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };
    app.oneshot(request).await.unwrap()
}

pub async fn get(app: Router, uri: &str) -> Response<Body> {
    send(app, Method::GET, uri, None).await
}

pub async fn post_json(app: Router, uri: &str, body: Value) -> Response<Body> {
    send(app, Method::POST, uri, Some(body)).await
}

pub async fn put_json(app: Router, uri: &str, body: Value) -> Response<Body> {
    send(app, Method::PUT, uri, Some(body)).await
}

pub async fn delete(app: Router, uri: &str) -> Response<Body> {
    send(app, Method::DELETE, uri, None).await
}

pub async fn body_json(response: Response<Body>) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}
