//! 🚪 Transport: the thin HTTP skin over the engine.
//!
//! | Method | Path                                   | Engine call      |
//! |--------|----------------------------------------|------------------|
//! | GET    | /health                                | `health_check`   |
//! | POST   | /api/v1/companies/batch                | `process_batch`  |
//! | GET    | /api/v1/companies                      | `fetch_all`      |
//! | PUT    | /api/v1/companies/update-treated?name= | `mark_treated`   |
//!
//! Every response is the same JSON envelope. Every request gets a
//! "Started"/"Completed" log line pair.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use axum::Router;
use axum::extract::{DefaultBodyLimit, Request};
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::{get, post, put};
use tracing::info;

use crate::engine::CompanyEngine;

pub mod envelope;
mod handlers;

pub use envelope::ApiResponse;

/// 📏 Upper bound on a batch request body.
pub const MAX_HTTP_BODY_BYTES: usize = 16 * 1024 * 1024;

/// 💓 Last known store liveness, as seen by `/health`.
///
/// Written only by the health handler, read by the batch handler to refuse
/// writes early. It gates availability, never correctness: a write that slips
/// through after the store died just fails with its own error.
#[derive(Debug, Clone)]
pub struct Liveness(Arc<AtomicBool>);

impl Liveness {
    pub fn new(healthy: bool) -> Self {
        Self(Arc::new(AtomicBool::new(healthy)))
    }

    pub fn mark(&self, healthy: bool) {
        self.0.store(healthy, Ordering::Relaxed);
    }

    pub fn is_healthy(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

impl Default for Liveness {
    fn default() -> Self {
        Self::new(true)
    }
}

/// 📦 Shared by every handler. Cheap to clone.
#[derive(Debug, Clone)]
pub struct AppState {
    engine: Arc<CompanyEngine>,
    liveness: Liveness,
}

impl AppState {
    pub fn new(engine: Arc<CompanyEngine>) -> Self {
        Self {
            engine,
            liveness: Liveness::default(),
        }
    }

    pub fn liveness(&self) -> &Liveness {
        &self.liveness
    }
}

/// 🗺️ Build the full router, middleware included.
pub fn router(state: AppState) -> Router {
    let api = Router::new()
        .route("/companies/batch", post(handlers::batch_upload))
        .route("/companies", get(handlers::fetch_all_companies))
        .route("/companies/update-treated", put(handlers::update_treated));

    Router::new()
        .route("/health", get(handlers::health_check))
        .nest("/api/v1", api)
        .layer(middleware::from_fn(log_requests))
        .layer(DefaultBodyLimit::max(MAX_HTTP_BODY_BYTES))
        .with_state(state)
}

/// 📝 One line when a request starts, one when it's answered.
async fn log_requests(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_owned();
    let started = Instant::now();
    info!("➡️ Started {} {}", method, path);

    let response = next.run(request).await;

    info!(
        "⬅️ Completed {} {} [{}] in {:?}",
        method,
        path,
        response.status().as_u16(),
        started.elapsed()
    );
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::{InMemoryStore, StoreBackend};
    use crate::engine::Deadlines;
    use axum::body::{Body, to_bytes};
    use axum::http::{Method, StatusCode, header::CONTENT_TYPE};
    use serde_json::{Value, json};
    use tower::ServiceExt; // for oneshot

    fn test_app() -> (Router, AppState, InMemoryStore) {
        let store = InMemoryStore::new();
        let engine = CompanyEngine::new(StoreBackend::InMemory(store.clone()), Deadlines::default());
        let state = AppState::new(Arc::new(engine));
        (router(state.clone()), state, store)
    }

    async fn call(app: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let mut builder = axum::http::Request::builder().method(method).uri(uri);
        let body = match body {
            Some(json) => {
                builder = builder.header(CONTENT_TYPE, "application/json");
                Body::from(json.to_string())
            }
            None => Body::empty(),
        };
        let request = builder.body(body).expect("💀 test request should build");
        let response = app
            .clone()
            .oneshot(request)
            .await
            .expect("💀 the router is infallible");

        let status = response.status();
        assert_eq!(response.headers()[CONTENT_TYPE], "application/json");
        let bytes = to_bytes(response.into_body(), MAX_HTTP_BODY_BYTES)
            .await
            .expect("💀 body should be readable");
        let json = serde_json::from_slice(&bytes).expect("💀 body should be JSON");
        (status, json)
    }

    #[tokio::test]
    async fn the_one_where_the_whole_story_plays_out_over_http() {
        let (app, _state, _store) = test_app();

        let (status, body) = call(
            &app,
            Method::POST,
            "/api/v1/companies/batch",
            Some(json!({ "companies": [ { "name": "A", "address": "X", "treated": false } ] })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);
        assert_eq!(body["data"]["processed_count"], 1);

        let (status, body) = call(&app, Method::GET, "/api/v1/companies", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"], json!([ { "name": "A", "address": "X", "treated": false } ]));

        let (status, body) =
            call(&app, Method::PUT, "/api/v1/companies/update-treated?name=A", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);

        let (_, body) = call(&app, Method::GET, "/api/v1/companies", None).await;
        assert_eq!(body["data"][0]["treated"], true);

        let (status, body) =
            call(&app, Method::PUT, "/api/v1/companies/update-treated?name=A", None).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["success"], false);
        assert!(
            body["message"]
                .as_str()
                .unwrap_or_default()
                .contains("no update performed"),
            "a second treat is a no-op error, got {body}"
        );
    }

    #[tokio::test]
    async fn the_one_where_health_reflects_the_store_and_gates_writes() {
        let (app, state, store) = test_app();

        let (status, body) = call(&app, Method::GET, "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({ "success": true, "message": "Service healthy" }));

        store.set_reachable(false);
        let (status, body) = call(&app, Method::GET, "/health", None).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["success"], false);
        assert!(!state.liveness().is_healthy());

        store.set_reachable(true);
        let (status, body) = call(
            &app,
            Method::POST,
            "/api/v1/companies/batch",
            Some(json!({ "companies": [ { "name": "A" } ] })),
        )
        .await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE, "last health check failed");
        assert_eq!(body["message"], "Service is not healthy");
        assert_eq!(store.bulk_calls(), 0);

        let (status, _) = call(&app, Method::GET, "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert!(state.liveness().is_healthy());
    }

    #[tokio::test]
    async fn the_one_where_bad_batches_bounce_at_the_door() {
        let (app, _state, store) = test_app();

        let (status, body) = call(
            &app,
            Method::POST,
            "/api/v1/companies/batch",
            Some(json!({ "companies": [] })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["message"], "No companies provided");

        let (status, body) = call(
            &app,
            Method::POST,
            "/api/v1/companies/batch",
            Some(json!({ "companies": "not a list" })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(
            body["message"]
                .as_str()
                .unwrap_or_default()
                .starts_with("Invalid request body")
        );

        let request = axum::http::Request::builder()
            .method(Method::POST)
            .uri("/api/v1/companies/batch")
            .body(Body::from("{ this is not json"))
            .expect("💀 test request should build");
        let response = app.clone().oneshot(request).await.expect("💀 infallible");
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        assert_eq!(store.bulk_calls(), 0);
    }

    #[tokio::test]
    async fn the_one_where_an_oversized_body_is_too_large_not_invalid() {
        let (app, _state, store) = test_app();
        let request = axum::http::Request::builder()
            .method(Method::POST)
            .uri("/api/v1/companies/batch")
            .header(CONTENT_TYPE, "application/json")
            .body(Body::from(vec![b' '; MAX_HTTP_BODY_BYTES + 1]))
            .expect("💀 test request should build");
        let response = app.clone().oneshot(request).await.expect("💀 infallible");

        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
        assert_eq!(response.headers()[CONTENT_TYPE], "application/json");
        let bytes = to_bytes(response.into_body(), MAX_HTTP_BODY_BYTES)
            .await
            .expect("💀 body should be readable");
        let body: Value = serde_json::from_slice(&bytes).expect("💀 body should be JSON");
        assert_eq!(body["success"], false);
        assert!(
            body["message"]
                .as_str()
                .unwrap_or_default()
                .starts_with("Invalid request body")
        );
        assert_eq!(store.bulk_calls(), 0);
    }

    #[tokio::test]
    async fn the_one_where_a_partial_batch_is_a_500_but_still_lands() {
        let (app, _state, store) = test_app();

        let (status, body) = call(
            &app,
            Method::POST,
            "/api/v1/companies/batch",
            Some(json!({ "companies": [ { "name": "A" }, { "name": "" }, { "name": "C" } ] })),
        )
        .await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(
            body["message"]
                .as_str()
                .unwrap_or_default()
                .starts_with("Failed to process batch")
        );
        assert_eq!(store.snapshot().await.len(), 2);
    }

    #[tokio::test]
    async fn the_one_where_update_needs_a_name() {
        let (app, _state, _store) = test_app();

        for uri in [
            "/api/v1/companies/update-treated",
            "/api/v1/companies/update-treated?name=",
        ] {
            let (status, body) = call(&app, Method::PUT, uri, None).await;
            assert_eq!(status, StatusCode::BAD_REQUEST, "{uri}");
            assert_eq!(body["message"], "Company name is required");
        }
    }

    #[tokio::test]
    async fn the_one_where_updating_a_stranger_is_not_found() {
        let (app, _state, _store) = test_app();
        let (status, body) = call(
            &app,
            Method::PUT,
            "/api/v1/companies/update-treated?name=nobody",
            None,
        )
        .await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(
            body["message"],
            "Failed to update treated field: company not found: nobody"
        );
    }

    #[tokio::test]
    async fn the_one_where_an_empty_store_lists_nothing() {
        let (app, _state, _store) = test_app();
        let (status, body) = call(&app, Method::GET, "/api/v1/companies", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"], json!([]));
        assert_eq!(body["message"], "Companies fetched successfully");
    }

    #[tokio::test]
    async fn the_one_where_reads_fail_loudly() {
        let (app, _state, store) = test_app();
        store.set_reachable(false);
        let (status, body) = call(&app, Method::GET, "/api/v1/companies", None).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(
            body["message"]
                .as_str()
                .unwrap_or_default()
                .starts_with("Failed to fetch companies: failed to fetch companies")
        );
    }
}
