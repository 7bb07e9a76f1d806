//! Integration tests for tba-server API endpoints
//!
//! Each test runs the router against a fresh seeded database in a temp
//! directory.

use axum::{
    body::Body,
    http::{Request, StatusCode},
};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tba_common::cache::{CacheTier, DatabaseCache};
use tba_common::categories::seed_default_categories;
use tba_common::config::{RetryPolicy, UpdateMode, UpdaterConfig};
use tba_common::db::init_database;
use tba_common::AllocationService;
use tba_server::{build_router, AppState};
use tempfile::TempDir;
use tower::util::ServiceExt; // for `oneshot` method

struct TestApp {
    _dir: TempDir,
    service: Arc<AllocationService>,
}

impl TestApp {
    fn router(&self) -> axum::Router {
        build_router(AppState::new(Arc::clone(&self.service)))
    }
}

/// Test helper: seeded database with a service in the given update mode
async fn setup_app(mode: UpdateMode) -> TestApp {
    let dir = TempDir::new().unwrap();
    let pool = init_database(&dir.path().join("taxbudget.db")).await.unwrap();
    seed_default_categories(&pool).await.unwrap();

    let updater = UpdaterConfig {
        mode,
        queue_capacity: 16,
        workers: 1,
        retry: RetryPolicy {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(10),
        },
        rebuild_interval: None,
    };
    let cache = CacheTier::new(Arc::new(DatabaseCache::new(pool.clone())));
    let service = AllocationService::new(pool, cache, &updater, Duration::from_secs(300));

    TestApp {
        _dir: dir,
        service: Arc::new(service),
    }
}

fn test_request(method: &str, uri: &str) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

fn json_request(uri: &str, body: &Value, visitor: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json");
    if let Some(visitor) = visitor {
        builder = builder.header("x-visitor-id", visitor);
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

/// Test helper: Extract JSON body from response
async fn extract_json(body: Body) -> Value {
    let bytes = axum::body::to_bytes(body, usize::MAX)
        .await
        .expect("Should read body");
    serde_json::from_slice(&bytes).expect("Should parse JSON")
}

/// Submit a two-way split between the first two categories
async fn submit_split(app: &TestApp, first: f64, second: f64, visitor: Option<&str>) -> Value {
    let body = json!({
        "allocations": [
            { "category_id": 1, "percentage": first },
            { "category_id": 2, "percentage": second },
        ]
    });
    let response = app
        .router()
        .oneshot(json_request("/api/allocations", &body, visitor))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    extract_json(response.into_body()).await
}

// =============================================================================
// Health and build info
// =============================================================================

#[tokio::test]
async fn test_health_reports_update_mode() {
    let app = setup_app(UpdateMode::Synchronous).await;

    let response = app.router().oneshot(test_request("GET", "/health")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = extract_json(response.into_body()).await;
    assert_eq!(body["status"], "ok");
    assert_eq!(body["module"], "tba-server");
    assert_eq!(body["update_mode"], "synchronous");
    assert!(body["workers"].is_null());
}

#[tokio::test]
async fn test_health_includes_worker_counts_when_queued() {
    let app = setup_app(UpdateMode::Queued).await;

    let response = app.router().oneshot(test_request("GET", "/health")).await.unwrap();
    let body = extract_json(response.into_body()).await;
    assert_eq!(body["update_mode"], "queued");
    assert_eq!(body["workers"]["failed"], 0);

    app.service.shutdown().await;
}

#[tokio::test]
async fn test_buildinfo_endpoint() {
    let app = setup_app(UpdateMode::Synchronous).await;

    let response = app
        .router()
        .oneshot(test_request("GET", "/api/buildinfo"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = extract_json(response.into_body()).await;
    assert!(body["version"].is_string());
    assert!(body["git_hash"].is_string());
    assert!(body["build_timestamp"].is_string());
}

// =============================================================================
// Categories
// =============================================================================

#[tokio::test]
async fn test_categories_in_display_order() {
    let app = setup_app(UpdateMode::Synchronous).await;

    let response = app
        .router()
        .oneshot(test_request("GET", "/api/categories"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = extract_json(response.into_body()).await;
    let categories = body.as_array().unwrap();
    assert_eq!(categories.len(), 10);
    assert_eq!(categories[0]["name"], "Healthcare");
    assert_eq!(categories[9]["name"], "Other");
}

// =============================================================================
// Submissions
// =============================================================================

#[tokio::test]
async fn test_submit_and_fetch_submission() {
    let app = setup_app(UpdateMode::Synchronous).await;

    let created = submit_split(&app, 62.5, 37.5, None).await;
    let key = created["submission_key"].as_str().unwrap().to_string();

    let response = app
        .router()
        .oneshot(test_request("GET", &format!("/api/allocations/{}", key)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = extract_json(response.into_body()).await;
    assert_eq!(body["submission"]["submission_key"], key.as_str());
    let entries = body["entries"].as_array().unwrap();
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0]["category_name"], "Healthcare");
    assert_eq!(entries[0]["percentage"], 62.5);
}

#[tokio::test]
async fn test_percentages_accepted_as_text() {
    let app = setup_app(UpdateMode::Synchronous).await;
    let body = json!({
        "allocations": [
            { "category_id": 1, "percentage": "33.33" },
            { "category_id": 2, "percentage": "66.67" },
        ]
    });

    let response = app
        .router()
        .oneshot(json_request("/api/allocations", &body, None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
}

#[tokio::test]
async fn test_submission_not_totalling_100_rejected() {
    let app = setup_app(UpdateMode::Synchronous).await;

    for (first, second) in [(50.0, 49.99), (50.0, 50.01)] {
        let body = json!({
            "allocations": [
                { "category_id": 1, "percentage": first },
                { "category_id": 2, "percentage": second },
            ]
        });
        let response = app
            .router()
            .oneshot(json_request("/api/allocations", &body, None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let body = extract_json(response.into_body()).await;
        assert!(body["error"].is_string());
    }

    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM submissions")
        .fetch_one(app.service.pool())
        .await
        .unwrap();
    assert_eq!(count, 0);
}

#[tokio::test]
async fn test_malformed_body_rejected() {
    let app = setup_app(UpdateMode::Synchronous).await;

    let request = Request::builder()
        .method("POST")
        .uri("/api/allocations")
        .header("content-type", "application/json")
        .body(Body::from("{\"allocations\": ["))
        .unwrap();
    let response = app.router().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let body = extract_json(response.into_body()).await;
    assert!(body["error"].is_string());
}

#[tokio::test]
async fn test_unknown_category_rejected() {
    let app = setup_app(UpdateMode::Synchronous).await;
    let body = json!({
        "allocations": [{ "category_id": 999, "percentage": 100 }]
    });

    let response = app
        .router()
        .oneshot(json_request("/api/allocations", &body, None))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_get_submission_unknown_and_invalid_keys() {
    let app = setup_app(UpdateMode::Synchronous).await;

    let response = app
        .router()
        .oneshot(test_request(
            "GET",
            "/api/allocations/5f0c6a52-8d7e-4f8a-9c43-1b2d3e4f5a6b",
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = app
        .router()
        .oneshot(test_request("GET", "/api/allocations/not-a-key"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

// =============================================================================
// Aggregates
// =============================================================================

#[tokio::test]
async fn test_aggregates_average_submissions() {
    let app = setup_app(UpdateMode::Synchronous).await;
    submit_split(&app, 10.0, 90.0, None).await;
    submit_split(&app, 20.0, 80.0, None).await;
    submit_split(&app, 30.0, 70.0, None).await;

    let response = app
        .router()
        .oneshot(test_request("GET", "/api/aggregates"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = extract_json(response.into_body()).await;
    assert_eq!(body["total_submissions"], 3);
    let items = body["items"].as_array().unwrap();
    assert_eq!(items[0]["category_name"], "Healthcare");
    assert_eq!(items[0]["average"], 20.0);
    assert_eq!(items[1]["average"], 80.0);
    assert!(items[0]["color"].is_string());
}

#[tokio::test]
async fn test_aggregates_eventually_reflect_queued_updates() {
    let app = setup_app(UpdateMode::Queued).await;
    submit_split(&app, 25.0, 75.0, None).await;
    submit_split(&app, 75.0, 25.0, None).await;

    app.service.queue().unwrap().wait_idle().await;

    let response = app
        .router()
        .oneshot(test_request("GET", "/api/aggregates"))
        .await
        .unwrap();
    let body = extract_json(response.into_body()).await;
    assert_eq!(body["total_submissions"], 2);
    assert_eq!(body["items"][0]["average"], 50.0);

    app.service.shutdown().await;
}

// =============================================================================
// History
// =============================================================================

#[tokio::test]
async fn test_history_for_identified_visitor() {
    let app = setup_app(UpdateMode::Synchronous).await;
    submit_split(&app, 10.0, 90.0, Some("visitor-a")).await;
    submit_split(&app, 40.0, 60.0, Some("visitor-a")).await;
    submit_split(&app, 50.0, 50.0, Some("visitor-b")).await;

    let request = Request::builder()
        .method("GET")
        .uri("/api/history")
        .header("x-visitor-id", "visitor-a")
        .body(Body::empty())
        .unwrap();
    let response = app.router().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = extract_json(response.into_body()).await;
    let history = body.as_array().unwrap();
    assert_eq!(history.len(), 2);
    // Most recent first
    assert_eq!(history[0]["entries"][0]["percentage"], 40.0);
    assert_eq!(history[1]["entries"][0]["percentage"], 10.0);
}

#[tokio::test]
async fn test_history_empty_without_visitor_id() {
    let app = setup_app(UpdateMode::Synchronous).await;
    submit_split(&app, 10.0, 90.0, None).await;

    let response = app
        .router()
        .oneshot(test_request("GET", "/api/history"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = extract_json(response.into_body()).await;
    assert_eq!(body, json!([]));
}
