//! End-to-end seed-scenario coverage for the ControlAPI, driving the axum
//! router in-process via `tower::ServiceExt::oneshot` against a
//! tempfile-backed SQLite store, the same way the engine crate's own
//! integration tests drive `JobEngine` directly one layer down.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use http_body_util::BodyExt;
use tower::ServiceExt;

use pageforge::config::AppConfig;
use pageforge::placeholder::{EchoNormalizer, PlaceholderExtractor};
use pageforge::state::AppState;

use pageforge_engine::JobEngine;
use pageforge_progress::ProgressChannel;
use pageforge_resilience::CircuitBreaker;
use pageforge_scheduler::Scheduler;
use pageforge_store::{CreditLedger, SqliteStore, Store};

async fn test_state() -> AppState {
    let sqlite = SqliteStore::open_in_memory().await.unwrap();
    let pool = sqlite.pool().clone();
    let store: Arc<dyn Store> = Arc::new(sqlite);

    let config = AppConfig {
        admin_token: Some("test-admin-token".to_string()),
        ..AppConfig::from_env()
    };

    let ledger = Arc::new(CreditLedger::new(pool, config.credit_overdraft_floor));
    let scheduler = Arc::new(Scheduler::spawn(config.scheduler_config()));
    let progress = Arc::new(ProgressChannel::new());
    let breaker = Arc::new(CircuitBreaker::new_default());

    let engine = JobEngine::new(
        store.clone(),
        ledger.clone(),
        scheduler,
        progress.clone(),
        Arc::new(PlaceholderExtractor),
        None,
        Arc::new(EchoNormalizer),
        breaker,
        config.engine_config(),
    );

    AppState { engine, store, ledger, progress, config: Arc::new(config) }
}

/// Hand-builds a `multipart/form-data` body with `file`, `settings`, and
/// `user_id` parts. No PDF-content fidelity is needed since extraction is a
/// placeholder; only the magic header and a valid JSON settings part matter.
fn multipart_body(boundary: &str, page_count: i64, model: &str, user_id: &str) -> Vec<u8> {
    let mut body = Vec::new();
    body.extend_from_slice(format!("--{boundary}\r\n").as_bytes());
    body.extend_from_slice(b"Content-Disposition: form-data; name=\"file\"; filename=\"doc.pdf\"\r\n");
    body.extend_from_slice(b"Content-Type: application/pdf\r\n\r\n");
    body.extend_from_slice(b"%PDF-1.4\nplaceholder pdf bytes\n");
    body.extend_from_slice(format!("\r\n--{boundary}\r\n").as_bytes());
    body.extend_from_slice(b"Content-Disposition: form-data; name=\"settings\"\r\n\r\n");
    body.extend_from_slice(format!(r#"{{"page_count":{page_count},"model":"{model}"}}"#).as_bytes());
    body.extend_from_slice(format!("\r\n--{boundary}\r\n").as_bytes());
    body.extend_from_slice(b"Content-Disposition: form-data; name=\"user_id\"\r\n\r\n");
    body.extend_from_slice(user_id.as_bytes());
    body.extend_from_slice(format!("\r\n--{boundary}--\r\n").as_bytes());
    body
}

fn confirm_request(page_count: i64, model: &str, user_id: &str) -> Request<Body> {
    let boundary = "pageforge-test-boundary";
    let body = multipart_body(boundary, page_count, model, user_id);
    Request::builder()
        .method("POST")
        .uri("/jobs")
        .header(header::CONTENT_TYPE, format!("multipart/form-data; boundary={boundary}"))
        .body(Body::from(body))
        .unwrap()
}

async fn json_body(response: axum::response::Response) -> serde_json::Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn estimate_matches_the_page_count_heuristic() {
    let state = test_state().await;
    let app = pageforge::api::router(state);

    let request = Request::builder()
        .method("POST")
        .uri("/estimate")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(r#"{"page_count":20,"model":"balanced"}"#))
        .unwrap();

    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    // 20 pages * TOKENS_PER_PAGE(500) = 10_000; ceil(10_000/1000 * rate(1.0) * safety(1.10)) = 11.
    assert_eq!(body["estimated_tokens"], 10_000);
    assert_eq!(body["estimated_credits"], 11);
    assert_eq!(body["pricing_rate"], 1.0);
}

#[tokio::test]
async fn estimate_rejects_non_positive_page_count() {
    let state = test_state().await;
    let app = pageforge::api::router(state);

    let request = Request::builder()
        .method("POST")
        .uri("/estimate")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(r#"{"page_count":0,"model":"balanced"}"#))
        .unwrap();

    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn confirm_creates_and_completes_a_single_chunk_job() {
    let state = test_state().await;
    let ledger = state.ledger.clone();
    let app = pageforge::api::router(state);

    let response = app.clone().oneshot(confirm_request(10, "balanced", "user-1")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    let job_id = body["job_id"].as_i64().unwrap();
    assert!(body["estimated_credits"].as_i64().unwrap() > 0);

    let request = Request::builder().method("GET").uri(format!("/jobs/{job_id}")).body(Body::empty()).unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let job = json_body(response).await;
    assert_eq!(job["status"], "completed");

    let month = chrono::Utc::now().format("%Y-%m").to_string();
    let balance = ledger.balance_for("user-1", &month).await.unwrap();
    assert!(balance < 10_000);
}

#[tokio::test]
async fn confirm_rejects_file_without_pdf_magic_header() {
    let state = test_state().await;
    let app = pageforge::api::router(state);

    let boundary = "pageforge-test-boundary";
    let mut body = Vec::new();
    body.extend_from_slice(format!("--{boundary}\r\n").as_bytes());
    body.extend_from_slice(b"Content-Disposition: form-data; name=\"file\"; filename=\"doc.pdf\"\r\n\r\n");
    body.extend_from_slice(b"not a pdf");
    body.extend_from_slice(format!("\r\n--{boundary}\r\n").as_bytes());
    body.extend_from_slice(b"Content-Disposition: form-data; name=\"settings\"\r\n\r\n");
    body.extend_from_slice(br#"{"page_count":5,"model":"balanced"}"#);
    body.extend_from_slice(format!("\r\n--{boundary}\r\n").as_bytes());
    body.extend_from_slice(b"Content-Disposition: form-data; name=\"user_id\"\r\n\r\nuser-1");
    body.extend_from_slice(format!("\r\n--{boundary}--\r\n").as_bytes());

    let request = Request::builder()
        .method("POST")
        .uri("/jobs")
        .header(header::CONTENT_TYPE, format!("multipart/form-data; boundary={boundary}"))
        .body(Body::from(body))
        .unwrap();

    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn confirm_fails_insufficient_credits_for_an_oversized_document() {
    let state = test_state().await;
    let app = pageforge::api::router(state);

    // Pushes the single-page reservation past the default 10,000-credit
    // monthly grant plus the -100 overdraft floor.
    let response = app.oneshot(confirm_request(2_000_000, "heavy", "user-2")).await.unwrap();
    assert_eq!(response.status(), StatusCode::PAYMENT_REQUIRED);
    let body = json_body(response).await;
    assert_eq!(body["error"]["code"], "INSUFFICIENT_CREDITS");
}

#[tokio::test]
async fn status_for_unknown_job_is_not_found() {
    let state = test_state().await;
    let app = pageforge::api::router(state);

    let request = Request::builder().method("GET").uri("/jobs/999999").body(Body::empty()).unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn cancelling_an_already_completed_job_is_rejected() {
    let state = test_state().await;
    let app = pageforge::api::router(state);

    let response = app.clone().oneshot(confirm_request(10, "balanced", "user-3")).await.unwrap();
    let body = json_body(response).await;
    let job_id = body["job_id"].as_i64().unwrap();

    let request = Request::builder().method("POST").uri(format!("/jobs/{job_id}/cancel")).body(Body::empty()).unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);
    let body = json_body(response).await;
    assert_eq!(body["error"]["code"], "ALREADY_TERMINAL");
}

#[tokio::test]
async fn force_finalize_requires_a_valid_admin_token() {
    let state = test_state().await;
    let app = pageforge::api::router(state);

    let response = app.clone().oneshot(confirm_request(10, "balanced", "user-4")).await.unwrap();
    let body = json_body(response).await;
    let job_id = body["job_id"].as_i64().unwrap();

    let no_token = Request::builder().method("POST").uri(format!("/admin/jobs/{job_id}/force-finalize")).body(Body::empty()).unwrap();
    let response = app.clone().oneshot(no_token).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let wrong_token = Request::builder()
        .method("POST")
        .uri(format!("/admin/jobs/{job_id}/force-finalize"))
        .header(header::AUTHORIZATION, "Bearer wrong-token")
        .body(Body::empty())
        .unwrap();
    let response = app.clone().oneshot(wrong_token).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let right_token = Request::builder()
        .method("POST")
        .uri(format!("/admin/jobs/{job_id}/force-finalize"))
        .header(header::AUTHORIZATION, "Bearer test-admin-token")
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(right_token).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}
