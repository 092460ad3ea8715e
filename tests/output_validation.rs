//! Output Validation Tests
//!
//! This module validates the HTTP surface and the JSON envelopes it emits.
//! It ensures:
//! - `POST /generate-sql` answers with `{sql, columns, rows}` on success
//! - `POST /api/chat-with-data` behaves the same way
//! - Client faults are 400 and server faults are 500
//! - Error bodies use the error envelope, with `reason` only for rejections
//! - `GET /health` and the analytics endpoints keep their field names
//!
//! The router is driven in-process with `tower::ServiceExt::oneshot`.
//! Uses `insta` inline snapshots to detect unintended output changes.

#![cfg(feature = "sqlite")]

mod common;

use std::sync::Arc;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use pretty_assertions::assert_eq;
use serde_json::{json, Value};
use tower::ServiceExt;

use common::{pipeline, ScriptedChat, TestDb};
use insight::output::{ErrorEnvelope, ErrorInfo, Metadata, SuccessEnvelope};
use insight::server::router;

// ============================================================================
// Test Helpers
// ============================================================================

fn app(db: &TestDb, reply: Option<&str>) -> Router {
    let chat = reply.map(ScriptedChat::replying);
    router(Arc::new(pipeline(db, chat.as_ref())))
}

async fn send(app: Router, request: Request<Body>) -> (StatusCode, String) {
    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, String::from_utf8(bytes.to_vec()).unwrap())
}

async fn post_question(app: Router, body: &str) -> (StatusCode, String) {
    post_to(app, "/generate-sql", body).await
}

async fn post_to(app: Router, uri: &str, body: &str) -> (StatusCode, String) {
    let request = Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();
    send(app, request).await
}

async fn get(app: Router, uri: &str) -> (StatusCode, Value) {
    let request = Request::builder().uri(uri).body(Body::empty()).unwrap();
    let (status, body) = send(app, request).await;
    (status, serde_json::from_str(&body).unwrap())
}

fn parse(body: &str) -> Value {
    serde_json::from_str(body).expect("response body should be JSON")
}

// ============================================================================
// POST /generate-sql
// ============================================================================

#[tokio::test]
async fn test_generate_sql_success() {
    let db = TestDb::seeded();
    let app = app(&db, Some("SELECT name, category FROM vendors WHERE id = 'v1'"));

    let (status, body) = post_question(app, r#"{"query": "Who is vendor v1?"}"#).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        parse(&body),
        json!({
            "sql": "SELECT name, category FROM vendors WHERE id = 'v1'",
            "columns": ["name", "category"],
            "rows": [["Acme Supplies", "Office"]],
        })
    );
}

#[tokio::test]
async fn test_generate_sql_rejected() {
    let db = TestDb::seeded();
    let app = app(&db, Some("DELETE FROM vendors"));

    let (status, body) = post_question(app, r#"{"query": "Clean up vendors"}"#).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    insta::assert_snapshot!(body, @r#"{"ok":false,"engine":"sqlite","command":"generate-sql","error":{"code":"REJECTED_UNSAFE_QUERY","message":"Generated query was rejected: statement is not a SELECT. Only single read-only SELECT statements are allowed.","reason":"NOT_A_SELECT"}}"#);
    assert_eq!(db.query_count("SELECT COUNT(*) FROM vendors"), 3);
}

#[tokio::test]
async fn test_generate_sql_rejected_keyword_reason() {
    let db = TestDb::seeded();
    let app = app(&db, Some("SELECT * INTO backup FROM vendors"));

    let (status, body) = post_question(app, r#"{"query": "Back up vendors"}"#).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    let body = parse(&body);
    assert_eq!(body["error"]["reason"], "DANGEROUS_KEYWORD");
    assert_eq!(body["error"]["code"], "REJECTED_UNSAFE_QUERY");
}

#[tokio::test]
async fn test_generate_sql_execution_error() {
    let db = TestDb::seeded();
    let app = app(&db, Some("SELECT * FROM invoices"));

    let (status, body) = post_question(app, r#"{"query": "Show invoices"}"#).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    let body = parse(&body);
    assert_eq!(body["ok"], false);
    assert_eq!(body["error"]["code"], "EXECUTION_ERROR");
    assert!(body["error"]["message"].as_str().unwrap().contains("no such table"));
    assert!(body["error"].get("reason").is_none());
}

#[tokio::test]
async fn test_generate_sql_empty_query() {
    let db = TestDb::seeded();
    let app = app(&db, Some("SELECT 1"));

    let (status, body) = post_question(app, r#"{"query": "   "}"#).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    insta::assert_snapshot!(body, @r#"{"ok":false,"engine":"sqlite","command":"generate-sql","error":{"code":"INVALID_INPUT","message":"Invalid input: Query is required"}}"#);
}

#[tokio::test]
async fn test_generate_sql_malformed_body() {
    let db = TestDb::seeded();

    for body in [r#"{"query": "#, r#"{"question": "How many?"}"#, r#"{"query": 42}"#] {
        let (status, response) = post_question(app(&db, Some("SELECT 1")), body).await;

        assert_eq!(status, StatusCode::BAD_REQUEST, "{body}");
        assert_eq!(parse(&response)["error"]["code"], "INVALID_INPUT", "{body}");
    }
}

#[tokio::test]
async fn test_generate_sql_unconfigured_is_server_error() {
    let db = TestDb::seeded();
    let app = app(&db, None);

    let (status, body) = post_question(app, r#"{"query": "How many vendors?"}"#).await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    let body = parse(&body);
    assert_eq!(body["error"]["code"], "CONFIGURATION_ERROR");
    assert!(body["error"]["message"].as_str().unwrap().contains("GROQ_API_KEY"));
}

#[tokio::test]
async fn test_chat_with_data_answers_like_generate_sql() {
    let db = TestDb::seeded();
    let app = app(&db, Some("SELECT COUNT(*) AS vendor_count FROM vendors"));

    let (status, body) =
        post_to(app, "/api/chat-with-data", r#"{"query": "How many vendors?"}"#).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        parse(&body),
        json!({
            "sql": "SELECT COUNT(*) AS vendor_count FROM vendors",
            "columns": ["vendor_count"],
            "rows": [["3"]],
        })
    );
}

#[tokio::test]
async fn test_chat_with_data_requires_query() {
    let db = TestDb::seeded();

    for body in [r#"{}"#, r#"{"query": ""}"#] {
        let (status, response) =
            post_to(app(&db, Some("SELECT 1")), "/api/chat-with-data", body).await;

        assert_eq!(status, StatusCode::BAD_REQUEST, "{body}");
        assert_eq!(parse(&response)["error"]["code"], "INVALID_INPUT", "{body}");
    }
}

#[tokio::test]
async fn test_cors_is_permissive() {
    let db = TestDb::seeded();
    let request = Request::builder()
        .uri("/health")
        .header(header::ORIGIN, "http://localhost:5173")
        .body(Body::empty())
        .unwrap();

    let response = app(&db, None).oneshot(request).await.unwrap();

    assert_eq!(
        response.headers().get(header::ACCESS_CONTROL_ALLOW_ORIGIN).unwrap(),
        "*"
    );
}

// ============================================================================
// GET /health
// ============================================================================

#[tokio::test]
async fn test_health_body() {
    let db = TestDb::seeded();
    let request = Request::builder().uri("/health").body(Body::empty()).unwrap();

    let (status, body) = send(app(&db, Some("SELECT 1")), request).await;

    assert_eq!(status, StatusCode::OK);
    insta::assert_snapshot!(body, @r#"{"status":"healthy","generationConfigured":true,"databaseConnected":true}"#);
}

// ============================================================================
// Analytics
// ============================================================================

#[tokio::test]
async fn test_analytics_metrics() {
    let db = TestDb::seeded();

    let (status, body) = get(app(&db, None), "/api/analytics/metrics").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body,
        json!({
            "totalRevenue": "$12,345.67",
            "activeVendors": "3",
            "totalOrders": "2",
            "growthRate": "8.1%",
        })
    );
}

#[tokio::test]
async fn test_analytics_top_vendors() {
    let db = TestDb::seeded();

    let (status, body) = get(app(&db, None), "/api/analytics/top-vendors").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body,
        json!([
            {"vendor": "Globex", "spend": 11111.17},
            {"vendor": "Acme Supplies", "spend": 1234.5},
        ])
    );
}

#[tokio::test]
async fn test_analytics_revenue_trend() {
    let db = TestDb::seeded();

    let (status, body) = get(app(&db, None), "/api/analytics/revenue-trend").await;

    assert_eq!(status, StatusCode::OK);
    let points = body.as_array().unwrap();
    assert_eq!(points.len(), 3);
    assert_eq!(points[0]["revenue"], 11111.17);
    assert_eq!(points[2]["revenue"], 1000.0);
    assert!(points.iter().all(|p| p["month"].as_str().unwrap().len() == 3));
}

#[tokio::test]
async fn test_analytics_database_error() {
    let db = TestDb::with_sql("CREATE TABLE unrelated (id INTEGER);");

    let (status, body) = get(app(&db, None), "/api/analytics/top-vendors").await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["command"], "analytics-top-vendors");
    assert_eq!(body["error"]["code"], "EXECUTION_ERROR");
}

// ============================================================================
// CLI envelopes
// ============================================================================

#[test]
fn test_success_envelope_snapshot() {
    let envelope = SuccessEnvelope::new(
        "sqlite",
        "validate",
        json!({"safe": true}),
        Metadata::new(0),
    );

    let json = serde_json::to_string(&envelope).unwrap();
    insta::assert_snapshot!(json, @r#"{"ok":true,"engine":"sqlite","command":"validate","data":{"safe":true},"meta":{"execution_ms":0}}"#);
}

#[test]
fn test_error_envelope_snapshot() {
    let envelope = ErrorEnvelope::new(
        "postgres",
        "ask",
        ErrorInfo::new("EXECUTION_ERROR", "SQL execution error: relation \"x\" does not exist"),
    );

    let json = serde_json::to_string(&envelope).unwrap();
    insta::assert_snapshot!(json, @r#"{"ok":false,"engine":"postgres","command":"ask","error":{"code":"EXECUTION_ERROR","message":"SQL execution error: relation \"x\" does not exist"}}"#);
}
