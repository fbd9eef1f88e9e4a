//! Remaining surface: health, catalog, feedback, and auth edges.

mod common;

use axum::http::StatusCode;
use serde_json::json;

use common::{data, error_code, send, signed_in_user, spawn_app, RequestSpec};

#[tokio::test]
async fn test_health_reports_version() {
    let app = spawn_app().await;
    let (status, body) = send(&app, RequestSpec::get("/health")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert!(body["version"].is_string());
}

#[tokio::test]
async fn test_protected_routes_require_bearer() {
    let app = spawn_app().await;
    for path in [
        "/study-guides",
        "/token-status",
        "/topics-recommended",
        "/topics-categories",
        "/daily-verse",
    ] {
        let (status, body) = send(&app, RequestSpec::get(path)).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED, "{path}");
        assert_eq!(error_code(&body), "Unauthorized", "{path}");
    }
}

#[tokio::test]
async fn test_topics_filtering() {
    let app = spawn_app().await;
    let (_id, token) = signed_in_user(&app).await;

    let (status, body) = send(
        &app,
        RequestSpec::get("/topics-recommended").with_bearer(&token),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let all_total = data(&body)["total_count"].as_i64().unwrap();
    assert!(all_total >= 8);

    let (_, body) = send(
        &app,
        RequestSpec::get("/topics-recommended?category=faith").with_bearer(&token),
    )
    .await;
    let faith_topics = data(&body)["topics"].as_array().unwrap();
    assert!(!faith_topics.is_empty());
    assert!(faith_topics.iter().all(|t| t["category"] == "faith"));

    let (_, body) = send(
        &app,
        RequestSpec::get("/topics-recommended?categories=faith,inner-life").with_bearer(&token),
    )
    .await;
    assert!(data(&body)["total_count"].as_i64().unwrap() > faith_topics.len() as i64);

    // category and categories are mutually exclusive
    let (status, body) = send(
        &app,
        RequestSpec::get("/topics-recommended?category=faith&categories=faith").with_bearer(&token),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(error_code(&body), "ValidationError");

    // limit cap
    let (status, _) = send(
        &app,
        RequestSpec::get("/topics-recommended?limit=101").with_bearer(&token),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (_, body) = send(
        &app,
        RequestSpec::get("/topics-categories").with_bearer(&token),
    )
    .await;
    assert!(data(&body)["categories"]
        .as_array()
        .unwrap()
        .contains(&json!("faith")));
}

#[tokio::test]
async fn test_daily_verse_today_backfills_via_mock() {
    let app = spawn_app().await;
    let (_id, token) = signed_in_user(&app).await;

    let (status, body) = send(&app, RequestSpec::get("/daily-verse").with_bearer(&token)).await;
    assert_eq!(status, StatusCode::OK);
    let verse = data(&body);
    assert!(verse["reference"].is_string());
    assert!(verse["translations"]["en"].is_string());

    // A past date with no row is NotFound, and an invalid date is 400
    let (status, _) = send(
        &app,
        RequestSpec::get("/daily-verse?date=2020-01-01").with_bearer(&token),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, _) = send(
        &app,
        RequestSpec::get("/daily-verse?date=yesterday").with_bearer(&token),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_feedback_accepts_anonymous_submissions() {
    let app = spawn_app().await;

    let (status, body) = send(
        &app,
        RequestSpec::post(
            "/feedback",
            json!({ "was_helpful": true, "message": "Very encouraging", "category": "content" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert!(data(&body)["feedback_id"].is_string());

    let (status, body) = send(
        &app,
        RequestSpec::post("/feedback", json!({ "was_helpful": false, "sentiment": 5.0 })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(error_code(&body), "ValidationError");
}

#[tokio::test]
async fn test_oauth_callback_edges() {
    let app = spawn_app().await;

    // Provider-reported error surfaces as 401
    let (status, body) = send(
        &app,
        RequestSpec::post(
            "/auth-callback",
            json!({ "error": "access_denied", "error_description": "user cancelled" }),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(error_code(&body), "Unauthorized");

    // Missing code is a validation error
    let (status, _) = send(&app, RequestSpec::post("/auth-callback", json!({}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    // Signing in twice with the same email lands on the same user
    let code = json!({ "code": "mock:berean@example.com" });
    let (_, first) = send(&app, RequestSpec::post("/auth-callback", code.clone())).await;
    let (_, second) = send(&app, RequestSpec::post("/auth-callback", code)).await;
    assert_eq!(data(&first)["user_id"], data(&second)["user_id"]);
}

#[tokio::test]
async fn test_token_status_snapshot() {
    let app = spawn_app().await;
    let (_id, token) = signed_in_user(&app).await;

    let (status, body) = send(&app, RequestSpec::get("/token-status").with_bearer(&token)).await;
    assert_eq!(status, StatusCode::OK);
    let snapshot = data(&body);
    assert_eq!(snapshot["plan"], "free");
    assert_eq!(snapshot["plan_source"], "default");
    assert_eq!(snapshot["daily_available"], 8);
    assert_eq!(snapshot["daily_limit"], 8);
    assert_eq!(snapshot["consumed_today"], 0);
    assert!(snapshot["reset_at"].is_string());
}
