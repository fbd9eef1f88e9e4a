//! Webhook reconciliation through the HTTP surface: signatures, plan
//! upgrades reflected in metering, and replay idempotence.

mod common;

use axum::http::StatusCode;
use serde_json::json;

use common::{data, error_code, send, signed_in_user, spawn_app, RequestSpec};
use selah::billing::webhook::{sign, SIGNATURE_HEADER};
use selah::tokens::Plan;

async fn post_webhook(
    app: &common::TestApp,
    body: &serde_json::Value,
    secret: &str,
) -> (StatusCode, serde_json::Value) {
    let raw = serde_json::to_vec(body).unwrap();
    let signature = sign(secret, &raw);
    send(
        app,
        RequestSpec::post("/webhooks/payments", body.clone())
            .with_header(SIGNATURE_HEADER, signature),
    )
    .await
}

fn event(event: &str, external_ref: &str, user_id: uuid::Uuid, plan: &str) -> serde_json::Value {
    json!({
        "event": event,
        "data": {
            "subscription_id": external_ref,
            "user_id": user_id,
            "plan": plan,
        }
    })
}

#[tokio::test]
async fn test_subscription_upgrade_reflects_immediately() {
    let app = spawn_app().await;
    let secret = app.state.config.payments_webhook_secret.clone();
    let (user_id, token) = signed_in_user(&app).await;
    app.state
        .ledger
        .get_or_create(&user_id.to_string(), Plan::Standard)
        .await
        .unwrap();

    // Starting point: Standard with limit 20
    let (_, body) = send(&app, RequestSpec::get("/token-status").with_bearer(&token)).await;
    assert_eq!(data(&body)["plan"], "standard");
    assert_eq!(data(&body)["daily_limit"], 20);

    for name in ["subscription.created", "subscription.activated"] {
        let (status, _) = post_webhook(&app, &event(name, "sub_up", user_id, "plus"), &secret).await;
        assert_eq!(status, StatusCode::OK, "{name}");
    }

    // The very next status read shows the new plan and refilled balance
    let (_, body) = send(&app, RequestSpec::get("/token-status").with_bearer(&token)).await;
    assert_eq!(data(&body)["plan"], "plus");
    assert_eq!(data(&body)["plan_source"], "subscription");
    assert_eq!(data(&body)["daily_limit"], 50);
    assert_eq!(data(&body)["daily_available"], 50);

    // And a Hindi generation (cost 20) fits the new allocation
    let (status, body) = send(
        &app,
        RequestSpec::post(
            "/study-generate",
            json!({ "input_type": "scripture", "input_value": "Romans 8:28", "language": "hi" }),
        )
        .with_bearer(&token),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(data(&body)["tokens"]["consumed"], 20);
    assert_eq!(data(&body)["tokens"]["remaining_daily"], 30);
}

#[tokio::test]
async fn test_bad_signature_is_rejected() {
    let app = spawn_app().await;
    let (user_id, _) = signed_in_user(&app).await;
    let body = event("subscription.created", "sub_sig", user_id, "plus");

    // Wrong secret
    let (status, response) = post_webhook(&app, &body, "wrong-secret").await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(error_code(&response), "Unauthorized");

    // Missing header entirely
    let (status, response) = send(&app, RequestSpec::post("/webhooks/payments", body)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(error_code(&response), "Unauthorized");

    // Nothing was created
    let subs: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM subscriptions")
        .fetch_one(app.state.db.pool())
        .await
        .unwrap();
    assert_eq!(subs, 0);
}

#[tokio::test]
async fn test_replayed_event_changes_nothing() {
    let app = spawn_app().await;
    let secret = app.state.config.payments_webhook_secret.clone();
    let (user_id, token) = signed_in_user(&app).await;

    let activated = event("subscription.activated", "sub_replay", user_id, "plus");
    post_webhook(&app, &event("subscription.created", "sub_replay", user_id, "plus"), &secret).await;
    post_webhook(&app, &activated, &secret).await;

    // Spend some of the refilled balance so a spurious re-sync would show
    app.state
        .ledger
        .consume(&user_id.to_string(), Plan::Plus, 15)
        .await
        .unwrap();
    let (_, before) = send(&app, RequestSpec::get("/token-status").with_bearer(&token)).await;

    let (status, body) = post_webhook(&app, &activated, &secret).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(data(&body)["changed"], false);

    let (_, after) = send(&app, RequestSpec::get("/token-status").with_bearer(&token)).await;
    assert_eq!(data(&before)["daily_available"], data(&after)["daily_available"]);
    assert_eq!(data(&before)["consumed_today"], data(&after)["consumed_today"]);
    assert_eq!(data(&after)["daily_available"], 35);
}

#[tokio::test]
async fn test_invalid_transition_is_rejected() {
    let app = spawn_app().await;
    let secret = app.state.config.payments_webhook_secret.clone();
    let (user_id, _) = signed_in_user(&app).await;

    let (status, body) = post_webhook(
        &app,
        &event("subscription.expired", "sub_fresh", user_id, "plus"),
        &secret,
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(error_code(&body), "ValidationError");
}

#[tokio::test]
async fn test_cancellation_falls_back_to_free() {
    let app = spawn_app().await;
    let secret = app.state.config.payments_webhook_secret.clone();
    let (user_id, token) = signed_in_user(&app).await;

    for name in ["subscription.created", "subscription.activated"] {
        post_webhook(&app, &event(name, "sub_cx", user_id, "premium"), &secret).await;
    }
    let (_, body) = send(&app, RequestSpec::get("/token-status").with_bearer(&token)).await;
    assert_eq!(data(&body)["plan"], "premium");

    post_webhook(&app, &event("subscription.cancelled", "sub_cx", user_id, "premium"), &secret)
        .await;
    let (_, body) = send(&app, RequestSpec::get("/token-status").with_bearer(&token)).await;
    assert_eq!(data(&body)["plan"], "free");
    assert_eq!(data(&body)["daily_limit"], 8);
}
