//! Payment-gateway webhook reconciliation
//!
//! Verifies the HMAC signature over the raw body, maps the gateway event to
//! an internal lifecycle event, applies the state machine serialized per
//! external ref, and synchronizes the resulting plan into the token ledger
//! so metering reflects the change immediately. Every verified delivery is
//! recorded in the append-only audit log.

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;
use sqlx::SqlitePool;
use uuid::Uuid;

use super::{transition, SubEvent, SubStatus};
use crate::error::{Error, Result};
use crate::guides::locks::KeyedLocks;
use crate::tokens::{Plan, TokenLedger};

type HmacSha256 = Hmac<Sha256>;

/// Header carrying `HMAC-SHA256(secret, raw_body)` in hex.
pub const SIGNATURE_HEADER: &str = "x-webhook-signature";

/// Verify the gateway signature over the raw request body.
pub fn verify_signature(secret: &str, raw_body: &[u8], signature_hex: &str) -> Result<()> {
    let signature = hex::decode(signature_hex.trim())
        .map_err(|_| Error::Unauthorized("malformed webhook signature".into()))?;

    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|_| Error::Configuration("invalid webhook secret".into()))?;
    mac.update(raw_body);
    mac.verify_slice(&signature)
        .map_err(|_| Error::Unauthorized("webhook signature mismatch".into()))
}

/// Sign a body the way the gateway does. Used by tests and local tooling.
pub fn sign(secret: &str, raw_body: &[u8]) -> String {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).expect("hmac accepts any key size");
    mac.update(raw_body);
    hex::encode(mac.finalize().into_bytes())
}

/// Gateway webhook envelope.
#[derive(Debug, Deserialize)]
pub struct GatewayWebhook {
    pub event: String,
    pub data: GatewaySubscription,
}

#[derive(Debug, Deserialize)]
pub struct GatewaySubscription {
    pub subscription_id: String,
    pub user_id: Uuid,
    pub plan: String,
    #[serde(default)]
    pub current_period_end: Option<DateTime<Utc>>,
}

/// What the reconciler did with a delivery.
#[derive(Debug, Clone, serde::Serialize)]
pub struct WebhookOutcome {
    pub external_ref: String,
    pub status: SubStatus,
    pub plan: Plan,
    pub changed: bool,
}

#[derive(sqlx::FromRow)]
struct SubRow {
    id: String,
    user_id: String,
    plan: String,
    status: String,
    current_period_end: Option<DateTime<Utc>>,
}

/// Process one verified-and-parsed webhook delivery.
///
/// Transitions are idempotent: replaying a delivery finds nothing to change
/// and leaves both the subscription and the ledger untouched.
pub async fn process_event(
    pool: &SqlitePool,
    ledger: &TokenLedger,
    locks: &KeyedLocks,
    webhook: &GatewayWebhook,
) -> Result<WebhookOutcome> {
    let event = SubEvent::from_code(&webhook.event)?;
    let plan = Plan::from_str(&webhook.plan_code())?;
    let external_ref = webhook.data.subscription_id.clone();
    let user_id = webhook.data.user_id;

    // Serialize per subscription; gateways retry aggressively
    let _guard = locks.acquire(&external_ref).await;

    let mut tx = pool.begin().await?;

    let existing = sqlx::query_as::<_, SubRow>(
        r#"
        SELECT id, user_id, plan, status, current_period_end
        FROM subscriptions WHERE external_ref = $1
        "#,
    )
    .bind(&external_ref)
    .fetch_optional(&mut *tx)
    .await?;

    let current_status = existing
        .as_ref()
        .map(|row| SubStatus::from_str(&row.status))
        .transpose()?;

    let next = match transition(current_status, event) {
        Ok(next) => next,
        Err(e) => {
            drop(tx);
            record_audit(pool, &external_ref, &webhook.event, "rejected").await?;
            return Err(e);
        }
    };

    let now = Utc::now();
    let (status, changed) = match (existing, next) {
        // Accepted no-op: terminal replay or late `created`
        (Some(row), None) => (SubStatus::from_str(&row.status)?, false),
        (None, None) => {
            // transition() only returns None for existing rows
            return Err(Error::Internal("no-op transition without a subscription".into()));
        }
        (None, Some(status)) => {
            sqlx::query(
                r#"
                INSERT INTO subscriptions
                    (id, user_id, external_ref, plan, status, current_period_end, created_at, updated_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $7)
                "#,
            )
            .bind(Uuid::new_v4().to_string())
            .bind(user_id.to_string())
            .bind(&external_ref)
            .bind(plan.as_str())
            .bind(status.as_str())
            .bind(webhook.data.current_period_end)
            .bind(now)
            .execute(&mut *tx)
            .await?;
            (status, true)
        }
        (Some(row), Some(status)) => {
            let old_status = SubStatus::from_str(&row.status)?;
            let old_plan = Plan::from_str(&row.plan)?;
            let changed = old_status != status
                || old_plan != plan
                || row.current_period_end != webhook.data.current_period_end;

            if changed {
                if status.grants_plan() {
                    // Invariant: at most one active-or-winding-down
                    // subscription per user
                    sqlx::query(
                        r#"
                        UPDATE subscriptions SET status = 'cancelled', updated_at = $1
                        WHERE user_id = $2 AND external_ref != $3
                          AND status IN ('active', 'pending_cancellation')
                        "#,
                    )
                    .bind(now)
                    .bind(row.user_id.clone())
                    .bind(&external_ref)
                    .execute(&mut *tx)
                    .await?;
                }

                sqlx::query(
                    r#"
                    UPDATE subscriptions
                    SET plan = $1, status = $2, current_period_end = $3, updated_at = $4
                    WHERE id = $5
                    "#,
                )
                .bind(plan.as_str())
                .bind(status.as_str())
                .bind(webhook.data.current_period_end)
                .bind(now)
                .bind(&row.id)
                .execute(&mut *tx)
                .await?;
            }
            (status, changed)
        }
    };

    tx.commit().await?;

    // Ledger sync outside the subscription transaction; sync_plan is itself
    // idempotent, so a crash between commit and sync heals on redelivery
    if changed {
        if status.grants_plan() {
            ledger.sync_plan(&user_id.to_string(), plan).await?;
        } else if status.is_terminal() {
            ledger.sync_plan(&user_id.to_string(), Plan::Free).await?;
        }
    }

    record_audit(
        pool,
        &external_ref,
        &webhook.event,
        if changed { "applied" } else { "no_op" },
    )
    .await?;

    tracing::info!(
        external_ref,
        event = %webhook.event,
        status = status.as_str(),
        changed,
        "webhook processed"
    );

    Ok(WebhookOutcome {
        external_ref,
        status,
        plan,
        changed,
    })
}

impl GatewayWebhook {
    fn plan_code(&self) -> String {
        self.data.plan.to_lowercase()
    }
}

async fn record_audit(
    pool: &SqlitePool,
    external_ref: &str,
    event: &str,
    outcome: &str,
) -> Result<()> {
    let payload = serde_json::json!({ "event": event, "external_ref": external_ref });
    sqlx::query(
        r#"
        INSERT INTO webhook_events (id, external_ref, event, payload, outcome, received_at)
        VALUES ($1, $2, $3, $4, $5, $6)
        "#,
    )
    .bind(Uuid::new_v4().to_string())
    .bind(external_ref)
    .bind(event)
    .bind(payload.to_string())
    .bind(outcome)
    .bind(Utc::now())
    .execute(pool)
    .await?;
    Ok(())
}
