//! Token purchases
//!
//! Tokens sell at 10 per unit of currency; prices are computed in integer
//! minor units, rounded up. The gateway charge happens before the ledger
//! credit, and the purchase record keeps the audit trail.

use chrono::Utc;
use serde::Deserialize;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::tokens::{Account, Plan, TokenLedger, MAX_PURCHASE_AMOUNT};

/// Tokens granted per unit of currency.
pub const TOKENS_PER_CURRENCY_UNIT: i64 = 10;
/// Minor units (paise) per unit of currency.
pub const MINOR_UNITS_PER_CURRENCY_UNIT: i64 = 100;

/// Price of a token purchase in minor units, rounded up.
pub fn price_minor_units(token_amount: i64) -> i64 {
    let numerator = token_amount * MINOR_UNITS_PER_CURRENCY_UNIT;
    let d = numerator / TOKENS_PER_CURRENCY_UNIT;
    let r = numerator % TOKENS_PER_CURRENCY_UNIT;
    if (r > 0 && TOKENS_PER_CURRENCY_UNIT > 0) || (r < 0 && TOKENS_PER_CURRENCY_UNIT < 0) {
        d + 1
    } else {
        d
    }
}

/// Thin client for the external payment gateway. Without a configured
/// gateway URL it runs in mock mode for local development.
#[derive(Clone)]
pub struct PaymentClient {
    http: reqwest::Client,
    gateway_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChargeResponse {
    charge_id: String,
}

impl PaymentClient {
    pub fn new(gateway_url: Option<String>) -> Self {
        Self {
            http: reqwest::Client::builder()
                .timeout(std::time::Duration::from_secs(15))
                .build()
                .expect("reqwest client"),
            gateway_url,
        }
    }

    /// Charge the given payment method. Declines surface as `PaymentFailed`.
    pub async fn charge(
        &self,
        user_id: Uuid,
        amount_minor: i64,
        payment_method_id: &str,
    ) -> Result<String> {
        let Some(base_url) = &self.gateway_url else {
            // Mock mode: approve everything except an explicit decline marker
            if payment_method_id.contains("declined") {
                return Err(Error::PaymentFailed("card declined".into()));
            }
            return Ok(format!("mock_charge_{}", Uuid::new_v4().simple()));
        };

        let response = self
            .http
            .post(format!("{base_url}/v1/charges"))
            .json(&serde_json::json!({
                "amount": amount_minor,
                "currency": "INR",
                "payment_method_id": payment_method_id,
                "reference": user_id.to_string(),
            }))
            .send()
            .await
            .map_err(|e| Error::PaymentFailed(format!("gateway unreachable: {e}")))?;

        if response.status() == reqwest::StatusCode::PAYMENT_REQUIRED
            || response.status() == reqwest::StatusCode::UNPROCESSABLE_ENTITY
        {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::PaymentFailed(format!("charge declined: {body}")));
        }
        if !response.status().is_success() {
            let status = response.status();
            return Err(Error::PaymentFailed(format!("gateway error ({status})")));
        }

        let charge: ChargeResponse = response
            .json()
            .await
            .map_err(|e| Error::PaymentFailed(format!("bad gateway response: {e}")))?;
        Ok(charge.charge_id)
    }
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct PurchaseResult {
    pub token_amount: i64,
    pub price_minor: i64,
    pub purchased_available: i64,
    pub daily_available: i64,
}

/// Charge, record, and credit a token purchase.
pub async fn purchase_tokens(
    pool: &SqlitePool,
    ledger: &TokenLedger,
    payments: &PaymentClient,
    user_id: Uuid,
    plan: Plan,
    token_amount: i64,
    payment_method_id: &str,
) -> Result<PurchaseResult> {
    if token_amount <= 0 || token_amount > MAX_PURCHASE_AMOUNT {
        return Err(Error::Validation(format!(
            "token_amount must be between 1 and {MAX_PURCHASE_AMOUNT}"
        )));
    }

    let price_minor = price_minor_units(token_amount);
    let charge_id = payments
        .charge(user_id, price_minor, payment_method_id)
        .await?;

    sqlx::query(
        r#"
        INSERT INTO token_purchases (id, user_id, token_amount, price_minor, payment_method_id, created_at)
        VALUES ($1, $2, $3, $4, $5, $6)
        "#,
    )
    .bind(Uuid::new_v4().to_string())
    .bind(user_id.to_string())
    .bind(token_amount)
    .bind(price_minor)
    .bind(payment_method_id)
    .bind(Utc::now())
    .execute(pool)
    .await?;

    let account: Account = ledger
        .add_purchased(&user_id.to_string(), plan, token_amount)
        .await?;

    tracing::info!(
        user_id = %user_id,
        token_amount,
        price_minor,
        charge_id,
        "tokens purchased"
    );

    Ok(PurchaseResult {
        token_amount,
        price_minor,
        purchased_available: account.purchased_available,
        daily_available: account.daily_available,
    })
}
