//! Token-economy endpoints: balance snapshot and purchases.

use std::sync::Arc;

use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use serde_json::json;

use crate::billing::purchase;
use crate::error::Result;
use crate::middleware::{RequirePrincipal, RequireUser};
use crate::sessions::Principal;
use crate::tokens::{next_reset_at, resolver};

use super::{ok, AppState};

pub async fn token_status(
    State(state): State<Arc<AppState>>,
    RequirePrincipal(principal): RequirePrincipal,
) -> Result<impl IntoResponse> {
    let resolved = resolver::effective_plan(state.db.pool(), &state.ledger, &principal).await?;
    let account = state
        .ledger
        .get_or_create(&principal.user_ref(), resolved.plan)
        .await?;

    Ok(ok(json!({
        "plan": resolved.plan,
        "plan_source": resolved.source,
        "daily_available": account.daily_available,
        "purchased_available": account.purchased_available,
        "daily_limit": account.daily_limit,
        "consumed_today": account.consumed_today,
        "reset_at": next_reset_at(chrono::Utc::now()),
    })))
}

#[derive(Debug, Deserialize)]
pub struct PurchaseRequest {
    pub token_amount: i64,
    pub payment_method_id: String,
}

pub async fn purchase_tokens(
    State(state): State<Arc<AppState>>,
    RequireUser(user_id): RequireUser,
    Json(body): Json<PurchaseRequest>,
) -> Result<impl IntoResponse> {
    let principal = Principal::User(user_id);
    let resolved = resolver::effective_plan(state.db.pool(), &state.ledger, &principal).await?;

    let result = purchase::purchase_tokens(
        state.db.pool(),
        &state.ledger,
        &state.payments,
        user_id,
        resolved.plan,
        body.token_amount,
        &body.payment_method_id,
    )
    .await?;

    Ok(ok(result))
}
