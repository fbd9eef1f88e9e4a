//! Payment-gateway webhook endpoint.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::response::IntoResponse;

use crate::billing::webhook::{self, GatewayWebhook, SIGNATURE_HEADER};
use crate::error::{Error, Result};

use super::{ok, AppState};

pub async fn payments(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<impl IntoResponse> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| Error::Unauthorized("missing webhook signature".into()))?;

    webhook::verify_signature(&state.config.payments_webhook_secret, &body, signature)?;

    let event: GatewayWebhook = serde_json::from_slice(&body)
        .map_err(|e| Error::Validation(format!("malformed webhook body: {e}")))?;

    let outcome = webhook::process_event(
        state.db.pool(),
        &state.ledger,
        &state.webhook_locks,
        &event,
    )
    .await?;

    Ok(ok(outcome))
}
