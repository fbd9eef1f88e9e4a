//! Session endpoints: anonymous session issuance, migration, and the OAuth
//! callback.

use std::sync::Arc;

use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use crate::auth::oauth;
use crate::error::{Error, Result};
use crate::middleware::RequireUser;
use crate::sessions;

use super::{ok, AppState};

#[derive(Debug, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum SessionRequest {
    CreateAnonymous {
        device_fingerprint: Option<String>,
    },
    MigrateToAuthenticated {
        anonymous_session_id: Uuid,
    },
}

pub async fn auth_session(
    State(state): State<Arc<AppState>>,
    user: Option<RequireUser>,
    Json(body): Json<SessionRequest>,
) -> Result<impl IntoResponse> {
    match body {
        SessionRequest::CreateAnonymous { device_fingerprint } => {
            let session =
                sessions::create(state.db.pool(), device_fingerprint.as_deref()).await?;
            let session_token = state.auth.issue_session_token(session.id)?;
            Ok(ok(json!({
                "session_id": session.id,
                "session_token": session_token,
                "expires_at": session.expires_at,
            })))
        }
        SessionRequest::MigrateToAuthenticated {
            anonymous_session_id,
        } => {
            let RequireUser(user_id) = user.ok_or_else(|| {
                Error::Unauthorized("migration requires a user bearer token".into())
            })?;
            let result =
                sessions::migrate_anonymous(state.db.pool(), anonymous_session_id, user_id)
                    .await?;
            Ok(ok(json!({
                "migrated_guides": result.migrated_guides,
                "already_migrated": result.already_migrated,
                "user_id": user_id,
            })))
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct CallbackRequest {
    pub code: Option<String>,
    #[allow(dead_code)]
    pub state: Option<String>,
    pub error: Option<String>,
    pub error_description: Option<String>,
}

pub async fn auth_callback(
    State(state): State<Arc<AppState>>,
    Json(body): Json<CallbackRequest>,
) -> Result<impl IntoResponse> {
    if let Some(error) = body.error {
        let description = body.error_description.unwrap_or_default();
        tracing::warn!(error, description, "oauth provider returned an error");
        return Err(Error::Unauthorized(format!(
            "sign-in failed: {error}"
        )));
    }

    let code = body
        .code
        .filter(|c| !c.trim().is_empty())
        .ok_or_else(|| Error::Validation("code is required".into()))?;

    let identity = state.oauth.exchange_code(&code).await?;
    let user_id = oauth::upsert_user(state.db.pool(), &identity.email).await?;
    let token = state.auth.issue_user_token(user_id)?;

    tracing::info!(user_id = %user_id, "user signed in");
    Ok(ok(json!({
        "token": token,
        "user_id": user_id,
        "email": identity.email,
    })))
}
