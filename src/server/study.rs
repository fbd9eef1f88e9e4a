//! Study-guide endpoints: generation, library listing, save/unsave.

use std::sync::Arc;

use axum::extract::{Query, State};
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use crate::catalog;
use crate::error::{Error, Result};
use crate::guides::ownership::{self, ListOptions};
use crate::guides::{InputKind, Language};
use crate::middleware::{OptionalPrincipal, RequirePrincipal, RequireUser};
use crate::sessions::Principal;

use super::{ok, AppState};

const MAX_PAGE_SIZE: i64 = 100;

#[derive(Debug, Deserialize)]
pub struct GenerateRequest {
    pub input_type: String,
    pub input_value: String,
    pub language: String,
}

pub async fn generate(
    State(state): State<Arc<AppState>>,
    auth: OptionalPrincipal,
    Json(body): Json<GenerateRequest>,
) -> Result<impl IntoResponse> {
    let input_kind = InputKind::from_str(&body.input_type)?;
    let language = Language::from_str(&body.language)?;

    let outcome = state
        .generator
        .get_or_create(auth.principal, input_kind, body.input_value, language)
        .await?;

    catalog::record_event(
        state.db.pool(),
        Some(&auth.principal.user_ref()),
        if outcome.from_cache { "guide_cache_hit" } else { "guide_generated" },
        json!({
            "language": language.as_str(),
            "input_type": input_kind.as_str(),
            "tokens_consumed": outcome.tokens.consumed,
        }),
    )
    .await;

    let mut data = json!({
        "study_guide": outcome.artifact,
        "from_cache": outcome.from_cache,
        "tokens": outcome.tokens,
    });
    if let Some(minted) = auth.minted {
        data["session"] = json!(minted);
    }
    Ok(ok(data))
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub saved: Option<bool>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

pub async fn list(
    State(state): State<Arc<AppState>>,
    RequirePrincipal(principal): RequirePrincipal,
    Query(query): Query<ListQuery>,
) -> Result<impl IntoResponse> {
    let limit = query.limit.unwrap_or(20);
    let offset = query.offset.unwrap_or(0);
    if !(1..=MAX_PAGE_SIZE).contains(&limit) {
        return Err(Error::Validation(format!(
            "limit must be between 1 and {MAX_PAGE_SIZE}"
        )));
    }
    if offset < 0 {
        return Err(Error::Validation("offset must not be negative".into()));
    }

    let (guides, total_count) = ownership::list(
        state.db.pool(),
        &principal,
        ListOptions {
            saved_only: query.saved.unwrap_or(false),
            limit,
            offset,
        },
    )
    .await?;

    Ok(ok(json!({
        "guides": guides,
        "total_count": total_count,
        "limit": limit,
        "offset": offset,
    })))
}

#[derive(Debug, Deserialize)]
pub struct SaveRequest {
    pub guide_id: Uuid,
    pub action: String,
}

pub async fn save_action(
    State(state): State<Arc<AppState>>,
    RequireUser(user_id): RequireUser,
    Json(body): Json<SaveRequest>,
) -> Result<impl IntoResponse> {
    let saved = match body.action.as_str() {
        "save" => true,
        "unsave" => false,
        other => {
            return Err(Error::Validation(format!(
                "action must be \"save\" or \"unsave\", got {other:?}"
            )))
        }
    };

    ownership::set_saved(state.db.pool(), &Principal::User(user_id), body.guide_id, saved).await?;
    Ok(ok(json!({ "guide_id": body.guide_id, "is_saved": saved })))
}
