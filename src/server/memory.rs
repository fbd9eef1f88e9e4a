//! Verse-memorization endpoints.

use std::sync::Arc;

use axum::extract::{Query, State};
use axum::response::IntoResponse;
use axum::Json;
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::memory::{self, engine, PracticeMode};
use crate::middleware::RequireUser;

use super::{ok, AppState};

#[derive(Debug, Deserialize)]
pub struct SubmitRequest {
    pub verse_id: Uuid,
    pub mode: String,
    pub quality: i64,
    pub confidence: Option<i64>,
    pub accuracy: Option<f64>,
    pub time_spent_seconds: Option<i64>,
    #[serde(default)]
    pub hints_used: i64,
}

pub async fn submit_practice(
    State(state): State<Arc<AppState>>,
    RequireUser(user_id): RequireUser,
    Json(body): Json<SubmitRequest>,
) -> Result<impl IntoResponse> {
    let input = engine::SubmitInput {
        verse_id: body.verse_id,
        mode: PracticeMode::from_str(&body.mode)?,
        quality: body.quality,
        confidence: body.confidence,
        accuracy: body.accuracy,
        time_spent_seconds: body.time_spent_seconds,
        hints_used: body.hints_used,
    };

    let result = engine::submit(state.db.pool(), &state.config, user_id, input).await?;
    Ok(ok(result))
}

#[derive(Debug, Deserialize)]
pub struct ListVersesQuery {
    #[serde(default)]
    pub due: bool,
}

pub async fn list_verses(
    State(state): State<Arc<AppState>>,
    RequireUser(user_id): RequireUser,
    Query(query): Query<ListVersesQuery>,
) -> Result<impl IntoResponse> {
    let verses = memory::list_verses(state.db.pool(), user_id, query.due).await?;
    let stats = memory::practice_stats(state.db.pool(), user_id).await?;
    Ok(ok(json!({ "verses": verses, "stats": stats })))
}

#[derive(Debug, Deserialize)]
pub struct AddVerseRequest {
    pub reference: String,
    pub text: String,
}

pub async fn add_verse(
    State(state): State<Arc<AppState>>,
    RequireUser(user_id): RequireUser,
    Json(body): Json<AddVerseRequest>,
) -> Result<impl IntoResponse> {
    if body.reference.trim().is_empty() || body.text.trim().is_empty() {
        return Err(Error::Validation("reference and text are required".into()));
    }
    let verse = memory::add_verse(state.db.pool(), user_id, &body.reference, &body.text).await?;
    Ok(ok(verse))
}
