//! Catalog endpoints: topics, daily verse, feedback.

use std::sync::Arc;

use axum::extract::{Query, State};
use axum::response::IntoResponse;
use axum::Json;
use chrono::{NaiveDate, Utc};
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use crate::catalog;
use crate::error::{Error, Result};
use crate::middleware::{OptionalPrincipal, RequirePrincipal};

use super::{ok, AppState};

const MAX_PAGE_SIZE: i64 = 100;

#[derive(Debug, Deserialize)]
pub struct TopicsQuery {
    pub category: Option<String>,
    pub categories: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

pub async fn topics_recommended(
    State(state): State<Arc<AppState>>,
    RequirePrincipal(_principal): RequirePrincipal,
    Query(query): Query<TopicsQuery>,
) -> Result<impl IntoResponse> {
    if query.category.is_some() && query.categories.is_some() {
        return Err(Error::Validation(
            "category and categories are mutually exclusive".into(),
        ));
    }

    let categories: Vec<String> = match (&query.category, &query.categories) {
        (Some(single), None) => vec![single.trim().to_string()],
        (None, Some(list)) => list
            .split(',')
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty())
            .collect(),
        _ => Vec::new(),
    };

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

    let (topics, total_count) =
        catalog::list_topics(state.db.pool(), &categories, limit, offset).await?;
    Ok(ok(json!({ "topics": topics, "total_count": total_count })))
}

pub async fn topics_categories(
    State(state): State<Arc<AppState>>,
    RequirePrincipal(_principal): RequirePrincipal,
) -> Result<impl IntoResponse> {
    let categories = catalog::topic_categories(state.db.pool()).await?;
    Ok(ok(json!({ "categories": categories })))
}

#[derive(Debug, Deserialize)]
pub struct DailyVerseQuery {
    pub date: Option<String>,
}

pub async fn daily_verse(
    State(state): State<Arc<AppState>>,
    RequirePrincipal(_principal): RequirePrincipal,
    Query(query): Query<DailyVerseQuery>,
) -> Result<impl IntoResponse> {
    let today = Utc::now().date_naive();
    let date = match query.date {
        Some(raw) => raw
            .parse::<NaiveDate>()
            .map_err(|_| Error::Validation("date must be YYYY-MM-DD".into()))?,
        None => today,
    };

    if let Some(verse) = catalog::daily_verse(state.db.pool(), date).await? {
        return Ok(ok(verse));
    }

    // Today's verse may not be backfilled yet; fill it on demand. Past and
    // future dates stay read-only.
    if date == today {
        let verse =
            catalog::backfill_daily_verse(state.db.pool(), &state.gateway, date).await?;
        return Ok(ok(verse));
    }

    Err(Error::NotFound(format!("no daily verse for {date}")))
}

#[derive(Debug, Deserialize)]
pub struct FeedbackRequest {
    pub guide_id: Option<Uuid>,
    pub was_helpful: bool,
    pub message: Option<String>,
    #[serde(default)]
    pub category: String,
    pub sentiment: Option<f64>,
}

pub async fn submit_feedback(
    State(state): State<Arc<AppState>>,
    auth: OptionalPrincipal,
    Json(body): Json<FeedbackRequest>,
) -> Result<impl IntoResponse> {
    let id = catalog::submit_feedback(
        state.db.pool(),
        &auth.principal.user_ref(),
        catalog::FeedbackInput {
            guide_id: body.guide_id,
            was_helpful: body.was_helpful,
            message: body.message,
            category: body.category,
            sentiment: body.sentiment,
        },
    )
    .await?;

    Ok(ok(json!({ "feedback_id": id })))
}
