//! Auxiliary read-models: topic catalog, daily verse, feedback, analytics.

use std::collections::BTreeMap;

use chrono::{NaiveDate, Utc};
use serde::Serialize;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::llm::{daily_verse_prompt, LlmGateway};

// ============================================================================
// Topics
// ============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct Topic {
    pub id: Uuid,
    pub title: String,
    pub description: String,
    pub category: String,
    pub tags: Vec<String>,
    pub key_verses: Vec<String>,
}

#[derive(sqlx::FromRow)]
struct TopicRow {
    id: String,
    title: String,
    description: String,
    category: String,
    tags: String,
    key_verses: String,
}

impl TopicRow {
    fn into_topic(self) -> Result<Topic> {
        Ok(Topic {
            id: Uuid::parse_str(&self.id)
                .map_err(|e| Error::Internal(format!("invalid topic id: {e}")))?,
            title: self.title,
            description: self.description,
            category: self.category,
            tags: serde_json::from_str(&self.tags)?,
            key_verses: serde_json::from_str(&self.key_verses)?,
        })
    }
}

/// List topics, optionally filtered to a set of categories.
pub async fn list_topics(
    pool: &SqlitePool,
    categories: &[String],
    limit: i64,
    offset: i64,
) -> Result<(Vec<Topic>, i64)> {
    // Categories bind first so placeholder numbers match occurrence order
    let filter = if categories.is_empty() {
        String::new()
    } else {
        let placeholders: Vec<String> =
            (1..=categories.len()).map(|i| format!("${i}")).collect();
        format!("WHERE category IN ({})", placeholders.join(", "))
    };
    let (limit_param, offset_param) = (categories.len() + 1, categories.len() + 2);

    let list_sql = format!(
        "SELECT id, title, description, category, tags, key_verses \
         FROM topics {filter} ORDER BY title ASC LIMIT ${limit_param} OFFSET ${offset_param}"
    );
    let mut query = sqlx::query_as::<_, TopicRow>(&list_sql);
    for category in categories {
        query = query.bind(category);
    }
    let rows = query.bind(limit).bind(offset).fetch_all(pool).await?;

    let count_sql = format!("SELECT COUNT(*) FROM topics {filter}");
    let mut count_query = sqlx::query_scalar::<_, i64>(&count_sql);
    for category in categories {
        count_query = count_query.bind(category);
    }
    let total = count_query.fetch_one(pool).await?;

    let topics = rows
        .into_iter()
        .map(TopicRow::into_topic)
        .collect::<Result<Vec<_>>>()?;
    Ok((topics, total))
}

/// Distinct known categories.
pub async fn topic_categories(pool: &SqlitePool) -> Result<Vec<String>> {
    let categories =
        sqlx::query_scalar::<_, String>("SELECT DISTINCT category FROM topics ORDER BY category")
            .fetch_all(pool)
            .await?;
    Ok(categories)
}

// ============================================================================
// Daily verse
// ============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct DailyVerse {
    pub date: NaiveDate,
    pub reference: String,
    pub translations: BTreeMap<String, String>,
}

/// The verse for a UTC date, if one has been filled in.
pub async fn daily_verse(pool: &SqlitePool, date: NaiveDate) -> Result<Option<DailyVerse>> {
    let row: Option<(String, String)> = sqlx::query_as(
        "SELECT reference, translations FROM daily_verses WHERE verse_date = $1",
    )
    .bind(date.to_string())
    .fetch_optional(pool)
    .await?;

    row.map(|(reference, translations)| {
        Ok(DailyVerse {
            date,
            reference,
            translations: serde_json::from_str(&translations)?,
        })
    })
    .transpose()
}

#[derive(serde::Deserialize)]
struct DailyVersePayload {
    reference: String,
    translations: BTreeMap<String, String>,
}

/// Fill in the verse for a date via the LLM gateway if it is missing.
pub async fn backfill_daily_verse(
    pool: &SqlitePool,
    gateway: &LlmGateway,
    date: NaiveDate,
) -> Result<DailyVerse> {
    if let Some(existing) = daily_verse(pool, date).await? {
        return Ok(existing);
    }

    let value = gateway.complete_json(&daily_verse_prompt(date)).await?;
    let payload: DailyVersePayload = serde_json::from_value(value)
        .map_err(|e| Error::LlmMalformed(format!("daily verse shape: {e}")))?;
    if payload.reference.trim().is_empty() || payload.translations.is_empty() {
        return Err(Error::LlmMalformed("daily verse fields missing".into()));
    }

    sqlx::query(
        r#"
        INSERT INTO daily_verses (verse_date, reference, translations, created_at)
        VALUES ($1, $2, $3, $4)
        ON CONFLICT (verse_date) DO NOTHING
        "#,
    )
    .bind(date.to_string())
    .bind(payload.reference.trim())
    .bind(serde_json::to_string(&payload.translations)?)
    .bind(Utc::now())
    .execute(pool)
    .await?;

    // Another writer may have landed first; the stored row wins
    daily_verse(pool, date)
        .await?
        .ok_or_else(|| Error::Internal("daily verse vanished after insert".into()))
}

// ============================================================================
// Feedback
// ============================================================================

#[derive(Debug, Clone)]
pub struct FeedbackInput {
    pub guide_id: Option<Uuid>,
    pub was_helpful: bool,
    pub message: Option<String>,
    pub category: String,
    pub sentiment: Option<f64>,
}

pub async fn submit_feedback(
    pool: &SqlitePool,
    user_ref: &str,
    input: FeedbackInput,
) -> Result<Uuid> {
    if let Some(sentiment) = input.sentiment {
        if !(-1.0..=1.0).contains(&sentiment) {
            return Err(Error::Validation("sentiment must be between -1 and 1".into()));
        }
    }
    let category = if input.category.trim().is_empty() {
        "general".to_string()
    } else {
        input.category.trim().to_string()
    };

    let id = Uuid::new_v4();
    sqlx::query(
        r#"
        INSERT INTO feedback (id, guide_id, user_ref, was_helpful, message, category, sentiment, created_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        "#,
    )
    .bind(id.to_string())
    .bind(input.guide_id.map(|g| g.to_string()))
    .bind(user_ref)
    .bind(input.was_helpful)
    .bind(input.message.as_deref().map(str::trim))
    .bind(category)
    .bind(input.sentiment)
    .bind(Utc::now())
    .execute(pool)
    .await?;

    Ok(id)
}

// ============================================================================
// Analytics
// ============================================================================

/// Append an analytics event. Failures are swallowed with a warning: the
/// write path must never fail a user request over telemetry.
pub async fn record_event(
    pool: &SqlitePool,
    user_ref: Option<&str>,
    event_type: &str,
    payload: serde_json::Value,
) {
    let result = sqlx::query(
        r#"
        INSERT INTO analytics_events (id, user_ref, event_type, payload, created_at)
        VALUES ($1, $2, $3, $4, $5)
        "#,
    )
    .bind(Uuid::new_v4().to_string())
    .bind(user_ref)
    .bind(event_type)
    .bind(payload.to_string())
    .bind(Utc::now())
    .execute(pool)
    .await;

    if let Err(e) = result {
        tracing::warn!(event_type, "failed to record analytics event: {e}");
    }
}
