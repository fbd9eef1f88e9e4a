//! Verse memorization: SM-2 scheduling, per-mode mastery tracking, daily
//! goals and streaks.

pub mod engine;
pub mod sm2;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::error::{Error, Result};

/// How a verse was practiced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PracticeMode {
    FlipCard,
    TypeItOut,
    Cloze,
    FirstLetter,
    Progressive,
    WordScramble,
    WordBank,
    Audio,
}

impl PracticeMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            PracticeMode::FlipCard => "flip_card",
            PracticeMode::TypeItOut => "type_it_out",
            PracticeMode::Cloze => "cloze",
            PracticeMode::FirstLetter => "first_letter",
            PracticeMode::Progressive => "progressive",
            PracticeMode::WordScramble => "word_scramble",
            PracticeMode::WordBank => "word_bank",
            PracticeMode::Audio => "audio",
        }
    }

    pub fn from_str(s: &str) -> Result<Self> {
        match s {
            "flip_card" => Ok(PracticeMode::FlipCard),
            "type_it_out" => Ok(PracticeMode::TypeItOut),
            "cloze" => Ok(PracticeMode::Cloze),
            "first_letter" => Ok(PracticeMode::FirstLetter),
            "progressive" => Ok(PracticeMode::Progressive),
            "word_scramble" => Ok(PracticeMode::WordScramble),
            "word_bank" => Ok(PracticeMode::WordBank),
            "audio" => Ok(PracticeMode::Audio),
            other => Err(Error::Validation(format!("unknown practice mode {other:?}"))),
        }
    }
}

/// Per-verse mastery tiers. Thresholds combine mastered modes and perfect
/// recalls: 2/5, 4/15, 6/30, 8/50.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MasteryLevel {
    Beginner,
    Intermediate,
    Advanced,
    Expert,
    Master,
}

impl MasteryLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            MasteryLevel::Beginner => "beginner",
            MasteryLevel::Intermediate => "intermediate",
            MasteryLevel::Advanced => "advanced",
            MasteryLevel::Expert => "expert",
            MasteryLevel::Master => "master",
        }
    }

    pub fn from_str(s: &str) -> Result<Self> {
        match s {
            "beginner" => Ok(MasteryLevel::Beginner),
            "intermediate" => Ok(MasteryLevel::Intermediate),
            "advanced" => Ok(MasteryLevel::Advanced),
            "expert" => Ok(MasteryLevel::Expert),
            "master" => Ok(MasteryLevel::Master),
            other => Err(Error::Internal(format!("unknown mastery level {other:?}"))),
        }
    }

    /// Level for a verse with the given mastered-mode and perfect-recall
    /// counts. A mastered mode has `success_rate >= 80` over at least five
    /// practices.
    pub fn for_counts(mastered_modes: i64, perfect_recalls: i64) -> Self {
        match () {
            _ if mastered_modes >= 8 && perfect_recalls >= 50 => MasteryLevel::Master,
            _ if mastered_modes >= 6 && perfect_recalls >= 30 => MasteryLevel::Expert,
            _ if mastered_modes >= 4 && perfect_recalls >= 15 => MasteryLevel::Advanced,
            _ if mastered_modes >= 2 && perfect_recalls >= 5 => MasteryLevel::Intermediate,
            _ => MasteryLevel::Beginner,
        }
    }
}

/// A verse a user is memorizing.
#[derive(Debug, Clone, Serialize)]
pub struct MemoryVerse {
    pub id: Uuid,
    pub user_id: Uuid,
    pub reference: String,
    pub text: String,
    pub ease_factor: f64,
    pub interval_days: i64,
    pub repetitions: i64,
    pub next_review: DateTime<Utc>,
    pub last_reviewed: Option<DateTime<Utc>>,
    pub total_reviews: i64,
    pub perfect_recalls: i64,
    pub mastery_level: MasteryLevel,
    pub preferred_mode: Option<PracticeMode>,
}

#[derive(sqlx::FromRow)]
struct VerseRow {
    id: String,
    user_id: String,
    reference: String,
    verse_text: String,
    ease_factor: f64,
    interval_days: i64,
    repetitions: i64,
    next_review: DateTime<Utc>,
    last_reviewed: Option<DateTime<Utc>>,
    total_reviews: i64,
    perfect_recalls: i64,
    mastery_level: String,
    preferred_mode: Option<String>,
}

impl VerseRow {
    fn into_verse(self) -> Result<MemoryVerse> {
        Ok(MemoryVerse {
            id: Uuid::parse_str(&self.id)
                .map_err(|e| Error::Internal(format!("invalid verse id: {e}")))?,
            user_id: Uuid::parse_str(&self.user_id)
                .map_err(|e| Error::Internal(format!("invalid user id: {e}")))?,
            reference: self.reference,
            text: self.verse_text,
            ease_factor: self.ease_factor,
            interval_days: self.interval_days,
            repetitions: self.repetitions,
            next_review: self.next_review,
            last_reviewed: self.last_reviewed,
            total_reviews: self.total_reviews,
            perfect_recalls: self.perfect_recalls,
            mastery_level: MasteryLevel::from_str(&self.mastery_level)?,
            preferred_mode: self
                .preferred_mode
                .as_deref()
                .map(PracticeMode::from_str)
                .transpose()?,
        })
    }
}

const VERSE_COLUMNS: &str = "id, user_id, reference, verse_text, ease_factor, interval_days, \
     repetitions, next_review, last_reviewed, total_reviews, perfect_recalls, \
     mastery_level, preferred_mode";

/// Add a verse to a user's memorization deck; it comes due immediately.
pub async fn add_verse(
    pool: &SqlitePool,
    user_id: Uuid,
    reference: &str,
    text: &str,
) -> Result<MemoryVerse> {
    if reference.trim().is_empty() || text.trim().is_empty() {
        return Err(Error::Validation("reference and text must not be empty".into()));
    }

    let now = Utc::now();
    let verse = MemoryVerse {
        id: Uuid::new_v4(),
        user_id,
        reference: reference.trim().to_string(),
        text: text.trim().to_string(),
        ease_factor: 2.5,
        interval_days: 0,
        repetitions: 0,
        next_review: now,
        last_reviewed: None,
        total_reviews: 0,
        perfect_recalls: 0,
        mastery_level: MasteryLevel::Beginner,
        preferred_mode: None,
    };

    sqlx::query(
        r#"
        INSERT INTO memory_verses
            (id, user_id, reference, verse_text, ease_factor, interval_days, repetitions,
             next_review, total_reviews, perfect_recalls, mastery_level, created_at, updated_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, 0, 0, 'beginner', $9, $9)
        "#,
    )
    .bind(verse.id.to_string())
    .bind(user_id.to_string())
    .bind(&verse.reference)
    .bind(&verse.text)
    .bind(verse.ease_factor)
    .bind(verse.interval_days)
    .bind(verse.repetitions)
    .bind(verse.next_review)
    .bind(now)
    .execute(pool)
    .await?;

    Ok(verse)
}

/// Load a verse that belongs to the user.
pub async fn find_verse(pool: &SqlitePool, user_id: Uuid, verse_id: Uuid) -> Result<MemoryVerse> {
    let sql = format!("SELECT {VERSE_COLUMNS} FROM memory_verses WHERE id = $1 AND user_id = $2");
    sqlx::query_as::<_, VerseRow>(&sql)
        .bind(verse_id.to_string())
        .bind(user_id.to_string())
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| Error::NotFound("memory verse".into()))?
        .into_verse()
}

/// List a user's verses, due first.
pub async fn list_verses(
    pool: &SqlitePool,
    user_id: Uuid,
    due_only: bool,
) -> Result<Vec<MemoryVerse>> {
    let due_clause = if due_only { "AND next_review <= $2" } else { "" };
    let sql = format!(
        "SELECT {VERSE_COLUMNS} FROM memory_verses \
         WHERE user_id = $1 {due_clause} ORDER BY next_review ASC"
    );

    let mut query = sqlx::query_as::<_, VerseRow>(&sql).bind(user_id.to_string());
    if due_only {
        query = query.bind(Utc::now());
    }
    let rows = query.fetch_all(pool).await?;
    rows.into_iter().map(VerseRow::into_verse).collect()
}

/// Current streak and lifetime practice stats for a user.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PracticeStats {
    pub streak_days: i64,
    pub longest_streak: i64,
    pub xp: i64,
}

pub async fn practice_stats(pool: &SqlitePool, user_id: Uuid) -> Result<PracticeStats> {
    let row: Option<(i64, i64, i64)> = sqlx::query_as(
        "SELECT streak_days, longest_streak, xp FROM user_practice_stats WHERE user_id = $1",
    )
    .bind(user_id.to_string())
    .fetch_optional(pool)
    .await?;

    Ok(row
        .map(|(streak_days, longest_streak, xp)| PracticeStats {
            streak_days,
            longest_streak,
            xp,
        })
        .unwrap_or_default())
}
