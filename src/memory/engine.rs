//! Practice submission: one transaction updates the verse schedule, the
//! review log, per-mode stats, mastery, the daily goal, and the streak.

use chrono::{Duration, NaiveDate, Utc};
use sqlx::{Sqlite, SqlitePool, Transaction};
use uuid::Uuid;

use crate::config::Config;
use crate::error::{Error, Result};

use super::sm2::{self, ReviewState, Sm2Config};
use super::{MasteryLevel, MemoryVerse, PracticeMode};

/// Base XP for a successful (quality >= 3) review.
const REVIEW_XP: i64 = 10;
/// Bonus XP the first time the daily goal is reached each UTC day.
const GOAL_BONUS_XP: i64 = 50;

#[derive(Debug, Clone)]
pub struct SubmitInput {
    pub verse_id: Uuid,
    pub mode: PracticeMode,
    pub quality: i64,
    pub confidence: Option<i64>,
    pub accuracy: Option<f64>,
    pub time_spent_seconds: Option<i64>,
    pub hints_used: i64,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct DailyGoalStatus {
    pub target: i64,
    pub completed: i64,
    pub achieved: bool,
    pub bonus_awarded: bool,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct SubmitResult {
    pub verse_id: Uuid,
    pub ease_factor: f64,
    pub interval_days: i64,
    pub repetitions: i64,
    pub next_review: chrono::DateTime<chrono::Utc>,
    pub mastery_level: MasteryLevel,
    pub streak_days: i64,
    pub longest_streak: i64,
    pub xp: i64,
    pub daily_goal: DailyGoalStatus,
}

fn validate(input: &SubmitInput) -> Result<()> {
    if !(0..=5).contains(&input.quality) {
        return Err(Error::Validation("quality must be between 0 and 5".into()));
    }
    if let Some(confidence) = input.confidence {
        if !(1..=5).contains(&confidence) {
            return Err(Error::Validation("confidence must be between 1 and 5".into()));
        }
    }
    if let Some(accuracy) = input.accuracy {
        if !(0.0..=100.0).contains(&accuracy) {
            return Err(Error::Validation("accuracy must be between 0 and 100".into()));
        }
    }
    if let Some(time_spent) = input.time_spent_seconds {
        if time_spent <= 0 {
            return Err(Error::Validation("time_spent_seconds must be positive".into()));
        }
    }
    if input.hints_used < 0 {
        return Err(Error::Validation("hints_used must not be negative".into()));
    }
    Ok(())
}

/// Process one practice submission for a verse the user owns.
pub async fn submit(
    pool: &SqlitePool,
    config: &Config,
    user_id: Uuid,
    input: SubmitInput,
) -> Result<SubmitResult> {
    validate(&input)?;

    let sm2_config = Sm2Config {
        min_ease: config.min_ease_factor,
        max_interval_days: config.max_interval_days,
    };
    let now = Utc::now();
    let today = now.date_naive();

    let mut tx = pool.begin().await?;

    let verse = load_verse(&mut tx, user_id, input.verse_id).await?;

    let scheduled = sm2::schedule(
        &ReviewState {
            ease_factor: verse.ease_factor,
            interval_days: verse.interval_days,
            repetitions: verse.repetitions,
        },
        input.quality,
        &sm2_config,
    );
    let next_review = now + Duration::days(scheduled.interval_days);

    let perfect = input.quality == 5 && input.confidence.map_or(true, |c| c >= 4);
    let perfect_recalls = verse.perfect_recalls + i64::from(perfect);

    // Review log first; everything else derives from it
    sqlx::query(
        r#"
        INSERT INTO review_sessions
            (id, user_id, verse_id, review_time, quality, confidence, accuracy, mode,
             hints_used, time_spent_seconds, post_ease, post_interval, post_repetitions)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
        "#,
    )
    .bind(Uuid::new_v4().to_string())
    .bind(user_id.to_string())
    .bind(verse.id.to_string())
    .bind(now)
    .bind(input.quality)
    .bind(input.confidence)
    .bind(input.accuracy)
    .bind(input.mode.as_str())
    .bind(input.hints_used)
    .bind(input.time_spent_seconds)
    .bind(scheduled.ease_factor)
    .bind(scheduled.interval_days)
    .bind(scheduled.repetitions)
    .execute(&mut *tx)
    .await?;

    update_mode_stats(&mut tx, user_id, verse.id, &input).await?;

    let mastered_modes: i64 = sqlx::query_scalar(
        r#"
        SELECT COUNT(*) FROM practice_mode_stats
        WHERE user_id = $1 AND verse_id = $2
          AND success_rate >= 80 AND times_practiced >= 5
        "#,
    )
    .bind(user_id.to_string())
    .bind(verse.id.to_string())
    .fetch_one(&mut *tx)
    .await?;
    let mastery_level = MasteryLevel::for_counts(mastered_modes, perfect_recalls);

    let preferred_mode: Option<String> = sqlx::query_scalar(
        r#"
        SELECT mode FROM practice_mode_stats
        WHERE user_id = $1 AND verse_id = $2
        ORDER BY times_practiced DESC, mode ASC
        LIMIT 1
        "#,
    )
    .bind(user_id.to_string())
    .bind(verse.id.to_string())
    .fetch_optional(&mut *tx)
    .await?;

    sqlx::query(
        r#"
        UPDATE memory_verses SET
            ease_factor = $1, interval_days = $2, repetitions = $3,
            next_review = $4, last_reviewed = $5, total_reviews = total_reviews + 1,
            perfect_recalls = $6, mastery_level = $7, preferred_mode = $8, updated_at = $5
        WHERE id = $9
        "#,
    )
    .bind(scheduled.ease_factor)
    .bind(scheduled.interval_days)
    .bind(scheduled.repetitions)
    .bind(next_review)
    .bind(now)
    .bind(perfect_recalls)
    .bind(mastery_level.as_str())
    .bind(preferred_mode)
    .bind(verse.id.to_string())
    .execute(&mut *tx)
    .await?;

    let successful = input.quality >= 3;
    let daily_goal =
        update_daily_goal(&mut tx, user_id, today, config.daily_goal_target).await?;
    let (streak_days, longest_streak, xp) = update_streak_and_xp(
        &mut tx,
        user_id,
        today,
        successful,
        daily_goal.bonus_awarded,
    )
    .await?;

    tx.commit().await?;

    tracing::debug!(
        user_id = %user_id,
        verse_id = %verse.id,
        quality = input.quality,
        interval = scheduled.interval_days,
        mastery = mastery_level.as_str(),
        "practice submitted"
    );

    Ok(SubmitResult {
        verse_id: verse.id,
        ease_factor: scheduled.ease_factor,
        interval_days: scheduled.interval_days,
        repetitions: scheduled.repetitions,
        next_review,
        mastery_level,
        streak_days,
        longest_streak,
        xp,
        daily_goal,
    })
}

async fn load_verse(
    tx: &mut Transaction<'_, Sqlite>,
    user_id: Uuid,
    verse_id: Uuid,
) -> Result<MemoryVerse> {
    #[derive(sqlx::FromRow)]
    struct Row {
        id: String,
        reference: String,
        verse_text: String,
        ease_factor: f64,
        interval_days: i64,
        repetitions: i64,
        next_review: chrono::DateTime<Utc>,
        last_reviewed: Option<chrono::DateTime<Utc>>,
        total_reviews: i64,
        perfect_recalls: i64,
        mastery_level: String,
        preferred_mode: Option<String>,
    }

    let row = sqlx::query_as::<_, Row>(
        r#"
        SELECT id, reference, verse_text, ease_factor, interval_days, repetitions,
               next_review, last_reviewed, total_reviews, perfect_recalls,
               mastery_level, preferred_mode
        FROM memory_verses
        WHERE id = $1 AND user_id = $2
        "#,
    )
    .bind(verse_id.to_string())
    .bind(user_id.to_string())
    .fetch_optional(&mut **tx)
    .await?
    .ok_or_else(|| Error::NotFound("memory verse".into()))?;

    Ok(MemoryVerse {
        id: Uuid::parse_str(&row.id).map_err(|e| Error::Internal(format!("invalid verse id: {e}")))?,
        user_id,
        reference: row.reference,
        text: row.verse_text,
        ease_factor: row.ease_factor,
        interval_days: row.interval_days,
        repetitions: row.repetitions,
        next_review: row.next_review,
        last_reviewed: row.last_reviewed,
        total_reviews: row.total_reviews,
        perfect_recalls: row.perfect_recalls,
        mastery_level: MasteryLevel::from_str(&row.mastery_level)?,
        preferred_mode: row
            .preferred_mode
            .as_deref()
            .map(PracticeMode::from_str)
            .transpose()?,
    })
}

/// Running weighted averages per (verse, mode). A missing accuracy counts a
/// successful review as 100 and a failed one as 0.
async fn update_mode_stats(
    tx: &mut Transaction<'_, Sqlite>,
    user_id: Uuid,
    verse_id: Uuid,
    input: &SubmitInput,
) -> Result<()> {
    let success_value = input
        .accuracy
        .unwrap_or(if input.quality >= 3 { 100.0 } else { 0.0 });
    let now = Utc::now();

    let existing: Option<(i64, f64, Option<i64>)> = sqlx::query_as(
        r#"
        SELECT times_practiced, success_rate, avg_time_seconds
        FROM practice_mode_stats
        WHERE user_id = $1 AND verse_id = $2 AND mode = $3
        "#,
    )
    .bind(user_id.to_string())
    .bind(verse_id.to_string())
    .bind(input.mode.as_str())
    .fetch_optional(&mut **tx)
    .await?;

    let (times, rate, avg_time) = existing.unwrap_or((0, 0.0, None));
    let new_times = times + 1;
    let new_rate = (rate * times as f64 + success_value) / new_times as f64;
    let new_avg_time = match (avg_time, input.time_spent_seconds) {
        (None, spent) => spent,
        (Some(avg), None) => Some(avg),
        (Some(avg), Some(spent)) => Some((avg * times + spent) / new_times),
    };

    sqlx::query(
        r#"
        INSERT INTO practice_mode_stats
            (user_id, verse_id, mode, times_practiced, success_rate, avg_time_seconds, updated_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        ON CONFLICT (user_id, verse_id, mode) DO UPDATE SET
            times_practiced = $4, success_rate = $5, avg_time_seconds = $6, updated_at = $7
        "#,
    )
    .bind(user_id.to_string())
    .bind(verse_id.to_string())
    .bind(input.mode.as_str())
    .bind(new_times)
    .bind(new_rate)
    .bind(new_avg_time)
    .bind(now)
    .execute(&mut **tx)
    .await?;

    Ok(())
}

async fn update_daily_goal(
    tx: &mut Transaction<'_, Sqlite>,
    user_id: Uuid,
    today: NaiveDate,
    target: i64,
) -> Result<DailyGoalStatus> {
    let existing: Option<(i64, Option<String>)> = sqlx::query_as(
        "SELECT completed, achieved_at FROM daily_goals WHERE user_id = $1 AND goal_date = $2",
    )
    .bind(user_id.to_string())
    .bind(today.to_string())
    .fetch_optional(&mut **tx)
    .await?;

    let (completed, achieved_at) = existing.unwrap_or((0, None));
    let new_completed = completed + 1;
    let newly_achieved = achieved_at.is_none() && new_completed >= target;
    let achieved_stamp = if newly_achieved {
        Some(Utc::now().to_rfc3339())
    } else {
        achieved_at.clone()
    };

    sqlx::query(
        r#"
        INSERT INTO daily_goals (user_id, goal_date, target, completed, achieved_at)
        VALUES ($1, $2, $3, $4, $5)
        ON CONFLICT (user_id, goal_date) DO UPDATE SET
            completed = $4, achieved_at = $5
        "#,
    )
    .bind(user_id.to_string())
    .bind(today.to_string())
    .bind(target)
    .bind(new_completed)
    .bind(&achieved_stamp)
    .execute(&mut **tx)
    .await?;

    Ok(DailyGoalStatus {
        target,
        completed: new_completed,
        achieved: achieved_stamp.is_some(),
        bonus_awarded: newly_achieved,
    })
}

/// Streak: consecutive UTC days with at least one successful submission.
/// Returns (streak, longest, xp) after this review.
async fn update_streak_and_xp(
    tx: &mut Transaction<'_, Sqlite>,
    user_id: Uuid,
    today: NaiveDate,
    successful: bool,
    goal_bonus: bool,
) -> Result<(i64, i64, i64)> {
    let existing: Option<(i64, i64, Option<String>, i64)> = sqlx::query_as(
        "SELECT streak_days, longest_streak, last_success_date, xp FROM user_practice_stats WHERE user_id = $1",
    )
    .bind(user_id.to_string())
    .fetch_optional(&mut **tx)
    .await?;

    let (mut streak, mut longest, last_success, mut xp) =
        existing.unwrap_or((0, 0, None, 0));
    let last_success: Option<NaiveDate> =
        last_success.and_then(|d| d.parse().ok());

    let mut new_last_success = last_success;
    if successful {
        xp += REVIEW_XP;
        match last_success {
            Some(date) if date == today => {}
            Some(date) if date == today - Duration::days(1) => {
                streak += 1;
            }
            _ => {
                streak = 1;
            }
        }
        longest = longest.max(streak);
        new_last_success = Some(today);
    }
    if goal_bonus {
        xp += GOAL_BONUS_XP;
    }

    sqlx::query(
        r#"
        INSERT INTO user_practice_stats
            (user_id, streak_days, longest_streak, last_success_date, xp, updated_at)
        VALUES ($1, $2, $3, $4, $5, $6)
        ON CONFLICT (user_id) DO UPDATE SET
            streak_days = $2, longest_streak = $3, last_success_date = $4, xp = $5, updated_at = $6
        "#,
    )
    .bind(user_id.to_string())
    .bind(streak)
    .bind(longest)
    .bind(new_last_success.map(|d| d.to_string()))
    .bind(xp)
    .bind(Utc::now())
    .execute(&mut **tx)
    .await?;

    Ok((streak, longest, xp))
}
