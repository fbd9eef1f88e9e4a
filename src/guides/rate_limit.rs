//! Generation rate limits
//!
//! Sliding windows counted over generation attempts, so only cache-miss
//! paths are limited: anonymous sessions get 3 generations per rolling 8
//! hours, authenticated Standard users 10 per hour. Cache hits never create
//! an attempt row and are never limited.

use chrono::{DateTime, Duration, Utc};
use sqlx::SqlitePool;

use crate::error::{Error, Result};
use crate::sessions::Principal;
use crate::tokens::Plan;

#[derive(Debug, Clone, Copy)]
struct WindowLimit {
    window: Duration,
    max: i64,
}

fn limit_for(principal: &Principal, plan: Plan) -> Option<WindowLimit> {
    match principal {
        Principal::Anonymous(_) => Some(WindowLimit {
            window: Duration::hours(8),
            max: 3,
        }),
        Principal::User(_) if plan == Plan::Standard => Some(WindowLimit {
            window: Duration::hours(1),
            max: 10,
        }),
        Principal::User(_) => None,
    }
}

/// Enforce the generation window for a principal about to take the miss
/// path. Counting happens before the attempt row is inserted; concurrent
/// requests can overshoot by one, which is acceptable for these windows.
pub async fn check_generation(
    pool: &SqlitePool,
    principal: &Principal,
    plan: Plan,
) -> Result<()> {
    let Some(limit) = limit_for(principal, plan) else {
        return Ok(());
    };

    let now = Utc::now();
    let window_start = now - limit.window;

    let (count, oldest): (i64, Option<DateTime<Utc>>) = sqlx::query_as(
        r#"
        SELECT COUNT(*), MIN(created_at)
        FROM generation_attempts
        WHERE principal = $1 AND created_at > $2
        "#,
    )
    .bind(principal.user_ref())
    .bind(window_start)
    .fetch_one(pool)
    .await?;

    if count >= limit.max {
        let retry_at = oldest.unwrap_or(now) + limit.window;
        let retry_after_seconds = (retry_at - now).num_seconds().max(1);
        tracing::debug!(
            principal = %principal.user_ref(),
            count,
            max = limit.max,
            "generation rate limit hit"
        );
        return Err(Error::RateLimited {
            retry_after_seconds,
        });
    }

    Ok(())
}
