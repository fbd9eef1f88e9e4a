//! Background jobs: expiry sweeps and the daily-verse backfill.

use std::sync::Arc;

use tokio_cron_scheduler::{Job, JobScheduler};

use crate::error::{Error, Result};
use crate::guides::ownership;
use crate::server::AppState;
use crate::sessions;

/// Expired-but-unmigrated sessions linger this long before deletion.
const SESSION_SWEEP_GRACE_DAYS: i64 = 7;

/// Start the scheduler: an hourly sweep of expired anonymous rows and the
/// daily-verse backfill shortly after UTC midnight.
pub async fn start(state: Arc<AppState>) -> Result<JobScheduler> {
    let scheduler = JobScheduler::new()
        .await
        .map_err(|e| Error::Internal(format!("failed to create scheduler: {e}")))?;

    let sweep_state = state.clone();
    let sweep = Job::new_async("0 0 * * * *", move |_uuid, _lock| {
        let state = sweep_state.clone();
        Box::pin(async move {
            run_sweep(&state).await;
        })
    })
    .map_err(|e| Error::Internal(format!("failed to create sweep job: {e}")))?;
    scheduler
        .add(sweep)
        .await
        .map_err(|e| Error::Internal(format!("failed to add sweep job: {e}")))?;

    let verse_state = state.clone();
    let backfill = Job::new_async("0 5 0 * * *", move |_uuid, _lock| {
        let state = verse_state.clone();
        Box::pin(async move {
            run_daily_verse_backfill(&state).await;
        })
    })
    .map_err(|e| Error::Internal(format!("failed to create backfill job: {e}")))?;
    scheduler
        .add(backfill)
        .await
        .map_err(|e| Error::Internal(format!("failed to add backfill job: {e}")))?;

    scheduler
        .start()
        .await
        .map_err(|e| Error::Internal(format!("failed to start scheduler: {e}")))?;

    tracing::info!("background jobs scheduled");
    Ok(scheduler)
}

async fn run_sweep(state: &AppState) {
    match ownership::sweep_expired(state.db.pool()).await {
        Ok(removed) if removed > 0 => {
            tracing::info!(removed, "swept expired anonymous ownership rows");
        }
        Ok(_) => {}
        Err(e) => tracing::error!("ownership sweep failed: {e}"),
    }

    match sessions::sweep_expired(state.db.pool(), SESSION_SWEEP_GRACE_DAYS).await {
        Ok(removed) if removed > 0 => {
            tracing::info!(removed, "swept expired anonymous sessions");
        }
        Ok(_) => {}
        Err(e) => tracing::error!("session sweep failed: {e}"),
    }
}

async fn run_daily_verse_backfill(state: &AppState) {
    let today = chrono::Utc::now().date_naive();
    match crate::catalog::backfill_daily_verse(state.db.pool(), &state.gateway, today).await {
        Ok(verse) => {
            tracing::info!(date = %today, reference = %verse.reference, "daily verse ready");
        }
        Err(e) => tracing::error!(date = %today, "daily verse backfill failed: {e}"),
    }
}
