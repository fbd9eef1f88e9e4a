//! Anonymous sessions and the request principal
//!
//! A principal is either an authenticated user or an anonymous session. An
//! anonymous session lives for 24 hours; once migrated to a user it is
//! frozen permanently.

use chrono::{DateTime, Duration, Utc};
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::fingerprint::hash_device_fingerprint;
use crate::guides::ownership::{self, MigrationResult, ANONYMOUS_TTL_HOURS};

/// Who is making the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Principal {
    User(Uuid),
    Anonymous(Uuid),
}

impl Principal {
    /// The ledger key: user id for authenticated principals, session id for
    /// anonymous ones.
    pub fn user_ref(&self) -> String {
        match self {
            Principal::User(id) => id.to_string(),
            Principal::Anonymous(id) => id.to_string(),
        }
    }

    pub fn is_anonymous(&self) -> bool {
        matches!(self, Principal::Anonymous(_))
    }
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct AnonymousSession {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub migrated_to: Option<Uuid>,
}

#[derive(sqlx::FromRow)]
struct SessionRow {
    id: String,
    created_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
    migrated_to: Option<String>,
}

impl SessionRow {
    fn into_session(self) -> Result<AnonymousSession> {
        Ok(AnonymousSession {
            id: Uuid::parse_str(&self.id)
                .map_err(|e| Error::Internal(format!("invalid session id: {e}")))?,
            created_at: self.created_at,
            expires_at: self.expires_at,
            migrated_to: self
                .migrated_to
                .map(|id| {
                    Uuid::parse_str(&id)
                        .map_err(|e| Error::Internal(format!("invalid migrated_to: {e}")))
                })
                .transpose()?,
        })
    }
}

/// Create a fresh anonymous session with a 24-hour TTL. The device
/// fingerprint, when supplied, is stored only as a hash.
pub async fn create(pool: &SqlitePool, device_fingerprint: Option<&str>) -> Result<AnonymousSession> {
    let now = Utc::now();
    let session = AnonymousSession {
        id: Uuid::new_v4(),
        created_at: now,
        expires_at: now + Duration::hours(ANONYMOUS_TTL_HOURS),
        migrated_to: None,
    };

    sqlx::query(
        r#"
        INSERT INTO anonymous_sessions (id, device_fp_hash, created_at, expires_at, migrated_to)
        VALUES ($1, $2, $3, $4, NULL)
        "#,
    )
    .bind(session.id.to_string())
    .bind(device_fingerprint.map(hash_device_fingerprint))
    .bind(session.created_at)
    .bind(session.expires_at)
    .execute(pool)
    .await?;

    tracing::debug!(session_id = %session.id, "anonymous session created");
    Ok(session)
}

/// Load a session whose TTL has not passed. A migrated session still
/// authenticates (its library reads back empty); only the freeze in the
/// ownership store stops it from acquiring new rows.
pub async fn load_active(pool: &SqlitePool, session_id: Uuid) -> Result<AnonymousSession> {
    let row = sqlx::query_as::<_, SessionRow>(
        "SELECT id, created_at, expires_at, migrated_to FROM anonymous_sessions WHERE id = $1",
    )
    .bind(session_id.to_string())
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| Error::NotFound("anonymous session".into()))?;

    let session = row.into_session()?;
    if session.expires_at <= Utc::now() {
        return Err(Error::SessionExpired);
    }
    Ok(session)
}

/// Migrate everything a session owns to an authenticated user, freezing the
/// session. Delegates to the ownership store's transactional migration.
pub async fn migrate_anonymous(
    pool: &SqlitePool,
    session_id: Uuid,
    user_id: Uuid,
) -> Result<MigrationResult> {
    ownership::migrate(pool, session_id, user_id).await
}

/// Remove sessions that expired more than `grace_days` ago and were never
/// migrated. Migrated sessions are kept as an audit trail of the migration.
pub async fn sweep_expired(pool: &SqlitePool, grace_days: i64) -> Result<u64> {
    let cutoff = Utc::now() - Duration::days(grace_days);
    let result = sqlx::query(
        "DELETE FROM anonymous_sessions WHERE expires_at <= $1 AND migrated_to IS NULL",
    )
    .bind(cutoff)
    .execute(pool)
    .await?;
    Ok(result.rows_affected())
}
