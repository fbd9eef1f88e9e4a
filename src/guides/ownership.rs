//! Ownership store: principal ↔ artifact relationships
//!
//! User rows live until explicitly removed; anonymous-session rows carry a
//! 24-hour TTL and are swept in the background. Migration moves every
//! session-owned row to a user and freezes the session against further
//! attachment.

use chrono::{DateTime, Duration, Utc};
use sqlx::SqlitePool;
use uuid::Uuid;

use super::{Artifact, InputKind, Language, StudyContent};
use crate::error::{Error, Result};
use crate::sessions::Principal;

/// TTL for anonymous ownership rows and sessions.
pub const ANONYMOUS_TTL_HOURS: i64 = 24;

/// One owned guide as returned by `list`.
#[derive(Debug, Clone, serde::Serialize)]
pub struct OwnedGuide {
    #[serde(flatten)]
    pub artifact: Artifact,
    pub is_saved: bool,
    pub owned_at: DateTime<Utc>,
}

/// Paging options for `list`.
#[derive(Debug, Clone, Copy)]
pub struct ListOptions {
    pub saved_only: bool,
    pub limit: i64,
    pub offset: i64,
}

/// Attach an artifact to a user. Idempotent: an existing row is left as-is.
pub async fn attach_user(
    pool: &SqlitePool,
    user_id: Uuid,
    artifact_id: Uuid,
    is_saved: bool,
) -> Result<()> {
    let now = Utc::now();
    sqlx::query(
        r#"
        INSERT INTO user_guides (user_id, guide_id, is_saved, created_at, updated_at)
        VALUES ($1, $2, $3, $4, $4)
        ON CONFLICT (user_id, guide_id) DO NOTHING
        "#,
    )
    .bind(user_id.to_string())
    .bind(artifact_id.to_string())
    .bind(is_saved)
    .bind(now)
    .execute(pool)
    .await?;

    Ok(())
}

/// Attach an artifact to an anonymous session. A duplicate attach extends the
/// row's expiry by another TTL window. Frozen (migrated) and expired sessions
/// accept no new rows.
pub async fn attach_session(
    pool: &SqlitePool,
    session_id: Uuid,
    artifact_id: Uuid,
) -> Result<()> {
    let mut tx = pool.begin().await?;

    let session = sqlx::query_as::<_, (Option<String>, DateTime<Utc>)>(
        "SELECT migrated_to, expires_at FROM anonymous_sessions WHERE id = $1",
    )
    .bind(session_id.to_string())
    .fetch_optional(&mut *tx)
    .await?;

    match session {
        None => return Err(Error::NotFound("anonymous session".into())),
        Some((Some(_), _)) => return Err(Error::SessionExpired),
        Some((None, expires_at)) if expires_at <= Utc::now() => {
            return Err(Error::SessionExpired)
        }
        Some((None, _)) => {}
    }

    let now = Utc::now();
    let expires_at = now + Duration::hours(ANONYMOUS_TTL_HOURS);
    sqlx::query(
        r#"
        INSERT INTO session_guides (session_id, guide_id, is_saved, created_at, expires_at)
        VALUES ($1, $2, 0, $3, $4)
        ON CONFLICT (session_id, guide_id) DO UPDATE SET expires_at = $4
        "#,
    )
    .bind(session_id.to_string())
    .bind(artifact_id.to_string())
    .bind(now)
    .bind(expires_at)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(())
}

/// Attach for either principal variant.
pub async fn attach(pool: &SqlitePool, principal: &Principal, artifact_id: Uuid) -> Result<()> {
    match principal {
        Principal::User(user_id) => attach_user(pool, *user_id, artifact_id, false).await,
        Principal::Anonymous(session_id) => attach_session(pool, *session_id, artifact_id).await,
    }
}

/// Flip the saved flag on an existing ownership row.
pub async fn set_saved(
    pool: &SqlitePool,
    principal: &Principal,
    artifact_id: Uuid,
    saved: bool,
) -> Result<()> {
    let now = Utc::now();
    let result = match principal {
        Principal::User(user_id) => {
            sqlx::query(
                r#"
                UPDATE user_guides SET is_saved = $1, updated_at = $2
                WHERE user_id = $3 AND guide_id = $4
                "#,
            )
            .bind(saved)
            .bind(now)
            .bind(user_id.to_string())
            .bind(artifact_id.to_string())
            .execute(pool)
            .await?
        }
        Principal::Anonymous(session_id) => {
            sqlx::query(
                r#"
                UPDATE session_guides SET is_saved = $1
                WHERE session_id = $2 AND guide_id = $3 AND expires_at > $4
                "#,
            )
            .bind(saved)
            .bind(session_id.to_string())
            .bind(artifact_id.to_string())
            .bind(now)
            .execute(pool)
            .await?
        }
    };

    if result.rows_affected() == 0 {
        return Err(Error::NotFound("study guide is not in your library".into()));
    }
    Ok(())
}

#[derive(sqlx::FromRow)]
struct OwnedRow {
    id: String,
    fingerprint: String,
    input_kind: String,
    raw_input: Option<String>,
    language: String,
    content: String,
    created_at: DateTime<Utc>,
    is_saved: bool,
    owned_at: DateTime<Utc>,
}

impl OwnedRow {
    fn into_owned(self) -> Result<OwnedGuide> {
        let content: StudyContent = serde_json::from_str(&self.content)?;
        Ok(OwnedGuide {
            artifact: Artifact {
                id: Uuid::parse_str(&self.id)
                    .map_err(|e| Error::Internal(format!("invalid guide id: {e}")))?,
                fingerprint: self.fingerprint,
                input_kind: InputKind::from_str(&self.input_kind)?,
                raw_input: self.raw_input,
                language: Language::from_str(&self.language)?,
                content,
                created_at: self.created_at,
            },
            is_saved: self.is_saved,
            owned_at: self.owned_at,
        })
    }
}

/// List a principal's guides, newest first, with the unfiltered/filtered
/// total for paging.
pub async fn list(
    pool: &SqlitePool,
    principal: &Principal,
    options: ListOptions,
) -> Result<(Vec<OwnedGuide>, i64)> {
    // Placeholder indexes in SQLite follow first occurrence, so the expiry
    // parameter sits between the owner and the paging parameters
    let (owner_table, owner_column, expiry_clause, paging) = match principal {
        Principal::User(_) => ("user_guides", "user_id", "", "LIMIT $2 OFFSET $3"),
        Principal::Anonymous(_) => (
            "session_guides",
            "session_id",
            "AND o.expires_at > $2",
            "LIMIT $3 OFFSET $4",
        ),
    };
    let saved_clause = if options.saved_only { "AND o.is_saved = 1" } else { "" };
    let now = Utc::now();
    let owner_ref = principal.user_ref();

    let list_sql = format!(
        r#"
        SELECT g.id, g.fingerprint, g.input_kind, g.raw_input, g.language, g.content,
               g.created_at, o.is_saved, o.created_at AS owned_at
        FROM {owner_table} o
        JOIN study_guides g ON g.id = o.guide_id
        WHERE o.{owner_column} = $1 {saved_clause} {expiry_clause}
        ORDER BY o.created_at DESC
        {paging}
        "#
    );
    let mut list_query = sqlx::query_as::<_, OwnedRow>(&list_sql).bind(&owner_ref);
    if !expiry_clause.is_empty() {
        list_query = list_query.bind(now);
    }
    let rows = list_query
        .bind(options.limit)
        .bind(options.offset)
        .fetch_all(pool)
        .await?;

    let count_sql = format!(
        r#"
        SELECT COUNT(*)
        FROM {owner_table} o
        WHERE o.{owner_column} = $1 {saved_clause} {expiry_clause}
        "#
    );
    let mut count_query = sqlx::query_scalar::<_, i64>(&count_sql).bind(&owner_ref);
    if !expiry_clause.is_empty() {
        count_query = count_query.bind(now);
    }
    let total = count_query.fetch_one(pool).await?;

    let guides = rows
        .into_iter()
        .map(OwnedRow::into_owned)
        .collect::<Result<Vec<_>>>()?;
    Ok((guides, total))
}

/// Outcome of an anonymous-to-authenticated migration.
#[derive(Debug, Clone, serde::Serialize)]
pub struct MigrationResult {
    pub migrated_guides: i64,
    pub already_migrated: bool,
}

/// Transfer every session-owned row to the target user, freeze the session.
/// Idempotent: re-running for the same target reports success with no
/// further transfers.
pub async fn migrate(
    pool: &SqlitePool,
    session_id: Uuid,
    target_user_id: Uuid,
) -> Result<MigrationResult> {
    let mut tx = pool.begin().await?;

    let session = sqlx::query_as::<_, (Option<String>, DateTime<Utc>)>(
        "SELECT migrated_to, expires_at FROM anonymous_sessions WHERE id = $1",
    )
    .bind(session_id.to_string())
    .fetch_optional(&mut *tx)
    .await?;

    let expires_at = match session {
        None => return Err(Error::NotFound("anonymous session".into())),
        Some((Some(existing), _)) => {
            return if existing == target_user_id.to_string() {
                Ok(MigrationResult {
                    migrated_guides: 0,
                    already_migrated: true,
                })
            } else {
                Err(Error::Validation(
                    "session was already migrated to a different account".into(),
                ))
            };
        }
        Some((None, expires_at)) => expires_at,
    };
    if expires_at <= Utc::now() {
        return Err(Error::SessionExpired);
    }

    let now = Utc::now();
    sqlx::query(
        r#"
        INSERT INTO user_guides (user_id, guide_id, is_saved, created_at, updated_at)
        SELECT $1, guide_id, is_saved, $2, $2
        FROM session_guides
        WHERE session_id = $3
        ON CONFLICT (user_id, guide_id) DO NOTHING
        "#,
    )
    .bind(target_user_id.to_string())
    .bind(now)
    .bind(session_id.to_string())
    .execute(&mut *tx)
    .await?;

    let removed = sqlx::query("DELETE FROM session_guides WHERE session_id = $1")
        .bind(session_id.to_string())
        .execute(&mut *tx)
        .await?;

    sqlx::query("UPDATE anonymous_sessions SET migrated_to = $1 WHERE id = $2")
        .bind(target_user_id.to_string())
        .bind(session_id.to_string())
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;

    tracing::info!(
        session_id = %session_id,
        user_id = %target_user_id,
        migrated = removed.rows_affected(),
        "anonymous session migrated"
    );

    Ok(MigrationResult {
        migrated_guides: removed.rows_affected() as i64,
        already_migrated: false,
    })
}

/// Sweep expired anonymous ownership rows. Returns rows removed.
pub async fn sweep_expired(pool: &SqlitePool) -> Result<u64> {
    let result = sqlx::query("DELETE FROM session_guides WHERE expires_at <= $1")
        .bind(Utc::now())
        .execute(pool)
        .await?;
    Ok(result.rows_affected())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::test_database;
    use crate::guides::store;
    use crate::sessions;

    async fn seeded_artifact(pool: &SqlitePool, fp_tag: char) -> Artifact {
        let artifact = Artifact {
            id: Uuid::new_v4(),
            fingerprint: fp_tag.to_string().repeat(64),
            input_kind: InputKind::Topic,
            raw_input: Some("faith".into()),
            language: Language::English,
            content: StudyContent {
                summary: "s".into(),
                interpretation: "i".into(),
                context: "c".into(),
                related_verses: vec!["v".into()],
                reflection_questions: vec!["q".into()],
                prayer_points: vec!["p".into()],
            },
            created_at: Utc::now(),
        };
        store::insert(pool, &artifact).await.unwrap();
        artifact
    }

    #[tokio::test]
    async fn test_attach_user_is_idempotent() {
        let db = test_database().await;
        let user = Uuid::new_v4();
        let a = seeded_artifact(db.pool(), 'a').await;

        attach_user(db.pool(), user, a.id, true).await.unwrap();
        attach_user(db.pool(), user, a.id, false).await.unwrap();

        let (guides, total) = list(
            db.pool(),
            &Principal::User(user),
            ListOptions { saved_only: false, limit: 10, offset: 0 },
        )
        .await
        .unwrap();
        assert_eq!(total, 1);
        // First attach wins: the saved flag is untouched by the duplicate
        assert!(guides[0].is_saved);
    }

    #[tokio::test]
    async fn test_saved_subset_of_all() {
        let db = test_database().await;
        let user = Uuid::new_v4();
        let a = seeded_artifact(db.pool(), 'b').await;
        let b = seeded_artifact(db.pool(), 'c').await;

        attach_user(db.pool(), user, a.id, false).await.unwrap();
        attach_user(db.pool(), user, b.id, false).await.unwrap();
        set_saved(db.pool(), &Principal::User(user), b.id, true)
            .await
            .unwrap();

        let principal = Principal::User(user);
        let all = list(db.pool(), &principal, ListOptions { saved_only: false, limit: 10, offset: 0 })
            .await
            .unwrap();
        let saved = list(db.pool(), &principal, ListOptions { saved_only: true, limit: 10, offset: 0 })
            .await
            .unwrap();

        assert_eq!(all.1, 2);
        assert_eq!(saved.1, 1);
        assert_eq!(saved.0.len(), 1);
        assert_eq!(saved.0[0].artifact.id, b.id);
        assert!(saved.0.iter().all(|g| all.0.iter().any(|o| o.artifact.id == g.artifact.id)));
    }

    #[tokio::test]
    async fn test_set_saved_missing_row_is_not_found() {
        let db = test_database().await;
        let user = Uuid::new_v4();
        let a = seeded_artifact(db.pool(), 'd').await;

        match set_saved(db.pool(), &Principal::User(user), a.id, true).await {
            Err(Error::NotFound(_)) => {}
            other => panic!("expected NotFound, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_migration_moves_rows_and_freezes_session() {
        let db = test_database().await;
        let session = sessions::create(db.pool(), None).await.unwrap();
        let user = Uuid::new_v4();

        let a = seeded_artifact(db.pool(), 'e').await;
        let b = seeded_artifact(db.pool(), 'f').await;
        let c = seeded_artifact(db.pool(), '0').await;
        for artifact in [&a, &b, &c] {
            attach_session(db.pool(), session.id, artifact.id).await.unwrap();
        }

        let result = migrate(db.pool(), session.id, user).await.unwrap();
        assert_eq!(result.migrated_guides, 3);
        assert!(!result.already_migrated);

        // The user now owns all three
        let (_, user_total) = list(
            db.pool(),
            &Principal::User(user),
            ListOptions { saved_only: false, limit: 10, offset: 0 },
        )
        .await
        .unwrap();
        assert_eq!(user_total, 3);

        // The session owns nothing and is frozen
        let (_, session_total) = list(
            db.pool(),
            &Principal::Anonymous(session.id),
            ListOptions { saved_only: false, limit: 10, offset: 0 },
        )
        .await
        .unwrap();
        assert_eq!(session_total, 0);
        match attach_session(db.pool(), session.id, a.id).await {
            Err(Error::SessionExpired) => {}
            other => panic!("expected SessionExpired, got {other:?}"),
        }

        // Re-running the same migration is a no-op success
        let again = migrate(db.pool(), session.id, user).await.unwrap();
        assert!(again.already_migrated);
    }

    #[tokio::test]
    async fn test_sweep_removes_expired_rows() {
        let db = test_database().await;
        let session = sessions::create(db.pool(), None).await.unwrap();
        let a = seeded_artifact(db.pool(), '1').await;
        attach_session(db.pool(), session.id, a.id).await.unwrap();

        // Not expired yet
        assert_eq!(sweep_expired(db.pool()).await.unwrap(), 0);

        // Force the row into the past
        sqlx::query("UPDATE session_guides SET expires_at = $1")
            .bind(Utc::now() - Duration::hours(1))
            .execute(db.pool())
            .await
            .unwrap();
        assert_eq!(sweep_expired(db.pool()).await.unwrap(), 1);
    }
}
