//! Content store: immutable artifacts keyed by `(fingerprint, language)`
//!
//! Inserts are linearized by the unique index; a losing writer sees
//! `Conflict` and falls through to a re-read. Rows are never updated.

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use uuid::Uuid;

use super::{Artifact, InputKind, Language, StudyContent};
use crate::error::{Error, Result};

#[derive(sqlx::FromRow)]
struct GuideRow {
    id: String,
    fingerprint: String,
    input_kind: String,
    raw_input: Option<String>,
    language: String,
    content: String,
    created_at: DateTime<Utc>,
}

impl GuideRow {
    fn into_artifact(self) -> Result<Artifact> {
        let content: StudyContent = serde_json::from_str(&self.content)?;
        Ok(Artifact {
            id: Uuid::parse_str(&self.id)
                .map_err(|e| Error::Internal(format!("invalid guide id: {e}")))?,
            fingerprint: self.fingerprint,
            input_kind: InputKind::from_str(&self.input_kind)?,
            raw_input: self.raw_input,
            language: Language::from_str(&self.language)?,
            content,
            created_at: self.created_at,
        })
    }
}

/// Look up a cached artifact by fingerprint and language.
pub async fn find(
    pool: &SqlitePool,
    fingerprint: &str,
    language: Language,
) -> Result<Option<Artifact>> {
    let row = sqlx::query_as::<_, GuideRow>(
        r#"
        SELECT id, fingerprint, input_kind, raw_input, language, content, created_at
        FROM study_guides
        WHERE fingerprint = $1 AND language = $2
        "#,
    )
    .bind(fingerprint)
    .bind(language.as_str())
    .fetch_optional(pool)
    .await?;

    row.map(GuideRow::into_artifact).transpose()
}

/// Look up an artifact by id.
pub async fn find_by_id(pool: &SqlitePool, id: Uuid) -> Result<Option<Artifact>> {
    let row = sqlx::query_as::<_, GuideRow>(
        r#"
        SELECT id, fingerprint, input_kind, raw_input, language, content, created_at
        FROM study_guides
        WHERE id = $1
        "#,
    )
    .bind(id.to_string())
    .fetch_optional(pool)
    .await?;

    row.map(GuideRow::into_artifact).transpose()
}

/// Insert a new artifact. Fails with `Conflict` when `(fingerprint, language)`
/// already exists; callers must retry the read.
pub async fn insert(pool: &SqlitePool, artifact: &Artifact) -> Result<()> {
    let content = serde_json::to_string(&artifact.content)?;

    let result = sqlx::query(
        r#"
        INSERT INTO study_guides (id, fingerprint, input_kind, raw_input, language, content, created_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        "#,
    )
    .bind(artifact.id.to_string())
    .bind(&artifact.fingerprint)
    .bind(artifact.input_kind.as_str())
    .bind(&artifact.raw_input)
    .bind(artifact.language.as_str())
    .bind(content)
    .bind(artifact.created_at)
    .execute(pool)
    .await;

    match result {
        Ok(_) => Ok(()),
        Err(sqlx::Error::Database(db)) if db.is_unique_violation() => Err(Error::Conflict(
            format!("artifact exists for ({}, {})", artifact.fingerprint, artifact.language.as_str()),
        )),
        Err(e) => Err(e.into()),
    }
}

/// Delete an artifact only if no ownership row references it.
/// Returns whether a row was deleted.
pub async fn delete_orphan(pool: &SqlitePool, artifact_id: Uuid) -> Result<bool> {
    let result = sqlx::query(
        r#"
        DELETE FROM study_guides
        WHERE id = $1
          AND NOT EXISTS (SELECT 1 FROM user_guides WHERE guide_id = $1)
          AND NOT EXISTS (SELECT 1 FROM session_guides WHERE guide_id = $1)
        "#,
    )
    .bind(artifact_id.to_string())
    .execute(pool)
    .await?;

    Ok(result.rows_affected() > 0)
}
