use sqlx::types::Json;
use sqlx::PgPool;
use uuid::Uuid;

use super::{EvaluationMode, Study, StudyConfig, StudyStatus};

pub async fn create_study(
    pool: &PgPool,
    name: &str,
    mode: EvaluationMode,
    config: &StudyConfig,
    external_study_id: Option<&str>,
) -> Result<Study, sqlx::Error> {
    sqlx::query_as::<_, Study>(
        r#"
        INSERT INTO studies (id, name, status, evaluation_mode, config, external_study_id)
        VALUES ($1, $2, 'draft', $3, $4, $5)
        RETURNING *
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(name)
    .bind(mode.as_str())
    .bind(Json(config))
    .bind(external_study_id)
    .fetch_one(pool)
    .await
}

pub async fn get_study(pool: &PgPool, study_id: Uuid) -> Result<Option<Study>, sqlx::Error> {
    sqlx::query_as::<_, Study>("SELECT * FROM studies WHERE id = $1")
        .bind(study_id)
        .fetch_optional(pool)
        .await
}

/// Operator-driven status change.
pub async fn set_status(
    pool: &PgPool,
    study_id: Uuid,
    status: StudyStatus,
) -> Result<Option<Study>, sqlx::Error> {
    sqlx::query_as::<_, Study>(
        "UPDATE studies SET status = $2, updated_at = NOW() WHERE id = $1 RETURNING *",
    )
    .bind(study_id)
    .bind(status.as_str())
    .fetch_optional(pool)
    .await
}

/// Applies a status mapped from the recruitment platform in one statement,
/// stamping `started_at` / `completed_at` only where they are unset.
pub async fn apply_synced_status(
    pool: &PgPool,
    study_id: Uuid,
    status: StudyStatus,
    stamp_started: bool,
    stamp_completed: bool,
) -> Result<Option<Study>, sqlx::Error> {
    sqlx::query_as::<_, Study>(
        r#"
        UPDATE studies
        SET status = $2,
            started_at = CASE WHEN $3 THEN COALESCE(started_at, NOW()) ELSE started_at END,
            completed_at = CASE WHEN $4 THEN COALESCE(completed_at, NOW()) ELSE completed_at END,
            updated_at = NOW()
        WHERE id = $1
        RETURNING *
        "#,
    )
    .bind(study_id)
    .bind(status.as_str())
    .bind(stamp_started)
    .bind(stamp_completed)
    .fetch_optional(pool)
    .await
}

/// Archival is independent of status.
pub async fn set_archived(pool: &PgPool, study_id: Uuid, archived: bool) -> Result<bool, sqlx::Error> {
    let result = sqlx::query("UPDATE studies SET archived = $2, updated_at = NOW() WHERE id = $1")
        .bind(study_id)
        .bind(archived)
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}
