use sqlx::PgPool;
use uuid::Uuid;

use super::{NewParticipant, Participant, ParticipantStatus, ScreeningStatus};

/// Which unique column identifies the participant a create attempt races on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParticipantKey {
    Id,
    ExternalId,
}

pub async fn get_participant(pool: &PgPool, id: &str) -> Result<Option<Participant>, sqlx::Error> {
    sqlx::query_as::<_, Participant>("SELECT * FROM participants WHERE id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await
}

pub async fn get_participant_by_external_id(
    pool: &PgPool,
    external_id: &str,
) -> Result<Option<Participant>, sqlx::Error> {
    sqlx::query_as::<_, Participant>("SELECT * FROM participants WHERE external_id = $1")
        .bind(external_id)
        .fetch_optional(pool)
        .await
}

/// Create-if-absent, else fetch. A concurrent creator that loses the insert
/// race gets the winner's row back with `created == false`.
///
/// Returns `RowNotFound` when the insert conflicted on a different unique
/// column than `key` (e.g. a session id already bound to someone else).
pub async fn get_or_create_participant(
    pool: &PgPool,
    new: &NewParticipant,
    key: ParticipantKey,
) -> Result<(Participant, bool), sqlx::Error> {
    let inserted = sqlx::query_as::<_, Participant>(
        r#"
        INSERT INTO participants (id, study_id, external_id, session_id, assigned_task_ids)
        VALUES ($1, $2, $3, $4, $5)
        ON CONFLICT DO NOTHING
        RETURNING *
        "#,
    )
    .bind(&new.id)
    .bind(new.study_id)
    .bind(&new.external_id)
    .bind(&new.session_id)
    .bind(&new.assigned_task_ids)
    .fetch_optional(pool)
    .await?;

    if let Some(participant) = inserted {
        return Ok((participant, true));
    }

    // Separate statement so the fetch sees the row committed by the winner.
    let existing = match (key, new.external_id.as_deref()) {
        (ParticipantKey::ExternalId, Some(external_id)) => {
            get_participant_by_external_id(pool, external_id).await?
        }
        _ => get_participant(pool, &new.id).await?,
    };

    existing.map(|p| (p, false)).ok_or(sqlx::Error::RowNotFound)
}

/// Transitions an active participant to completed. `None` when the
/// participant was not active (already completed, rejected, ...).
pub async fn mark_completed(pool: &PgPool, id: &str) -> Result<Option<Participant>, sqlx::Error> {
    sqlx::query_as::<_, Participant>(
        r#"
        UPDATE participants
        SET status = 'completed', completed_at = COALESCE(completed_at, NOW()), updated_at = NOW()
        WHERE id = $1 AND status = 'active'
        RETURNING *
        "#,
    )
    .bind(id)
    .fetch_optional(pool)
    .await
}

/// Records a screening verdict. Only a participant still pending screening
/// is updated, so two racing verdicts cannot both land.
pub async fn record_screening(
    pool: &PgPool,
    id: &str,
    verdict: ScreeningStatus,
    version: &str,
    status: ParticipantStatus,
    rejection_reason: Option<&str>,
) -> Result<Option<Participant>, sqlx::Error> {
    sqlx::query_as::<_, Participant>(
        r#"
        UPDATE participants
        SET screening_status = $2,
            screening_version = $3,
            screening_attempts = screening_attempts + 1,
            status = $4,
            rejection_reason = COALESCE($5, rejection_reason),
            rejected_at = CASE WHEN $5 IS NULL THEN rejected_at ELSE COALESCE(rejected_at, NOW()) END,
            updated_at = NOW()
        WHERE id = $1 AND screening_status = 'pending'
        RETURNING *
        "#,
    )
    .bind(id)
    .bind(verdict.as_str())
    .bind(version)
    .bind(status.as_str())
    .bind(rejection_reason)
    .fetch_optional(pool)
    .await
}

pub async fn mark_rejected(
    pool: &PgPool,
    id: &str,
    reason: &str,
) -> Result<Option<Participant>, sqlx::Error> {
    sqlx::query_as::<_, Participant>(
        r#"
        UPDATE participants
        SET status = 'rejected',
            rejection_reason = $2,
            rejected_at = COALESCE(rejected_at, NOW()),
            updated_at = NOW()
        WHERE id = $1
        RETURNING *
        "#,
    )
    .bind(id)
    .bind(reason)
    .fetch_optional(pool)
    .await
}

/// Top-level key merge; existing keys absent from `patch` are kept.
pub async fn merge_metadata(
    pool: &PgPool,
    id: &str,
    patch: &serde_json::Value,
) -> Result<Option<Participant>, sqlx::Error> {
    sqlx::query_as::<_, Participant>(
        r#"
        UPDATE participants
        SET metadata = metadata || $2, updated_at = NOW()
        WHERE id = $1
        RETURNING *
        "#,
    )
    .bind(id)
    .bind(patch)
    .fetch_optional(pool)
    .await
}

/// Writes one export row's worth of external state. A `None` status leaves
/// the mirrored status as it was.
pub async fn apply_external_state(
    pool: &PgPool,
    id: &str,
    external_status: Option<&str>,
    patch: &serde_json::Value,
) -> Result<Option<Participant>, sqlx::Error> {
    sqlx::query_as::<_, Participant>(
        r#"
        UPDATE participants
        SET external_status = COALESCE($2, external_status),
            metadata = metadata || $3,
            updated_at = NOW()
        WHERE id = $1
        RETURNING *
        "#,
    )
    .bind(id)
    .bind(external_status)
    .bind(patch)
    .fetch_optional(pool)
    .await
}

pub async fn count_by_status(pool: &PgPool, study_id: Uuid) -> Result<Vec<(String, i64)>, sqlx::Error> {
    sqlx::query_as::<_, (String, i64)>(
        "SELECT status, COUNT(*) FROM participants WHERE study_id = $1 GROUP BY status ORDER BY status",
    )
    .bind(study_id)
    .fetch_all(pool)
    .await
}
