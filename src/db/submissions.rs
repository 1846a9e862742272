use sqlx::PgPool;
use uuid::Uuid;

use super::{Submission, SubmissionWrite};

/// Upserts a draft. `None` means the existing row is already completed and
/// was left untouched.
pub async fn upsert_draft(
    pool: &PgPool,
    write: &SubmissionWrite<'_>,
) -> Result<Option<Submission>, sqlx::Error> {
    sqlx::query_as::<_, Submission>(
        r#"
        INSERT INTO submissions (id, task_id, participant_id, status, payload, winner,
                                 completion_time_seconds, client_metadata, last_saved_at)
        VALUES ($1, $2, $3, 'draft', $4, $5, $6, $7, NOW())
        ON CONFLICT (task_id, participant_id) DO UPDATE SET
            payload = EXCLUDED.payload,
            winner = EXCLUDED.winner,
            completion_time_seconds = EXCLUDED.completion_time_seconds,
            client_metadata = EXCLUDED.client_metadata,
            last_saved_at = GREATEST(submissions.last_saved_at, EXCLUDED.last_saved_at)
        WHERE submissions.status <> 'completed'
        RETURNING *
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(write.task_id)
    .bind(write.participant_id)
    .bind(write.payload)
    .bind(write.winner)
    .bind(write.completion_time_seconds)
    .bind(write.client_metadata)
    .fetch_optional(pool)
    .await
}

/// Upserts straight to completed. `None` means a completed row already
/// exists; its payload is not modified.
pub async fn upsert_completed(
    pool: &PgPool,
    write: &SubmissionWrite<'_>,
) -> Result<Option<Submission>, sqlx::Error> {
    sqlx::query_as::<_, Submission>(
        r#"
        INSERT INTO submissions (id, task_id, participant_id, status, payload, winner,
                                 completion_time_seconds, client_metadata, last_saved_at, completed_at)
        VALUES ($1, $2, $3, 'completed', $4, $5, $6, $7, NOW(), NOW())
        ON CONFLICT (task_id, participant_id) DO UPDATE SET
            status = 'completed',
            payload = EXCLUDED.payload,
            winner = EXCLUDED.winner,
            completion_time_seconds = EXCLUDED.completion_time_seconds,
            client_metadata = EXCLUDED.client_metadata,
            last_saved_at = GREATEST(submissions.last_saved_at, EXCLUDED.last_saved_at),
            completed_at = EXCLUDED.completed_at
        WHERE submissions.status <> 'completed'
        RETURNING *
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(write.task_id)
    .bind(write.participant_id)
    .bind(write.payload)
    .bind(write.winner)
    .bind(write.completion_time_seconds)
    .bind(write.client_metadata)
    .fetch_optional(pool)
    .await
}

pub async fn get_submission(
    pool: &PgPool,
    task_id: Uuid,
    participant_id: &str,
) -> Result<Option<Submission>, sqlx::Error> {
    sqlx::query_as::<_, Submission>(
        "SELECT * FROM submissions WHERE task_id = $1 AND participant_id = $2",
    )
    .bind(task_id)
    .bind(participant_id)
    .fetch_optional(pool)
    .await
}

pub async fn completed_task_ids(pool: &PgPool, participant_id: &str) -> Result<Vec<Uuid>, sqlx::Error> {
    sqlx::query_scalar::<_, Uuid>(
        "SELECT task_id FROM submissions WHERE participant_id = $1 AND status = 'completed'",
    )
    .bind(participant_id)
    .fetch_all(pool)
    .await
}

pub async fn started_task_count(pool: &PgPool, participant_id: &str) -> Result<i64, sqlx::Error> {
    sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM submissions WHERE participant_id = $1")
        .bind(participant_id)
        .fetch_one(pool)
        .await
}

pub async fn completed_for_participant(
    pool: &PgPool,
    participant_id: &str,
) -> Result<Vec<Submission>, sqlx::Error> {
    sqlx::query_as::<_, Submission>(
        r#"
        SELECT * FROM submissions
        WHERE participant_id = $1 AND status = 'completed'
        ORDER BY completed_at, id
        "#,
    )
    .bind(participant_id)
    .fetch_all(pool)
    .await
}

/// Completed submissions for every task of a study.
pub async fn completed_for_study(pool: &PgPool, study_id: Uuid) -> Result<Vec<Submission>, sqlx::Error> {
    sqlx::query_as::<_, Submission>(
        r#"
        SELECT s.* FROM submissions s
        JOIN tasks t ON t.id = s.task_id
        WHERE t.study_id = $1 AND s.status = 'completed'
        ORDER BY t.created_at, t.id, s.completed_at
        "#,
    )
    .bind(study_id)
    .fetch_all(pool)
    .await
}
