use sqlx::PgPool;
use uuid::Uuid;

use super::{Task, TaskItems};

pub async fn create_task(
    pool: &PgPool,
    study_id: Uuid,
    scenario: &str,
    items: &TaskItems,
) -> Result<Task, sqlx::Error> {
    let (item_path, item_a_path, item_b_path) = match items {
        TaskItems::Single { path } => (Some(path.as_str()), None, None),
        TaskItems::Pair { a, b } => (None, Some(a.as_str()), Some(b.as_str())),
    };

    sqlx::query_as::<_, Task>(
        r#"
        INSERT INTO tasks (id, study_id, scenario, item_path, item_a_path, item_b_path)
        VALUES ($1, $2, $3, $4, $5, $6)
        RETURNING *
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(study_id)
    .bind(scenario)
    .bind(item_path)
    .bind(item_a_path)
    .bind(item_b_path)
    .fetch_one(pool)
    .await
}

pub async fn get_task(pool: &PgPool, task_id: Uuid) -> Result<Option<Task>, sqlx::Error> {
    sqlx::query_as::<_, Task>("SELECT * FROM tasks WHERE id = $1")
        .bind(task_id)
        .fetch_optional(pool)
        .await
}

/// All tasks of a study in creation order; `id` breaks timestamp ties so the
/// order is stable across calls.
pub async fn list_tasks(pool: &PgPool, study_id: Uuid) -> Result<Vec<Task>, sqlx::Error> {
    sqlx::query_as::<_, Task>(
        "SELECT * FROM tasks WHERE study_id = $1 ORDER BY created_at, id",
    )
    .bind(study_id)
    .fetch_all(pool)
    .await
}

pub async fn list_task_ids(pool: &PgPool, study_id: Uuid) -> Result<Vec<Uuid>, sqlx::Error> {
    sqlx::query_scalar::<_, Uuid>(
        "SELECT id FROM tasks WHERE study_id = $1 ORDER BY created_at, id",
    )
    .bind(study_id)
    .fetch_all(pool)
    .await
}
