mod evaluation;
mod screening;
mod sync;

pub use evaluation::*;
pub use screening::*;
pub use sync::*;

use axum::{
    routing::{get, post},
    Json, Router,
};
use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;

use crate::db::{self, Study, Task};
use crate::error::{Error, Result};
use crate::state::AppState;

pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/studies/:study_id/participants/resolve", post(resolve_participant))
        .route("/api/studies/:study_id/participants/external", post(enroll_participant))
        .route("/api/studies/:study_id/next-task", get(next_task))
        .route("/api/studies/:study_id/screening", get(screening_battery).post(submit_screening))
        .route("/api/studies/:study_id/results", get(study_results))
        .route("/api/studies/:study_id/sync/status", post(sync_status))
        .route("/api/studies/:study_id/sync/submissions", post(sync_submissions))
        .route("/api/studies/:study_id/sync/review", post(review_submissions))
        .route("/api/tasks/:task_id/draft", get(get_draft).put(save_draft))
        .route("/api/tasks/:task_id/submit", post(submit_task))
        .route("/api/participants/:participant_id/reject", post(reject_participant))
        .route("/api/participants/:participant_id/approve", post(approve_participant))
        .with_state(state)
}

pub async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

async fn load_study(state: &AppState, study_id: Uuid) -> Result<Study> {
    db::studies::get_study(state.pool.as_ref(), study_id)
        .await?
        .ok_or_else(|| Error::NotFound(format!("study {}", study_id)))
}

async fn load_task(state: &AppState, task_id: Uuid) -> Result<Task> {
    db::tasks::get_task(state.pool.as_ref(), task_id)
        .await?
        .ok_or_else(|| Error::NotFound(format!("task {}", task_id)))
}
