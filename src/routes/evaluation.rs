use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;

use super::{load_study, load_task};
use crate::db::{Participant, ParticipantStatus, ScreeningStatus, Study};
use crate::error::{Error, Result};
use crate::identity::{self, ParticipantRef};
use crate::lifecycle::{self, NextTask, Progress, SubmissionInput};
use crate::state::AppState;

/// What a participant may see about themselves. Metadata stays operator-only:
/// it carries platform sync diagnostics.
#[derive(Debug, Serialize)]
pub struct ParticipantView {
    pub id: String,
    pub study_id: Uuid,
    pub status: ParticipantStatus,
    pub screening_status: ScreeningStatus,
    pub assigned_task_ids: Vec<Uuid>,
    pub progress: Progress,
}

impl ParticipantView {
    fn new(participant: Participant, progress: Progress) -> Self {
        Self {
            id: participant.id,
            study_id: participant.study_id,
            status: participant.status,
            screening_status: participant.screening_status,
            assigned_task_ids: participant.assigned_task_ids,
            progress,
        }
    }
}

/// Rejects a malformed anonymous reference before any lookup happens.
pub(super) fn precheck(who: &ParticipantRef) -> Result<()> {
    if who.participant_id.as_deref().is_some_and(|id| !id.is_empty()) {
        return Ok(());
    }
    match who.session_token.as_deref() {
        Some(token) => identity::validate_session_token(token),
        None => Err(Error::ValidationFailed(
            "participant_id or session_token required".to_string(),
        )),
    }
}

pub(super) async fn participant_for(state: &AppState, study: &Study, who: &ParticipantRef) -> Result<Participant> {
    identity::resolve(state.pool.as_ref(), study, who).await
}

pub async fn resolve_participant(
    State(state): State<Arc<AppState>>,
    Path(study_id): Path<Uuid>,
    Json(who): Json<ParticipantRef>,
) -> Result<Json<serde_json::Value>> {
    precheck(&who)?;
    let study = load_study(&state, study_id).await?;
    let participant = participant_for(&state, &study, &who).await?;
    let pool = state.pool.as_ref();

    let next = lifecycle::next_task(pool, &study, &participant).await?;
    let progress = lifecycle::progress(pool, &participant).await?;

    Ok(Json(json!({
        "participant": ParticipantView::new(participant, progress),
        "progress": progress,
        "next": next,
    })))
}

#[derive(Deserialize)]
pub struct EnrollRequest {
    #[serde(alias = "PROLIFIC_PID")]
    pub external_participant_id: String,
    #[serde(alias = "SESSION_ID")]
    pub session_id: String,
}

pub async fn enroll_participant(
    State(state): State<Arc<AppState>>,
    Path(study_id): Path<Uuid>,
    Json(req): Json<EnrollRequest>,
) -> Result<Json<ParticipantView>> {
    let study = load_study(&state, study_id).await?;
    let pool = state.pool.as_ref();
    let participant =
        identity::enroll_external(pool, &study, &req.external_participant_id, &req.session_id).await?;
    let progress = lifecycle::progress(pool, &participant).await?;
    Ok(Json(ParticipantView::new(participant, progress)))
}

pub async fn next_task(
    State(state): State<Arc<AppState>>,
    Path(study_id): Path<Uuid>,
    Query(who): Query<ParticipantRef>,
) -> Result<Json<NextTask>> {
    precheck(&who)?;
    let study = load_study(&state, study_id).await?;
    let participant = participant_for(&state, &study, &who).await?;
    let next = lifecycle::next_task(state.pool.as_ref(), &study, &participant).await?;
    Ok(Json(next))
}

#[derive(Deserialize)]
pub struct TaskWrite {
    #[serde(flatten)]
    pub who: ParticipantRef,
    #[serde(flatten)]
    pub input: SubmissionInput,
}

pub async fn get_draft(
    State(state): State<Arc<AppState>>,
    Path(task_id): Path<Uuid>,
    Query(who): Query<ParticipantRef>,
) -> Result<Json<serde_json::Value>> {
    precheck(&who)?;
    let task = load_task(&state, task_id).await?;
    let study = load_study(&state, task.study_id).await?;
    let participant = participant_for(&state, &study, &who).await?;

    let draft = lifecycle::get_draft(state.pool.as_ref(), &task, &participant).await?;
    Ok(Json(json!({ "task": task, "draft": draft })))
}

pub async fn save_draft(
    State(state): State<Arc<AppState>>,
    Path(task_id): Path<Uuid>,
    Json(req): Json<TaskWrite>,
) -> Result<Json<serde_json::Value>> {
    precheck(&req.who)?;
    let task = load_task(&state, task_id).await?;
    let study = load_study(&state, task.study_id).await?;
    let participant = participant_for(&state, &study, &req.who).await?;

    let draft = lifecycle::save_draft(state.pool.as_ref(), &task, &participant, &req.input).await?;
    Ok(Json(json!({ "saved": true, "last_saved_at": draft.last_saved_at })))
}

pub async fn submit_task(
    State(state): State<Arc<AppState>>,
    Path(task_id): Path<Uuid>,
    Json(req): Json<TaskWrite>,
) -> Result<Json<serde_json::Value>> {
    precheck(&req.who)?;
    let task = load_task(&state, task_id).await?;
    let study = load_study(&state, task.study_id).await?;
    let participant = participant_for(&state, &study, &req.who).await?;

    let completion = lifecycle::submit(state.pool.as_ref(), &study, &task, &participant, &req.input).await?;
    let next_task_id = match completion.next {
        NextTask::Task(id) => Some(id),
        NextTask::Screening | NextTask::Done => None,
    };

    Ok(Json(json!({
        "submission_id": completion.submission.id,
        "winner": completion.submission.winner,
        "participant_completed": completion.participant_completed,
        "next_task_id": next_task_id,
        "done": completion.next == NextTask::Done,
    })))
}

pub async fn study_results(
    State(state): State<Arc<AppState>>,
    Path(study_id): Path<Uuid>,
) -> Result<Json<lifecycle::StudyResults>> {
    let study = load_study(&state, study_id).await?;
    let results = lifecycle::study_results(state.pool.as_ref(), &study).await?;
    Ok(Json(results))
}
