use axum::{
    extract::{Path, State},
    Json,
};
use serde::Deserialize;
use std::sync::Arc;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::state::AppState;
use crate::sync::{StatusPullReport, SyncReport, TransitionOutcome};

pub async fn sync_status(
    State(state): State<Arc<AppState>>,
    Path(study_id): Path<Uuid>,
) -> Result<Json<StatusPullReport>> {
    Ok(Json(state.sync.pull_status(study_id).await?))
}

pub async fn sync_submissions(
    State(state): State<Arc<AppState>>,
    Path(study_id): Path<Uuid>,
) -> Result<Json<SyncReport>> {
    Ok(Json(state.sync.sync_submissions(study_id).await?))
}

pub async fn review_submissions(
    State(state): State<Arc<AppState>>,
    Path(study_id): Path<Uuid>,
) -> Result<Json<SyncReport>> {
    Ok(Json(state.sync.review_awaiting(study_id).await?))
}

#[derive(Deserialize)]
pub struct RejectRequest {
    pub reason: String,
}

pub async fn reject_participant(
    State(state): State<Arc<AppState>>,
    Path(participant_id): Path<String>,
    Json(req): Json<RejectRequest>,
) -> Result<Json<TransitionOutcome>> {
    let reason = req.reason.trim();
    if reason.is_empty() {
        return Err(Error::ValidationFailed("rejection reason required".to_string()));
    }
    Ok(Json(state.sync.reject_participant(&participant_id, reason).await?))
}

pub async fn approve_participant(
    State(state): State<Arc<AppState>>,
    Path(participant_id): Path<String>,
) -> Result<Json<TransitionOutcome>> {
    Ok(Json(state.sync.approve_participant(&participant_id).await?))
}
