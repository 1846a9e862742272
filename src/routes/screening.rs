use axum::{
    extract::{Path, State},
    Json,
};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;

use super::evaluation::{participant_for, precheck};
use super::load_study;
use crate::error::Result;
use crate::identity::ParticipantRef;
use crate::screening::{self, ScreeningAnswer, ScreeningOutcome};
use crate::state::AppState;

/// The study's calibration battery, without expected answers.
pub async fn screening_battery(
    State(state): State<Arc<AppState>>,
    Path(study_id): Path<Uuid>,
) -> Result<Json<serde_json::Value>> {
    let study = load_study(&state, study_id).await?;
    let tasks = screening::study_battery(&study)?;
    Ok(Json(json!({
        "version": study.config.screening_config_version,
        "mode": study.evaluation_mode,
        "pass_threshold": study.config.screening_pass_threshold,
        "tasks": tasks,
    })))
}

#[derive(Deserialize)]
pub struct ScreeningRequest {
    #[serde(flatten)]
    pub who: ParticipantRef,
    pub answers: Vec<ScreeningAnswer>,
}

pub async fn submit_screening(
    State(state): State<Arc<AppState>>,
    Path(study_id): Path<Uuid>,
    Json(req): Json<ScreeningRequest>,
) -> Result<Json<ScreeningOutcome>> {
    precheck(&req.who)?;
    let study = load_study(&state, study_id).await?;
    let participant = participant_for(&state, &study, &req.who).await?;

    let outcome = screening::submit_screening(
        state.pool.as_ref(),
        &state.sync,
        &study,
        &participant,
        &req.answers,
    )
    .await?;
    Ok(Json(outcome))
}
