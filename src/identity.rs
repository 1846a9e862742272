//! Maps an inbound request to a stable participant.
//!
//! Registered participants are looked up by id. Everyone else is identified
//! by an opaque session token: `anon-<token>` is created on first sight with
//! a snapshot of the study's tasks, through the store's create-if-absent
//! primitive so racing first requests converge on one record.

use regex::Regex;
use serde::Deserialize;
use std::sync::OnceLock;
use tracing::info;
use uuid::Uuid;

use crate::db::{
    self, participants::ParticipantKey, NewParticipant, Participant, Study, ANONYMOUS_PREFIX,
};
use crate::error::{Error, Result};

/// Who is making a request. Either field may be absent.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ParticipantRef {
    pub participant_id: Option<String>,
    pub session_token: Option<String>,
}

fn token_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[A-Za-z0-9_-]{8,128}$").expect("static pattern"))
}

fn external_id_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[A-Za-z0-9_-]{1,64}$").expect("static pattern"))
}

/// Shape check only; where the token came from is not our concern.
pub fn validate_session_token(token: &str) -> Result<()> {
    if token_pattern().is_match(token) {
        Ok(())
    } else {
        Err(Error::ValidationFailed(
            "session token must be 8-128 characters of [A-Za-z0-9_-]".to_string(),
        ))
    }
}

pub fn anonymous_id(session_token: &str) -> String {
    format!("{}{}", ANONYMOUS_PREFIX, session_token)
}

/// Per-participant placeholder for the unique external identifier column.
fn anonymous_external_id(session_token: &str) -> String {
    format!("anonymous-{}", session_token)
}

pub async fn resolve(pool: &sqlx::PgPool, study: &Study, who: &ParticipantRef) -> Result<Participant> {
    if let Some(id) = who.participant_id.as_deref().filter(|id| !id.is_empty()) {
        if let Some(participant) = db::participants::get_participant(pool, id).await? {
            if participant.study_id == study.id {
                return Ok(participant);
            }
        }
    }

    let token = who
        .session_token
        .as_deref()
        .ok_or_else(|| Error::ValidationFailed("participant_id or session_token required".to_string()))?;
    validate_session_token(token)?;

    let id = anonymous_id(token);
    if let Some(existing) = db::participants::get_participant(pool, &id).await? {
        return ensure_same_study(existing, study);
    }

    let assigned_task_ids = db::tasks::list_task_ids(pool, study.id).await?;
    let new = NewParticipant {
        id,
        study_id: study.id,
        external_id: Some(anonymous_external_id(token)),
        session_id: token.to_string(),
        assigned_task_ids,
    };

    let (participant, created) = get_or_create(pool, &new, ParticipantKey::Id).await?;
    if created {
        info!(
            "Created anonymous participant {} with {} tasks",
            participant.id,
            participant.assigned_task_ids.len()
        );
    }
    ensure_same_study(participant, study)
}

/// Enrolment of a participant sent by the recruitment platform.
pub async fn enroll_external(
    pool: &sqlx::PgPool,
    study: &Study,
    external_participant_id: &str,
    session_id: &str,
) -> Result<Participant> {
    if !external_id_pattern().is_match(external_participant_id) {
        return Err(Error::ValidationFailed("malformed external participant id".to_string()));
    }
    validate_session_token(session_id)?;
    get_or_create_external(pool, study, external_participant_id, session_id).await
}

/// Get-or-create keyed by external identifier; shared by enrolment and the
/// export sync.
pub async fn get_or_create_external(
    pool: &sqlx::PgPool,
    study: &Study,
    external_participant_id: &str,
    session_id: &str,
) -> Result<Participant> {
    if let Some(existing) =
        db::participants::get_participant_by_external_id(pool, external_participant_id).await?
    {
        return ensure_same_study(existing, study);
    }

    let assigned_task_ids = db::tasks::list_task_ids(pool, study.id).await?;
    let new = NewParticipant {
        id: Uuid::new_v4().to_string(),
        study_id: study.id,
        external_id: Some(external_participant_id.to_string()),
        session_id: session_id.to_string(),
        assigned_task_ids,
    };

    let (participant, created) = get_or_create(pool, &new, ParticipantKey::ExternalId).await?;
    if created {
        info!(
            "Enrolled external participant {} as {}",
            external_participant_id, participant.id
        );
    }
    ensure_same_study(participant, study)
}

async fn get_or_create(
    pool: &sqlx::PgPool,
    new: &NewParticipant,
    key: ParticipantKey,
) -> Result<(Participant, bool)> {
    match db::participants::get_or_create_participant(pool, new, key).await {
        Ok(found) => Ok(found),
        Err(sqlx::Error::RowNotFound) => Err(Error::Conflict(
            "session is already bound to another participant".to_string(),
        )),
        Err(e) => Err(e.into()),
    }
}

fn ensure_same_study(participant: Participant, study: &Study) -> Result<Participant> {
    if participant.study_id == study.id {
        Ok(participant)
    } else {
        Err(Error::Conflict(format!(
            "participant {} belongs to a different study",
            participant.id
        )))
    }
}
