//! Reconciliation with the external recruitment platform.
//!
//! Every platform call is bounded by the configured timeout. Local state is
//! the side that must never be held hostage: rejections are committed before
//! the platform is asked, and platform failures end up as participant
//! metadata or as per-row diagnostics in a [`SyncReport`].

pub mod export;
pub mod status_map;

use chrono::Utc;
use serde::Serialize;
use serde_json::{json, Map, Value};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::db::{self, DbPool, Participant, ParticipantStatus, Study, StudyStatus};
use crate::error::{Error, Result};
use crate::identity;
use crate::platform::{ExportRow, RecruitmentPlatform, RejectionCategory, SubmissionAction};
use crate::quality::{self, QualityReport};
use status_map::{map_status, ExternalStudyStatus};

/// Error messages kept in a report; the counts stay exact.
pub const MAX_REPORTED_ERRORS: usize = 10;

pub const QUALITY_REJECTION_REASON: &str = "Evaluations did not meet quality standards";

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SyncReport {
    pub processed: usize,
    pub updated: usize,
    pub failed: usize,
    pub errors: Vec<String>,
}

impl SyncReport {
    fn record_failure(&mut self, message: String) {
        self.failed += 1;
        if self.errors.len() < MAX_REPORTED_ERRORS {
            self.errors.push(message);
        }
    }

    fn into_result(self) -> Result<SyncReport> {
        if self.failed > 0 {
            Err(Error::PartialSyncFailure(self))
        } else {
            Ok(self)
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusPullReport {
    pub study_id: Uuid,
    pub external_status: String,
    pub previous: StudyStatus,
    pub current: StudyStatus,
    pub changed: bool,
    /// False when the platform status is not in the mapping table.
    pub recognized: bool,
}

/// What happened on the platform side of an approve/reject.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExternalOutcome {
    pub ok: bool,
    pub submission_id: Option<String>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TransitionOutcome {
    pub participant: Participant,
    pub external: ExternalOutcome,
}

pub struct SyncEngine {
    pool: DbPool,
    platform: Option<Arc<dyn RecruitmentPlatform>>,
    timeout: Duration,
}

impl SyncEngine {
    pub fn new(pool: DbPool, platform: Option<Arc<dyn RecruitmentPlatform>>, timeout: Duration) -> Self {
        Self {
            pool,
            platform,
            timeout,
        }
    }

    fn platform(&self) -> std::result::Result<&Arc<dyn RecruitmentPlatform>, String> {
        self.platform
            .as_ref()
            .ok_or_else(|| "recruitment platform not configured".to_string())
    }

    /// Runs a platform call under the timeout, flattening both failure kinds
    /// into a message.
    async fn call<T>(
        &self,
        what: &str,
        fut: impl Future<Output = anyhow::Result<T>>,
    ) -> std::result::Result<T, String> {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(format!("{}: {:#}", what, e)),
            Err(_) => Err(format!("{}: timed out after {}s", what, self.timeout.as_secs_f64())),
        }
    }

    async fn load_study(&self, study_id: Uuid) -> Result<Study> {
        db::studies::get_study(&self.pool, study_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("study {}", study_id)))
    }

    fn external_ref(study: &Study) -> Result<&str> {
        study
            .external_study_id
            .as_deref()
            .ok_or_else(|| Error::ValidationFailed(format!("study {} has no external study reference", study.id)))
    }

    async fn fetch_export(&self, external_study_id: &str) -> std::result::Result<Vec<ExportRow>, String> {
        let platform = self.platform()?;
        self.call("fetch submissions export", platform.submissions_export(external_study_id))
            .await
    }

    /// Pulls the platform's study status and applies it through the mapping
    /// table. A failed or timed-out pull changes nothing and is an error.
    pub async fn pull_status(&self, study_id: Uuid) -> Result<StatusPullReport> {
        let study = self.load_study(study_id).await?;
        let external_id = Self::external_ref(&study)?;

        let platform = self.platform().map_err(Error::ExternalUnavailable)?;
        let raw = self
            .call("fetch study status", platform.study_status(external_id))
            .await
            .map_err(|e| {
                warn!("Status pull for study {} failed: {}", study.id, e);
                Error::ExternalUnavailable(e)
            })?;

        let parsed = ExternalStudyStatus::parse(&raw);
        let change = parsed.and_then(|status| map_status(status, &study));

        let current = match change {
            Some(change) => {
                let updated = db::studies::apply_synced_status(
                    &self.pool,
                    study.id,
                    change.status,
                    change.stamp_started,
                    change.stamp_completed,
                )
                .await?
                .ok_or_else(|| Error::NotFound(format!("study {}", study.id)))?;
                info!(
                    "Study {} status {} -> {} (platform: {})",
                    study.id, study.status, updated.status, raw
                );
                updated.status
            }
            None => {
                if parsed.is_none() {
                    warn!("Unknown platform status '{}' for study {}; left unchanged", raw, study.id);
                } else {
                    debug!("Study {} already reflects platform status {}", study.id, raw);
                }
                study.status
            }
        };

        Ok(StatusPullReport {
            study_id: study.id,
            external_status: raw,
            previous: study.status,
            current,
            changed: change.is_some(),
            recognized: parsed.is_some(),
        })
    }

    /// Mirrors the platform's submission export onto local participants.
    /// Rows are independent: a bad row is counted and skipped. Replaying the
    /// same export performs no writes.
    pub async fn sync_submissions(&self, study_id: Uuid) -> Result<SyncReport> {
        let study = self.load_study(study_id).await?;
        let external_id = Self::external_ref(&study)?;

        let rows = self.fetch_export(external_id).await.map_err(|e| {
            warn!("Export sync for study {} failed: {}", study.id, e);
            Error::ExternalUnavailable(e)
        })?;

        let mut report = SyncReport::default();
        for (index, row) in rows.iter().enumerate() {
            match self.sync_row(&study, row).await {
                Ok(changed) => {
                    report.processed += 1;
                    if changed {
                        report.updated += 1;
                    }
                }
                Err(e) => {
                    warn!("Export row {} for study {} failed: {}", index, study.id, e);
                    report.record_failure(format!("row {}: {}", index, e));
                }
            }
        }

        info!(
            "Export sync for study {}: {} processed, {} updated, {} failed",
            study.id, report.processed, report.updated, report.failed
        );
        report.into_result()
    }

    async fn sync_row(&self, study: &Study, row: &ExportRow) -> Result<bool> {
        let external_id = row
            .participant_id()
            .ok_or_else(|| Error::ValidationFailed("missing participant_id column".to_string()))?;
        let session_id = row
            .text("session_id")
            .unwrap_or_else(|| format!("external-{}", external_id));

        let participant =
            identity::get_or_create_external(&self.pool, study, &external_id, &session_id).await?;

        let status = export::external_status(row);
        let mut patch = export::row_patch(row);

        let status_unchanged = status.is_none() || status == participant.external_status;
        if status_unchanged && export::is_noop(&participant.metadata, &patch) {
            debug!("Participant {} already matches export", participant.id);
            return Ok(false);
        }

        patch.insert("external_synced_at".to_string(), Value::from(Utc::now().to_rfc3339()));
        db::participants::apply_external_state(
            &self.pool,
            &participant.id,
            status.as_deref(),
            &Value::Object(patch),
        )
        .await?;
        Ok(true)
    }

    /// Rejects a participant locally, then asks the platform to reject their
    /// submission. The platform outcome is recorded, never raised.
    pub async fn reject_participant(&self, participant_id: &str, reason: &str) -> Result<TransitionOutcome> {
        let participant = db::participants::mark_rejected(&self.pool, participant_id, reason)
            .await?
            .ok_or_else(|| Error::NotFound(format!("participant {}", participant_id)))?;
        info!("Participant {} rejected: {}", participant.id, reason);

        let external = self
            .push_rejection(&participant, reason, RejectionCategory::FailedCheck)
            .await;
        let participant = db::participants::get_participant(&self.pool, &participant.id)
            .await?
            .unwrap_or(participant);

        Ok(TransitionOutcome { participant, external })
    }

    /// Platform half of a rejection, for callers that already committed the
    /// local rejection.
    pub async fn push_rejection(
        &self,
        participant: &Participant,
        reason: &str,
        category: RejectionCategory,
    ) -> ExternalOutcome {
        let action = SubmissionAction::Reject {
            reason: reason.to_string(),
            category,
        };
        let outcome = self.transition(participant, &action).await;
        self.record_outcome(participant, "rejection", &outcome).await;
        outcome
    }

    /// Asks the platform to approve a participant's submission.
    pub async fn approve_participant(&self, participant_id: &str) -> Result<TransitionOutcome> {
        let participant = db::participants::get_participant(&self.pool, participant_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("participant {}", participant_id)))?;
        if participant.status == ParticipantStatus::Rejected {
            return Err(Error::Conflict(format!("participant {} is rejected", participant.id)));
        }

        let external = self.transition(&participant, &SubmissionAction::Approve).await;
        self.record_outcome(&participant, "approval", &external).await;
        let participant = db::participants::get_participant(&self.pool, &participant.id)
            .await?
            .unwrap_or(participant);

        Ok(TransitionOutcome { participant, external })
    }

    async fn transition(&self, participant: &Participant, action: &SubmissionAction) -> ExternalOutcome {
        let submission_id = match self.locate_submission(participant).await {
            Ok(id) => id,
            Err(error) => {
                warn!("Cannot transition participant {}: {}", participant.id, error);
                return ExternalOutcome {
                    ok: false,
                    submission_id: None,
                    error: Some(error),
                };
            }
        };
        self.send_transition(&submission_id, action).await
    }

    async fn send_transition(&self, submission_id: &str, action: &SubmissionAction) -> ExternalOutcome {
        let result = match self.platform() {
            Ok(platform) => {
                self.call("transition submission", platform.transition_submission(submission_id, action))
                    .await
            }
            Err(e) => Err(e),
        };

        match result {
            Ok(()) => ExternalOutcome {
                ok: true,
                submission_id: Some(submission_id.to_string()),
                error: None,
            },
            Err(error) => {
                warn!("Transition of submission {} failed: {}", submission_id, error);
                ExternalOutcome {
                    ok: false,
                    submission_id: Some(submission_id.to_string()),
                    error: Some(error),
                }
            }
        }
    }

    /// Finds the participant's submission id in the study export.
    async fn locate_submission(&self, participant: &Participant) -> std::result::Result<String, String> {
        self.platform()?;
        let external_id = match participant.external_id.as_deref() {
            Some(id) if !participant.is_anonymous() => id,
            _ => return Err("participant has no external identifier".to_string()),
        };
        let study = db::studies::get_study(&self.pool, participant.study_id)
            .await
            .map_err(|e| e.to_string())?
            .ok_or_else(|| format!("study {} not found", participant.study_id))?;
        let external_study_id = study
            .external_study_id
            .as_deref()
            .ok_or_else(|| "study has no external study reference".to_string())?;

        let rows = self.fetch_export(external_study_id).await?;
        rows.iter()
            .find(|row| row.participant_id().as_deref() == Some(external_id))
            .and_then(|row| row.submission_id())
            .ok_or_else(|| format!("no external submission for participant {}", external_id))
    }

    /// Stores the platform outcome of an approval/rejection on the
    /// participant for operator follow-up.
    async fn record_outcome(&self, participant: &Participant, kind: &str, outcome: &ExternalOutcome) {
        let now = Utc::now().to_rfc3339();
        let mut patch = Map::new();
        patch.insert(
            format!("external_{}_status", kind),
            json!(if outcome.ok { "succeeded" } else { "failed" }),
        );
        patch.insert(format!("external_{}_error", kind), json!(outcome.error));
        patch.insert(format!("external_{}_attempted_at", kind), json!(now));
        if let Some(submission_id) = &outcome.submission_id {
            patch.insert("external_submission_id".to_string(), json!(submission_id));
        }

        if let Err(e) =
            db::participants::merge_metadata(&self.pool, &participant.id, &Value::Object(patch)).await
        {
            warn!("Failed to record {} outcome for {}: {}", kind, participant.id, e);
        }
    }

    /// Reviews every export row awaiting review: approve when the local
    /// participant's work passes the quality check, reject otherwise.
    pub async fn review_awaiting(&self, study_id: Uuid) -> Result<SyncReport> {
        let study = self.load_study(study_id).await?;
        let external_id = Self::external_ref(&study)?;

        let rows = self.fetch_export(external_id).await.map_err(|e| {
            warn!("Review of study {} failed: {}", study.id, e);
            Error::ExternalUnavailable(e)
        })?;

        let mut report = SyncReport::default();
        for (index, row) in rows.iter().enumerate() {
            let awaiting = export::external_status(row)
                .is_some_and(|s| s == "awaiting review" || s == "awaiting_review");
            if !awaiting {
                continue;
            }
            match self.review_row(row).await {
                Ok(outcome) if outcome.ok => {
                    report.processed += 1;
                    report.updated += 1;
                }
                Ok(outcome) => report.record_failure(format!(
                    "row {}: {}",
                    index,
                    outcome.error.unwrap_or_else(|| "transition failed".to_string())
                )),
                Err(e) => report.record_failure(format!("row {}: {}", index, e)),
            }
        }

        info!(
            "Review of study {}: {} transitioned, {} failed",
            study.id, report.processed, report.failed
        );
        report.into_result()
    }

    async fn review_row(&self, row: &ExportRow) -> Result<ExternalOutcome> {
        let external_id = row
            .participant_id()
            .ok_or_else(|| Error::ValidationFailed("missing participant_id column".to_string()))?;
        let submission_id = row
            .submission_id()
            .ok_or_else(|| Error::ValidationFailed("missing submission id column".to_string()))?;
        let participant = db::participants::get_participant_by_external_id(&self.pool, &external_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("no local participant for {}", external_id)))?;

        let report = self.assess(&participant).await?;
        let quality_patch = json!({ "quality_score": report.score, "quality_flags": report.flags });
        db::participants::merge_metadata(&self.pool, &participant.id, &quality_patch).await?;

        if report.approvable() {
            let outcome = self.send_transition(&submission_id, &SubmissionAction::Approve).await;
            self.record_outcome(&participant, "approval", &outcome).await;
            Ok(outcome)
        } else {
            let participant = db::participants::mark_rejected(&self.pool, &participant.id, QUALITY_REJECTION_REASON)
                .await?
                .unwrap_or(participant);
            let action = SubmissionAction::Reject {
                reason: QUALITY_REJECTION_REASON.to_string(),
                category: RejectionCategory::LowEffort,
            };
            let outcome = self.send_transition(&submission_id, &action).await;
            self.record_outcome(&participant, "rejection", &outcome).await;
            Ok(outcome)
        }
    }

    pub async fn assess(&self, participant: &Participant) -> Result<QualityReport> {
        let completed = db::submissions::completed_for_participant(&self.pool, &participant.id).await?;
        Ok(quality::assess(participant.assigned_task_ids.len(), &completed))
    }
}
