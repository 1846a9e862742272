//! Closed mapping from the platform's study status onto the local one.
//! Anything not in the table maps to no change.

use crate::db::{Study, StudyStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExternalStudyStatus {
    Unpublished,
    Draft,
    Active,
    Running,
    Paused,
    Completed,
    Stopped,
}

impl ExternalStudyStatus {
    pub fn parse(raw: &str) -> Option<Self> {
        let normalized: String = raw
            .trim()
            .to_lowercase()
            .chars()
            .map(|c| if c == ' ' || c == '-' { '_' } else { c })
            .collect();

        match normalized.as_str() {
            "unpublished" => Some(Self::Unpublished),
            "draft" => Some(Self::Draft),
            "active" => Some(Self::Active),
            "running" => Some(Self::Running),
            "paused" => Some(Self::Paused),
            "completed" => Some(Self::Completed),
            "stopped" => Some(Self::Stopped),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusChange {
    pub status: StudyStatus,
    pub stamp_started: bool,
    pub stamp_completed: bool,
}

/// The write a platform status calls for, or `None` when the local study
/// already reflects it (or the status is one we leave alone).
pub fn map_status(external: ExternalStudyStatus, study: &Study) -> Option<StatusChange> {
    let change = match external {
        ExternalStudyStatus::Unpublished | ExternalStudyStatus::Draft => {
            // A study that has run is never pulled back to draft.
            if study.started_at.is_some()
                || matches!(study.status, StudyStatus::Draft | StudyStatus::Ready)
            {
                return None;
            }
            StatusChange {
                status: StudyStatus::Draft,
                stamp_started: false,
                stamp_completed: false,
            }
        }
        ExternalStudyStatus::Active | ExternalStudyStatus::Running => StatusChange {
            status: StudyStatus::Active,
            stamp_started: true,
            stamp_completed: false,
        },
        ExternalStudyStatus::Paused | ExternalStudyStatus::Stopped => StatusChange {
            status: StudyStatus::Paused,
            stamp_started: false,
            stamp_completed: false,
        },
        ExternalStudyStatus::Completed => StatusChange {
            status: StudyStatus::Completed,
            stamp_started: false,
            stamp_completed: true,
        },
    };

    let already_applied = study.status == change.status
        && (!change.stamp_started || study.started_at.is_some())
        && (!change.stamp_completed || study.completed_at.is_some());

    if already_applied {
        None
    } else {
        Some(change)
    }
}
