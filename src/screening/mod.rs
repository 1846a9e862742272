//! Calibration gate in front of the main task set.
//!
//! A participant answers a fixed battery once. Passing admits them to the
//! lifecycle; failing closes them. Failed platform participants are also
//! rejected on the platform, in the background, after the local rejection
//! is committed.

mod battery;

pub use battery::{battery, CalibrationItems, CalibrationTask, Expected, RATING_TOLERANCE};

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{info, warn};

use crate::db::{self, Participant, ParticipantStatus, ScreeningStatus, Study};
use crate::error::{Error, Result};
use crate::judgment::Answer;
use crate::platform::RejectionCategory;
use crate::sync::SyncEngine;

pub const SCREENING_REJECTION_REASON: &str = "Failed screening calibration tasks";

#[derive(Debug, Clone, Deserialize)]
pub struct ScreeningAnswer {
    pub task_id: String,
    pub answer: Answer,
}

#[derive(Debug, Clone, Serialize)]
pub struct TaskFeedback {
    pub task_id: &'static str,
    pub correct: bool,
    pub expected: Expected,
    pub explanation: &'static str,
}

#[derive(Debug, Clone, Serialize)]
pub struct ScreeningOutcome {
    pub passed: bool,
    pub passes: usize,
    pub required: usize,
    pub total: usize,
    pub feedback: Vec<TaskFeedback>,
}

pub fn is_correct(expected: &Expected, answer: &Answer) -> bool {
    match (expected, answer) {
        (Expected::Label { label }, Answer::Choice(choice)) => label == choice,
        (Expected::Rating { value, tolerance }, Answer::Rating(rating)) => {
            rating.abs_diff(*value) <= tolerance.unsigned_abs()
        }
        _ => false,
    }
}

/// Scores answers against a battery. Unanswered tasks count as misses;
/// answers to tasks outside the battery, or twice to the same task, are
/// rejected.
pub fn score(tasks: &[CalibrationTask], answers: &[ScreeningAnswer], threshold: usize) -> Result<ScreeningOutcome> {
    let mut seen = HashSet::new();
    for answer in answers {
        if !tasks.iter().any(|t| t.id == answer.task_id) {
            return Err(Error::ValidationFailed(format!("unknown screening task: {}", answer.task_id)));
        }
        if !seen.insert(answer.task_id.as_str()) {
            return Err(Error::ValidationFailed(format!("duplicate answer for {}", answer.task_id)));
        }
    }

    let feedback: Vec<TaskFeedback> = tasks
        .iter()
        .map(|task| {
            let correct = answers
                .iter()
                .find(|a| a.task_id == task.id)
                .is_some_and(|a| is_correct(&task.expected, &a.answer));
            TaskFeedback {
                task_id: task.id,
                correct,
                expected: task.expected,
                explanation: task.explanation,
            }
        })
        .collect();

    let passes = feedback.iter().filter(|f| f.correct).count();
    Ok(ScreeningOutcome {
        passed: passes >= threshold,
        passes,
        required: threshold,
        total: tasks.len(),
        feedback,
    })
}

pub fn study_battery(study: &Study) -> Result<&'static [CalibrationTask]> {
    let version = &study.config.screening_config_version;
    battery(study.evaluation_mode, version).ok_or_else(|| {
        Error::NotFound(format!(
            "no screening battery {} for {} studies",
            version, study.evaluation_mode
        ))
    })
}

pub async fn submit_screening(
    pool: &sqlx::PgPool,
    sync: &Arc<SyncEngine>,
    study: &Study,
    participant: &Participant,
    answers: &[ScreeningAnswer],
) -> Result<ScreeningOutcome> {
    if participant.screening_status != ScreeningStatus::Pending {
        return Err(Error::Conflict(format!("participant {} was already screened", participant.id)));
    }

    let tasks = study_battery(study)?;
    let outcome = score(tasks, answers, study.config.screening_pass_threshold)?;
    let version = study.config.screening_config_version.as_str();

    let (verdict, status, reason) = if outcome.passed {
        (ScreeningStatus::Passed, participant.status, None)
    } else if participant.is_anonymous() {
        (ScreeningStatus::Failed, ParticipantStatus::ScreeningFailed, None)
    } else {
        (ScreeningStatus::Failed, ParticipantStatus::Rejected, Some(SCREENING_REJECTION_REASON))
    };

    let updated = db::participants::record_screening(pool, &participant.id, verdict, version, status, reason)
        .await?
        .ok_or_else(|| Error::Conflict(format!("participant {} was already screened", participant.id)))?;

    info!(
        "Participant {} screening {}: {}/{} (need {})",
        updated.id, verdict, outcome.passes, outcome.total, outcome.required
    );

    if updated.status == ParticipantStatus::Rejected {
        let sync = Arc::clone(sync);
        tokio::spawn(async move {
            let external = sync
                .push_rejection(&updated, SCREENING_REJECTION_REASON, RejectionCategory::FailedCheck)
                .await;
            if !external.ok {
                warn!(
                    "Platform rejection for {} not applied; local rejection stands",
                    updated.id
                );
            }
        });
    }

    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::EvaluationMode;
    use crate::judgment::Choice;

    fn answers_with_correct(tasks: &[CalibrationTask], correct: usize) -> Vec<ScreeningAnswer> {
        tasks
            .iter()
            .enumerate()
            .map(|(i, task)| {
                let answer = match (task.expected, i < correct) {
                    (Expected::Label { label }, true) => Answer::Choice(label),
                    (Expected::Label { label }, false) => Answer::Choice(match label {
                        Choice::A => Choice::B,
                        _ => Choice::A,
                    }),
                    (Expected::Rating { value, .. }, true) => Answer::Rating(value),
                    (Expected::Rating { value, tolerance }, false) => {
                        Answer::Rating(if value > 3 { value - tolerance - 1 } else { value + tolerance + 1 })
                    }
                };
                ScreeningAnswer {
                    task_id: task.id.to_string(),
                    answer,
                }
            })
            .collect()
    }

    #[test]
    fn batteries_have_five_tasks_per_mode() {
        assert_eq!(battery(EvaluationMode::Comparison, "v1").unwrap().len(), 5);
        assert_eq!(battery(EvaluationMode::SingleItem, "v1").unwrap().len(), 5);
        assert!(battery(EvaluationMode::Comparison, "v9").is_none());
    }

    #[test]
    fn three_of_five_passes_and_two_fails() {
        for mode in [EvaluationMode::Comparison, EvaluationMode::SingleItem] {
            let tasks = battery(mode, "v1").unwrap();

            let outcome = score(tasks, &answers_with_correct(tasks, 3), 3).unwrap();
            assert!(outcome.passed);
            assert_eq!(outcome.passes, 3);

            let outcome = score(tasks, &answers_with_correct(tasks, 2), 3).unwrap();
            assert!(!outcome.passed);
            assert_eq!(outcome.passes, 2);
        }
    }

    #[test]
    fn ratings_within_tolerance_are_correct() {
        let expected = Expected::Rating { value: 3, tolerance: RATING_TOLERANCE };
        assert!(is_correct(&expected, &Answer::Rating(2)));
        assert!(is_correct(&expected, &Answer::Rating(4)));
        assert!(!is_correct(&expected, &Answer::Rating(5)));
        assert!(!is_correct(&expected, &Answer::Choice(Choice::A)));
    }

    #[test]
    fn extreme_ratings_are_misses() {
        let expected = Expected::Rating { value: 3, tolerance: RATING_TOLERANCE };
        assert!(!is_correct(&expected, &Answer::Rating(i64::MIN)));
        assert!(!is_correct(&expected, &Answer::Rating(i64::MAX)));

        let tasks = battery(EvaluationMode::SingleItem, "v1").unwrap();
        let answers = vec![ScreeningAnswer {
            task_id: tasks[0].id.to_string(),
            answer: Answer::Rating(i64::MIN),
        }];
        let outcome = score(tasks, &answers, 3).unwrap();
        assert_eq!(outcome.passes, 0);
        assert!(!outcome.feedback[0].correct);
    }

    #[test]
    fn unanswered_tasks_are_misses() {
        let tasks = battery(EvaluationMode::Comparison, "v1").unwrap();
        let mut answers = answers_with_correct(tasks, 5);
        answers.truncate(2);
        let outcome = score(tasks, &answers, 3).unwrap();
        assert_eq!(outcome.passes, 2);
        assert!(!outcome.passed);
        assert_eq!(outcome.feedback.len(), 5);
    }

    #[test]
    fn unknown_and_duplicate_answers_are_rejected() {
        let tasks = battery(EvaluationMode::Comparison, "v1").unwrap();
        let unknown = vec![ScreeningAnswer {
            task_id: "nope".to_string(),
            answer: Answer::Choice(Choice::A),
        }];
        assert!(score(tasks, &unknown, 3).is_err());

        let mut dup = answers_with_correct(tasks, 1);
        dup.push(dup[0].clone());
        assert!(score(tasks, &dup, 3).is_err());
    }
}
