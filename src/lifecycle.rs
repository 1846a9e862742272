//! Participant lifecycle: drafts, completion, next-task selection and the
//! per-study vote tally.
//!
//! A participant's assigned tasks are scanned in assignment order, which is
//! the study's task creation order at the time the participant was created.
//! Completion of the last task moves the participant to `completed`.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use tracing::{debug, info};
use uuid::Uuid;

use crate::db::{
    self, EvaluationMode, Participant, ParticipantStatus, ScreeningStatus, Study, Submission,
    SubmissionWrite, Task,
};
use crate::error::{Error, Result};
use crate::judgment::{self, Answer, Choice};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "task_id", rename_all = "snake_case")]
pub enum NextTask {
    /// Screening must be passed before any main task is served.
    Screening,
    Task(Uuid),
    /// No more tasks; route the participant to the terminal screen.
    Done,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Progress {
    Assigned,
    InProgress,
    Completed,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SubmissionInput {
    pub payload: serde_json::Value,
    pub completion_time_seconds: Option<f64>,
    pub client_metadata: Option<serde_json::Value>,
}

#[derive(Debug, Serialize)]
pub struct Completion {
    pub submission: Submission,
    pub participant_completed: bool,
    pub next: NextTask,
}

/// First assigned task without a completed submission.
pub fn first_incomplete(assigned: &[Uuid], completed: &HashSet<Uuid>) -> Option<Uuid> {
    assigned.iter().find(|id| !completed.contains(id)).copied()
}

pub fn progress_of(assigned: &[Uuid], completed: &HashSet<Uuid>, started: usize) -> Progress {
    if first_incomplete(assigned, completed).is_none() {
        Progress::Completed
    } else if started == 0 {
        Progress::Assigned
    } else {
        Progress::InProgress
    }
}

fn screening_outstanding(study: &Study, participant: &Participant) -> bool {
    study.config.screening_required && participant.screening_status != ScreeningStatus::Passed
}

async fn completed_set(pool: &sqlx::PgPool, participant_id: &str) -> Result<HashSet<Uuid>> {
    Ok(db::submissions::completed_task_ids(pool, participant_id)
        .await?
        .into_iter()
        .collect())
}

pub async fn next_task(pool: &sqlx::PgPool, study: &Study, participant: &Participant) -> Result<NextTask> {
    match participant.status {
        ParticipantStatus::Rejected | ParticipantStatus::ScreeningFailed => return Ok(NextTask::Done),
        ParticipantStatus::Active | ParticipantStatus::Completed => {}
    }
    if screening_outstanding(study, participant) {
        return Ok(NextTask::Screening);
    }

    let completed = completed_set(pool, &participant.id).await?;
    Ok(match first_incomplete(&participant.assigned_task_ids, &completed) {
        Some(task_id) => NextTask::Task(task_id),
        None => NextTask::Done,
    })
}

pub async fn progress(pool: &sqlx::PgPool, participant: &Participant) -> Result<Progress> {
    let completed = completed_set(pool, &participant.id).await?;
    let started = db::submissions::started_task_count(pool, &participant.id).await?;
    Ok(progress_of(
        &participant.assigned_task_ids,
        &completed,
        usize::try_from(started).unwrap_or(0),
    ))
}

fn ensure_assigned(task: &Task, participant: &Participant) -> Result<()> {
    if task.study_id == participant.study_id && participant.assigned_task_ids.contains(&task.id) {
        Ok(())
    } else {
        Err(Error::NotFound(format!(
            "task {} is not assigned to participant {}",
            task.id, participant.id
        )))
    }
}

fn validate_timing(seconds: Option<f64>) -> Result<()> {
    match seconds {
        Some(s) if !s.is_finite() || s < 0.0 => Err(Error::ValidationFailed(
            "completion_time_seconds must be a non-negative number".to_string(),
        )),
        _ => Ok(()),
    }
}

/// Saves work in progress. Drafts are stored verbatim and may be partial.
pub async fn save_draft(
    pool: &sqlx::PgPool,
    task: &Task,
    participant: &Participant,
    input: &SubmissionInput,
) -> Result<Submission> {
    ensure_assigned(task, participant)?;
    validate_timing(input.completion_time_seconds)?;

    let client_metadata = input.client_metadata.clone().unwrap_or_else(|| serde_json::json!({}));
    let write = SubmissionWrite {
        task_id: task.id,
        participant_id: &participant.id,
        payload: &input.payload,
        winner: None,
        completion_time_seconds: input.completion_time_seconds,
        client_metadata: &client_metadata,
    };

    db::submissions::upsert_draft(pool, &write)
        .await?
        .ok_or_else(|| Error::Conflict(format!("task {} already completed", task.id)))
}

/// The stored draft, if any. A completed submission is not a draft.
pub async fn get_draft(pool: &sqlx::PgPool, task: &Task, participant: &Participant) -> Result<Option<Submission>> {
    ensure_assigned(task, participant)?;
    Ok(db::submissions::get_submission(pool, task.id, &participant.id)
        .await?
        .filter(|s| s.status == db::SubmissionStatus::Draft))
}

/// Completes a task for a participant. At most one completion per
/// (task, participant) ever succeeds; later attempts are a `Conflict` and
/// leave the stored payload untouched.
pub async fn submit(
    pool: &sqlx::PgPool,
    study: &Study,
    task: &Task,
    participant: &Participant,
    input: &SubmissionInput,
) -> Result<Completion> {
    ensure_assigned(task, participant)?;
    if participant.status == ParticipantStatus::Rejected
        || participant.status == ParticipantStatus::ScreeningFailed
    {
        return Err(Error::Conflict(format!("participant {} is closed", participant.id)));
    }
    if screening_outstanding(study, participant) {
        return Err(Error::Conflict("screening has not been passed".to_string()));
    }
    validate_timing(input.completion_time_seconds)?;

    let judgment = judgment::validate(study.evaluation_mode, &input.payload)?;
    let winner = judgment.winner().map(|c| c.as_str());
    let client_metadata = input.client_metadata.clone().unwrap_or_else(|| serde_json::json!({}));

    let write = SubmissionWrite {
        task_id: task.id,
        participant_id: &participant.id,
        payload: &input.payload,
        winner,
        completion_time_seconds: input.completion_time_seconds,
        client_metadata: &client_metadata,
    };

    let submission = db::submissions::upsert_completed(pool, &write)
        .await?
        .ok_or_else(|| Error::Conflict(format!("task {} already completed", task.id)))?;

    let completed = completed_set(pool, &participant.id).await?;
    let next = first_incomplete(&participant.assigned_task_ids, &completed);

    let participant_completed = match next {
        Some(_) => false,
        None => match db::participants::mark_completed(pool, &participant.id).await? {
            Some(p) => {
                info!("Participant {} completed all {} tasks", p.id, p.assigned_task_ids.len());
                true
            }
            None => {
                debug!("Participant {} was not active; completion not stamped", participant.id);
                participant.status == ParticipantStatus::Completed
            }
        },
    };

    Ok(Completion {
        submission,
        participant_completed,
        next: next.map(NextTask::Task).unwrap_or(NextTask::Done),
    })
}

#[derive(Debug, Clone, Serialize)]
pub struct TaskTally {
    pub task_id: Uuid,
    pub scenario: String,
    pub completed: usize,
    pub target: u32,
    pub a: usize,
    pub b: usize,
    pub equal: usize,
    /// Comparison mode only
    pub winner: Option<Choice>,
    pub mean_ratings: BTreeMap<String, f64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StudyResults {
    pub study_id: Uuid,
    pub mode: EvaluationMode,
    pub tasks: Vec<TaskTally>,
    pub participants: BTreeMap<String, i64>,
}

/// Vote counts per task (comparison) or mean rating per dimension
/// (single-item), over completed submissions only.
pub fn tally_tasks(mode: EvaluationMode, target: u32, tasks: &[Task], submissions: &[Submission]) -> Vec<TaskTally> {
    tasks
        .iter()
        .map(|task| {
            let mut tally = TaskTally {
                task_id: task.id,
                scenario: task.scenario.clone(),
                completed: 0,
                target,
                a: 0,
                b: 0,
                equal: 0,
                winner: None,
                mean_ratings: BTreeMap::new(),
            };
            let mut sums: BTreeMap<String, (i64, usize)> = BTreeMap::new();

            for submission in submissions.iter().filter(|s| s.task_id == task.id) {
                tally.completed += 1;
                match mode {
                    EvaluationMode::Comparison => match submission.winner.as_deref() {
                        Some("A") => tally.a += 1,
                        Some("B") => tally.b += 1,
                        _ => tally.equal += 1,
                    },
                    EvaluationMode::SingleItem => {
                        let Some(scores) = submission.payload.get("dimension_scores").and_then(|v| v.as_object()) else {
                            continue;
                        };
                        for (dimension, raw) in scores {
                            if let Ok(Answer::Rating(r)) = serde_json::from_value::<Answer>(raw.clone()) {
                                let entry = sums.entry(dimension.clone()).or_insert((0, 0));
                                entry.0 += r;
                                entry.1 += 1;
                            }
                        }
                    }
                }
            }

            tally.mean_ratings = sums
                .into_iter()
                .map(|(dimension, (sum, n))| (dimension, sum as f64 / n as f64))
                .collect();
            if mode == EvaluationMode::Comparison {
                tally.winner = Some(overall_winner(&tally));
            }
            tally
        })
        .collect()
}

pub async fn study_results(pool: &sqlx::PgPool, study: &Study) -> Result<StudyResults> {
    let tasks = db::tasks::list_tasks(pool, study.id).await?;
    let submissions = db::submissions::completed_for_study(pool, study.id).await?;
    let participants = db::participants::count_by_status(pool, study.id)
        .await?
        .into_iter()
        .collect();

    Ok(StudyResults {
        study_id: study.id,
        mode: study.evaluation_mode,
        tasks: tally_tasks(
            study.evaluation_mode,
            study.config.target_evaluations_per_task,
            &tasks,
            &submissions,
        ),
        participants,
    })
}

/// Winner label of a tally, with the same tie rule as a single judgment.
pub fn overall_winner(tally: &TaskTally) -> Choice {
    judgment::tally(
        std::iter::repeat(Choice::A)
            .take(tally.a)
            .chain(std::iter::repeat(Choice::B).take(tally.b)),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;

    fn ids(n: usize) -> Vec<Uuid> {
        (0..n).map(|_| Uuid::new_v4()).collect()
    }

    #[test]
    fn next_task_follows_assignment_order() {
        let assigned = ids(3);
        let mut completed = HashSet::new();
        assert_eq!(first_incomplete(&assigned, &completed), Some(assigned[0]));

        completed.insert(assigned[1]);
        assert_eq!(first_incomplete(&assigned, &completed), Some(assigned[0]));

        completed.insert(assigned[0]);
        assert_eq!(first_incomplete(&assigned, &completed), Some(assigned[2]));
        // Stable across repeated calls
        assert_eq!(first_incomplete(&assigned, &completed), Some(assigned[2]));

        completed.insert(assigned[2]);
        assert_eq!(first_incomplete(&assigned, &completed), None);
    }

    #[test]
    fn completed_tasks_outside_the_assignment_do_not_count() {
        let assigned = ids(1);
        let completed: HashSet<Uuid> = ids(2).into_iter().collect();
        assert_eq!(first_incomplete(&assigned, &completed), Some(assigned[0]));
    }

    #[test]
    fn progress_states() {
        let assigned = ids(2);
        let mut completed = HashSet::new();
        assert_eq!(progress_of(&assigned, &completed, 0), Progress::Assigned);
        assert_eq!(progress_of(&assigned, &completed, 1), Progress::InProgress);
        completed.extend(assigned.iter().copied());
        assert_eq!(progress_of(&assigned, &completed, 2), Progress::Completed);
    }

    fn submission(task_id: Uuid, winner: Option<&str>, payload: serde_json::Value) -> Submission {
        Submission {
            id: Uuid::new_v4(),
            task_id,
            participant_id: "p".to_string(),
            status: db::SubmissionStatus::Completed,
            payload,
            winner: winner.map(str::to_string),
            completion_time_seconds: Some(42.0),
            client_metadata: json!({}),
            last_saved_at: Utc::now(),
            completed_at: Some(Utc::now()),
            created_at: Utc::now(),
        }
    }

    fn task(scenario: &str) -> Task {
        Task {
            id: Uuid::new_v4(),
            study_id: Uuid::new_v4(),
            scenario: scenario.to_string(),
            item_path: None,
            item_a_path: Some("a.mp4".to_string()),
            item_b_path: Some("b.mp4".to_string()),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn comparison_tally_counts_winners_per_task() {
        let t1 = task("forest");
        let t2 = task("desert");
        let subs = vec![
            submission(t1.id, Some("A"), json!({})),
            submission(t1.id, Some("A"), json!({})),
            submission(t1.id, Some("Equal"), json!({})),
            submission(t2.id, Some("B"), json!({})),
        ];
        let tallies = tally_tasks(EvaluationMode::Comparison, 5, &[t1.clone(), t2], &subs);
        assert_eq!(tallies[0].completed, 3);
        assert_eq!((tallies[0].a, tallies[0].b, tallies[0].equal), (2, 0, 1));
        assert_eq!(tallies[0].winner, Some(Choice::A));
        assert_eq!(tallies[1].b, 1);
    }

    #[test]
    fn tied_tally_has_no_side() {
        let t = task("plains");
        let subs = vec![
            submission(t.id, Some("A"), json!({})),
            submission(t.id, Some("B"), json!({})),
        ];
        let tallies = tally_tasks(EvaluationMode::Comparison, 5, &[t], &subs);
        assert_eq!(overall_winner(&tallies[0]), Choice::Equal);
    }

    #[test]
    fn single_item_tally_averages_ratings() {
        let t = task("cave");
        let subs = vec![
            submission(t.id, None, json!({"dimension_scores": {"overall_quality": 4}})),
            submission(t.id, None, json!({"dimension_scores": {"overall_quality": 2}})),
        ];
        let tallies = tally_tasks(EvaluationMode::SingleItem, 5, &[t], &subs);
        assert_eq!(tallies[0].mean_ratings.get("overall_quality"), Some(&3.0));
    }
}
