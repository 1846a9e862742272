//! Response-quality heuristics used when reviewing submissions that await
//! approval on the recruitment platform.

use serde::Serialize;
use std::collections::HashSet;

use crate::db::Submission;

/// Average completion time below this is suspicious.
pub const FAST_COMPLETION_SECS: f64 = 30.0;
pub const APPROVAL_THRESHOLD: f64 = 0.8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum QualityFlag {
    VeryFastCompletion,
    NoVariationInResponses,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QualityReport {
    pub total_assigned: usize,
    pub total_completed: usize,
    pub average_time: Option<f64>,
    pub flags: Vec<QualityFlag>,
    pub score: f64,
}

impl QualityReport {
    pub fn approvable(&self) -> bool {
        self.score >= APPROVAL_THRESHOLD
    }
}

pub fn assess(total_assigned: usize, completed: &[Submission]) -> QualityReport {
    let mut flags = Vec::new();

    let times: Vec<f64> = completed.iter().filter_map(|s| s.completion_time_seconds).collect();
    let average_time = (!times.is_empty()).then(|| times.iter().sum::<f64>() / times.len() as f64);
    if average_time.is_some_and(|t| t < FAST_COMPLETION_SECS) {
        flags.push(QualityFlag::VeryFastCompletion);
    }

    let answers: Vec<String> = completed
        .iter()
        .filter_map(|s| s.payload.get("dimension_scores").and_then(|v| v.as_object()))
        .flat_map(|scores| scores.values().map(|v| v.to_string()))
        .collect();
    let distinct: HashSet<&String> = answers.iter().collect();
    if distinct.len() == 1 {
        flags.push(QualityFlag::NoVariationInResponses);
    }

    let mut score = 1.0;
    if completed.len() < total_assigned {
        score *= completed.len() as f64 / total_assigned as f64;
    }
    if !flags.is_empty() {
        score *= 0.5;
    }

    QualityReport {
        total_assigned,
        total_completed: completed.len(),
        average_time,
        flags,
        score,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::SubmissionStatus;
    use chrono::Utc;
    use serde_json::json;
    use uuid::Uuid;

    fn completed(seconds: f64, scores: serde_json::Value) -> Submission {
        Submission {
            id: Uuid::new_v4(),
            task_id: Uuid::new_v4(),
            participant_id: "p".to_string(),
            status: SubmissionStatus::Completed,
            payload: json!({ "dimension_scores": scores }),
            winner: None,
            completion_time_seconds: Some(seconds),
            client_metadata: json!({}),
            last_saved_at: Utc::now(),
            completed_at: Some(Utc::now()),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn careful_complete_participant_is_approvable() {
        let subs = vec![
            completed(90.0, json!({"overall_quality": "A", "controllability": "B"})),
            completed(75.0, json!({"overall_quality": "Equal", "controllability": "A"})),
        ];
        let report = assess(2, &subs);
        assert!(report.flags.is_empty());
        assert_eq!(report.score, 1.0);
        assert!(report.approvable());
    }

    #[test]
    fn fast_and_uniform_answers_are_flagged_once() {
        let subs = vec![
            completed(5.0, json!({"overall_quality": "A", "controllability": "A"})),
            completed(8.0, json!({"overall_quality": "A", "controllability": "A"})),
        ];
        let report = assess(2, &subs);
        assert_eq!(
            report.flags,
            vec![QualityFlag::VeryFastCompletion, QualityFlag::NoVariationInResponses]
        );
        assert_eq!(report.score, 0.5);
        assert!(!report.approvable());
    }

    #[test]
    fn partial_completion_scales_score() {
        let subs = vec![completed(60.0, json!({"overall_quality": "A", "controllability": "B"}))];
        let report = assess(4, &subs);
        assert_eq!(report.score, 0.25);
    }

    #[test]
    fn nothing_completed_scores_zero() {
        let report = assess(3, &[]);
        assert_eq!(report.score, 0.0);
        assert_eq!(report.average_time, None);
    }
}
