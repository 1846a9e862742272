//! Judgment payloads: per-dimension answers, validation on completion, and
//! the majority vote that derives a comparison's winner.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::db::EvaluationMode;
use crate::error::{Error, Result};

/// Every completed judgment must answer all of these.
pub const DIMENSIONS: [&str; 4] = [
    "overall_quality",
    "controllability",
    "visual_quality",
    "temporal_consistency",
];

pub const RATING_MIN: i64 = 1;
pub const RATING_MAX: i64 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Choice {
    A,
    B,
    #[serde(alias = "equal", alias = "tie")]
    Equal,
}

impl Choice {
    pub fn as_str(&self) -> &'static str {
        match self {
            Choice::A => "A",
            Choice::B => "B",
            Choice::Equal => "Equal",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Answer {
    Choice(Choice),
    Rating(i64),
}

/// A validated, complete set of dimension answers.
#[derive(Debug, Clone, PartialEq)]
pub struct Judgment {
    pub mode: EvaluationMode,
    pub answers: BTreeMap<String, Answer>,
}

impl Judgment {
    /// Majority of A vs B votes across dimensions; `Equal` votes abstain and
    /// an even split is `Equal`, never one side.
    pub fn winner(&self) -> Option<Choice> {
        match self.mode {
            EvaluationMode::SingleItem => None,
            EvaluationMode::Comparison => Some(tally(self.answers.values().filter_map(|a| match a {
                Answer::Choice(c) => Some(*c),
                Answer::Rating(_) => None,
            }))),
        }
    }
}

pub fn tally(votes: impl IntoIterator<Item = Choice>) -> Choice {
    let (mut a, mut b) = (0usize, 0usize);
    for vote in votes {
        match vote {
            Choice::A => a += 1,
            Choice::B => b += 1,
            Choice::Equal => {}
        }
    }
    match a.cmp(&b) {
        std::cmp::Ordering::Greater => Choice::A,
        std::cmp::Ordering::Less => Choice::B,
        std::cmp::Ordering::Equal => Choice::Equal,
    }
}

/// Validates a completion payload of the form
/// `{"dimension_scores": {"<dimension>": "A" | "B" | "Equal" | 1..=5}, ...}`.
/// Extra top-level keys (comments, etc.) are allowed and stored verbatim.
pub fn validate(mode: EvaluationMode, payload: &serde_json::Value) -> Result<Judgment> {
    let scores = payload
        .get("dimension_scores")
        .and_then(|v| v.as_object())
        .ok_or_else(|| Error::ValidationFailed("payload must contain a dimension_scores object".to_string()))?;

    if let Some(unknown) = scores.keys().find(|k| !DIMENSIONS.contains(&k.as_str())) {
        return Err(Error::ValidationFailed(format!("unknown dimension: {}", unknown)));
    }

    let mut answers = BTreeMap::new();
    for dimension in DIMENSIONS {
        let raw = scores
            .get(dimension)
            .ok_or_else(|| Error::ValidationFailed(format!("missing dimension: {}", dimension)))?;
        let answer = parse_answer(mode, dimension, raw)?;
        answers.insert(dimension.to_string(), answer);
    }

    Ok(Judgment { mode, answers })
}

fn parse_answer(mode: EvaluationMode, dimension: &str, raw: &serde_json::Value) -> Result<Answer> {
    let answer: Answer = serde_json::from_value(raw.clone())
        .map_err(|_| Error::ValidationFailed(format!("invalid answer for {}: {}", dimension, raw)))?;

    match (mode, answer) {
        (EvaluationMode::Comparison, Answer::Choice(_)) => Ok(answer),
        (EvaluationMode::SingleItem, Answer::Rating(r)) if (RATING_MIN..=RATING_MAX).contains(&r) => Ok(answer),
        (EvaluationMode::SingleItem, Answer::Rating(r)) => Err(Error::ValidationFailed(format!(
            "rating for {} out of range {}..={}: {}",
            dimension, RATING_MIN, RATING_MAX, r
        ))),
        (EvaluationMode::Comparison, Answer::Rating(_)) => Err(Error::ValidationFailed(format!(
            "{} expects A, B or Equal",
            dimension
        ))),
        (EvaluationMode::SingleItem, Answer::Choice(_)) => Err(Error::ValidationFailed(format!(
            "{} expects a rating",
            dimension
        ))),
    }
}
