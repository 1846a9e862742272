use serde::Serialize;

use crate::db::EvaluationMode;
use crate::judgment::Choice;

/// Ratings within this distance of the expected value count as correct.
pub const RATING_TOLERANCE: i64 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Expected {
    Label { label: Choice },
    Rating { value: i64, tolerance: i64 },
}

#[derive(Debug, Clone, Copy, Serialize)]
#[serde(untagged)]
pub enum CalibrationItems {
    Single { path: &'static str },
    Pair { a: &'static str, b: &'static str },
}

#[derive(Debug, Clone, Serialize)]
pub struct CalibrationTask {
    pub id: &'static str,
    pub scenario: &'static str,
    pub prompt: &'static str,
    pub items: CalibrationItems,
    #[serde(skip)]
    pub expected: Expected,
    #[serde(skip)]
    pub explanation: &'static str,
}

const fn pair(
    id: &'static str,
    scenario: &'static str,
    prompt: &'static str,
    a: &'static str,
    b: &'static str,
    label: Choice,
    explanation: &'static str,
) -> CalibrationTask {
    CalibrationTask {
        id,
        scenario,
        prompt,
        items: CalibrationItems::Pair { a, b },
        expected: Expected::Label { label },
        explanation,
    }
}

const fn single(
    id: &'static str,
    scenario: &'static str,
    prompt: &'static str,
    path: &'static str,
    value: i64,
    explanation: &'static str,
) -> CalibrationTask {
    CalibrationTask {
        id,
        scenario,
        prompt,
        items: CalibrationItems::Single { path },
        expected: Expected::Rating {
            value,
            tolerance: RATING_TOLERANCE,
        },
        explanation,
    }
}

static COMPARISON_V1: [CalibrationTask; 5] = [
    pair(
        "cmp-v1-frozen-frames",
        "plains_walk",
        "Which video follows the forward movement more faithfully?",
        "screening/v1/cmp/frozen_a.mp4",
        "screening/v1/cmp/frozen_b.mp4",
        Choice::B,
        "Video A freezes after the first second while the input keeps moving forward.",
    ),
    pair(
        "cmp-v1-texture-melt",
        "forest_turn",
        "Which video has clearer, more stable textures?",
        "screening/v1/cmp/texture_a.mp4",
        "screening/v1/cmp/texture_b.mp4",
        Choice::A,
        "Tree textures in video B smear into each other while the camera turns.",
    ),
    pair(
        "cmp-v1-identical",
        "desert_idle",
        "Which video looks better overall?",
        "screening/v1/cmp/same_a.mp4",
        "screening/v1/cmp/same_b.mp4",
        Choice::Equal,
        "Both clips are the same recording, so neither is better.",
    ),
    pair(
        "cmp-v1-jump",
        "village_jump",
        "Which video responds to the jump command?",
        "screening/v1/cmp/jump_a.mp4",
        "screening/v1/cmp/jump_b.mp4",
        Choice::A,
        "Only video A shows the character leaving the ground when jump is pressed.",
    ),
    pair(
        "cmp-v1-flicker",
        "cave_walk",
        "Which video keeps lighting consistent over time?",
        "screening/v1/cmp/flicker_a.mp4",
        "screening/v1/cmp/flicker_b.mp4",
        Choice::B,
        "Video A flickers between bright and dark frames without any light source changing.",
    ),
];

static SINGLE_ITEM_V1: [CalibrationTask; 5] = [
    single(
        "single-v1-static-noise",
        "plains_walk",
        "Rate the overall quality of this video (1-5).",
        "screening/v1/single/noise.mp4",
        1,
        "The clip is mostly static noise with no recognisable world.",
    ),
    single(
        "single-v1-reference",
        "forest_turn",
        "Rate the overall quality of this video (1-5).",
        "screening/v1/single/reference.mp4",
        5,
        "This is real gameplay footage and should be rated at the top of the scale.",
    ),
    single(
        "single-v1-blur",
        "desert_idle",
        "Rate the visual quality of this video (1-5).",
        "screening/v1/single/blur.mp4",
        2,
        "The scene is recognisable but heavily blurred throughout.",
    ),
    single(
        "single-v1-minor-jitter",
        "village_jump",
        "Rate the motion smoothness of this video (1-5).",
        "screening/v1/single/jitter.mp4",
        4,
        "Motion is smooth apart from a short stutter in the middle.",
    ),
    single(
        "single-v1-drift",
        "cave_walk",
        "Rate how well this video follows the movement input (1-5).",
        "screening/v1/single/drift.mp4",
        3,
        "The character moves in the right direction but drifts sideways.",
    ),
];

/// The fixed battery for a mode and screening config version.
pub fn battery(mode: EvaluationMode, version: &str) -> Option<&'static [CalibrationTask]> {
    match (mode, version) {
        (EvaluationMode::Comparison, "v1") => Some(&COMPARISON_V1),
        (EvaluationMode::SingleItem, "v1") => Some(&SINGLE_ITEM_V1),
        _ => None,
    }
}
