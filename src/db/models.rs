use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use sqlx::FromRow;
use uuid::Uuid;

/// Prefix of identities synthesized from a browser session token.
pub const ANONYMOUS_PREFIX: &str = "anon-";

#[derive(Debug, thiserror::Error)]
#[error("unknown {kind} value: {value}")]
pub struct UnknownVariant {
    kind: &'static str,
    value: String,
}

/// Text-backed enum columns: `as_str` for binding, `TryFrom<String>` for
/// `#[sqlx(try_from = "String")]` decoding.
macro_rules! text_enum {
    ($name:ident, $kind:literal, { $($variant:ident => $text:literal),+ $(,)? }) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(rename_all = "snake_case")]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl std::str::FromStr for $name {
            type Err = UnknownVariant;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok($name::$variant),)+
                    other => Err(UnknownVariant {
                        kind: $kind,
                        value: other.to_string(),
                    }),
                }
            }
        }

        impl TryFrom<String> for $name {
            type Error = UnknownVariant;

            fn try_from(value: String) -> Result<Self, Self::Error> {
                value.parse()
            }
        }
    };
}

text_enum!(StudyStatus, "study status", {
    Draft => "draft",
    Ready => "ready",
    Active => "active",
    Paused => "paused",
    Completed => "completed",
});

text_enum!(EvaluationMode, "evaluation mode", {
    Comparison => "comparison",
    SingleItem => "single_item",
});

text_enum!(ParticipantStatus, "participant status", {
    Active => "active",
    Completed => "completed",
    Rejected => "rejected",
    ScreeningFailed => "screening_failed",
});

text_enum!(ScreeningStatus, "screening status", {
    Pending => "pending",
    Passed => "passed",
    Failed => "failed",
});

text_enum!(SubmissionStatus, "submission status", {
    Draft => "draft",
    Completed => "completed",
});

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StudyConfig {
    #[serde(default = "default_target_evaluations")]
    pub target_evaluations_per_task: u32,
    #[serde(default = "default_screening_version")]
    pub screening_config_version: String,
    #[serde(default)]
    pub screening_required: bool,
    #[serde(default = "default_pass_threshold")]
    pub screening_pass_threshold: usize,
}

fn default_target_evaluations() -> u32 {
    5
}

fn default_screening_version() -> String {
    "v1".to_string()
}

fn default_pass_threshold() -> usize {
    3
}

impl Default for StudyConfig {
    fn default() -> Self {
        Self {
            target_evaluations_per_task: default_target_evaluations(),
            screening_config_version: default_screening_version(),
            screening_required: false,
            screening_pass_threshold: default_pass_threshold(),
        }
    }
}

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Study {
    pub id: Uuid,
    pub name: String,
    #[sqlx(try_from = "String")]
    pub status: StudyStatus,
    pub archived: bool,
    pub external_study_id: Option<String>,
    #[sqlx(try_from = "String")]
    pub evaluation_mode: EvaluationMode,
    pub config: Json<StudyConfig>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Task {
    pub id: Uuid,
    pub study_id: Uuid,
    pub scenario: String,
    /// Single-item mode
    pub item_path: Option<String>,
    /// Comparison mode, label A
    pub item_a_path: Option<String>,
    /// Comparison mode, label B
    pub item_b_path: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// What a new task points at; object storage paths are stored, never read.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TaskItems {
    Single { path: String },
    Pair { a: String, b: String },
}

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Participant {
    pub id: String,
    pub study_id: Uuid,
    pub external_id: Option<String>,
    pub session_id: String,
    #[sqlx(try_from = "String")]
    pub status: ParticipantStatus,
    /// Lower-cased mirror of the platform's submission status.
    pub external_status: Option<String>,
    pub assigned_task_ids: Vec<Uuid>,
    #[sqlx(try_from = "String")]
    pub screening_status: ScreeningStatus,
    pub screening_attempts: i32,
    pub screening_version: Option<String>,
    pub rejection_reason: Option<String>,
    pub rejected_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Participant {
    pub fn is_anonymous(&self) -> bool {
        self.id.starts_with(ANONYMOUS_PREFIX)
    }
}

#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Submission {
    pub id: Uuid,
    pub task_id: Uuid,
    pub participant_id: String,
    #[sqlx(try_from = "String")]
    pub status: SubmissionStatus,
    pub payload: serde_json::Value,
    pub winner: Option<String>,
    pub completion_time_seconds: Option<f64>,
    pub client_metadata: serde_json::Value,
    pub last_saved_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Fields written by `upsert_draft` / `upsert_completed`.
#[derive(Debug, Clone)]
pub struct SubmissionWrite<'a> {
    pub task_id: Uuid,
    pub participant_id: &'a str,
    pub payload: &'a serde_json::Value,
    pub winner: Option<&'a str>,
    pub completion_time_seconds: Option<f64>,
    pub client_metadata: &'a serde_json::Value,
}

/// Row shape for a participant created through `get_or_create_participant`.
#[derive(Debug, Clone)]
pub struct NewParticipant {
    pub id: String,
    pub study_id: Uuid,
    pub external_id: Option<String>,
    pub session_id: String,
    pub assigned_task_ids: Vec<Uuid>,
}
