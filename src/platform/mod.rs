//! Boundary to the external recruitment platform.

mod prolific;

pub use prolific::ProlificClient;

use async_trait::async_trait;
use serde::Serialize;
use std::collections::BTreeMap;

/// Values the platform uses in place of data a participant withheld.
const WITHHELD: &[&str] = &["DATA_EXPIRED", "CONSENT_REVOKED", "CONSENT_REVOKED_BY_PARTICIPANT"];

/// One row of a study's submission export, keyed by normalised column name
/// (lower-case, spaces and hyphens folded to `_`).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExportRow {
    columns: BTreeMap<String, serde_json::Value>,
}

pub fn normalize_column(name: &str) -> String {
    name.trim()
        .to_lowercase()
        .chars()
        .map(|c| if c == ' ' || c == '-' { '_' } else { c })
        .collect()
}

impl ExportRow {
    /// Non-object values become an empty row, which fails downstream as a
    /// row without a participant id.
    pub fn from_value(value: serde_json::Value) -> Self {
        let columns = match value {
            serde_json::Value::Object(map) => map
                .into_iter()
                .map(|(k, v)| (normalize_column(&k), v))
                .collect(),
            _ => BTreeMap::new(),
        };
        Self { columns }
    }

    pub fn from_pairs<'a>(pairs: impl IntoIterator<Item = (&'a str, serde_json::Value)>) -> Self {
        Self {
            columns: pairs
                .into_iter()
                .map(|(k, v)| (normalize_column(k), v))
                .collect(),
        }
    }

    /// A column's value; absent, null, empty and withheld all read as unknown.
    pub fn get(&self, column: &str) -> Option<&serde_json::Value> {
        self.columns.get(column).filter(|v| match v {
            serde_json::Value::Null => false,
            serde_json::Value::String(s) => {
                let s = s.trim();
                !s.is_empty() && !WITHHELD.contains(&s)
            }
            _ => true,
        })
    }

    pub fn text(&self, column: &str) -> Option<String> {
        match self.get(column)? {
            serde_json::Value::String(s) => Some(s.trim().to_string()),
            serde_json::Value::Number(n) => Some(n.to_string()),
            serde_json::Value::Bool(b) => Some(b.to_string()),
            _ => None,
        }
    }

    pub fn participant_id(&self) -> Option<String> {
        self.text("participant_id").or_else(|| self.text("participant"))
    }

    pub fn submission_id(&self) -> Option<String> {
        self.text("submission_id").or_else(|| self.text("id"))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RejectionCategory {
    FailedCheck,
    LowEffort,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SubmissionAction {
    Approve,
    Reject {
        reason: String,
        category: RejectionCategory,
    },
}

#[async_trait]
pub trait RecruitmentPlatform: Send + Sync {
    /// The study's current status string, as the platform reports it.
    async fn study_status(&self, external_study_id: &str) -> anyhow::Result<String>;

    /// Full current export of the study's submissions.
    async fn submissions_export(&self, external_study_id: &str) -> anyhow::Result<Vec<ExportRow>>;

    async fn transition_submission(
        &self,
        submission_id: &str,
        action: &SubmissionAction,
    ) -> anyhow::Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn column_names_are_normalised() {
        let row = ExportRow::from_value(json!({"Participant id": "p1", "Country-of-birth": "UK"}));
        assert_eq!(row.text("participant_id").as_deref(), Some("p1"));
        assert_eq!(row.text("country_of_birth").as_deref(), Some("UK"));
    }

    #[test]
    fn absent_and_withheld_values_are_unknown() {
        let row = ExportRow::from_pairs([
            ("age", json!("DATA_EXPIRED")),
            ("sex", json!(null)),
            ("language", json!("  ")),
            ("reward", json!(5)),
        ]);
        assert_eq!(row.get("age"), None);
        assert_eq!(row.get("sex"), None);
        assert_eq!(row.get("language"), None);
        assert_eq!(row.get("nationality"), None);
        assert_eq!(row.text("reward").as_deref(), Some("5"));
    }

    #[test]
    fn non_object_row_has_no_participant() {
        assert_eq!(ExportRow::from_value(json!([1, 2])).participant_id(), None);
    }
}
