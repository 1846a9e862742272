//! Turning one export row into a participant metadata patch.
//!
//! Only columns the row actually carries produce keys, so an absent column
//! never overwrites a value learned from an earlier export.

use serde_json::{Map, Value};

use crate::platform::ExportRow;

const DEMOGRAPHIC_COLUMNS: &[&str] = &[
    "age",
    "sex",
    "ethnicity_simplified",
    "country_of_birth",
    "country_of_residence",
    "nationality",
    "language",
    "student_status",
    "employment_status",
];

const TIMESTAMP_COLUMNS: &[&str] = &["started_at", "completed_at", "reviewed_at", "time_taken"];

/// Largest amount, in cents, still exactly representable as an `f64`.
const MAX_CENTS: f64 = 9_007_199_254_740_991.0;

/// Parses a currency amount into cents. Accepts numbers and numeric strings
/// with an optional leading currency symbol. Out-of-range amounts are
/// malformed.
pub fn parse_cents(value: &Value) -> Option<i64> {
    let amount = match value {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s
            .trim()
            .trim_start_matches(['$', '£', '€'])
            .trim()
            .parse::<f64>()
            .ok()?,
        _ => return None,
    };
    let cents = (amount * 100.0).round();
    (cents.is_finite() && cents.abs() <= MAX_CENTS).then_some(cents as i64)
}

/// Sum of a bonus list in cents. Anything malformed contributes zero.
pub fn bonus_cents(value: &Value) -> i64 {
    match value {
        Value::Array(items) => items
            .iter()
            .map(parse_cents)
            .try_fold(0i64, |acc, c| c.and_then(|c| acc.checked_add(c)))
            .unwrap_or(0),
        Value::Number(_) => parse_cents(value).unwrap_or(0),
        Value::String(s) => match serde_json::from_str::<Value>(s) {
            Ok(parsed @ (Value::Array(_) | Value::Number(_))) => bonus_cents(&parsed),
            _ => 0,
        },
        _ => 0,
    }
}

pub fn cents_to_amount(cents: i64) -> f64 {
    cents as f64 / 100.0
}

/// Normalised external status: the platform's string, lower-cased.
pub fn external_status(row: &ExportRow) -> Option<String> {
    row.text("status").map(|s| s.to_lowercase())
}

pub fn row_patch(row: &ExportRow) -> Map<String, Value> {
    let mut patch = Map::new();

    for column in DEMOGRAPHIC_COLUMNS {
        if let Some(value) = row.get(column) {
            patch.insert(format!("demographic_{}", column), value.clone());
        }
    }

    for column in TIMESTAMP_COLUMNS {
        if let Some(value) = row.get(column) {
            patch.insert(format!("external_{}", column), value.clone());
        }
    }

    let bonus = row.get("bonus_payments").map(bonus_cents);
    if let Some(bonus) = bonus {
        patch.insert("payment_bonus".to_string(), Value::from(cents_to_amount(bonus)));
    }
    let base = row.get("reward").and_then(parse_cents);
    let total = base.and_then(|b| b.checked_add(bonus.unwrap_or(0)));
    if let (Some(base), Some(total)) = (base, total) {
        patch.insert("payment_base".to_string(), Value::from(cents_to_amount(base)));
        patch.insert("payment_total".to_string(), Value::from(cents_to_amount(total)));
    }

    patch
}

/// True when merging `patch` would leave `existing` unchanged.
pub fn is_noop(existing: &Value, patch: &Map<String, Value>) -> bool {
    let existing = existing.as_object();
    patch
        .iter()
        .all(|(k, v)| existing.and_then(|m| m.get(k)) == Some(v))
}
