//! Error taxonomy shared by the lifecycle, screening and sync paths.
//!
//! Domain failures are surfaced to the caller as-is; database failures are
//! reported to HTTP clients with a generic message and logged in full.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::sync::SyncReport;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// Task, study or participant missing (404)
    #[error("Not found: {0}")]
    NotFound(String),

    /// Duplicate completion, already-screened participant (409)
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Missing dimensions, out-of-range rating, malformed identifiers (400)
    #[error("Validation failed: {0}")]
    ValidationFailed(String),

    /// Recruitment platform call failed or timed out (502)
    #[error("External platform unavailable: {0}")]
    ExternalUnavailable(String),

    /// Batch sync finished with per-row failures (207)
    #[error("Sync finished with {} failed rows", .0.failed)]
    PartialSyncFailure(SyncReport),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl Error {
    pub fn code(&self) -> &'static str {
        match self {
            Error::NotFound(_) => "NOT_FOUND",
            Error::Conflict(_) => "CONFLICT",
            Error::ValidationFailed(_) => "VALIDATION_FAILED",
            Error::ExternalUnavailable(_) => "EXTERNAL_UNAVAILABLE",
            Error::PartialSyncFailure(_) => "PARTIAL_SYNC_FAILURE",
            Error::Database(_) => "INTERNAL_ERROR",
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let code = self.code();
        let (status, message) = match self {
            Error::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            Error::Conflict(msg) => (StatusCode::CONFLICT, msg),
            Error::ValidationFailed(msg) => (StatusCode::BAD_REQUEST, msg),
            Error::ExternalUnavailable(msg) => (StatusCode::BAD_GATEWAY, msg),
            Error::PartialSyncFailure(report) => {
                let body = Json(json!({
                    "error": {
                        "code": code,
                        "message": format!("{} of {} rows failed", report.failed, report.processed + report.failed),
                    },
                    "report": report,
                }));
                return (StatusCode::MULTI_STATUS, body).into_response();
            }
            Error::Database(err) => {
                tracing::error!("Database error: {}", err);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
        };

        let body = Json(json!({
            "error": {
                "code": code,
                "message": message,
            }
        }));

        (status, body).into_response()
    }
}
