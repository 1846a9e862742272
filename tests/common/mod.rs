//! Shared test helpers for integration tests.
//!
//! Tests isolate themselves by creating their own study with random
//! identifiers, so no table truncation is needed between tests.

#![allow(dead_code)]

use async_trait::async_trait;
use serde_json::json;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::OnceCell;
use uuid::Uuid;

use evalsync::db::{self, DbPool, EvaluationMode, Study, StudyConfig, Task, TaskItems};
use evalsync::platform::{ExportRow, RecruitmentPlatform, SubmissionAction};
use evalsync::sync::SyncEngine;

/// Returns the test database URL from the `TEST_DATABASE_URL` environment variable.
/// Panics if the variable is not set.
pub fn test_db_url() -> String {
    std::env::var("TEST_DATABASE_URL").expect("TEST_DATABASE_URL must be set for integration tests")
}

/// Returns true if the test database URL is configured.
pub fn has_test_db() -> bool {
    std::env::var("TEST_DATABASE_URL").is_ok()
}

static SCHEMA_INIT: OnceCell<()> = OnceCell::const_new();

/// Runs migrations once per test binary.
pub async fn ensure_schema() {
    SCHEMA_INIT
        .get_or_init(|| async {
            let pool = sqlx::PgPool::connect(&test_db_url()).await.unwrap();
            db::run_migrations(&pool).await.unwrap();
            pool.close().await;
        })
        .await;
}

/// Fresh pool per test; pools must not outlive the test's runtime.
pub async fn setup_test_db() -> DbPool {
    ensure_schema().await;
    db::create_pool(&test_db_url(), 5)
        .await
        .expect("Failed to connect to test database")
}

pub fn unique(prefix: &str) -> String {
    format!("{}{}", prefix, Uuid::new_v4().simple())
}

pub async fn create_study(pool: &DbPool, mode: EvaluationMode, config: StudyConfig, external: Option<&str>) -> Study {
    db::studies::create_study(pool.as_ref(), &unique("study-"), mode, &config, external)
        .await
        .unwrap()
}

/// A comparison study with `n` pair tasks, in creation order.
pub async fn comparison_study(pool: &DbPool, n: usize, config: StudyConfig) -> (Study, Vec<Task>) {
    let study = create_study(pool, EvaluationMode::Comparison, config, Some(&unique("ext-study-"))).await;
    let mut tasks = Vec::new();
    for i in 0..n {
        let items = TaskItems::Pair {
            a: format!("videos/{}/a.mp4", i),
            b: format!("videos/{}/b.mp4", i),
        };
        tasks.push(
            db::tasks::create_task(pool.as_ref(), study.id, &format!("scenario_{}", i), &items)
                .await
                .unwrap(),
        );
    }
    (study, tasks)
}

pub fn comparison_payload(choice: &str) -> serde_json::Value {
    json!({
        "dimension_scores": {
            "overall_quality": choice,
            "controllability": choice,
            "visual_quality": "Equal",
            "temporal_consistency": choice,
        }
    })
}

#[derive(Default)]
struct MockState {
    study_status: Option<String>,
    rows: Vec<ExportRow>,
    fail_transitions: bool,
    delay: Option<Duration>,
    transitions: Vec<(String, SubmissionAction)>,
    export_calls: usize,
}

/// In-process stand-in for the recruitment platform with scriptable
/// responses, failures and latency.
#[derive(Clone, Default)]
pub struct MockPlatform {
    state: Arc<Mutex<MockState>>,
}

impl MockPlatform {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_status(self, status: &str) -> Self {
        self.state.lock().unwrap().study_status = Some(status.to_string());
        self
    }

    pub fn with_rows(self, rows: Vec<ExportRow>) -> Self {
        self.state.lock().unwrap().rows = rows;
        self
    }

    pub fn failing_transitions(self) -> Self {
        self.state.lock().unwrap().fail_transitions = true;
        self
    }

    pub fn with_delay(self, delay: Duration) -> Self {
        self.state.lock().unwrap().delay = Some(delay);
        self
    }

    pub fn transitions(&self) -> Vec<(String, SubmissionAction)> {
        self.state.lock().unwrap().transitions.clone()
    }

    pub fn export_calls(&self) -> usize {
        self.state.lock().unwrap().export_calls
    }

    pub fn engine(&self, pool: &DbPool, timeout: Duration) -> Arc<SyncEngine> {
        let platform: Arc<dyn RecruitmentPlatform> = Arc::new(self.clone());
        Arc::new(SyncEngine::new(pool.clone(), Some(platform), timeout))
    }

    async fn pause(&self) {
        let delay = self.state.lock().unwrap().delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
    }
}

#[async_trait]
impl RecruitmentPlatform for MockPlatform {
    async fn study_status(&self, _external_study_id: &str) -> anyhow::Result<String> {
        self.pause().await;
        let status = self.state.lock().unwrap().study_status.clone();
        status.ok_or_else(|| anyhow::anyhow!("platform returned 503"))
    }

    async fn submissions_export(&self, _external_study_id: &str) -> anyhow::Result<Vec<ExportRow>> {
        self.pause().await;
        let mut state = self.state.lock().unwrap();
        state.export_calls += 1;
        Ok(state.rows.clone())
    }

    async fn transition_submission(&self, submission_id: &str, action: &SubmissionAction) -> anyhow::Result<()> {
        self.pause().await;
        let mut state = self.state.lock().unwrap();
        if state.fail_transitions {
            anyhow::bail!("platform returned 500 for submission {}", submission_id);
        }
        state.transitions.push((submission_id.to_string(), action.clone()));
        Ok(())
    }
}
