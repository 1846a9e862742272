use anyhow::{anyhow, bail, Context};
use async_trait::async_trait;
use reqwest::{Client, Method, StatusCode};
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tracing::{info, warn};

use super::{ExportRow, RecruitmentPlatform, SubmissionAction};

const MAX_ATTEMPTS: u32 = 3;
/// Guards against a `next` link that never ends.
const MAX_EXPORT_PAGES: usize = 100;

#[derive(Debug, Deserialize)]
struct StudyResponse {
    status: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SubmissionsPage {
    #[serde(default)]
    results: Vec<serde_json::Value>,
    #[serde(rename = "_links")]
    links: Option<PageLinks>,
}

#[derive(Debug, Deserialize)]
struct PageLinks {
    next: Option<Link>,
}

#[derive(Debug, Deserialize)]
struct Link {
    href: Option<String>,
}

pub struct ProlificClient {
    client: Client,
    base_url: String,
    api_token: String,
}

impl ProlificClient {
    pub fn new(base_url: &str, api_token: String, timeout: Duration) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_token,
        })
    }

    /// Sends a request, retrying rate limits and server errors with
    /// exponential backoff. Returns the response body on success.
    async fn send(&self, method: Method, url: &str, body: Option<&serde_json::Value>) -> anyhow::Result<String> {
        let mut attempt = 0;
        let mut backoff = 1u64;

        loop {
            attempt += 1;
            let mut request = self
                .client
                .request(method.clone(), url)
                .header("Authorization", format!("Token {}", self.api_token));
            if let Some(body) = body {
                request = request.json(body);
            }

            let response = request
                .send()
                .await
                .with_context(|| format!("{} {} failed", method, url))?;
            let status = response.status();
            let text = response
                .text()
                .await
                .with_context(|| format!("reading response of {} {}", method, url))?;

            if status.is_success() {
                return Ok(text);
            }

            let retryable = status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error();
            if !retryable || attempt >= MAX_ATTEMPTS {
                bail!("{} {} returned {}: {}", method, url, status, text);
            }

            warn!(
                "Recruitment platform returned {} for {} (attempt {}/{}), retrying in {}s",
                status, url, attempt, MAX_ATTEMPTS, backoff
            );
            tokio::time::sleep(Duration::from_secs(backoff)).await;
            backoff *= 2;
        }
    }
}

#[async_trait]
impl RecruitmentPlatform for ProlificClient {
    async fn study_status(&self, external_study_id: &str) -> anyhow::Result<String> {
        let url = format!("{}/api/v1/studies/{}/", self.base_url, external_study_id);
        let text = self.send(Method::GET, &url, None).await?;
        let study: StudyResponse =
            serde_json::from_str(&text).context("Failed to parse study response")?;
        study
            .status
            .ok_or_else(|| anyhow!("study {} response has no status", external_study_id))
    }

    async fn submissions_export(&self, external_study_id: &str) -> anyhow::Result<Vec<ExportRow>> {
        let mut url = format!("{}/api/v1/studies/{}/submissions/", self.base_url, external_study_id);
        let mut rows = Vec::new();

        for _ in 0..MAX_EXPORT_PAGES {
            let text = self.send(Method::GET, &url, None).await?;
            let page: SubmissionsPage =
                serde_json::from_str(&text).context("Failed to parse submissions export")?;
            rows.extend(page.results.into_iter().map(ExportRow::from_value));

            match page.links.and_then(|l| l.next).and_then(|n| n.href) {
                Some(next) => url = next,
                None => {
                    info!("Fetched {} export rows for study {}", rows.len(), external_study_id);
                    return Ok(rows);
                }
            }
        }

        bail!(
            "submissions export for {} exceeded {} pages",
            external_study_id,
            MAX_EXPORT_PAGES
        )
    }

    async fn transition_submission(
        &self,
        submission_id: &str,
        action: &SubmissionAction,
    ) -> anyhow::Result<()> {
        let url = format!("{}/api/v1/submissions/{}/transition/", self.base_url, submission_id);
        let body = match action {
            SubmissionAction::Approve => json!({ "action": "APPROVE" }),
            SubmissionAction::Reject { reason, category } => json!({
                "action": "REJECT",
                "message": reason,
                "rejection_category": category,
            }),
        };
        self.send(Method::POST, &url, Some(&body)).await?;
        info!("Submission {} transitioned: {:?}", submission_id, action);
        Ok(())
    }
}
