use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use uuid::Uuid;

use crate::models::job::SearchInput;
use crate::services::lifecycle::ProgressReporter;

/// Results and metadata produced by one pipeline run.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineOutput {
    pub results: serde_json::Value,
    pub meta: serde_json::Value,
}

/// The search pipeline: image understanding, cropping, web search, ranking.
///
/// A stale job may be retried, so a run must be safe to repeat for the same
/// `job_id`. Implementations call `progress.report` at their own stage
/// boundaries.
#[async_trait]
pub trait Pipeline: Send + Sync {
    async fn run(
        &self,
        job_id: Uuid,
        input: &SearchInput,
        progress: &ProgressReporter,
    ) -> Result<PipelineOutput, PipelineError>;
}

/// Client for the external search pipeline service.
///
/// Each category is searched with its own request so that progress can be
/// reported as categories finish.
pub struct HttpPipeline {
    http: Client,
    base_url: String,
    api_token: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CategorySearchRequest<'a> {
    job_id: Uuid,
    category: &'a str,
    images: &'a [String],
}

#[derive(Deserialize)]
struct CategorySearchResponse {
    results: serde_json::Value,
    #[serde(default)]
    meta: serde_json::Value,
}

/// Progress reported once `done` of `total` categories have finished. The
/// last few points are left for completion.
fn category_progress(done: usize, total: usize) -> u8 {
    if total == 0 {
        return 95;
    }
    (5 + done * 90 / total).min(95) as u8
}

impl HttpPipeline {
    pub fn new(
        base_url: &str,
        api_token: Option<String>,
        timeout: Duration,
    ) -> Result<Self, PipelineError> {
        let http = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_token,
        })
    }
}

#[async_trait]
impl Pipeline for HttpPipeline {
    async fn run(
        &self,
        job_id: Uuid,
        input: &SearchInput,
        progress: &ProgressReporter,
    ) -> Result<PipelineOutput, PipelineError> {
        let url = format!("{}/search", self.base_url);
        let total = input.categories.len();
        let started = Instant::now();

        let mut results = serde_json::Map::new();
        let mut per_category = serde_json::Map::new();

        progress.report(category_progress(0, total)).await;

        for (idx, category) in input.categories.iter().enumerate() {
            let category_start = Instant::now();
            let mut request = self.http.post(&url).json(&CategorySearchRequest {
                job_id,
                category: &category.name,
                images: &category.images,
            });
            if let Some(token) = &self.api_token {
                request = request.bearer_auth(token);
            }

            let response = request.send().await?;
            let status = response.status();
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                return Err(PipelineError::Status {
                    category: category.name.clone(),
                    status: status.as_u16(),
                    body,
                });
            }

            let body: CategorySearchResponse = response.json().await?;
            tracing::debug!(
                job_id = %job_id,
                category = %category.name,
                elapsed_ms = category_start.elapsed().as_millis() as u64,
                "Category search complete"
            );

            results.insert(category.name.clone(), body.results);
            per_category.insert(category.name.clone(), body.meta);
            progress.report(category_progress(idx + 1, total)).await;
        }

        let meta = serde_json::json!({
            "categories": total,
            "elapsedMs": started.elapsed().as_millis() as u64,
            "perCategory": per_category,
        });

        Ok(PipelineOutput {
            results: serde_json::Value::Object(results),
            meta,
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Pipeline rejected category '{category}' with status {status}: {body}")]
    Status {
        category: String,
        status: u16,
        body: String,
    },

    #[error("{0}")]
    Stage(String),

    #[error("Pipeline run exceeded {} seconds", .0.as_secs())]
    TimedOut(Duration),
}
