use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use std::time::Duration;
use uuid::Uuid;

use crate::client::poller::{SourceError, StatusSource};
use crate::models::job::SearchInput;
use crate::models::search::{JobStatusResponse, SubmitResponse};

/// [`StatusSource`] backed by the search API over HTTP.
#[derive(Clone)]
pub struct HttpJobClient {
    http: Client,
    base_url: String,
}

impl HttpJobClient {
    pub fn new(base_url: &str) -> Result<Self, SourceError> {
        let http = Client::builder().timeout(Duration::from_secs(30)).build()?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    async fn error_for(response: reqwest::Response) -> SourceError {
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        SourceError::Status { status, body }
    }
}

#[async_trait]
impl StatusSource for HttpJobClient {
    async fn submit(&self, input: &SearchInput) -> Result<Uuid, SourceError> {
        let response = self
            .http
            .post(format!("{}/api/v1/search", self.base_url))
            .json(input)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Self::error_for(response).await);
        }

        let submitted: SubmitResponse = response.json().await?;
        Ok(submitted.job_id)
    }

    async fn fetch(&self, job_id: Uuid) -> Result<Option<JobStatusResponse>, SourceError> {
        let response = self
            .http
            .get(format!("{}/api/v1/search/{}", self.base_url, job_id))
            .send()
            .await?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => Ok(Some(response.json().await?)),
            _ => Err(Self::error_for(response).await),
        }
    }
}
