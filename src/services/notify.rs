use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use std::time::Duration;
use uuid::Uuid;

/// Best-effort "your results are ready" delivery (SMS, push, email…).
///
/// Returns whether the message was accepted. Callers log a `false` and move
/// on; delivery never affects job status.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, contact: &str, job_id: Uuid) -> bool;
}

/// Used when no delivery channel is configured.
#[derive(Debug, Default)]
pub struct NoopNotifier;

#[async_trait]
impl Notifier for NoopNotifier {
    async fn notify(&self, _contact: &str, job_id: Uuid) -> bool {
        tracing::debug!(job_id = %job_id, "No notifier configured, skipping");
        false
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct WebhookPayload<'a> {
    to: &'a str,
    job_id: Uuid,
    link: String,
}

/// Posts notifications to a delivery webhook with a shareable result link.
pub struct WebhookNotifier {
    http: Client,
    webhook_url: String,
    public_base_url: String,
}

impl WebhookNotifier {
    pub fn new(webhook_url: &str, public_base_url: &str) -> Result<Self, reqwest::Error> {
        let http = Client::builder().timeout(Duration::from_secs(10)).build()?;
        Ok(Self {
            http,
            webhook_url: webhook_url.to_string(),
            public_base_url: public_base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Permanent link to the job's results, served from the durable store.
    pub fn result_link(&self, job_id: Uuid) -> String {
        format!("{}/api/v1/search/{}", self.public_base_url, job_id)
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn notify(&self, contact: &str, job_id: Uuid) -> bool {
        let payload = WebhookPayload {
            to: contact,
            job_id,
            link: self.result_link(job_id),
        };

        match self.http.post(&self.webhook_url).json(&payload).send().await {
            Ok(response) if response.status().is_success() => true,
            Ok(response) => {
                tracing::warn!(
                    job_id = %job_id,
                    status = response.status().as_u16(),
                    "Notification webhook rejected message"
                );
                false
            }
            Err(e) => {
                tracing::warn!(job_id = %job_id, error = %e, "Notification webhook unreachable");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_result_link_has_no_double_slash() {
        let notifier =
            WebhookNotifier::new("http://localhost:9/hook", "https://search.example.com/").unwrap();
        let id = Uuid::nil();
        assert_eq!(
            notifier.result_link(id),
            format!("https://search.example.com/api/v1/search/{id}")
        );
    }
}
