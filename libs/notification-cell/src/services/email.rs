// libs/notification-cell/src/services/email.rs
use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;
use tracing::{debug, error, info};

use shared_config::AppConfig;

use crate::models::{Channel, DispatchOutcome, NotificationJob, RenderedMessage};
use crate::services::dispatch::{failure_for_error, failure_for_status, ChannelDispatcher};

/// Transactional email dispatcher. POSTs to the provider's `/emails` endpoint
/// and reads the message id out of the response body.
pub struct EmailDispatcher {
    client: Client,
    config: Arc<AppConfig>,
}

impl EmailDispatcher {
    pub fn new(config: Arc<AppConfig>) -> Self {
        Self {
            client: Client::new(),
            config,
        }
    }
}

#[async_trait]
impl ChannelDispatcher for EmailDispatcher {
    fn channel(&self) -> Channel {
        Channel::Email
    }

    async fn send(&self, job: &NotificationJob, message: &RenderedMessage) -> DispatchOutcome {
        let to = match message.recipient.email.as_deref() {
            Some(address) => address,
            None => {
                return DispatchOutcome::PermanentFailure {
                    detail: "recipient has no email address".to_string(),
                    http_status: None,
                }
            }
        };

        let url = format!("{}/emails", self.config.email_api_base_url);
        let request_body = json!({
            "from": self.config.email_from_address,
            "to": to,
            "subject": message.subject,
            "text": message.body,
        });

        debug!(job_id = %job.id, "Sending email via {}", url);

        let response = match self
            .client
            .post(&url)
            .header(
                "Authorization",
                format!("Bearer {}", self.config.email_api_key),
            )
            .header("Content-Type", "application/json")
            .json(&request_body)
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => {
                error!(job_id = %job.id, "Email request failed: {}", e);
                return failure_for_error(&e);
            }
        };

        let status = response.status();
        let response_text = response.text().await.unwrap_or_default();

        if !status.is_success() {
            error!(
                job_id = %job.id,
                "Email provider rejected message: {} - {}",
                status, response_text
            );
            return failure_for_status(status.as_u16(), response_text);
        }

        let external_message_id = serde_json::from_str::<serde_json::Value>(&response_text)
            .ok()
            .and_then(|body| body["id"].as_str().map(str::to_string));

        info!(
            job_id = %job.id,
            "Email delivered to {} (message id {:?})",
            to, external_message_id
        );

        DispatchOutcome::Delivered {
            external_message_id,
            http_status: Some(status.as_u16()),
        }
    }
}
