// libs/notification-cell/src/services/push.rs
use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;
use tracing::{debug, error, info, warn};

use shared_config::AppConfig;

use crate::models::{Channel, DispatchOutcome, NotificationJob, RenderedMessage};
use crate::services::dispatch::{failure_for_error, failure_for_status, ChannelDispatcher};

/// Mobile push dispatcher for the patient apps. The push service takes a JSON
/// array of messages and answers with one ticket per message; a contact can
/// hold several device tokens, so one job may fan out to several tickets.
pub struct PushDispatcher {
    client: Client,
    config: Arc<AppConfig>,
}

impl PushDispatcher {
    pub fn new(config: Arc<AppConfig>) -> Self {
        Self {
            client: Client::new(),
            config,
        }
    }
}

#[async_trait]
impl ChannelDispatcher for PushDispatcher {
    fn channel(&self) -> Channel {
        Channel::Push
    }

    async fn send(&self, job: &NotificationJob, message: &RenderedMessage) -> DispatchOutcome {
        let tokens = &message.recipient.push_tokens;
        if tokens.is_empty() {
            return DispatchOutcome::PermanentFailure {
                detail: "recipient has no registered devices".to_string(),
                http_status: None,
            };
        }

        let url = format!("{}/--/api/v2/push/send", self.config.push_api_base_url);
        let mut tickets: Vec<serde_json::Value> = Vec::new();
        let mut last_status = None;

        for chunk in tokens.chunks(self.config.push_batch_size.max(1)) {
            let request_body: Vec<serde_json::Value> = chunk
                .iter()
                .map(|token| {
                    json!({
                        "to": token,
                        "title": message.subject,
                        "body": message.body,
                        "data": {
                            "type": "appointment",
                            "kind": job.template_kind,
                            "appointment_id": job.appointment_id,
                        },
                    })
                })
                .collect();

            debug!(job_id = %job.id, "Sending {} push messages via {}", chunk.len(), url);

            let response = match self.client.post(&url).json(&request_body).send().await {
                Ok(response) => response,
                Err(e) => {
                    error!(job_id = %job.id, "Push request failed: {}", e);
                    return failure_for_error(&e);
                }
            };

            let status = response.status();
            let response_text = response.text().await.unwrap_or_default();

            if !status.is_success() {
                error!(
                    job_id = %job.id,
                    "Push service rejected batch: {} - {}",
                    status, response_text
                );
                return failure_for_status(status.as_u16(), response_text);
            }

            last_status = Some(status.as_u16());
            if let Ok(body) = serde_json::from_str::<serde_json::Value>(&response_text) {
                if let Some(items) = body["data"].as_array() {
                    tickets.extend(items.iter().cloned());
                }
            }
        }

        // Reaching at least one device counts as delivered.
        if tickets.iter().any(|ticket| ticket["status"] == "ok") {
            let external_message_id = tickets
                .iter()
                .filter(|ticket| ticket["status"] == "ok")
                .find_map(|ticket| ticket["id"].as_str())
                .map(str::to_string);

            info!(
                job_id = %job.id,
                "Push delivered ({} tickets, message id {:?})",
                tickets.len(),
                external_message_id
            );
            return DispatchOutcome::Delivered {
                external_message_id,
                http_status: last_status,
            };
        }

        let all_unregistered = !tickets.is_empty()
            && tickets
                .iter()
                .all(|ticket| ticket["details"]["error"] == "DeviceNotRegistered");

        if all_unregistered {
            warn!(job_id = %job.id, "All device tokens are stale, giving up");
            return DispatchOutcome::PermanentFailure {
                detail: "all device tokens are no longer registered".to_string(),
                http_status: last_status,
            };
        }

        let detail = tickets
            .iter()
            .find_map(|ticket| ticket["message"].as_str())
            .unwrap_or("push service returned no tickets")
            .to_string();

        warn!(job_id = %job.id, "Push attempt failed: {}", detail);
        DispatchOutcome::TransientFailure {
            detail,
            http_status: last_status,
        }
    }
}
