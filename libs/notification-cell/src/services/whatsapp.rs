// libs/notification-cell/src/services/whatsapp.rs
use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use regex::Regex;
use reqwest::Client;
use serde_json::json;
use tracing::{debug, error, info};

use shared_config::AppConfig;

use crate::models::{Channel, DispatchOutcome, NotificationJob, RenderedMessage};
use crate::services::dispatch::{failure_for_error, failure_for_status, ChannelDispatcher};
use crate::services::template::whatsapp_template_name;

fn destination_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^55\d{10,11}$").expect("literal pattern compiles"))
}

/// Normalize a raw phone number into the international form the WhatsApp API
/// accepts: digits only, Brazilian country code, no leading trunk zero.
/// 13-digit numbers in the 1x area codes get trimmed to the 12-digit form.
/// Returns `None` when the result is not a plausible destination.
pub fn format_phone(raw: &str) -> Option<String> {
    let mut cleaned: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();

    if let Some(stripped) = cleaned.strip_prefix('0') {
        cleaned = stripped.to_string();
    }

    if cleaned.len() == 10 || cleaned.len() == 11 {
        cleaned = format!("55{}", cleaned);
    }

    if cleaned.len() == 13 && cleaned.starts_with("551") {
        cleaned.truncate(12);
    }

    if destination_pattern().is_match(&cleaned) {
        Some(cleaned)
    } else {
        None
    }
}

/// WhatsApp Business Cloud API dispatcher. Sends pre-approved template
/// messages; free-form text is not allowed outside a 24h session window, so
/// every notification goes out as a template.
pub struct WhatsappDispatcher {
    client: Client,
    config: Arc<AppConfig>,
}

impl WhatsappDispatcher {
    pub fn new(config: Arc<AppConfig>) -> Self {
        Self {
            client: Client::new(),
            config,
        }
    }
}

#[async_trait]
impl ChannelDispatcher for WhatsappDispatcher {
    fn channel(&self) -> Channel {
        Channel::Whatsapp
    }

    async fn send(&self, job: &NotificationJob, message: &RenderedMessage) -> DispatchOutcome {
        let raw_phone = match message.recipient.phone.as_deref() {
            Some(phone) => phone,
            None => {
                return DispatchOutcome::PermanentFailure {
                    detail: "recipient has no phone number".to_string(),
                    http_status: None,
                }
            }
        };

        let to = match format_phone(raw_phone) {
            Some(phone) => phone,
            None => {
                return DispatchOutcome::PermanentFailure {
                    detail: format!("phone number {} is not a valid WhatsApp destination", raw_phone),
                    http_status: None,
                }
            }
        };

        let url = format!(
            "{}/{}/messages",
            self.config.whatsapp_api_base_url, self.config.whatsapp_phone_number_id
        );

        let parameters: Vec<serde_json::Value> = message
            .template_params
            .iter()
            .map(|text| json!({ "type": "text", "text": text }))
            .collect();

        let request_body = json!({
            "messaging_product": "whatsapp",
            "to": to,
            "type": "template",
            "template": {
                "name": whatsapp_template_name(job.template_kind),
                "language": { "code": self.config.whatsapp_template_language },
                "components": [
                    {
                        "type": "body",
                        "parameters": parameters,
                    }
                ],
            },
        });

        debug!(job_id = %job.id, "Sending WhatsApp template to {}", to);

        let response = match self
            .client
            .post(&url)
            .header(
                "Authorization",
                format!("Bearer {}", self.config.whatsapp_access_token),
            )
            .header("Content-Type", "application/json")
            .json(&request_body)
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => {
                error!(job_id = %job.id, "WhatsApp request failed: {}", e);
                return failure_for_error(&e);
            }
        };

        let status = response.status();
        let response_text = response.text().await.unwrap_or_default();

        if !status.is_success() {
            error!(
                job_id = %job.id,
                "WhatsApp API rejected message: {} - {}",
                status, response_text
            );
            return failure_for_status(status.as_u16(), response_text);
        }

        let external_message_id = serde_json::from_str::<serde_json::Value>(&response_text)
            .ok()
            .and_then(|body| body["messages"][0]["id"].as_str().map(str::to_string));

        info!(
            job_id = %job.id,
            "WhatsApp template delivered to {} (message id {:?})",
            to, external_message_id
        );

        DispatchOutcome::Delivered {
            external_message_id,
            http_status: Some(status.as_u16()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_phone_adds_country_code_to_local_numbers() {
        assert_eq!(
            format_phone("21 2345-6789").as_deref(),
            Some("552123456789")
        );
        assert_eq!(
            format_phone("21 98765-4321").as_deref(),
            Some("5521987654321")
        );
    }

    #[test]
    fn test_format_phone_strips_leading_trunk_zero() {
        assert_eq!(
            format_phone("021 2345-6789").as_deref(),
            Some("552123456789")
        );
    }

    #[test]
    fn test_format_phone_trims_long_sao_paulo_mobiles() {
        // An 11-digit mobile in a 1x area code picks up the country code and
        // then gets trimmed back to 12 digits.
        assert_eq!(
            format_phone("(11) 98765-4321").as_deref(),
            Some("551198765432")
        );
        assert_eq!(
            format_phone("+55 11 91234-5678").as_deref(),
            Some("551191234567")
        );
    }

    #[test]
    fn test_format_phone_keeps_already_international_numbers() {
        assert_eq!(
            format_phone("5521987654321").as_deref(),
            Some("5521987654321")
        );
    }

    #[test]
    fn test_format_phone_rejects_garbage() {
        assert_eq!(format_phone(""), None);
        assert_eq!(format_phone("123"), None);
        assert_eq!(format_phone("not a phone"), None);
    }
}
