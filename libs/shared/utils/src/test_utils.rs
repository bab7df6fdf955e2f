use std::sync::Arc;

use shared_config::AppConfig;

/// Canned configuration for tests. Provider base URLs default to localhost
/// placeholders; dispatcher tests overwrite them with a mock server URI.
pub struct TestConfig {
    pub email_api_base_url: String,
    pub whatsapp_api_base_url: String,
    pub push_api_base_url: String,
}

impl Default for TestConfig {
    fn default() -> Self {
        Self {
            email_api_base_url: "http://localhost:9301".to_string(),
            whatsapp_api_base_url: "http://localhost:9302".to_string(),
            push_api_base_url: "http://localhost:9303".to_string(),
        }
    }
}

impl TestConfig {
    pub fn to_app_config(&self) -> AppConfig {
        AppConfig {
            port: 0,

            default_max_concurrent: 1,
            scheduling_max_write_retries: 3,

            notification_max_retries: 3,
            notification_base_delay_ms: 1000,
            dispatch_timeout_seconds: 30,
            retry_jitter: false,
            reminder_sweep_tolerance_minutes: 30,
            notification_worker_count: 2,
            worker_poll_interval_ms: 20,

            email_api_base_url: self.email_api_base_url.clone(),
            email_api_key: "test-email-key".to_string(),
            email_from_address: "clinic@example.com".to_string(),

            whatsapp_api_base_url: self.whatsapp_api_base_url.clone(),
            whatsapp_phone_number_id: "5550001111".to_string(),
            whatsapp_access_token: "test-whatsapp-token".to_string(),
            whatsapp_template_language: "pt_BR".to_string(),

            push_api_base_url: self.push_api_base_url.clone(),
            push_batch_size: 100,
        }
    }

    pub fn to_arc(&self) -> Arc<AppConfig> {
        Arc::new(self.to_app_config())
    }
}
