use std::env;
use std::str::FromStr;
use tracing::warn;

fn env_or<T: FromStr>(name: &str, default: T) -> T {
    match env::var(name) {
        Ok(raw) => match raw.parse::<T>() {
            Ok(value) => value,
            Err(_) => {
                warn!("{} has an unparsable value '{}', using default", name, raw);
                default
            }
        },
        Err(_) => default,
    }
}

fn env_string(name: &str) -> String {
    env::var(name).unwrap_or_else(|_| {
        warn!("{} not set, using empty value", name);
        String::new()
    })
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub port: u16,

    // Scheduling
    pub default_max_concurrent: u32,
    pub scheduling_max_write_retries: u32,

    // Notification dispatch
    pub notification_max_retries: u32,
    pub notification_base_delay_ms: u64,
    pub dispatch_timeout_seconds: u64,
    pub retry_jitter: bool,
    pub reminder_sweep_tolerance_minutes: i64,
    pub notification_worker_count: u32,
    pub worker_poll_interval_ms: u64,

    // Email provider
    pub email_api_base_url: String,
    pub email_api_key: String,
    pub email_from_address: String,

    // WhatsApp Cloud API
    pub whatsapp_api_base_url: String,
    pub whatsapp_phone_number_id: String,
    pub whatsapp_access_token: String,
    pub whatsapp_template_language: String,

    // Push provider
    pub push_api_base_url: String,
    pub push_batch_size: usize,
}

impl AppConfig {
    pub fn from_env() -> Self {
        let config = Self {
            port: env_or("PORT", 3000),

            default_max_concurrent: env_or("DEFAULT_MAX_CONCURRENT", 1).max(1),
            scheduling_max_write_retries: env_or("SCHEDULING_MAX_WRITE_RETRIES", 3).max(1),

            notification_max_retries: env_or("NOTIFICATION_MAX_RETRIES", 3),
            notification_base_delay_ms: env_or("NOTIFICATION_BASE_DELAY_MS", 1000),
            dispatch_timeout_seconds: env_or("DISPATCH_TIMEOUT_SECONDS", 30),
            retry_jitter: env_or("RETRY_JITTER", false),
            reminder_sweep_tolerance_minutes: env_or("REMINDER_SWEEP_TOLERANCE_MINUTES", 30),
            notification_worker_count: env_or("NOTIFICATION_WORKER_COUNT", 4).max(1),
            worker_poll_interval_ms: env_or("WORKER_POLL_INTERVAL_MS", 1000),

            email_api_base_url: env::var("EMAIL_API_BASE_URL")
                .unwrap_or_else(|_| "https://api.resend.com".to_string()),
            email_api_key: env_string("EMAIL_API_KEY"),
            email_from_address: env_string("EMAIL_FROM_ADDRESS"),

            whatsapp_api_base_url: env::var("WHATSAPP_API_BASE_URL")
                .unwrap_or_else(|_| "https://graph.facebook.com/v18.0".to_string()),
            whatsapp_phone_number_id: env_string("WHATSAPP_PHONE_NUMBER_ID"),
            whatsapp_access_token: env_string("WHATSAPP_ACCESS_TOKEN"),
            whatsapp_template_language: env::var("WHATSAPP_TEMPLATE_LANGUAGE")
                .unwrap_or_else(|_| "pt_BR".to_string()),

            push_api_base_url: env::var("PUSH_API_BASE_URL")
                .unwrap_or_else(|_| "https://exp.host".to_string()),
            push_batch_size: env_or("PUSH_BATCH_SIZE", 100).max(1),
        };

        if !config.is_configured() {
            warn!("Application not fully configured - notification channels with missing credentials will fail permanently");
        }

        config
    }

    /// True when every outbound channel has credentials.
    pub fn is_configured(&self) -> bool {
        self.is_email_configured() && self.is_whatsapp_configured() && self.is_push_configured()
    }

    pub fn is_email_configured(&self) -> bool {
        !self.email_api_base_url.is_empty()
            && !self.email_api_key.is_empty()
            && !self.email_from_address.is_empty()
    }

    pub fn is_whatsapp_configured(&self) -> bool {
        !self.whatsapp_api_base_url.is_empty()
            && !self.whatsapp_phone_number_id.is_empty()
            && !self.whatsapp_access_token.is_empty()
    }

    pub fn is_push_configured(&self) -> bool {
        !self.push_api_base_url.is_empty()
    }
}
