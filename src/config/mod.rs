use once_cell::sync::Lazy;
use std::env;

#[derive(Debug, Clone)]
pub struct Settings {
    // API Settings
    pub app_name: String,
    pub version: String,
    pub debug: bool,

    // Server Settings
    pub host: String,
    pub port: u16,

    // Database / cache
    pub database_url: String,
    pub redis_url: String,

    // Policy defaults (realm rows override most of these; these are fallbacks)
    pub allowed_symptom_age_days: i64,
    pub code_duration_minutes: i64,
    pub long_code_duration_minutes: i64,
    pub collision_retry_count: u32,
    pub enforce_realm_quotas: bool,
    pub authenticated_sms_fail_closed: bool,
    pub en_express_redirect_domain: String,

    // Quota HMAC key (hex-encoded), derives the daily rate-limit bucket key
    pub rate_limit_hmac_key: Vec<u8>,

    // Batch / nonce limits
    pub max_batch_size: usize,
    pub nonce_length: usize,

    // Outbound timeouts
    pub sms_provider_timeout_seconds: u64,
    pub webhook_timeout_seconds: u64,

    // Twilio-compatible SMS provider credentials
    pub twilio_account_sid: String,
    pub twilio_auth_token: String,
    /// Either a phone number (`From`) or a Messaging Service SID (`MG...`,
    /// sent as `MessagingServiceSid` instead); see `sms::sender_form_field`.
    pub twilio_sender_id: String,

    // SMS-signing key material (hex-encoded P-256 scalar), optional
    pub sms_signing_key_hex: Option<String>,
    pub sms_signing_key_id: String,
}

impl Settings {
    pub fn new() -> Self {
        Settings {
            app_name: get_env("APP_NAME", "Verification Code Server"),
            version: get_env("VERSION", "0.1.0"),
            debug: get_env_bool("DEBUG", false),

            host: get_env("HOST", "0.0.0.0"),
            port: get_env_int("PORT", 8080) as u16,

            database_url: get_env(
                "DATABASE_URL",
                "postgres://localhost:5432/verification?sslmode=disable",
            ),
            redis_url: get_env("REDIS_URL", "redis://localhost:6379"),

            allowed_symptom_age_days: get_env_int("ALLOWED_SYMPTOM_AGE_DAYS", 14) as i64,
            code_duration_minutes: get_env_int("CODE_DURATION_MINUTES", 15) as i64,
            long_code_duration_minutes: get_env_int("LONG_CODE_DURATION_MINUTES", 24 * 60) as i64,
            collision_retry_count: get_env_int("COLLISION_RETRY_COUNT", 6) as u32,
            enforce_realm_quotas: get_env_bool("ENFORCE_REALM_QUOTAS", true),
            authenticated_sms_fail_closed: get_env_bool("AUTHENTICATED_SMS_FAIL_CLOSED", false),
            en_express_redirect_domain: get_env("EN_EXPRESS_REDIRECT_DOMAIN", "en.express"),

            rate_limit_hmac_key: hex::decode(get_env(
                "RATE_LIMIT_HMAC_KEY",
                "0000000000000000000000000000000000000000000000000000000000000000",
            ))
            .unwrap_or_default(),

            max_batch_size: get_env_int("MAX_BATCH_SIZE", 10) as usize,
            nonce_length: get_env_int("NONCE_LENGTH", 256) as usize,

            sms_provider_timeout_seconds: get_env_int("SMS_PROVIDER_TIMEOUT_SECONDS", 5) as u64,
            webhook_timeout_seconds: get_env_int("WEBHOOK_TIMEOUT_SECONDS", 10) as u64,

            twilio_account_sid: get_env("TWILIO_ACCOUNT_SID", ""),
            twilio_auth_token: get_env("TWILIO_AUTH_TOKEN", ""),
            twilio_sender_id: get_env("TWILIO_SENDER_ID", ""),

            sms_signing_key_hex: env::var("SMS_SIGNING_KEY").ok(),
            sms_signing_key_id: get_env("SMS_SIGNING_KEY_ID", "v1"),
        }
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self::new()
    }
}

pub static SETTINGS: Lazy<Settings> = Lazy::new(Settings::new);

pub fn get_settings() -> &'static Settings {
    &SETTINGS
}

fn get_env(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn get_env_int(key: &str, default: i32) -> i32 {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn get_env_bool(key: &str, default: bool) -> bool {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
