use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

/// Bitmask over accepted diagnosis test types, stored on [`Realm`].
pub mod test_type {
    pub const CONFIRMED: i16 = 1 << 0;
    pub const LIKELY: i16 = 1 << 1;
    pub const NEGATIVE: i16 = 1 << 2;
    pub const USER_REPORT: i16 = 1 << 3;

    /// `accept_test_types` is hierarchical: accepting "likely" implies
    /// "confirmed", accepting "negative" implies both. `user-report` is
    /// orthogonal and additive.
    pub fn from_token(token: &str) -> Option<i16> {
        match token {
            "confirmed" => Some(CONFIRMED),
            "likely" => Some(CONFIRMED | LIKELY),
            "negative" => Some(CONFIRMED | LIKELY | NEGATIVE),
            "user-report" => Some(USER_REPORT),
            _ => None,
        }
    }

    pub fn single(token: &str) -> Option<i16> {
        match token {
            "confirmed" => Some(CONFIRMED),
            "likely" => Some(LIKELY),
            "negative" => Some(NEGATIVE),
            "user-report" => Some(USER_REPORT),
            _ => None,
        }
    }
}

/// Bitmask over what an [`AuthorizedApp`] is permitted to do.
pub mod permission {
    pub const ISSUE_CODE: i16 = 1 << 0;
    pub const BULK_ISSUE_CODE: i16 = 1 << 1;
    pub const STATUS_CHECK: i16 = 1 << 2;
    pub const EXPIRE_CODE: i16 = 1 << 3;
}

/// An issuing authority's policy bundle.
#[allow(dead_code)]
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct Realm {
    pub id: i64,
    pub name: String,

    pub allowed_test_types: i16,
    pub code_length: i32,
    pub long_code_length: i32,
    pub code_duration_minutes: i64,
    pub long_code_duration_minutes: i64,
    pub require_date: bool,

    pub abuse_prevention_enabled: bool,
    pub daily_quota: i64,
    pub realm_hmac_key: Vec<u8>,
    pub enforce_realm_quotas: bool,

    pub allow_bulk_upload: bool,
    pub allow_generated_sms: bool,
    pub allow_admin_user_report: bool,
    pub allows_user_report: bool,

    pub sms_country: String,
    pub sms_template: String,
    pub sms_template_user_report: Option<String>,

    pub user_report_webhook_url: Option<String>,
    pub user_report_webhook_secret: Option<String>,

    pub sms_sign_key_id: Option<String>,
    pub authenticated_sms_fail_closed: bool,

    pub maintenance_mode: bool,
}

impl Realm {
    pub fn accepts_test_type(&self, mask: i16) -> bool {
        self.allowed_test_types == 0 || self.allowed_test_types & mask != 0
    }

    /// Fills `[code]`, `[longcode]`, and `[enexpresslink]` placeholders in
    /// the realm template selected by `label`. A realm currently carries
    /// exactly two labeled templates -- `"user-report"` and the default --
    /// so any other label falls back to the default template; `label` is
    /// itself defaulted to `"user-report"` when the code being sent is a
    /// user report and the caller supplied no label.
    pub fn build_sms_text(
        &self,
        short_code: &str,
        long_code: &str,
        redirect_domain: &str,
        label: Option<&str>,
        is_user_report: bool,
    ) -> String {
        let resolved_label = label
            .filter(|l| !l.is_empty())
            .unwrap_or(if is_user_report { "user-report" } else { "default" });

        let template = if resolved_label == "user-report" {
            self.sms_template_user_report
                .as_deref()
                .unwrap_or(&self.sms_template)
        } else {
            self.sms_template.as_str()
        };
        let link = format!("https://{}/v?c={}", redirect_domain, long_code);
        template
            .replace("[enexpresslink]", &link)
            .replace("[longcode]", long_code)
            .replace("[code]", short_code)
    }
}

/// The issued OTP record. Short/long code fields hold the SHA-256 hash of
/// the plaintext; the plaintext is handed back to the caller exactly once,
/// at commit time, and never persisted.
#[allow(dead_code)]
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct VerificationCode {
    pub id: i64,
    pub realm_id: i64,

    pub code_hash: String,
    pub long_code_hash: String,

    pub uuid: Option<String>,

    pub test_type: String,
    pub symptom_date: Option<NaiveDate>,
    pub test_date: Option<NaiveDate>,

    pub issuing_user_id: i64,
    pub issuing_app_id: i64,
    pub issuing_external_id: Option<String>,

    pub expires_at: NaiveDateTime,
    pub long_expires_at: NaiveDateTime,
    pub claimed: bool,

    pub phone: Option<String>,
    pub nonce: Option<Vec<u8>>,
    pub nonce_required: bool,

    pub created_at: NaiveDateTime,

    /// Not a persisted column; set on the in-memory record right after a
    /// successful commit so the caller can read the plaintext back once.
    #[sqlx(default)]
    pub code_plaintext: Option<String>,
    #[sqlx(default)]
    pub long_code_plaintext: Option<String>,

    /// Not a persisted column; carries the request's `smsTemplateLabel`
    /// from the builder through to the SMS sender, which never sees the
    /// original request.
    #[sqlx(default)]
    pub sms_template_label: Option<String>,

    /// Not a persisted column; set by the builder when the caller (C9's
    /// webhook-only user-report path) wants the SMS text generated but
    /// never actually dispatched to a provider.
    #[sqlx(default)]
    pub only_generate_sms: bool,
}

/// The minimal principal this core resolves itself from `X-API-Key`,
/// standing in for the full, out-of-scope app/membership management system.
#[allow(dead_code)]
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct AuthorizedApp {
    pub id: i64,
    pub realm_id: i64,
    pub api_key_hash: String,
    pub name: String,
    pub permissions: i16,
    pub is_active: bool,
    pub created_at: NaiveDateTime,
}

impl AuthorizedApp {
    pub fn can(&self, perm: i16) -> bool {
        self.permissions & perm != 0
    }
}

/// Tracks the phone number a live user-report code is bound to, so a second
/// report for the same number within the window can be detected. At most
/// one live row per realm+phone, enforced by a unique index, see migrations.
#[allow(dead_code)]
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct UserReportPhone {
    pub id: i64,
    pub realm_id: i64,
    pub phone_e164: String,
    pub verification_code_id: i64,
    pub created_at: NaiveDateTime,
    pub window_expires_at: NaiveDateTime,
}

/// Bytes carried on request/response bodies purely to frustrate size-based
/// traffic analysis. The value is meaningless and ignored on input.
#[derive(Debug, Clone, Default)]
pub struct Padding(pub Vec<u8>);

impl Serialize for Padding {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        use base64::Engine;
        serializer.serialize_str(&base64::engine::general_purpose::STANDARD.encode(&self.0))
    }
}

impl<'de> Deserialize<'de> for Padding {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        // Input padding is meaningless; consume and discard whatever token(s)
        // were sent (still required so the surrounding object's cursor
        // advances past this field) rather than failing over bad base64.
        serde::de::IgnoredAny::deserialize(deserializer)?;
        Ok(Padding(Vec::new()))
    }
}

impl Padding {
    /// 1024..2048 random bytes, base64-encoded on the wire.
    pub fn generate() -> Self {
        use rand::Rng;
        let mut rng = rand::thread_rng();
        let len = rng.gen_range(1024..2048);
        let mut bytes = vec![0u8; len];
        rng.fill(&mut bytes[..]);
        Padding(bytes)
    }
}
