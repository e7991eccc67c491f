use chrono::{NaiveDate, NaiveDateTime};
use serde::Serialize;

fn epoch() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(1970, 1, 1)
        .unwrap()
        .and_hms_opt(0, 0, 0)
        .unwrap()
}

use crate::errors::ErrorCode;
use crate::models::{Padding, VerificationCode};

/// The principal issuing a code: exactly one of a user or an authorized
/// app, or neither for a system-initiated user-report.
#[derive(Debug, Clone, Copy, Default)]
pub struct Principal {
    pub user_id: i64,
    pub app_id: i64,
}

/// The internal issue request: the public `IssueCodeRequest` plus the two
/// fields only the user-report entry point (C9) populates.
#[derive(Debug, Clone, Default)]
pub struct IssueRequest {
    pub test_type: String,
    pub symptom_date: String,
    pub test_date: String,
    pub tz_offset_minutes: i32,
    pub phone: String,
    pub sms_template_label: Option<String>,
    pub only_generate_sms: bool,
    pub external_issuer_id: Option<String>,
    pub uuid: Option<String>,
    pub user_requested: bool,
    pub nonce: Option<Vec<u8>>,
}

/// Per-item result of the issue pipeline (C5 -> C3 -> C6 -> C7).
#[derive(Debug, Clone)]
pub struct IssueResult {
    pub vcode: Option<VerificationCode>,
    pub error: Option<ErrorCode>,
    pub error_message: Option<String>,
    pub generated_sms: Option<String>,
    pub obs_blame: &'static str,
    pub obs_result: &'static str,
    /// Set only on the internal `ALREADY_REPORTED` path (§4.9): the expiry
    /// of the pre-existing live code, so the user-report handler can
    /// answer 200 without generating or returning a new code.
    pub existing_expires_at: Option<NaiveDateTime>,
}

impl IssueResult {
    pub fn ok(vcode: VerificationCode, generated_sms: Option<String>) -> Self {
        IssueResult {
            vcode: Some(vcode),
            error: None,
            error_message: None,
            generated_sms,
            obs_blame: "none",
            obs_result: "OK",
            existing_expires_at: None,
        }
    }

    pub fn err(code: ErrorCode, message: impl Into<String>, obs_result: &'static str) -> Self {
        IssueResult {
            vcode: None,
            error: Some(code),
            error_message: Some(message.into()),
            generated_sms: None,
            obs_blame: code.blame(),
            obs_result,
            existing_expires_at: None,
        }
    }

    pub fn already_reported(existing_expires_at: NaiveDateTime) -> Self {
        IssueResult {
            vcode: None,
            error: Some(ErrorCode::UuidAlreadyExists),
            error_message: Some(
                "a live report already exists for this phone number".to_string(),
            ),
            generated_sms: None,
            obs_blame: "none",
            obs_result: "ALREADY_REPORTED",
            existing_expires_at: Some(existing_expires_at),
        }
    }

}

/// The response shape handed back for a single issued (or rejected) code.
#[derive(Debug, Clone, Serialize)]
pub struct IssueCodeResponse {
    pub uuid: String,
    pub code: String,
    pub expires_at: NaiveDateTime,
    pub expires_at_timestamp: i64,
    pub long_expires_at: NaiveDateTime,
    pub long_expires_at_timestamp: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", rename = "errorCode")]
    pub error_code: Option<String>,
    pub padding: Padding,
}

impl From<&IssueResult> for IssueCodeResponse {
    fn from(result: &IssueResult) -> Self {
        match (&result.vcode, result.error, result.existing_expires_at) {
            (Some(vcode), _, _) => IssueCodeResponse {
                uuid: vcode.uuid.clone().unwrap_or_default(),
                code: vcode.code_plaintext.clone().unwrap_or_default(),
                expires_at: vcode.expires_at,
                expires_at_timestamp: vcode.expires_at.and_utc().timestamp(),
                long_expires_at: vcode.long_expires_at,
                long_expires_at_timestamp: vcode.long_expires_at.and_utc().timestamp(),
                error: None,
                error_code: None,
                padding: Padding::generate(),
            },
            (None, _, Some(existing_expires_at)) => IssueCodeResponse {
                uuid: String::new(),
                code: String::new(),
                expires_at: existing_expires_at,
                expires_at_timestamp: existing_expires_at.and_utc().timestamp(),
                long_expires_at: existing_expires_at,
                long_expires_at_timestamp: existing_expires_at.and_utc().timestamp(),
                error: None,
                error_code: None,
                padding: Padding::generate(),
            },
            (None, Some(code), None) => IssueCodeResponse {
                uuid: String::new(),
                code: String::new(),
                expires_at: epoch(),
                expires_at_timestamp: 0,
                long_expires_at: epoch(),
                long_expires_at_timestamp: 0,
                error: result.error_message.clone(),
                error_code: Some(code.as_str().to_string()),
                padding: Padding::generate(),
            },
            (None, None, None) => unreachable!("IssueResult must carry a vcode or an error"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::VerificationCode;

    fn base_vcode() -> VerificationCode {
        VerificationCode {
            id: 1,
            realm_id: 1,
            code_hash: String::new(),
            long_code_hash: String::new(),
            uuid: Some("abc".to_string()),
            test_type: "confirmed".to_string(),
            symptom_date: None,
            test_date: None,
            issuing_user_id: 0,
            issuing_app_id: 1,
            issuing_external_id: None,
            expires_at: epoch(),
            long_expires_at: epoch(),
            claimed: false,
            phone: None,
            nonce: None,
            nonce_required: false,
            created_at: epoch(),
            code_plaintext: Some("12345678".to_string()),
            long_code_plaintext: None,
            sms_template_label: None,
            only_generate_sms: false,
        }
    }

    #[test]
    fn success_response_carries_plaintext_code_once() {
        let result = IssueResult::ok(base_vcode(), None);
        let response = IssueCodeResponse::from(&result);
        assert_eq!(response.code, "12345678");
        assert_eq!(response.uuid, "abc");
        assert!(response.error.is_none());
        assert!(response.error_code.is_none());
    }

    #[test]
    fn error_response_carries_no_code_and_the_error_code_string() {
        let result = IssueResult::err(ErrorCode::QuotaExceeded, "no quota left", "QUOTA_EXCEEDED");
        let response = IssueCodeResponse::from(&result);
        assert_eq!(response.code, "");
        assert_eq!(response.error_code.as_deref(), Some("quota_exceeded"));
        assert_eq!(response.error.as_deref(), Some("no quota left"));
    }

    #[test]
    fn already_reported_response_carries_existing_expiry_and_no_error() {
        let existing = epoch() + chrono::Duration::hours(12);
        let result = IssueResult::already_reported(existing);
        let response = IssueCodeResponse::from(&result);
        assert_eq!(response.code, "");
        assert_eq!(response.expires_at, existing);
        assert!(response.error_code.is_none());
    }
}
