use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use serde::Serialize;

use crate::models::Padding;

/// The bit-exact error code strings returned to callers, shared across
/// every component (C4-C9) so a handler never infers a code from a string
/// match on an inner error's `Display` output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ErrorCode {
    #[error("unparsable_request")]
    UnparsableRequest,
    #[error("internal_server_error")]
    InternalServerError,
    #[error("code_invalid")]
    CodeInvalid,
    #[error("code_expired")]
    CodeExpired,
    #[error("code_not_found")]
    CodeNotFound,
    #[error("code_user_unauthorized")]
    CodeUserUnauthorized,
    #[error("unsupported_test_type")]
    UnsupportedTestType,
    #[error("invalid_test_type")]
    InvalidTestType,
    #[error("missing_date")]
    MissingDate,
    #[error("invalid_date")]
    InvalidDate,
    #[error("uuid_already_exists")]
    UuidAlreadyExists,
    #[error("maintenance_mode")]
    MaintenanceMode,
    #[error("quota_exceeded")]
    QuotaExceeded,
    #[error("sms_queue_full")]
    SmsQueueFull,
    #[error("sms_failure")]
    SmsFailure,
    #[error("missing_nonce")]
    MissingNonce,
    #[error("missing_phone")]
    MissingPhone,
    #[error("user_report_try_later")]
    UserReportTryLater,
    #[error("token_invalid")]
    TokenInvalid,
    #[error("token_expired")]
    TokenExpired,
    #[error("hmac_invalid")]
    HmacInvalid,
    #[error("bulk_issue_not_enabled")]
    BulkIssueNotEnabled,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::UnparsableRequest => "unparsable_request",
            ErrorCode::InternalServerError => "internal_server_error",
            ErrorCode::CodeInvalid => "code_invalid",
            ErrorCode::CodeExpired => "code_expired",
            ErrorCode::CodeNotFound => "code_not_found",
            ErrorCode::CodeUserUnauthorized => "code_user_unauthorized",
            ErrorCode::UnsupportedTestType => "unsupported_test_type",
            ErrorCode::InvalidTestType => "invalid_test_type",
            ErrorCode::MissingDate => "missing_date",
            ErrorCode::InvalidDate => "invalid_date",
            ErrorCode::UuidAlreadyExists => "uuid_already_exists",
            ErrorCode::MaintenanceMode => "maintenance_mode",
            ErrorCode::QuotaExceeded => "quota_exceeded",
            ErrorCode::SmsQueueFull => "sms_queue_full",
            ErrorCode::SmsFailure => "sms_failure",
            ErrorCode::MissingNonce => "missing_nonce",
            ErrorCode::MissingPhone => "missing_phone",
            ErrorCode::UserReportTryLater => "user_report_try_later",
            ErrorCode::TokenInvalid => "token_invalid",
            ErrorCode::TokenExpired => "token_expired",
            ErrorCode::HmacInvalid => "hmac_invalid",
            ErrorCode::BulkIssueNotEnabled => "bulk_issue_not_enabled",
        }
    }

    pub fn http_status(&self) -> StatusCode {
        match self {
            ErrorCode::UnparsableRequest
            | ErrorCode::InvalidTestType
            | ErrorCode::MissingDate
            | ErrorCode::InvalidDate
            | ErrorCode::MissingNonce
            | ErrorCode::MissingPhone
            | ErrorCode::UnsupportedTestType
            | ErrorCode::BulkIssueNotEnabled
            | ErrorCode::SmsFailure
            | ErrorCode::SmsQueueFull => StatusCode::BAD_REQUEST,
            ErrorCode::CodeUserUnauthorized
            | ErrorCode::HmacInvalid
            | ErrorCode::TokenInvalid
            | ErrorCode::TokenExpired => StatusCode::UNAUTHORIZED,
            ErrorCode::CodeNotFound => StatusCode::NOT_FOUND,
            ErrorCode::UuidAlreadyExists => StatusCode::CONFLICT,
            ErrorCode::QuotaExceeded | ErrorCode::MaintenanceMode => {
                StatusCode::TOO_MANY_REQUESTS
            }
            ErrorCode::CodeInvalid | ErrorCode::CodeExpired => StatusCode::BAD_REQUEST,
            ErrorCode::InternalServerError | ErrorCode::UserReportTryLater => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Who is at fault, for observability attribution (§4.10).
    pub fn blame(&self) -> &'static str {
        match self {
            ErrorCode::InternalServerError => "server",
            ErrorCode::MaintenanceMode | ErrorCode::SmsFailure | ErrorCode::SmsQueueFull => "none",
            _ => "client",
        }
    }
}

/// The domain error propagated internally by C2-C9. Handlers convert this
/// into an `ApiError` for the HTTP boundary.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("{0}")]
    Code(ErrorCode),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("cache error: {0}")]
    Cache(#[from] redis::RedisError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl CoreError {
    pub fn code(&self) -> ErrorCode {
        match self {
            CoreError::Code(c) => *c,
            CoreError::Database(_) | CoreError::Cache(_) | CoreError::Other(_) => {
                ErrorCode::InternalServerError
            }
        }
    }
}

impl From<ErrorCode> for CoreError {
    fn from(c: ErrorCode) -> Self {
        CoreError::Code(c)
    }
}

/// JSON error shape returned on the wire. `error_code` is duplicated under
/// the legacy `errorCode` key for backward compatibility with older client
/// SDKs that read either field.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub error_code: String,
    #[serde(rename = "errorCode")]
    pub error_code_legacy: String,
    pub padding: Padding,
}

/// The HTTP-boundary error type every axum handler in `api::` returns.
#[derive(Debug)]
pub struct ApiError {
    pub code: ErrorCode,
    pub message: String,
}

impl ApiError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl From<ErrorCode> for ApiError {
    fn from(code: ErrorCode) -> Self {
        let message = code.as_str().to_string();
        ApiError { code, message }
    }
}

impl From<CoreError> for ApiError {
    fn from(err: CoreError) -> Self {
        let code = err.code();
        ApiError {
            message: err.to_string(),
            code,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.code.http_status();
        let body = ErrorResponse {
            error: self.message,
            error_code: self.code.as_str().to_string(),
            error_code_legacy: self.code.as_str().to_string(),
            padding: Padding::generate(),
        };
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_code_strings_are_bit_exact() {
        // The wire format is a contract with external clients; these
        // strings must never drift even if the enum is reordered.
        assert_eq!(ErrorCode::UnparsableRequest.as_str(), "unparsable_request");
        assert_eq!(ErrorCode::QuotaExceeded.as_str(), "quota_exceeded");
        assert_eq!(ErrorCode::UuidAlreadyExists.as_str(), "uuid_already_exists");
        assert_eq!(ErrorCode::SmsQueueFull.as_str(), "sms_queue_full");
        assert_eq!(ErrorCode::BulkIssueNotEnabled.as_str(), "bulk_issue_not_enabled");
    }

    #[test]
    fn throttling_bucket_is_429() {
        assert_eq!(ErrorCode::QuotaExceeded.http_status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(ErrorCode::MaintenanceMode.http_status(), StatusCode::TOO_MANY_REQUESTS);
    }

    #[test]
    fn downstream_sms_errors_are_400_not_429() {
        assert_eq!(ErrorCode::SmsFailure.http_status(), StatusCode::BAD_REQUEST);
        assert_eq!(ErrorCode::SmsQueueFull.http_status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn idempotency_bucket_is_409() {
        assert_eq!(ErrorCode::UuidAlreadyExists.http_status(), StatusCode::CONFLICT);
    }

    #[test]
    fn blame_attribution() {
        assert_eq!(ErrorCode::InternalServerError.blame(), "server");
        assert_eq!(ErrorCode::MaintenanceMode.blame(), "none");
        assert_eq!(ErrorCode::SmsFailure.blame(), "none");
        assert_eq!(ErrorCode::InvalidDate.blame(), "client");
    }

    #[test]
    fn api_error_response_duplicates_error_code_under_legacy_key() {
        let err = ApiError::from(ErrorCode::QuotaExceeded);
        let body = ErrorResponse {
            error: err.message.clone(),
            error_code: err.code.as_str().to_string(),
            error_code_legacy: err.code.as_str().to_string(),
            padding: Padding::generate(),
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["error_code"], "quota_exceeded");
        assert_eq!(json["errorCode"], "quota_exceeded");
    }
}
