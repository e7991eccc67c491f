use axum::{
    extract::State,
    response::Json,
};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;

use crate::errors::{ApiError, ErrorCode};
use crate::issue::types::{IssueCodeResponse, IssueRequest, Principal};
use crate::models::{permission, AuthorizedApp, Padding};
use crate::userreport::UserReportRequest;
use crate::{issue, persistence, userreport};

/// Shared handler state: the database pool and the HTTP client used for
/// outbound SMS and webhook calls.
#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub http_client: reqwest::Client,
}

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub build: BuildInfo,
}

#[derive(Debug, Serialize)]
pub struct BuildInfo {
    pub git_hash: String,
    pub git_branch: String,
    pub git_date: String,
    pub git_dirty: bool,
    pub build_timestamp: String,
    pub rust_version: String,
    pub profile: String,
}

pub async fn health_handler() -> Json<HealthResponse> {
    let settings = crate::config::get_settings();
    let profile = if cfg!(debug_assertions) { "debug" } else { "release" };

    Json(HealthResponse {
        status: "healthy".to_string(),
        version: settings.version.clone(),
        build: BuildInfo {
            git_hash: env!("GIT_HASH").to_string(),
            git_branch: env!("GIT_BRANCH").to_string(),
            git_date: env!("GIT_DATE").to_string(),
            git_dirty: env!("GIT_DIRTY").parse().unwrap_or(false),
            build_timestamp: env!("BUILD_TIMESTAMP").to_string(),
            rust_version: env!("RUST_VERSION").to_string(),
            profile: profile.to_string(),
        },
    })
}

pub async fn root_handler() -> Json<serde_json::Value> {
    let settings = crate::config::get_settings();
    Json(serde_json::json!({
        "name": settings.app_name,
        "version": settings.version,
        "endpoints": {
            "/api/issue": "POST - Issue a single verification code",
            "/api/batch-issue": "POST - Issue a batch of verification codes",
            "/api/user-report": "POST - Patient-initiated diagnosis report",
            "/api/checkcodestatus": "POST - Check a code's status by UUID",
            "/api/expirecode": "POST - Force-expire a code by UUID",
            "/health": "GET - Health check",
            "/metrics": "GET - Prometheus metrics"
        }
    }))
}

// ---- /api/issue -----------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct IssueCodeRequest {
    #[serde(default)]
    pub test_type: String,
    #[serde(default)]
    pub symptom_date: String,
    #[serde(default)]
    pub test_date: String,
    #[serde(default)]
    pub tz_offset: i32,
    #[serde(default)]
    pub phone: String,
    #[serde(default)]
    pub sms_template_label: Option<String>,
    #[serde(default)]
    pub only_generate_sms: bool,
    #[serde(default)]
    pub external_issuer_id: Option<String>,
    #[serde(default)]
    pub uuid: Option<String>,
    #[serde(default)]
    pub padding: Padding,
}

impl From<IssueCodeRequest> for IssueRequest {
    fn from(r: IssueCodeRequest) -> Self {
        IssueRequest {
            test_type: r.test_type,
            symptom_date: r.symptom_date,
            test_date: r.test_date,
            tz_offset_minutes: r.tz_offset,
            phone: r.phone,
            sms_template_label: r.sms_template_label,
            only_generate_sms: r.only_generate_sms,
            external_issuer_id: r.external_issuer_id,
            uuid: r.uuid,
            user_requested: false,
            nonce: None,
        }
    }
}

pub async fn issue_handler(
    State(state): State<AppState>,
    app: AuthorizedApp,
    Json(req): Json<IssueCodeRequest>,
) -> Result<Json<IssueCodeResponse>, ApiError> {
    if !app.can(permission::ISSUE_CODE) {
        return Err(ApiError::from(ErrorCode::CodeUserUnauthorized));
    }

    let realm = load_realm(&state.pool, app.realm_id).await?;
    let principal = Principal { user_id: 0, app_id: app.id };

    let result = issue::issue_one(&state.pool, &state.http_client, &realm, principal, req.into())
        .await;

    respond_with_result(&result)
}

fn respond_with_result(result: &crate::issue::types::IssueResult) -> Result<Json<IssueCodeResponse>, ApiError> {
    if let Some(code) = result.error {
        return Err(ApiError::new(
            code,
            result.error_message.clone().unwrap_or_default(),
        ));
    }
    Ok(Json(IssueCodeResponse::from(result)))
}

// ---- /api/batch-issue ------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct BatchIssueCodeRequest {
    pub codes: Vec<IssueCodeRequest>,
    #[serde(default)]
    pub padding: Padding,
}

#[derive(Debug, Serialize)]
pub struct BatchIssueCodeResponse {
    pub codes: Vec<IssueCodeResponse>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", rename = "errorCode")]
    pub error_code: Option<String>,
    pub padding: Padding,
}

pub async fn batch_issue_handler(
    State(state): State<AppState>,
    app: AuthorizedApp,
    Json(req): Json<BatchIssueCodeRequest>,
) -> Result<(axum::http::StatusCode, Json<BatchIssueCodeResponse>), ApiError> {
    let realm = load_realm(&state.pool, app.realm_id).await?;

    issue::check_batch_allowed(&realm, app.can(permission::BULK_ISSUE_CODE), req.codes.len())
        .map_err(ApiError::from)?;

    let principal = Principal { user_id: 0, app_id: app.id };
    let internal_reqs: Vec<IssueRequest> = req.codes.into_iter().map(Into::into).collect();

    let results =
        issue::issue_many(&state.pool, &state.http_client, &realm, principal, internal_reqs).await;

    // The outer status/errorCode mirror the first per-item failure; later
    // failures still appear in their own `codes[i]` slot.
    let first_error = results.iter().find_map(|r| r.error);
    let status = first_error
        .map(|c| c.http_status())
        .unwrap_or(axum::http::StatusCode::OK);
    let codes: Vec<IssueCodeResponse> = results.iter().map(IssueCodeResponse::from).collect();

    let failures = results.iter().filter(|r| r.error.is_some()).count();
    let response = BatchIssueCodeResponse {
        error: first_error.map(|_| {
            format!(
                "{} succeeded, {} failed of {} total",
                codes.len() - failures,
                failures,
                codes.len()
            )
        }),
        error_code: first_error.map(|c| c.as_str().to_string()),
        codes,
        padding: Padding::generate(),
    };

    Ok((status, Json(response)))
}

// ---- /api/user-report -------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct UserReportWireRequest {
    #[serde(default)]
    pub phone: String,
    #[serde(default)]
    pub nonce: String,
    #[serde(default)]
    pub symptom_date: String,
    #[serde(default)]
    pub test_date: String,
    #[serde(default)]
    pub tz_offset: i32,
    #[serde(default)]
    pub padding: Padding,
}

pub async fn user_report_handler(
    State(state): State<AppState>,
    app: AuthorizedApp,
    Json(req): Json<UserReportWireRequest>,
) -> Result<Json<IssueCodeResponse>, ApiError> {
    let realm = load_realm(&state.pool, app.realm_id).await?;
    let principal = Principal { user_id: 0, app_id: app.id };

    let internal_req = UserReportRequest {
        phone: req.phone,
        nonce_b64: req.nonce,
        symptom_date: req.symptom_date,
        test_date: req.test_date,
        tz_offset_minutes: req.tz_offset,
    };

    let result = userreport::handle_user_report(
        &state.pool,
        &state.http_client,
        &realm,
        principal,
        internal_req,
    )
    .await;

    respond_with_result(&result)
}

// ---- /api/checkcodestatus, /api/expirecode ---------------------------------

#[derive(Debug, Deserialize)]
pub struct CodeStatusRequest {
    pub uuid: String,
}

#[derive(Debug, Serialize)]
pub struct CodeStatusResponse {
    pub claimed: bool,
    pub expires_at_timestamp: i64,
    pub long_expires_at_timestamp: i64,
    pub padding: Padding,
}

pub async fn check_code_status_handler(
    State(state): State<AppState>,
    app: AuthorizedApp,
    Json(req): Json<CodeStatusRequest>,
) -> Result<Json<CodeStatusResponse>, ApiError> {
    if !app.can(permission::STATUS_CHECK) {
        return Err(ApiError::from(ErrorCode::CodeUserUnauthorized));
    }

    let vcode = persistence::find_verification_code_by_uuid(&state.pool, app.realm_id, &req.uuid)
        .await
        .map_err(|e| ApiError::new(ErrorCode::InternalServerError, e.to_string()))?
        .ok_or_else(|| ApiError::from(ErrorCode::CodeNotFound))?;

    Ok(Json(CodeStatusResponse {
        claimed: vcode.claimed,
        expires_at_timestamp: vcode.expires_at.and_utc().timestamp(),
        long_expires_at_timestamp: vcode.long_expires_at.and_utc().timestamp(),
        padding: Padding::generate(),
    }))
}

pub async fn expire_code_handler(
    State(state): State<AppState>,
    app: AuthorizedApp,
    Json(req): Json<CodeStatusRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    if !app.can(permission::EXPIRE_CODE) {
        return Err(ApiError::from(ErrorCode::CodeUserUnauthorized));
    }

    let vcode = persistence::find_verification_code_by_uuid(&state.pool, app.realm_id, &req.uuid)
        .await
        .map_err(|e| ApiError::new(ErrorCode::InternalServerError, e.to_string()))?
        .ok_or_else(|| ApiError::from(ErrorCode::CodeNotFound))?;

    persistence::delete_verification_code(&state.pool, vcode.id)
        .await
        .map_err(|e| ApiError::new(ErrorCode::InternalServerError, e.to_string()))?;

    Ok(Json(serde_json::json!({ "expired": true })))
}

async fn load_realm(pool: &PgPool, realm_id: i64) -> Result<crate::models::Realm, ApiError> {
    persistence::find_realm(pool, realm_id)
        .await
        .map_err(|e| ApiError::new(ErrorCode::InternalServerError, e.to_string()))?
        .ok_or_else(|| ApiError::new(ErrorCode::InternalServerError, "realm not found"))
}
