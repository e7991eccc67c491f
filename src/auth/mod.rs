//! Resolves the `X-API-Key` header to an [`AuthorizedApp`], the minimal
//! principal this core needs to run its own handlers. Full session
//! authentication (cookies, CSRF, membership roles) lives outside this
//! core; see the module docs in lib.rs.

use axum::{async_trait, extract::FromRequestParts, http::request::Parts};
use sha2::{Digest, Sha256};
use sqlx::PgPool;

use crate::api::AppState;
use crate::errors::ApiError;
use crate::errors::ErrorCode;
use crate::models::AuthorizedApp;
use crate::persistence;

pub fn hash_api_key(api_key: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(api_key.as_bytes());
    format!("{:x}", hasher.finalize())
}

pub async fn resolve_authorized_app(
    pool: &PgPool,
    api_key: &str,
) -> Result<AuthorizedApp, ApiError> {
    let hash = hash_api_key(api_key);
    match persistence::find_authorized_app_by_key_hash(pool, &hash).await {
        Ok(Some(app)) => Ok(app),
        Ok(None) => Err(ApiError::new(
            ErrorCode::CodeUserUnauthorized,
            "invalid or inactive API key",
        )),
        Err(e) => Err(ApiError::new(ErrorCode::InternalServerError, e.to_string())),
    }
}

/// Extractor used by every `api::` handler to pull the caller's
/// `AuthorizedApp` out of the `X-API-Key` header, resolved against the
/// shared database pool.
#[async_trait]
impl FromRequestParts<AppState> for AuthorizedApp {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let key = parts
            .headers
            .get("x-api-key")
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| {
                ApiError::new(ErrorCode::CodeUserUnauthorized, "X-API-Key header is required")
            })?;

        resolve_authorized_app(&state.pool, key).await
    }
}
