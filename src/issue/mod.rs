//! One-shot and batch dispatch, per-item result aggregation, concurrent
//! SMS fan-out (C8).

pub mod types;

use sqlx::PgPool;
use std::sync::Arc;

use crate::config;
use crate::errors::ErrorCode;
use crate::issue::types::{IssueRequest, IssueResult, Principal};
use crate::models::Realm;
use crate::{codebuilder, commit, observability, quota, sms};

pub async fn issue_one(
    pool: &PgPool,
    http_client: &reqwest::Client,
    realm: &Realm,
    principal: Principal,
    req: IssueRequest,
) -> IssueResult {
    issue_many(pool, http_client, realm, principal, vec![req])
        .await
        .into_iter()
        .next()
        .expect("issue_many preserves input length")
}

pub async fn issue_many(
    pool: &PgPool,
    http_client: &reqwest::Client,
    realm: &Realm,
    principal: Principal,
    reqs: Vec<IssueRequest>,
) -> Vec<IssueResult> {
    let settings = config::get_settings();
    let mut results = Vec::with_capacity(reqs.len());

    for req in &reqs {
        let mut scope = observability::ObservabilityScope::start("issue");

        if realm.maintenance_mode {
            scope.finish("none", "MAINTENANCE_MODE");
            results.push(IssueResult::err(
                ErrorCode::MaintenanceMode,
                "this realm is in maintenance mode",
                "MAINTENANCE_MODE",
            ));
            continue;
        }

        let built = match codebuilder::build(pool, req, realm, principal).await {
            codebuilder::BuildOutcome::Rejected(result) => {
                scope.finish(result.obs_blame, result.obs_result);
                results.push(result);
                continue;
            }
            codebuilder::BuildOutcome::Ready(vcode) => vcode,
        };

        if realm.abuse_prevention_enabled {
            let key = quota::quota_key(realm.id, &realm.realm_hmac_key);
            match quota::take(&key, realm.daily_quota).await {
                Ok(q) if !q.allowed => {
                    if settings.enforce_realm_quotas {
                        scope.finish("client", "QUOTA_EXCEEDED");
                        results.push(IssueResult::err(
                            ErrorCode::QuotaExceeded,
                            "this realm has exhausted its daily issuance quota",
                            "QUOTA_EXCEEDED",
                        ));
                        continue;
                    } else {
                        tracing::warn!(realm = realm.id, "quota exceeded, enforcement disabled");
                    }
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::error!(error = %e, "failed to check quota, allowing request through");
                }
            }
        }

        let result = commit::commit_code(pool, built, realm, settings.collision_retry_count).await;
        scope.finish(result.obs_blame, result.obs_result);
        results.push(result);
    }

    // SMS fan-out: one task per successful, phone-bearing result, joined
    // before this function returns so no result is dropped on cancellation.
    let pool = Arc::new(pool.clone());
    let client = Arc::new(http_client.clone());
    let mut handles = Vec::new();
    for (idx, result) in results.iter().enumerate() {
        if let Some(vcode) = &result.vcode {
            if vcode.phone.is_some() {
                let pool = Arc::clone(&pool);
                let client = Arc::clone(&client);
                let vcode = vcode.clone();
                let realm = realm.clone();
                handles.push((idx, tokio::spawn(send_one(pool, client, realm, vcode))));
            }
        }
    }

    for (idx, handle) in handles {
        match handle.await {
            Ok(Ok(generated_sms)) => {
                if let Some(r) = results.get_mut(idx) {
                    r.generated_sms = Some(generated_sms);
                }
            }
            Ok(Err(code)) => {
                if let Some(r) = results.get_mut(idx) {
                    *r = IssueResult::err(code, "sms delivery failed", "FAILED_TO_SEND_SMS");
                }
            }
            Err(join_err) => {
                tracing::error!(error = %join_err, "sms task panicked");
                if let Some(r) = results.get_mut(idx) {
                    *r = IssueResult::err(
                        ErrorCode::InternalServerError,
                        "sms task panicked",
                        "SMS_TASK_PANIC",
                    );
                }
            }
        }
    }

    results
}

async fn send_one(
    pool: Arc<PgPool>,
    client: Arc<reqwest::Client>,
    realm: Realm,
    vcode: crate::models::VerificationCode,
) -> Result<String, ErrorCode> {
    let settings = config::get_settings();
    let signing_key = sms::get_signing_key();
    let short = vcode.code_plaintext.as_deref().unwrap_or_default();
    let long = vcode.long_code_plaintext.as_deref().unwrap_or(short);

    let message = sms::build_message(
        &realm,
        &vcode,
        short,
        long,
        &settings.en_express_redirect_domain,
        signing_key,
    )
    .map_err(|_| ErrorCode::SmsFailure)?;

    if !vcode.only_generate_sms {
        sms::send_for_code(&pool, &client, &vcode, &message).await?;
    }
    Ok(message)
}

/// Batch-issuance caps: realm must allow bulk upload, caller must hold
/// `BulkIssueCode`, and the batch must not exceed `max_batch_size`.
pub fn check_batch_allowed(
    realm: &Realm,
    has_bulk_permission: bool,
    batch_len: usize,
) -> Result<(), ErrorCode> {
    if !realm.allow_bulk_upload {
        return Err(ErrorCode::BulkIssueNotEnabled);
    }
    if !has_bulk_permission {
        return Err(ErrorCode::CodeUserUnauthorized);
    }
    if batch_len > config::get_settings().max_batch_size {
        return Err(ErrorCode::UnparsableRequest);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bulk_realm() -> Realm {
        Realm {
            id: 1,
            name: "test".to_string(),
            allowed_test_types: 0,
            code_length: 8,
            long_code_length: 16,
            code_duration_minutes: 15,
            long_code_duration_minutes: 60,
            require_date: false,
            abuse_prevention_enabled: false,
            daily_quota: 1000,
            realm_hmac_key: Vec::new(),
            enforce_realm_quotas: true,
            allow_bulk_upload: true,
            allow_generated_sms: true,
            allow_admin_user_report: false,
            allows_user_report: true,
            sms_country: "US".to_string(),
            sms_template: String::new(),
            sms_template_user_report: None,
            user_report_webhook_url: None,
            user_report_webhook_secret: None,
            sms_sign_key_id: None,
            authenticated_sms_fail_closed: false,
            maintenance_mode: false,
        }
    }

    #[test]
    fn realm_must_allow_bulk_upload() {
        let mut realm = bulk_realm();
        realm.allow_bulk_upload = false;
        assert_eq!(check_batch_allowed(&realm, true, 1), Err(ErrorCode::BulkIssueNotEnabled));
    }

    #[test]
    fn caller_must_hold_bulk_permission() {
        let realm = bulk_realm();
        assert_eq!(
            check_batch_allowed(&realm, false, 1),
            Err(ErrorCode::CodeUserUnauthorized)
        );
    }

    #[test]
    fn batch_over_the_configured_cap_is_rejected() {
        let realm = bulk_realm();
        let over = config::get_settings().max_batch_size + 1;
        assert_eq!(
            check_batch_allowed(&realm, true, over),
            Err(ErrorCode::UnparsableRequest)
        );
    }

    #[test]
    fn batch_within_bounds_is_allowed() {
        let realm = bulk_realm();
        assert_eq!(check_batch_allowed(&realm, true, 1), Ok(()));
    }
}
