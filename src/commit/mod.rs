//! Persist a built `VerificationCode` with bounded collision retries (C6).

use sqlx::PgPool;

use crate::errors::ErrorCode;
use crate::issue::types::IssueResult;
use crate::models::{Realm, VerificationCode};
use crate::persistence::{self, PersistError};
use crate::{codegen, observability};

pub async fn commit_code(
    pool: &PgPool,
    mut vcode: VerificationCode,
    realm: &Realm,
    retry_count: u32,
) -> IssueResult {
    let mut last_err: Option<PersistError> = None;

    for attempt in 0..retry_count.max(1) {
        let short = match codegen::generate_short(realm.code_length as usize) {
            Ok(s) => s,
            Err(e) => {
                return IssueResult::err(
                    ErrorCode::InternalServerError,
                    e.to_string(),
                    "FAILED_TO_GENERATE_CODE",
                )
            }
        };
        let long = if realm.long_code_length > 0 {
            match codegen::generate_long(realm.long_code_length as usize) {
                Ok(l) => l,
                Err(e) => {
                    return IssueResult::err(
                        ErrorCode::InternalServerError,
                        e.to_string(),
                        "FAILED_TO_GENERATE_CODE",
                    )
                }
            }
        } else {
            short.clone()
        };

        vcode.code_hash = persistence::hash_code(&short);
        vcode.long_code_hash = persistence::hash_code(&long);

        match persistence::save_verification_code(pool, &mut vcode, &short, &long).await {
            Ok(()) => {
                observability::record("commit", "none", "OK", attempt as f64);
                return IssueResult::ok(vcode, None);
            }
            Err(PersistError::UuidConflict) => {
                return IssueResult::err(
                    ErrorCode::UuidAlreadyExists,
                    "a code with this UUID already exists",
                    "UUID_CONFLICT",
                );
            }
            Err(PersistError::AlreadyReported { existing_expires_at }) => {
                // Carried as a typed result (not a string-matched error)
                // so C9 can rewrite it to 200 at the user-report boundary.
                return IssueResult::already_reported(existing_expires_at);
            }
            Err(PersistError::CodeCollision) => {
                last_err = Some(PersistError::CodeCollision);
                continue;
            }
            Err(e @ PersistError::Database(_)) => {
                return IssueResult::err(
                    ErrorCode::InternalServerError,
                    e.to_string(),
                    "FAILED_TO_ISSUE_CODE",
                );
            }
        }
    }

    IssueResult::err(
        ErrorCode::InternalServerError,
        last_err
            .map(|e| e.to_string())
            .unwrap_or_else(|| "collision retry budget exhausted".to_string()),
        "FAILED_TO_ISSUE_CODE",
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::helpers::{cleanup_db, create_test_realm, setup};
    use serial_test::serial;

    fn unsaved_vcode(realm_id: i64, uuid: Option<&str>) -> VerificationCode {
        let now = chrono::Utc::now().naive_utc();
        VerificationCode {
            id: 0,
            realm_id,
            code_hash: String::new(),
            long_code_hash: String::new(),
            uuid: uuid.map(str::to_string),
            test_type: "confirmed".to_string(),
            symptom_date: None,
            test_date: None,
            issuing_user_id: 0,
            issuing_app_id: 1,
            issuing_external_id: None,
            expires_at: now + chrono::Duration::minutes(15),
            long_expires_at: now + chrono::Duration::minutes(15),
            claimed: false,
            phone: None,
            nonce: None,
            nonce_required: false,
            created_at: now,
            code_plaintext: None,
            long_code_plaintext: None,
            sms_template_label: None,
            only_generate_sms: false,
        }
    }

    #[tokio::test]
    #[serial]
    async fn commits_and_restores_plaintext_codes() {
        setup().await;
        cleanup_db().await;
        let pool = crate::database::get_db().clone();

        let realm = create_test_realm(&pool, |_| {}).await;
        let vcode = unsaved_vcode(realm.id, None);

        let result = commit_code(&pool, vcode, &realm, 3).await;
        assert!(result.error.is_none(), "unexpected error: {:?}", result.error);
        let saved = result.vcode.expect("committed code");
        assert!(saved.id > 0);
        assert_eq!(saved.code_plaintext.as_deref().unwrap().len(), realm.code_length as usize);

        cleanup_db().await;
    }

    #[tokio::test]
    #[serial]
    async fn repeat_uuid_is_rejected_without_consuming_a_retry() {
        setup().await;
        cleanup_db().await;
        let pool = crate::database::get_db().clone();

        let realm = create_test_realm(&pool, |_| {}).await;
        let first = unsaved_vcode(realm.id, Some("dupe-uuid"));
        let committed = commit_code(&pool, first, &realm, 3).await;
        assert!(committed.error.is_none());

        let second = unsaved_vcode(realm.id, Some("dupe-uuid"));
        let result = commit_code(&pool, second, &realm, 3).await;
        assert_eq!(result.error, Some(ErrorCode::UuidAlreadyExists));

        cleanup_db().await;
    }
}
