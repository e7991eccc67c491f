//! Save/load verification codes, enforce uniqueness, delete on rollback.

use chrono::NaiveDateTime;
use sha2::{Digest, Sha256};
use sqlx::PgPool;

use crate::models::{AuthorizedApp, Realm, VerificationCode};

#[derive(Debug, thiserror::Error)]
pub enum PersistError {
    #[error("a live code already exists for this UUID")]
    UuidConflict,
    #[error("generated code collided with an existing one")]
    CodeCollision,
    #[error("a live user-report code already exists for this phone number")]
    AlreadyReported { existing_expires_at: NaiveDateTime },
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

pub fn hash_code(plaintext: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(plaintext.as_bytes());
    format!("{:x}", hasher.finalize())
}

const UNIQUE_VIOLATION: &str = "23505";

fn constraint_name(err: &sqlx::Error) -> Option<&str> {
    match err {
        sqlx::Error::Database(db_err) => db_err.constraint(),
        _ => None,
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db_err) if db_err.code().as_deref() == Some(UNIQUE_VIOLATION))
}

/// Persists `vcode` with codes already set on it. On success, restores the
/// plaintext codes onto the record for the caller's one-time read.
///
/// Distinguishes collisions on the generated codes (retryable by the commit
/// loop) from a UUID already in use (not retryable) and, for user-report
/// codes, from a live phone-number collision.
pub async fn save_verification_code(
    pool: &PgPool,
    vcode: &mut VerificationCode,
    short_plain: &str,
    long_plain: &str,
) -> Result<(), PersistError> {
    let mut tx = pool.begin().await?;

    let row = sqlx::query_scalar::<_, i64>(
        r#"
        INSERT INTO verification_codes
            (realm_id, code_hash, long_code_hash, uuid, test_type, symptom_date, test_date,
             issuing_user_id, issuing_app_id, issuing_external_id,
             expires_at, long_expires_at, claimed, phone, nonce, nonce_required, created_at)
        VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12,false,$13,$14,$15, now())
        RETURNING id
        "#,
    )
    .bind(vcode.realm_id)
    .bind(&vcode.code_hash)
    .bind(&vcode.long_code_hash)
    .bind(&vcode.uuid)
    .bind(&vcode.test_type)
    .bind(vcode.symptom_date)
    .bind(vcode.test_date)
    .bind(vcode.issuing_user_id)
    .bind(vcode.issuing_app_id)
    .bind(&vcode.issuing_external_id)
    .bind(vcode.expires_at)
    .bind(vcode.long_expires_at)
    .bind(&vcode.phone)
    .bind(&vcode.nonce)
    .bind(vcode.nonce_required)
    .fetch_one(&mut *tx)
    .await
    .map_err(|e| classify_insert_error(e, vcode))?;

    vcode.id = row;

    // At most one live user-report code per phone; a realm may
    // legitimately SMS the same phone number confirmed/likely codes
    // without tripping this check.
    if vcode.test_type == "user-report" {
        let phone = vcode
            .phone
            .clone()
            .expect("user-report codes always carry a phone");
        if let Some(existing) = existing_live_phone(&mut tx, vcode.realm_id, &phone).await? {
            tx.rollback().await.ok();
            return Err(PersistError::AlreadyReported {
                existing_expires_at: existing,
            });
        }

        sqlx::query(
            r#"
            INSERT INTO user_report_phones
                (realm_id, phone_e164, verification_code_id, created_at, window_expires_at)
            VALUES ($1, $2, $3, now(), now() + interval '24 hours')
            "#,
        )
        .bind(vcode.realm_id)
        .bind(&phone)
        .bind(vcode.id)
        .execute(&mut *tx)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                PersistError::AlreadyReported {
                    existing_expires_at: vcode.expires_at,
                }
            } else {
                PersistError::Database(e)
            }
        })?;
    }

    tx.commit().await?;

    vcode.code_plaintext = Some(short_plain.to_string());
    vcode.long_code_plaintext = Some(long_plain.to_string());

    Ok(())
}

fn classify_insert_error(e: sqlx::Error, vcode: &VerificationCode) -> PersistError {
    if is_unique_violation(&e) {
        match constraint_name(&e) {
            Some(c) if c.contains("uuid") && vcode.uuid.is_some() => PersistError::UuidConflict,
            _ => PersistError::CodeCollision,
        }
    } else {
        PersistError::Database(e)
    }
}

async fn existing_live_phone(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    realm_id: i64,
    phone: &str,
) -> Result<Option<NaiveDateTime>, PersistError> {
    let row: Option<(NaiveDateTime,)> = sqlx::query_as(
        r#"
        SELECT vc.expires_at
        FROM user_report_phones p
        JOIN verification_codes vc ON vc.id = p.verification_code_id
        WHERE p.realm_id = $1 AND p.phone_e164 = $2 AND p.window_expires_at > now()
        LIMIT 1
        "#,
    )
    .bind(realm_id)
    .bind(phone)
    .fetch_optional(&mut **tx)
    .await?;
    Ok(row.map(|(expires_at,)| expires_at))
}

pub async fn find_verification_code_by_uuid(
    pool: &PgPool,
    realm_id: i64,
    uuid: &str,
) -> Result<Option<VerificationCode>, PersistError> {
    let row = sqlx::query_as::<_, VerificationCode>(
        r#"
        SELECT id, realm_id, code_hash, long_code_hash, uuid, test_type, symptom_date, test_date,
               issuing_user_id, issuing_app_id, issuing_external_id, expires_at, long_expires_at,
               claimed, phone, nonce, nonce_required, created_at,
               NULL::text AS code_plaintext, NULL::text AS long_code_plaintext
        FROM verification_codes
        WHERE realm_id = $1 AND uuid = $2 AND expires_at > now()
        "#,
    )
    .bind(realm_id)
    .bind(uuid)
    .fetch_optional(pool)
    .await?;
    Ok(row)
}

pub async fn delete_verification_code(pool: &PgPool, id: i64) -> Result<(), PersistError> {
    sqlx::query("DELETE FROM verification_codes WHERE id = $1")
        .bind(id)
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn delete_user_report_phone_for_code(
    pool: &PgPool,
    verification_code_id: i64,
) -> Result<(), PersistError> {
    sqlx::query("DELETE FROM user_report_phones WHERE verification_code_id = $1")
        .bind(verification_code_id)
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn find_realm(pool: &PgPool, id: i64) -> Result<Option<Realm>, PersistError> {
    let row = sqlx::query_as::<_, Realm>(
        r#"
        SELECT id, name, allowed_test_types, code_length, long_code_length,
               code_duration_minutes, long_code_duration_minutes, require_date,
               abuse_prevention_enabled, daily_quota, realm_hmac_key, enforce_realm_quotas,
               allow_bulk_upload, allow_generated_sms, allow_admin_user_report, allows_user_report,
               sms_country, sms_template, sms_template_user_report,
               user_report_webhook_url, user_report_webhook_secret,
               sms_sign_key_id, authenticated_sms_fail_closed, maintenance_mode
        FROM realms
        WHERE id = $1
        "#,
    )
    .bind(id)
    .fetch_optional(pool)
    .await?;
    Ok(row)
}

pub async fn find_authorized_app_by_key_hash(
    pool: &PgPool,
    key_hash: &str,
) -> Result<Option<AuthorizedApp>, PersistError> {
    let row = sqlx::query_as::<_, AuthorizedApp>(
        r#"
        SELECT id, realm_id, api_key_hash, name, permissions, is_active, created_at
        FROM authorized_apps
        WHERE api_key_hash = $1 AND is_active = true
        "#,
    )
    .bind(key_hash)
    .fetch_optional(pool)
    .await?;
    Ok(row)
}
