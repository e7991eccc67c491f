//! Build message body, optionally sign it, send via provider, roll back
//! the verification code on send failure (C7).

use base64::Engine;
use chrono::Utc;
use once_cell::sync::OnceCell;
use p256::ecdsa::{signature::Signer, Signature, SigningKey};
use sha2::{Digest, Sha256};
use std::time::Duration;
use tracing::{error, warn};

use crate::config;
use crate::errors::ErrorCode;
use crate::models::{Realm, VerificationCode};
use crate::{observability, persistence};

static SIGNING_KEY: OnceCell<Option<SigningKey>> = OnceCell::new();

/// Loads the process-wide SMS-signing key from `SMS_SIGNING_KEY` (a
/// hex-encoded P-256 scalar), if configured. Safe to call once at startup;
/// a realm with no `sms_sign_key_id` simply never reaches for it.
pub fn init_signing_key() -> anyhow::Result<()> {
    if SIGNING_KEY.get().is_some() {
        return Ok(());
    }
    let settings = config::get_settings();
    let key = match settings.sms_signing_key_hex.as_deref() {
        Some(hex_key) => {
            let bytes = hex::decode(hex_key)?;
            Some(SigningKey::from_slice(&bytes)?)
        }
        None => None,
    };
    SIGNING_KEY.set(key).ok();
    Ok(())
}

pub fn get_signing_key() -> Option<&'static SigningKey> {
    SIGNING_KEY.get().and_then(|k| k.as_ref())
}

#[derive(Debug, thiserror::Error)]
pub enum SmsError {
    #[error("sms provider rejected the message: {0}")]
    ProviderRejected(String),
    #[error("sms provider queue is full")]
    QueueFull,
    #[error("signing failed: {0}")]
    Signing(String),
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
}

/// Composes the signing string `purpose.phone.date.(body + "\nAuthentication:")`,
/// SHA-256-hashes it, and signs the digest with the realm's P-256 key.
pub fn sign_message(
    signing_key: &SigningKey,
    key_id: &str,
    purpose: &str,
    phone: &str,
    body: &str,
) -> Result<String, SmsError> {
    let today = Utc::now().format("%m%d").to_string();
    let date_full = Utc::now().format("%Y-%m-%d").to_string();
    let suffix = format!("{}\nAuthentication:", body);
    let signing_string = format!("{}.{}.{}.{}", purpose, phone, date_full, suffix);

    let mut hasher = Sha256::new();
    hasher.update(signing_string.as_bytes());
    let digest = hasher.finalize();

    let signature: Signature = signing_key
        .try_sign(&digest)
        .map_err(|e| SmsError::Signing(e.to_string()))?;
    let sig_b64 = base64::engine::general_purpose::STANDARD_NO_PAD.encode(signature.to_bytes());

    Ok(format!(
        "{}\nAuthentication:{}:{}:{}",
        body, today, key_id, sig_b64
    ))
}

/// Builds the outgoing SMS body for a just-committed code, signing it when
/// the realm has a signing key configured.
pub fn build_message(
    realm: &Realm,
    vcode: &VerificationCode,
    short_plain: &str,
    long_plain: &str,
    redirect_domain: &str,
    signing_key: Option<&SigningKey>,
) -> Result<String, SmsError> {
    let user_report = vcode.test_type == "user-report";
    let body = realm.build_sms_text(
        short_plain,
        long_plain,
        redirect_domain,
        vcode.sms_template_label.as_deref(),
        user_report,
    );

    let phone = vcode.phone.as_deref().unwrap_or_default();

    match (realm.sms_sign_key_id.as_deref(), signing_key) {
        (Some(key_id), Some(key)) => {
            let purpose = if user_report { "User Report" } else { "EN Report" };
            match sign_message(key, key_id, purpose, phone, &body) {
                Ok(signed) => Ok(signed),
                Err(e) => {
                    error!(error = %e, "failed to sign SMS");
                    if realm.authenticated_sms_fail_closed {
                        Err(e)
                    } else {
                        warn!("delivering unsigned SMS (fail-open)");
                        Ok(body)
                    }
                }
            }
        }
        _ => Ok(body),
    }
}

/// The `MG` prefix on a Twilio sender id selects a Messaging Service
/// (`MessagingServiceSid`) over a plain sending number (`From`).
fn sender_form_field(sender_id: &str) -> (&'static str, &str) {
    if sender_id.starts_with("MG") {
        ("MessagingServiceSid", sender_id)
    } else {
        ("From", sender_id)
    }
}

/// Posts a Twilio-compatible `Messages.json` request, retrying transport
/// (not provider-rejection) errors with Fibonacci backoff.
pub async fn send_sms(client: &reqwest::Client, to: &str, message: &str) -> Result<(), SmsError> {
    let settings = config::get_settings();
    let url = format!(
        "https://api.twilio.com/2010-04-01/Accounts/{}/Messages.json",
        settings.twilio_account_sid
    );
    let (sender_field, sender_value) = sender_form_field(&settings.twilio_sender_id);

    let op = || async {
        client
            .post(&url)
            .basic_auth(&settings.twilio_account_sid, Some(&settings.twilio_auth_token))
            .timeout(Duration::from_secs(settings.sms_provider_timeout_seconds))
            .form(&[("To", to), ("Body", message), (sender_field, sender_value)])
            .send()
            .await
            .map_err(backoff::Error::transient)
    };

    let response = backoff::future::retry(
        backoff::ExponentialBackoffBuilder::new()
            .with_initial_interval(Duration::from_millis(250))
            .with_max_elapsed_time(Some(Duration::from_secs(4)))
            .build(),
        op,
    )
    .await?;

    if response.status() == reqwest::StatusCode::TOO_MANY_REQUESTS {
        return Err(SmsError::QueueFull);
    }
    if !response.status().is_success() {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        // Twilio's error code 21611 is "queue full"; the body is otherwise
        // surfaced verbatim but never logged with the destination number.
        if body.contains("21611") {
            return Err(SmsError::QueueFull);
        }
        return Err(SmsError::ProviderRejected(format!(
            "twilio returned {}: {}",
            status, scrub_phone(&body, to)
        )));
    }

    Ok(())
}

fn scrub_phone(body: &str, phone: &str) -> String {
    body.replace(phone, "[phone]")
}

/// Sends the SMS for a freshly committed code; on failure, deletes the
/// code (and any user-report phone-lookup row) so the codes can be
/// reissued, then reports the failure via observability.
pub async fn send_for_code(
    pool: &sqlx::PgPool,
    client: &reqwest::Client,
    vcode: &VerificationCode,
    message: &str,
) -> Result<(), ErrorCode> {
    let phone = match vcode.phone.as_deref() {
        Some(p) => p,
        None => return Ok(()),
    };

    let started = std::time::Instant::now();
    let result = send_sms(client, phone, message).await;
    let elapsed = started.elapsed().as_secs_f64();

    match result {
        Ok(()) => {
            observability::record("sms", "none", "OK", elapsed);
            Ok(())
        }
        Err(e) => {
            observability::record("sms", "none", "FAILED_TO_SEND_SMS", elapsed);
            if vcode.test_type == "user-report" {
                let _ = persistence::delete_user_report_phone_for_code(pool, vcode.id).await;
            }
            let _ = persistence::delete_verification_code(pool, vcode.id).await;
            error!(error = %e, "sms send failed, rolled back verification code");
            match e {
                SmsError::QueueFull => Err(ErrorCode::SmsQueueFull),
                _ => Err(ErrorCode::SmsFailure),
            }
        }
    }
}
