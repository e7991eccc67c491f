//! Token-bucket quota keyed by `HMAC(realm_hmac_key, realm_id || yyyymmdd)`,
//! backed by Redis `INCR`+`EXPIRE`, mirroring the billing module's
//! `increment_redis_counter_simple` shape but with a daily, not monthly,
//! window.

use std::time::Instant;

use chrono::{Duration, Utc};
use hmac::{Hmac, Mac};
use once_cell::sync::OnceCell;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use sha2::Sha256;

use crate::config;
use crate::observability;

static REDIS_CONNECTION: OnceCell<ConnectionManager> = OnceCell::new();

pub async fn init_redis() -> anyhow::Result<()> {
    if REDIS_CONNECTION.get().is_some() {
        return Ok(());
    }
    let settings = config::get_settings();
    let client = redis::Client::open(settings.redis_url.as_str())?;
    let conn = ConnectionManager::new(client).await?;
    REDIS_CONNECTION.set(conn).ok();
    Ok(())
}

fn get_redis() -> &'static ConnectionManager {
    REDIS_CONNECTION
        .get()
        .expect("quota redis connection not initialized")
}

#[derive(Debug, Clone, Copy)]
pub struct QuotaResult {
    pub limit: i64,
    pub remaining: i64,
    pub allowed: bool,
    /// Unix timestamp when the daily bucket rolls over (UTC midnight).
    pub reset_at: i64,
}

/// The daily bucket key for a realm: `HMAC-SHA256(realm_hmac_key, realm_id
/// || yyyymmdd)`, hex-encoded.
pub fn quota_key(realm_id: i64, realm_hmac_key: &[u8]) -> String {
    let day = Utc::now().format("%Y%m%d").to_string();
    let mut mac = Hmac::<Sha256>::new_from_slice(realm_hmac_key)
        .expect("HMAC accepts keys of any length");
    mac.update(realm_id.to_string().as_bytes());
    mac.update(day.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

/// Atomically increments the realm's daily counter and reports whether the
/// realm is still within `daily_limit`. Only called when a realm has
/// `abuse_prevention_enabled`.
pub async fn take(key: &str, daily_limit: i64) -> anyhow::Result<QuotaResult> {
    let started = Instant::now();
    let mut conn = get_redis().clone();
    let redis_key = format!("quota:{}", key);

    let seconds_until_midnight = seconds_until_next_utc_midnight();

    let results: Vec<i64> = redis::pipe()
        .atomic()
        .incr(&redis_key, 1)
        .expire(&redis_key, seconds_until_midnight)
        .ignore()
        .query_async(&mut conn)
        .await?;
    let count = results[0];

    let allowed = count <= daily_limit;
    observability::record(
        "quota",
        "none",
        if allowed { "LIMITER_TAKE" } else { "LIMITER_TAKE_EXHAUSTED" },
        started.elapsed().as_secs_f64(),
    );

    Ok(QuotaResult {
        limit: daily_limit,
        remaining: (daily_limit - count).max(0),
        allowed,
        reset_at: (Utc::now() + Duration::seconds(seconds_until_midnight)).timestamp(),
    })
}

fn seconds_until_next_utc_midnight() -> i64 {
    let now = Utc::now();
    let tomorrow = (now + Duration::days(1)).date_naive();
    let midnight = tomorrow.and_hms_opt(0, 0, 0).unwrap();
    (midnight - now.naive_utc()).num_seconds().max(1)
}
