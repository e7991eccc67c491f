#[cfg(test)]
pub mod helpers {
    use crate::{auth, database, models::Realm, quota};
    use sqlx::PgPool;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Once;

    static INIT: Once = Once::new();

    /// Initialize the test environment once (database, quota store). Runs
    /// against `.env.test` -- a real Postgres + Redis instance.
    pub async fn setup() {
        static SETUP_COMPLETE: AtomicBool = AtomicBool::new(false);
        if SETUP_COMPLETE.swap(true, Ordering::SeqCst) {
            return;
        }

        INIT.call_once(|| {
            dotenvy::from_filename(".env.test").ok();
            tracing_subscriber::fmt()
                .with_max_level(tracing::Level::WARN)
                .with_test_writer()
                .try_init()
                .ok();
        });

        database::init_db().await.expect("failed to initialize test database");
        quota::init_redis().await.expect("failed to initialize test quota store");
    }

    pub async fn cleanup_db() {
        let pool = database::get_db();
        sqlx::query("DELETE FROM user_report_phones").execute(pool).await.ok();
        sqlx::query("DELETE FROM verification_codes").execute(pool).await.ok();
        sqlx::query("DELETE FROM authorized_apps").execute(pool).await.ok();
        sqlx::query("DELETE FROM realms").execute(pool).await.ok();
    }

    /// Inserts a realm with sane defaults for issuance tests and returns it.
    pub async fn create_test_realm(pool: &PgPool, mutate: impl FnOnce(&mut RealmSeed)) -> Realm {
        let mut seed = RealmSeed::default();
        mutate(&mut seed);

        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO realms
                (name, allowed_test_types, code_length, long_code_length,
                 code_duration_minutes, long_code_duration_minutes, require_date,
                 abuse_prevention_enabled, daily_quota, realm_hmac_key, enforce_realm_quotas,
                 allow_bulk_upload, allow_generated_sms, allow_admin_user_report, allows_user_report,
                 sms_country, sms_template, sms_template_user_report,
                 user_report_webhook_url, user_report_webhook_secret,
                 sms_sign_key_id, authenticated_sms_fail_closed, maintenance_mode)
            VALUES ($1,$2,$3,$4,$5,$6,$7,$8,$9,$10,$11,$12,$13,$14,$15,$16,$17,$18,$19,$20,$21,$22,$23)
            RETURNING id
            "#,
        )
        .bind(&seed.name)
        .bind(seed.allowed_test_types)
        .bind(seed.code_length)
        .bind(seed.long_code_length)
        .bind(seed.code_duration_minutes)
        .bind(seed.long_code_duration_minutes)
        .bind(seed.require_date)
        .bind(seed.abuse_prevention_enabled)
        .bind(seed.daily_quota)
        .bind(&seed.realm_hmac_key)
        .bind(seed.enforce_realm_quotas)
        .bind(seed.allow_bulk_upload)
        .bind(seed.allow_generated_sms)
        .bind(seed.allow_admin_user_report)
        .bind(seed.allows_user_report)
        .bind(&seed.sms_country)
        .bind(&seed.sms_template)
        .bind(&seed.sms_template_user_report)
        .bind(&seed.user_report_webhook_url)
        .bind(&seed.user_report_webhook_secret)
        .bind(&seed.sms_sign_key_id)
        .bind(seed.authenticated_sms_fail_closed)
        .bind(seed.maintenance_mode)
        .fetch_one(pool)
        .await
        .expect("failed to insert test realm");

        crate::persistence::find_realm(pool, id)
            .await
            .expect("failed to load test realm")
            .expect("realm was just inserted")
    }

    pub async fn create_test_app(pool: &PgPool, realm_id: i64, permissions: i16) -> (i64, String) {
        let api_key = format!("test-key-{}", uuid::Uuid::new_v4());
        let hash = auth::hash_api_key(&api_key);
        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO authorized_apps (realm_id, api_key_hash, name, permissions, is_active)
            VALUES ($1, $2, 'test app', $3, true)
            RETURNING id
            "#,
        )
        .bind(realm_id)
        .bind(&hash)
        .bind(permissions)
        .fetch_one(pool)
        .await
        .expect("failed to insert test authorized app");

        (id, api_key)
    }

    pub struct RealmSeed {
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

    impl Default for RealmSeed {
        fn default() -> Self {
            RealmSeed {
                name: "test realm".to_string(),
                allowed_test_types: crate::models::test_type::CONFIRMED,
                code_length: 8,
                long_code_length: 16,
                code_duration_minutes: 15,
                long_code_duration_minutes: 24 * 60,
                require_date: false,
                abuse_prevention_enabled: false,
                daily_quota: 1000,
                realm_hmac_key: b"test-hmac-key".to_vec(),
                enforce_realm_quotas: true,
                allow_bulk_upload: true,
                allow_generated_sms: true,
                allow_admin_user_report: false,
                allows_user_report: true,
                sms_country: "US".to_string(),
                sms_template: "Your code is [code], expires soon. [enexpresslink]".to_string(),
                sms_template_user_report: Some("Report code: [code]".to_string()),
                user_report_webhook_url: None,
                user_report_webhook_secret: None,
                sms_sign_key_id: None,
                authenticated_sms_fail_closed: false,
                maintenance_mode: false,
            }
        }
    }
}
