use axum::{
    http::Method,
    routing::{get, post},
    Router,
};
use prometheus::{Encoder, TextEncoder};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::signal;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::{info, Level};
use tracing_subscriber;

use verify_core::api::{self, AppState};
use verify_core::{config, database, quota, sms};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if it exists
    if let Err(e) = dotenvy::dotenv() {
        println!("No .env file found, using environment variables: {}", e);
    }

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_max_level(Level::INFO)
        .init();

    info!("Starting verification code core...");

    let settings = config::get_settings();

    // Initialize database
    info!("Initializing database...");
    database::init_db().await?;
    info!("Database connection pool initialized");

    // Connect to the quota store
    info!("Connecting to quota store...");
    quota::init_redis().await?;
    info!("Quota store connected");

    // Load the SMS signing key, if configured
    info!("Loading SMS signing key...");
    sms::init_signing_key()?;

    let http_client = reqwest::Client::builder()
        .timeout(Duration::from_secs(settings.sms_provider_timeout_seconds))
        .build()?;

    let state = AppState {
        pool: database::get_db().clone(),
        http_client,
    };

    // Setup CORS
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([
            hyper::header::CONTENT_TYPE,
            hyper::header::AUTHORIZATION,
            hyper::header::ACCEPT,
        ])
        .allow_credentials(false);

    // Setup routes
    let app = Router::new()
        .route("/api/issue", post(api::issue_handler))
        .route("/api/batch-issue", post(api::batch_issue_handler))
        .route("/api/user-report", post(api::user_report_handler))
        .route("/api/checkcodestatus", post(api::check_code_status_handler))
        .route("/api/expirecode", post(api::expire_code_handler))
        .route("/health", get(api::health_handler))
        .route("/metrics", get(metrics_handler))
        .route("/", get(api::root_handler))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(cors)
        .with_state(state);

    // Create server address
    let addr: SocketAddr = format!("{}:{}", settings.host, settings.port).parse()?;

    info!("Verification code core started on http://{}", addr);

    // Start server with graceful shutdown
    let listener = TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Shutdown complete");

    Ok(())
}

async fn metrics_handler() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = vec![];
    encoder.encode(&metric_families, &mut buffer).unwrap();
    String::from_utf8(buffer).unwrap()
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Shutting down verification code core...");
        },
        _ = terminate => {
            info!("Shutting down verification code core...");
        },
    }
}
