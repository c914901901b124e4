use std::sync::{Arc, Mutex};

use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use localbook::config::AppConfig;
use localbook::db;
use localbook::handlers;
use localbook::services::bookings;
use localbook::services::expiry::TimerQueue;
use localbook::services::notifications::SmtpMailer;
use localbook::services::reaper;
use localbook::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config = AppConfig::from_env();
    if std::env::var("TOKEN_SECRET").map_or(true, |s| s.is_empty()) {
        tracing::warn!("TOKEN_SECRET not set, using a random secret; booking links will not survive a restart");
    }

    let db = Arc::new(Mutex::new(db::init_db(&config.database_url)?));

    let (expiry, _timer_task) = TimerQueue::spawn(db.clone());
    let mailer = SmtpMailer::new(config.smtp_timeout());

    let state = Arc::new(AppState {
        db: db.clone(),
        config: config.clone(),
        mailer: Box::new(mailer),
        expiry: Arc::new(expiry),
    });

    bookings::recover_pending_expiries(&state)?;
    tokio::spawn(reaper::run_completion_sweep(db, config.sweep_interval()));

    let app = handlers::router(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let addr = format!("0.0.0.0:{}", config.port);
    tracing::info!("starting server on {addr}");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
