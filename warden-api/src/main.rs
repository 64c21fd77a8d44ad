//! # Warden API Server
//!
//! Serves the account endpoints under `/auth`.
//!
//! ## Usage
//!
//! ```bash
//! JWT_SECRET=$(openssl rand -hex 32) cargo run -p warden-api
//! ```

use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use warden_api::app::{build_router, AppState};
use warden_api::config::Config;
use warden_shared::accounts::Accounts;
use warden_shared::auth::jwt::TokenCodec;
use warden_shared::db::Db;
use warden_shared::mail::LogMailer;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    tracing::info!("Warden API Server v{} starting...", env!("CARGO_PKG_VERSION"));

    let config = Config::from_env()?;
    if let Some(mail_url) = &config.accounts.mail_url {
        tracing::info!(mail_url = %mail_url, "Mail is handed to the log mailer");
    }

    let db = Db::open(config.database.url.as_deref(), config.database.max_connections).await?;

    let accounts = Accounts::new(
        &db,
        TokenCodec::new(&config.jwt.secret),
        Arc::new(LogMailer),
        config.accounts_config(),
    );
    accounts.ensure_indexes().await?;

    let address = config.bind_address();
    let app = build_router(AppState::new(db.clone(), accounts, config));

    let listener = tokio::net::TcpListener::bind(&address).await?;
    tracing::info!("Server listening on http://{}", address);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    db.close().await;
    tracing::info!("Server shut down");
    Ok(())
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "warden_api=debug,warden_shared=info,tower_http=debug".into());

    let registry = tracing_subscriber::registry().with(filter);
    if std::env::var("LOG_FORMAT").map(|format| format == "json").unwrap_or(false) {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "Failed to listen for the shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
