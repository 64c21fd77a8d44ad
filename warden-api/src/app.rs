/// Application state and router builder
///
/// This module defines the shared application state and provides
/// a function to build the Axum router with all routes and middleware.
///
/// # Example
///
/// ```no_run
/// use std::sync::Arc;
/// use warden_api::{app::AppState, config::Config};
/// use warden_shared::accounts::Accounts;
/// use warden_shared::auth::jwt::TokenCodec;
/// use warden_shared::db::Db;
/// use warden_shared::mail::LogMailer;
///
/// # async fn example() -> anyhow::Result<()> {
/// let config = Config::from_env()?;
/// let db = Db::open(config.database.url.as_deref(), config.database.max_connections).await?;
/// let accounts = Accounts::new(
///     &db,
///     TokenCodec::new(&config.jwt.secret),
///     Arc::new(LogMailer),
///     config.accounts_config(),
/// );
/// let state = AppState::new(db, accounts, config);
/// let app = warden_api::app::build_router(state);
/// # Ok(())
/// # }
/// ```

use crate::{config::Config, error::ApiError};
use axum::{
    http::{header, HeaderValue, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::{
    cors::CorsLayer,
    trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer},
};
use tracing::Level;
use warden_shared::{accounts::Accounts, db::Db};

/// Shared application state
///
/// This is cloned for each request handler via Axum's `State` extractor.
#[derive(Clone)]
pub struct AppState {
    /// Document store handle
    pub db: Db,

    /// Account service
    pub accounts: Accounts,

    /// Application configuration
    pub config: Arc<Config>,
}

impl AppState {
    /// Creates new application state
    pub fn new(db: Db, accounts: Accounts, config: Config) -> Self {
        Self {
            db,
            accounts,
            config: Arc::new(config),
        }
    }
}

/// Builds the complete Axum router with all routes and middleware
///
/// # Architecture
///
/// ```text
/// /
/// ├── GET /health
/// └── /auth/
///     ├── POST /login
///     ├── POST /logout
///     ├── POST /create-account
///     ├── POST /enroll-account
///     ├── POST /reset-password
///     ├── POST /verify-email
///     └── POST /refresh-token
/// ```
///
/// Unknown paths answer 404 and known paths with the wrong method 405, both
/// with a `{"message": ...}` body.
///
/// # Middleware Stack
///
/// Applied in order (bottom to top):
/// 1. JSON body for 405 responses
/// 2. Logging (tower-http TraceLayer)
/// 3. CORS (tower-http CorsLayer)
pub fn build_router(state: AppState) -> Router {
    use crate::routes;

    let health_routes = Router::new().route("/health", get(routes::health::health_check));

    let auth_routes = Router::new()
        .route("/login", post(routes::auth::login))
        .route("/logout", post(routes::auth::logout))
        .route("/create-account", post(routes::auth::create_account))
        .route("/enroll-account", post(routes::auth::enroll_account))
        .route("/reset-password", post(routes::auth::reset_password))
        .route("/verify-email", post(routes::auth::verify_email))
        .route("/refresh-token", post(routes::auth::refresh_token));

    Router::new()
        .merge(health_routes)
        .nest("/auth", auth_routes)
        .fallback(not_found)
        .layer(axum::middleware::map_response(method_not_allowed))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(cors_layer(&state.config.api.cors_origins))
        .with_state(state)
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    if origins.iter().any(|origin| origin == "*") {
        // Development mode: permissive CORS
        return CorsLayer::permissive();
    }

    let origins: Vec<HeaderValue> = origins.iter().filter_map(|origin| origin.parse().ok()).collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE])
        .allow_credentials(true)
        .max_age(std::time::Duration::from_secs(3600))
}

async fn not_found() -> ApiError {
    ApiError::not_found()
}

/// Gives axum's empty 405 responses a JSON body, keeping the `Allow` header
async fn method_not_allowed(response: Response) -> Response {
    if response.status() != StatusCode::METHOD_NOT_ALLOWED {
        return response;
    }

    let allow = response.headers().get(header::ALLOW).cloned();
    let mut replaced = ApiError::MethodNotAllowed.into_response();
    if let Some(allow) = allow {
        replaced.headers_mut().insert(header::ALLOW, allow);
    }
    replaced
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cors_layer_accepts_origin_lists() {
        // Invalid origins are skipped rather than failing the build
        let _ = cors_layer(&["https://warden.example.com".to_string(), "not a header\n".to_string()]);
        let _ = cors_layer(&["*".to_string()]);
    }
}
