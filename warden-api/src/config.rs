/// Configuration management for the API server
///
/// This module loads configuration from environment variables and provides
/// a type-safe configuration struct.
///
/// # Environment Variables
///
/// - `DATABASE_URL`: PostgreSQL connection string (in-memory store when unset)
/// - `DATABASE_MAX_CONNECTIONS`: pool size (default: 10)
/// - `API_HOST`: Host to bind to (default: 0.0.0.0)
/// - `API_PORT`: Port to bind to (default: 8080)
/// - `CORS_ORIGINS`: Comma separated origins, `*` for any (default: *)
/// - `JWT_SECRET`: Secret key for token signing (required, 32+ characters)
/// - `BASE_URL`: Site root used in mailed links (default: http://localhost:3000)
/// - `EMAIL_FROM`: Sender of account mail (default: no-reply@localhost)
/// - `MAIL_URL`: Mail transport, reported at startup only
/// - `USERS_COLLECTION`: default `users`
/// - `MAX_ACTIVE_SESSIONS`: sessions kept per user (default: 5)
/// - `ACCESS_TOKEN_EXPIRY_SECONDS`, `REFRESH_TOKEN_EXPIRY_SECONDS`,
///   `RESET_TOKEN_EXPIRY_SECONDS`: token lifetimes
/// - `RUST_LOG`: Log level (default: warden_api=debug,tower_http=debug)
///
/// # Example
///
/// ```no_run
/// use warden_api::config::Config;
///
/// # fn example() -> anyhow::Result<()> {
/// let config = Config::from_env()?;
/// println!("Server will listen on {}:{}", config.api.host, config.api.port);
/// # Ok(())
/// # }
/// ```

use serde::{Deserialize, Serialize};
use std::env;
use std::str::FromStr;
use warden_shared::accounts::{AccountsConfig, MAX_ACTIVE_SESSIONS, RESET_TOKEN_EXPIRY_SECONDS};
use warden_shared::auth::tokens::{TokenConfig, ACCESS_TOKEN_EXPIRY_SECONDS, REFRESH_TOKEN_EXPIRY_SECONDS};

/// Complete application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// API server configuration
    pub api: ApiConfig,

    /// Database configuration
    pub database: DatabaseConfig,

    /// JWT configuration
    pub jwt: JwtConfig,

    /// Account service configuration
    pub accounts: AccountSettings,
}

/// API server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Host to bind to
    pub host: String,

    /// Port to bind to
    pub port: u16,

    /// Allowed CORS origins
    pub cors_origins: Vec<String>,
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// PostgreSQL connection URL, in-memory store when absent
    pub url: Option<String>,

    /// Maximum number of connections in pool
    pub max_connections: u32,
}

/// JWT configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JwtConfig {
    /// Secret key for token signing
    ///
    /// IMPORTANT: This must be kept secret and should be at least 32 bytes.
    /// Generate with: `openssl rand -hex 32`
    pub secret: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountSettings {
    pub base_url: String,
    pub email_from: String,
    pub mail_url: Option<String>,
    pub users_collection: String,
    pub max_active_sessions: usize,
    pub access_token_expiry_seconds: i64,
    pub refresh_token_expiry_seconds: i64,
    pub reset_token_expiry_seconds: i64,
}

impl Default for AccountSettings {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:3000".to_string(),
            email_from: "no-reply@localhost".to_string(),
            mail_url: None,
            users_collection: "users".to_string(),
            max_active_sessions: MAX_ACTIVE_SESSIONS,
            access_token_expiry_seconds: ACCESS_TOKEN_EXPIRY_SECONDS,
            refresh_token_expiry_seconds: REFRESH_TOKEN_EXPIRY_SECONDS,
            reset_token_expiry_seconds: RESET_TOKEN_EXPIRY_SECONDS,
        }
    }
}

fn parse_or<T>(name: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(name) {
        Ok(value) => value
            .trim()
            .parse::<T>()
            .map_err(|err| anyhow::anyhow!("{} is invalid: {}", name, err)),
        Err(_) => Ok(default),
    }
}

fn optional(name: &str) -> Option<String> {
    env::var(name).ok().filter(|value| !value.trim().is_empty())
}

impl Config {
    /// Loads configuration from environment variables
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - `JWT_SECRET` is missing or shorter than 32 characters
    /// - Environment variables have invalid values
    pub fn from_env() -> anyhow::Result<Self> {
        // Load .env file if present (for development)
        dotenvy::dotenv().ok();

        let api_host = env::var("API_HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
        let api_port = parse_or("API_PORT", 8080u16)?;
        let cors_origins = env::var("CORS_ORIGINS")
            .unwrap_or_else(|_| "*".to_string())
            .split(',')
            .map(|origin| origin.trim().to_string())
            .filter(|origin| !origin.is_empty())
            .collect();

        let max_connections = parse_or("DATABASE_MAX_CONNECTIONS", 10u32)?;

        let jwt_secret = env::var("JWT_SECRET")
            .map_err(|_| anyhow::anyhow!("JWT_SECRET environment variable is required"))?;

        if jwt_secret.len() < 32 {
            anyhow::bail!("JWT_SECRET must be at least 32 characters long");
        }

        let defaults = AccountSettings::default();
        let accounts = AccountSettings {
            base_url: env::var("BASE_URL").unwrap_or(defaults.base_url),
            email_from: env::var("EMAIL_FROM").unwrap_or(defaults.email_from),
            mail_url: optional("MAIL_URL"),
            users_collection: env::var("USERS_COLLECTION").unwrap_or(defaults.users_collection),
            max_active_sessions: parse_or("MAX_ACTIVE_SESSIONS", defaults.max_active_sessions)?,
            access_token_expiry_seconds: parse_or("ACCESS_TOKEN_EXPIRY_SECONDS", defaults.access_token_expiry_seconds)?,
            refresh_token_expiry_seconds: parse_or(
                "REFRESH_TOKEN_EXPIRY_SECONDS",
                defaults.refresh_token_expiry_seconds,
            )?,
            reset_token_expiry_seconds: parse_or("RESET_TOKEN_EXPIRY_SECONDS", defaults.reset_token_expiry_seconds)?,
        };

        if accounts.max_active_sessions == 0 {
            anyhow::bail!("MAX_ACTIVE_SESSIONS must be at least 1");
        }

        Ok(Self {
            api: ApiConfig {
                host: api_host,
                port: api_port,
                cors_origins,
            },
            database: DatabaseConfig {
                url: optional("DATABASE_URL"),
                max_connections,
            },
            jwt: JwtConfig { secret: jwt_secret },
            accounts,
        })
    }

    /// Returns the server bind address
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.api.host, self.api.port)
    }

    /// Account service settings derived from this configuration
    pub fn accounts_config(&self) -> AccountsConfig {
        AccountsConfig {
            collection: self.accounts.users_collection.clone(),
            max_active_sessions: self.accounts.max_active_sessions,
            reset_token_expiry_seconds: self.accounts.reset_token_expiry_seconds,
            base_url: self.accounts.base_url.trim_end_matches('/').to_string(),
            email_from: self.accounts.email_from.clone(),
            tokens: TokenConfig {
                access_ttl_seconds: self.accounts.access_token_expiry_seconds,
                refresh_ttl_seconds: self.accounts.refresh_token_expiry_seconds,
                ..TokenConfig::default()
            },
            ..AccountsConfig::default()
        }
    }
}
