//! Account service
//!
//! [`Accounts`] owns the users collection and implements registration,
//! email and username management, password resets and the session
//! lifecycle (login, refresh, revoke).
//!
//! Every write is a single conditional update or insert. A write that
//! matches nothing means "not found or mismatch"; a unique index violation
//! means "already taken". The two are told apart by the index that fired,
//! never by error text.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use warden_shared::accounts::{Accounts, AccountsConfig, CreatedUser, NewUser};
//! use warden_shared::auth::jwt::TokenCodec;
//! use warden_shared::auth::password::HashParams;
//! use warden_shared::db::Db;
//! use warden_shared::mail::LogMailer;
//!
//! # async fn example() -> Result<(), warden_shared::error::Error> {
//! let accounts = Accounts::new(
//!     &Db::memory(),
//!     TokenCodec::new("a-secret-of-at-least-32-characters!!"),
//!     Arc::new(LogMailer),
//!     AccountsConfig { hash_params: HashParams::low_cost(), ..Default::default() },
//! );
//! accounts.ensure_indexes().await?;
//!
//! let created = accounts
//!     .create_user(NewUser {
//!         email: Some("jane@example.com".into()),
//!         password: Some("hunter2".into()),
//!         ..Default::default()
//!     })
//!     .await?;
//! assert!(matches!(created, CreatedUser::Account(_)));
//! # Ok(())
//! # }
//! ```

mod emails;
mod mailing;
mod password;
mod registration;
mod session;
mod username;
pub mod validation;

pub use session::Credentials;

use crate::auth::jwt::TokenCodec;
use crate::auth::password::{HashParams, PasswordCredential, PasswordInput};
use crate::auth::tokens::{AuthTokenService, TokenConfig};
use crate::db::query::IndexSpec;
use crate::db::{Collection, Db, StoreError};
use crate::error::{Error, Result};
use crate::id::IdGenerator;
use crate::mail::Mailer;
use crate::models::user::{fields, AuthTokenResult, PublicUser, UserDocument};
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;

/// Index enforcing unique handles
pub const HANDLE_INDEX: &str = "unique-handle";

/// Index enforcing unique addresses across users
pub const EMAIL_INDEX: &str = "unique-email-address";

/// Default password reset token lifetime (1 day)
pub const RESET_TOKEN_EXPIRY_SECONDS: i64 = 86_400;

/// Default number of concurrent sessions per user
pub const MAX_ACTIVE_SESSIONS: usize = 5;

/// Account service settings
#[derive(Debug, Clone)]
pub struct AccountsConfig {
    /// Users collection name
    pub collection: String,
    /// Primary key prefix for new users
    pub id_prefix: String,
    /// Sessions kept per user; the oldest is evicted beyond this
    pub max_active_sessions: usize,
    /// Reset tokens older than this are rejected
    pub reset_token_expiry_seconds: i64,
    /// Site root used in mailed links
    pub base_url: String,
    /// Sender of account mail
    pub email_from: String,
    pub site_name: String,
    /// Added to [`validation::RESERVED_USERNAMES`]
    pub reserved_usernames: Vec<String>,
    pub hash_params: HashParams,
    pub tokens: TokenConfig,
}

impl Default for AccountsConfig {
    fn default() -> Self {
        Self {
            collection: "users".to_string(),
            id_prefix: "usr_".to_string(),
            max_active_sessions: MAX_ACTIVE_SESSIONS,
            reset_token_expiry_seconds: RESET_TOKEN_EXPIRY_SECONDS,
            base_url: "http://localhost:3000".to_string(),
            email_from: "no-reply@localhost".to_string(),
            site_name: "Warden".to_string(),
            reserved_usernames: Vec::new(),
            hash_params: HashParams::default(),
            tokens: TokenConfig::default(),
        }
    }
}

/// Transforms the user projection after a successful login, before tokens are minted
pub type LoginHook = Arc<dyn Fn(PublicUser) -> BoxFuture<'static, Result<PublicUser>> + Send + Sync>;

/// Input for [`Accounts::create_user`]
///
/// Without a password the user is invited: no session starts and an
/// enrollment mail can be sent to complete the registration.
#[derive(Debug, Clone, Default)]
pub struct NewUser {
    pub email: Option<String>,
    pub username: Option<String>,
    pub name: Option<String>,
    pub password: Option<PasswordInput>,
    pub roles: Vec<String>,
}

/// Input for [`Accounts::enroll_user`]
#[derive(Debug, Clone, Default)]
pub struct Enrollment {
    pub token: String,
    pub password: PasswordInput,
    pub name: Option<String>,
    pub username: Option<String>,
}

/// Outcome of [`Accounts::create_user`]
#[derive(Debug, Clone, PartialEq)]
pub enum CreatedUser {
    /// Invited by email, no session
    Invite { user_id: String, email: String },
    /// Registered with a password and logged in
    Account(AuthTokenResult),
}

/// A token handed to the user out of band
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssuedToken {
    pub token: String,
    /// Short numeric code, for email verification
    pub digits: Option<String>,
    /// Moment the token stops being accepted, if it expires
    pub expires: Option<DateTime<Utc>>,
}

/// The account service
#[derive(Clone)]
pub struct Accounts {
    users: Collection<UserDocument>,
    tokens: Arc<AuthTokenService>,
    passwords: PasswordCredential,
    mailer: Arc<dyn Mailer>,
    config: Arc<AccountsConfig>,
    reserved: Arc<HashSet<String>>,
    on_login: Option<LoginHook>,
}

impl std::fmt::Debug for Accounts {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Accounts")
            .field("users", &self.users)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Accounts {
    pub fn new(db: &Db, codec: TokenCodec, mailer: Arc<dyn Mailer>, config: AccountsConfig) -> Self {
        let users = db.collection(config.collection.clone(), IdGenerator::with_prefix(config.id_prefix.clone()));

        let reserved = validation::RESERVED_USERNAMES
            .iter()
            .map(|name| name.to_string())
            .chain(config.reserved_usernames.iter().map(|name| name.trim().to_lowercase()))
            .collect();

        Self {
            users,
            tokens: Arc::new(AuthTokenService::new(codec, config.tokens)),
            passwords: PasswordCredential::new(config.hash_params),
            mailer,
            config: Arc::new(config),
            reserved: Arc::new(reserved),
            on_login: None,
        }
    }

    /// Installs a hook that may enrich the user before login tokens are minted
    pub fn on_login<F, Fut>(mut self, hook: F) -> Self
    where
        F: Fn(PublicUser) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<PublicUser>> + Send + 'static,
    {
        self.on_login = Some(Arc::new(move |user| Box::pin(hook(user))));
        self
    }

    pub fn users(&self) -> &Collection<UserDocument> {
        &self.users
    }

    pub fn config(&self) -> &AccountsConfig {
        &self.config
    }

    pub fn token_service(&self) -> &AuthTokenService {
        &self.tokens
    }

    /// Creates the unique indexes the service relies on
    pub async fn ensure_indexes(&self) -> Result<()> {
        self.users
            .create_index(&IndexSpec::new(HANDLE_INDEX, fields::HANDLE).unique().sparse())
            .await?;
        self.users
            .create_index(&IndexSpec::new(EMAIL_INDEX, fields::EMAIL_ADDRESS).unique().sparse())
            .await?;

        tracing::debug!(collection = %self.users.name(), "User indexes ensured");
        Ok(())
    }

    /// Closes the underlying store
    pub async fn disconnect(&self) {
        self.users.db().close().await;
    }

    pub(crate) fn is_reserved_username(&self, username: &str) -> bool {
        self.reserved.contains(&username.trim().to_lowercase())
    }

    /// Rejects reserved and malformed usernames
    pub(crate) fn check_username(&self, username: &str) -> Result<()> {
        if self.is_reserved_username(username) {
            return Err(Error::user_input(format!("Username {username} is unavailable.")));
        }
        if !validation::is_valid_username(username) {
            return Err(Error::user_input(format!("Username {username} is invalid.")));
        }
        Ok(())
    }
}

/// Translates a unique index violation into the caller-facing message
fn duplicate_key(err: StoreError, username: Option<&str>) -> Error {
    if err.is_duplicate_key(EMAIL_INDEX) {
        return Error::user_input("Email is invalid or already taken.");
    }
    if err.is_duplicate_key(HANDLE_INDEX) {
        return Error::user_input(format!("Username {} is unavailable.", username.unwrap_or_default()));
    }
    err.into()
}

fn to_value<T: serde::Serialize>(value: &T) -> Result<serde_json::Value> {
    serde_json::to_value(value).map_err(|err| StoreError::from(err).into())
}

/// Trimmed, `None` when blank
fn non_blank(value: Option<&str>) -> Option<String> {
    value.map(str::trim).filter(|v| !v.is_empty()).map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mail::MemoryMailer;

    fn accounts(config: AccountsConfig) -> Accounts {
        Accounts::new(
            &Db::memory(),
            TokenCodec::new("test-secret-that-is-long-enough-000"),
            Arc::new(MemoryMailer::new()),
            config,
        )
    }

    #[test]
    fn test_config_defaults() {
        let config = AccountsConfig::default();
        assert_eq!(config.collection, "users");
        assert_eq!(config.id_prefix, "usr_");
        assert_eq!(config.max_active_sessions, 5);
        assert_eq!(config.reset_token_expiry_seconds, 86_400);
    }

    #[test]
    fn test_reserved_usernames_are_case_insensitive() {
        let accounts = accounts(AccountsConfig {
            reserved_usernames: vec!["Warden".to_string()],
            ..Default::default()
        });

        assert!(accounts.is_reserved_username("Admin"));
        assert!(accounts.is_reserved_username(" yourself "));
        assert!(accounts.is_reserved_username("WARDEN"));
        assert!(!accounts.is_reserved_username("hunter"));
    }

    #[test]
    fn test_check_username_messages() {
        let accounts = accounts(AccountsConfig::default());
        assert_eq!(
            accounts.check_username("root").unwrap_err(),
            Error::user_input("Username root is unavailable.")
        );
        assert_eq!(
            accounts.check_username("a--b").unwrap_err(),
            Error::user_input("Username a--b is invalid.")
        );
        assert!(accounts.check_username("hunter").is_ok());
    }

    #[test]
    fn test_duplicate_key_translation() {
        let email = StoreError::DuplicateKey {
            index: EMAIL_INDEX.to_string(),
        };
        assert_eq!(
            duplicate_key(email, None),
            Error::user_input("Email is invalid or already taken.")
        );

        let handle = StoreError::DuplicateKey {
            index: HANDLE_INDEX.to_string(),
        };
        assert_eq!(
            duplicate_key(handle, Some("Hunter")),
            Error::user_input("Username Hunter is unavailable.")
        );

        let other = StoreError::DuplicateKey {
            index: "_id_".to_string(),
        };
        assert_eq!(duplicate_key(other, None).code(), 500);
    }

    #[test]
    fn test_non_blank() {
        assert_eq!(non_blank(Some("  Jane ")), Some("Jane".to_string()));
        assert_eq!(non_blank(Some("   ")), None);
        assert_eq!(non_blank(None), None);
    }
}
