//! Session lifecycle: login, refresh and revoke
//!
//! Active sessions are the SHA-256 hashes of their refresh tokens, stored
//! on the user under `services.resume.refreshTokens`. The list is an
//! allowlist capped at `max_active_sessions`; pushing beyond the cap evicts
//! the oldest entry. Each entry carries the expiry of its token. Rotation
//! removes the consumed hash along with any expired entries and pushes the
//! new one in a single conditional update, so a refresh token is accepted at
//! most once.

use super::validation::{normalize_email, normalize_username};
use super::{to_value, Accounts};
use crate::auth::password::{sha256_hex, PasswordInput};
use crate::db::query::{Filter, Update};
use crate::db::Scoped;
use crate::error::{Error, Result};
use crate::models::user::{fields, AuthTokenResult, PublicUser, RefreshTokenEntry, UserDocument};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::{info, warn};

const INCORRECT_CREDENTIALS: &str = "Incorrect credentials provided.";
const INCORRECT_TOKEN: &str = "Incorrect token provided.";

/// Refresh tokens this close to expiry are refused
const REFRESH_MARGIN_SECONDS: i64 = 5;

/// Login input
///
/// `identity` is an email address when it contains `@`, a username otherwise.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Credentials {
    pub identity: String,
    pub password: PasswordInput,
}

impl Credentials {
    pub fn new(identity: impl Into<String>, password: impl Into<PasswordInput>) -> Self {
        Self {
            identity: identity.into(),
            password: password.into(),
        }
    }
}

fn incorrect_token() -> Error {
    Error::user_input(INCORRECT_TOKEN)
}

impl Accounts {
    /// Session history entry for a freshly issued pair
    pub(crate) fn session_entry(&self, tokens: &AuthTokenResult, now: DateTime<Utc>) -> Result<RefreshTokenEntry> {
        let claims = self.tokens.codec().decode_ignoring_expiration(&tokens.refresh_token)?;
        let expires = DateTime::from_timestamp(claims.exp, 0)
            .ok_or_else(|| Error::internal(format!("refresh token expiry {} out of range", claims.exp)))?;

        Ok(RefreshTokenEntry {
            token: sha256_hex(&tokens.refresh_token),
            when: now,
            expires,
        })
    }

    /// Mints a token pair and records its refresh token on the user
    pub(crate) async fn record_session(
        &self,
        users: &mut Scoped<'_, UserDocument>,
        user_id: &str,
        public: &PublicUser,
    ) -> Result<AuthTokenResult> {
        self.record_session_at(users, user_id, public, Utc::now()).await
    }

    pub(crate) async fn record_session_at(
        &self,
        users: &mut Scoped<'_, UserDocument>,
        user_id: &str,
        public: &PublicUser,
        now: DateTime<Utc>,
    ) -> Result<AuthTokenResult> {
        let tokens = self.tokens.issue_at(public, None, now)?;
        let entry = self.session_entry(&tokens, now)?;

        let update = Update::new()
            .push_bounded(fields::REFRESH_TOKENS, vec![to_value(&entry)?], self.config.max_active_sessions)
            .set(fields::UPDATED_AT, now.timestamp_millis());

        if !users.update_one(&Filter::by_id(user_id), &update).await? {
            return Err(Error::internal(format!("user {user_id} disappeared while starting a session")));
        }
        Ok(tokens)
    }

    /// Verifies credentials and starts a session
    ///
    /// Unknown identities and wrong passwords fail identically.
    pub async fn login(&self, credentials: Credentials) -> Result<AuthTokenResult> {
        let identity = credentials.identity.trim();
        if identity.is_empty() {
            return Err(Error::user_input(INCORRECT_CREDENTIALS));
        }

        let filter = if identity.contains('@') {
            Filter::eq(fields::EMAIL_ADDRESS, normalize_email(identity))
        } else {
            Filter::eq(fields::HANDLE, normalize_username(identity))
        };

        let Some(user) = self.users.find_one(&filter).await? else {
            warn!("Login failed: unknown identity");
            return Err(Error::user_input(INCORRECT_CREDENTIALS));
        };

        if !self.passwords.verify(&credentials.password, user.stored_password()).await {
            warn!(user_id = %user.id, "Login failed: password mismatch");
            return Err(Error::user_input(INCORRECT_CREDENTIALS));
        }

        let mut public = PublicUser::from(&user);
        if let Some(hook) = &self.on_login {
            public = hook(public).await?;
        }

        let mut session = self.users.db().begin().await?;
        let tokens = self
            .record_session(&mut self.users.in_session(session.as_mut()), &user.id, &public)
            .await?;
        session.commit().await?;

        info!(user_id = %user.id, "User logged in");
        Ok(tokens)
    }

    /// Exchanges a token pair for a new one
    ///
    /// The refresh token must be valid and still listed on the user, and the
    /// access token (which may be expired) must come from the same issuance.
    /// The new refresh token expires when the consumed one would have.
    pub async fn refresh_token(&self, access_token: &str, refresh_token: &str) -> Result<AuthTokenResult> {
        self.refresh_token_at(access_token, refresh_token, Utc::now()).await
    }

    pub(crate) async fn refresh_token_at(
        &self,
        access_token: &str,
        refresh_token: &str,
        now: DateTime<Utc>,
    ) -> Result<AuthTokenResult> {
        if access_token.is_empty() || refresh_token.is_empty() {
            return Err(incorrect_token());
        }

        let codec = self.tokens.codec();
        let refresh = codec.decode(refresh_token).map_err(|_| incorrect_token())?;
        let access = codec
            .decode_ignoring_expiration(access_token)
            .map_err(|_| incorrect_token())?;

        if refresh.prm != access.prm {
            warn!(user_id = %refresh.sub, "Refresh rejected: token pair mismatch");
            return Err(incorrect_token());
        }

        let remaining = refresh.seconds_remaining(now);
        if remaining < REFRESH_MARGIN_SECONDS {
            return Err(incorrect_token());
        }

        let hashed = sha256_hex(refresh_token);
        let filter = Filter::by_id(&refresh.sub).and(Filter::eq(fields::REFRESH_TOKEN_HASH, hashed.clone()));

        let mut session = self.users.db().begin().await?;
        let mut users = self.users.in_session(session.as_mut());

        let Some(user) = users.find_one(&filter).await? else {
            warn!(user_id = %refresh.sub, "Refresh rejected: unknown session");
            return Err(incorrect_token());
        };

        let tokens = self.tokens.issue_at(&PublicUser::from(&user), Some(remaining), now)?;
        let entry = self.session_entry(&tokens, now)?;

        let update = Update::new()
            .pull(
                fields::REFRESH_TOKENS,
                Filter::Or(vec![
                    Filter::eq("token", hashed),
                    Filter::lt("expires", now.timestamp_millis()),
                ]),
            )
            .push_bounded(fields::REFRESH_TOKENS, vec![to_value(&entry)?], self.config.max_active_sessions)
            .set(fields::UPDATED_AT, now.timestamp_millis());

        if !users.update_one(&filter, &update).await? {
            return Err(incorrect_token());
        }
        session.commit().await?;

        info!(user_id = %user.id, "Refresh token rotated");
        Ok(tokens)
    }

    /// Ends the session of `refresh_token`
    ///
    /// Only the user ids of the two tokens have to match, so a newer access
    /// token can revoke an older session of the same user.
    pub async fn revoke_token(&self, access_token: &str, refresh_token: &str) -> Result<()> {
        if access_token.is_empty() || refresh_token.is_empty() {
            return Err(incorrect_token());
        }

        let codec = self.tokens.codec();
        let refresh = codec.decode(refresh_token).map_err(|_| incorrect_token())?;
        let access = codec.decode(access_token).map_err(|_| incorrect_token())?;

        if refresh.sub != access.sub {
            return Err(incorrect_token());
        }

        let hashed = sha256_hex(refresh_token);
        let filter = Filter::by_id(&refresh.sub).and(Filter::eq(fields::REFRESH_TOKEN_HASH, hashed.clone()));
        let update = Update::new().pull(fields::REFRESH_TOKENS, Filter::eq("token", hashed));

        if !self.users.update_one(&filter, &update).await? {
            return Err(incorrect_token());
        }

        info!(user_id = %refresh.sub, "Session revoked");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accounts::{AccountsConfig, CreatedUser, NewUser};
    use crate::auth::jwt::TokenCodec;
    use crate::auth::password::HashParams;
    use crate::db::Db;
    use crate::mail::MemoryMailer;
    use std::sync::Arc;

    async fn signed_up() -> (Accounts, AuthTokenResult) {
        let accounts = Accounts::new(
            &Db::memory(),
            TokenCodec::new("test-secret-that-is-long-enough-000"),
            Arc::new(MemoryMailer::new()),
            AccountsConfig {
                hash_params: HashParams::low_cost(),
                ..Default::default()
            },
        );
        let created = accounts
            .create_user(NewUser {
                email: Some("jane@example.com".to_string()),
                password: Some("hunter2".into()),
                ..Default::default()
            })
            .await
            .unwrap();
        let CreatedUser::Account(tokens) = created else {
            panic!("signup should start a session");
        };
        (accounts, tokens)
    }

    #[tokio::test]
    async fn test_refresh_refused_near_expiry() {
        let (accounts, tokens) = signed_up().await;
        let exp = accounts.tokens.codec().decode(&tokens.refresh_token).unwrap().exp;
        let almost = DateTime::from_timestamp(exp - 3, 0).unwrap();

        let err = accounts
            .refresh_token_at(&tokens.access_token, &tokens.refresh_token, almost)
            .await
            .unwrap_err();
        assert_eq!(err, Error::user_input("Incorrect token provided."));
    }

    #[tokio::test]
    async fn test_refresh_keeps_remaining_lifetime() {
        let (accounts, tokens) = signed_up().await;
        let exp = accounts.tokens.codec().decode(&tokens.refresh_token).unwrap().exp;
        let later = DateTime::from_timestamp(exp - 60, 0).unwrap();

        let rotated = accounts
            .refresh_token_at(&tokens.access_token, &tokens.refresh_token, later)
            .await
            .unwrap();
        let claims = accounts.tokens.codec().decode(&rotated.refresh_token).unwrap();
        assert!(claims.exp <= exp);
    }

    #[tokio::test]
    async fn test_rotation_prunes_expired_rotated_entries() {
        let (accounts, first) = signed_up().await;
        let user_id = first.user.id.clone();
        let exp = accounts.tokens.codec().decode(&first.refresh_token).unwrap().exp;

        // Rotated a minute before expiry: recent `when`, same expiry
        let rotated_at = DateTime::from_timestamp(exp - 60, 0).unwrap();
        let rotated = accounts
            .refresh_token_at(&first.access_token, &first.refresh_token, rotated_at)
            .await
            .unwrap();

        // Another device signs in at the same moment and outlives it
        let mut session = accounts.users.db().begin().await.unwrap();
        let other = accounts
            .record_session_at(
                &mut accounts.users.in_session(session.as_mut()),
                &user_id,
                &first.user,
                rotated_at,
            )
            .await
            .unwrap();
        session.commit().await.unwrap();

        let user = accounts.users().find_one(&Filter::by_id(&user_id)).await.unwrap().unwrap();
        let stored: Vec<_> = user.refresh_tokens().to_vec();
        assert_eq!(stored.len(), 2);
        assert_eq!(stored[0].token, sha256_hex(&rotated.refresh_token));
        assert_eq!(stored[0].expires.timestamp(), exp);

        let an_hour_after_expiry = DateTime::from_timestamp(exp + 3600, 0).unwrap();
        let renewed = accounts
            .refresh_token_at(&other.access_token, &other.refresh_token, an_hour_after_expiry)
            .await
            .unwrap();

        let user = accounts.users().find_one(&Filter::by_id(&user_id)).await.unwrap().unwrap();
        let hashes: Vec<_> = user.refresh_tokens().iter().map(|entry| entry.token.clone()).collect();
        assert_eq!(hashes, vec![sha256_hex(&renewed.refresh_token)]);
    }

    #[test]
    fn test_credentials_from_json() {
        let plain: Credentials =
            serde_json::from_str(r#"{"identity": "jane@example.com", "password": "hunter2"}"#).unwrap();
        assert_eq!(plain.password, PasswordInput::from("hunter2"));

        let hashed: Credentials = serde_json::from_str(
            r#"{"identity": "jane", "password": {"algorithm": "sha-256", "digest": "abc"}}"#,
        )
        .unwrap();
        assert!(matches!(hashed.password, PasswordInput::Hashed { .. }));
    }
}
