//! Password reset and enrollment tokens
//!
//! Both kinds live in `services.password.reset`; issuing a new one replaces
//! the previous token. Only the SHA-256 of the token is stored.

use super::validation::{is_valid_email, normalize_email};
use super::{to_value, Accounts, IssuedToken};
use crate::auth::password::{sha256_hex, PasswordInput};
use crate::db::query::{Filter, Update};
use crate::error::{Error, Result};
use crate::id::{random_string, TOKEN_LENGTH};
use crate::models::user::{fields, AuthTokenResult, PublicUser, ResetReason, ResetToken};
use chrono::{Duration, Utc};
use tracing::info;

impl Accounts {
    /// Issues a password reset token for the user owning `email`
    pub async fn create_password_reset_token(&self, email: &str) -> Result<IssuedToken> {
        self.create_reset_token(email, ResetReason::Reset).await
    }

    /// Issues the token that completes an invitation
    pub async fn create_enrollment_token(&self, email: &str) -> Result<IssuedToken> {
        self.create_reset_token(email, ResetReason::Enroll).await
    }

    async fn create_reset_token(&self, email: &str, reason: ResetReason) -> Result<IssuedToken> {
        let email = normalize_email(email);
        if !is_valid_email(&email) {
            return Err(Error::user_input("Email is invalid."));
        }

        let token = random_string(TOKEN_LENGTH);
        let now = Utc::now();
        let reset = ResetToken {
            token: sha256_hex(&token),
            email: email.clone(),
            reason,
            when: now,
        };

        let updated = self
            .users
            .update_one(
                &Filter::eq(fields::EMAIL_ADDRESS, email),
                &Update::new().set(fields::RESET, to_value(&reset)?),
            )
            .await?;

        if !updated {
            return Err(Error::user_input("Email is unknown."));
        }

        Ok(IssuedToken {
            token,
            digits: None,
            expires: Some(now + Duration::seconds(self.config.reset_token_expiry_seconds)),
        })
    }

    /// Sets a new password with a reset token and starts a session
    ///
    /// Tokens older than the configured expiry are rejected. The legacy
    /// bcrypt hash is dropped along with the token.
    pub async fn reset_password(&self, token: &str, password: &PasswordInput) -> Result<AuthTokenResult> {
        let token = token.trim();
        if token.is_empty() || password.is_empty() {
            return Err(Error::user_input("Invalid token or password provided."));
        }

        let argon = self.passwords.hash(password).await?;
        let now = Utc::now();
        let oldest = now - Duration::seconds(self.config.reset_token_expiry_seconds);

        let filter = Filter::eq(fields::RESET_TOKEN, sha256_hex(token))
            .and(Filter::gte(fields::RESET_WHEN, oldest.timestamp_millis()));
        let update = Update::new()
            .unset(fields::RESET)
            .unset(fields::BCRYPT)
            .set(fields::ARGON, argon)
            .set(fields::UPDATED_AT, now.timestamp_millis());

        let mut session = self.users.db().begin().await?;
        let mut users = self.users.in_session(session.as_mut());

        let user = users
            .find_one_and_update(&filter, &update)
            .await?
            .ok_or_else(|| Error::user_input("Invalid or expired token provided."))?;

        let tokens = self.record_session(&mut users, &user.id, &PublicUser::from(&user)).await?;
        session.commit().await?;

        info!(user_id = %user.id, "Password reset");
        Ok(tokens)
    }
}
