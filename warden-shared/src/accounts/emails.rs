use super::validation::{is_valid_email, normalize_email};
use super::{duplicate_key, Accounts, IssuedToken};
use crate::auth::password::sha256_hex;
use crate::db::query::{Filter, Update};
use crate::error::{Error, Result};
use crate::id::{random_digits, random_string, TOKEN_LENGTH};
use crate::models::user::{fields, AuthTokenResult, PublicUser};
use chrono::Utc;
use serde_json::json;
use tracing::info;

const VERIFICATION_DIGITS: usize = 6;

impl Accounts {
    /// Adds an address to a user
    pub async fn add_email(&self, user_id: &str, email: &str, verified: bool) -> Result<()> {
        let email = normalize_email(email);
        if !is_valid_email(&email) {
            return Err(Error::user_input("Email is invalid or already taken."));
        }

        let filter = Filter::by_id(user_id).and(Filter::ne(fields::EMAIL_ADDRESS, email.clone()));
        let update = Update::new()
            .push(fields::EMAILS, json!({ "address": email, "verified": verified }))
            .set(fields::UPDATED_AT, Utc::now().timestamp_millis());

        let updated = self
            .users
            .update_one(&filter, &update)
            .await
            .map_err(|err| duplicate_key(err, None))?;

        if !updated {
            return Err(Error::user_input("Incorrect userId provided or email already taken."));
        }

        info!(user_id, "Email added");
        Ok(())
    }

    /// Removes an address, as long as the user keeps a way to log in
    pub async fn remove_email(&self, user_id: &str, email: &str) -> Result<()> {
        let email = normalize_email(email);
        if !is_valid_email(&email) {
            return Err(Error::user_input("Email is invalid."));
        }

        let filter = Filter::And(vec![
            Filter::by_id(user_id),
            Filter::eq(fields::EMAIL_ADDRESS, email.clone()),
            Filter::Or(vec![Filter::exists(fields::SECOND_EMAIL), Filter::exists(fields::USERNAME)]),
        ]);
        let update = Update::new()
            .pull(fields::EMAILS, Filter::eq("address", email))
            .set(fields::UPDATED_AT, Utc::now().timestamp_millis());

        if !self.users.update_one(&filter, &update).await? {
            return Err(Error::user_input("Incorrect userId provided or email is unknown."));
        }

        info!(user_id, "Email removed");
        Ok(())
    }

    /// Issues a verification token and short code for `email`
    ///
    /// Replaces any pending verification of the same address.
    pub async fn create_email_verification_token(&self, email: &str) -> Result<IssuedToken> {
        let email = normalize_email(email);
        if !is_valid_email(&email) {
            return Err(Error::user_input("Email is invalid."));
        }

        let token = random_string(TOKEN_LENGTH);
        let digits = random_digits(VERIFICATION_DIGITS);
        let element = Filter::eq("address", email.clone());

        let update = Update::new()
            .set_element(fields::EMAILS, element.clone(), "token", sha256_hex(&token))
            .set_element(fields::EMAILS, element, "digits", sha256_hex(&digits));

        if !self
            .users
            .update_one(&Filter::eq(fields::EMAIL_ADDRESS, email), &update)
            .await?
        {
            return Err(Error::user_input("Email is unknown."));
        }

        Ok(IssuedToken {
            token,
            digits: Some(digits),
            expires: None,
        })
    }

    /// Marks the address holding `token` verified and starts a session
    pub async fn verify_email(&self, token: &str) -> Result<AuthTokenResult> {
        let token = token.trim();
        if token.is_empty() {
            return Err(Error::user_input("Invalid token provided."));
        }

        let hashed = sha256_hex(token);
        let element = Filter::eq("token", hashed.clone());
        let update = Update::new()
            .set_element(fields::EMAILS, element.clone(), "verified", true)
            .unset_element(fields::EMAILS, element.clone(), "digits")
            .unset_element(fields::EMAILS, element, "token")
            .set(fields::UPDATED_AT, Utc::now().timestamp_millis());

        let mut session = self.users.db().begin().await?;
        let mut users = self.users.in_session(session.as_mut());

        let user = users
            .find_one_and_update(&Filter::eq(fields::EMAIL_TOKEN, hashed), &update)
            .await?
            .ok_or_else(|| Error::user_input("Invalid or expired token provided."))?;

        let tokens = self.record_session(&mut users, &user.id, &PublicUser::from(&user)).await?;
        session.commit().await?;

        info!(user_id = %user.id, "Email verified");
        Ok(tokens)
    }
}
