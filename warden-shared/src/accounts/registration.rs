use super::validation::{is_valid_email, normalize_email, normalize_username};
use super::{duplicate_key, non_blank, Accounts, CreatedUser, Enrollment, NewUser};
use crate::auth::password::sha256_hex;
use crate::db::query::{Filter, Update};
use crate::error::{Error, Result};
use crate::models::user::{
    fields, AuthTokenResult, EmailRecord, PasswordService, PublicUser, ResetReason,
    ResumeService, Services, UserDocument,
};
use chrono::Utc;
use serde_json::json;
use tracing::info;

impl Accounts {
    /// Registers a user
    ///
    /// With a password this is a signup: the user is stored with a first
    /// session and [`CreatedUser::Account`] carries its tokens. Without one
    /// the user is invited by email and no session starts.
    pub async fn create_user(&self, user: NewUser) -> Result<CreatedUser> {
        let email = non_blank(user.email.as_deref()).map(|email| normalize_email(&email));
        let username = non_blank(user.username.as_deref());
        let name = non_blank(user.name.as_deref());
        let password = user.password.filter(|password| !password.is_empty());

        if email.is_none() && username.is_none() {
            return Err(Error::user_input("Either email or username should be provided."));
        }

        if let Some(email) = &email {
            if !is_valid_email(email) {
                return Err(Error::user_input("Email is invalid or already taken."));
            }
        }

        if let Some(username) = &username {
            self.check_username(username)?;
        }

        if email.is_none() && password.is_none() {
            return Err(Error::user_input("Password should be provided if email is not given."));
        }

        let now = Utc::now();
        let mut doc = UserDocument {
            id: self.users.new_id(),
            name,
            username: username.clone(),
            handle: username.as_deref().map(normalize_username),
            emails: email
                .iter()
                .map(|address| EmailRecord {
                    address: address.clone(),
                    ..Default::default()
                })
                .collect(),
            roles: user.roles.into_iter().filter(|role| !role.is_empty()).collect(),
            services: Services::default(),
            created_at: now,
            updated_at: now,
        };

        let tokens = match &password {
            Some(password) => {
                let argon = self.passwords.hash(password).await?;
                let tokens = self.tokens.issue_at(&PublicUser::from(&doc), None, now)?;

                doc.services.password = Some(PasswordService {
                    argon: Some(argon),
                    ..Default::default()
                });
                doc.services.resume = Some(ResumeService {
                    refresh_tokens: vec![self.session_entry(&tokens, now)?],
                });
                Some(tokens)
            }
            None => None,
        };

        let user_id = doc.id.clone();
        self.users
            .insert_one(doc)
            .await
            .map_err(|err| duplicate_key(err, username.as_deref()))?;

        info!(user_id = %user_id, invited = tokens.is_none(), "User created");

        Ok(match tokens {
            Some(tokens) => CreatedUser::Account(tokens),
            None => CreatedUser::Invite {
                user_id,
                email: email.unwrap_or_default(),
            },
        })
    }

    /// Completes an invitation and starts a session
    ///
    /// Consumes the enrollment token, sets the password, verifies the
    /// invited address and optionally sets the name and username.
    pub async fn enroll_user(&self, enrollment: Enrollment) -> Result<AuthTokenResult> {
        let name = non_blank(enrollment.name.as_deref());
        let username = non_blank(enrollment.username.as_deref());

        if enrollment.token.trim().is_empty() {
            return Err(Error::user_input("Token must be provided."));
        }

        if let Some(username) = &username {
            self.check_username(username)?;
        }

        if enrollment.password.is_empty() {
            return Err(Error::user_input("Password must be provided."));
        }

        let argon = self.passwords.hash(&enrollment.password).await?;
        let now = Utc::now();

        let filter = Filter::And(vec![
            Filter::eq(fields::RESET_TOKEN, sha256_hex(enrollment.token.trim())),
            Filter::eq(fields::RESET_REASON, ResetReason::Enroll.as_str()),
            Filter::eq(fields::EMAIL_VERIFIED, false),
        ]);

        let mut update = Update::new()
            .set_element(fields::EMAILS, Filter::eq("verified", false), "verified", true)
            .set(fields::PASSWORD, json!({ "argon": argon }))
            .set(fields::UPDATED_AT, now.timestamp_millis());

        if let Some(name) = name {
            update = update.set(fields::NAME, name);
        }

        if let Some(username) = &username {
            update = update
                .set(fields::USERNAME, username.clone())
                .set(fields::HANDLE, normalize_username(username));
        }

        let mut session = self.users.db().begin().await?;
        let mut users = self.users.in_session(session.as_mut());

        let user = users
            .find_one_and_update(&filter, &update)
            .await
            .map_err(|err| duplicate_key(err, username.as_deref()))?
            .ok_or_else(|| Error::user_input("Invalid token provided."))?;

        let tokens = self.record_session(&mut users, &user.id, &PublicUser::from(&user)).await?;
        session.commit().await?;

        info!(user_id = %user.id, "User enrolled");
        Ok(tokens)
    }
}
