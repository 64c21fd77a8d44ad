use super::validation::normalize_username;
use super::{duplicate_key, Accounts};
use crate::db::query::{Filter, Update};
use crate::error::{Error, Result};
use crate::models::user::fields;
use chrono::Utc;
use tracing::info;

impl Accounts {
    /// Sets or changes the username and its handle
    pub async fn set_username(&self, user_id: &str, username: &str) -> Result<()> {
        let username = username.trim();
        self.check_username(username)?;

        let update = Update::new()
            .set(fields::USERNAME, username)
            .set(fields::HANDLE, normalize_username(username))
            .set(fields::UPDATED_AT, Utc::now().timestamp_millis());

        let updated = self
            .users
            .update_one(&Filter::by_id(user_id), &update)
            .await
            .map_err(|err| duplicate_key(err, Some(username)))?;

        if !updated {
            return Err(Error::user_input("Incorrect userId provided."));
        }

        info!(user_id, handle = %normalize_username(username), "Username set");
        Ok(())
    }
}
