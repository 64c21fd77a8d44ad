/// User document and its public projection
///
/// Users are stored as one document each in the users collection. Secrets
/// (password hashes, reset and verification tokens, refresh token hashes)
/// live under `services` and `emails[]`; none of them ever leave the
/// service: callers only see [`PublicUser`].
///
/// # Document
///
/// ```json
/// {
///   "_id": "usr_x8Kq2...",
///   "name": "Jane",
///   "username": "Jane-Doe",
///   "handle": "janedoe",
///   "emails": [{ "address": "jane@example.com", "verified": true }],
///   "roles": ["admin"],
///   "services": {
///     "password": { "argon": "$argon2id$...", "reset": { "token": "<sha256>", "email": "jane@example.com", "reason": "reset", "when": 1700000000000 } },
///     "resume": { "refreshTokens": [{ "token": "<sha256>", "when": 1700000000000, "expires": 1702592000000 }] }
///   },
///   "createdAt": 1700000000000,
///   "updatedAt": 1700000000000
/// }
/// ```
///
/// Timestamps are Unix milliseconds so that range filters compare numbers in
/// every store backend.
///
/// # Indexes
///
/// - `unique-handle`: `handle`, unique, sparse
/// - `unique-email-address`: `emails.address`, unique across documents, sparse

use crate::auth::password::StoredPassword;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Document paths used in filters and updates
pub mod fields {
    pub const ID: &str = "_id";
    pub const NAME: &str = "name";
    pub const USERNAME: &str = "username";
    pub const HANDLE: &str = "handle";
    pub const EMAILS: &str = "emails";
    pub const EMAIL_ADDRESS: &str = "emails.address";
    pub const EMAIL_TOKEN: &str = "emails.token";
    pub const EMAIL_VERIFIED: &str = "emails.verified";
    pub const SECOND_EMAIL: &str = "emails.1";
    pub const PASSWORD: &str = "services.password";
    pub const ARGON: &str = "services.password.argon";
    pub const BCRYPT: &str = "services.password.bcrypt";
    pub const RESET: &str = "services.password.reset";
    pub const RESET_TOKEN: &str = "services.password.reset.token";
    pub const RESET_REASON: &str = "services.password.reset.reason";
    pub const RESET_WHEN: &str = "services.password.reset.when";
    pub const REFRESH_TOKENS: &str = "services.resume.refreshTokens";
    pub const REFRESH_TOKEN_HASH: &str = "services.resume.refreshTokens.token";
    pub const UPDATED_AT: &str = "updatedAt";
}

/// Stored user record
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserDocument {
    /// Primary key, prefixed `usr_` by default
    #[serde(rename = "_id", default)]
    pub id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Username as the user typed it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,

    /// Normalized username, the uniqueness and login key
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub handle: Option<String>,

    #[serde(default)]
    pub emails: Vec<EmailRecord>,

    #[serde(default)]
    pub roles: Vec<String>,

    #[serde(default)]
    pub services: Services,

    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,

    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub updated_at: DateTime<Utc>,
}

impl UserDocument {
    /// First registered address, the one embedded in tokens
    pub fn primary_email(&self) -> Option<&str> {
        self.emails.first().map(|email| email.address.as_str())
    }

    pub fn stored_password(&self) -> StoredPassword<'_> {
        match &self.services.password {
            Some(password) => StoredPassword {
                argon: password.argon.as_deref(),
                bcrypt: password.bcrypt.as_deref(),
            },
            None => StoredPassword::default(),
        }
    }

    /// Hashes of the currently valid refresh tokens, oldest first
    pub fn refresh_tokens(&self) -> &[RefreshTokenEntry] {
        self.services
            .resume
            .as_ref()
            .map(|resume| resume.refresh_tokens.as_slice())
            .unwrap_or_default()
    }
}

/// One address of a user
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EmailRecord {
    /// Lowercased address, unique across all users
    pub address: String,

    pub verified: bool,

    /// SHA-256 of the pending verification token
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,

    /// SHA-256 of the pending verification short code
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub digits: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Services {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<PasswordService>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resume: Option<ResumeService>,
}

/// Password hashes and the pending reset, if any
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PasswordService {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub argon: Option<String>,

    /// Legacy hash, removed on the next password change
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bcrypt: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reset: Option<ResetToken>,
}

/// Why a reset token was issued
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResetReason {
    Reset,
    Enroll,
}

impl ResetReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResetReason::Reset => "reset",
            ResetReason::Enroll => "enroll",
        }
    }
}

/// Pending password reset or enrollment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResetToken {
    /// SHA-256 of the token sent by mail
    pub token: String,
    pub email: String,
    pub reason: ResetReason,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub when: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResumeService {
    #[serde(default)]
    pub refresh_tokens: Vec<RefreshTokenEntry>,
}

/// One active session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RefreshTokenEntry {
    /// SHA-256 of the refresh token
    pub token: String,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub when: DateTime<Utc>,
    /// Expiry of the refresh token; rotation keeps the original one
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub expires: DateTime<Utc>,
}

/// Caller-safe projection of a user
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PublicUser {
    #[serde(rename = "_id")]
    pub id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(default)]
    pub roles: Vec<String>,
}

impl From<&UserDocument> for PublicUser {
    fn from(doc: &UserDocument) -> Self {
        Self {
            id: doc.id.clone(),
            username: doc.username.clone(),
            email: doc.primary_email().map(str::to_string),
            name: doc.name.clone(),
            roles: doc.roles.iter().filter(|role| !role.is_empty()).cloned().collect(),
        }
    }
}

/// A freshly issued session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthTokenResult {
    pub user: PublicUser,
    pub access_token: String,
    pub refresh_token: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> UserDocument {
        UserDocument {
            id: "usr_1".to_string(),
            username: Some("Jane-Doe".to_string()),
            handle: Some("janedoe".to_string()),
            emails: vec![EmailRecord {
                address: "jane@example.com".to_string(),
                verified: false,
                token: Some("hashed".to_string()),
                digits: None,
            }],
            roles: vec!["".to_string(), "admin".to_string()],
            services: Services {
                password: Some(PasswordService {
                    argon: Some("$argon2id$x".to_string()),
                    ..Default::default()
                }),
                resume: None,
            },
            ..Default::default()
        }
    }

    #[test]
    fn test_public_projection_strips_internals() {
        let public = PublicUser::from(&sample());
        assert_eq!(public.email.as_deref(), Some("jane@example.com"));
        assert_eq!(public.roles, vec!["admin".to_string()]);

        let value = serde_json::to_value(&public).unwrap();
        assert_eq!(
            value,
            json!({"_id": "usr_1", "username": "Jane-Doe", "email": "jane@example.com", "roles": ["admin"]})
        );
    }

    #[test]
    fn test_absent_fields_are_not_serialized() {
        let user = UserDocument {
            id: "usr_2".to_string(),
            ..Default::default()
        };
        let value = serde_json::to_value(&user).unwrap();

        // sparse indexes rely on missing keys rather than nulls
        assert!(value.get("handle").is_none());
        assert!(value.get("name").is_none());
        assert_eq!(value["services"], json!({}));
        assert_eq!(value["createdAt"], json!(0));
    }

    #[test]
    fn test_document_round_trip() {
        let user = sample();
        let value = serde_json::to_value(&user).unwrap();
        assert_eq!(value["services"]["password"]["argon"], "$argon2id$x");

        let back: UserDocument = serde_json::from_value(value).unwrap();
        assert_eq!(back, user);
        assert_eq!(back.stored_password().argon, Some("$argon2id$x"));
        assert!(back.refresh_tokens().is_empty());
    }

    #[test]
    fn test_reset_reason_serialization() {
        assert_eq!(serde_json::to_value(ResetReason::Enroll).unwrap(), json!("enroll"));
        assert_eq!(ResetReason::Reset.as_str(), "reset");
    }
}
