/// Authentication endpoints
///
/// Thin handlers over [`warden_shared::accounts::Accounts`]. Tokens travel in
/// JSON bodies; session responses are the service's `AuthTokenResult`:
///
/// ```json
/// {
///   "user": { "_id": "usr_...", "email": "jane@example.com", "roles": [] },
///   "accessToken": "eyJ...",
///   "refreshToken": "eyJ..."
/// }
/// ```
///
/// # Endpoints
///
/// - `POST /auth/login` - Login with email or username
/// - `POST /auth/logout` - Revoke the session of a token pair
/// - `POST /auth/create-account` - Signup, or invite when no password is given
/// - `POST /auth/enroll-account` - Complete an invitation
/// - `POST /auth/reset-password` - Request a reset mail, or reset with a token
/// - `POST /auth/verify-email` - Request a verification mail, or verify with a token
/// - `POST /auth/refresh-token` - Rotate a token pair

use crate::{app::AppState, error::ApiResult, extract::ValidatedJson};
use axum::{extract::State, Json};
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use validator::{Validate, ValidationError};
use warden_shared::{
    accounts::{
        validation::{is_valid_email, normalize_email},
        CreatedUser, Credentials, Enrollment, NewUser,
    },
    auth::password::PasswordInput,
    error::Error,
    models::user::AuthTokenResult,
};

/// Login request
///
/// The identity is taken from `email`, then `username`, then `identity`.
#[derive(Debug, Deserialize, Validate)]
pub struct LoginRequest {
    pub email: Option<String>,

    pub username: Option<String>,

    pub identity: Option<String>,

    /// Plaintext, or `{"algorithm": "sha-256", "digest": "..."}`
    #[serde(default)]
    pub password: PasswordInput,
}

impl LoginRequest {
    fn into_credentials(self) -> Credentials {
        let identity = self.email.or(self.username).or(self.identity).unwrap_or_default();
        Credentials::new(identity, self.password)
    }
}

/// A token pair, as returned by login
#[derive(Debug, Default, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct TokenPairRequest {
    #[serde(default)]
    pub access_token: String,

    #[serde(default)]
    pub refresh_token: String,
}

/// Signup or invite request
#[derive(Debug, Deserialize, Validate)]
pub struct CreateAccountRequest {
    #[validate(custom(function = "validate_email"))]
    pub email: Option<String>,

    #[validate(length(max = 64, message = "Username must be at most 64 characters"))]
    pub username: Option<String>,

    #[validate(length(max = 100, message = "Name must be at most 100 characters"))]
    pub name: Option<String>,

    pub password: Option<PasswordInput>,
}

/// Same address rule as the account service; blank means "no email"
fn validate_email(email: &str) -> Result<(), ValidationError> {
    if email.trim().is_empty() || is_valid_email(&normalize_email(email)) {
        return Ok(());
    }

    let mut error = ValidationError::new("email");
    error.message = Some(Cow::Borrowed("Email is invalid or already taken."));
    Err(error)
}

#[derive(Debug, Deserialize, Validate)]
pub struct EnrollAccountRequest {
    #[serde(default)]
    #[validate(length(min = 1, message = "Token must be provided."))]
    pub token: String,

    #[serde(default)]
    pub password: PasswordInput,

    #[validate(length(max = 100, message = "Name must be at most 100 characters"))]
    pub name: Option<String>,

    #[validate(length(max = 64, message = "Username must be at most 64 characters"))]
    pub username: Option<String>,
}

/// Reset password request
///
/// With a `token` the password is reset; otherwise a reset mail is sent to
/// `email`.
#[derive(Debug, Deserialize, Validate)]
pub struct ResetPasswordRequest {
    pub token: Option<String>,

    pub password: Option<PasswordInput>,

    #[validate(email(message = "Email is invalid."))]
    pub email: Option<String>,
}

/// Verify email request
///
/// With a `token` the address is verified; otherwise a verification mail is
/// sent to `email`.
#[derive(Debug, Deserialize, Validate)]
pub struct VerifyEmailRequest {
    pub token: Option<String>,

    #[validate(email(message = "Email is invalid."))]
    pub email: Option<String>,
}

/// Acknowledgement for requests that start an out-of-band flow
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct OkResponse {
    pub ok: bool,
}

impl OkResponse {
    fn ok() -> Json<Self> {
        Json(Self { ok: true })
    }
}

/// Answer of the endpoints that either start a session or send a mail
#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum AuthResponse {
    Session(AuthTokenResult),
    Sent(OkResponse),
}

impl AuthResponse {
    fn sent() -> Json<Self> {
        Json(AuthResponse::Sent(OkResponse { ok: true }))
    }
}

fn present(value: Option<String>) -> Option<String> {
    value.filter(|value| !value.trim().is_empty())
}

fn required_email(email: Option<String>) -> Result<String, Error> {
    present(email).ok_or_else(|| Error::user_input("Email must be provided."))
}

/// Login endpoint
///
/// # Errors
///
/// - `422 Unprocessable Entity`: "Incorrect credentials provided." for any
///   unknown identity or wrong password
pub async fn login(
    State(state): State<AppState>,
    ValidatedJson(req): ValidatedJson<LoginRequest>,
) -> ApiResult<Json<AuthTokenResult>> {
    let tokens = state.accounts.login(req.into_credentials()).await?;
    Ok(Json(tokens))
}

/// Logout endpoint
///
/// Revokes the session when both tokens are given; answers `{"ok": true}`.
pub async fn logout(
    State(state): State<AppState>,
    ValidatedJson(req): ValidatedJson<TokenPairRequest>,
) -> ApiResult<Json<OkResponse>> {
    if !req.access_token.is_empty() && !req.refresh_token.is_empty() {
        state
            .accounts
            .revoke_token(&req.access_token, &req.refresh_token)
            .await?;
    }

    Ok(OkResponse::ok())
}

/// Signup endpoint
///
/// With a password the account is created, a verification mail is sent and
/// the session tokens are returned. Without one the user is invited by mail
/// and the answer is `{"ok": true}`.
pub async fn create_account(
    State(state): State<AppState>,
    ValidatedJson(req): ValidatedJson<CreateAccountRequest>,
) -> ApiResult<Json<AuthResponse>> {
    let created = state
        .accounts
        .create_user(NewUser {
            email: req.email,
            username: req.username,
            name: req.name,
            password: req.password,
            roles: Vec::new(),
        })
        .await?;

    match created {
        CreatedUser::Account(tokens) => {
            if let Some(email) = tokens.user.email.as_deref() {
                state.accounts.send_verification_email(email).await?;
            }
            Ok(Json(AuthResponse::Session(tokens)))
        }
        CreatedUser::Invite { email, .. } => {
            state.accounts.send_enrollment_email(&email).await?;
            Ok(AuthResponse::sent())
        }
    }
}

/// Enrollment endpoint, completes an invitation and starts a session
pub async fn enroll_account(
    State(state): State<AppState>,
    ValidatedJson(req): ValidatedJson<EnrollAccountRequest>,
) -> ApiResult<Json<AuthTokenResult>> {
    let tokens = state
        .accounts
        .enroll_user(Enrollment {
            token: req.token,
            password: req.password,
            name: req.name,
            username: req.username,
        })
        .await?;

    Ok(Json(tokens))
}

/// Reset password endpoint (dual-purpose)
pub async fn reset_password(
    State(state): State<AppState>,
    ValidatedJson(req): ValidatedJson<ResetPasswordRequest>,
) -> ApiResult<Json<AuthResponse>> {
    if let Some(token) = present(req.token) {
        let password = req.password.unwrap_or_default();
        let tokens = state.accounts.reset_password(&token, &password).await?;
        return Ok(Json(AuthResponse::Session(tokens)));
    }

    let email = required_email(req.email)?;
    state.accounts.send_reset_password_email(&email).await?;
    Ok(AuthResponse::sent())
}

/// Verify email endpoint (dual-purpose)
pub async fn verify_email(
    State(state): State<AppState>,
    ValidatedJson(req): ValidatedJson<VerifyEmailRequest>,
) -> ApiResult<Json<AuthResponse>> {
    if let Some(token) = present(req.token) {
        let tokens = state.accounts.verify_email(&token).await?;
        return Ok(Json(AuthResponse::Session(tokens)));
    }

    let email = required_email(req.email)?;
    state.accounts.send_verification_email(&email).await?;
    Ok(AuthResponse::sent())
}

/// Token refresh endpoint
///
/// # Errors
///
/// - `422 Unprocessable Entity`: "Incorrect token provided." when the pair
///   is invalid, mismatched, revoked or about to expire
pub async fn refresh_token(
    State(state): State<AppState>,
    ValidatedJson(req): ValidatedJson<TokenPairRequest>,
) -> ApiResult<Json<AuthTokenResult>> {
    let tokens = state
        .accounts
        .refresh_token(&req.access_token, &req.refresh_token)
        .await?;

    Ok(Json(tokens))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_login_identity_precedence() {
        let req: LoginRequest =
            serde_json::from_value(serde_json::json!({"username": "jane", "password": "hunter2"})).unwrap();
        let credentials = req.into_credentials();
        assert_eq!(credentials.identity, "jane");
        assert_eq!(credentials.password, PasswordInput::from("hunter2"));

        let req: LoginRequest = serde_json::from_value(serde_json::json!({
            "email": "jane@example.com",
            "username": "jane",
            "password": {"algorithm": "sha-256", "digest": "abc"}
        }))
        .unwrap();
        assert_eq!(req.into_credentials().identity, "jane@example.com");
    }

    #[test]
    fn test_create_account_validation() {
        let req = CreateAccountRequest {
            email: Some("not-an-email".to_string()),
            username: None,
            name: None,
            password: None,
        };
        assert!(req.validate().is_err());

        let req = CreateAccountRequest {
            email: Some("jane@example.com".to_string()),
            username: Some("jane".to_string()),
            name: Some("Jane".to_string()),
            password: Some(PasswordInput::from("hunter2")),
        };
        assert!(req.validate().is_ok());
    }

    #[test]
    fn test_create_account_email_rule_matches_the_service() {
        for email in ["a(b)@example.com", "Jane+tag@Example.COM", " jane@example.com "] {
            let req = CreateAccountRequest {
                email: Some(email.to_string()),
                username: None,
                name: None,
                password: None,
            };
            assert!(req.validate().is_ok(), "{}", email);
        }

        for email in ["jane@localhost", "jane@.com", "ja ne@example.com", "@example.com"] {
            let err = validate_email(email).unwrap_err();
            assert_eq!(err.message.as_deref(), Some("Email is invalid or already taken."));
        }
    }

    #[test]
    fn test_enroll_requires_token() {
        let req = EnrollAccountRequest {
            token: String::new(),
            password: PasswordInput::from("hunter2"),
            name: None,
            username: None,
        };
        assert!(req.validate().is_err());
    }

    #[test]
    fn test_required_email() {
        assert_eq!(required_email(Some(" ".to_string())).unwrap_err().message(), "Email must be provided.");
        assert_eq!(required_email(Some("a@b.co".to_string())).unwrap(), "a@b.co");
    }
}
