//! Caller-facing error taxonomy
//!
//! Every failure that crosses the service boundary is one of a closed set of
//! variants. Each variant maps to a numeric status code through [`Error::code`],
//! which transport layers use without knowing anything about the domain.
//!
//! | Variant          | Code |
//! |------------------|------|
//! | `UserInput`      | 422  |
//! | `Authentication` | 401  |
//! | `Forbidden`      | 403  |
//! | `NotFound`       | 404  |
//! | `Internal`       | 500  |
//!
//! # Example
//!
//! ```
//! use warden_shared::error::Error;
//!
//! let err = Error::user_input("Email is invalid.");
//! assert_eq!(err.code(), 422);
//! assert_eq!(err.message(), "Email is invalid.");
//! ```

use crate::auth::jwt::TokenError;
use crate::auth::password::PasswordError;
use crate::db::StoreError;

/// Result alias used throughout the service layer
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Closed error enumeration with an associated status code
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// Malformed or rejected input, including bad credentials and tokens
    #[error("{0}")]
    UserInput(String),

    /// Reserved for transport layers that require an authenticated caller
    #[error("{0}")]
    Authentication(String),

    /// Reserved for transport layers that enforce permissions
    #[error("{0}")]
    Forbidden(String),

    /// Unknown resource or route
    #[error("{0}")]
    NotFound(String),

    /// Unexpected failure. The detail is for logs only.
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    pub fn user_input(message: impl Into<String>) -> Self {
        Error::UserInput(message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Error::NotFound(message.into())
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Error::Internal(message.into())
    }

    /// Status code for this error
    pub fn code(&self) -> u16 {
        match self {
            Error::UserInput(_) => 422,
            Error::Authentication(_) => 401,
            Error::Forbidden(_) => 403,
            Error::NotFound(_) => 404,
            Error::Internal(_) => 500,
        }
    }

    /// Message that is safe to show to the caller
    pub fn message(&self) -> &str {
        match self {
            Error::UserInput(msg)
            | Error::Authentication(msg)
            | Error::Forbidden(msg)
            | Error::NotFound(msg) => msg,
            Error::Internal(_) => "An internal error occurred",
        }
    }

    /// Whether this error belongs to the 4xx family
    pub fn is_client_error(&self) -> bool {
        (400..500).contains(&self.code())
    }
}

impl From<StoreError> for Error {
    fn from(err: StoreError) -> Self {
        // Duplicate keys that reach this point were not anticipated by the write site.
        tracing::error!(error = %err, "Document store failure");
        Error::Internal(err.to_string())
    }
}

impl From<PasswordError> for Error {
    fn from(err: PasswordError) -> Self {
        tracing::error!(error = %err, "Password hashing failure");
        Error::Internal(err.to_string())
    }
}

impl From<TokenError> for Error {
    fn from(err: TokenError) -> Self {
        match err {
            TokenError::Encode(detail) => Error::Internal(detail),
            _ => Error::UserInput("Invalid token provided.".to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(Error::user_input("x").code(), 422);
        assert_eq!(Error::Authentication("x".into()).code(), 401);
        assert_eq!(Error::Forbidden("x".into()).code(), 403);
        assert_eq!(Error::not_found("x").code(), 404);
        assert_eq!(Error::internal("x").code(), 500);
    }

    #[test]
    fn test_internal_message_is_opaque() {
        let err = Error::internal("connection refused on 10.0.0.3");
        assert_eq!(err.message(), "An internal error occurred");
        assert!(!err.is_client_error());
    }

    #[test]
    fn test_store_errors_become_internal() {
        let err: Error = StoreError::DuplicateKey {
            index: "unique-handle".into(),
        }
        .into();
        assert_eq!(err.code(), 500);
    }

    #[test]
    fn test_token_errors_become_user_input() {
        let err: Error = TokenError::Expired.into();
        assert_eq!(err, Error::user_input("Invalid token provided."));
    }
}
