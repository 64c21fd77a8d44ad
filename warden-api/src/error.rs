/// Error handling for the API server
///
/// Every failure leaves the server as `{"message": "..."}` with the status
/// code of the account service error it came from. Handlers return
/// `ApiResult<T>` and propagate service errors with `?`.
///
/// # Example
///
/// ```
/// use warden_api::error::ApiResult;
/// use warden_shared::error::Error;
/// use axum::Json;
/// use serde_json::{json, Value};
///
/// async fn handler() -> ApiResult<Json<Value>> {
///     let email: Option<&str> = None;
///     let email = email.ok_or_else(|| Error::user_input("Email must be provided."))?;
///     Ok(Json(json!({ "email": email })))
/// }
/// ```

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use warden_shared::error::Error;

/// API result type alias
pub type ApiResult<T> = Result<T, ApiError>;

/// Unified API error type
#[derive(Debug)]
pub enum ApiError {
    /// Account service error, carries its own status code
    Service(Error),

    /// Request body failed shape validation (422)
    ValidationError(Vec<ValidationErrorDetail>),

    /// Route exists but not for this method (405)
    MethodNotAllowed,
}

/// Validation error detail
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationErrorDetail {
    /// Field that failed validation
    pub field: String,

    /// Error message
    pub message: String,
}

/// Error response format
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Human-readable error message
    pub message: String,

    /// Optional validation errors
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Vec<ValidationErrorDetail>>,
}

impl ApiError {
    pub fn not_found() -> Self {
        ApiError::Service(Error::not_found("Not Found"))
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Service(err) => {
                StatusCode::from_u16(err.code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
            }
            ApiError::ValidationError(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
        }
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ApiError::Service(err) => write!(f, "{}", err),
            ApiError::ValidationError(errors) => {
                write!(f, "Validation failed: {} errors", errors.len())
            }
            ApiError::MethodNotAllowed => write!(f, "Method Not Allowed"),
        }
    }
}

impl std::error::Error for ApiError {}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();

        let (message, details) = match self {
            ApiError::Service(err) => {
                if let Error::Internal(detail) = &err {
                    // Log internal errors but don't expose details to clients
                    tracing::error!("Internal error: {}", detail);
                }
                (err.message().to_string(), None)
            }
            ApiError::ValidationError(errors) => {
                let message = errors
                    .first()
                    .map(|error| error.message.clone())
                    .unwrap_or_else(|| "Request validation failed".to_string());
                (message, Some(errors))
            }
            ApiError::MethodNotAllowed => ("Method Not Allowed".to_string(), None),
        };

        (status, Json(ErrorResponse { message, details })).into_response()
    }
}

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        ApiError::Service(err)
    }
}

/// Convert validator errors to API errors
impl From<validator::ValidationErrors> for ApiError {
    fn from(errors: validator::ValidationErrors) -> Self {
        let mut details: Vec<ValidationErrorDetail> = errors
            .field_errors()
            .iter()
            .flat_map(|(field, errors)| {
                errors.iter().map(move |error| ValidationErrorDetail {
                    field: field.to_string(),
                    message: error
                        .message
                        .as_ref()
                        .map(|m| m.to_string())
                        .unwrap_or_else(|| "Validation failed".to_string()),
                })
            })
            .collect();
        details.sort_by(|a, b| a.field.cmp(&b.field));
        ApiError::ValidationError(details)
    }
}
