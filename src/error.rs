use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;

/// ServiceError
///
/// Every failure the policy layer can surface. These are policy decisions, not
/// transient faults: none of them is retried or recovered locally.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// No principal in the context. Raised before the store is touched, so it
    /// never reveals whether the target exists.
    #[error("authentication required")]
    Unauthenticated,

    #[error("access denied: {operation}")]
    AccessDenied { operation: &'static str },

    #[error("{entity} not found: {key}")]
    NotFound { entity: &'static str, key: String },

    #[error("validation failed: {message}")]
    ValidationFailed { message: String },

    #[error("bad credentials")]
    AuthenticationFailed,

    /// The backing store could not answer. Must never be read as `NotFound`.
    #[error("user store unavailable: {0}")]
    StoreUnavailable(String),

    /// A server-side fault unrelated to the caller's input, such as a
    /// password hasher that cannot run.
    #[error("internal error: {0}")]
    Internal(String),
}

impl ServiceError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::ValidationFailed {
            message: message.into(),
        }
    }

    pub fn user_not_found(key: impl ToString) -> Self {
        Self::NotFound {
            entity: "user",
            key: key.to_string(),
        }
    }
}

pub type ServiceResult<T> = Result<T, ServiceError>;

/// StoreError
///
/// Failures reported by a `UserStore` implementation.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("email already registered: {0}")]
    DuplicateEmail(String),

    #[error("no user with id {0}")]
    Missing(i64),
}

impl From<StoreError> for ServiceError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Unavailable(reason) => ServiceError::StoreUnavailable(reason),
            StoreError::DuplicateEmail(email) => {
                ServiceError::validation(format!("email already registered: {email}"))
            }
            StoreError::Missing(id) => ServiceError::user_not_found(id),
        }
    }
}

/// ErrorResponse
///
/// JSON body returned alongside every non-2xx status produced by a `ServiceError`.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let (status, error_type) = match &self {
            ServiceError::Unauthenticated => (StatusCode::UNAUTHORIZED, "UNAUTHENTICATED"),
            ServiceError::AccessDenied { .. } => (StatusCode::FORBIDDEN, "ACCESS_DENIED"),
            ServiceError::NotFound { .. } => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            ServiceError::ValidationFailed { .. } => (StatusCode::BAD_REQUEST, "VALIDATION_FAILED"),
            ServiceError::AuthenticationFailed => {
                (StatusCode::UNAUTHORIZED, "AUTHENTICATION_FAILED")
            }
            ServiceError::StoreUnavailable(_) => {
                (StatusCode::SERVICE_UNAVAILABLE, "STORE_UNAVAILABLE")
            }
            ServiceError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
        };

        if status.is_server_error() {
            tracing::error!("request failed: {}", self);
        }

        let body = ErrorResponse {
            error: error_type.to_string(),
            message: self.to_string(),
        };

        (status, Json(body)).into_response()
    }
}
