use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

use crate::auth::repo::StoreError;

pub const LOGIN_FAILED: &str = "authorization failed";
pub const DUPLICATE_ACCOUNT: &str = "username or email already exists";
pub const INVALID_RESET_TOKEN: &str = "invalid or expired reset token";
pub const INVALID_REQUEST_DATA: &str = "invalid request data";

/// Every failure that may cross the service boundary towards a client.
///
/// Variants carry only caller-safe text. Underlying driver, hashing or mail
/// errors travel in [`AppError::Internal`] and are logged, never rendered.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// Bad input shape or a policy violation.
    #[error("{0}")]
    Validation(String),

    /// Login failed; deliberately identical for unknown user and wrong password.
    #[error("{}", LOGIN_FAILED)]
    AuthorizationFailed,

    /// Missing or unusable session credentials on a protected route.
    #[error("{0}")]
    Unauthenticated(&'static str),

    #[error("admin access required")]
    Forbidden,

    /// Registration collided on username or email; which one is never said.
    #[error("{}", DUPLICATE_ACCOUNT)]
    Conflict,

    #[error("{0}")]
    NotFound(&'static str),

    #[error("too many requests, please try again later")]
    RateLimited,

    #[error("internal error: {0:#}")]
    Internal(#[from] anyhow::Error),
}

pub type AppResult<T> = Result<T, AppError>;

impl AppError {
    pub fn validation(msg: impl Into<String>) -> Self {
        AppError::Validation(msg.into())
    }

    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::AuthorizationFailed | AppError::Unauthenticated(_) => {
                StatusCode::UNAUTHORIZED
            }
            AppError::Forbidden => StatusCode::FORBIDDEN,
            AppError::Conflict => StatusCode::CONFLICT,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            AppError::Validation(_) => "VALIDATION_ERROR",
            AppError::AuthorizationFailed => "AUTH_ERROR",
            AppError::Unauthenticated(_) => "UNAUTHORIZED",
            AppError::Forbidden => "FORBIDDEN",
            AppError::Conflict => "CONFLICT",
            AppError::NotFound(_) => "NOT_FOUND",
            AppError::RateLimited => "RATE_LIMIT",
            AppError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Text shown to the client.
    pub fn public_message(&self) -> String {
        match self {
            AppError::Internal(_) => "an internal error occurred".to_string(),
            other => other.to_string(),
        }
    }
}

impl From<StoreError> for AppError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Duplicate => AppError::Conflict,
            StoreError::NotFound => AppError::NotFound("user not found"),
            StoreError::Database(e) => AppError::Internal(anyhow::Error::new(e)),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        if let AppError::Internal(err) = &self {
            tracing::error!(error = ?err, "internal error");
        }
        let status = self.status();
        let body = json!({
            "error": true,
            "code": self.code(),
            "message": self.public_message(),
        });
        (status, axum::Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn internal_error_hides_details() {
        let err = AppError::Internal(anyhow::anyhow!(
            "duplicate key value violates users_email_key"
        ));
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.public_message(), "an internal error occurred");
        assert!(!err.public_message().contains("users_email_key"));
    }

    #[test]
    fn conflict_message_does_not_name_field() {
        let err = AppError::Conflict;
        assert_eq!(err.status(), StatusCode::CONFLICT);
        assert_eq!(err.public_message(), DUPLICATE_ACCOUNT);
    }

    #[test]
    fn login_failure_message_is_generic() {
        assert_eq!(AppError::AuthorizationFailed.public_message(), LOGIN_FAILED);
        assert_eq!(AppError::AuthorizationFailed.status(), StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn store_errors_map_onto_taxonomy() {
        assert!(matches!(AppError::from(StoreError::Duplicate), AppError::Conflict));
        assert!(matches!(
            AppError::from(StoreError::NotFound),
            AppError::NotFound("user not found")
        ));
        let db = AppError::from(StoreError::Database(sqlx::Error::PoolTimedOut));
        assert_eq!(db.code(), "INTERNAL_ERROR");
    }

    #[test]
    fn status_codes_follow_taxonomy() {
        assert_eq!(AppError::validation("x").status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            AppError::Unauthenticated("invalid or expired token").status(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(AppError::Forbidden.status(), StatusCode::FORBIDDEN);
        assert_eq!(AppError::NotFound("user not found").status(), StatusCode::NOT_FOUND);
        assert_eq!(AppError::RateLimited.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(AppError::RateLimited.code(), "RATE_LIMIT");
    }
}
