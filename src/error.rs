/// Unified error types for the Agrigate API
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

/// Main error type for the service
#[derive(Error, Debug)]
pub enum ApiError {
    /// Database errors
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed input with a single message
    #[error("{0}")]
    Validation(String),

    /// Malformed input with per-field detail
    #[error("Validation failed")]
    FieldValidation(Vec<FieldError>),

    #[error("An account with this email already exists")]
    EmailExists,

    #[error("This username is already taken")]
    UsernameExists,

    /// Sign-in mismatch. Deliberately identical for unknown email and
    /// wrong password.
    #[error("Invalid email or password")]
    InvalidCredentials,

    #[error("Access token is required")]
    NoAccessToken,

    #[error("Invalid access token")]
    InvalidAccessToken,

    #[error("Access token has expired")]
    AccessTokenExpired,

    #[error("Refresh token is required")]
    NoRefreshToken,

    /// Covers malformed, revoked, and already-rotated refresh tokens.
    #[error("Invalid refresh token")]
    InvalidRefreshToken,

    #[error("Refresh token has expired")]
    RefreshTokenExpired,

    #[error("User not found")]
    UserNotFound,

    #[error("{0}")]
    InsufficientPermissions(String),

    #[error("{0}")]
    InsufficientSubscription(String),

    #[error("Subscription has expired")]
    SubscriptionExpired,

    /// Monthly quota ceiling reached for the named category
    #[error("Monthly limit reached for {0}")]
    ApiLimitExceeded(String),

    #[error("Email verification is required for this feature")]
    EmailVerificationRequired,

    #[error("Current password is incorrect")]
    InvalidCurrentPassword,

    #[error("Invalid or expired reset token")]
    InvalidResetToken,

    #[error("Invalid or expired verification token")]
    InvalidVerificationToken,

    #[error("Password confirmation is required")]
    PasswordRequired,

    #[error("Incorrect password")]
    InvalidPassword,

    /// Upstream advisory service failures (prediction, weather, chat)
    #[error("Upstream service error: {0}")]
    Upstream(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Per-field validation failure detail
#[derive(Debug, Clone, Serialize)]
pub struct FieldError {
    pub field: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<serde_json::Value>,
}

impl ApiError {
    /// Stable machine-readable code exposed in the error envelope
    pub fn error_code(&self) -> &'static str {
        match self {
            ApiError::Validation(_) | ApiError::FieldValidation(_) => "VALIDATION_ERROR",
            ApiError::EmailExists => "EMAIL_EXISTS",
            ApiError::UsernameExists => "USERNAME_EXISTS",
            ApiError::InvalidCredentials => "INVALID_CREDENTIALS",
            ApiError::NoAccessToken => "NO_ACCESS_TOKEN",
            ApiError::InvalidAccessToken => "INVALID_ACCESS_TOKEN",
            ApiError::AccessTokenExpired => "ACCESS_TOKEN_EXPIRED",
            ApiError::NoRefreshToken => "NO_REFRESH_TOKEN",
            ApiError::InvalidRefreshToken => "INVALID_REFRESH_TOKEN",
            ApiError::RefreshTokenExpired => "REFRESH_TOKEN_EXPIRED",
            ApiError::UserNotFound => "USER_NOT_FOUND",
            ApiError::InsufficientPermissions(_) => "INSUFFICIENT_PERMISSIONS",
            ApiError::InsufficientSubscription(_) => "INSUFFICIENT_SUBSCRIPTION",
            ApiError::SubscriptionExpired => "SUBSCRIPTION_EXPIRED",
            ApiError::ApiLimitExceeded(_) => "API_LIMIT_EXCEEDED",
            ApiError::EmailVerificationRequired => "EMAIL_VERIFICATION_REQUIRED",
            ApiError::InvalidCurrentPassword => "INVALID_CURRENT_PASSWORD",
            ApiError::InvalidResetToken => "INVALID_RESET_TOKEN",
            ApiError::InvalidVerificationToken => "INVALID_VERIFICATION_TOKEN",
            ApiError::PasswordRequired => "PASSWORD_REQUIRED",
            ApiError::InvalidPassword => "INVALID_PASSWORD",
            ApiError::Upstream(_) => "UPSTREAM_ERROR",
            ApiError::Database(_) | ApiError::Io(_) | ApiError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            ApiError::Validation(_)
            | ApiError::FieldValidation(_)
            | ApiError::InvalidResetToken
            | ApiError::InvalidVerificationToken
            | ApiError::PasswordRequired => StatusCode::BAD_REQUEST,
            ApiError::InvalidCredentials
            | ApiError::NoAccessToken
            | ApiError::InvalidAccessToken
            | ApiError::AccessTokenExpired
            | ApiError::NoRefreshToken
            | ApiError::InvalidRefreshToken
            | ApiError::RefreshTokenExpired
            | ApiError::InvalidCurrentPassword
            | ApiError::InvalidPassword => StatusCode::UNAUTHORIZED,
            ApiError::InsufficientPermissions(_)
            | ApiError::InsufficientSubscription(_)
            | ApiError::SubscriptionExpired
            | ApiError::EmailVerificationRequired => StatusCode::FORBIDDEN,
            ApiError::UserNotFound => StatusCode::NOT_FOUND,
            ApiError::EmailExists | ApiError::UsernameExists => StatusCode::CONFLICT,
            ApiError::ApiLimitExceeded(_) => StatusCode::TOO_MANY_REQUESTS,
            ApiError::Upstream(_) => StatusCode::BAD_GATEWAY,
            ApiError::Database(_) | ApiError::Io(_) | ApiError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl From<validator::ValidationErrors> for ApiError {
    fn from(errors: validator::ValidationErrors) -> Self {
        let mut fields = Vec::new();
        for (field, errs) in errors.field_errors() {
            for err in errs {
                fields.push(FieldError {
                    field: field.to_string(),
                    message: err
                        .message
                        .as_ref()
                        .map(|m| m.to_string())
                        .unwrap_or_else(|| format!("invalid value for `{}`", field)),
                    value: err
                        .params
                        .get("value")
                        .map(|v| serde_json::to_value(v).unwrap_or_default()),
                });
            }
        }
        ApiError::FieldValidation(fields)
    }
}

/// Error envelope returned for every failed request
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ErrorEnvelope {
    success: bool,
    error: String,
    error_code: String,
    request_id: String,
    timestamp: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    errors: Option<Vec<FieldError>>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let code = self.error_code();

        // Store and internal failures never leak their detail to clients
        let message = match &self {
            ApiError::Database(e) => {
                tracing::error!("database error: {}", e);
                "Internal server error".to_string()
            }
            ApiError::Io(e) => {
                tracing::error!("io error: {}", e);
                "Internal server error".to_string()
            }
            ApiError::Internal(e) => {
                tracing::error!("internal error: {}", e);
                "Internal server error".to_string()
            }
            other => other.to_string(),
        };

        let errors = match self {
            ApiError::FieldValidation(fields) => Some(fields),
            _ => None,
        };

        crate::metrics::record_error(code);

        let body = ErrorEnvelope {
            success: false,
            error: message,
            error_code: code.to_string(),
            request_id: uuid::Uuid::new_v4().to_string(),
            timestamp: chrono::Utc::now().to_rfc3339(),
            errors,
        };

        (status, Json(body)).into_response()
    }
}

/// Result type alias for service operations
pub type ApiResult<T> = Result<T, ApiError>;
