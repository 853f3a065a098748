//! Error handling for the API server
//!
//! Handlers return [`ApiResult`]. Library errors convert into [`ApiError`]
//! with `?`, and [`ApiError`] renders as
//! `{"error": code, "message": text, "details"?: [...]}`.
//!
//! A caller who is not a member of a project gets the same 404 body as a
//! caller asking for a project that does not exist.

use axum::{
    extract::multipart::MultipartError,
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use taskhive_shared::{
    auth::{
        authorization::AuthzError,
        jwt::JwtError,
        middleware::AuthError,
        password::{PasswordError, WeakPassword},
    },
    cascade::CascadeError,
    models::{
        membership::{MembershipError, MEMBERSHIP_UNIQUE_CONSTRAINT},
        project::NAME_UNIQUE_CONSTRAINT,
        task::TaskError,
        user::EMAIL_UNIQUE_CONSTRAINT,
        violated_constraint,
    },
};

/// API result type alias
pub type ApiResult<T> = Result<T, ApiError>;

/// Unified API error type
#[derive(Debug)]
pub enum ApiError {
    /// Bad request (400)
    BadRequest(String),

    /// Field validation failed (400)
    ValidationError(Vec<ValidationErrorDetail>),

    /// Unauthorized (401)
    Unauthorized(String),

    /// Forbidden (403)
    Forbidden(String),

    /// Not found (404), also used for non-members
    NotFound(String),

    /// Conflict (409) - e.g., duplicate email or project name
    Conflict(String),

    /// Invariant violation (409) - e.g., removing the last admin
    InvariantViolation(String),

    /// Payload too large (413)
    PayloadTooLarge(String),

    /// Precondition failed (422) - e.g., unverified user
    PreconditionFailed(String),

    /// Internal server error (500)
    InternalError(String),

    /// Upstream failure (502) - the external call was the whole request
    UpstreamFailure(String),
}

/// Validation error detail
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationErrorDetail {
    /// Field that failed validation
    pub field: String,

    /// Error message
    pub message: String,
}

/// Error response format
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Error code (e.g., "bad_request", "not_found")
    pub error: String,

    /// Human-readable error message
    pub message: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Vec<ValidationErrorDetail>>,
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) | ApiError::ValidationError(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Conflict(_) | ApiError::InvariantViolation(_) => StatusCode::CONFLICT,
            ApiError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            ApiError::PreconditionFailed(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::InternalError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::UpstreamFailure(_) => StatusCode::BAD_GATEWAY,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            ApiError::BadRequest(_) => "bad_request",
            ApiError::ValidationError(_) => "validation_error",
            ApiError::Unauthorized(_) => "unauthorized",
            ApiError::Forbidden(_) => "forbidden",
            ApiError::NotFound(_) => "not_found",
            ApiError::Conflict(_) => "conflict",
            ApiError::InvariantViolation(_) => "invariant_violation",
            ApiError::PayloadTooLarge(_) => "payload_too_large",
            ApiError::PreconditionFailed(_) => "precondition_failed",
            ApiError::InternalError(_) => "internal_error",
            ApiError::UpstreamFailure(_) => "upstream_failure",
        }
    }

    /// The 404 returned for both missing projects and non-members
    pub fn project_not_found() -> Self {
        ApiError::NotFound("Project not found or you do not have access".to_string())
    }

    pub fn field(field: &str, message: impl Into<String>) -> Self {
        ApiError::ValidationError(vec![ValidationErrorDetail {
            field: field.to_string(),
            message: message.into(),
        }])
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ApiError::BadRequest(msg) => write!(f, "Bad request: {}", msg),
            ApiError::ValidationError(errors) => {
                write!(f, "Validation failed: {} errors", errors.len())
            }
            ApiError::Unauthorized(msg) => write!(f, "Unauthorized: {}", msg),
            ApiError::Forbidden(msg) => write!(f, "Forbidden: {}", msg),
            ApiError::NotFound(msg) => write!(f, "Not found: {}", msg),
            ApiError::Conflict(msg) => write!(f, "Conflict: {}", msg),
            ApiError::InvariantViolation(msg) => write!(f, "Invariant violation: {}", msg),
            ApiError::PayloadTooLarge(msg) => write!(f, "Payload too large: {}", msg),
            ApiError::PreconditionFailed(msg) => write!(f, "Precondition failed: {}", msg),
            ApiError::InternalError(msg) => write!(f, "Internal error: {}", msg),
            ApiError::UpstreamFailure(msg) => write!(f, "Upstream failure: {}", msg),
        }
    }
}

impl std::error::Error for ApiError {}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let code = self.code();

        let (message, details) = match self {
            ApiError::ValidationError(errors) => ("Request validation failed".to_string(), Some(errors)),
            ApiError::InternalError(msg) => {
                // Log internal errors but don't expose details to clients
                tracing::error!("Internal error: {}", msg);
                ("An internal error occurred".to_string(), None)
            }
            ApiError::BadRequest(msg)
            | ApiError::Unauthorized(msg)
            | ApiError::Forbidden(msg)
            | ApiError::NotFound(msg)
            | ApiError::Conflict(msg)
            | ApiError::InvariantViolation(msg)
            | ApiError::PayloadTooLarge(msg)
            | ApiError::PreconditionFailed(msg)
            | ApiError::UpstreamFailure(msg) => (msg, None),
        };

        let body = Json(ErrorResponse {
            error: code.to_string(),
            message,
            details,
        });

        (status, body).into_response()
    }
}

/// Convert sqlx errors to API errors
///
/// Unique violations become 409 with a message naming what collided.
impl From<sqlx::Error> for ApiError {
    fn from(err: sqlx::Error) -> Self {
        match violated_constraint(&err) {
            Some(EMAIL_UNIQUE_CONSTRAINT) => {
                return ApiError::Conflict("Email is already registered".to_string())
            }
            Some(NAME_UNIQUE_CONSTRAINT) => {
                return ApiError::Conflict("A project with this name already exists".to_string())
            }
            Some(MEMBERSHIP_UNIQUE_CONSTRAINT) => {
                return ApiError::Conflict("User is already a member of this project".to_string())
            }
            _ => {}
        }

        match err {
            sqlx::Error::RowNotFound => ApiError::NotFound("Resource not found".to_string()),
            other => ApiError::InternalError(format!("Database error: {}", other)),
        }
    }
}

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::MissingCredentials => ApiError::Unauthorized("Authentication required".to_string()),
            AuthError::TokenExpired => ApiError::Unauthorized("Token expired".to_string()),
            AuthError::InvalidToken(_) => ApiError::Unauthorized("Invalid token".to_string()),
            AuthError::UserNotFound => ApiError::Unauthorized("User no longer exists".to_string()),
            AuthError::DatabaseError(e) => e.into(),
        }
    }
}

impl From<AuthzError> for ApiError {
    fn from(err: AuthzError) -> Self {
        match err {
            AuthzError::InvalidIdentifier(kind) => ApiError::BadRequest(format!("Invalid {} ID format", kind)),
            AuthzError::NotMember => ApiError::project_not_found(),
            AuthzError::InsufficientRole { .. } => {
                ApiError::Forbidden("You do not have permission to perform this action".to_string())
            }
            AuthzError::DatabaseError(e) => e.into(),
        }
    }
}

impl From<MembershipError> for ApiError {
    fn from(err: MembershipError) -> Self {
        match err {
            MembershipError::NotFound => ApiError::NotFound(err.to_string()),
            MembershipError::UserNotFound => ApiError::NotFound(err.to_string()),
            MembershipError::AlreadyMember => ApiError::Conflict(err.to_string()),
            MembershipError::UserNotVerified => ApiError::PreconditionFailed(err.to_string()),
            MembershipError::LastAdmin => ApiError::InvariantViolation(err.to_string()),
            MembershipError::Database(e) => e.into(),
        }
    }
}

impl From<TaskError> for ApiError {
    fn from(err: TaskError) -> Self {
        match err {
            TaskError::NotFound => ApiError::NotFound(err.to_string()),
            TaskError::ProjectNotFound => ApiError::project_not_found(),
            TaskError::AssigneeNotMember => ApiError::PreconditionFailed(err.to_string()),
            TaskError::Database(e) => e.into(),
        }
    }
}

impl From<CascadeError> for ApiError {
    fn from(err: CascadeError) -> Self {
        match err {
            CascadeError::ProjectNotFound => ApiError::project_not_found(),
            CascadeError::TaskNotFound => ApiError::NotFound(err.to_string()),
            CascadeError::Database(e) => e.into(),
        }
    }
}

impl From<PasswordError> for ApiError {
    fn from(err: PasswordError) -> Self {
        ApiError::InternalError(format!("Password operation failed: {}", err))
    }
}

impl From<WeakPassword> for ApiError {
    fn from(err: WeakPassword) -> Self {
        ApiError::field("password", err.to_string())
    }
}

impl From<JwtError> for ApiError {
    fn from(err: JwtError) -> Self {
        match err {
            JwtError::Expired => ApiError::Unauthorized("Token expired".to_string()),
            JwtError::CreateError(msg) => ApiError::InternalError(msg),
            _ => ApiError::Unauthorized("Invalid token".to_string()),
        }
    }
}

impl From<validator::ValidationErrors> for ApiError {
    fn from(err: validator::ValidationErrors) -> Self {
        let mut errors: Vec<ValidationErrorDetail> = err
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

        errors.sort_by(|a, b| a.field.cmp(&b.field));
        ApiError::ValidationError(errors)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(err: JsonRejection) -> Self {
        ApiError::BadRequest(err.body_text())
    }
}

impl From<MultipartError> for ApiError {
    fn from(err: MultipartError) -> Self {
        if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
            return ApiError::PayloadTooLarge("Attachment exceeds the maximum upload size".to_string());
        }
        ApiError::BadRequest(format!("Invalid multipart body: {}", err.body_text()))
    }
}
