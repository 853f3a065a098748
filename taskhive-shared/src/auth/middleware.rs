//! Request authentication
//!
//! Resolves an inbound request to a [`Principal`]. The access token is read
//! from `Authorization: Bearer <token>` first, then from the `token` cookie.
//! After the signature check the user is reloaded from the database on every
//! request, so a deleted account stops working immediately.
//!
//! The API crate wraps [`authenticate`] in an axum middleware that inserts
//! the principal into request extensions; handlers take it with
//! `Extension<Principal>` and pass it explicitly to the authorization gate.

use axum::http::{header, HeaderMap};
use serde::Serialize;
use sqlx::PgPool;
use uuid::Uuid;

use super::jwt::{JwtError, TokenKeys};
use crate::models::user::User;

/// Cookie carrying the access token
pub const ACCESS_TOKEN_COOKIE: &str = "token";

/// Cookie carrying the refresh token
pub const REFRESH_TOKEN_COOKIE: &str = "refresh_token";

/// The authenticated user making a request
#[derive(Debug, Clone, Serialize)]
pub struct Principal {
    pub user_id: Uuid,
    pub email: String,
    pub username: String,
    pub is_email_verified: bool,
}

impl From<&User> for Principal {
    fn from(user: &User) -> Self {
        Self {
            user_id: user.id,
            email: user.email.clone(),
            username: user.username.clone(),
            is_email_verified: user.is_email_verified,
        }
    }
}

/// Error type for request authentication
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("Missing credentials")]
    MissingCredentials,

    #[error("Token expired")]
    TokenExpired,

    #[error("Invalid token: {0}")]
    InvalidToken(String),

    /// Token was valid but its subject no longer exists
    #[error("User not found")]
    UserNotFound,

    #[error("Database error: {0}")]
    DatabaseError(#[from] sqlx::Error),
}

impl From<JwtError> for AuthError {
    fn from(err: JwtError) -> Self {
        match err {
            JwtError::Expired => AuthError::TokenExpired,
            other => AuthError::InvalidToken(other.to_string()),
        }
    }
}

/// Reads a cookie value from the `Cookie` headers
pub fn cookie_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(key, _)| *key == name)
        .map(|(_, value)| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

/// Extracts the access token, preferring the `Authorization` header
pub fn extract_access_token(headers: &HeaderMap) -> Option<String> {
    let bearer = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(|token| token.trim().to_string())
        .filter(|token| !token.is_empty());

    bearer.or_else(|| cookie_value(headers, ACCESS_TOKEN_COOKIE))
}

/// Authenticates a request from its headers
///
/// # Errors
///
/// - [`AuthError::MissingCredentials`] if no token is present
/// - [`AuthError::TokenExpired`] / [`AuthError::InvalidToken`] if the token
///   fails validation
/// - [`AuthError::UserNotFound`] if the token's subject no longer exists
pub async fn authenticate(
    pool: &PgPool,
    keys: &TokenKeys,
    headers: &HeaderMap,
) -> Result<Principal, AuthError> {
    let token = extract_access_token(headers).ok_or(AuthError::MissingCredentials)?;
    let claims = keys.validate_access(&token)?;

    let user = User::find_by_id(pool, claims.sub)
        .await?
        .ok_or(AuthError::UserNotFound)?;

    Ok(Principal::from(&user))
}
