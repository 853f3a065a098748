//! User account endpoints
//!
//! # Endpoints
//!
//! - `POST /api/v1/users/register` - Register a new (unverified) user
//! - `GET  /api/v1/users/verify/:token` - Confirm an email address
//! - `POST /api/v1/users/login` - Log in; sets `token` and `refresh_token` cookies
//! - `POST /api/v1/users/logout` - End the session
//! - `POST /api/v1/users/resend-verification` - Send a fresh verification link
//! - `POST /api/v1/users/refresh` - Rotate the token pair
//! - `POST /api/v1/users/forgot-password` - Email a password reset link
//! - `POST /api/v1/users/reset-password/:token` - Set a new password from a reset link
//! - `POST /api/v1/users/change-password` - Change password while logged in
//! - `GET  /api/v1/users/me` - Current user

use crate::{
    app::AppState,
    error::{ApiError, ApiResult},
    extract::ValidJson,
};
use axum::{
    extract::{Path, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::AppendHeaders,
    Extension, Json,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use taskhive_shared::{
    auth::{
        jwt::TokenPair,
        middleware::{cookie_value, Principal, ACCESS_TOKEN_COOKIE, REFRESH_TOKEN_COOKIE},
        password::{hash_password_async, validate_password_strength, verify_password_async},
        tokens::{generate_token, hash_token, token_matches},
    },
    mail::{password_reset_email, send_best_effort, verification_email},
    models::user::{normalize_email, CreateUser, User},
};
use validator::Validate;

/// Register request
#[derive(Debug, Deserialize, Validate)]
pub struct RegisterRequest {
    #[validate(email(message = "Invalid email format"))]
    pub email: String,

    #[validate(length(min = 3, max = 13, message = "Username must be between 3 and 13 characters"))]
    pub username: String,

    /// Checked against the strength policy in the handler
    pub password: String,

    #[validate(length(max = 100, message = "Full name must be at most 100 characters"))]
    pub fullname: Option<String>,
}

/// Login request
#[derive(Debug, Deserialize, Validate)]
pub struct LoginRequest {
    #[validate(email(message = "Invalid email format"))]
    pub email: String,

    #[validate(length(min = 1, message = "Password cannot be empty"))]
    pub password: String,
}

/// Login and refresh response
#[derive(Debug, Serialize)]
pub struct SessionResponse {
    pub token: String,
    pub refresh_token: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<User>,
}

#[derive(Debug, Default, Deserialize)]
pub struct RefreshRequest {
    pub refresh_token: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct EmailRequest {
    #[validate(email(message = "Invalid email format"))]
    pub email: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct ResetPasswordRequest {
    #[validate(length(min = 1, message = "New password cannot be empty"))]
    pub new_password: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct ChangePasswordRequest {
    #[validate(length(min = 1, message = "Current password cannot be empty"))]
    pub current_password: String,

    #[validate(length(min = 1, message = "New password cannot be empty"))]
    pub new_password: String,
}

/// Plain acknowledgement
#[derive(Debug, Serialize, Deserialize)]
pub struct MessageResponse {
    pub message: String,
}

impl MessageResponse {
    fn new(message: &str) -> Json<Self> {
        Json(Self {
            message: message.to_string(),
        })
    }
}

type SessionCookies = AppendHeaders<[(header::HeaderName, HeaderValue); 2]>;

fn build_cookie(name: &str, value: &str, max_age_seconds: i64, secure: bool) -> ApiResult<HeaderValue> {
    let mut cookie = format!(
        "{}={}; HttpOnly; SameSite=Lax; Path=/; Max-Age={}",
        name, value, max_age_seconds
    );
    if secure {
        cookie.push_str("; Secure");
    }

    HeaderValue::from_str(&cookie).map_err(|e| ApiError::InternalError(format!("Invalid cookie: {}", e)))
}

fn session_cookies(state: &AppState, pair: &TokenPair) -> ApiResult<SessionCookies> {
    let secure = state.config.api.production;

    Ok(AppendHeaders([
        (
            header::SET_COOKIE,
            build_cookie(ACCESS_TOKEN_COOKIE, &pair.access_token, state.keys.access_ttl.num_seconds(), secure)?,
        ),
        (
            header::SET_COOKIE,
            build_cookie(REFRESH_TOKEN_COOKIE, &pair.refresh_token, state.keys.refresh_ttl.num_seconds(), secure)?,
        ),
    ]))
}

fn cleared_cookies(state: &AppState) -> ApiResult<SessionCookies> {
    let secure = state.config.api.production;

    Ok(AppendHeaders([
        (header::SET_COOKIE, build_cookie(ACCESS_TOKEN_COOKIE, "", 0, secure)?),
        (header::SET_COOKIE, build_cookie(REFRESH_TOKEN_COOKIE, "", 0, secure)?),
    ]))
}

fn invalid_credentials() -> ApiError {
    ApiError::BadRequest("Invalid credentials".to_string())
}

/// Looks up a user by email and checks their password
async fn check_credentials(state: &AppState, email: &str, password: &str) -> ApiResult<User> {
    let user = User::find_by_email(&state.db, &normalize_email(email))
        .await?
        .ok_or_else(invalid_credentials)?;

    if !verify_password_async(password.to_string(), user.password_hash.clone()).await? {
        return Err(invalid_credentials());
    }

    Ok(user)
}

/// Register a new user
///
/// # Endpoint
///
/// ```text
/// POST /api/v1/users/register
/// Content-Type: application/json
///
/// {
///   "email": "ada@example.com",
///   "username": "ada",
///   "password": "SecureP@ss123",
///   "fullname": "Ada Lovelace"
/// }
/// ```
///
/// Returns `201` with the user. A verification link is emailed; the account
/// cannot log in until it is followed.
///
/// # Errors
///
/// - `400 Bad Request`: Validation failed or weak password
/// - `409 Conflict`: Email already registered
pub async fn register(
    State(state): State<AppState>,
    ValidJson(req): ValidJson<RegisterRequest>,
) -> ApiResult<(StatusCode, Json<User>)> {
    validate_password_strength(&req.password)?;

    let password_hash = hash_password_async(req.password).await?;
    let verification = generate_token();

    let user = User::create(
        &state.db,
        CreateUser {
            email: req.email,
            username: req.username,
            fullname: req.fullname,
            password_hash,
            role: None,
            email_verification_token_hash: verification.hash,
            email_verification_expiry: verification.expires_at,
        },
    )
    .await?;

    tracing::info!(user_id = %user.id, "User registered");

    send_best_effort(
        state.mailer.as_ref(),
        verification_email(&user.email, &user.username, &state.config.verification_url(&verification.token)),
    )
    .await;

    Ok((StatusCode::CREATED, Json(user)))
}

/// Confirm an email address from an emailed link
///
/// # Errors
///
/// - `400 Bad Request`: Unknown or expired token
pub async fn verify_email(
    State(state): State<AppState>,
    Path(token): Path<String>,
) -> ApiResult<Json<MessageResponse>> {
    let user = User::find_by_verification_token(&state.db, &hash_token(&token))
        .await?
        .ok_or_else(|| ApiError::BadRequest("Invalid verification token".to_string()))?;

    if user.verification_token_expired(Utc::now()) {
        return Err(ApiError::BadRequest("Verification token expired".to_string()));
    }

    User::mark_email_verified(&state.db, user.id).await?;
    tracing::info!(user_id = %user.id, "Email verified");

    Ok(MessageResponse::new("Email verified successfully"))
}

/// Login endpoint
///
/// # Endpoint
///
/// ```text
/// POST /api/v1/users/login
/// Content-Type: application/json
///
/// { "email": "ada@example.com", "password": "SecureP@ss123" }
/// ```
///
/// # Response
///
/// Sets `token` and `refresh_token` cookies and returns:
///
/// ```json
/// { "token": "eyJ...", "refresh_token": "eyJ...", "user": { ... } }
/// ```
///
/// # Errors
///
/// - `400 Bad Request`: Unknown email or wrong password
/// - `422 Unprocessable Entity`: Email not verified yet
pub async fn login(
    State(state): State<AppState>,
    ValidJson(req): ValidJson<LoginRequest>,
) -> ApiResult<(SessionCookies, Json<SessionResponse>)> {
    let user = check_credentials(&state, &req.email, &req.password).await?;

    if !user.is_email_verified {
        return Err(ApiError::PreconditionFailed(
            "Email is not verified; check your inbox for the verification link".to_string(),
        ));
    }

    let pair = state.keys.issue_pair(user.id)?;
    User::set_refresh_token(&state.db, user.id, Some(&hash_token(&pair.refresh_token))).await?;

    tracing::info!(user_id = %user.id, "User logged in");

    Ok((
        session_cookies(&state, &pair)?,
        Json(SessionResponse {
            token: pair.access_token,
            refresh_token: pair.refresh_token,
            user: Some(user),
        }),
    ))
}

/// End the session: forget the refresh token and expire both cookies
pub async fn logout(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
) -> ApiResult<(SessionCookies, Json<MessageResponse>)> {
    User::set_refresh_token(&state.db, principal.user_id, None).await?;

    tracing::info!(user_id = %principal.user_id, "User logged out");

    Ok((cleared_cookies(&state)?, MessageResponse::new("Logged out")))
}

/// Send a fresh verification link
///
/// Requires the account password so the endpoint cannot be used to spam
/// arbitrary addresses.
pub async fn resend_verification(
    State(state): State<AppState>,
    ValidJson(req): ValidJson<LoginRequest>,
) -> ApiResult<Json<MessageResponse>> {
    let user = check_credentials(&state, &req.email, &req.password).await?;

    if user.is_email_verified {
        return Err(ApiError::BadRequest("Email is already verified".to_string()));
    }

    let verification = generate_token();
    User::set_verification_token(&state.db, user.id, &verification.hash, verification.expires_at).await?;

    send_best_effort(
        state.mailer.as_ref(),
        verification_email(&user.email, &user.username, &state.config.verification_url(&verification.token)),
    )
    .await;

    Ok(MessageResponse::new("Verification email sent"))
}

/// Token refresh endpoint
///
/// The refresh token is read from the `refresh_token` cookie, or from the
/// JSON body when there is no cookie. Both tokens are rotated; the old
/// refresh token stops working.
///
/// # Errors
///
/// - `401 Unauthorized`: Missing, invalid, expired or already used token
pub async fn refresh(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Option<Json<RefreshRequest>>,
) -> ApiResult<(SessionCookies, Json<SessionResponse>)> {
    let presented = cookie_value(&headers, REFRESH_TOKEN_COOKIE)
        .or_else(|| body.and_then(|Json(b)| b.refresh_token))
        .ok_or_else(|| ApiError::Unauthorized("Refresh token missing".to_string()))?;

    let claims = state.keys.validate_refresh(&presented)?;

    let rejected = || ApiError::Unauthorized("Invalid refresh token".to_string());

    let user = User::find_by_id(&state.db, claims.sub).await?.ok_or_else(rejected)?;
    let stored = user.refresh_token_hash.as_deref().ok_or_else(rejected)?;

    if !token_matches(&presented, stored) {
        return Err(rejected());
    }

    let pair = state.keys.issue_pair(user.id)?;
    if !User::rotate_refresh_token(&state.db, user.id, stored, &hash_token(&pair.refresh_token)).await? {
        return Err(rejected());
    }

    tracing::debug!(user_id = %user.id, "Session refreshed");

    Ok((
        session_cookies(&state, &pair)?,
        Json(SessionResponse {
            token: pair.access_token,
            refresh_token: pair.refresh_token,
            user: None,
        }),
    ))
}

/// Email a password reset link
///
/// # Errors
///
/// - `404 Not Found`: No account with that email
pub async fn forgot_password(
    State(state): State<AppState>,
    ValidJson(req): ValidJson<EmailRequest>,
) -> ApiResult<Json<MessageResponse>> {
    let user = User::find_by_email(&state.db, &normalize_email(&req.email))
        .await?
        .ok_or_else(|| ApiError::NotFound("User not found".to_string()))?;

    let reset = generate_token();
    User::set_reset_token(&state.db, user.id, &reset.hash, reset.expires_at).await?;

    send_best_effort(
        state.mailer.as_ref(),
        password_reset_email(&user.email, &user.username, &state.config.password_reset_url(&reset.token)),
    )
    .await;

    tracing::info!(user_id = %user.id, "Password reset requested");

    Ok(MessageResponse::new("Password reset link sent to your email"))
}

/// Set a new password from a reset link
///
/// Ends any active session.
///
/// # Errors
///
/// - `400 Bad Request`: Unknown or expired token, or weak password
pub async fn reset_password(
    State(state): State<AppState>,
    Path(token): Path<String>,
    ValidJson(req): ValidJson<ResetPasswordRequest>,
) -> ApiResult<Json<MessageResponse>> {
    let user = User::find_by_reset_token(&state.db, &hash_token(&token))
        .await?
        .ok_or_else(|| ApiError::BadRequest("Invalid reset token".to_string()))?;

    if user.reset_token_expired(Utc::now()) {
        return Err(ApiError::BadRequest("Reset token expired".to_string()));
    }

    validate_password_strength(&req.new_password)?;

    let password_hash = hash_password_async(req.new_password).await?;
    User::update_password(&state.db, user.id, &password_hash).await?;

    tracing::info!(user_id = %user.id, "Password reset");

    Ok(MessageResponse::new("Password changed successfully"))
}

/// Change password while logged in
///
/// # Errors
///
/// - `400 Bad Request`: Wrong current password, or weak new password
pub async fn change_password(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    ValidJson(req): ValidJson<ChangePasswordRequest>,
) -> ApiResult<Json<MessageResponse>> {
    let user = User::find_by_id(&state.db, principal.user_id)
        .await?
        .ok_or_else(|| ApiError::Unauthorized("User no longer exists".to_string()))?;

    if !verify_password_async(req.current_password, user.password_hash.clone()).await? {
        return Err(ApiError::BadRequest("Current password is incorrect".to_string()));
    }

    validate_password_strength(&req.new_password)?;

    let password_hash = hash_password_async(req.new_password).await?;
    User::update_password(&state.db, user.id, &password_hash).await?;

    tracing::info!(user_id = %user.id, "Password changed");

    Ok(MessageResponse::new("Password changed"))
}

/// Current user
pub async fn me(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
) -> ApiResult<Json<User>> {
    let user = User::find_by_id(&state.db, principal.user_id)
        .await?
        .ok_or_else(|| ApiError::Unauthorized("User no longer exists".to_string()))?;

    Ok(Json(user))
}
