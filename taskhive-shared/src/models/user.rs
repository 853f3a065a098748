//! User model and database operations
//!
//! Users are the identity store: credentials, email verification state,
//! password reset tokens and the single active refresh token. One-time tokens
//! are never stored in plaintext; only their SHA-256 hex digest is persisted
//! (see [`crate::auth::tokens`]).
//!
//! # Schema
//!
//! ```sql
//! CREATE TABLE users (
//!     id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
//!     email VARCHAR(255) NOT NULL,              -- users_email_key UNIQUE
//!     username VARCHAR(64) NOT NULL,
//!     fullname VARCHAR(255),
//!     password_hash TEXT NOT NULL,
//!     role VARCHAR(32) NOT NULL DEFAULT 'member',
//!     is_email_verified BOOLEAN NOT NULL DEFAULT FALSE,
//!     email_verification_token_hash CHAR(64),
//!     email_verification_expiry TIMESTAMPTZ,
//!     forgot_password_token_hash CHAR(64),
//!     forgot_password_expiry TIMESTAMPTZ,
//!     refresh_token_hash CHAR(64),
//!     created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
//!     updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
//! );
//! ```

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::{PgExecutor, PgPool};
use uuid::Uuid;

/// Name of the unique constraint on `users.email`
pub const EMAIL_UNIQUE_CONSTRAINT: &str = "users_email_key";

/// Default global role for newly registered users
pub const DEFAULT_USER_ROLE: &str = "member";

/// User account
///
/// The global `role` is informational only. Project access is decided by
/// memberships, never by this field.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct User {
    pub id: Uuid,

    /// Email address, stored trimmed and lowercased
    pub email: String,

    pub username: String,

    pub fullname: Option<String>,

    /// Argon2id password hash
    #[serde(skip_serializing)]
    pub password_hash: String,

    pub role: String,

    pub is_email_verified: bool,

    #[serde(skip_serializing)]
    pub email_verification_token_hash: Option<String>,

    #[serde(skip_serializing)]
    pub email_verification_expiry: Option<DateTime<Utc>>,

    #[serde(skip_serializing)]
    pub forgot_password_token_hash: Option<String>,

    #[serde(skip_serializing)]
    pub forgot_password_expiry: Option<DateTime<Utc>>,

    /// Digest of the current refresh token (single active session)
    #[serde(skip_serializing)]
    pub refresh_token_hash: Option<String>,

    pub created_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,
}

/// Input for creating a new user
#[derive(Debug, Clone)]
pub struct CreateUser {
    pub email: String,
    pub username: String,
    pub fullname: Option<String>,

    /// Argon2id password hash (NOT plaintext password!)
    pub password_hash: String,

    /// Global role; defaults to [`DEFAULT_USER_ROLE`]
    pub role: Option<String>,

    pub email_verification_token_hash: String,
    pub email_verification_expiry: DateTime<Utc>,
}

/// Normalizes an email address for storage and lookup
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

impl User {
    /// Creates a new, unverified user
    ///
    /// # Errors
    ///
    /// Returns a database error carrying [`EMAIL_UNIQUE_CONSTRAINT`] when the
    /// email is already registered. The store enforces uniqueness, so two
    /// concurrent registrations cannot both succeed.
    pub async fn create(pool: &PgPool, data: CreateUser) -> Result<Self, sqlx::Error> {
        let user = sqlx::query_as::<_, User>(
            r#"
            INSERT INTO users (email, username, fullname, password_hash, role,
                               email_verification_token_hash, email_verification_expiry)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING *
            "#,
        )
        .bind(normalize_email(&data.email))
        .bind(data.username.trim())
        .bind(data.fullname)
        .bind(data.password_hash)
        .bind(data.role.unwrap_or_else(|| DEFAULT_USER_ROLE.to_string()))
        .bind(data.email_verification_token_hash)
        .bind(data.email_verification_expiry)
        .fetch_one(pool)
        .await?;

        Ok(user)
    }

    /// Finds a user by ID
    pub async fn find_by_id<'e, E>(executor: E, id: Uuid) -> Result<Option<Self>, sqlx::Error>
    where
        E: PgExecutor<'e>,
    {
        let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE id = $1")
            .bind(id)
            .fetch_optional(executor)
            .await?;

        Ok(user)
    }

    /// Finds a user by email address (normalized before lookup)
    pub async fn find_by_email<'e, E>(executor: E, email: &str) -> Result<Option<Self>, sqlx::Error>
    where
        E: PgExecutor<'e>,
    {
        let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE email = $1")
            .bind(normalize_email(email))
            .fetch_optional(executor)
            .await?;

        Ok(user)
    }

    /// Finds the user holding an email verification token digest
    ///
    /// Expiry is not checked here; see [`User::verification_token_expired`].
    pub async fn find_by_verification_token(
        pool: &PgPool,
        token_hash: &str,
    ) -> Result<Option<Self>, sqlx::Error> {
        let user = sqlx::query_as::<_, User>(
            "SELECT * FROM users WHERE email_verification_token_hash = $1",
        )
        .bind(token_hash)
        .fetch_optional(pool)
        .await?;

        Ok(user)
    }

    /// Finds the user holding a password reset token digest
    pub async fn find_by_reset_token(
        pool: &PgPool,
        token_hash: &str,
    ) -> Result<Option<Self>, sqlx::Error> {
        let user = sqlx::query_as::<_, User>(
            "SELECT * FROM users WHERE forgot_password_token_hash = $1",
        )
        .bind(token_hash)
        .fetch_optional(pool)
        .await?;

        Ok(user)
    }

    /// Whether the stored verification token has expired at `now`
    ///
    /// A missing expiry counts as expired.
    pub fn verification_token_expired(&self, now: DateTime<Utc>) -> bool {
        self.email_verification_expiry.map_or(true, |expiry| expiry < now)
    }

    /// Whether the stored password reset token has expired at `now`
    pub fn reset_token_expired(&self, now: DateTime<Utc>) -> bool {
        self.forgot_password_expiry.map_or(true, |expiry| expiry < now)
    }

    /// Marks the email as verified and clears the verification token
    pub async fn mark_email_verified(pool: &PgPool, id: Uuid) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r#"
            UPDATE users
            SET is_email_verified = TRUE,
                email_verification_token_hash = NULL,
                email_verification_expiry = NULL,
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .execute(pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Replaces the email verification token
    pub async fn set_verification_token(
        pool: &PgPool,
        id: Uuid,
        token_hash: &str,
        expiry: DateTime<Utc>,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            UPDATE users
            SET email_verification_token_hash = $2,
                email_verification_expiry = $3,
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(token_hash)
        .bind(expiry)
        .execute(pool)
        .await?;

        Ok(())
    }

    /// Replaces the password reset token
    pub async fn set_reset_token(
        pool: &PgPool,
        id: Uuid,
        token_hash: &str,
        expiry: DateTime<Utc>,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            UPDATE users
            SET forgot_password_token_hash = $2,
                forgot_password_expiry = $3,
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(token_hash)
        .bind(expiry)
        .execute(pool)
        .await?;

        Ok(())
    }

    /// Sets a new password hash
    ///
    /// Also clears any pending reset token and the active refresh token, so
    /// the previous session cannot be refreshed after a password change.
    pub async fn update_password(
        pool: &PgPool,
        id: Uuid,
        password_hash: &str,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r#"
            UPDATE users
            SET password_hash = $2,
                forgot_password_token_hash = NULL,
                forgot_password_expiry = NULL,
                refresh_token_hash = NULL,
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(password_hash)
        .execute(pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Stores (or clears, with `None`) the active refresh token digest
    pub async fn set_refresh_token(
        pool: &PgPool,
        id: Uuid,
        token_hash: Option<&str>,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE users SET refresh_token_hash = $2, updated_at = NOW() WHERE id = $1",
        )
        .bind(id)
        .bind(token_hash)
        .execute(pool)
        .await?;

        Ok(())
    }

    /// Swaps the refresh token digest, only if it still equals `current_hash`
    ///
    /// Returns `false` when another request rotated or cleared it first, so
    /// each refresh token can be redeemed once.
    pub async fn rotate_refresh_token(
        pool: &PgPool,
        id: Uuid,
        current_hash: &str,
        next_hash: &str,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r#"
            UPDATE users
            SET refresh_token_hash = $3, updated_at = NOW()
            WHERE id = $1 AND refresh_token_hash = $2
            "#,
        )
        .bind(id)
        .bind(current_hash)
        .bind(next_hash)
        .execute(pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn sample_user() -> User {
        let now = Utc::now();
        User {
            id: Uuid::new_v4(),
            email: "ada@example.com".to_string(),
            username: "ada".to_string(),
            fullname: Some("Ada Lovelace".to_string()),
            password_hash: "$argon2id$secret".to_string(),
            role: DEFAULT_USER_ROLE.to_string(),
            is_email_verified: false,
            email_verification_token_hash: Some("a".repeat(64)),
            email_verification_expiry: Some(now + Duration::hours(1)),
            forgot_password_token_hash: None,
            forgot_password_expiry: None,
            refresh_token_hash: Some("b".repeat(64)),
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_normalize_email() {
        assert_eq!(normalize_email("  Ada@Example.COM "), "ada@example.com");
    }

    #[test]
    fn test_serialization_hides_secrets() {
        let json = serde_json::to_value(sample_user()).unwrap();

        assert_eq!(json["email"], "ada@example.com");
        assert!(json.get("password_hash").is_none());
        assert!(json.get("refresh_token_hash").is_none());
        assert!(json.get("email_verification_token_hash").is_none());
        assert!(json.get("forgot_password_token_hash").is_none());
    }

    #[test]
    fn test_token_expiry() {
        let user = sample_user();
        let now = Utc::now();

        assert!(!user.verification_token_expired(now));
        assert!(user.verification_token_expired(now + Duration::hours(2)));

        // No reset token issued yet
        assert!(user.reset_token_expired(now));
    }
}
