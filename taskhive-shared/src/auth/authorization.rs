//! Project authorization gate
//!
//! [`authorize`] is the single enforcement point for project-scoped access.
//! Every project-scoped handler calls it before touching any resource and
//! reuses the [`Membership`] it returns.
//!
//! # Decision
//!
//! 1. The raw project id must parse as a UUID, otherwise
//!    [`AuthzError::InvalidIdentifier`] (400).
//! 2. The principal must hold a membership on the project, otherwise
//!    [`AuthzError::NotMember`]. This is reported exactly like a missing
//!    project (404), so non-members cannot tell which projects exist.
//! 3. The membership's role must be in the required set (an empty set
//!    accepts any role), otherwise [`AuthzError::InsufficientRole`] (403).
//!
//! Memberships are read from the database on every call; nothing is cached,
//! so a role change takes effect on the very next request.

use sqlx::PgExecutor;
use uuid::Uuid;

use super::middleware::Principal;
use crate::models::membership::{Membership, ProjectRole};

/// Error type for authorization checks
#[derive(Debug, thiserror::Error)]
pub enum AuthzError {
    /// A path identifier is not a well-formed UUID
    #[error("Invalid {0} ID format")]
    InvalidIdentifier(&'static str),

    /// No membership; indistinguishable from a missing project
    #[error("Project not found or you do not have access")]
    NotMember,

    #[error("Insufficient permissions: requires one of {required:?}, has {actual}")]
    InsufficientRole {
        required: Vec<ProjectRole>,
        actual: ProjectRole,
    },

    #[error("Database error: {0}")]
    DatabaseError(#[from] sqlx::Error),
}

/// Parses a path identifier, naming its kind in the error
///
/// # Example
///
/// ```
/// use taskhive_shared::auth::authorization::{parse_identifier, AuthzError};
///
/// assert!(parse_identifier("8c1f6bd4-1c1e-4c3e-9f1e-2b0c5b8f7a10", "task").is_ok());
/// assert!(matches!(
///     parse_identifier("not-a-uuid", "task"),
///     Err(AuthzError::InvalidIdentifier("task"))
/// ));
/// ```
pub fn parse_identifier(raw: &str, kind: &'static str) -> Result<Uuid, AuthzError> {
    Uuid::parse_str(raw.trim()).map_err(|_| AuthzError::InvalidIdentifier(kind))
}

/// Checks a resolved membership against a required role set
pub fn check_role(membership: &Membership, required: &[ProjectRole]) -> Result<(), AuthzError> {
    if !membership.role.allows(required) {
        return Err(AuthzError::InsufficientRole {
            required: required.to_vec(),
            actual: membership.role,
        });
    }

    Ok(())
}

/// Resolves and checks the principal's membership on a project
///
/// # Arguments
///
/// * `executor` - Pool or transaction to read the membership from
/// * `principal` - Authenticated user
/// * `raw_project_id` - Project id exactly as it appeared in the path
/// * `required` - Accepted roles; empty means any member
///
/// # Returns
///
/// The principal's membership, for reuse by the caller
pub async fn authorize<'e, E>(
    executor: E,
    principal: &Principal,
    raw_project_id: &str,
    required: &[ProjectRole],
) -> Result<Membership, AuthzError>
where
    E: PgExecutor<'e>,
{
    let project_id = parse_identifier(raw_project_id, "project")?;

    let membership = Membership::find_for_user(executor, project_id, principal.user_id)
        .await?
        .ok_or(AuthzError::NotMember)?;

    check_role(&membership, required)?;

    tracing::debug!(
        user_id = %principal.user_id,
        project_id = %project_id,
        role = %membership.role,
        "Project access granted"
    );

    Ok(membership)
}
