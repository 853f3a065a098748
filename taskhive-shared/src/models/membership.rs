//! Membership model and database operations
//!
//! A membership is the edge between a user and a project, carrying exactly
//! one [`ProjectRole`]. It is the single source of truth for project access:
//! the authorization gate reads it on every request and nothing caches it.
//!
//! # Schema
//!
//! ```sql
//! CREATE TYPE project_role AS ENUM ('admin', 'project_admin', 'member');
//!
//! CREATE TABLE project_members (
//!     id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
//!     user_id UUID NOT NULL REFERENCES users (id),
//!     project_id UUID NOT NULL REFERENCES projects (id),
//!     role project_role NOT NULL DEFAULT 'member',
//!     created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
//!     updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
//!     CONSTRAINT project_members_user_project_key UNIQUE (user_id, project_id)
//! );
//! ```
//!
//! # Invariants
//!
//! - At most one membership per `(user, project)`, enforced by the unique
//!   constraint.
//! - Every project keeps at least one `admin`. Role changes and removals lock
//!   the project row before counting admins, so concurrent demotions are
//!   serialized and cannot both pass the check.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{PgExecutor, PgPool};
use tracing::info;
use uuid::Uuid;

use super::project::Project;
use super::user::User;
use super::violated_constraint;

/// Name of the unique constraint on `(user_id, project_id)`
pub const MEMBERSHIP_UNIQUE_CONSTRAINT: &str = "project_members_user_project_key";

/// Role a user holds on a project
///
/// Roles are flat tags: there is no implied hierarchy. Each operation declares
/// the exact set it accepts. `ProjectAdmin` is a distinct tag that currently
/// grants nothing beyond what any member may do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "project_role", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ProjectRole {
    Admin,
    ProjectAdmin,
    Member,
}

/// Only project admins
pub const ADMIN_ONLY: &[ProjectRole] = &[ProjectRole::Admin];

/// Admins and plain members (not `project_admin`)
pub const ADMIN_OR_MEMBER: &[ProjectRole] = &[ProjectRole::Admin, ProjectRole::Member];

/// Any membership at all
pub const ANY_MEMBER: &[ProjectRole] = &[];

impl ProjectRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProjectRole::Admin => "admin",
            ProjectRole::ProjectAdmin => "project_admin",
            ProjectRole::Member => "member",
        }
    }

    /// Checks this role against the set an operation requires
    ///
    /// An empty `required` set means membership alone is enough.
    pub fn allows(&self, required: &[ProjectRole]) -> bool {
        required.is_empty() || required.contains(self)
    }
}

impl Default for ProjectRole {
    fn default() -> Self {
        ProjectRole::Member
    }
}

impl fmt::Display for ProjectRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an unknown role name
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid project role: {0}")]
pub struct InvalidRole(pub String);

impl FromStr for ProjectRole {
    type Err = InvalidRole;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "admin" => Ok(ProjectRole::Admin),
            "project_admin" => Ok(ProjectRole::ProjectAdmin),
            "member" => Ok(ProjectRole::Member),
            other => Err(InvalidRole(other.to_string())),
        }
    }
}

/// Errors from membership registry operations
#[derive(Debug, thiserror::Error)]
pub enum MembershipError {
    /// Membership absent, or belongs to a different project
    #[error("Member not found in this project")]
    NotFound,

    #[error("User not found")]
    UserNotFound,

    #[error("User is already a member of this project")]
    AlreadyMember,

    #[error("Cannot add an unverified user")]
    UserNotVerified,

    /// The change would leave the project without an admin
    #[error("A project must keep at least one admin")]
    LastAdmin,

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Membership edge
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Membership {
    pub id: Uuid,
    pub user_id: Uuid,
    pub project_id: Uuid,
    pub role: ProjectRole,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Input for adding a member to a project
#[derive(Debug, Clone)]
pub struct AddMember {
    pub project_id: Uuid,
    pub user_id: Uuid,
    pub role: ProjectRole,
}

/// A project member joined with their public user details
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct MemberDetails {
    pub membership_id: Uuid,
    pub user_id: Uuid,
    pub username: String,
    pub fullname: Option<String>,
    pub email: String,
    pub role: ProjectRole,
    pub joined_at: DateTime<Utc>,
}

/// Checks the last-admin invariant for a pending change
///
/// `next` is the role the membership will hold afterwards, or `None` when the
/// membership is being removed. `admin_count` is the number of admins on the
/// project before the change.
///
/// # Errors
///
/// [`MembershipError::LastAdmin`] when the membership is an admin, stops
/// being one, and is the only admin left.
pub fn ensure_admin_remains(
    current: ProjectRole,
    next: Option<ProjectRole>,
    admin_count: i64,
) -> Result<(), MembershipError> {
    let loses_admin = current == ProjectRole::Admin && next != Some(ProjectRole::Admin);

    if loses_admin && admin_count <= 1 {
        return Err(MembershipError::LastAdmin);
    }

    Ok(())
}

impl Membership {
    /// Inserts a membership edge without any precondition checks
    ///
    /// Used when creating a project (creator becomes admin). Use
    /// [`Membership::add`] for adding collaborators.
    pub async fn create<'e, E>(executor: E, data: AddMember) -> Result<Self, sqlx::Error>
    where
        E: PgExecutor<'e>,
    {
        let membership = sqlx::query_as::<_, Membership>(
            r#"
            INSERT INTO project_members (project_id, user_id, role)
            VALUES ($1, $2, $3)
            RETURNING *
            "#,
        )
        .bind(data.project_id)
        .bind(data.user_id)
        .bind(data.role)
        .fetch_one(executor)
        .await?;

        Ok(membership)
    }

    /// Adds a user to a project
    ///
    /// # Errors
    ///
    /// - [`MembershipError::UserNotFound`] if the user does not exist
    /// - [`MembershipError::UserNotVerified`] if the user has not verified
    ///   their email
    /// - [`MembershipError::AlreadyMember`] if the edge already exists; this
    ///   comes from the unique constraint, so concurrent adds are safe
    pub async fn add(pool: &PgPool, data: AddMember) -> Result<Self, MembershipError> {
        let user = User::find_by_id(pool, data.user_id)
            .await?
            .ok_or(MembershipError::UserNotFound)?;

        if !user.is_email_verified {
            return Err(MembershipError::UserNotVerified);
        }

        let membership = Self::create(pool, data).await.map_err(|e| {
            if violated_constraint(&e) == Some(MEMBERSHIP_UNIQUE_CONSTRAINT) {
                MembershipError::AlreadyMember
            } else {
                MembershipError::Database(e)
            }
        })?;

        info!(
            project_id = %membership.project_id,
            user_id = %membership.user_id,
            role = %membership.role,
            "Member added to project"
        );

        Ok(membership)
    }

    /// Finds the membership a user holds on a project
    pub async fn find_for_user<'e, E>(
        executor: E,
        project_id: Uuid,
        user_id: Uuid,
    ) -> Result<Option<Self>, sqlx::Error>
    where
        E: PgExecutor<'e>,
    {
        let membership = sqlx::query_as::<_, Membership>(
            "SELECT * FROM project_members WHERE project_id = $1 AND user_id = $2",
        )
        .bind(project_id)
        .bind(user_id)
        .fetch_optional(executor)
        .await?;

        Ok(membership)
    }

    /// Finds a membership by id, scoped to a project
    ///
    /// A membership id that belongs to another project is reported as absent.
    pub async fn find_in_project<'e, E>(
        executor: E,
        project_id: Uuid,
        membership_id: Uuid,
    ) -> Result<Option<Self>, sqlx::Error>
    where
        E: PgExecutor<'e>,
    {
        let membership = sqlx::query_as::<_, Membership>(
            "SELECT * FROM project_members WHERE id = $1 AND project_id = $2",
        )
        .bind(membership_id)
        .bind(project_id)
        .fetch_optional(executor)
        .await?;

        Ok(membership)
    }

    /// Locks a user's membership row in shared mode
    ///
    /// Returns `None` if the user is not a member. Held until the surrounding
    /// transaction ends, which blocks a concurrent removal (it takes the row
    /// `FOR UPDATE`) from racing an assignment.
    pub async fn lock_for_share<'e, E>(
        executor: E,
        project_id: Uuid,
        user_id: Uuid,
    ) -> Result<Option<Uuid>, sqlx::Error>
    where
        E: PgExecutor<'e>,
    {
        let id: Option<(Uuid,)> = sqlx::query_as(
            r#"
            SELECT id FROM project_members
            WHERE project_id = $1 AND user_id = $2
            FOR SHARE
            "#,
        )
        .bind(project_id)
        .bind(user_id)
        .fetch_optional(executor)
        .await?;

        Ok(id.map(|(id,)| id))
    }

    /// Locks a membership row (scoped to its project) for update
    pub async fn lock_for_update<'e, E>(
        executor: E,
        project_id: Uuid,
        membership_id: Uuid,
    ) -> Result<Option<Self>, sqlx::Error>
    where
        E: PgExecutor<'e>,
    {
        let membership = sqlx::query_as::<_, Membership>(
            r#"
            SELECT * FROM project_members
            WHERE id = $1 AND project_id = $2
            FOR UPDATE
            "#,
        )
        .bind(membership_id)
        .bind(project_id)
        .fetch_optional(executor)
        .await?;

        Ok(membership)
    }

    /// Changes a member's role, guarding the last-admin invariant
    ///
    /// Runs in its own transaction. The project row is locked first, so every
    /// role change and removal on the same project is serialized and the
    /// admin count read here cannot be stale.
    ///
    /// # Errors
    ///
    /// - [`MembershipError::NotFound`] if the project or membership is absent,
    ///   or the membership belongs to another project
    /// - [`MembershipError::LastAdmin`] if this would demote the only admin
    pub async fn update_role(
        pool: &PgPool,
        project_id: Uuid,
        membership_id: Uuid,
        new_role: ProjectRole,
    ) -> Result<Self, MembershipError> {
        let mut tx = pool.begin().await?;

        Project::lock_for_update(&mut *tx, project_id)
            .await?
            .ok_or(MembershipError::NotFound)?;

        let current = Self::lock_for_update(&mut *tx, project_id, membership_id)
            .await?
            .ok_or(MembershipError::NotFound)?;

        let admins = Self::count_by_project_and_role(&mut *tx, project_id, ProjectRole::Admin).await?;
        ensure_admin_remains(current.role, Some(new_role), admins)?;

        let updated = sqlx::query_as::<_, Membership>(
            r#"
            UPDATE project_members
            SET role = $3, updated_at = NOW()
            WHERE id = $1 AND project_id = $2
            RETURNING *
            "#,
        )
        .bind(membership_id)
        .bind(project_id)
        .bind(new_role)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;

        info!(
            project_id = %project_id,
            membership_id = %membership_id,
            from = %current.role,
            to = %new_role,
            "Member role updated"
        );

        Ok(updated)
    }

    /// Deletes a membership row (scoped to its project)
    ///
    /// No invariant checks; see [`crate::cascade::remove_member`].
    pub async fn delete<'e, E>(
        executor: E,
        project_id: Uuid,
        membership_id: Uuid,
    ) -> Result<bool, sqlx::Error>
    where
        E: PgExecutor<'e>,
    {
        let result = sqlx::query("DELETE FROM project_members WHERE id = $1 AND project_id = $2")
            .bind(membership_id)
            .bind(project_id)
            .execute(executor)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Lists the members of a project with their user details
    pub async fn list_by_project<'e, E>(
        executor: E,
        project_id: Uuid,
    ) -> Result<Vec<MemberDetails>, sqlx::Error>
    where
        E: PgExecutor<'e>,
    {
        let members = sqlx::query_as::<_, MemberDetails>(
            r#"
            SELECT pm.id AS membership_id, u.id AS user_id, u.username, u.fullname, u.email,
                   pm.role, pm.created_at AS joined_at
            FROM project_members pm
            JOIN users u ON u.id = pm.user_id
            WHERE pm.project_id = $1
            ORDER BY pm.created_at ASC
            "#,
        )
        .bind(project_id)
        .fetch_all(executor)
        .await?;

        Ok(members)
    }

    /// Lists all memberships held by a user
    pub async fn list_by_user<'e, E>(executor: E, user_id: Uuid) -> Result<Vec<Self>, sqlx::Error>
    where
        E: PgExecutor<'e>,
    {
        let memberships = sqlx::query_as::<_, Membership>(
            "SELECT * FROM project_members WHERE user_id = $1 ORDER BY created_at DESC",
        )
        .bind(user_id)
        .fetch_all(executor)
        .await?;

        Ok(memberships)
    }

    /// Counts the members of a project holding a given role
    pub async fn count_by_project_and_role<'e, E>(
        executor: E,
        project_id: Uuid,
        role: ProjectRole,
    ) -> Result<i64, sqlx::Error>
    where
        E: PgExecutor<'e>,
    {
        let (count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM project_members WHERE project_id = $1 AND role = $2",
        )
        .bind(project_id)
        .bind(role)
        .fetch_one(executor)
        .await?;

        Ok(count)
    }
}
