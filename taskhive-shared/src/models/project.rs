//! Project model and database operations
//!
//! A project is the root of the containment tree: memberships, tasks and
//! notes hang off it, subtasks hang off tasks. Projects are only deleted
//! through [`crate::cascade::delete_project`].
//!
//! # Schema
//!
//! ```sql
//! CREATE TABLE projects (
//!     id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
//!     name VARCHAR(255) NOT NULL,              -- projects_name_key UNIQUE
//!     description TEXT,
//!     created_by UUID NOT NULL REFERENCES users (id),
//!     created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
//!     updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
//! );
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{PgExecutor, PgPool};
use tracing::info;
use uuid::Uuid;

use super::membership::{AddMember, Membership, ProjectRole};

/// Name of the unique constraint on `projects.name`
pub const NAME_UNIQUE_CONSTRAINT: &str = "projects_name_key";

/// Project record
///
/// `created_by` is informational. The creator's access comes from the admin
/// membership created alongside the project, not from this field.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Project {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub created_by: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Input for creating a project
#[derive(Debug, Clone)]
pub struct CreateProject {
    pub name: String,
    pub description: Option<String>,
    pub created_by: Uuid,
}

/// Input for updating a project; `None` fields are left unchanged
#[derive(Debug, Clone, Default)]
pub struct UpdateProject {
    pub name: Option<String>,
    pub description: Option<String>,
}

/// A project as seen by one of its members
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct ProjectListing {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub created_by: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,

    /// The viewing user's role
    pub role: ProjectRole,

    pub member_count: i64,
}

impl Project {
    /// Creates a project and makes its creator the first admin
    ///
    /// Both rows are written in one transaction, so a project never exists
    /// without an admin.
    ///
    /// # Errors
    ///
    /// Returns a database error carrying [`NAME_UNIQUE_CONSTRAINT`] when the
    /// (trimmed) name is already taken.
    pub async fn create_with_admin(
        pool: &PgPool,
        data: CreateProject,
    ) -> Result<(Self, Membership), sqlx::Error> {
        let mut tx = pool.begin().await?;

        let project = sqlx::query_as::<_, Project>(
            r#"
            INSERT INTO projects (name, description, created_by)
            VALUES ($1, $2, $3)
            RETURNING *
            "#,
        )
        .bind(data.name.trim())
        .bind(data.description)
        .bind(data.created_by)
        .fetch_one(&mut *tx)
        .await?;

        let membership = Membership::create(
            &mut *tx,
            AddMember {
                project_id: project.id,
                user_id: data.created_by,
                role: ProjectRole::Admin,
            },
        )
        .await?;

        tx.commit().await?;

        info!(project_id = %project.id, created_by = %project.created_by, "Project created");

        Ok((project, membership))
    }

    /// Finds a project by ID
    pub async fn find_by_id<'e, E>(executor: E, id: Uuid) -> Result<Option<Self>, sqlx::Error>
    where
        E: PgExecutor<'e>,
    {
        let project = sqlx::query_as::<_, Project>("SELECT * FROM projects WHERE id = $1")
            .bind(id)
            .fetch_optional(executor)
            .await?;

        Ok(project)
    }

    /// Locks the project row for the rest of the transaction
    ///
    /// Every operation that can reduce the number of admins takes this lock
    /// first. Returns `None` if the project does not exist.
    pub async fn lock_for_update<'e, E>(executor: E, id: Uuid) -> Result<Option<Uuid>, sqlx::Error>
    where
        E: PgExecutor<'e>,
    {
        let row: Option<(Uuid,)> = sqlx::query_as("SELECT id FROM projects WHERE id = $1 FOR UPDATE")
            .bind(id)
            .fetch_optional(executor)
            .await?;

        Ok(row.map(|(id,)| id))
    }

    /// Locks the project row in key-share mode
    ///
    /// This is the lock an insert referencing the project takes anyway.
    /// Writers that also lock a membership row take this one first, so they
    /// queue behind [`Project::lock_for_update`] in the same order as member
    /// removal does. Returns `None` if the project does not exist.
    pub async fn lock_for_key_share<'e, E>(executor: E, id: Uuid) -> Result<Option<Uuid>, sqlx::Error>
    where
        E: PgExecutor<'e>,
    {
        let row: Option<(Uuid,)> = sqlx::query_as("SELECT id FROM projects WHERE id = $1 FOR KEY SHARE")
            .bind(id)
            .fetch_optional(executor)
            .await?;

        Ok(row.map(|(id,)| id))
    }

    /// Updates name and/or description
    ///
    /// Returns `None` if the project does not exist.
    pub async fn update<'e, E>(
        executor: E,
        id: Uuid,
        data: UpdateProject,
    ) -> Result<Option<Self>, sqlx::Error>
    where
        E: PgExecutor<'e>,
    {
        let project = sqlx::query_as::<_, Project>(
            r#"
            UPDATE projects
            SET name = COALESCE($2, name),
                description = COALESCE($3, description),
                updated_at = NOW()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(data.name.as_deref().map(str::trim))
        .bind(data.description)
        .fetch_optional(executor)
        .await?;

        Ok(project)
    }

    /// Lists the projects a user is a member of, with their role
    pub async fn list_for_user<'e, E>(
        executor: E,
        user_id: Uuid,
    ) -> Result<Vec<ProjectListing>, sqlx::Error>
    where
        E: PgExecutor<'e>,
    {
        let projects = sqlx::query_as::<_, ProjectListing>(
            r#"
            SELECT p.id, p.name, p.description, p.created_by, p.created_at, p.updated_at,
                   pm.role,
                   (SELECT COUNT(*) FROM project_members c WHERE c.project_id = p.id) AS member_count
            FROM project_members pm
            JOIN projects p ON p.id = pm.project_id
            WHERE pm.user_id = $1
            ORDER BY p.created_at DESC
            "#,
        )
        .bind(user_id)
        .fetch_all(executor)
        .await?;

        Ok(projects)
    }
}
