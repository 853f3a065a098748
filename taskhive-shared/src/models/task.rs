//! Task model and database operations
//!
//! Tasks belong to exactly one project and every query here is scoped by
//! `project_id`. A task id paired with the wrong project matches nothing and
//! surfaces as "not found".
//!
//! # Status
//!
//! ```text
//! todo | in_process | done
//! ```
//!
//! There is no enforced transition order; any value may be set directly.
//!
//! # Schema
//!
//! ```sql
//! CREATE TYPE task_status AS ENUM ('todo', 'in_process', 'done');
//!
//! CREATE TABLE tasks (
//!     id UUID PRIMARY KEY DEFAULT gen_random_uuid(),
//!     project_id UUID NOT NULL REFERENCES projects (id),
//!     title VARCHAR(255) NOT NULL,
//!     description TEXT,
//!     assigned_to UUID REFERENCES users (id),
//!     assigned_by UUID REFERENCES users (id),
//!     status task_status NOT NULL DEFAULT 'todo',
//!     attachments JSONB NOT NULL DEFAULT '[]'::jsonb,
//!     created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
//!     updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
//! );
//! ```

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use sqlx::{PgExecutor, PgPool};
use uuid::Uuid;

use super::membership::Membership;
use super::project::Project;

/// Task status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "task_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    #[default]
    Todo,
    InProcess,
    Done,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Todo => "todo",
            TaskStatus::InProcess => "in_process",
            TaskStatus::Done => "done",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an unknown status name
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid task status: {0}")]
pub struct InvalidStatus(pub String);

impl FromStr for TaskStatus {
    type Err = InvalidStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "todo" => Ok(TaskStatus::Todo),
            "in_process" => Ok(TaskStatus::InProcess),
            "done" => Ok(TaskStatus::Done),
            other => Err(InvalidStatus(other.to_string())),
        }
    }
}

/// File attached to a task, stored in the blob store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    pub id: Uuid,
    pub url: String,

    /// Identifier used to delete the blob from the store
    pub external_id: String,

    pub mimetype: String,
    pub size: i64,
}

/// Errors from task operations that carry domain preconditions
#[derive(Debug, thiserror::Error)]
pub enum TaskError {
    #[error("Task not found in this project")]
    NotFound,

    /// Project deleted while the write was pending
    #[error("Project not found")]
    ProjectNotFound,

    /// Assignee does not hold a membership on the task's project
    #[error("Assignee must be a member of this project")]
    AssigneeNotMember,

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Task record
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Task {
    pub id: Uuid,
    pub project_id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub assigned_to: Option<Uuid>,
    pub assigned_by: Option<Uuid>,
    pub status: TaskStatus,
    pub attachments: Json<Vec<Attachment>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A task in a project listing, with assignee details and subtask count
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct TaskSummary {
    #[sqlx(flatten)]
    #[serde(flatten)]
    pub task: Task,

    pub assignee_username: Option<String>,
    pub assignee_email: Option<String>,
    pub subtask_count: i64,
}

/// Input for creating a task
#[derive(Debug, Clone)]
pub struct CreateTask {
    pub project_id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub assigned_to: Option<Uuid>,
    pub assigned_by: Uuid,
    pub status: TaskStatus,
}

/// Input for updating a task; `None` fields are left unchanged
#[derive(Debug, Clone, Default)]
pub struct UpdateTask {
    pub title: Option<String>,
    pub description: Option<String>,
    pub status: Option<TaskStatus>,
}

impl Task {
    /// Looks up an attachment on this task by id
    pub fn attachment(&self, attachment_id: Uuid) -> Option<&Attachment> {
        self.attachments.iter().find(|a| a.id == attachment_id)
    }

    /// Creates a task
    ///
    /// The project row is locked in key-share mode first, then the
    /// assignee's membership row in shared mode. Member removal locks the
    /// same two rows in the same order, so the two either serialize or this
    /// call waits for the removal and then fails. A removal that waits on
    /// this call sees the new task and unassigns it.
    ///
    /// # Errors
    ///
    /// - [`TaskError::AssigneeNotMember`] if `assigned_to` is not a member of
    ///   the project. Nothing is written in that case.
    /// - [`TaskError::ProjectNotFound`] if the project is gone
    pub async fn create(pool: &PgPool, data: CreateTask) -> Result<Self, TaskError> {
        let mut tx = pool.begin().await?;

        Project::lock_for_key_share(&mut *tx, data.project_id)
            .await?
            .ok_or(TaskError::ProjectNotFound)?;

        if let Some(assignee) = data.assigned_to {
            Membership::lock_for_share(&mut *tx, data.project_id, assignee)
                .await?
                .ok_or(TaskError::AssigneeNotMember)?;
        }

        let task = sqlx::query_as::<_, Task>(
            r#"
            INSERT INTO tasks (project_id, title, description, assigned_to, assigned_by, status)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING *
            "#,
        )
        .bind(data.project_id)
        .bind(data.title.trim())
        .bind(data.description)
        .bind(data.assigned_to)
        .bind(data.assigned_by)
        .bind(data.status)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(task)
    }

    /// Finds a task by id within a project
    pub async fn find_in_project<'e, E>(
        executor: E,
        project_id: Uuid,
        task_id: Uuid,
    ) -> Result<Option<Self>, sqlx::Error>
    where
        E: PgExecutor<'e>,
    {
        let task = sqlx::query_as::<_, Task>("SELECT * FROM tasks WHERE id = $1 AND project_id = $2")
            .bind(task_id)
            .bind(project_id)
            .fetch_optional(executor)
            .await?;

        Ok(task)
    }

    /// Finds and locks a task row for the rest of the transaction
    ///
    /// Blocks concurrent subtask inserts and attachment updates on this task
    /// until the transaction ends.
    pub async fn lock_for_update<'e, E>(
        executor: E,
        project_id: Uuid,
        task_id: Uuid,
    ) -> Result<Option<Self>, sqlx::Error>
    where
        E: PgExecutor<'e>,
    {
        let task = sqlx::query_as::<_, Task>(
            "SELECT * FROM tasks WHERE id = $1 AND project_id = $2 FOR UPDATE",
        )
        .bind(task_id)
        .bind(project_id)
        .fetch_optional(executor)
        .await?;

        Ok(task)
    }

    /// Lists a project's tasks, newest first
    pub async fn list_by_project<'e, E>(
        executor: E,
        project_id: Uuid,
    ) -> Result<Vec<TaskSummary>, sqlx::Error>
    where
        E: PgExecutor<'e>,
    {
        let tasks = sqlx::query_as::<_, TaskSummary>(
            r#"
            SELECT t.*,
                   u.username AS assignee_username,
                   u.email AS assignee_email,
                   (SELECT COUNT(*) FROM subtasks s WHERE s.task_id = t.id) AS subtask_count
            FROM tasks t
            LEFT JOIN users u ON u.id = t.assigned_to
            WHERE t.project_id = $1
            ORDER BY t.created_at DESC
            "#,
        )
        .bind(project_id)
        .fetch_all(executor)
        .await?;

        Ok(tasks)
    }

    /// Updates title, description and/or status
    pub async fn update<'e, E>(
        executor: E,
        project_id: Uuid,
        task_id: Uuid,
        data: UpdateTask,
    ) -> Result<Option<Self>, sqlx::Error>
    where
        E: PgExecutor<'e>,
    {
        let task = sqlx::query_as::<_, Task>(
            r#"
            UPDATE tasks
            SET title = COALESCE($3, title),
                description = COALESCE($4, description),
                status = COALESCE($5, status),
                updated_at = NOW()
            WHERE id = $1 AND project_id = $2
            RETURNING *
            "#,
        )
        .bind(task_id)
        .bind(project_id)
        .bind(data.title.as_deref().map(str::trim))
        .bind(data.description)
        .bind(data.status)
        .fetch_optional(executor)
        .await?;

        Ok(task)
    }

    /// Sets the status directly
    pub async fn update_status<'e, E>(
        executor: E,
        project_id: Uuid,
        task_id: Uuid,
        status: TaskStatus,
    ) -> Result<Option<Self>, sqlx::Error>
    where
        E: PgExecutor<'e>,
    {
        let task = sqlx::query_as::<_, Task>(
            r#"
            UPDATE tasks
            SET status = $3, updated_at = NOW()
            WHERE id = $1 AND project_id = $2
            RETURNING *
            "#,
        )
        .bind(task_id)
        .bind(project_id)
        .bind(status)
        .fetch_optional(executor)
        .await?;

        Ok(task)
    }

    /// Assigns (or, with `None`, unassigns) a task
    ///
    /// Uses the same membership locking as [`Task::create`].
    ///
    /// # Errors
    ///
    /// - [`TaskError::AssigneeNotMember`] if the assignee is not a member
    /// - [`TaskError::NotFound`] if the task is not in the project
    /// - [`TaskError::ProjectNotFound`] if the project is gone
    pub async fn assign(
        pool: &PgPool,
        project_id: Uuid,
        task_id: Uuid,
        assignee: Option<Uuid>,
        assigned_by: Uuid,
    ) -> Result<Self, TaskError> {
        let mut tx = pool.begin().await?;

        Project::lock_for_key_share(&mut *tx, project_id)
            .await?
            .ok_or(TaskError::ProjectNotFound)?;

        if let Some(user_id) = assignee {
            Membership::lock_for_share(&mut *tx, project_id, user_id)
                .await?
                .ok_or(TaskError::AssigneeNotMember)?;
        }

        let task = sqlx::query_as::<_, Task>(
            r#"
            UPDATE tasks
            SET assigned_to = $3, assigned_by = $4, updated_at = NOW()
            WHERE id = $1 AND project_id = $2
            RETURNING *
            "#,
        )
        .bind(task_id)
        .bind(project_id)
        .bind(assignee)
        .bind(assigned_by)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(TaskError::NotFound)?;

        tx.commit().await?;

        Ok(task)
    }

    /// Clears the assignee on every task in a project assigned to `user_id`
    ///
    /// Returns the number of tasks unassigned.
    pub async fn unassign_user<'e, E>(
        executor: E,
        project_id: Uuid,
        user_id: Uuid,
    ) -> Result<u64, sqlx::Error>
    where
        E: PgExecutor<'e>,
    {
        let result = sqlx::query(
            r#"
            UPDATE tasks
            SET assigned_to = NULL, updated_at = NOW()
            WHERE project_id = $1 AND assigned_to = $2
            "#,
        )
        .bind(project_id)
        .bind(user_id)
        .execute(executor)
        .await?;

        Ok(result.rows_affected())
    }

    /// Appends attachments to a task
    pub async fn add_attachments<'e, E>(
        executor: E,
        project_id: Uuid,
        task_id: Uuid,
        attachments: &[Attachment],
    ) -> Result<Option<Self>, sqlx::Error>
    where
        E: PgExecutor<'e>,
    {
        let task = sqlx::query_as::<_, Task>(
            r#"
            UPDATE tasks
            SET attachments = attachments || $3::jsonb, updated_at = NOW()
            WHERE id = $1 AND project_id = $2
            RETURNING *
            "#,
        )
        .bind(task_id)
        .bind(project_id)
        .bind(Json(attachments))
        .fetch_optional(executor)
        .await?;

        Ok(task)
    }

    /// Removes one attachment entry from a task
    ///
    /// Does not touch the blob store.
    pub async fn remove_attachment<'e, E>(
        executor: E,
        project_id: Uuid,
        task_id: Uuid,
        attachment_id: Uuid,
    ) -> Result<Option<Self>, sqlx::Error>
    where
        E: PgExecutor<'e>,
    {
        let task = sqlx::query_as::<_, Task>(
            r#"
            UPDATE tasks
            SET attachments = COALESCE(
                    (SELECT jsonb_agg(elem)
                     FROM jsonb_array_elements(attachments) AS elem
                     WHERE elem->>'id' <> $3),
                    '[]'::jsonb),
                updated_at = NOW()
            WHERE id = $1 AND project_id = $2
            RETURNING *
            "#,
        )
        .bind(task_id)
        .bind(project_id)
        .bind(attachment_id.to_string())
        .fetch_optional(executor)
        .await?;

        Ok(task)
    }

    /// Deletes a task row (scoped to its project)
    ///
    /// Subtasks must already be gone; see [`crate::cascade::delete_task`].
    pub async fn delete<'e, E>(executor: E, project_id: Uuid, task_id: Uuid) -> Result<bool, sqlx::Error>
    where
        E: PgExecutor<'e>,
    {
        let result = sqlx::query("DELETE FROM tasks WHERE id = $1 AND project_id = $2")
            .bind(task_id)
            .bind(project_id)
            .execute(executor)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_parse_and_display() {
        assert_eq!("todo".parse::<TaskStatus>().unwrap(), TaskStatus::Todo);
        assert_eq!("in_process".parse::<TaskStatus>().unwrap(), TaskStatus::InProcess);
        assert_eq!("done".parse::<TaskStatus>().unwrap(), TaskStatus::Done);
        assert!("in_progress".parse::<TaskStatus>().is_err());

        assert_eq!(TaskStatus::InProcess.to_string(), "in_process");
    }

    #[test]
    fn test_status_defaults_to_todo() {
        assert_eq!(TaskStatus::default(), TaskStatus::Todo);
    }

    #[test]
    fn test_status_serde() {
        let status: TaskStatus = serde_json::from_str("\"in_process\"").unwrap();
        assert_eq!(status, TaskStatus::InProcess);
        assert!(serde_json::from_str::<TaskStatus>("\"archived\"").is_err());
    }

    #[test]
    fn test_attachment_lookup() {
        let keep = Attachment {
            id: Uuid::new_v4(),
            url: "http://localhost/uploads/a.png".to_string(),
            external_id: "a.png".to_string(),
            mimetype: "image/png".to_string(),
            size: 42,
        };
        let now = Utc::now();
        let task = Task {
            id: Uuid::new_v4(),
            project_id: Uuid::new_v4(),
            title: "Ship it".to_string(),
            description: None,
            assigned_to: None,
            assigned_by: None,
            status: TaskStatus::Todo,
            attachments: Json(vec![keep.clone()]),
            created_at: now,
            updated_at: now,
        };

        assert_eq!(task.attachment(keep.id), Some(&keep));
        assert_eq!(task.attachment(Uuid::new_v4()), None);

        // Attachments serialize as a plain array
        let json = serde_json::to_value(&task).unwrap();
        assert_eq!(json["attachments"][0]["external_id"], "a.png");
    }
}
