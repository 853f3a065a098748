//! Subtask model and database operations
//!
//! Subtasks reference their task directly and their project only through it.
//! Every query here joins through `tasks` and filters on both `task_id` and
//! `project_id`, so a task from another project never matches.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgExecutor;
use uuid::Uuid;

/// Subtask record
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Subtask {
    pub id: Uuid,
    pub task_id: Uuid,
    pub title: String,
    pub is_completed: bool,
    pub created_by: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Input for creating a subtask
#[derive(Debug, Clone)]
pub struct CreateSubtask {
    pub project_id: Uuid,
    pub task_id: Uuid,
    pub title: String,
    pub is_completed: bool,
    pub created_by: Uuid,
}

/// Input for updating a subtask; `None` fields are left unchanged
#[derive(Debug, Clone, Default)]
pub struct UpdateSubtask {
    pub title: Option<String>,
    pub is_completed: Option<bool>,
}

impl Subtask {
    /// Creates a subtask under a task of the given project
    ///
    /// Returns `None` (and inserts nothing) if the task is not in the project.
    /// The parent row is read `FOR KEY SHARE`, so an insert racing a task
    /// delete waits for it and then inserts nothing.
    pub async fn create<'e, E>(executor: E, data: CreateSubtask) -> Result<Option<Self>, sqlx::Error>
    where
        E: PgExecutor<'e>,
    {
        let subtask = sqlx::query_as::<_, Subtask>(
            r#"
            INSERT INTO subtasks (task_id, title, is_completed, created_by)
            SELECT t.id, $3, $4, $5
            FROM tasks t
            WHERE t.id = $1 AND t.project_id = $2
            FOR KEY SHARE OF t
            RETURNING *
            "#,
        )
        .bind(data.task_id)
        .bind(data.project_id)
        .bind(data.title.trim())
        .bind(data.is_completed)
        .bind(data.created_by)
        .fetch_optional(executor)
        .await?;

        Ok(subtask)
    }

    /// Lists the subtasks of a task, oldest first
    pub async fn list_by_task<'e, E>(
        executor: E,
        project_id: Uuid,
        task_id: Uuid,
    ) -> Result<Vec<Self>, sqlx::Error>
    where
        E: PgExecutor<'e>,
    {
        let subtasks = sqlx::query_as::<_, Subtask>(
            r#"
            SELECT s.*
            FROM subtasks s
            JOIN tasks t ON t.id = s.task_id
            WHERE s.task_id = $1 AND t.project_id = $2
            ORDER BY s.created_at ASC
            "#,
        )
        .bind(task_id)
        .bind(project_id)
        .fetch_all(executor)
        .await?;

        Ok(subtasks)
    }

    /// Updates title and/or completion flag
    pub async fn update<'e, E>(
        executor: E,
        project_id: Uuid,
        task_id: Uuid,
        subtask_id: Uuid,
        data: UpdateSubtask,
    ) -> Result<Option<Self>, sqlx::Error>
    where
        E: PgExecutor<'e>,
    {
        let subtask = sqlx::query_as::<_, Subtask>(
            r#"
            UPDATE subtasks s
            SET title = COALESCE($4, s.title),
                is_completed = COALESCE($5, s.is_completed),
                updated_at = NOW()
            FROM tasks t
            WHERE s.id = $1 AND s.task_id = $2
              AND t.id = s.task_id AND t.project_id = $3
            RETURNING s.*
            "#,
        )
        .bind(subtask_id)
        .bind(task_id)
        .bind(project_id)
        .bind(data.title.as_deref().map(str::trim))
        .bind(data.is_completed)
        .fetch_optional(executor)
        .await?;

        Ok(subtask)
    }

    /// Flips the completion flag
    pub async fn toggle<'e, E>(
        executor: E,
        project_id: Uuid,
        task_id: Uuid,
        subtask_id: Uuid,
    ) -> Result<Option<Self>, sqlx::Error>
    where
        E: PgExecutor<'e>,
    {
        let subtask = sqlx::query_as::<_, Subtask>(
            r#"
            UPDATE subtasks s
            SET is_completed = NOT s.is_completed, updated_at = NOW()
            FROM tasks t
            WHERE s.id = $1 AND s.task_id = $2
              AND t.id = s.task_id AND t.project_id = $3
            RETURNING s.*
            "#,
        )
        .bind(subtask_id)
        .bind(task_id)
        .bind(project_id)
        .fetch_optional(executor)
        .await?;

        Ok(subtask)
    }

    /// Deletes a subtask
    pub async fn delete<'e, E>(
        executor: E,
        project_id: Uuid,
        task_id: Uuid,
        subtask_id: Uuid,
    ) -> Result<bool, sqlx::Error>
    where
        E: PgExecutor<'e>,
    {
        let result = sqlx::query(
            r#"
            DELETE FROM subtasks s
            USING tasks t
            WHERE s.id = $1 AND s.task_id = $2
              AND t.id = s.task_id AND t.project_id = $3
            "#,
        )
        .bind(subtask_id)
        .bind(task_id)
        .bind(project_id)
        .execute(executor)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Deletes every subtask of a task
    pub async fn delete_by_task<'e, E>(executor: E, task_id: Uuid) -> Result<u64, sqlx::Error>
    where
        E: PgExecutor<'e>,
    {
        let result = sqlx::query("DELETE FROM subtasks WHERE task_id = $1")
            .bind(task_id)
            .execute(executor)
            .await?;

        Ok(result.rows_affected())
    }

    /// Counts the subtasks of a task
    pub async fn count_by_task<'e, E>(executor: E, task_id: Uuid) -> Result<i64, sqlx::Error>
    where
        E: PgExecutor<'e>,
    {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM subtasks WHERE task_id = $1")
            .bind(task_id)
            .fetch_one(executor)
            .await?;

        Ok(count)
    }
}
