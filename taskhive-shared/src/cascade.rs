//! Multi-record deletions
//!
//! Foreign keys in the schema do not cascade. Instead, the operations here
//! delete children before parents, so no row ever points at a vanished
//! parent.
//!
//! - [`delete_project`]: subtasks, tasks, notes, memberships, then the
//!   project, in one transaction
//! - [`remove_member`]: last-admin check, task unassignment and membership
//!   delete, in one transaction
//! - [`delete_task`]: subtasks and the task in one transaction, then
//!   attachment blobs (best-effort)
//!
//! Any error inside a transaction drops it uncommitted, which rolls back
//! every staged delete. Callers see either the whole effect or none of it.
//! Blob deletes cannot be rolled back, so they run after the commit and
//! never fail the operation.

use futures::future::join_all;
use serde::Serialize;
use sqlx::PgPool;
use tracing::{info, warn};
use uuid::Uuid;

use crate::models::membership::{ensure_admin_remains, Membership, MembershipError, ProjectRole};
use crate::models::project::Project;
use crate::models::subtask::Subtask;
use crate::models::task::Task;
use crate::storage::BlobStore;

#[derive(Debug, thiserror::Error)]
pub enum CascadeError {
    #[error("Project not found")]
    ProjectNotFound,

    #[error("Task not found in this project")]
    TaskNotFound,

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// What a project deletion removed
#[derive(Debug, Clone, Serialize)]
pub struct ProjectDeletion {
    pub project: Project,
    pub tasks: u64,
    pub subtasks: u64,
    pub notes: u64,
    pub memberships: u64,
}

/// What a member removal changed
#[derive(Debug, Clone, Serialize)]
pub struct MemberRemoval {
    pub membership: Membership,

    /// Tasks in the project that were assigned to the removed user
    pub unassigned_tasks: u64,
}

/// What a task deletion removed
#[derive(Debug, Clone, Serialize)]
pub struct TaskDeletion {
    pub task: Task,
    pub subtasks: u64,
    pub attachments_failed: usize,
}

/// Deletes blobs concurrently, logging failures
///
/// Returns the number of deletes that failed.
pub async fn delete_blobs_best_effort(blobs: &dyn BlobStore, external_ids: &[String]) -> usize {
    let results = join_all(external_ids.iter().map(|id| blobs.delete(id))).await;

    let mut failed = 0;
    for (external_id, result) in external_ids.iter().zip(results) {
        if let Err(e) = result {
            failed += 1;
            warn!(
                backend = blobs.name(),
                external_id = %external_id,
                error = %e,
                "Failed to delete attachment blob"
            );
        }
    }

    failed
}

/// Deletes a project and everything it contains
///
/// The project row is locked first, so concurrent inserts of tasks or
/// members into this project wait and then fail their foreign key check
/// instead of leaving orphans.
///
/// # Errors
///
/// [`CascadeError::ProjectNotFound`] if the project does not exist. Nothing
/// is deleted in that case.
pub async fn delete_project(
    pool: &PgPool,
    blobs: &dyn BlobStore,
    project_id: Uuid,
) -> Result<ProjectDeletion, CascadeError> {
    let mut tx = pool.begin().await?;

    Project::lock_for_update(&mut *tx, project_id)
        .await?
        .ok_or(CascadeError::ProjectNotFound)?;

    let tasks = sqlx::query_as::<_, Task>("SELECT * FROM tasks WHERE project_id = $1")
        .bind(project_id)
        .fetch_all(&mut *tx)
        .await?;

    let task_ids: Vec<Uuid> = tasks.iter().map(|t| t.id).collect();
    let blob_ids: Vec<String> = tasks
        .iter()
        .flat_map(|t| t.attachments.iter().map(|a| a.external_id.clone()))
        .collect();

    let subtasks = sqlx::query("DELETE FROM subtasks WHERE task_id = ANY($1)")
        .bind(&task_ids)
        .execute(&mut *tx)
        .await?
        .rows_affected();

    let tasks_deleted = sqlx::query("DELETE FROM tasks WHERE project_id = $1")
        .bind(project_id)
        .execute(&mut *tx)
        .await?
        .rows_affected();

    let notes = sqlx::query("DELETE FROM notes WHERE project_id = $1")
        .bind(project_id)
        .execute(&mut *tx)
        .await?
        .rows_affected();

    let memberships = sqlx::query("DELETE FROM project_members WHERE project_id = $1")
        .bind(project_id)
        .execute(&mut *tx)
        .await?
        .rows_affected();

    let project = sqlx::query_as::<_, Project>("DELETE FROM projects WHERE id = $1 RETURNING *")
        .bind(project_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(CascadeError::ProjectNotFound)?;

    tx.commit().await?;

    info!(
        project_id = %project_id,
        tasks = tasks_deleted,
        subtasks,
        notes,
        memberships,
        "Project deleted"
    );

    delete_blobs_best_effort(blobs, &blob_ids).await;

    Ok(ProjectDeletion {
        project,
        tasks: tasks_deleted,
        subtasks,
        notes,
        memberships,
    })
}

/// Removes a member from a project
///
/// Locks the project row, then the membership row. Task creation and
/// assignment lock the same rows in the same order (key-share, then share),
/// so no task can be assigned to the user between the unassign and the
/// delete, and the two never deadlock.
///
/// # Errors
///
/// - [`MembershipError::NotFound`] if the membership does not exist or
///   belongs to another project
/// - [`MembershipError::LastAdmin`] if it is the project's only admin
pub async fn remove_member(
    pool: &PgPool,
    project_id: Uuid,
    membership_id: Uuid,
) -> Result<MemberRemoval, MembershipError> {
    let mut tx = pool.begin().await?;

    Project::lock_for_update(&mut *tx, project_id)
        .await?
        .ok_or(MembershipError::NotFound)?;

    let membership = Membership::lock_for_update(&mut *tx, project_id, membership_id)
        .await?
        .ok_or(MembershipError::NotFound)?;

    let admins = Membership::count_by_project_and_role(&mut *tx, project_id, ProjectRole::Admin).await?;
    ensure_admin_remains(membership.role, None, admins)?;

    let unassigned_tasks = Task::unassign_user(&mut *tx, project_id, membership.user_id).await?;

    if !Membership::delete(&mut *tx, project_id, membership_id).await? {
        return Err(MembershipError::NotFound);
    }

    tx.commit().await?;

    info!(
        project_id = %project_id,
        user_id = %membership.user_id,
        unassigned_tasks,
        "Member removed from project"
    );

    Ok(MemberRemoval {
        membership,
        unassigned_tasks,
    })
}

/// Deletes a task, its subtasks and its attachment blobs
///
/// The task row is locked before anything is deleted, so a subtask insert
/// or attachment upload racing this call either lands first (and is
/// removed with the task) or waits and then finds no task. Blobs are
/// deleted after the commit, from the attachment list read under the lock.
///
/// # Errors
///
/// [`CascadeError::TaskNotFound`] if the task is not in the project.
pub async fn delete_task(
    pool: &PgPool,
    blobs: &dyn BlobStore,
    project_id: Uuid,
    task_id: Uuid,
) -> Result<TaskDeletion, CascadeError> {
    let mut tx = pool.begin().await?;

    let task = Task::lock_for_update(&mut *tx, project_id, task_id)
        .await?
        .ok_or(CascadeError::TaskNotFound)?;

    let subtasks = Subtask::delete_by_task(&mut *tx, task_id).await?;

    if !Task::delete(&mut *tx, project_id, task_id).await? {
        return Err(CascadeError::TaskNotFound);
    }

    tx.commit().await?;

    info!(project_id = %project_id, task_id = %task_id, subtasks, "Task deleted");

    let blob_ids: Vec<String> = task.attachments.iter().map(|a| a.external_id.clone()).collect();
    let attachments_failed = delete_blobs_best_effort(blobs, &blob_ids).await;

    Ok(TaskDeletion {
        task,
        subtasks,
        attachments_failed,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{DisabledBlobStore, StorageError, StoredBlob, UploadFile};
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Fails deletes for ids starting with "bad"
    #[derive(Default)]
    struct FlakyStore {
        deleted: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl BlobStore for FlakyStore {
        fn name(&self) -> &'static str {
            "flaky"
        }

        async fn put(&self, _file: UploadFile) -> Result<StoredBlob, StorageError> {
            Err(StorageError::Disabled)
        }

        async fn delete(&self, external_id: &str) -> Result<(), StorageError> {
            if external_id.starts_with("bad") {
                return Err(StorageError::Upstream("boom".to_string()));
            }
            self.deleted.lock().unwrap().push(external_id.to_string());
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_blob_failures_are_counted_not_raised() {
        let store = FlakyStore::default();
        let ids = vec!["good-1".to_string(), "bad-1".to_string(), "good-2".to_string()];

        let failed = delete_blobs_best_effort(&store, &ids).await;

        assert_eq!(failed, 1);
        let mut deleted = store.deleted.lock().unwrap().clone();
        deleted.sort();
        assert_eq!(deleted, vec!["good-1", "good-2"]);
    }

    #[tokio::test]
    async fn test_no_blobs_is_a_no_op() {
        assert_eq!(delete_blobs_best_effort(&DisabledBlobStore, &[]).await, 0);
    }
}
