//! Task endpoints
//!
//! # Endpoints
//!
//! - `GET    /api/v1/tasks/:project_id` - List tasks with assignee and subtask count
//! - `POST   /api/v1/tasks/:project_id` - Create a task
//! - `GET    /api/v1/tasks/:project_id/:task_id` - Task with its subtasks
//! - `PUT    /api/v1/tasks/:project_id/:task_id` - Update title, description, status
//! - `DELETE /api/v1/tasks/:project_id/:task_id` - Delete with subtasks and attachment blobs
//! - `PATCH  /api/v1/tasks/:project_id/:task_id/status` - Set status
//! - `PATCH  /api/v1/tasks/:project_id/:task_id/assign` - Set or clear the assignee (admin)
//! - `PATCH  /api/v1/tasks/:project_id/:task_id/attachments` - Upload files (multipart)
//! - `DELETE /api/v1/tasks/:project_id/:task_id/attachments/:attachment_id` - Remove one file

use crate::{
    app::AppState,
    error::{ApiError, ApiResult},
    extract::{not_blank, ValidJson},
};
use axum::{
    extract::{Multipart, Path, State},
    http::StatusCode,
    Extension, Json,
};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use taskhive_shared::{
    auth::{
        authorization::{authorize, parse_identifier},
        middleware::Principal,
    },
    cascade::{self, delete_blobs_best_effort, TaskDeletion},
    models::{
        membership::{ADMIN_ONLY, ADMIN_OR_MEMBER, ANY_MEMBER},
        subtask::Subtask,
        task::{Attachment, CreateTask, Task, TaskStatus, TaskSummary, UpdateTask},
    },
    storage::UploadFile,
};
use uuid::Uuid;
use validator::Validate;

/// Multipart field carrying the files
pub const ATTACHMENT_FIELD: &str = "attachments";

/// Files accepted per upload request
pub const MAX_ATTACHMENTS: usize = 5;

/// Largest single file (10 MiB)
pub const MAX_ATTACHMENT_BYTES: usize = 10 * 1024 * 1024;

/// Body limit for the upload route: every file at full size plus multipart framing
pub const MAX_UPLOAD_REQUEST_BYTES: usize = MAX_ATTACHMENTS * MAX_ATTACHMENT_BYTES + 64 * 1024;

fn task_not_found() -> ApiError {
    ApiError::NotFound("Task not found in this project".to_string())
}

/// Create task request
#[derive(Debug, Deserialize, Validate)]
pub struct CreateTaskRequest {
    #[validate(
        length(min = 1, max = 200, message = "Title must be between 1 and 200 characters"),
        custom(function = "not_blank")
    )]
    pub title: String,

    #[validate(length(max = 5000, message = "Description must be at most 5000 characters"))]
    pub description: Option<String>,

    /// Must be a member of the project when present
    pub assigned_to: Option<Uuid>,

    pub status: Option<TaskStatus>,
}

/// Update task request; at least one field must be present
#[derive(Debug, Deserialize, Validate)]
pub struct UpdateTaskRequest {
    #[validate(
        length(min = 1, max = 200, message = "Title must be between 1 and 200 characters"),
        custom(function = "not_blank")
    )]
    pub title: Option<String>,

    #[validate(length(max = 5000, message = "Description must be at most 5000 characters"))]
    pub description: Option<String>,

    pub status: Option<TaskStatus>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct UpdateStatusRequest {
    pub status: TaskStatus,
}

/// Assign request; `null` clears the assignee
#[derive(Debug, Deserialize, Validate)]
pub struct AssignTaskRequest {
    pub assigned_to: Option<Uuid>,
}

/// A task with its subtasks
#[derive(Debug, Serialize)]
pub struct TaskDetails {
    #[serde(flatten)]
    pub task: Task,

    pub subtasks: Vec<Subtask>,
}

/// Parses the task id from the path
fn task_id(raw: &str) -> ApiResult<Uuid> {
    Ok(parse_identifier(raw, "task")?)
}

/// List a project's tasks
pub async fn list_tasks(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(project_id): Path<String>,
) -> ApiResult<Json<Vec<TaskSummary>>> {
    let membership = authorize(&state.db, &principal, &project_id, ANY_MEMBER).await?;

    let tasks = Task::list_by_project(&state.db, membership.project_id).await?;

    Ok(Json(tasks))
}

/// Create a task
///
/// # Endpoint
///
/// ```text
/// POST /api/v1/tasks/:project_id
/// Content-Type: application/json
///
/// { "title": "Write docs", "assigned_to": "8c1f...", "status": "todo" }
/// ```
///
/// # Errors
///
/// - `400 Bad Request`: Missing or blank title
/// - `422 Unprocessable Entity`: Assignee is not a member of the project
pub async fn create_task(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(project_id): Path<String>,
    ValidJson(req): ValidJson<CreateTaskRequest>,
) -> ApiResult<(StatusCode, Json<Task>)> {
    let membership = authorize(&state.db, &principal, &project_id, ADMIN_OR_MEMBER).await?;

    let task = Task::create(
        &state.db,
        CreateTask {
            project_id: membership.project_id,
            title: req.title,
            description: req.description,
            assigned_to: req.assigned_to,
            assigned_by: principal.user_id,
            status: req.status.unwrap_or_default(),
        },
    )
    .await?;

    Ok((StatusCode::CREATED, Json(task)))
}

/// Get a task with its subtasks
pub async fn get_task(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path((project_id, task_id_raw)): Path<(String, String)>,
) -> ApiResult<Json<TaskDetails>> {
    let membership = authorize(&state.db, &principal, &project_id, ANY_MEMBER).await?;
    let task_id = task_id(&task_id_raw)?;

    let task = Task::find_in_project(&state.db, membership.project_id, task_id)
        .await?
        .ok_or_else(task_not_found)?;
    let subtasks = Subtask::list_by_task(&state.db, membership.project_id, task_id).await?;

    Ok(Json(TaskDetails { task, subtasks }))
}

/// Update title, description and/or status
pub async fn update_task(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path((project_id, task_id_raw)): Path<(String, String)>,
    ValidJson(req): ValidJson<UpdateTaskRequest>,
) -> ApiResult<Json<Task>> {
    let membership = authorize(&state.db, &principal, &project_id, ADMIN_OR_MEMBER).await?;
    let task_id = task_id(&task_id_raw)?;

    if req.title.is_none() && req.description.is_none() && req.status.is_none() {
        return Err(ApiError::BadRequest(
            "Provide a title, description or status to update".to_string(),
        ));
    }

    let task = Task::update(
        &state.db,
        membership.project_id,
        task_id,
        UpdateTask {
            title: req.title,
            description: req.description,
            status: req.status,
        },
    )
    .await?
    .ok_or_else(task_not_found)?;

    Ok(Json(task))
}

/// Delete a task, its subtasks and its attachment blobs
pub async fn delete_task(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path((project_id, task_id_raw)): Path<(String, String)>,
) -> ApiResult<Json<TaskDeletion>> {
    let membership = authorize(&state.db, &principal, &project_id, ADMIN_OR_MEMBER).await?;
    let task_id = task_id(&task_id_raw)?;

    let deletion = cascade::delete_task(&state.db, state.blobs.as_ref(), membership.project_id, task_id).await?;

    Ok(Json(deletion))
}

/// Set a task's status
pub async fn update_status(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path((project_id, task_id_raw)): Path<(String, String)>,
    ValidJson(req): ValidJson<UpdateStatusRequest>,
) -> ApiResult<Json<Task>> {
    let membership = authorize(&state.db, &principal, &project_id, ADMIN_OR_MEMBER).await?;
    let task_id = task_id(&task_id_raw)?;

    let task = Task::update_status(&state.db, membership.project_id, task_id, req.status)
        .await?
        .ok_or_else(task_not_found)?;

    tracing::debug!(task_id = %task.id, status = %task.status, "Task status changed");

    Ok(Json(task))
}

/// Set or clear a task's assignee
///
/// # Errors
///
/// - `403 Forbidden`: Caller is not an admin
/// - `422 Unprocessable Entity`: Assignee is not a member of the project
pub async fn assign_task(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path((project_id, task_id_raw)): Path<(String, String)>,
    ValidJson(req): ValidJson<AssignTaskRequest>,
) -> ApiResult<Json<Task>> {
    let membership = authorize(&state.db, &principal, &project_id, ADMIN_ONLY).await?;
    let task_id = task_id(&task_id_raw)?;

    let task = Task::assign(
        &state.db,
        membership.project_id,
        task_id,
        req.assigned_to,
        principal.user_id,
    )
    .await?;

    Ok(Json(task))
}

/// Reads the `attachments` files out of a multipart body
///
/// Enforces the per-request count and per-file size limits before anything
/// is stored.
async fn read_attachments(multipart: &mut Multipart) -> ApiResult<Vec<UploadFile>> {
    let mut files = Vec::new();

    while let Some(field) = multipart.next_field().await? {
        if field.name() != Some(ATTACHMENT_FIELD) {
            return Err(ApiError::BadRequest(format!(
                "Unexpected multipart field; files must be sent as '{}'",
                ATTACHMENT_FIELD
            )));
        }

        if files.len() == MAX_ATTACHMENTS {
            return Err(ApiError::BadRequest(format!(
                "At most {} attachments can be uploaded at once",
                MAX_ATTACHMENTS
            )));
        }

        let filename = field.file_name().unwrap_or("attachment").to_string();
        let content_type = field
            .content_type()
            .unwrap_or("application/octet-stream")
            .to_string();
        let data = field.bytes().await?;

        if data.len() > MAX_ATTACHMENT_BYTES {
            return Err(ApiError::PayloadTooLarge(format!(
                "{} exceeds the {} MiB attachment limit",
                filename,
                MAX_ATTACHMENT_BYTES / (1024 * 1024)
            )));
        }

        files.push(UploadFile {
            filename,
            content_type,
            data,
        });
    }

    Ok(files)
}

/// Upload attachments to a task
///
/// # Endpoint
///
/// ```text
/// PATCH /api/v1/tasks/:project_id/:task_id/attachments
/// Content-Type: multipart/form-data; boundary=...
///
/// attachments=<file>, attachments=<file>, ...
/// ```
///
/// Files that fail to store are logged and skipped. The response is the
/// task with every stored file appended.
///
/// # Errors
///
/// - `400 Bad Request`: No files, more than 5 files, or an unexpected field
/// - `413 Payload Too Large`: A file is over 10 MiB
/// - `502 Bad Gateway`: No file could be stored
pub async fn upload_attachments(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path((project_id, task_id_raw)): Path<(String, String)>,
    mut multipart: Multipart,
) -> ApiResult<Json<Task>> {
    let membership = authorize(&state.db, &principal, &project_id, ADMIN_OR_MEMBER).await?;
    let task_id = task_id(&task_id_raw)?;

    Task::find_in_project(&state.db, membership.project_id, task_id)
        .await?
        .ok_or_else(task_not_found)?;

    let files = read_attachments(&mut multipart).await?;
    if files.is_empty() {
        return Err(ApiError::BadRequest("No attachment files were provided".to_string()));
    }

    let requested = files.len();
    let results = join_all(files.into_iter().map(|file| {
        let blobs = state.blobs.clone();
        async move {
            let filename = file.filename.clone();
            let mimetype = file.content_type.clone();
            (filename, mimetype, blobs.put(file).await)
        }
    }))
    .await;

    let mut attachments = Vec::with_capacity(results.len());
    for (filename, mimetype, result) in results {
        match result {
            Ok(stored) => attachments.push(Attachment {
                id: Uuid::new_v4(),
                url: stored.url,
                external_id: stored.external_id,
                mimetype,
                size: stored.size,
            }),
            Err(e) => {
                tracing::warn!(
                    task_id = %task_id,
                    filename = %filename,
                    backend = state.blobs.name(),
                    error = %e,
                    "Attachment upload failed"
                );
            }
        }
    }

    if attachments.is_empty() {
        return Err(ApiError::UpstreamFailure(
            "None of the attachments could be stored".to_string(),
        ));
    }

    let updated = Task::add_attachments(&state.db, membership.project_id, task_id, &attachments).await?;

    let Some(task) = updated else {
        // Task deleted while the files were uploading
        let orphaned: Vec<String> = attachments.into_iter().map(|a| a.external_id).collect();
        delete_blobs_best_effort(state.blobs.as_ref(), &orphaned).await;
        return Err(task_not_found());
    };

    tracing::info!(
        task_id = %task.id,
        stored = attachments.len(),
        requested,
        "Attachments uploaded"
    );

    Ok(Json(task))
}

/// Remove one attachment from a task and delete its blob
pub async fn delete_attachment(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path((project_id, task_id_raw, attachment_id)): Path<(String, String, String)>,
) -> ApiResult<Json<Task>> {
    let membership = authorize(&state.db, &principal, &project_id, ADMIN_OR_MEMBER).await?;
    let task_id = task_id(&task_id_raw)?;
    let attachment_id = parse_identifier(&attachment_id, "attachment")?;

    let task = Task::find_in_project(&state.db, membership.project_id, task_id)
        .await?
        .ok_or_else(task_not_found)?;

    let attachment = task
        .attachment(attachment_id)
        .ok_or_else(|| ApiError::NotFound("Attachment not found on this task".to_string()))?;

    delete_blobs_best_effort(state.blobs.as_ref(), &[attachment.external_id.clone()]).await;

    let task = Task::remove_attachment(&state.db, membership.project_id, task_id, attachment_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Attachment not found on this task".to_string()))?;

    Ok(Json(task))
}
