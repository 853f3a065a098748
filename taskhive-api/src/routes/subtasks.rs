//! Subtask endpoints
//!
//! Every route names both the project and the parent task. A task that
//! belongs to another project is treated as missing, and nothing is changed.

use crate::{
    app::AppState,
    error::{ApiError, ApiResult},
    extract::{not_blank, ValidJson},
};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    Extension, Json,
};
use serde::Deserialize;
use taskhive_shared::{
    auth::{
        authorization::{authorize, parse_identifier},
        middleware::Principal,
    },
    models::{
        membership::{ADMIN_OR_MEMBER, ANY_MEMBER},
        subtask::{CreateSubtask, Subtask, UpdateSubtask},
        task::Task,
    },
};
use validator::Validate;

fn subtask_not_found() -> ApiError {
    ApiError::NotFound("Subtask not found for this task".to_string())
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateSubtaskRequest {
    #[validate(
        length(min = 1, max = 200, message = "Title must be between 1 and 200 characters"),
        custom(function = "not_blank")
    )]
    pub title: String,

    #[serde(default)]
    pub is_completed: bool,
}

#[derive(Debug, Deserialize, Validate)]
pub struct UpdateSubtaskRequest {
    #[validate(
        length(min = 1, max = 200, message = "Title must be between 1 and 200 characters"),
        custom(function = "not_blank")
    )]
    pub title: Option<String>,

    pub is_completed: Option<bool>,
}

/// List the subtasks of a task
pub async fn list_subtasks(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path((project_id, task_id)): Path<(String, String)>,
) -> ApiResult<Json<Vec<Subtask>>> {
    let membership = authorize(&state.db, &principal, &project_id, ANY_MEMBER).await?;
    let task_id = parse_identifier(&task_id, "task")?;

    // An empty list would not tell a missing task apart from a bare one
    Task::find_in_project(&state.db, membership.project_id, task_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Task not found in this project".to_string()))?;

    let subtasks = Subtask::list_by_task(&state.db, membership.project_id, task_id).await?;

    Ok(Json(subtasks))
}

/// Create a subtask
///
/// # Errors
///
/// - `404 Not Found`: Parent task is not in this project
pub async fn create_subtask(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path((project_id, task_id)): Path<(String, String)>,
    ValidJson(req): ValidJson<CreateSubtaskRequest>,
) -> ApiResult<(StatusCode, Json<Subtask>)> {
    let membership = authorize(&state.db, &principal, &project_id, ADMIN_OR_MEMBER).await?;
    let task_id = parse_identifier(&task_id, "task")?;

    let subtask = Subtask::create(
        &state.db,
        CreateSubtask {
            project_id: membership.project_id,
            task_id,
            title: req.title,
            is_completed: req.is_completed,
            created_by: principal.user_id,
        },
    )
    .await?
    .ok_or_else(|| ApiError::NotFound("Parent task not found in this project".to_string()))?;

    Ok((StatusCode::CREATED, Json(subtask)))
}

/// Update a subtask's title and/or completion flag
pub async fn update_subtask(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path((project_id, task_id, subtask_id)): Path<(String, String, String)>,
    ValidJson(req): ValidJson<UpdateSubtaskRequest>,
) -> ApiResult<Json<Subtask>> {
    let membership = authorize(&state.db, &principal, &project_id, ADMIN_OR_MEMBER).await?;
    let task_id = parse_identifier(&task_id, "task")?;
    let subtask_id = parse_identifier(&subtask_id, "subtask")?;

    if req.title.is_none() && req.is_completed.is_none() {
        return Err(ApiError::BadRequest(
            "Provide a title or completion state to update".to_string(),
        ));
    }

    let subtask = Subtask::update(
        &state.db,
        membership.project_id,
        task_id,
        subtask_id,
        UpdateSubtask {
            title: req.title,
            is_completed: req.is_completed,
        },
    )
    .await?
    .ok_or_else(subtask_not_found)?;

    Ok(Json(subtask))
}

pub async fn delete_subtask(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path((project_id, task_id, subtask_id)): Path<(String, String, String)>,
) -> ApiResult<StatusCode> {
    let membership = authorize(&state.db, &principal, &project_id, ADMIN_OR_MEMBER).await?;
    let task_id = parse_identifier(&task_id, "task")?;
    let subtask_id = parse_identifier(&subtask_id, "subtask")?;

    if !Subtask::delete(&state.db, membership.project_id, task_id, subtask_id).await? {
        return Err(subtask_not_found());
    }

    Ok(StatusCode::NO_CONTENT)
}

/// Flip a subtask's completion flag
pub async fn toggle_subtask(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path((project_id, task_id, subtask_id)): Path<(String, String, String)>,
) -> ApiResult<Json<Subtask>> {
    let membership = authorize(&state.db, &principal, &project_id, ADMIN_OR_MEMBER).await?;
    let task_id = parse_identifier(&task_id, "task")?;
    let subtask_id = parse_identifier(&subtask_id, "subtask")?;

    let subtask = Subtask::toggle(&state.db, membership.project_id, task_id, subtask_id)
        .await?
        .ok_or_else(subtask_not_found)?;

    Ok(Json(subtask))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_request_defaults_to_incomplete() {
        let req: CreateSubtaskRequest = serde_json::from_str(r#"{"title":"Draft outline"}"#).unwrap();
        assert!(!req.is_completed);
        assert!(req.validate().is_ok());
    }

    #[test]
    fn test_update_request_validates_title_when_present() {
        let req: UpdateSubtaskRequest = serde_json::from_str(r#"{"title":""}"#).unwrap();
        assert!(req.validate().is_err());

        let req: UpdateSubtaskRequest = serde_json::from_str(r#"{"is_completed":true}"#).unwrap();
        assert!(req.validate().is_ok());
    }
}
