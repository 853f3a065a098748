//! Project and membership endpoints
//!
//! # Endpoints
//!
//! - `GET    /api/v1/projects` - Projects the caller belongs to
//! - `POST   /api/v1/projects` - Create a project (caller becomes admin)
//! - `GET    /api/v1/projects/:project_id` - Project details and caller's role
//! - `PUT    /api/v1/projects/:project_id` - Rename or re-describe (admin)
//! - `DELETE /api/v1/projects/:project_id` - Delete with all children (admin)
//! - `GET    /api/v1/projects/:project_id/members` - List members
//! - `POST   /api/v1/projects/:project_id/members` - Add a member by email (admin)
//! - `PUT    /api/v1/projects/:project_id/members/:membership_id/role` - Change role (admin)
//! - `DELETE /api/v1/projects/:project_id/members/:membership_id` - Remove member (admin)
//!
//! Callers without a membership get the same `404` as for a project that
//! does not exist.

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
use serde::{Deserialize, Serialize};
use taskhive_shared::{
    auth::{
        authorization::{authorize, parse_identifier},
        middleware::Principal,
    },
    cascade::{self, MemberRemoval, ProjectDeletion},
    models::{
        membership::{AddMember, MemberDetails, Membership, ProjectRole, ADMIN_ONLY, ANY_MEMBER},
        project::{CreateProject, Project, ProjectListing, UpdateProject},
        user::User,
    },
};
use validator::Validate;

/// Create project request
#[derive(Debug, Deserialize, Validate)]
pub struct CreateProjectRequest {
    #[validate(
        length(min = 1, max = 100, message = "Project name must be between 1 and 100 characters"),
        custom(function = "not_blank")
    )]
    pub name: String,

    #[validate(length(max = 1000, message = "Description must be at most 1000 characters"))]
    pub description: Option<String>,
}

/// Update project request; at least one field must be present
#[derive(Debug, Deserialize, Validate)]
pub struct UpdateProjectRequest {
    #[validate(
        length(min = 1, max = 100, message = "Project name must be between 1 and 100 characters"),
        custom(function = "not_blank")
    )]
    pub name: Option<String>,

    #[validate(length(max = 1000, message = "Description must be at most 1000 characters"))]
    pub description: Option<String>,
}

/// Add member request
#[derive(Debug, Deserialize, Validate)]
pub struct AddMemberRequest {
    #[validate(email(message = "Invalid email format"))]
    pub email: String,

    /// Defaults to `member`
    pub role: Option<ProjectRole>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct UpdateRoleRequest {
    pub role: ProjectRole,
}

/// A project together with the caller's role on it
#[derive(Debug, Serialize)]
pub struct ProjectResponse {
    pub project: Project,
    pub role: ProjectRole,
}

/// List the caller's projects
pub async fn list_projects(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
) -> ApiResult<Json<Vec<ProjectListing>>> {
    let projects = Project::list_for_user(&state.db, principal.user_id).await?;

    Ok(Json(projects))
}

/// Create a project
///
/// # Endpoint
///
/// ```text
/// POST /api/v1/projects
/// Content-Type: application/json
///
/// { "name": "Alpha", "description": "First project" }
/// ```
///
/// Returns `201` with the project; the caller is its first admin.
///
/// # Errors
///
/// - `400 Bad Request`: Missing or blank name
/// - `409 Conflict`: Name already taken
pub async fn create_project(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    ValidJson(req): ValidJson<CreateProjectRequest>,
) -> ApiResult<(StatusCode, Json<ProjectResponse>)> {
    let (project, membership) = Project::create_with_admin(
        &state.db,
        CreateProject {
            name: req.name,
            description: req.description,
            created_by: principal.user_id,
        },
    )
    .await?;

    Ok((
        StatusCode::CREATED,
        Json(ProjectResponse {
            project,
            role: membership.role,
        }),
    ))
}

/// Get a project and the caller's role on it
pub async fn get_project(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(project_id): Path<String>,
) -> ApiResult<Json<ProjectResponse>> {
    let membership = authorize(&state.db, &principal, &project_id, ANY_MEMBER).await?;

    let project = Project::find_by_id(&state.db, membership.project_id)
        .await?
        .ok_or_else(ApiError::project_not_found)?;

    Ok(Json(ProjectResponse {
        project,
        role: membership.role,
    }))
}

/// Update name and/or description
///
/// # Errors
///
/// - `400 Bad Request`: Neither field given, or a field is invalid
/// - `403 Forbidden`: Caller is not an admin
/// - `409 Conflict`: New name already taken
pub async fn update_project(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(project_id): Path<String>,
    ValidJson(req): ValidJson<UpdateProjectRequest>,
) -> ApiResult<Json<Project>> {
    let membership = authorize(&state.db, &principal, &project_id, ADMIN_ONLY).await?;

    if req.name.is_none() && req.description.is_none() {
        return Err(ApiError::BadRequest(
            "Provide a name or description to update".to_string(),
        ));
    }

    let project = Project::update(
        &state.db,
        membership.project_id,
        UpdateProject {
            name: req.name,
            description: req.description,
        },
    )
    .await?
    .ok_or_else(ApiError::project_not_found)?;

    tracing::info!(project_id = %project.id, updated_by = %principal.user_id, "Project updated");

    Ok(Json(project))
}

/// Delete a project with its tasks, subtasks, notes and memberships
pub async fn delete_project(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(project_id): Path<String>,
) -> ApiResult<Json<ProjectDeletion>> {
    let membership = authorize(&state.db, &principal, &project_id, ADMIN_ONLY).await?;

    let deletion = cascade::delete_project(&state.db, state.blobs.as_ref(), membership.project_id).await?;

    tracing::info!(project_id = %membership.project_id, deleted_by = %principal.user_id, "Project deleted");

    Ok(Json(deletion))
}

/// List a project's members
pub async fn list_members(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(project_id): Path<String>,
) -> ApiResult<Json<Vec<MemberDetails>>> {
    let membership = authorize(&state.db, &principal, &project_id, ANY_MEMBER).await?;

    let members = Membership::list_by_project(&state.db, membership.project_id).await?;

    Ok(Json(members))
}

/// Add a registered, verified user to the project
///
/// # Endpoint
///
/// ```text
/// POST /api/v1/projects/:project_id/members
/// Content-Type: application/json
///
/// { "email": "grace@example.com", "role": "member" }
/// ```
///
/// # Errors
///
/// - `404 Not Found`: No user with that email
/// - `409 Conflict`: Already a member
/// - `422 Unprocessable Entity`: User has not verified their email
pub async fn add_member(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(project_id): Path<String>,
    ValidJson(req): ValidJson<AddMemberRequest>,
) -> ApiResult<(StatusCode, Json<Membership>)> {
    let membership = authorize(&state.db, &principal, &project_id, ADMIN_ONLY).await?;

    let user = User::find_by_email(&state.db, &req.email)
        .await?
        .ok_or_else(|| ApiError::NotFound("User with this email does not exist".to_string()))?;

    let added = Membership::add(
        &state.db,
        AddMember {
            project_id: membership.project_id,
            user_id: user.id,
            role: req.role.unwrap_or(ProjectRole::Member),
        },
    )
    .await?;

    Ok((StatusCode::CREATED, Json(added)))
}

/// Change a member's role
///
/// # Errors
///
/// - `404 Not Found`: Membership not in this project
/// - `409 Conflict`: Would demote the last admin
pub async fn update_member_role(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path((project_id, membership_id)): Path<(String, String)>,
    ValidJson(req): ValidJson<UpdateRoleRequest>,
) -> ApiResult<Json<Membership>> {
    let membership = authorize(&state.db, &principal, &project_id, ADMIN_ONLY).await?;
    let membership_id = parse_identifier(&membership_id, "member")?;

    let updated = Membership::update_role(&state.db, membership.project_id, membership_id, req.role).await?;

    Ok(Json(updated))
}

/// Remove a member, unassigning their tasks in this project
///
/// # Errors
///
/// - `404 Not Found`: Membership not in this project
/// - `409 Conflict`: Would remove the last admin
pub async fn remove_member(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path((project_id, membership_id)): Path<(String, String)>,
) -> ApiResult<Json<MemberRemoval>> {
    let membership = authorize(&state.db, &principal, &project_id, ADMIN_ONLY).await?;
    let membership_id = parse_identifier(&membership_id, "member")?;

    let removal = cascade::remove_member(&state.db, membership.project_id, membership_id).await?;

    Ok(Json(removal))
}
