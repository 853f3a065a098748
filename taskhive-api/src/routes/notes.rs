//! Project note endpoints
//!
//! Any member can read notes; only admins write them.

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
        membership::{ADMIN_ONLY, ANY_MEMBER},
        note::{Note, NoteWithAuthor},
    },
};
use validator::Validate;

fn note_not_found() -> ApiError {
    ApiError::NotFound("Note not found in this project".to_string())
}

/// Create and update request
#[derive(Debug, Deserialize, Validate)]
pub struct NoteRequest {
    #[validate(
        length(min = 1, max = 10000, message = "Content must be between 1 and 10000 characters"),
        custom(function = "not_blank")
    )]
    pub content: String,
}

pub async fn list_notes(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(project_id): Path<String>,
) -> ApiResult<Json<Vec<NoteWithAuthor>>> {
    let membership = authorize(&state.db, &principal, &project_id, ANY_MEMBER).await?;

    let notes = Note::list_by_project(&state.db, membership.project_id).await?;

    Ok(Json(notes))
}

pub async fn create_note(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(project_id): Path<String>,
    ValidJson(req): ValidJson<NoteRequest>,
) -> ApiResult<(StatusCode, Json<Note>)> {
    let membership = authorize(&state.db, &principal, &project_id, ADMIN_ONLY).await?;

    let note = Note::create(&state.db, membership.project_id, req.content.trim(), principal.user_id).await?;

    Ok((StatusCode::CREATED, Json(note)))
}

pub async fn get_note(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path((project_id, note_id)): Path<(String, String)>,
) -> ApiResult<Json<Note>> {
    let membership = authorize(&state.db, &principal, &project_id, ANY_MEMBER).await?;
    let note_id = parse_identifier(&note_id, "note")?;

    let note = Note::find_in_project(&state.db, membership.project_id, note_id)
        .await?
        .ok_or_else(note_not_found)?;

    Ok(Json(note))
}

pub async fn update_note(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path((project_id, note_id)): Path<(String, String)>,
    ValidJson(req): ValidJson<NoteRequest>,
) -> ApiResult<Json<Note>> {
    let membership = authorize(&state.db, &principal, &project_id, ADMIN_ONLY).await?;
    let note_id = parse_identifier(&note_id, "note")?;

    let note = Note::update(&state.db, membership.project_id, note_id, req.content.trim())
        .await?
        .ok_or_else(note_not_found)?;

    Ok(Json(note))
}

pub async fn delete_note(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path((project_id, note_id)): Path<(String, String)>,
) -> ApiResult<StatusCode> {
    let membership = authorize(&state.db, &principal, &project_id, ADMIN_ONLY).await?;
    let note_id = parse_identifier(&note_id, "note")?;

    if !Note::delete(&state.db, membership.project_id, note_id).await? {
        return Err(note_not_found());
    }

    Ok(StatusCode::NO_CONTENT)
}
