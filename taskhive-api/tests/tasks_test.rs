//! Task, subtask, note and attachment integration tests
//!
//! Require PostgreSQL via `DATABASE_URL`; skipped otherwise.

mod common;

use axum::{
    body::Body,
    http::{header, Request, StatusCode},
};
use common::{multipart_body, TestContext, TestUser};
use serde_json::json;
use uuid::Uuid;

async fn count(ctx: &TestContext, sql: &str, id: &str) -> i64 {
    sqlx::query_scalar(sql)
        .bind(Uuid::parse_str(id).unwrap())
        .fetch_one(&ctx.db)
        .await
        .unwrap()
}

async fn upload(ctx: &TestContext, user: &TestUser, project: &str, task: &str, parts: &[(&str, &str, &str)]) -> common::TestResponse {
    let (content_type, body) = multipart_body(parts);
    let request = Request::builder()
        .method("PATCH")
        .uri(format!("/api/v1/tasks/{}/{}/attachments", project, task))
        .header(header::AUTHORIZATION, format!("Bearer {}", user.token))
        .header(header::CONTENT_TYPE, content_type)
        .body(body)
        .unwrap();

    ctx.execute(request).await
}

#[tokio::test]
async fn test_task_for_non_member_assignee_is_rejected() {
    let Some(ctx) = TestContext::new().await else { return };
    let alice = ctx.verified_user("alice").await;
    let dave = ctx.verified_user("dave").await;

    let project = ctx.project(&alice, "Assign").await;

    let response = ctx
        .post(
            &format!("/api/v1/tasks/{}", project),
            &alice.token,
            json!({ "title": "Ship it", "assigned_to": dave.id() }),
        )
        .await;
    assert_eq!(response.status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(response.body["error"], "precondition_failed");

    let response = ctx.get(&format!("/api/v1/tasks/{}", project), &alice.token).await;
    assert_eq!(response.body.as_array().unwrap().len(), 0);
}

#[tokio::test]
async fn test_task_lifecycle() {
    let Some(ctx) = TestContext::new().await else { return };
    let alice = ctx.verified_user("alice").await;
    let bob = ctx.verified_user("bob").await;

    let project = ctx.project(&alice, "Lifecycle").await;
    ctx.add_member(&alice, &project, &bob, "member").await;

    let task = ctx.task(&bob, &project, json!({ "title": "Write docs" })).await;
    let task_uri = format!("/api/v1/tasks/{}/{}", project, task);

    let response = ctx.get(&task_uri, &bob.token).await;
    assert_eq!(response.body["status"], "todo");
    assert_eq!(response.body["assigned_by"], bob.id().to_string());
    assert_eq!(response.body["subtasks"].as_array().unwrap().len(), 0);

    let response = ctx
        .patch(&format!("{}/status", task_uri), &bob.token, json!({ "status": "in_process" }))
        .await;
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.body["status"], "in_process");

    let response = ctx
        .patch(&format!("{}/status", task_uri), &bob.token, json!({ "status": "blocked" }))
        .await;
    assert_eq!(response.status, StatusCode::BAD_REQUEST);

    // Only admins assign
    let response = ctx
        .patch(&format!("{}/assign", task_uri), &bob.token, json!({ "assigned_to": bob.id() }))
        .await;
    assert_eq!(response.status, StatusCode::FORBIDDEN);

    let response = ctx
        .patch(&format!("{}/assign", task_uri), &alice.token, json!({ "assigned_to": bob.id() }))
        .await;
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.body["assigned_to"], bob.id().to_string());
    assert_eq!(response.body["assigned_by"], alice.id().to_string());

    let response = ctx.get(&format!("/api/v1/tasks/{}", project), &bob.token).await;
    assert_eq!(response.body[0]["assignee_email"], bob.email());

    let response = ctx.put(&task_uri, &bob.token, json!({ "title": "Write better docs" })).await;
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.body["title"], "Write better docs");

    let response = ctx.put(&task_uri, &bob.token, json!({})).await;
    assert_eq!(response.status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_task_from_another_project_is_not_found() {
    let Some(ctx) = TestContext::new().await else { return };
    let alice = ctx.verified_user("alice").await;

    let first = ctx.project(&alice, "First").await;
    let second = ctx.project(&alice, "Second").await;
    let task = ctx.task(&alice, &first, json!({ "title": "Lives in first" })).await;

    let response = ctx.get(&format!("/api/v1/tasks/{}/{}", second, task), &alice.token).await;
    assert_eq!(response.status, StatusCode::NOT_FOUND);

    let response = ctx.delete(&format!("/api/v1/tasks/{}/{}", second, task), &alice.token).await;
    assert_eq!(response.status, StatusCode::NOT_FOUND);

    let response = ctx.get(&format!("/api/v1/tasks/{}/{}", first, task), &alice.token).await;
    assert_eq!(response.status, StatusCode::OK);
}

#[tokio::test]
async fn test_subtask_with_task_from_another_project_mutates_nothing() {
    let Some(ctx) = TestContext::new().await else { return };
    let alice = ctx.verified_user("alice").await;

    let first = ctx.project(&alice, "First").await;
    let second = ctx.project(&alice, "Second").await;
    let task = ctx.task(&alice, &first, json!({ "title": "Parent" })).await;

    let response = ctx
        .post(&format!("/api/v1/subtasks/{}/{}", first, task), &alice.token, json!({ "title": "Step one" }))
        .await;
    assert_eq!(response.status, StatusCode::CREATED);
    let subtask = response.body["id"].as_str().unwrap().to_string();

    let response = ctx
        .post(&format!("/api/v1/subtasks/{}/{}", second, task), &alice.token, json!({ "title": "Sneaky" }))
        .await;
    assert_eq!(response.status, StatusCode::NOT_FOUND);

    let response = ctx
        .put(
            &format!("/api/v1/subtasks/{}/{}/{}", second, task, subtask),
            &alice.token,
            json!({ "title": "Renamed" }),
        )
        .await;
    assert_eq!(response.status, StatusCode::NOT_FOUND);

    let response = ctx
        .patch(
            &format!("/api/v1/subtasks/{}/{}/{}/toggle-status", second, task, subtask),
            &alice.token,
            json!({}),
        )
        .await;
    assert_eq!(response.status, StatusCode::NOT_FOUND);

    let response = ctx
        .delete(&format!("/api/v1/subtasks/{}/{}/{}", second, task, subtask), &alice.token)
        .await;
    assert_eq!(response.status, StatusCode::NOT_FOUND);

    let response = ctx.get(&format!("/api/v1/subtasks/{}/{}", second, task), &alice.token).await;
    assert_eq!(response.status, StatusCode::NOT_FOUND);

    let response = ctx.get(&format!("/api/v1/subtasks/{}/{}", first, task), &alice.token).await;
    let subtasks = response.body.as_array().unwrap();
    assert_eq!(subtasks.len(), 1);
    assert_eq!(subtasks[0]["title"], "Step one");
    assert_eq!(subtasks[0]["is_completed"], false);
}

#[tokio::test]
async fn test_subtask_toggle_and_update() {
    let Some(ctx) = TestContext::new().await else { return };
    let alice = ctx.verified_user("alice").await;

    let project = ctx.project(&alice, "Checklist").await;
    let task = ctx.task(&alice, &project, json!({ "title": "Parent" })).await;

    let response = ctx
        .post(&format!("/api/v1/subtasks/{}/{}", project, task), &alice.token, json!({ "title": "Step" }))
        .await;
    let subtask_uri = format!("/api/v1/subtasks/{}/{}/{}", project, task, response.body["id"].as_str().unwrap());

    let response = ctx.patch(&format!("{}/toggle-status", subtask_uri), &alice.token, json!({})).await;
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.body["is_completed"], true);

    let response = ctx.put(&subtask_uri, &alice.token, json!({ "title": "Step 1" })).await;
    assert_eq!(response.body["title"], "Step 1");
    assert_eq!(response.body["is_completed"], true);

    let response = ctx.delete(&subtask_uri, &alice.token).await;
    assert_eq!(response.status, StatusCode::NO_CONTENT);

    let response = ctx.delete(&subtask_uri, &alice.token).await;
    assert_eq!(response.status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_task_delete_removes_subtasks() {
    let Some(ctx) = TestContext::new().await else { return };
    let alice = ctx.verified_user("alice").await;

    let project = ctx.project(&alice, "Cleanup").await;
    let task = ctx.task(&alice, &project, json!({ "title": "Parent" })).await;
    for title in ["One", "Two"] {
        let response = ctx
            .post(&format!("/api/v1/subtasks/{}/{}", project, task), &alice.token, json!({ "title": title }))
            .await;
        assert_eq!(response.status, StatusCode::CREATED);
    }

    let response = ctx.delete(&format!("/api/v1/tasks/{}/{}", project, task), &alice.token).await;
    assert_eq!(response.status, StatusCode::OK, "{}", response.body);
    assert_eq!(response.body["subtasks"], 2);

    assert_eq!(count(&ctx, "SELECT COUNT(*) FROM subtasks WHERE task_id = $1", &task).await, 0);
    assert_eq!(count(&ctx, "SELECT COUNT(*) FROM tasks WHERE id = $1", &task).await, 0);
}

#[tokio::test]
async fn test_project_delete_removes_every_child() {
    let Some(ctx) = TestContext::new().await else { return };
    let alice = ctx.verified_user("alice").await;
    let bob = ctx.verified_user("bob").await;

    let project = ctx.project(&alice, "Doomed").await;
    ctx.add_member(&alice, &project, &bob, "member").await;
    let task = ctx.task(&alice, &project, json!({ "title": "Parent", "assigned_to": bob.id() })).await;
    ctx.post(&format!("/api/v1/subtasks/{}/{}", project, task), &alice.token, json!({ "title": "Child" }))
        .await;
    ctx.post(&format!("/api/v1/notes/{}", project), &alice.token, json!({ "content": "Remember" }))
        .await;
    upload(&ctx, &alice, &project, &task, &[("attachments", "brief.txt", "contents")]).await;
    assert_eq!(ctx.blobs.len(), 1);

    // Members cannot delete the project
    let response = ctx.delete(&format!("/api/v1/projects/{}", project), &bob.token).await;
    assert_eq!(response.status, StatusCode::FORBIDDEN);

    let response = ctx.delete(&format!("/api/v1/projects/{}", project), &alice.token).await;
    assert_eq!(response.status, StatusCode::OK, "{}", response.body);
    assert_eq!(response.body["tasks"], 1);
    assert_eq!(response.body["subtasks"], 1);
    assert_eq!(response.body["notes"], 1);
    assert_eq!(response.body["memberships"], 2);

    assert_eq!(count(&ctx, "SELECT COUNT(*) FROM tasks WHERE project_id = $1", &project).await, 0);
    assert_eq!(count(&ctx, "SELECT COUNT(*) FROM subtasks WHERE task_id = $1", &task).await, 0);
    assert_eq!(count(&ctx, "SELECT COUNT(*) FROM notes WHERE project_id = $1", &project).await, 0);
    assert_eq!(
        count(&ctx, "SELECT COUNT(*) FROM project_members WHERE project_id = $1", &project).await,
        0
    );
    assert_eq!(count(&ctx, "SELECT COUNT(*) FROM projects WHERE id = $1", &project).await, 0);
    assert_eq!(ctx.blobs.len(), 0);

    let response = ctx.get(&format!("/api/v1/projects/{}", project), &alice.token).await;
    assert_eq!(response.status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_notes_are_written_by_admins_and_read_by_members() {
    let Some(ctx) = TestContext::new().await else { return };
    let alice = ctx.verified_user("alice").await;
    let bob = ctx.verified_user("bob").await;

    let project = ctx.project(&alice, "Notes").await;
    let other = ctx.project(&alice, "Other").await;
    ctx.add_member(&alice, &project, &bob, "member").await;
    let notes_uri = format!("/api/v1/notes/{}", project);

    let response = ctx.post(&notes_uri, &bob.token, json!({ "content": "From a member" })).await;
    assert_eq!(response.status, StatusCode::FORBIDDEN);

    let response = ctx.post(&notes_uri, &alice.token, json!({ "content": "Kickoff Monday" })).await;
    assert_eq!(response.status, StatusCode::CREATED);
    let note = response.body["id"].as_str().unwrap().to_string();

    let response = ctx.get(&notes_uri, &bob.token).await;
    let notes = response.body.as_array().unwrap();
    assert_eq!(notes.len(), 1);
    assert_eq!(notes[0]["content"], "Kickoff Monday");
    assert_eq!(notes[0]["author_username"], "alice");

    let response = ctx.get(&format!("{}/n/{}", notes_uri, note), &bob.token).await;
    assert_eq!(response.status, StatusCode::OK);

    let response = ctx.get(&format!("/api/v1/notes/{}/n/{}", other, note), &alice.token).await;
    assert_eq!(response.status, StatusCode::NOT_FOUND);

    let response = ctx
        .put(&format!("{}/n/{}", notes_uri, note), &bob.token, json!({ "content": "Edited" }))
        .await;
    assert_eq!(response.status, StatusCode::FORBIDDEN);

    let response = ctx
        .put(&format!("{}/n/{}", notes_uri, note), &alice.token, json!({ "content": "Kickoff Tuesday" }))
        .await;
    assert_eq!(response.body["content"], "Kickoff Tuesday");

    let response = ctx.delete(&format!("{}/n/{}", notes_uri, note), &alice.token).await;
    assert_eq!(response.status, StatusCode::NO_CONTENT);
}

#[tokio::test]
async fn test_attachment_upload_and_delete() {
    let Some(ctx) = TestContext::new().await else { return };
    let alice = ctx.verified_user("alice").await;

    let project = ctx.project(&alice, "Files").await;
    let task = ctx.task(&alice, &project, json!({ "title": "Has files" })).await;

    // One file fails to store; the other is kept
    let response = upload(
        &ctx,
        &alice,
        &project,
        &task,
        &[("attachments", "notes.txt", "hello"), ("attachments", "fail.txt", "nope")],
    )
    .await;
    assert_eq!(response.status, StatusCode::OK, "{}", response.body);
    let attachments = response.body["attachments"].as_array().unwrap();
    assert_eq!(attachments.len(), 1);
    assert_eq!(attachments[0]["mimetype"], "text/plain");
    assert_eq!(attachments[0]["size"], 5);

    let attachment_id = attachments[0]["id"].as_str().unwrap().to_string();
    let external_id = attachments[0]["external_id"].as_str().unwrap().to_string();
    assert!(ctx.blobs.contains(&external_id));

    let response = upload(&ctx, &alice, &project, &task, &[("attachments", "fail.txt", "nope")]).await;
    assert_eq!(response.status, StatusCode::BAD_GATEWAY);
    assert_eq!(response.body["error"], "upstream_failure");

    let six: Vec<(&str, &str, &str)> = (0..6).map(|_| ("attachments", "a.txt", "x")).collect();
    let response = upload(&ctx, &alice, &project, &task, &six).await;
    assert_eq!(response.status, StatusCode::BAD_REQUEST);

    let response = upload(&ctx, &alice, &project, &task, &[]).await;
    assert_eq!(response.status, StatusCode::BAD_REQUEST);

    let attachment_uri = format!("/api/v1/tasks/{}/{}/attachments/{}", project, task, attachment_id);
    let response = ctx.delete(&attachment_uri, &alice.token).await;
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.body["attachments"].as_array().unwrap().len(), 0);
    assert!(!ctx.blobs.contains(&external_id));

    let response = ctx.delete(&attachment_uri, &alice.token).await;
    assert_eq!(response.status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_upload_rejects_unknown_field() {
    let Some(ctx) = TestContext::new().await else { return };
    let alice = ctx.verified_user("alice").await;

    let project = ctx.project(&alice, "Fields").await;
    let task = ctx.task(&alice, &project, json!({ "title": "Has files" })).await;

    let request = {
        let (content_type, body) = multipart_body(&[("file", "a.txt", "x")]);
        Request::builder()
            .method("PATCH")
            .uri(format!("/api/v1/tasks/{}/{}/attachments", project, task))
            .header(header::AUTHORIZATION, format!("Bearer {}", alice.token))
            .header(header::CONTENT_TYPE, content_type)
            .body(body)
            .unwrap()
    };
    let response = ctx.execute(request).await;
    assert_eq!(response.status, StatusCode::BAD_REQUEST);

    // Not a multipart body at all
    let request = Request::builder()
        .method("PATCH")
        .uri(format!("/api/v1/tasks/{}/{}/attachments", project, task))
        .header(header::AUTHORIZATION, format!("Bearer {}", alice.token))
        .body(Body::empty())
        .unwrap();
    let response = ctx.execute(request).await;
    assert!(response.status.is_client_error());
}
