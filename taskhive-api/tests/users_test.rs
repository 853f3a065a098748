//! Account, session and password recovery integration tests
//!
//! Require PostgreSQL via `DATABASE_URL`; skipped otherwise.

mod common;

use axum::{
    body::Body,
    http::{header, Method, Request, StatusCode},
};
use common::{unique_email, TestContext, PASSWORD};
use serde_json::json;

async fn register(ctx: &TestContext, email: &str) -> common::TestResponse {
    ctx.send(
        Method::POST,
        "/api/v1/users/register",
        None,
        Some(json!({
            "email": email,
            "username": "newbie",
            "password": PASSWORD,
            "fullname": "New Bie"
        })),
    )
    .await
}

async fn login(ctx: &TestContext, email: &str, password: &str) -> common::TestResponse {
    ctx.send(
        Method::POST,
        "/api/v1/users/login",
        None,
        Some(json!({ "email": email, "password": password })),
    )
    .await
}

async fn refresh_with_body(ctx: &TestContext, refresh_token: &str) -> common::TestResponse {
    ctx.send(
        Method::POST,
        "/api/v1/users/refresh",
        None,
        Some(json!({ "refresh_token": refresh_token })),
    )
    .await
}

#[tokio::test]
async fn test_register_verify_login_flow() {
    let Some(ctx) = TestContext::new().await else { return };
    let email = unique_email("Newbie");

    let response = register(&ctx, &email).await;
    assert_eq!(response.status, StatusCode::CREATED, "{}", response.body);
    assert_eq!(response.body["email"], email.to_lowercase());
    assert_eq!(response.body["is_email_verified"], false);
    assert!(response.body.get("password_hash").is_none());

    let email = email.to_lowercase();

    let response = login(&ctx, &email, PASSWORD).await;
    assert_eq!(response.status, StatusCode::UNPROCESSABLE_ENTITY);

    let token = ctx.mailer.last_token(&email, "/verify/").expect("verification mail");
    assert_eq!(ctx.mailer.messages_to(&email)[0].subject, "Verify your email");

    let response = ctx
        .send(Method::GET, &format!("/api/v1/users/verify/{}", token), None, None)
        .await;
    assert_eq!(response.status, StatusCode::OK);

    // Tokens are single use
    let response = ctx
        .send(Method::GET, &format!("/api/v1/users/verify/{}", token), None, None)
        .await;
    assert_eq!(response.status, StatusCode::BAD_REQUEST);

    let response = login(&ctx, &email, PASSWORD).await;
    assert_eq!(response.status, StatusCode::OK, "{}", response.body);
    assert_eq!(response.headers.get_all(header::SET_COOKIE).iter().count(), 2);

    let access = response.body["token"].as_str().unwrap().to_string();
    let response = ctx.get("/api/v1/users/me", &access).await;
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.body["email"], email);
}

#[tokio::test]
async fn test_duplicate_registration_conflicts() {
    let Some(ctx) = TestContext::new().await else { return };
    let email = unique_email("twice");

    assert_eq!(register(&ctx, &email).await.status, StatusCode::CREATED);

    let response = register(&ctx, &email.to_uppercase()).await;
    assert_eq!(response.status, StatusCode::CONFLICT);
    assert_eq!(response.body["error"], "conflict");
}

#[tokio::test]
async fn test_register_rejects_weak_password() {
    let Some(ctx) = TestContext::new().await else { return };

    let response = ctx
        .send(
            Method::POST,
            "/api/v1/users/register",
            None,
            Some(json!({ "email": unique_email("weak"), "username": "weak", "password": "password" })),
        )
        .await;
    assert_eq!(response.status, StatusCode::BAD_REQUEST);
    assert_eq!(response.body["details"][0]["field"], "password");
}

#[tokio::test]
async fn test_wrong_password_is_rejected() {
    let Some(ctx) = TestContext::new().await else { return };
    let alice = ctx.verified_user("alice").await;

    let response = login(&ctx, alice.email(), "Wr0ng!Pass").await;
    assert_eq!(response.status, StatusCode::BAD_REQUEST);
    assert_eq!(response.body["message"], "Invalid credentials");

    let response = login(&ctx, "nobody@example.com", PASSWORD).await;
    assert_eq!(response.body["message"], "Invalid credentials");
}

#[tokio::test]
async fn test_refresh_rotates_tokens() {
    let Some(ctx) = TestContext::new().await else { return };
    let alice = ctx.verified_user("alice").await;

    let response = login(&ctx, alice.email(), PASSWORD).await;
    let first = response.body["refresh_token"].as_str().unwrap().to_string();

    let response = refresh_with_body(&ctx, &first).await;
    assert_eq!(response.status, StatusCode::OK, "{}", response.body);
    let second = response.body["refresh_token"].as_str().unwrap().to_string();
    assert_ne!(first, second);

    // The old token was redeemed
    let response = refresh_with_body(&ctx, &first).await;
    assert_eq!(response.status, StatusCode::UNAUTHORIZED);

    // Cookie takes the place of the body
    let request = Request::builder()
        .method("POST")
        .uri("/api/v1/users/refresh")
        .header(header::COOKIE, format!("refresh_token={}", second))
        .body(Body::empty())
        .unwrap();
    let response = ctx.execute(request).await;
    assert_eq!(response.status, StatusCode::OK);

    let response = refresh_with_body(&ctx, "not-a-jwt").await;
    assert_eq!(response.status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_logout_ends_session() {
    let Some(ctx) = TestContext::new().await else { return };
    let alice = ctx.verified_user("alice").await;

    let response = login(&ctx, alice.email(), PASSWORD).await;
    let access = response.body["token"].as_str().unwrap().to_string();
    let refresh = response.body["refresh_token"].as_str().unwrap().to_string();

    let response = ctx.post("/api/v1/users/logout", &access, json!({})).await;
    assert_eq!(response.status, StatusCode::OK);
    let cleared: Vec<_> = response
        .headers
        .get_all(header::SET_COOKIE)
        .iter()
        .map(|v| v.to_str().unwrap().to_string())
        .collect();
    assert_eq!(cleared.len(), 2);
    assert!(cleared.iter().all(|c| c.contains("Max-Age=0")));

    let response = refresh_with_body(&ctx, &refresh).await;
    assert_eq!(response.status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_password_reset_flow() {
    let Some(ctx) = TestContext::new().await else { return };
    let alice = ctx.verified_user("alice").await;

    let response = ctx
        .send(
            Method::POST,
            "/api/v1/users/forgot-password",
            None,
            Some(json!({ "email": "nobody-at-all@example.com" })),
        )
        .await;
    assert_eq!(response.status, StatusCode::NOT_FOUND);

    let response = ctx
        .send(Method::POST, "/api/v1/users/forgot-password", None, Some(json!({ "email": alice.email() })))
        .await;
    assert_eq!(response.status, StatusCode::OK);

    let token = ctx
        .mailer
        .last_token(alice.email(), "/reset-password/")
        .expect("reset mail");
    let reset_uri = format!("/api/v1/users/reset-password/{}", token);

    let response = ctx
        .send(Method::POST, &reset_uri, None, Some(json!({ "new_password": "short" })))
        .await;
    assert_eq!(response.status, StatusCode::BAD_REQUEST);

    let response = ctx
        .send(Method::POST, &reset_uri, None, Some(json!({ "new_password": "N3w!Password" })))
        .await;
    assert_eq!(response.status, StatusCode::OK);

    let response = ctx
        .send(Method::POST, &reset_uri, None, Some(json!({ "new_password": "An0ther!Pass" })))
        .await;
    assert_eq!(response.status, StatusCode::BAD_REQUEST);

    assert_eq!(login(&ctx, alice.email(), PASSWORD).await.status, StatusCode::BAD_REQUEST);
    assert_eq!(login(&ctx, alice.email(), "N3w!Password").await.status, StatusCode::OK);
}

#[tokio::test]
async fn test_change_password_requires_current_password() {
    let Some(ctx) = TestContext::new().await else { return };
    let alice = ctx.verified_user("alice").await;

    let response = ctx
        .post(
            "/api/v1/users/change-password",
            &alice.token,
            json!({ "current_password": "Wr0ng!Pass", "new_password": "N3w!Password" }),
        )
        .await;
    assert_eq!(response.status, StatusCode::BAD_REQUEST);

    let response = ctx
        .post(
            "/api/v1/users/change-password",
            &alice.token,
            json!({ "current_password": PASSWORD, "new_password": "N3w!Password" }),
        )
        .await;
    assert_eq!(response.status, StatusCode::OK);

    assert_eq!(login(&ctx, alice.email(), "N3w!Password").await.status, StatusCode::OK);
}

#[tokio::test]
async fn test_resend_verification() {
    let Some(ctx) = TestContext::new().await else { return };
    let pending = ctx.user("pending", false).await;
    let verified = ctx.verified_user("verified").await;

    let response = ctx
        .send(
            Method::POST,
            "/api/v1/users/resend-verification",
            None,
            Some(json!({ "email": pending.email(), "password": PASSWORD })),
        )
        .await;
    assert_eq!(response.status, StatusCode::OK);
    assert!(ctx.mailer.last_token(pending.email(), "/verify/").is_some());

    let response = ctx
        .send(
            Method::POST,
            "/api/v1/users/resend-verification",
            None,
            Some(json!({ "email": verified.email(), "password": PASSWORD })),
        )
        .await;
    assert_eq!(response.status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_me_requires_token() {
    let Some(ctx) = TestContext::new().await else { return };

    let response = ctx.send(Method::GET, "/api/v1/users/me", None, None).await;
    assert_eq!(response.status, StatusCode::UNAUTHORIZED);

    let response = ctx.get("/api/v1/users/me", "garbage").await;
    assert_eq!(response.status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_healthcheck_reports_database() {
    let Some(ctx) = TestContext::new().await else { return };

    let response = ctx.send(Method::GET, "/api/v1/healthcheck", None, None).await;
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.body["status"], "healthy");
    assert_eq!(response.body["database"], "connected");
    assert!(response.headers.contains_key("x-content-type-options"));
}
