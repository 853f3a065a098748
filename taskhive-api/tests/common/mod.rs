//! Common test utilities for integration tests
//!
//! - Router backed by a real PostgreSQL database (`DATABASE_URL`)
//! - [`RecordingMailer`] so emailed tokens can be read back
//! - [`MemoryBlobStore`] standing in for attachment storage
//! - Helpers for verified users, tokens and JSON requests
//!
//! Tests call [`TestContext::new`] and return early when it yields `None`,
//! which happens when no database is configured.

#![allow(dead_code)]

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{header, HeaderMap, Method, Request, StatusCode},
    Router,
};
use serde_json::{json, Value};
use sqlx::PgPool;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use taskhive_api::{
    app::{build_router, AppState},
    config::Config,
};
use taskhive_shared::{
    auth::{password::hash_password_async, tokens::generate_token},
    db::migrations::run_migrations,
    mail::{MailError, MailMessage, Mailer},
    models::user::{CreateUser, User},
    storage::{BlobStore, StorageError, StoredBlob, UploadFile},
};
use tower::ServiceExt;
use uuid::Uuid;

/// Password that satisfies the strength policy
pub const PASSWORD: &str = "Str0ng!Pass";

/// Captures outgoing mail
#[derive(Debug, Default)]
pub struct RecordingMailer {
    sent: Mutex<Vec<MailMessage>>,
}

impl RecordingMailer {
    pub fn messages_to(&self, to: &str) -> Vec<MailMessage> {
        let sent = self.sent.lock().unwrap();
        sent.iter().filter(|m| m.to == to).cloned().collect()
    }

    /// Token from the most recent link to `to` whose path contains `marker`
    ///
    /// `marker` is `"/verify/"` or `"/reset-password/"`.
    pub fn last_token(&self, to: &str, marker: &str) -> Option<String> {
        self.messages_to(to).iter().rev().find_map(|m| {
            let start = m.text.find(marker)? + marker.len();
            let token: String = m.text[start..]
                .chars()
                .take_while(|c| c.is_ascii_hexdigit())
                .collect();
            (!token.is_empty()).then_some(token)
        })
    }
}

#[async_trait]
impl Mailer for RecordingMailer {
    async fn send(&self, message: MailMessage) -> Result<(), MailError> {
        self.sent.lock().unwrap().push(message);
        Ok(())
    }
}

/// In-memory blob store
///
/// Files whose name contains `"fail"` are rejected, to exercise partial
/// upload failures.
#[derive(Debug, Default)]
pub struct MemoryBlobStore {
    blobs: Mutex<HashSet<String>>,
}

impl MemoryBlobStore {
    pub fn contains(&self, external_id: &str) -> bool {
        self.blobs.lock().unwrap().contains(external_id)
    }

    pub fn len(&self) -> usize {
        self.blobs.lock().unwrap().len()
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn put(&self, file: UploadFile) -> Result<StoredBlob, StorageError> {
        if file.filename.contains("fail") {
            return Err(StorageError::Upstream(format!("rejected {}", file.filename)));
        }

        let external_id = format!("memory/{}", Uuid::new_v4());
        self.blobs.lock().unwrap().insert(external_id.clone());

        Ok(StoredBlob {
            url: format!("memory://{}", external_id),
            external_id,
            size: file.data.len() as i64,
        })
    }

    async fn delete(&self, external_id: &str) -> Result<(), StorageError> {
        if self.blobs.lock().unwrap().remove(external_id) {
            Ok(())
        } else {
            Err(StorageError::InvalidKey(external_id.to_string()))
        }
    }
}

/// A verified user and an access token for them
#[derive(Debug, Clone)]
pub struct TestUser {
    pub user: User,
    pub token: String,
}

impl TestUser {
    pub fn id(&self) -> Uuid {
        self.user.id
    }

    pub fn email(&self) -> &str {
        &self.user.email
    }
}

/// Response with a parsed JSON body (`Value::Null` when empty)
#[derive(Debug)]
pub struct TestResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Value,
}

/// Test context containing all necessary resources
pub struct TestContext {
    pub db: PgPool,
    pub state: AppState,
    pub app: Router,
    pub mailer: Arc<RecordingMailer>,
    pub blobs: Arc<MemoryBlobStore>,
}

impl TestContext {
    /// Connects, migrates and builds the router
    ///
    /// Returns `None` (after printing a notice) without `DATABASE_URL`.
    pub async fn new() -> Option<Self> {
        let Ok(database_url) = std::env::var("DATABASE_URL") else {
            eprintln!("DATABASE_URL not set; skipping database-backed test");
            return None;
        };

        let config = Config::from_vars(HashMap::from([
            ("DATABASE_URL".to_string(), database_url),
            ("JWT_SECRET".to_string(), "integration-access-secret-0123456789abcdef".to_string()),
            (
                "REFRESH_TOKEN_SECRET".to_string(),
                "integration-refresh-secret-0123456789abcdef".to_string(),
            ),
            ("STORAGE_BACKEND".to_string(), "disabled".to_string()),
        ]))
        .expect("test configuration");

        let db = PgPool::connect(&config.database.url).await.expect("connect to test database");
        run_migrations(&db).await.expect("run migrations");

        let mailer = Arc::new(RecordingMailer::default());
        let blobs = Arc::new(MemoryBlobStore::default());
        let state = AppState::with_services(db.clone(), config, mailer.clone(), blobs.clone());
        let app = build_router(state.clone());

        Some(Self {
            db,
            state,
            app,
            mailer,
            blobs,
        })
    }

    /// Creates a user directly in the store, optionally verified
    pub async fn user(&self, label: &str, verified: bool) -> TestUser {
        let password_hash = hash_password_async(PASSWORD.to_string()).await.unwrap();
        let verification = generate_token();

        let user = User::create(
            &self.db,
            CreateUser {
                email: unique_email(label),
                username: label.chars().take(13).collect(),
                fullname: None,
                password_hash,
                role: None,
                email_verification_token_hash: verification.hash,
                email_verification_expiry: verification.expires_at,
            },
        )
        .await
        .unwrap();

        if verified {
            User::mark_email_verified(&self.db, user.id).await.unwrap();
        }

        let user = User::find_by_id(&self.db, user.id).await.unwrap().unwrap();
        let token = self.state.keys.issue_pair(user.id).unwrap().access_token;

        TestUser { user, token }
    }

    pub async fn verified_user(&self, label: &str) -> TestUser {
        self.user(label, true).await
    }

    /// Sends a request with an optional bearer token and JSON body
    pub async fn send(&self, method: Method, uri: &str, token: Option<&str>, body: Option<Value>) -> TestResponse {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
        }

        let request = match body {
            Some(body) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        self.execute(request).await
    }

    pub async fn execute(&self, request: Request<Body>) -> TestResponse {
        let response = self.app.clone().oneshot(request).await.unwrap();

        let status = response.status();
        let headers = response.headers().clone();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into()))
        };

        TestResponse { status, headers, body }
    }

    pub async fn get(&self, uri: &str, token: &str) -> TestResponse {
        self.send(Method::GET, uri, Some(token), None).await
    }

    pub async fn post(&self, uri: &str, token: &str, body: Value) -> TestResponse {
        self.send(Method::POST, uri, Some(token), Some(body)).await
    }

    pub async fn put(&self, uri: &str, token: &str, body: Value) -> TestResponse {
        self.send(Method::PUT, uri, Some(token), Some(body)).await
    }

    pub async fn patch(&self, uri: &str, token: &str, body: Value) -> TestResponse {
        self.send(Method::PATCH, uri, Some(token), Some(body)).await
    }

    pub async fn delete(&self, uri: &str, token: &str) -> TestResponse {
        self.send(Method::DELETE, uri, Some(token), None).await
    }

    /// Creates a project owned by `owner` and returns its id
    pub async fn project(&self, owner: &TestUser, name: &str) -> String {
        let response = self
            .post("/api/v1/projects", &owner.token, json!({ "name": unique_name(name) }))
            .await;
        assert_eq!(response.status, StatusCode::CREATED, "{}", response.body);
        response.body["project"]["id"].as_str().unwrap().to_string()
    }

    /// Adds `user` to a project with `role`; returns the membership id
    pub async fn add_member(&self, admin: &TestUser, project_id: &str, user: &TestUser, role: &str) -> String {
        let response = self
            .post(
                &format!("/api/v1/projects/{}/members", project_id),
                &admin.token,
                json!({ "email": user.email(), "role": role }),
            )
            .await;
        assert_eq!(response.status, StatusCode::CREATED, "{}", response.body);
        response.body["id"].as_str().unwrap().to_string()
    }

    /// Membership id of `user` on a project, looked up through the API
    pub async fn membership_id(&self, viewer: &TestUser, project_id: &str, user: &TestUser) -> String {
        let response = self
            .get(&format!("/api/v1/projects/{}/members", project_id), &viewer.token)
            .await;
        assert_eq!(response.status, StatusCode::OK, "{}", response.body);

        response.body
            .as_array()
            .unwrap()
            .iter()
            .find(|m| m["user_id"] == user.id().to_string())
            .map(|m| m["membership_id"].as_str().unwrap().to_string())
            .unwrap()
    }

    /// Creates a task and returns its id
    pub async fn task(&self, author: &TestUser, project_id: &str, body: Value) -> String {
        let response = self
            .post(&format!("/api/v1/tasks/{}", project_id), &author.token, body)
            .await;
        assert_eq!(response.status, StatusCode::CREATED, "{}", response.body);
        response.body["id"].as_str().unwrap().to_string()
    }
}

pub fn unique_email(label: &str) -> String {
    format!("{}-{}@example.com", label, Uuid::new_v4().simple())
}

pub fn unique_name(label: &str) -> String {
    format!("{} {}", label, Uuid::new_v4().simple())
}

/// Builds a `multipart/form-data` body with one part per `(field, filename, content)`
pub fn multipart_body(parts: &[(&str, &str, &str)]) -> (String, Body) {
    let boundary = "taskhive-test-boundary";
    let mut body = String::new();

    for (field, filename, content) in parts {
        body.push_str(&format!(
            "--{boundary}\r\nContent-Disposition: form-data; name=\"{field}\"; filename=\"{filename}\"\r\nContent-Type: text/plain\r\n\r\n{content}\r\n"
        ));
    }
    body.push_str(&format!("--{boundary}--\r\n"));

    (format!("multipart/form-data; boundary={}", boundary), Body::from(body))
}
