//! Application state and router builder
//!
//! # Example
//!
//! ```no_run
//! use taskhive_api::{app::{build_router, AppState}, config::Config};
//! use sqlx::PgPool;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let config = Config::from_env()?;
//! let pool = PgPool::connect(&config.database.url).await?;
//! let state = AppState::new(pool, config)?;
//! let app = build_router(state);
//! # Ok(())
//! # }
//! ```

use crate::{
    config::{Config, StorageConfig},
    middleware::{auth::require_auth, security::SecurityHeadersLayer},
    routes,
};
use axum::{
    extract::{DefaultBodyLimit, Request},
    http::{header, HeaderValue, Method},
    routing::{get, patch, post, put},
    Router,
};
use sqlx::PgPool;
use std::sync::Arc;
use taskhive_shared::{
    auth::jwt::TokenKeys,
    mail::{LogMailer, Mailer, SmtpMailer},
    storage::{BlobStore, CloudinaryBlobStore, DisabledBlobStore, LocalBlobStore},
};
use tower_http::{
    cors::CorsLayer,
    limit::RequestBodyLimitLayer,
    services::ServeDir,
    trace::{DefaultOnResponse, TraceLayer},
};
use tracing::Level;

/// Shared application state
///
/// Cloned for each request handler via Axum's `State` extractor.
#[derive(Clone)]
pub struct AppState {
    pub db: PgPool,
    pub config: Arc<Config>,
    pub keys: Arc<TokenKeys>,
    pub mailer: Arc<dyn Mailer>,
    pub blobs: Arc<dyn BlobStore>,
}

impl AppState {
    /// Creates state with the mailer and blob store the config selects
    pub fn new(db: PgPool, config: Config) -> anyhow::Result<Self> {
        let mailer: Arc<dyn Mailer> = match &config.smtp {
            Some(settings) => Arc::new(SmtpMailer::new(settings)?),
            None => {
                tracing::warn!("SMTP_HOST not set; outgoing mail will only be logged");
                Arc::new(LogMailer)
            }
        };

        let blobs: Arc<dyn BlobStore> = match &config.storage {
            StorageConfig::Local { dir, public_base_url } => {
                Arc::new(LocalBlobStore::new(dir.clone(), public_base_url.clone()))
            }
            StorageConfig::Cloudinary(cloudinary) => Arc::new(CloudinaryBlobStore::new(cloudinary.clone())),
            StorageConfig::Disabled => Arc::new(DisabledBlobStore),
        };

        Ok(Self::with_services(db, config, mailer, blobs))
    }

    /// Creates state with explicit collaborators
    pub fn with_services(
        db: PgPool,
        config: Config,
        mailer: Arc<dyn Mailer>,
        blobs: Arc<dyn BlobStore>,
    ) -> Self {
        Self {
            db,
            keys: Arc::new(config.jwt.token_keys()),
            config: Arc::new(config),
            mailer,
            blobs,
        }
    }
}

/// Builds the complete Axum router with all routes and middleware
///
/// # Architecture
///
/// ```text
/// /api/v1
/// ├── GET  /healthcheck                          (public)
/// ├── /users                                     (register, verify, login,
/// │                                               refresh, password reset
/// │                                               are public)
/// ├── /projects[/:project_id[/members[/:membership_id[/role]]]]
/// ├── /tasks/:project_id[/:task_id[/status|/assign|/attachments[/:attachment_id]]]
/// ├── /subtasks/:project_id/:task_id[/:subtask_id[/toggle-status]]
/// └── /notes/:project_id[/n/:note_id]
/// /uploads/*                                     (local storage only)
/// ```
///
/// # Middleware Stack
///
/// Outermost first: security headers, CORS, request tracing, then
/// authentication on protected routes.
pub fn build_router(state: AppState) -> Router {
    let auth = axum::middleware::from_fn_with_state(state.clone(), require_auth);

    // Routes above route_layer require a principal; the rest are public
    let user_routes = Router::new()
        .route("/logout", post(routes::users::logout))
        .route("/change-password", post(routes::users::change_password))
        .route("/me", get(routes::users::me))
        .route_layer(auth.clone())
        .route("/register", post(routes::users::register))
        .route("/verify/:token", get(routes::users::verify_email))
        .route("/login", post(routes::users::login))
        .route("/resend-verification", post(routes::users::resend_verification))
        .route("/refresh", post(routes::users::refresh))
        .route("/forgot-password", post(routes::users::forgot_password))
        .route("/reset-password/:token", post(routes::users::reset_password));

    let project_routes = Router::new()
        .route(
            "/",
            get(routes::projects::list_projects).post(routes::projects::create_project),
        )
        .route(
            "/:project_id",
            get(routes::projects::get_project)
                .put(routes::projects::update_project)
                .delete(routes::projects::delete_project),
        )
        .route(
            "/:project_id/members",
            get(routes::projects::list_members).post(routes::projects::add_member),
        )
        .route(
            "/:project_id/members/:membership_id/role",
            put(routes::projects::update_member_role),
        )
        .route(
            "/:project_id/members/:membership_id",
            axum::routing::delete(routes::projects::remove_member),
        );

    let attachment_upload = patch(routes::tasks::upload_attachments)
        .layer::<_, std::convert::Infallible>(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(routes::tasks::MAX_UPLOAD_REQUEST_BYTES));

    let task_routes = Router::new()
        .route(
            "/:project_id",
            get(routes::tasks::list_tasks).post(routes::tasks::create_task),
        )
        .route(
            "/:project_id/:task_id",
            get(routes::tasks::get_task)
                .put(routes::tasks::update_task)
                .delete(routes::tasks::delete_task),
        )
        .route("/:project_id/:task_id/status", patch(routes::tasks::update_status))
        .route("/:project_id/:task_id/assign", patch(routes::tasks::assign_task))
        .route("/:project_id/:task_id/attachments", attachment_upload)
        .route(
            "/:project_id/:task_id/attachments/:attachment_id",
            axum::routing::delete(routes::tasks::delete_attachment),
        );

    let subtask_routes = Router::new()
        .route(
            "/:project_id/:task_id",
            get(routes::subtasks::list_subtasks).post(routes::subtasks::create_subtask),
        )
        .route(
            "/:project_id/:task_id/:subtask_id",
            put(routes::subtasks::update_subtask).delete(routes::subtasks::delete_subtask),
        )
        .route(
            "/:project_id/:task_id/:subtask_id/toggle-status",
            patch(routes::subtasks::toggle_subtask),
        );

    let note_routes = Router::new()
        .route(
            "/:project_id",
            get(routes::notes::list_notes).post(routes::notes::create_note),
        )
        .route(
            "/:project_id/n/:note_id",
            get(routes::notes::get_note)
                .put(routes::notes::update_note)
                .delete(routes::notes::delete_note),
        );

    let protected = Router::new()
        .nest("/projects", project_routes)
        .nest("/tasks", task_routes)
        .nest("/subtasks", subtask_routes)
        .nest("/notes", note_routes)
        .route_layer(auth);

    let v1_routes = Router::new()
        .route("/healthcheck", get(routes::health::health_check))
        .nest("/users", user_routes)
        .merge(protected);

    let mut app = Router::new().nest("/api/v1", v1_routes);

    if let StorageConfig::Local { dir, .. } = &state.config.storage {
        app = app.nest_service("/uploads", ServeDir::new(dir));
    }

    app.layer(
        TraceLayer::new_for_http()
            .make_span_with(|req: &Request| {
                tracing::info_span!(
                    "request",
                    method = %req.method(),
                    uri = %req.uri(),
                    user_id = tracing::field::Empty,
                )
            })
            .on_response(DefaultOnResponse::new().level(Level::INFO)),
    )
    .layer(cors_layer(&state.config.api.cors_origins))
    .layer(SecurityHeadersLayer::new(state.config.api.production))
    .with_state(state)
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    if origins.iter().any(|o| o == "*") {
        // Development mode: permissive CORS
        return CorsLayer::permissive();
    }

    let origins: Vec<HeaderValue> = origins.iter().filter_map(|origin| origin.parse().ok()).collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE])
        .allow_credentials(true)
        .max_age(std::time::Duration::from_secs(3600))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cors_layer_builds_for_explicit_origins() {
        let _ = cors_layer(&["https://app.example".to_string(), "not a header\u{0}".to_string()]);
        let _ = cors_layer(&["*".to_string()]);
    }
}
