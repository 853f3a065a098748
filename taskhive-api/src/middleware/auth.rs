//! Authentication middleware for protected routes
//!
//! Resolves the caller with [`authenticate`] and inserts the [`Principal`]
//! into request extensions. Handlers read it with `Extension<Principal>`.

use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use taskhive_shared::auth::middleware::{authenticate, Principal};

use crate::{app::AppState, error::ApiError};

pub async fn require_auth(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let principal: Principal = authenticate(&state.db, &state.keys, req.headers()).await?;

    tracing::Span::current().record("user_id", tracing::field::display(principal.user_id));
    req.extensions_mut().insert(principal);

    Ok(next.run(req).await)
}
