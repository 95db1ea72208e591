pub mod gates;
pub mod sessions;
pub mod workflows;

use std::sync::Arc;

use axum::{
    extract::FromRequestParts,
    http::{header, request::Parts, StatusCode},
    response::{IntoResponse, Response},
    Json, Router,
};

use portico_core::error::ServerError;
use portico_core::gate::Redirect;
use portico_core::session::Session;
use portico_core::state::AppState;

/// Header carrying the browsing-session id.
pub const SESSION_HEADER: &str = "x-portico-session";

/// Build the complete API router with all sub-routes.
pub fn api_router() -> Router<AppState> {
    Router::new()
        .nest("/api/sessions", sessions::router())
        .nest("/api/workflows", workflows::router())
        .nest("/api/gates", gates::router())
}

/// The session named by the `x-portico-session` header.
pub struct CurrentSession(pub Arc<Session>);

impl FromRequestParts<AppState> for CurrentSession {
    type Rejection = ServerError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let id = parts
            .headers
            .get(SESSION_HEADER)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| ServerError::Unauthorized(format!("missing {} header", SESSION_HEADER)))?;
        Ok(Self(state.sessions.get(id).await?))
    }
}

/// `303 See Other` to the gate's target.
pub(crate) fn see_other(redirect: Redirect) -> Response {
    tracing::info!(to = %redirect.to, revision = redirect.revision, "gated request redirected");
    (
        StatusCode::SEE_OTHER,
        [(header::LOCATION, redirect.to.clone())],
        Json(serde_json::json!({ "redirect": redirect })),
    )
        .into_response()
}

/// Check the gates configured for `view`; `Some(response)` if one fires.
pub(crate) fn guard(state: &AppState, session: &Session, view: &str) -> Option<Response> {
    session
        .guard(&state.guards.for_view(view))
        .err()
        .map(see_other)
}
