use axum::{
    extract::{Path, State},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};

use portico_core::error::ServerError;
use portico_core::state::AppState;

use super::{guard, CurrentSession};

pub fn router() -> Router<AppState> {
    Router::new().route("/{view}", get(check_view))
}

/// GET /api/gates/{view}: whether the session may enter `view`.
///
/// Used for screens that are not workflows, e.g. `login`.
async fn check_view(
    State(state): State<AppState>,
    CurrentSession(session): CurrentSession,
    Path(view): Path<String>,
) -> Result<Response, ServerError> {
    if let Some(redirect) = guard(&state, &session, &view) {
        return Ok(redirect);
    }
    Ok(Json(serde_json::json!({
        "view": view,
        "allowed": true,
        "gates": state.guards.for_view(&view),
    }))
    .into_response())
}
