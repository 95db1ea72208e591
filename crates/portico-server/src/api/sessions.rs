use std::convert::Infallible;

use axum::{
    extract::State,
    response::sse::{Event, KeepAlive, Sse},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use tokio_stream::StreamExt;

use portico_core::error::ServerError;
use portico_core::state::AppState;

use super::CurrentSession;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", post(create_session))
        .route("/current", get(get_session).delete(end_session))
        .route("/current/sign-in", post(sign_in))
        .route("/current/sign-out", post(sign_out))
        .route("/current/events", get(session_events))
}

/// POST /api/sessions: Start a browsing session.
async fn create_session(State(state): State<AppState>) -> Json<serde_json::Value> {
    let session = state.create_session().await;
    Json(serde_json::json!({
        "sessionId": session.id,
        "snapshot": session.identity.snapshot(),
    }))
}

async fn get_session(CurrentSession(session): CurrentSession) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "sessionId": session.id,
        "createdAt": session.created_at,
        "snapshot": session.identity.snapshot(),
        "views": session.view_count(),
    }))
}

async fn end_session(
    State(state): State<AppState>,
    CurrentSession(session): CurrentSession,
) -> Json<serde_json::Value> {
    session.identity.sign_out().await;
    let removed = state.sessions.remove(&session.id).await;
    Json(serde_json::json!({ "deleted": removed }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SignInRequest {
    email: String,
    password: String,
}

async fn sign_in(
    CurrentSession(session): CurrentSession,
    Json(body): Json<SignInRequest>,
) -> Result<Json<serde_json::Value>, ServerError> {
    let snapshot = session.identity.sign_in(&body.email, &body.password).await?;
    Ok(Json(serde_json::json!({ "snapshot": snapshot })))
}

async fn sign_out(CurrentSession(session): CurrentSession) -> Json<serde_json::Value> {
    let snapshot = session.identity.sign_out().await;
    Json(serde_json::json!({ "snapshot": snapshot }))
}

// ─── /api/sessions/current/events (SSE) ──────────────────────────────

/// GET /api/sessions/current/events: Stream identity snapshots.
///
/// The current snapshot is sent immediately, then one event per change.
async fn session_events(
    CurrentSession(session): CurrentSession,
) -> Sse<impl tokio_stream::Stream<Item = Result<Event, Infallible>>> {
    let snapshots = tokio_stream::wrappers::WatchStream::new(session.identity.subscribe());
    let stream = snapshots.map(|snapshot| {
        Ok::<_, Infallible>(
            Event::default()
                .event("snapshot")
                .data(serde_json::to_string(&snapshot).unwrap_or_default()),
        )
    });
    Sse::new(stream).keep_alive(KeepAlive::default())
}
