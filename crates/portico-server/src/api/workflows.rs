use std::convert::Infallible;

use axum::{
    extract::{Path, State},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use tokio_stream::StreamExt;

use portico_core::error::ServerError;
use portico_core::gate;
use portico_core::models::Fields;
use portico_core::state::AppState;
use portico_core::workflow::WorkflowSchema;

use super::{guard, CurrentSession};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_workflows))
        .route("/{name}", get(get_workflow))
        .route("/{name}/views", post(mount_view))
        .route("/{name}/views/{id}", get(get_view).delete(unmount_view))
        .route("/{name}/views/{id}/advance", post(advance_view))
        .route("/{name}/views/{id}/retreat", post(retreat_view))
        .route("/{name}/views/{id}/restart", post(restart_view))
        .route("/{name}/views/{id}/redirects", get(view_redirects))
}

fn schema(state: &AppState, name: &str) -> Result<std::sync::Arc<WorkflowSchema>, ServerError> {
    state
        .schemas
        .get(name)
        .ok_or_else(|| ServerError::NotFound(format!("Workflow {} not found", name)))
}

async fn list_workflows(State(state): State<AppState>) -> Json<serde_json::Value> {
    let workflows: Vec<_> = state
        .schemas
        .all()
        .map(|s| {
            serde_json::json!({
                "name": s.name,
                "description": s.description,
                "entry": s.entry,
                "steps": s.steps.len(),
                "commit": s.commit,
            })
        })
        .collect();
    Json(serde_json::json!({ "workflows": workflows }))
}

async fn get_workflow(
    State(state): State<AppState>,
    CurrentSession(session): CurrentSession,
    Path(name): Path<String>,
) -> Result<Response, ServerError> {
    let schema = schema(&state, &name)?;
    if let Some(redirect) = guard(&state, &session, &name) {
        return Ok(redirect);
    }
    Ok(Json(serde_json::json!({
        "schema": schema.as_ref(),
        "state": session.workflows.get_state(&schema),
    }))
    .into_response())
}

/// POST /api/workflows/{name}/views: Mount a view at the entry step.
async fn mount_view(
    State(state): State<AppState>,
    CurrentSession(session): CurrentSession,
    Path(name): Path<String>,
) -> Result<Response, ServerError> {
    let schema = schema(&state, &name)?;
    if let Some(redirect) = guard(&state, &session, &name) {
        return Ok(redirect);
    }
    Ok(Json(session.mount_view(schema)).into_response())
}

async fn get_view(
    State(state): State<AppState>,
    CurrentSession(session): CurrentSession,
    Path((name, id)): Path<(String, String)>,
) -> Result<Response, ServerError> {
    if let Some(redirect) = guard(&state, &session, &name) {
        return Ok(redirect);
    }
    Ok(Json(session.view_snapshot(&name, &id).await?).into_response())
}

async fn unmount_view(
    CurrentSession(session): CurrentSession,
    Path((_name, id)): Path<(String, String)>,
) -> Json<serde_json::Value> {
    Json(serde_json::json!({ "deleted": session.unmount_view(&id) }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AdvanceRequest {
    #[serde(default)]
    data: Fields,
}

/// POST /api/workflows/{name}/views/{id}/advance: Submit the current step.
async fn advance_view(
    State(state): State<AppState>,
    CurrentSession(session): CurrentSession,
    Path((name, id)): Path<(String, String)>,
    Json(body): Json<AdvanceRequest>,
) -> Result<Response, ServerError> {
    if let Some(redirect) = guard(&state, &session, &name) {
        return Ok(redirect);
    }
    let result = session.advance_view(&name, &id, body.data).await?;
    Ok(Json(result).into_response())
}

async fn retreat_view(
    State(state): State<AppState>,
    CurrentSession(session): CurrentSession,
    Path((name, id)): Path<(String, String)>,
) -> Result<Response, ServerError> {
    if let Some(redirect) = guard(&state, &session, &name) {
        return Ok(redirect);
    }
    Ok(Json(session.retreat_view(&name, &id).await?).into_response())
}

async fn restart_view(
    State(state): State<AppState>,
    CurrentSession(session): CurrentSession,
    Path((name, id)): Path<(String, String)>,
) -> Result<Response, ServerError> {
    if let Some(redirect) = guard(&state, &session, &name) {
        return Ok(redirect);
    }
    Ok(Json(session.restart_view(&name, &id).await?).into_response())
}

// ─── /api/workflows/{name}/views/{id}/redirects (SSE) ────────────────

/// GET /api/workflows/{name}/views/{id}/redirects: One event per gate
/// firing while the view is mounted.
async fn view_redirects(
    State(state): State<AppState>,
    CurrentSession(session): CurrentSession,
    Path((name, id)): Path<(String, String)>,
) -> Result<Sse<impl tokio_stream::Stream<Item = Result<Event, Infallible>>>, ServerError> {
    session.view_snapshot(&name, &id).await?;
    let redirects = gate::watch(state.guards.for_view(&name), session.identity.subscribe());
    let stream = redirects.map(|redirect| {
        Ok::<_, Infallible>(
            Event::default()
                .event("redirect")
                .data(serde_json::to_string(&redirect).unwrap_or_default()),
        )
    });
    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}
