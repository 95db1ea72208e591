//! Core error type for the Portico platform.
//!
//! `ServerError` is used by the session layer, stores and HTTP adapters.
//! When the `axum` feature is enabled, it also implements `IntoResponse`
//! so it can be used directly as an axum handler error type.
//!
//! Engine-level failures have their own types (`SchemaError`,
//! `ValidationError`, `IdentityError`) and convert into `ServerError`
//! at the session boundary.

use crate::identity::IdentityError;
use crate::workflow::{SchemaError, ValidationError};

#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// A collaborator (record store) rejected the request; the payload is
    /// the boundary's `{success:false,error}` message.
    #[error("Unprocessable: {0}")]
    Unprocessable(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<ValidationError> for ServerError {
    fn from(e: ValidationError) -> Self {
        ServerError::BadRequest(e.to_string())
    }
}

impl From<SchemaError> for ServerError {
    fn from(e: SchemaError) -> Self {
        ServerError::Internal(e.to_string())
    }
}

impl From<IdentityError> for ServerError {
    fn from(e: IdentityError) -> Self {
        match e {
            IdentityError::InvalidCredentials
            | IdentityError::InvalidToken
            | IdentityError::SignedOut => {
                ServerError::Unauthorized(e.to_string())
            }
            IdentityError::Provider(msg) => ServerError::Unprocessable(msg),
        }
    }
}

// ---------------------------------------------------------------------------
// axum integration (opt-in via feature flag)
// ---------------------------------------------------------------------------

#[cfg(feature = "axum")]
impl axum::response::IntoResponse for ServerError {
    fn into_response(self) -> axum::response::Response {
        use axum::http::StatusCode;

        let (status, message) = match &self {
            ServerError::Database(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg.clone()),
            ServerError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            ServerError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            ServerError::Conflict(msg) => (StatusCode::CONFLICT, msg.clone()),
            ServerError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg.clone()),
            ServerError::Unprocessable(msg) => (StatusCode::UNPROCESSABLE_ENTITY, msg.clone()),
            ServerError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg.clone()),
        };

        let body = serde_json::json!({ "success": false, "error": message });
        (status, axum::Json(body)).into_response()
    }
}
