//! Portico Core: guarded multi-step workflows.
//!
//! This crate holds the workflow engine (schemas, store, step-graph
//! controller), the access gate, the identity resolver, and the record-store
//! boundary. It has **no HTTP framework dependency** by default, so the
//! same engine drives the HTTP server and the CLI simulator.
//!
//! # Feature Flags
//!
//! - `axum`: Enables `IntoResponse` impl on `ServerError` for use in axum handlers.

pub mod db;
pub mod error;
pub mod gate;
pub mod identity;
pub mod models;
pub mod records;
pub mod session;
pub mod state;
pub mod store;
pub mod workflow;

// Convenience re-exports
pub use db::Database;
pub use error::ServerError;
pub use state::{AppState, AppStateInner};
