//! Record-store boundary.
//!
//! The workflow engine persists finished records and resolves profiles
//! through [`RecordStore`]. Every call returns a [`RecordResult`]; transport,
//! auth and decode failures are folded into `Failure` at this boundary, so
//! the engine only ever handles typed results.
//!
//! Implementations:
//! - [`SqliteRecordStore`](crate::store::SqliteRecordStore): local, on the
//!   shared `Database`.
//! - [`HttpRecordStore`]: remote record service over HTTP with bearer auth.

pub mod http;

use async_trait::async_trait;

pub use crate::models::RecordResult;
pub use http::HttpRecordStore;

/// Collection holding one profile per identity, keyed by uid.
pub const PROFILES: &str = "profiles";

#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Create a record. A missing `id` in `data` is assigned by the store.
    async fn create(&self, token: &str, collection: &str, data: serde_json::Value) -> RecordResult;

    async fn read(&self, token: &str, collection: &str, id: &str) -> RecordResult;

    /// Shallow-merge `data` into an existing record.
    async fn update(
        &self,
        token: &str,
        collection: &str,
        id: &str,
        data: serde_json::Value,
    ) -> RecordResult;
}

/// Maps a bearer token to the uid it was issued for.
#[async_trait]
pub trait TokenVerifier: Send + Sync {
    async fn verify(&self, token: &str) -> Option<String>;
}
