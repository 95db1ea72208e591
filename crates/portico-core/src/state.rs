//! Shared application state for the axum server.

use std::sync::Arc;
use std::time::Duration;

use crate::db::Database;
use crate::error::ServerError;
use crate::gate::ViewGuards;
use crate::identity::{IdentityProvider, LocalIdentityProvider};
use crate::records::RecordStore;
use crate::session::{Session, SessionRegistry};
use crate::store::SqliteRecordStore;
use crate::workflow::SchemaRegistry;

/// Shared state accessible by all API handlers.
pub struct AppStateInner {
    pub schemas: SchemaRegistry,
    pub guards: ViewGuards,
    pub identity_provider: Arc<dyn IdentityProvider>,
    pub record_store: Arc<dyn RecordStore>,
    pub sessions: SessionRegistry,
}

pub type AppState = Arc<AppStateInner>;

impl AppStateInner {
    pub fn new(
        schemas: SchemaRegistry,
        guards: ViewGuards,
        identity_provider: Arc<dyn IdentityProvider>,
        record_store: Arc<dyn RecordStore>,
    ) -> Self {
        Self {
            schemas,
            guards,
            identity_provider,
            record_store,
            sessions: SessionRegistry::new(),
        }
    }

    /// Built-in workflows and guards, local accounts, records in `db`.
    pub async fn local(db: Database, accounts: Arc<LocalIdentityProvider>) -> Result<Self, ServerError> {
        let records = Arc::new(SqliteRecordStore::new(db, accounts.clone()));
        accounts.seed_profiles(&records).await?;
        Ok(Self::new(
            SchemaRegistry::builtin(),
            ViewGuards::defaults(),
            accounts,
            records,
        ))
    }

    /// Replace the session registry with one that drops sessions idle for
    /// longer than `idle_timeout`.
    pub fn with_session_idle_timeout(mut self, idle_timeout: Duration) -> Self {
        self.sessions = SessionRegistry::with_idle_timeout(idle_timeout);
        self
    }

    pub async fn create_session(&self) -> Arc<Session> {
        self.sessions
            .create(self.identity_provider.clone(), self.record_store.clone())
            .await
    }
}
