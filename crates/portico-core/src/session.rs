//! Browsing sessions.
//!
//! A session bundles everything that lives for one browser session: the
//! identity resolver, the workflow store, and the workflow views currently
//! mounted. Views are transient; the store outlives them, so remounting a
//! workflow starts at its entry step with all previously entered fields.
//!
//! Sessions that go unused for the registry's idle timeout are dropped, and
//! a session keeps at most [`MAX_VIEWS_PER_SESSION`] mounted views.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::RwLock;

use crate::error::ServerError;
use crate::gate::{GateSet, Redirect};
use crate::identity::{IdentityProvider, IdentityResolver};
use crate::models::{Fields, RecordResult};
use crate::records::{RecordStore, PROFILES};
use crate::workflow::{
    validate_partial, Advance, StepGraphController, StepGraphPosition, StepId, WorkflowSchema,
    WorkflowState, WorkflowStore,
};

/// Mounting beyond this evicts the session's oldest view.
pub const MAX_VIEWS_PER_SESSION: usize = 16;

/// Default time a session may go unused before it is dropped.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(30 * 60);

/// One mounted rendering of a workflow.
pub struct WorkflowView {
    pub id: String,
    controller: StepGraphController,
    /// Id of the record this view committed, so a resubmission updates it.
    committed: Option<String>,
}

/// What a client needs to render a view.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ViewSnapshot {
    pub view_id: String,
    pub workflow: String,
    pub step: StepId,
    pub title: Option<String>,
    pub step_fields: Vec<String>,
    pub terminal: bool,
    pub position: StepGraphPosition,
    pub fields: Fields,
}

/// Result of submitting a step.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ViewAdvance {
    pub advance: Advance,
    /// Record written to the workflow's commit collection, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub committed: Option<serde_json::Value>,
    pub view: ViewSnapshot,
}

impl WorkflowView {
    pub fn snapshot(&self) -> ViewSnapshot {
        let step = self.controller.current_step();
        let WorkflowState { workflow, fields } = self.controller.state();
        ViewSnapshot {
            view_id: self.id.clone(),
            workflow,
            step: step.id,
            title: step.title.clone(),
            step_fields: step.fields.clone(),
            terminal: step.is_terminal(),
            position: self.controller.position().clone(),
            fields,
        }
    }
}

pub struct Session {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub identity: IdentityResolver,
    pub workflows: WorkflowStore,
    records: Arc<dyn RecordStore>,
    views: Mutex<HashMap<String, MountedView>>,
    mounts: AtomicU64,
    last_seen: Mutex<Instant>,
    /// Held across validate, commit and merge so views of the same workflow
    /// cannot change the store between the commit preview and the merge.
    merging: tokio::sync::Mutex<()>,
}

#[derive(Clone)]
struct MountedView {
    workflow: String,
    seq: u64,
    view: Arc<tokio::sync::Mutex<WorkflowView>>,
}

impl Session {
    pub fn new(provider: Arc<dyn IdentityProvider>, records: Arc<dyn RecordStore>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            created_at: Utc::now(),
            identity: IdentityResolver::new(provider, records.clone()),
            workflows: WorkflowStore::new(),
            records,
            views: Mutex::new(HashMap::new()),
            mounts: AtomicU64::new(0),
            last_seen: Mutex::new(Instant::now()),
            merging: tokio::sync::Mutex::new(()),
        }
    }

    pub fn touch(&self) {
        *self.last_seen.lock().unwrap_or_else(|e| e.into_inner()) = Instant::now();
    }

    pub fn idle_for(&self) -> Duration {
        self.last_seen
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .elapsed()
    }

    /// `Err(redirect)` if any of `gates` fires on the current snapshot.
    pub fn guard(&self, gates: &GateSet) -> Result<(), Redirect> {
        match gates.evaluate(&self.identity.snapshot()) {
            Some(redirect) => Err(redirect),
            None => Ok(()),
        }
    }

    fn views(&self) -> MutexGuard<'_, HashMap<String, MountedView>> {
        self.views.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn mount_view(&self, schema: Arc<WorkflowSchema>) -> ViewSnapshot {
        let view = WorkflowView {
            id: uuid::Uuid::new_v4().to_string(),
            controller: StepGraphController::mount(schema, self.workflows.clone()),
            committed: None,
        };
        let snapshot = view.snapshot();
        tracing::info!(
            session = %self.id,
            view = %view.id,
            workflow = %snapshot.workflow,
            "mounted workflow view"
        );
        let seq = self.mounts.fetch_add(1, Ordering::Relaxed);
        let mut views = self.views();
        while views.len() >= MAX_VIEWS_PER_SESSION {
            let Some(oldest) = views
                .iter()
                .min_by_key(|(_, mounted)| mounted.seq)
                .map(|(id, _)| id.clone())
            else {
                break;
            };
            views.remove(&oldest);
            tracing::debug!(session = %self.id, view = %oldest, "evicted oldest workflow view");
        }
        views.insert(
            view.id.clone(),
            MountedView {
                workflow: snapshot.workflow.clone(),
                seq,
                view: Arc::new(tokio::sync::Mutex::new(view)),
            },
        );
        snapshot
    }

    pub fn unmount_view(&self, view_id: &str) -> bool {
        self.views().remove(view_id).is_some()
    }

    pub fn view_count(&self) -> usize {
        self.views().len()
    }

    fn view(&self, workflow: &str, view_id: &str) -> Result<Arc<tokio::sync::Mutex<WorkflowView>>, ServerError> {
        match self.views().get(view_id) {
            Some(mounted) if mounted.workflow == workflow => Ok(mounted.view.clone()),
            Some(_) => Err(ServerError::NotFound(format!(
                "View {} is not a {} view",
                view_id, workflow
            ))),
            None => Err(ServerError::NotFound(format!("View {} not found", view_id))),
        }
    }

    pub async fn view_snapshot(&self, workflow: &str, view_id: &str) -> Result<ViewSnapshot, ServerError> {
        let view = self.view(workflow, view_id)?;
        let guard = view.lock().await;
        Ok(guard.snapshot())
    }

    /// Validate, commit if the next step is terminal, then advance.
    ///
    /// A failed commit leaves both the store and the position untouched.
    pub async fn advance_view(
        &self,
        workflow: &str,
        view_id: &str,
        partial: Fields,
    ) -> Result<ViewAdvance, ServerError> {
        let view = self.view(workflow, view_id)?;
        let _merging = self.merging.lock().await;
        let mut guard = view.lock().await;
        let WorkflowView {
            controller: ctl,
            committed: prior,
            ..
        } = &mut *guard;

        validate_partial(ctl.schema(), ctl.current(), &partial)?;

        let mut committed = None;
        if let (Some(route), Some(collection)) = (ctl.peek_next(&partial), ctl.schema().commit.clone()) {
            if ctl.schema().is_terminal(route.to) {
                let preview = self.workflows.preview_merge(ctl.schema(), &partial);
                let record = self.commit(&collection, &preview, prior.as_deref()).await?;
                if let Some(id) = record.get("id").and_then(|v| v.as_str()) {
                    *prior = Some(id.to_string());
                }
                committed = Some(record);
            }
        }

        let advance = ctl.advance(&partial);
        let commit_collection = ctl.schema().commit.clone();
        let snapshot = guard.snapshot();
        drop(guard);

        if committed.is_some() && commit_collection.as_deref() == Some(PROFILES) {
            self.identity.refresh_profile().await;
        }

        Ok(ViewAdvance {
            advance,
            committed,
            view: snapshot,
        })
    }

    pub async fn retreat_view(&self, workflow: &str, view_id: &str) -> Result<ViewSnapshot, ServerError> {
        let view = self.view(workflow, view_id)?;
        let mut guard = view.lock().await;
        guard.controller.retreat();
        Ok(guard.snapshot())
    }

    pub async fn restart_view(&self, workflow: &str, view_id: &str) -> Result<ViewSnapshot, ServerError> {
        let view = self.view(workflow, view_id)?;
        let _merging = self.merging.lock().await;
        let mut guard = view.lock().await;
        guard.controller.restart();
        guard.committed = None;
        Ok(guard.snapshot())
    }

    /// Persist a finished record. Profiles are keyed by uid and updated in
    /// place. Other collections get a new record, or an update of `existing`
    /// when this view already committed one.
    async fn commit(
        &self,
        collection: &str,
        state: &WorkflowState,
        existing: Option<&str>,
    ) -> Result<serde_json::Value, ServerError> {
        let token = self.identity.bearer_token().await?;
        let uid = self
            .identity
            .snapshot()
            .identity
            .map(|p| p.uid)
            .ok_or_else(|| ServerError::Unauthorized("not signed in".to_string()))?;

        let mut data = serde_json::to_value(&state.fields)
            .map_err(|e| ServerError::Internal(format!("Failed to encode record: {}", e)))?;
        if let Some(obj) = data.as_object_mut() {
            obj.insert("uid".to_string(), serde_json::json!(uid));
            obj.insert("workflow".to_string(), serde_json::json!(state.workflow));
            obj.insert("submittedAt".to_string(), serde_json::json!(Utc::now()));
        }

        let result = if collection == PROFILES {
            match self.records.read(&token, PROFILES, &uid).await {
                RecordResult::Success(_) => self.records.update(&token, PROFILES, &uid, data).await,
                missing if missing.is_not_found() => {
                    data["id"] = serde_json::json!(uid);
                    self.records.create(&token, PROFILES, data).await
                }
                failure => failure,
            }
        } else if let Some(id) = existing {
            self.records.update(&token, collection, id, data).await
        } else {
            self.records.create(&token, collection, data).await
        };

        match result {
            RecordResult::Success(record) => {
                tracing::info!(session = %self.id, workflow = %state.workflow, collection, "committed workflow record");
                Ok(record)
            }
            RecordResult::Failure(error) => {
                tracing::warn!(session = %self.id, workflow = %state.workflow, collection, "commit failed: {}", error);
                Err(ServerError::Unprocessable(error))
            }
        }
    }
}

/// All live sessions, keyed by id.
pub struct SessionRegistry {
    sessions: RwLock<HashMap<String, Arc<Session>>>,
    idle_timeout: Duration,
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::with_idle_timeout(DEFAULT_IDLE_TIMEOUT)
    }
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_idle_timeout(idle_timeout: Duration) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            idle_timeout,
        }
    }

    pub fn idle_timeout(&self) -> Duration {
        self.idle_timeout
    }

    /// Start a session and finish its initial (signed-out) resolution.
    pub async fn create(
        &self,
        provider: Arc<dyn IdentityProvider>,
        records: Arc<dyn RecordStore>,
    ) -> Arc<Session> {
        let session = Arc::new(Session::new(provider, records));
        session.identity.resolve_initial();
        let mut sessions = self.sessions.write().await;
        self.drop_idle(&mut sessions);
        sessions.insert(session.id.clone(), session.clone());
        tracing::info!(session = %session.id, "session created");
        session
    }

    /// Look up a live session and mark it as seen.
    pub async fn get(&self, id: &str) -> Result<Arc<Session>, ServerError> {
        let found = self.sessions.read().await.get(id).cloned();
        match found {
            Some(session) if session.idle_for() < self.idle_timeout => {
                session.touch();
                Ok(session)
            }
            Some(_) => {
                self.sessions.write().await.remove(id);
                tracing::info!(session = %id, "session expired");
                Err(ServerError::NotFound(format!("Session {} expired", id)))
            }
            None => Err(ServerError::NotFound(format!("Session {} not found", id))),
        }
    }

    pub async fn remove(&self, id: &str) -> bool {
        self.sessions.write().await.remove(id).is_some()
    }

    /// Drop every session idle for longer than the timeout. Returns how many
    /// were dropped.
    pub async fn sweep_expired(&self) -> usize {
        let mut sessions = self.sessions.write().await;
        self.drop_idle(&mut sessions)
    }

    fn drop_idle(&self, sessions: &mut HashMap<String, Arc<Session>>) -> usize {
        let before = sessions.len();
        sessions.retain(|_, session| session.idle_for() < self.idle_timeout);
        let dropped = before - sessions.len();
        if dropped > 0 {
            tracing::info!("dropped {} idle sessions", dropped);
        }
        dropped
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }
}
