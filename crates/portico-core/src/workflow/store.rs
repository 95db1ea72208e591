//! Workflow store: partially-completed form records, one per workflow.
//!
//! The store is a cheap `Clone` handle over shared state, the same way
//! `Database` wraps its connection. A session owns one store and hands
//! clones to the step-graph controllers of its mounted views; views never
//! touch it directly.
//!
//! Records are created lazily from the schema defaults on first access and
//! are only ever changed by [`WorkflowStore::merge`] and
//! [`WorkflowStore::reset`].

use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde::Serialize;

use crate::models::Fields;
use crate::workflow::schema::WorkflowSchema;

/// Current record of one named workflow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowState {
    pub workflow: String,
    pub fields: Fields,
}

#[derive(Clone, Default)]
pub struct WorkflowStore {
    records: Arc<RwLock<HashMap<String, Fields>>>,
}

impl WorkflowStore {
    pub fn new() -> Self {
        Self::default()
    }

    // A poisoned lock only means a panic elsewhere while holding it; every
    // write below leaves the map consistent, so the data is still usable.
    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, Fields>> {
        self.records.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, Fields>> {
        self.records.write().unwrap_or_else(|e| e.into_inner())
    }

    /// Current fields for `schema`, or its defaults if never touched.
    pub fn get_state(&self, schema: &WorkflowSchema) -> WorkflowState {
        let fields = self
            .read()
            .get(&schema.name)
            .cloned()
            .unwrap_or_else(|| schema.defaults.clone());
        WorkflowState {
            workflow: schema.name.clone(),
            fields,
        }
    }

    /// Shallow merge: keys in `partial` overwrite, all others are untouched.
    ///
    /// The whole merge happens under one write lock, so readers see either
    /// the old record or the fully merged one.
    pub fn merge(&self, schema: &WorkflowSchema, partial: &Fields) {
        let mut records = self.write();
        let record = records
            .entry(schema.name.clone())
            .or_insert_with(|| schema.defaults.clone());
        apply(record, schema, partial);
        tracing::debug!(
            workflow = %schema.name,
            keys = ?partial.keys().collect::<Vec<_>>(),
            "merged workflow fields"
        );
    }

    /// The record `merge` would produce, without committing it.
    pub fn preview_merge(&self, schema: &WorkflowSchema, partial: &Fields) -> WorkflowState {
        let mut state = self.get_state(schema);
        apply(&mut state.fields, schema, partial);
        state
    }

    /// Replace the record wholesale with the declared defaults.
    pub fn reset(&self, schema: &WorkflowSchema) {
        self.write()
            .insert(schema.name.clone(), schema.defaults.clone());
        tracing::debug!(workflow = %schema.name, "reset workflow fields");
    }

    /// Names of workflows that have been touched in this store.
    pub fn workflows(&self) -> Vec<String> {
        let mut names: Vec<String> = self.read().keys().cloned().collect();
        names.sort();
        names
    }
}

fn apply(record: &mut Fields, schema: &WorkflowSchema, partial: &Fields) {
    for (key, value) in partial {
        // Callers validate partials against the schema; this keeps the record
        // inside the declared keys even if one slips through.
        if schema.defaults.contains_key(key) {
            record.insert(key.clone(), value.clone());
        } else {
            tracing::warn!(workflow = %schema.name, field = %key, "ignoring undeclared field");
        }
    }
}
