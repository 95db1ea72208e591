//! Step-graph controller: sequencing for one mounted workflow view.
//!
//! The controller owns a transient [`StepGraphPosition`] and a handle to the
//! session's [`WorkflowStore`]. Every transition goes through the store:
//!
//! ```text
//! advance(partial) ──► store.merge ──► route(current step, merged fields) ──► move
//! retreat()        ──► pop trail
//! restart()        ──► store.reset ──► entry step
//! ```
//!
//! Back-navigation pops the trail of steps actually visited rather than
//! decrementing the id, so leaving a merge step returns to whichever branch
//! the user came through.

use std::sync::Arc;

use serde::Serialize;

use crate::models::Fields;
use crate::workflow::schema::{StepDef, StepId, Transition, WorkflowSchema};
use crate::workflow::store::{WorkflowState, WorkflowStore};

/// Where a view currently is in its workflow graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StepGraphPosition {
    pub current: StepId,
    /// Steps advanced from, oldest first.
    pub trail: Vec<StepId>,
}

/// Successor chosen by a step's transition rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Route {
    pub to: StepId,
    /// The branch value was not one of the declared cases and the default
    /// branch was taken.
    pub fallback: bool,
}

/// Result of [`StepGraphController::advance`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "camelCase")]
pub enum Advance {
    Moved {
        from: StepId,
        to: StepId,
        fallback: bool,
    },
    /// Terminal step: the partial was merged but there is nowhere to go.
    Stayed { at: StepId },
}

/// Apply `step`'s transition rule to `fields`. `None` for terminal steps.
pub fn route(workflow: &str, step: &StepDef, fields: &Fields) -> Option<Route> {
    match &step.transition {
        Transition::Next { to } => Some(Route {
            to: *to,
            fallback: false,
        }),
        Transition::Branch(rule) => {
            let key = fields.get(&rule.field).and_then(|v| v.branch_key());
            match key.and_then(|k| rule.cases.get(k)) {
                Some(to) => Some(Route {
                    to: *to,
                    fallback: false,
                }),
                None => {
                    tracing::warn!(
                        workflow = %workflow,
                        step = %step.id,
                        field = %rule.field,
                        value = ?key,
                        "unrecognized branch value, taking default branch {}",
                        rule.otherwise
                    );
                    Some(Route {
                        to: rule.otherwise,
                        fallback: true,
                    })
                }
            }
        }
        Transition::Terminal => None,
    }
}

pub struct StepGraphController {
    schema: Arc<WorkflowSchema>,
    store: WorkflowStore,
    position: StepGraphPosition,
}

impl StepGraphController {
    /// Mount a view at the workflow's entry step. Stored fields are left as
    /// they are.
    pub fn mount(schema: Arc<WorkflowSchema>, store: WorkflowStore) -> Self {
        let position = StepGraphPosition {
            current: schema.entry,
            trail: Vec::new(),
        };
        Self {
            schema,
            store,
            position,
        }
    }

    pub fn schema(&self) -> &WorkflowSchema {
        &self.schema
    }

    pub fn current(&self) -> StepId {
        self.position.current
    }

    pub fn current_step(&self) -> &StepDef {
        // `current` only ever holds ids taken from the schema.
        self.schema
            .step(self.position.current)
            .unwrap_or_else(|| unreachable!("step {} not in graph", self.position.current))
    }

    pub fn position(&self) -> &StepGraphPosition {
        &self.position
    }

    pub fn is_terminal(&self) -> bool {
        self.current_step().is_terminal()
    }

    pub fn state(&self) -> WorkflowState {
        self.store.get_state(&self.schema)
    }

    /// The step `advance(partial)` would move to, without touching the store.
    pub fn peek_next(&self, partial: &Fields) -> Option<Route> {
        let preview = self.store.preview_merge(&self.schema, partial);
        route(&self.schema.name, self.current_step(), &preview.fields)
    }

    /// Merge `partial`, then route on the merged record.
    pub fn advance(&mut self, partial: &Fields) -> Advance {
        self.store.merge(&self.schema, partial);

        let from = self.position.current;
        let merged = self.store.get_state(&self.schema);
        match route(&self.schema.name, self.current_step(), &merged.fields) {
            Some(Route { to, fallback }) => {
                self.position.trail.push(from);
                self.position.current = to;
                tracing::debug!(workflow = %self.schema.name, %from, %to, fallback, "advanced");
                Advance::Moved { from, to, fallback }
            }
            None => Advance::Stayed { at: from },
        }
    }

    /// Return to the step the user advanced from. No-op at the entry step.
    pub fn retreat(&mut self) -> StepId {
        if let Some(previous) = self.position.trail.pop() {
            tracing::debug!(
                workflow = %self.schema.name,
                from = %self.position.current,
                to = %previous,
                "retreated"
            );
            self.position.current = previous;
        }
        self.position.current
    }

    /// Reset the stored record and go back to the entry step.
    pub fn restart(&mut self) -> StepId {
        self.store.reset(&self.schema);
        self.position = StepGraphPosition {
            current: self.schema.entry,
            trail: Vec::new(),
        };
        tracing::debug!(workflow = %self.schema.name, "restarted");
        self.position.current
    }
}
