//! Workflow engine: guarded multi-step forms.
//!
//! Workflows are declared as YAML step graphs, partially-filled records live
//! in a per-session store, and each mounted view drives its own controller.
//!
//! # Architecture
//!
//! ```text
//! onboarding.yaml ──► WorkflowSchema ──► SchemaRegistry
//!                                            │
//!   view submit ──► validate_partial ──► StepGraphController ──► WorkflowStore
//!                                            │                      (merge / reset)
//!                                        route(step, merged fields)
//! ```

pub mod builtin;
pub mod controller;
pub mod registry;
pub mod schema;
pub mod store;
pub mod validation;

pub use controller::{route, Advance, Route, StepGraphController, StepGraphPosition};
pub use registry::SchemaRegistry;
pub use schema::{BranchRule, FieldRules, SchemaError, StepDef, StepId, Transition, WorkflowSchema};
pub use store::{WorkflowState, WorkflowStore};
pub use validation::{validate_partial, ValidationError};
