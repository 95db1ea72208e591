//! Boundary validation for submitted partial records.
//!
//! Runs before a partial is handed to the controller, so nothing that fails
//! here ever reaches the workflow store.

use std::sync::OnceLock;

use regex::Regex;

use crate::models::{FieldValue, Fields};
use crate::workflow::schema::{FieldRules, StepDef, StepId, WorkflowSchema};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("unknown field '{field}' for workflow '{workflow}'")]
    UnknownField { workflow: String, field: String },

    #[error("field '{field}' expects a {expected} value, got {actual}")]
    WrongKind {
        field: String,
        expected: &'static str,
        actual: &'static str,
    },

    #[error("field '{0}' is required")]
    Required(String),

    #[error("field '{0}' is not a valid email address")]
    InvalidEmail(String),

    #[error("field '{field}' must be one of: {allowed}")]
    NotAllowed { field: String, allowed: String },

    #[error("field '{field}' exceeds {max} characters")]
    TooLong { field: String, max: usize },

    #[error("step {0} is not declared")]
    UnknownStep(StepId),
}

fn email_regex() -> &'static Regex {
    static EMAIL: OnceLock<Regex> = OnceLock::new();
    EMAIL.get_or_init(|| Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").expect("static email pattern"))
}

pub fn is_valid_email(s: &str) -> bool {
    email_regex().is_match(s.trim())
}

/// Check `partial` against the workflow's field schema and the rules of the
/// step it was submitted from.
pub fn validate_partial(
    schema: &WorkflowSchema,
    step: StepId,
    partial: &Fields,
) -> Result<(), ValidationError> {
    let step_def = schema
        .step(step)
        .ok_or(ValidationError::UnknownStep(step))?;

    for (field, value) in partial {
        let default = schema
            .defaults
            .get(field)
            .ok_or_else(|| ValidationError::UnknownField {
                workflow: schema.name.clone(),
                field: field.clone(),
            })?;
        if default.kind() != value.kind() {
            return Err(ValidationError::WrongKind {
                field: field.clone(),
                expected: default.kind().as_str(),
                actual: value.kind().as_str(),
            });
        }
    }

    check_rules(step_def, partial)
}

fn check_rules(step: &StepDef, partial: &Fields) -> Result<(), ValidationError> {
    for (field, rules) in &step.rules {
        match partial.get(field) {
            None => {
                if rules.required {
                    return Err(ValidationError::Required(field.clone()));
                }
            }
            Some(value) => check_value(field, value, rules)?,
        }
    }
    Ok(())
}

fn check_value(field: &str, value: &FieldValue, rules: &FieldRules) -> Result<(), ValidationError> {
    if rules.required && value.is_blank() {
        return Err(ValidationError::Required(field.to_string()));
    }
    // Optional fields left empty skip the remaining checks.
    if value.is_blank() {
        return Ok(());
    }

    if let Some(text) = value.as_text() {
        if rules.email && !is_valid_email(text) {
            return Err(ValidationError::InvalidEmail(field.to_string()));
        }
        if let Some(max) = rules.max_len {
            if text.chars().count() > max {
                return Err(ValidationError::TooLong {
                    field: field.to_string(),
                    max,
                });
            }
        }
    }

    if let Some(allowed) = &rules.one_of {
        let ok = match value {
            FieldValue::List(items) => items.iter().all(|i| allowed.contains(i)),
            other => other
                .branch_key()
                .map(|k| allowed.iter().any(|a| a == k))
                .unwrap_or(false),
        };
        if !ok {
            return Err(ValidationError::NotAllowed {
                field: field.to_string(),
                allowed: allowed.join(", "),
            });
        }
    }

    Ok(())
}
