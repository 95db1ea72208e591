//! Integration tests for the portico-cli commands.
//!
//! These tests exercise the same code paths as the binary, with workflow
//! and input files written to temporary directories.

use std::io::Write;

use portico_cli::commands::{self, workflow};
use portico_core::workflow::{Advance, StepId};

const INTAKE: &str = r#"
name: intake
entry: 1
defaults:
  name: ""
  urgent: false
steps:
  - id: 1
    fields: [name]
    rules:
      name: { required: true }
    next: 2
  - id: 2
    fields: [urgent]
    branch:
      field: urgent
      cases: { "yes": 3 }
      otherwise: 4
  - id: 3
    next: 4
  - id: 4
    terminal: true
"#;

fn write(dir: &tempfile::TempDir, name: &str, content: &str) -> String {
    let path = dir.path().join(name);
    let mut file = std::fs::File::create(&path).expect("create temp file");
    file.write_all(content.as_bytes()).expect("write temp file");
    path.to_string_lossy().to_string()
}

#[test]
fn test_validate_accepts_and_rejects() {
    let dir = tempfile::tempdir().unwrap();
    let ok = write(&dir, "intake.yaml", INTAKE);
    let schema = workflow::validate(&ok).expect("valid workflow");
    assert_eq!(schema.name, "intake");
    assert_eq!(schema.merge_steps(), vec![StepId(4)]);

    let dangling = write(&dir, "broken.yaml", &INTAKE.replace("otherwise: 4", "otherwise: 9"));
    let err = workflow::validate(&dangling).unwrap_err();
    assert!(err.contains('9'), "unexpected error: {}", err);
}

#[test]
fn test_registry_loads_workflows_dir() {
    let dir = tempfile::tempdir().unwrap();
    write(&dir, "intake.yaml", INTAKE);
    let registry = commands::load_registry(dir.path().to_str()).unwrap();
    assert_eq!(registry.names(), vec!["directory", "intake", "onboarding"]);
    assert!(workflow::show(&registry, "intake").is_ok());
    assert!(workflow::show(&registry, "missing").is_err());
}

#[test]
fn test_simulate_onboarding_licensed_path() {
    let dir = tempfile::tempdir().unwrap();
    let input = write(
        &dir,
        "steps.yaml",
        r#"
- { email: ada@example.org, firstName: Ada, lastName: Lovelace }
- { field1: "yes" }
- { licenseNumber: LIC-1, licenseState: MA }
- { agreedToTerms: true }
"#,
    );
    let registry = commands::load_registry(None).unwrap();
    let schema = registry.get("onboarding").unwrap();
    let simulation = workflow::simulate(schema, workflow::load_inputs(&input).unwrap()).unwrap();

    assert!(simulation.terminal);
    assert_eq!(simulation.position.current, StepId(5));
    assert_eq!(simulation.position.trail, vec![StepId(1), StepId(2), StepId(3)]);
    assert_eq!(simulation.steps[3].advance, Advance::Stayed { at: StepId(5) });
    assert!(workflow::run_simulation(&registry, "onboarding", &input, true).is_ok());
}

#[test]
fn test_simulate_stops_on_invalid_input() {
    let dir = tempfile::tempdir().unwrap();
    let input = write(&dir, "steps.json", r#"[{"email": "not-an-email"}]"#);
    let registry = commands::load_registry(None).unwrap();
    let err = workflow::run_simulation(&registry, "onboarding", &input, false).unwrap_err();
    assert!(err.starts_with("Input #1 rejected at step 1"), "unexpected error: {}", err);
}

#[test]
fn test_simulate_unknown_branch_value_takes_default() {
    let dir = tempfile::tempdir().unwrap();
    write(&dir, "intake.yaml", INTAKE);
    let registry = commands::load_registry(dir.path().to_str()).unwrap();
    let partials = vec![
        portico_core::models::fields([("name", "Grace")]),
        portico_core::models::fields([("urgent", false)]),
    ];
    let simulation = workflow::simulate(registry.get("intake").unwrap(), partials).unwrap();
    assert_eq!(
        simulation.steps[1].advance,
        Advance::Moved {
            from: StepId(2),
            to: StepId(4),
            fallback: true
        }
    );
}
