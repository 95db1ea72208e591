//! `portico workflow`: Inspect, validate and simulate workflow schemas.

use std::sync::Arc;

use serde::Serialize;

use portico_core::models::Fields;
use portico_core::workflow::{
    validate_partial, Advance, SchemaRegistry, StepGraphController, StepGraphPosition, StepId,
    Transition, WorkflowSchema, WorkflowState, WorkflowStore,
};

/// List every known workflow.
pub fn list(registry: &SchemaRegistry) -> Result<(), String> {
    println!("┌──────────────────┬───────┬──────────────┬──────────────────────────────┐");
    println!("│ Name             │ Steps │ Commit       │ Description                  │");
    println!("├──────────────────┼───────┼──────────────┼──────────────────────────────┤");

    for schema in registry.all() {
        println!(
            "│ {:<16} │ {:<5} │ {:<12} │ {:<28} │",
            truncate(&schema.name, 16),
            schema.steps.len(),
            truncate(schema.commit.as_deref().unwrap_or("-"), 12),
            truncate(schema.description.as_deref().unwrap_or(""), 28),
        );
    }

    println!("└──────────────────┴───────┴──────────────┴──────────────────────────────┘");
    Ok(())
}

/// Validate a workflow YAML file.
pub fn validate(workflow_file: &str) -> Result<WorkflowSchema, String> {
    let schema = WorkflowSchema::from_file(workflow_file).map_err(|e| e.to_string())?;

    println!("✅ Workflow '{}' is valid", schema.name);
    println!("   Entry: step {}", schema.entry);
    println!("   Steps: {}", schema.steps.len());
    println!("   Fields: {}", schema.defaults.len());
    let merges = schema.merge_steps();
    if !merges.is_empty() {
        let ids: Vec<String> = merges.iter().map(|s| s.to_string()).collect();
        println!("   Merge steps: {}", ids.join(", "));
    }

    Ok(schema)
}

/// Print the step graph of a workflow.
pub fn show(registry: &SchemaRegistry, name: &str) -> Result<(), String> {
    let schema = registry
        .get(name)
        .ok_or_else(|| format!("Workflow '{}' not found", name))?;

    println!("📄 {} (entry: step {})", schema.name, schema.entry);
    if let Some(description) = &schema.description {
        println!("   {}", description);
    }
    if let Some(collection) = &schema.commit {
        println!("   Commits to '{}' before the terminal step", collection);
    }
    println!();

    for step in &schema.steps {
        let title = step.title.as_deref().unwrap_or("");
        println!("  [{}] {}", step.id, title);
        if !step.fields.is_empty() {
            println!("      fields: {}", step.fields.join(", "));
        }
        println!("      {}", describe_transition(&step.transition));
    }
    Ok(())
}

pub fn describe_transition(transition: &Transition) -> String {
    match transition {
        Transition::Next { to } => format!("→ {}", to),
        Transition::Branch(rule) => {
            let cases: Vec<String> = rule
                .cases
                .iter()
                .map(|(value, to)| format!("{}={} → {}", rule.field, value, to))
                .collect();
            format!("{}; otherwise → {}", cases.join("; "), rule.otherwise)
        }
        Transition::Terminal => "terminal".to_string(),
    }
}

/// One submitted partial and where it led.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SimulatedStep {
    pub submitted: Fields,
    pub advance: Advance,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Simulation {
    pub steps: Vec<SimulatedStep>,
    pub position: StepGraphPosition,
    pub terminal: bool,
    pub state: WorkflowState,
}

/// Drive a fresh view of `schema` through `partials`, validating each one
/// against the step it is submitted from. Nothing is committed.
pub fn simulate(schema: Arc<WorkflowSchema>, partials: Vec<Fields>) -> Result<Simulation, String> {
    let mut controller = StepGraphController::mount(schema, WorkflowStore::new());
    let mut steps = Vec::with_capacity(partials.len());

    for (i, partial) in partials.into_iter().enumerate() {
        let at: StepId = controller.current();
        validate_partial(controller.schema(), at, &partial)
            .map_err(|e| format!("Input #{} rejected at step {}: {}", i + 1, at, e))?;
        let advance = controller.advance(&partial);
        steps.push(SimulatedStep {
            submitted: partial,
            advance,
        });
    }

    Ok(Simulation {
        steps,
        position: controller.position().clone(),
        terminal: controller.is_terminal(),
        state: controller.state(),
    })
}

/// Parse the simulation input: a YAML (or JSON) list of partial records.
pub fn load_inputs(input_file: &str) -> Result<Vec<Fields>, String> {
    let content = std::fs::read_to_string(input_file)
        .map_err(|e| format!("Failed to read input file '{}': {}", input_file, e))?;
    serde_yaml::from_str(&content)
        .map_err(|e| format!("Failed to parse input file '{}': {}", input_file, e))
}

/// `portico workflow simulate` entry point.
pub fn run_simulation(
    registry: &SchemaRegistry,
    name: &str,
    input_file: &str,
    json: bool,
) -> Result<(), String> {
    let schema = registry
        .get(name)
        .ok_or_else(|| format!("Workflow '{}' not found", name))?;
    let partials = load_inputs(input_file)?;
    let simulation = simulate(schema, partials)?;

    if json {
        let value = serde_json::to_value(&simulation)
            .map_err(|e| format!("Failed to encode simulation: {}", e))?;
        super::print_json(&value);
        return Ok(());
    }

    for step in &simulation.steps {
        match step.advance {
            Advance::Moved { from, to, fallback } => {
                let note = if fallback { " (default branch)" } else { "" };
                println!("  {} → {}{}", from, to, note);
            }
            Advance::Stayed { at } => println!("  {} (terminal, stayed)", at),
        }
    }
    let marker = if simulation.terminal { "🏁" } else { "⏸" };
    println!("{} Ended at step {}", marker, simulation.position.current);
    Ok(())
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let head: String = s.chars().take(max.saturating_sub(1)).collect();
        format!("{}…", head)
    }
}
