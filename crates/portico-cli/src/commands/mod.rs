//! CLI command implementations.
//!
//! Each submodule corresponds to a top-level CLI command and reuses
//! the portico-core engine directly.

pub mod server;
pub mod workflow;

use portico_core::workflow::SchemaRegistry;

/// Built-in workflows plus any YAML files in `workflows_dir`.
pub fn load_registry(workflows_dir: Option<&str>) -> Result<SchemaRegistry, String> {
    let mut registry = SchemaRegistry::builtin();
    if let Some(dir) = workflows_dir {
        let count = registry.load_dir(dir).map_err(|e| e.to_string())?;
        tracing::info!("Loaded {} workflow(s) from '{}'", count, dir);
    }
    Ok(registry)
}

/// Pretty-print a JSON value to stdout.
pub fn print_json(value: &serde_json::Value) {
    println!(
        "{}",
        serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
    );
}
