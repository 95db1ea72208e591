//! Schema registry: built-in workflows plus YAML definitions from disk.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use crate::workflow::builtin;
use crate::workflow::schema::{SchemaError, WorkflowSchema};

/// Validated workflow schemas indexed by name.
#[derive(Clone, Default)]
pub struct SchemaRegistry {
    schemas: BTreeMap<String, Arc<WorkflowSchema>>,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding the built-in `onboarding` and `directory` workflows.
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        for schema in builtin::builtin_schemas() {
            registry.insert(schema);
        }
        registry
    }

    /// Add (or replace) a schema. The schema is validated first.
    pub fn register(&mut self, schema: WorkflowSchema) -> Result<(), SchemaError> {
        schema.validate()?;
        self.insert(schema);
        Ok(())
    }

    fn insert(&mut self, schema: WorkflowSchema) {
        if self.schemas.contains_key(&schema.name) {
            tracing::info!("[SchemaRegistry] Replacing workflow schema: {}", schema.name);
        }
        self.schemas.insert(schema.name.clone(), Arc::new(schema));
    }

    /// Load every `.yaml` / `.yml` file in `dir`. Files override built-ins
    /// with the same workflow name.
    pub fn load_dir(&mut self, dir: &str) -> Result<usize, SchemaError> {
        let dir_path = Path::new(dir);
        let io_err = |reason: String| SchemaError::Io {
            path: dir.to_string(),
            reason,
        };
        if !dir_path.is_dir() {
            return Err(io_err("not a directory".to_string()));
        }

        let mut paths = Vec::new();
        for entry in std::fs::read_dir(dir_path).map_err(|e| io_err(e.to_string()))? {
            let path = entry.map_err(|e| io_err(e.to_string()))?.path();
            match path.extension().and_then(|e| e.to_str()) {
                Some("yaml") | Some("yml") => paths.push(path),
                _ => continue,
            }
        }
        paths.sort();

        let mut count = 0;
        for path in paths {
            let schema = WorkflowSchema::from_file(&path.to_string_lossy())?;
            tracing::info!(
                "[SchemaRegistry] Loaded workflow schema: {} ({} steps)",
                schema.name,
                schema.steps.len()
            );
            self.insert(schema);
            count += 1;
        }
        Ok(count)
    }

    pub fn get(&self, name: &str) -> Option<Arc<WorkflowSchema>> {
        self.schemas.get(name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        self.schemas.keys().cloned().collect()
    }

    pub fn all(&self) -> impl Iterator<Item = &Arc<WorkflowSchema>> {
        self.schemas.values()
    }
}
