//! Declared workflow schemas.
//!
//! A workflow YAML declares its steps, entry point, default record and the
//! transition table that drives the step graph:
//!
//! ```yaml
//! name: "onboarding"
//! description: "New member onboarding"
//! entry: 1
//! commit: "profiles"
//!
//! defaults:
//!   email: ""
//!   field1: ""
//!
//! steps:
//!   - id: 1
//!     title: "Contact"
//!     fields: [email]
//!     rules:
//!       email: { required: true, email: true }
//!     next: 2
//!
//!   - id: 2
//!     title: "Are you licensed?"
//!     fields: [field1]
//!     branch:
//!       field: field1
//!       cases: { "yes": 3, "no": 4 }
//!       otherwise: 4
//!
//!   - id: 5
//!     title: "Result"
//!     terminal: true
//! ```
//!
//! Every step carries exactly one of `next`, `branch` or `terminal`.

use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::models::Fields;

/// Identifier of a step within one workflow graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StepId(pub u32);

impl fmt::Display for StepId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SchemaError {
    #[error("Failed to parse workflow YAML: {0}")]
    Parse(String),

    #[error("Failed to read workflow file '{path}': {reason}")]
    Io { path: String, reason: String },

    #[error("workflow '{workflow}': step {step} declares {reason}")]
    InvalidStep {
        workflow: String,
        step: StepId,
        reason: String,
    },

    #[error("workflow '{workflow}': duplicate step id {step}")]
    DuplicateStep { workflow: String, step: StepId },

    #[error("workflow '{workflow}': entry step {step} is not declared")]
    MissingEntry { workflow: String, step: StepId },

    #[error("workflow '{workflow}': step {from} transitions to undeclared step {to}")]
    DanglingTarget {
        workflow: String,
        from: StepId,
        to: StepId,
    },

    #[error("workflow '{workflow}': step {step} is unreachable from the entry step")]
    Unreachable { workflow: String, step: StepId },

    #[error("workflow '{workflow}': no terminal step declared")]
    NoTerminal { workflow: String },

    #[error("workflow '{workflow}': field '{field}' is used by step {step} but has no default")]
    UndeclaredField {
        workflow: String,
        step: StepId,
        field: String,
    },
}

/// Routing for a branch step: the merged value of `field` selects a case;
/// anything else (including values of a kind with no branch key) goes to
/// `otherwise`, the negative branch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BranchRule {
    pub field: String,
    pub cases: BTreeMap<String, StepId>,
    pub otherwise: StepId,
}

/// Outgoing edge(s) of one step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Transition {
    Next { to: StepId },
    Branch(BranchRule),
    Terminal,
}

impl Transition {
    /// Every step this transition may lead to.
    pub fn targets(&self) -> Vec<StepId> {
        match self {
            Transition::Next { to } => vec![*to],
            Transition::Branch(rule) => {
                let mut targets: Vec<StepId> = rule.cases.values().copied().collect();
                targets.push(rule.otherwise);
                targets.sort();
                targets.dedup();
                targets
            }
            Transition::Terminal => Vec::new(),
        }
    }
}

/// Boundary checks applied to a field when its step is submitted.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldRules {
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub email: bool,
    #[serde(default, alias = "one_of", skip_serializing_if = "Option::is_none")]
    pub one_of: Option<Vec<String>>,
    #[serde(default, alias = "max_len", skip_serializing_if = "Option::is_none")]
    pub max_len: Option<usize>,
}

/// One step of the graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawStep", into = "RawStep")]
pub struct StepDef {
    pub id: StepId,
    pub title: Option<String>,
    /// Fields collected by this step's view.
    pub fields: Vec<String>,
    pub rules: BTreeMap<String, FieldRules>,
    pub transition: Transition,
}

impl StepDef {
    pub fn is_terminal(&self) -> bool {
        matches!(self.transition, Transition::Terminal)
    }
}

/// On-disk shape of a step, with the transition spelled as sibling keys.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct RawStep {
    id: StepId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    title: Option<String>,
    #[serde(default)]
    fields: Vec<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    rules: BTreeMap<String, FieldRules>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    next: Option<StepId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    branch: Option<BranchRule>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    terminal: bool,
}

impl TryFrom<RawStep> for StepDef {
    type Error = String;

    fn try_from(raw: RawStep) -> Result<Self, Self::Error> {
        let transition = match (raw.next, raw.branch, raw.terminal) {
            (Some(to), None, false) => Transition::Next { to },
            (None, Some(rule), false) => Transition::Branch(rule),
            (None, None, true) => Transition::Terminal,
            _ => {
                return Err(format!(
                    "step {} must declare exactly one of `next`, `branch` or `terminal`",
                    raw.id
                ))
            }
        };
        Ok(StepDef {
            id: raw.id,
            title: raw.title,
            fields: raw.fields,
            rules: raw.rules,
            transition,
        })
    }
}

impl From<StepDef> for RawStep {
    fn from(step: StepDef) -> Self {
        let (next, branch, terminal) = match step.transition {
            Transition::Next { to } => (Some(to), None, false),
            Transition::Branch(rule) => (None, Some(rule), false),
            Transition::Terminal => (None, None, true),
        };
        RawStep {
            id: step.id,
            title: step.title,
            fields: step.fields,
            rules: step.rules,
            next,
            branch,
            terminal,
        }
    }
}

/// Static declaration of one workflow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowSchema {
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    pub entry: StepId,

    /// Record-store collection the finished record is written to before the
    /// graph moves onto its terminal step.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commit: Option<String>,

    /// Complete default record; its keys are the workflow's field schema.
    pub defaults: Fields,

    pub steps: Vec<StepDef>,
}

impl WorkflowSchema {
    /// Parse a workflow schema from a YAML string. The result is validated.
    pub fn from_yaml(yaml: &str) -> Result<Self, SchemaError> {
        let schema: WorkflowSchema =
            serde_yaml::from_str(yaml).map_err(|e| SchemaError::Parse(e.to_string()))?;
        schema.validate()?;
        Ok(schema)
    }

    /// Load a workflow schema from a file path.
    pub fn from_file(path: &str) -> Result<Self, SchemaError> {
        let content = std::fs::read_to_string(path).map_err(|e| SchemaError::Io {
            path: path.to_string(),
            reason: e.to_string(),
        })?;
        Self::from_yaml(&content)
    }

    pub fn step(&self, id: StepId) -> Option<&StepDef> {
        self.steps.iter().find(|s| s.id == id)
    }

    pub fn is_terminal(&self, id: StepId) -> bool {
        self.step(id).map(StepDef::is_terminal).unwrap_or(false)
    }

    /// Static checks over the transition table.
    pub fn validate(&self) -> Result<(), SchemaError> {
        let workflow = self.name.clone();

        let mut index: HashMap<StepId, &StepDef> = HashMap::new();
        for step in &self.steps {
            if index.insert(step.id, step).is_some() {
                return Err(SchemaError::DuplicateStep {
                    workflow,
                    step: step.id,
                });
            }
        }

        if !index.contains_key(&self.entry) {
            return Err(SchemaError::MissingEntry {
                workflow,
                step: self.entry,
            });
        }

        for step in &self.steps {
            for to in step.transition.targets() {
                if !index.contains_key(&to) {
                    return Err(SchemaError::DanglingTarget {
                        workflow,
                        from: step.id,
                        to,
                    });
                }
            }
            if to_self(step) {
                return Err(SchemaError::InvalidStep {
                    workflow,
                    step: step.id,
                    reason: "a transition to itself".to_string(),
                });
            }

            let mut used: Vec<&String> = step.fields.iter().chain(step.rules.keys()).collect();
            if let Transition::Branch(rule) = &step.transition {
                used.push(&rule.field);
            }
            for field in used {
                if !self.defaults.contains_key(field) {
                    return Err(SchemaError::UndeclaredField {
                        workflow,
                        step: step.id,
                        field: field.clone(),
                    });
                }
            }
        }

        if !self.steps.iter().any(StepDef::is_terminal) {
            return Err(SchemaError::NoTerminal { workflow });
        }

        let reachable = self.reachable_from(self.entry);
        if let Some(step) = self.steps.iter().find(|s| !reachable.contains(&s.id)) {
            return Err(SchemaError::Unreachable {
                workflow,
                step: step.id,
            });
        }

        Ok(())
    }

    fn reachable_from(&self, start: StepId) -> BTreeSet<StepId> {
        let mut seen = BTreeSet::new();
        let mut queue = VecDeque::from([start]);
        while let Some(id) = queue.pop_front() {
            if !seen.insert(id) {
                continue;
            }
            if let Some(step) = self.step(id) {
                queue.extend(step.transition.targets());
            }
        }
        seen
    }

    /// Steps with more than one possible predecessor.
    pub fn merge_steps(&self) -> Vec<StepId> {
        let mut incoming: BTreeMap<StepId, BTreeSet<StepId>> = BTreeMap::new();
        for step in &self.steps {
            for to in step.transition.targets() {
                incoming.entry(to).or_default().insert(step.id);
            }
        }
        incoming
            .into_iter()
            .filter(|(_, from)| from.len() > 1)
            .map(|(to, _)| to)
            .collect()
    }
}

fn to_self(step: &StepDef) -> bool {
    step.transition.targets().contains(&step.id)
}
