//! Which gates guard which view.
//!
//! ```yaml
//! onboarding:
//!   - predicate: { require: signed_in }
//!     redirectTo: /login
//! admin:
//!   - predicate: { require: role_at_least, role: admin }
//!     redirectTo: /
//! ```

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::gate::{Gate, GateSet};
use crate::models::Role;

pub const LOGIN_PATH: &str = "/login";
pub const HOME_PATH: &str = "/";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ViewGuards {
    views: BTreeMap<String, GateSet>,
}

impl ViewGuards {
    /// Guards for the built-in views.
    pub fn defaults() -> Self {
        let mut guards = Self::default();
        guards.set("onboarding", GateSet::new(vec![Gate::signed_in(LOGIN_PATH)]));
        guards.set(
            "directory",
            GateSet::new(vec![Gate::role_at_least(Role::Member, LOGIN_PATH)]),
        );
        guards.set("login", GateSet::new(vec![Gate::signed_out(HOME_PATH)]));
        guards.set(
            "admin",
            GateSet::new(vec![
                Gate::signed_in(LOGIN_PATH),
                Gate::role_at_least(Role::Admin, HOME_PATH),
            ]),
        );
        guards
    }

    pub fn from_yaml(yaml: &str) -> Result<Self, String> {
        serde_yaml::from_str(yaml).map_err(|e| format!("Failed to parse view guards YAML: {}", e))
    }

    pub fn set(&mut self, view: impl Into<String>, gates: GateSet) {
        self.views.insert(view.into(), gates);
    }

    /// Layer `other` on top of these guards, view by view.
    pub fn extend(&mut self, other: ViewGuards) {
        self.views.extend(other.views);
    }

    /// Gates for `view`; unguarded views get an empty set.
    pub fn for_view(&self, view: &str) -> GateSet {
        self.views.get(view).cloned().unwrap_or_default()
    }

    pub fn views(&self) -> impl Iterator<Item = &String> {
        self.views.keys()
    }
}
