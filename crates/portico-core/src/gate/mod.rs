//! Access gates: redirect decisions over identity snapshots.
//!
//! A gate is a pure predicate over [`IdentitySnapshot`] plus a redirect
//! target. Gates never fire while the snapshot is still loading, so a view is
//! not bounced away just because identity resolution has not finished.
//!
//! [`GateWatcher`] adds the one-shot behaviour for a live view: at most one
//! redirect per snapshot revision. [`watch`] drives a watcher from the
//! resolver's subscription.

pub mod guards;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio_stream::Stream;

use crate::models::{IdentitySnapshot, Role};

pub use guards::ViewGuards;

/// Condition under which a view must be left.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "require", rename_all = "snake_case")]
pub enum GatePredicate {
    /// Redirect unless identity and profile are both present.
    SignedIn,
    /// Redirect unless signed in with at least `role`.
    RoleAtLeast { role: Role },
    /// Redirect if identity and profile are both present.
    SignedOut,
}

impl GatePredicate {
    /// Higher is more specific; composed gates are checked in this order.
    fn specificity(&self) -> u8 {
        match self {
            GatePredicate::RoleAtLeast { role } => 10 + *role as u8,
            GatePredicate::SignedIn => 5,
            GatePredicate::SignedOut => 1,
        }
    }
}

/// `true` means the gate fires and the view must redirect.
pub fn evaluate(snapshot: &IdentitySnapshot, predicate: &GatePredicate) -> bool {
    if snapshot.loading {
        return false;
    }
    match predicate {
        GatePredicate::SignedIn => !snapshot.is_signed_in(),
        GatePredicate::RoleAtLeast { role } => match snapshot.role() {
            Some(current) if snapshot.identity.is_some() => current < *role,
            _ => true,
        },
        GatePredicate::SignedOut => snapshot.is_signed_in(),
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Gate {
    pub predicate: GatePredicate,
    pub redirect_to: String,
}

impl Gate {
    pub fn signed_in(redirect_to: impl Into<String>) -> Self {
        Self {
            predicate: GatePredicate::SignedIn,
            redirect_to: redirect_to.into(),
        }
    }

    pub fn role_at_least(role: Role, redirect_to: impl Into<String>) -> Self {
        Self {
            predicate: GatePredicate::RoleAtLeast { role },
            redirect_to: redirect_to.into(),
        }
    }

    pub fn signed_out(redirect_to: impl Into<String>) -> Self {
        Self {
            predicate: GatePredicate::SignedOut,
            redirect_to: redirect_to.into(),
        }
    }

    pub fn should_redirect(&self, snapshot: &IdentitySnapshot) -> bool {
        evaluate(snapshot, &self.predicate)
    }
}

/// A fired gate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Redirect {
    pub to: String,
    pub predicate: GatePredicate,
    pub revision: u64,
}

/// Gates guarding one view, checked most specific first.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<Gate>", into = "Vec<Gate>")]
pub struct GateSet {
    gates: Vec<Gate>,
}

impl From<Vec<Gate>> for GateSet {
    fn from(mut gates: Vec<Gate>) -> Self {
        // Stable sort keeps declaration order among equally specific gates.
        gates.sort_by_key(|g| std::cmp::Reverse(g.predicate.specificity()));
        Self { gates }
    }
}

impl From<GateSet> for Vec<Gate> {
    fn from(set: GateSet) -> Self {
        set.gates
    }
}

impl GateSet {
    pub fn new(gates: Vec<Gate>) -> Self {
        gates.into()
    }

    pub fn gates(&self) -> &[Gate] {
        &self.gates
    }

    pub fn is_empty(&self) -> bool {
        self.gates.is_empty()
    }

    /// First firing gate, if any.
    pub fn evaluate(&self, snapshot: &IdentitySnapshot) -> Option<Redirect> {
        self.gates
            .iter()
            .find(|g| g.should_redirect(snapshot))
            .map(|g| Redirect {
                to: g.redirect_to.clone(),
                predicate: g.predicate,
                revision: snapshot.revision,
            })
    }
}

/// Per-view gate state: fires at most once per snapshot revision.
#[derive(Debug, Clone)]
pub struct GateWatcher {
    gates: GateSet,
    last_revision: Option<u64>,
}

impl GateWatcher {
    pub fn new(gates: GateSet) -> Self {
        Self {
            gates,
            last_revision: None,
        }
    }

    pub fn observe(&mut self, snapshot: &IdentitySnapshot) -> Option<Redirect> {
        if snapshot.loading {
            return None;
        }
        if self.last_revision == Some(snapshot.revision) {
            return None;
        }
        self.last_revision = Some(snapshot.revision);
        let redirect = self.gates.evaluate(snapshot);
        if let Some(r) = &redirect {
            tracing::info!(to = %r.to, revision = r.revision, "gate fired");
        }
        redirect
    }
}

/// Re-evaluate `gates` on every snapshot published to `rx`, yielding each
/// redirect once. The stream ends when the resolver is dropped; dropping the
/// stream cancels the subscription.
pub fn watch(
    gates: GateSet,
    mut rx: watch::Receiver<IdentitySnapshot>,
) -> impl Stream<Item = Redirect> + Send {
    async_stream::stream! {
        let mut watcher = GateWatcher::new(gates);
        loop {
            let snapshot = rx.borrow_and_update().clone();
            if let Some(redirect) = watcher.observe(&snapshot) {
                yield redirect;
            }
            if rx.changed().await.is_err() {
                break;
            }
        }
    }
}
