use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Application role, ordered `Member < Admin < SuperAdmin`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Member,
    Admin,
    #[serde(alias = "super_admin")]
    SuperAdmin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Member => "member",
            Self::Admin => "admin",
            Self::SuperAdmin => "superadmin",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "member" => Some(Self::Member),
            "admin" => Some(Self::Admin),
            "superadmin" | "super_admin" => Some(Self::SuperAdmin),
            _ => None,
        }
    }
}

impl Default for Role {
    fn default() -> Self {
        Self::Member
    }
}

/// Token-bearing principal issued by the identity provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Principal {
    pub uid: String,
    pub email: String,
    /// Opaque bearer token. Never sent back to clients.
    #[serde(skip_serializing, default)]
    pub token: String,
}

/// Application-level profile resolved from the record store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Profile {
    pub uid: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub role: Role,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    #[serde(default)]
    pub profession: Option<String>,
    #[serde(default)]
    pub organization: Option<String>,
    #[serde(default)]
    pub city: Option<String>,
    #[serde(default)]
    pub state: Option<String>,
    #[serde(default)]
    pub attributes: HashMap<String, serde_json::Value>,
}

impl Profile {
    pub fn new(uid: impl Into<String>, email: impl Into<String>, role: Role) -> Self {
        Self {
            uid: uid.into(),
            email: email.into(),
            role,
            first_name: String::new(),
            last_name: String::new(),
            profession: None,
            organization: None,
            city: None,
            state: None,
            attributes: HashMap::new(),
        }
    }
}

/// Immutable view of identity resolution at one point in time.
///
/// `revision` increases with every snapshot the resolver publishes, which is
/// what lets gate watchers fire at most once per change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdentitySnapshot {
    pub loading: bool,
    pub identity: Option<Principal>,
    pub profile: Option<Profile>,
    pub revision: u64,
}

impl IdentitySnapshot {
    /// Snapshot before the provider has reported anything.
    pub fn resolving() -> Self {
        Self {
            loading: true,
            identity: None,
            profile: None,
            revision: 0,
        }
    }

    pub fn signed_out(revision: u64) -> Self {
        Self {
            loading: false,
            identity: None,
            profile: None,
            revision,
        }
    }

    pub fn resolved(principal: Principal, profile: Option<Profile>, revision: u64) -> Self {
        Self {
            loading: false,
            identity: Some(principal),
            profile,
            revision,
        }
    }

    /// Raw identity and backing profile are both present.
    pub fn is_signed_in(&self) -> bool {
        self.identity.is_some() && self.profile.is_some()
    }

    pub fn role(&self) -> Option<Role> {
        self.profile.as_ref().map(|p| p.role)
    }
}
