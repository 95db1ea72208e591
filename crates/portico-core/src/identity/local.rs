//! Development identity provider backed by a YAML accounts file.
//!
//! ```yaml
//! - uid: ada
//!   email: ada@example.org
//!   password: hunter2
//!   profile: { role: admin, firstName: Ada, lastName: Lovelace }
//! ```
//!
//! Passwords are compared as plain text; this provider stands in for the
//! hosted identity service in local runs and tests.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::sync::RwLock;

use crate::error::ServerError;
use crate::identity::{IdentityError, IdentityProvider};
use crate::models::{Principal, Role};
use crate::records::{TokenVerifier, PROFILES};
use crate::store::SqliteRecordStore;

/// Profile fields seeded into the record store for an account.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SeedProfile {
    #[serde(default)]
    pub role: Role,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    #[serde(default)]
    pub profession: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalAccount {
    pub uid: String,
    pub email: String,
    pub password: String,
    #[serde(default)]
    pub profile: Option<SeedProfile>,
}

pub struct LocalIdentityProvider {
    /// Accounts indexed by lowercase email.
    accounts: HashMap<String, LocalAccount>,
    /// Issued bearer token → uid.
    tokens: RwLock<HashMap<String, String>>,
}

impl LocalIdentityProvider {
    pub fn new(accounts: Vec<LocalAccount>) -> Self {
        Self {
            accounts: accounts
                .into_iter()
                .map(|a| (a.email.to_lowercase(), a))
                .collect(),
            tokens: RwLock::new(HashMap::new()),
        }
    }

    pub fn from_yaml(yaml: &str) -> Result<Self, String> {
        let accounts: Vec<LocalAccount> = serde_yaml::from_str(yaml)
            .map_err(|e| format!("Failed to parse accounts YAML: {}", e))?;
        Ok(Self::new(accounts))
    }

    pub fn from_file(path: &str) -> Result<Self, String> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| format!("Failed to read accounts file '{}': {}", path, e))?;
        Self::from_yaml(&content)
    }

    pub fn account_count(&self) -> usize {
        self.accounts.len()
    }

    /// Write a profile record for every account that declares one.
    pub async fn seed_profiles(&self, records: &SqliteRecordStore) -> Result<usize, ServerError> {
        let mut count = 0;
        for account in self.accounts.values() {
            let Some(seed) = &account.profile else {
                continue;
            };
            let data = serde_json::json!({
                "uid": account.uid,
                "email": account.email,
                "role": seed.role,
                "firstName": seed.first_name,
                "lastName": seed.last_name,
                "profession": seed.profession,
            });
            records.put(&account.uid, PROFILES, &account.uid, &data).await?;
            count += 1;
        }
        tracing::info!("[LocalIdentityProvider] Seeded {} profiles", count);
        Ok(count)
    }
}

#[async_trait]
impl IdentityProvider for LocalIdentityProvider {
    async fn sign_in(&self, email: &str, password: &str) -> Result<Principal, IdentityError> {
        let account = self
            .accounts
            .get(&email.trim().to_lowercase())
            .filter(|a| a.password == password)
            .ok_or(IdentityError::InvalidCredentials)?;

        let token = uuid::Uuid::new_v4().to_string();
        self.tokens
            .write()
            .await
            .insert(token.clone(), account.uid.clone());

        Ok(Principal {
            uid: account.uid.clone(),
            email: account.email.clone(),
            token,
        })
    }

    async fn bearer_token(&self, principal: &Principal) -> Result<String, IdentityError> {
        match self.tokens.read().await.get(&principal.token) {
            Some(uid) if *uid == principal.uid => Ok(principal.token.clone()),
            _ => Err(IdentityError::InvalidToken),
        }
    }

    async fn sign_out(&self, principal: &Principal) -> Result<(), IdentityError> {
        self.tokens.write().await.remove(&principal.token);
        Ok(())
    }
}

#[async_trait]
impl TokenVerifier for LocalIdentityProvider {
    async fn verify(&self, token: &str) -> Option<String> {
        self.tokens.read().await.get(token).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provider() -> LocalIdentityProvider {
        LocalIdentityProvider::from_yaml(
            "- uid: ada\n  email: Ada@Example.org\n  password: hunter2\n",
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_sign_in_is_case_insensitive_on_email() {
        let provider = provider();
        let principal = provider.sign_in("ada@example.org ", "hunter2").await.unwrap();
        assert_eq!(principal.uid, "ada");
        assert_eq!(provider.verify(&principal.token).await, Some("ada".to_string()));
        assert_eq!(
            provider.bearer_token(&principal).await.unwrap(),
            principal.token
        );
    }

    #[tokio::test]
    async fn test_wrong_password() {
        let provider = provider();
        assert_eq!(
            provider.sign_in("ada@example.org", "nope").await,
            Err(IdentityError::InvalidCredentials)
        );
        assert_eq!(
            provider.sign_in("ghost@example.org", "hunter2").await,
            Err(IdentityError::InvalidCredentials)
        );
    }

    #[tokio::test]
    async fn test_tokens_are_per_sign_in() {
        let provider = provider();
        let first = provider.sign_in("ada@example.org", "hunter2").await.unwrap();
        let second = provider.sign_in("ada@example.org", "hunter2").await.unwrap();
        assert_ne!(first.token, second.token);

        provider.sign_out(&first).await.unwrap();
        assert!(provider.verify(&first.token).await.is_none());
        assert!(provider.verify(&second.token).await.is_some());
    }
}
