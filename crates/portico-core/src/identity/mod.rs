//! Identity resolver: wraps the external identity provider.
//!
//! The resolver turns provider calls into a stream of immutable
//! [`IdentitySnapshot`]s published on a `tokio::sync::watch` channel.
//! Subscribers always read the latest snapshot; dropping a receiver is the
//! cancellation.
//!
//! Each resolution (sign-in, sign-out, profile refresh) takes a generation
//! number. A resolution that finishes after a newer one has started is
//! discarded instead of overwriting the newer snapshot.

pub mod local;

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::watch;

use crate::models::{IdentitySnapshot, Principal, Profile, RecordResult};
use crate::records::{RecordStore, PROFILES};

pub use local::{LocalAccount, LocalIdentityProvider};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IdentityError {
    #[error("invalid email or password")]
    InvalidCredentials,

    #[error("bearer token is no longer valid")]
    InvalidToken,

    #[error("not signed in")]
    SignedOut,

    #[error("identity provider error: {0}")]
    Provider(String),
}

/// External identity provider boundary.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn sign_in(&self, email: &str, password: &str) -> Result<Principal, IdentityError>;

    /// Current bearer token for `principal`, used to authenticate record-store
    /// calls.
    async fn bearer_token(&self, principal: &Principal) -> Result<String, IdentityError>;

    async fn sign_out(&self, principal: &Principal) -> Result<(), IdentityError>;
}

/// Per-session identity state.
pub struct IdentityResolver {
    provider: Arc<dyn IdentityProvider>,
    records: Arc<dyn RecordStore>,
    tx: watch::Sender<IdentitySnapshot>,
    generation: Mutex<u64>,
}

impl IdentityResolver {
    /// New resolver in the loading state.
    pub fn new(provider: Arc<dyn IdentityProvider>, records: Arc<dyn RecordStore>) -> Self {
        let (tx, _) = watch::channel(IdentitySnapshot::resolving());
        Self {
            provider,
            records,
            tx,
            generation: Mutex::new(0),
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<IdentitySnapshot> {
        self.tx.subscribe()
    }

    pub fn snapshot(&self) -> IdentitySnapshot {
        self.tx.borrow().clone()
    }

    fn begin(&self) -> u64 {
        let mut generation = self.generation.lock().unwrap_or_else(|e| e.into_inner());
        *generation += 1;
        *generation
    }

    /// Publish the snapshot built by `build` if `generation` is still the
    /// newest resolution. Returns whether it was published.
    fn publish_if_current<F>(&self, generation: u64, build: F) -> bool
    where
        F: FnOnce(u64) -> IdentitySnapshot,
    {
        let current = self.generation.lock().unwrap_or_else(|e| e.into_inner());
        if *current != generation {
            tracing::debug!(generation, newest = *current, "discarding superseded identity resolution");
            return false;
        }
        let revision = self.tx.borrow().revision + 1;
        self.tx.send_replace(build(revision));
        true
    }

    fn publish_loading(&self, generation: u64) {
        let previous = self.snapshot();
        self.publish_if_current(generation, |revision| IdentitySnapshot {
            loading: true,
            revision,
            ..previous
        });
    }

    /// Finish the initial resolution for a fresh session: nobody is signed in.
    pub fn resolve_initial(&self) -> IdentitySnapshot {
        let generation = self.begin();
        if self.snapshot().loading {
            self.publish_if_current(generation, IdentitySnapshot::signed_out);
        }
        self.snapshot()
    }

    /// Sign in and load the profile.
    ///
    /// A profile that does not exist yet resolves to a snapshot without one;
    /// any other record-store failure is returned to the caller and leaves the
    /// session signed out. A sign-in overtaken by a newer resolution is not
    /// published and its credential is revoked.
    pub async fn sign_in(&self, email: &str, password: &str) -> Result<IdentitySnapshot, IdentityError> {
        let generation = self.begin();
        self.publish_loading(generation);

        let principal = match self.provider.sign_in(email, password).await {
            Ok(p) => p,
            Err(e) => {
                tracing::warn!("sign-in failed for {}: {}", email, e);
                self.publish_if_current(generation, IdentitySnapshot::signed_out);
                return Err(e);
            }
        };

        let profile = match self.load_profile(&principal).await {
            Ok(profile) => profile,
            Err(e) => {
                tracing::warn!("could not load profile for {}: {}", principal.uid, e);
                self.publish_if_current(generation, IdentitySnapshot::signed_out);
                self.revoke(&principal).await;
                return Err(e);
            }
        };

        let published = self.publish_if_current(generation, |revision| {
            IdentitySnapshot::resolved(principal.clone(), profile.clone(), revision)
        });
        if published {
            tracing::info!(
                uid = %principal.uid,
                has_profile = profile.is_some(),
                "signed in"
            );
        } else {
            self.revoke(&principal).await;
        }
        Ok(self.snapshot())
    }

    /// Drop a credential that will never be published.
    async fn revoke(&self, principal: &Principal) {
        if let Err(e) = self.provider.sign_out(principal).await {
            tracing::warn!("could not revoke credential for {}: {}", principal.uid, e);
        } else {
            tracing::debug!(uid = %principal.uid, "revoked unpublished credential");
        }
    }

    pub async fn sign_out(&self) -> IdentitySnapshot {
        let generation = self.begin();
        if let Some(principal) = self.snapshot().identity {
            if let Err(e) = self.provider.sign_out(&principal).await {
                tracing::warn!("provider sign-out failed for {}: {}", principal.uid, e);
            }
            tracing::info!(uid = %principal.uid, "signed out");
        }
        self.publish_if_current(generation, IdentitySnapshot::signed_out);
        self.snapshot()
    }

    /// Re-read the profile for the current identity, e.g. after the profile
    /// record was written. On a read failure the previous profile is kept.
    pub async fn refresh_profile(&self) -> IdentitySnapshot {
        let current = self.snapshot();
        let Some(principal) = current.identity else {
            return self.snapshot();
        };
        let generation = self.begin();
        self.publish_loading(generation);
        let profile = match self.load_profile(&principal).await {
            Ok(profile) => profile,
            Err(e) => {
                tracing::warn!("profile refresh failed for {}: {}", principal.uid, e);
                current.profile
            }
        };
        self.publish_if_current(generation, |revision| {
            IdentitySnapshot::resolved(principal, profile, revision)
        });
        self.snapshot()
    }

    /// Bearer token for record-store calls on behalf of the current identity.
    pub async fn bearer_token(&self) -> Result<String, IdentityError> {
        let principal = self.snapshot().identity.ok_or(IdentityError::SignedOut)?;
        self.provider.bearer_token(&principal).await
    }

    /// `Ok(None)` only when the profile record does not exist.
    async fn load_profile(&self, principal: &Principal) -> Result<Option<Profile>, IdentityError> {
        let token = self.provider.bearer_token(principal).await?;
        match self.records.read(&token, PROFILES, &principal.uid).await {
            RecordResult::Success(data) => serde_json::from_value::<Profile>(data)
                .map(Some)
                .map_err(|e| {
                    IdentityError::Provider(format!("profile for {} is malformed: {}", principal.uid, e))
                }),
            missing if missing.is_not_found() => {
                tracing::debug!("no profile for {}", principal.uid);
                Ok(None)
            }
            RecordResult::Failure(e) => Err(IdentityError::Provider(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::models::Role;
    use crate::records::TokenVerifier;
    use crate::store::SqliteRecordStore;
    use std::time::Duration;

    async fn resolver() -> (IdentityResolver, Arc<LocalIdentityProvider>) {
        let provider = Arc::new(
            LocalIdentityProvider::from_yaml(
                r#"
- uid: ada
  email: ada@example.org
  password: hunter2
  profile: { role: admin, firstName: Ada }
- uid: bob
  email: bob@example.org
  password: swordfish
"#,
            )
            .unwrap(),
        );
        let records = Arc::new(SqliteRecordStore::new(
            Database::open_in_memory().unwrap(),
            provider.clone(),
        ));
        provider.seed_profiles(&records).await.unwrap();
        (IdentityResolver::new(provider.clone(), records), provider)
    }

    #[tokio::test]
    async fn test_initial_resolution() {
        let (resolver, _) = resolver().await;
        assert!(resolver.snapshot().loading);
        let snapshot = resolver.resolve_initial();
        assert!(!snapshot.loading);
        assert!(snapshot.identity.is_none());
        assert_eq!(snapshot.revision, 1);
    }

    #[tokio::test]
    async fn test_sign_in_resolves_profile() {
        let (resolver, _) = resolver().await;
        let mut rx = resolver.subscribe();
        resolver.resolve_initial();

        let snapshot = resolver.sign_in("ada@example.org", "hunter2").await.unwrap();
        assert!(snapshot.is_signed_in());
        assert_eq!(snapshot.role(), Some(Role::Admin));
        assert_eq!(snapshot.profile.as_ref().unwrap().first_name, "Ada");
        assert!(rx.has_changed().unwrap());
        assert_eq!(rx.borrow_and_update().revision, snapshot.revision);

        let token = resolver.bearer_token().await.unwrap();
        assert!(!token.is_empty());
    }

    #[tokio::test]
    async fn test_identity_without_profile() {
        let (resolver, _) = resolver().await;
        let snapshot = resolver.sign_in("bob@example.org", "swordfish").await.unwrap();
        assert!(snapshot.identity.is_some());
        assert!(snapshot.profile.is_none());
        assert!(!snapshot.is_signed_in());
    }

    #[tokio::test]
    async fn test_bad_credentials_publish_signed_out() {
        let (resolver, _) = resolver().await;
        let err = resolver.sign_in("ada@example.org", "wrong").await.unwrap_err();
        assert_eq!(err, IdentityError::InvalidCredentials);
        let snapshot = resolver.snapshot();
        assert!(!snapshot.loading);
        assert!(snapshot.identity.is_none());
    }

    #[tokio::test]
    async fn test_sign_out_revokes_token() {
        let (resolver, provider) = resolver().await;
        let snapshot = resolver.sign_in("ada@example.org", "hunter2").await.unwrap();
        let principal = snapshot.identity.unwrap();

        let out = resolver.sign_out().await;
        assert!(out.identity.is_none());
        assert_eq!(
            provider.bearer_token(&principal).await,
            Err(IdentityError::InvalidToken)
        );
        assert_eq!(resolver.bearer_token().await, Err(IdentityError::SignedOut));
    }

    struct SlowProvider {
        inner: Arc<LocalIdentityProvider>,
        issued: Mutex<Vec<Principal>>,
    }

    #[async_trait]
    impl IdentityProvider for SlowProvider {
        async fn sign_in(&self, email: &str, password: &str) -> Result<Principal, IdentityError> {
            tokio::time::sleep(Duration::from_millis(100)).await;
            let principal = self.inner.sign_in(email, password).await?;
            self.issued.lock().unwrap().push(principal.clone());
            Ok(principal)
        }

        async fn bearer_token(&self, principal: &Principal) -> Result<String, IdentityError> {
            self.inner.bearer_token(principal).await
        }

        async fn sign_out(&self, principal: &Principal) -> Result<(), IdentityError> {
            self.inner.sign_out(principal).await
        }
    }

    #[tokio::test]
    async fn test_stale_sign_in_does_not_override_sign_out() {
        let (_, provider) = resolver().await;
        let records = Arc::new(SqliteRecordStore::new(
            Database::open_in_memory().unwrap(),
            provider.clone(),
        ));
        let slow = Arc::new(SlowProvider {
            inner: provider.clone(),
            issued: Mutex::new(Vec::new()),
        });
        let resolver = Arc::new(IdentityResolver::new(slow.clone(), records));
        resolver.resolve_initial();

        let pending = {
            let resolver = resolver.clone();
            tokio::spawn(async move { resolver.sign_in("ada@example.org", "hunter2").await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(resolver.snapshot().loading);

        resolver.sign_out().await;
        pending.await.unwrap().unwrap();

        let snapshot = resolver.snapshot();
        assert!(!snapshot.loading);
        assert!(snapshot.identity.is_none());

        let issued = slow.issued.lock().unwrap().clone();
        assert_eq!(issued.len(), 1);
        assert!(provider.verify(&issued[0].token).await.is_none());
        assert_eq!(
            provider.bearer_token(&issued[0]).await,
            Err(IdentityError::InvalidToken)
        );
    }

    struct UnreachableRecords;

    #[async_trait]
    impl RecordStore for UnreachableRecords {
        async fn create(&self, _: &str, _: &str, _: serde_json::Value) -> RecordResult {
            RecordResult::failure("Record store unreachable: connection refused")
        }
        async fn read(&self, _: &str, _: &str, _: &str) -> RecordResult {
            RecordResult::failure("Record store unreachable: connection refused")
        }
        async fn update(&self, _: &str, _: &str, _: &str, _: serde_json::Value) -> RecordResult {
            RecordResult::failure("Record store unreachable: connection refused")
        }
    }

    #[tokio::test]
    async fn test_sign_in_reports_record_store_failure() {
        let (_, provider) = resolver().await;
        let resolver = IdentityResolver::new(provider.clone(), Arc::new(UnreachableRecords));
        resolver.resolve_initial();

        let err = resolver.sign_in("ada@example.org", "hunter2").await.unwrap_err();
        assert_eq!(
            err,
            IdentityError::Provider("Record store unreachable: connection refused".to_string())
        );

        let snapshot = resolver.snapshot();
        assert!(!snapshot.loading);
        assert!(snapshot.identity.is_none());
        assert_eq!(resolver.bearer_token().await, Err(IdentityError::SignedOut));
    }
}
