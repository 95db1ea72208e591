use async_trait::async_trait;
use chrono::Utc;
use rusqlite::OptionalExtension;
use std::sync::Arc;

use crate::db::Database;
use crate::error::ServerError;
use crate::models::RecordResult;
use crate::records::{RecordStore, TokenVerifier};

/// Local record store: JSON documents in the `records` table, keyed by
/// collection and id, owned by the uid that created them.
pub struct SqliteRecordStore {
    db: Database,
    verifier: Arc<dyn TokenVerifier>,
}

/// A stored document plus its owner.
#[derive(Debug, Clone)]
pub struct StoredRecord {
    pub owner: String,
    pub data: serde_json::Value,
}

impl SqliteRecordStore {
    pub fn new(db: Database, verifier: Arc<dyn TokenVerifier>) -> Self {
        Self { db, verifier }
    }

    /// Insert or replace a document without going through token auth.
    /// Used for seeding.
    pub async fn put(
        &self,
        owner: &str,
        collection: &str,
        id: &str,
        data: &serde_json::Value,
    ) -> Result<(), ServerError> {
        let owner = owner.to_string();
        let collection = collection.to_string();
        let id = id.to_string();
        let data = with_id(data.clone(), &id);
        let now = Utc::now().timestamp_millis();
        self.db
            .with_conn_async(move |conn| {
                conn.execute(
                    "INSERT INTO records (collection, id, owner, data, created_at, updated_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?5)
                     ON CONFLICT(collection, id) DO UPDATE SET
                       owner = excluded.owner,
                       data = excluded.data,
                       updated_at = excluded.updated_at",
                    rusqlite::params![collection, id, owner, data.to_string(), now],
                )?;
                Ok(())
            })
            .await
    }

    pub async fn get(&self, collection: &str, id: &str) -> Result<Option<StoredRecord>, ServerError> {
        let collection = collection.to_string();
        let id = id.to_string();
        self.db
            .with_conn_async(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT owner, data FROM records WHERE collection = ?1 AND id = ?2",
                )?;
                stmt.query_row(rusqlite::params![collection, id], |row| {
                    Ok(row_to_record(row))
                })
                .optional()
            })
            .await
    }

    pub async fn list(&self, collection: &str) -> Result<Vec<serde_json::Value>, ServerError> {
        let collection = collection.to_string();
        self.db
            .with_conn_async(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT owner, data FROM records WHERE collection = ?1 ORDER BY created_at ASC",
                )?;
                let rows = stmt
                    .query_map(rusqlite::params![collection], |row| Ok(row_to_record(row).data))?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await
    }

    async fn authenticate(&self, token: &str) -> Result<String, RecordResult> {
        if token.is_empty() {
            return Err(RecordResult::failure("Unauthorized: missing bearer token"));
        }
        self.verifier
            .verify(token)
            .await
            .ok_or_else(|| RecordResult::failure("Unauthorized: invalid bearer token"))
    }
}

fn with_id(mut data: serde_json::Value, id: &str) -> serde_json::Value {
    if let Some(obj) = data.as_object_mut() {
        obj.insert("id".to_string(), serde_json::Value::String(id.to_string()));
    }
    data
}

fn db_failure(e: ServerError) -> RecordResult {
    tracing::warn!("[SqliteRecordStore] {}", e);
    RecordResult::failure(e.to_string())
}

#[async_trait]
impl RecordStore for SqliteRecordStore {
    async fn create(&self, token: &str, collection: &str, data: serde_json::Value) -> RecordResult {
        let owner = match self.authenticate(token).await {
            Ok(uid) => uid,
            Err(failure) => return failure,
        };
        if !data.is_object() {
            return RecordResult::failure("Bad request: record must be a JSON object");
        }

        let id = data
            .get("id")
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

        let data = with_id(data, &id);
        let row = data.clone();
        let record_id = id.clone();
        let collection_name = collection.to_string();
        let now = Utc::now().timestamp_millis();
        let inserted = self
            .db
            .with_conn_async(move |conn| {
                let result = conn.execute(
                    "INSERT INTO records (collection, id, owner, data, created_at, updated_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?5)",
                    rusqlite::params![collection_name, record_id, owner, row.to_string(), now],
                );
                match result {
                    Ok(_) => Ok(true),
                    Err(rusqlite::Error::SqliteFailure(e, _))
                        if e.code == rusqlite::ErrorCode::ConstraintViolation =>
                    {
                        Ok(false)
                    }
                    Err(e) => Err(e),
                }
            })
            .await;

        match inserted {
            Ok(true) => RecordResult::Success(data),
            Ok(false) => {
                RecordResult::failure(format!("Conflict: {}/{} already exists", collection, id))
            }
            Err(e) => db_failure(e),
        }
    }

    async fn read(&self, token: &str, collection: &str, id: &str) -> RecordResult {
        if let Err(failure) = self.authenticate(token).await {
            return failure;
        }
        match self.get(collection, id).await {
            Ok(Some(record)) => RecordResult::Success(record.data),
            Ok(None) => RecordResult::not_found(collection, id),
            Err(e) => db_failure(e),
        }
    }

    async fn update(
        &self,
        token: &str,
        collection: &str,
        id: &str,
        data: serde_json::Value,
    ) -> RecordResult {
        let uid = match self.authenticate(token).await {
            Ok(uid) => uid,
            Err(failure) => return failure,
        };
        let patch = match data {
            serde_json::Value::Object(map) => map,
            _ => return RecordResult::failure("Bad request: update must be a JSON object"),
        };

        let collection_name = collection.to_string();
        let record_id = id.to_string();
        let now = Utc::now().timestamp_millis();
        // Read, merge and write on one connection lock so concurrent patches
        // to the same record are applied one after the other.
        let outcome = self
            .db
            .with_conn_async(move |conn| {
                let existing = conn
                    .query_row(
                        "SELECT owner, data FROM records WHERE collection = ?1 AND id = ?2",
                        rusqlite::params![collection_name, record_id],
                        |row| Ok(row_to_record(row)),
                    )
                    .optional()?;
                let Some(existing) = existing else {
                    return Ok(UpdateOutcome::Missing);
                };
                if existing.owner != uid {
                    return Ok(UpdateOutcome::Forbidden);
                }

                let mut merged = existing.data;
                if let Some(obj) = merged.as_object_mut() {
                    obj.extend(patch);
                }
                let merged = with_id(merged, &record_id);
                conn.execute(
                    "UPDATE records SET data = ?3, updated_at = ?4 WHERE collection = ?1 AND id = ?2",
                    rusqlite::params![collection_name, record_id, merged.to_string(), now],
                )?;
                Ok(UpdateOutcome::Updated(merged))
            })
            .await;

        match outcome {
            Ok(UpdateOutcome::Updated(merged)) => RecordResult::Success(merged),
            Ok(UpdateOutcome::Missing) => RecordResult::not_found(collection, id),
            Ok(UpdateOutcome::Forbidden) => {
                RecordResult::failure(format!("Forbidden: {}/{} is not yours", collection, id))
            }
            Err(e) => db_failure(e),
        }
    }
}

enum UpdateOutcome {
    Updated(serde_json::Value),
    Missing,
    Forbidden,
}

use rusqlite::Row;

fn row_to_record(row: &Row<'_>) -> StoredRecord {
    let data_str: String = row.get(1).unwrap_or_default();
    StoredRecord {
        owner: row.get(0).unwrap_or_default(),
        data: serde_json::from_str(&data_str).unwrap_or(serde_json::Value::Null),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedTokens;

    #[async_trait]
    impl TokenVerifier for FixedTokens {
        async fn verify(&self, token: &str) -> Option<String> {
            match token {
                "t-ada" => Some("ada".to_string()),
                "t-bob" => Some("bob".to_string()),
                _ => None,
            }
        }
    }

    fn store() -> SqliteRecordStore {
        SqliteRecordStore::new(Database::open_in_memory().unwrap(), Arc::new(FixedTokens))
    }

    #[tokio::test]
    async fn test_create_read_update() {
        let store = store();
        let created = store
            .create("t-ada", "listings", serde_json::json!({ "city": "Boston" }))
            .await;
        let id = created.data().unwrap()["id"].as_str().unwrap().to_string();

        let read = store.read("t-bob", "listings", &id).await;
        assert_eq!(read.data().unwrap()["city"], "Boston");

        let updated = store
            .update("t-ada", "listings", &id, serde_json::json!({ "state": "MA" }))
            .await;
        let data = updated.data().unwrap();
        assert_eq!(data["city"], "Boston");
        assert_eq!(data["state"], "MA");
        assert_eq!(store.list("listings").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_failures_are_results() {
        let store = store();
        assert!(!store
            .create("", "listings", serde_json::json!({}))
            .await
            .is_success());
        assert_eq!(
            store.read("nope", "profiles", "ada").await.error(),
            Some("Unauthorized: invalid bearer token")
        );
        assert_eq!(
            store.read("t-ada", "profiles", "ghost").await.error(),
            Some("Not found: profiles/ghost")
        );

        store
            .put("ada", "profiles", "ada", &serde_json::json!({ "role": "member" }))
            .await
            .unwrap();
        let dup = store
            .create("t-ada", "profiles", serde_json::json!({ "id": "ada" }))
            .await;
        assert!(dup.error().unwrap().starts_with("Conflict"));

        let forbidden = store
            .update("t-bob", "profiles", "ada", serde_json::json!({ "role": "admin" }))
            .await;
        assert!(forbidden.error().unwrap().starts_with("Forbidden"));

        let missing = store
            .update("t-ada", "profiles", "ghost", serde_json::json!({ "role": "admin" }))
            .await;
        assert!(missing.is_not_found());
    }

    #[tokio::test]
    async fn test_concurrent_creates_with_same_id_conflict() {
        let store = Arc::new(store());
        for round in 0..50 {
            let id = format!("listing-{}", round);
            let spawn_create = |token: &'static str| {
                let store = store.clone();
                let id = id.clone();
                tokio::spawn(async move {
                    store
                        .create(token, "listings", serde_json::json!({ "id": id, "by": token }))
                        .await
                })
            };
            let first = spawn_create("t-ada");
            let second = spawn_create("t-bob");
            let (first, second) = (first.await.unwrap(), second.await.unwrap());

            assert!(
                first.is_success() != second.is_success(),
                "exactly one create should win: {:?} / {:?}",
                first,
                second
            );
            let loser = if first.is_success() { &second } else { &first };
            assert!(loser.error().unwrap().starts_with("Conflict"));

            let winner = if first.is_success() { first } else { second };
            let stored = store.get("listings", &id).await.unwrap().unwrap();
            assert_eq!(stored.data["by"], winner.data().unwrap()["by"]);
        }
    }

    #[tokio::test]
    async fn test_concurrent_updates_keep_every_patch() {
        let store = Arc::new(store());
        store
            .put("ada", "listings", "l1", &serde_json::json!({}))
            .await
            .unwrap();

        let tasks: Vec<_> = (0..20)
            .map(|i| {
                let store = store.clone();
                tokio::spawn(async move {
                    let mut patch = serde_json::Map::new();
                    patch.insert(format!("k{}", i), serde_json::json!(i));
                    store
                        .update("t-ada", "listings", "l1", serde_json::Value::Object(patch))
                        .await
                })
            })
            .collect();
        for task in tasks {
            assert!(task.await.unwrap().is_success());
        }

        let stored = store.get("listings", "l1").await.unwrap().unwrap();
        for i in 0..20 {
            assert_eq!(stored.data[format!("k{}", i)], i);
        }
        assert_eq!(stored.owner, "ada");
    }
}
