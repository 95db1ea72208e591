//! Remote record store: JSON over HTTP with bearer auth.
//!
//! ```text
//! POST  {base_url}/{collection}        create
//! GET   {base_url}/{collection}/{id}   read
//! PATCH {base_url}/{collection}/{id}   update
//! ```
//!
//! The service answers every call with `{success, data | error}`.

use async_trait::async_trait;

use crate::models::{RecordResult, NOT_FOUND};
use crate::records::RecordStore;

pub struct HttpRecordStore {
    client: reqwest::Client,
    base_url: String,
}

impl HttpRecordStore {
    pub fn new(base_url: &str) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(std::time::Duration::from_secs(30))
                .build()
                .unwrap_or_else(|_| reqwest::Client::new()),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    fn url(&self, collection: &str, id: Option<&str>) -> String {
        match id {
            Some(id) => format!(
                "{}/{}/{}",
                self.base_url,
                urlencoding::encode(collection),
                urlencoding::encode(id)
            ),
            None => format!("{}/{}", self.base_url, urlencoding::encode(collection)),
        }
    }

    async fn send(&self, request: reqwest::RequestBuilder, what: &str) -> RecordResult {
        let response = match request.send().await {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!("[HttpRecordStore] {} failed: {}", what, e);
                return RecordResult::failure(format!("Record store unreachable: {}", e));
            }
        };

        let status = response.status();
        let result = match response.json::<RecordResult>().await {
            Ok(result) => result,
            Err(e) if status.is_success() => {
                RecordResult::failure(format!("Invalid record store response: {}", e))
            }
            Err(_) => RecordResult::failure(format!("Record store returned {}", status)),
        };
        // Callers tell a missing record apart from other failures by prefix.
        match result {
            RecordResult::Failure(e) if status == reqwest::StatusCode::NOT_FOUND && !e.starts_with(NOT_FOUND) => {
                RecordResult::Failure(format!("{}: {}", NOT_FOUND, e))
            }
            other => other,
        }
    }
}

#[async_trait]
impl RecordStore for HttpRecordStore {
    async fn create(&self, token: &str, collection: &str, data: serde_json::Value) -> RecordResult {
        let request = self
            .client
            .post(self.url(collection, None))
            .bearer_auth(token)
            .json(&data);
        self.send(request, "create").await
    }

    async fn read(&self, token: &str, collection: &str, id: &str) -> RecordResult {
        let request = self
            .client
            .get(self.url(collection, Some(id)))
            .bearer_auth(token);
        self.send(request, "read").await
    }

    async fn update(
        &self,
        token: &str,
        collection: &str,
        id: &str,
        data: serde_json::Value,
    ) -> RecordResult {
        let request = self
            .client
            .patch(self.url(collection, Some(id)))
            .bearer_auth(token)
            .json(&data);
        self.send(request, "update").await
    }
}
