use serde::{Deserialize, Serialize};

/// Outcome of a record-store call, as carried over the wire:
/// `{"success": true, "data": ...}` or `{"success": false, "error": "..."}`.
///
/// Boundary failures (transport, auth, decode) are always folded into
/// `Failure`, so callers never see raw errors from the collaborator.
#[derive(Debug, Clone, PartialEq)]
pub enum RecordResult {
    Success(serde_json::Value),
    Failure(String),
}

/// Prefix of the failure message for a missing record.
pub const NOT_FOUND: &str = "Not found";

#[derive(Serialize, Deserialize)]
struct WireResult {
    success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    data: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl RecordResult {
    pub fn failure(msg: impl Into<String>) -> Self {
        RecordResult::Failure(msg.into())
    }

    pub fn is_success(&self) -> bool {
        matches!(self, RecordResult::Success(_))
    }

    pub fn data(&self) -> Option<&serde_json::Value> {
        match self {
            RecordResult::Success(data) => Some(data),
            RecordResult::Failure(_) => None,
        }
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            RecordResult::Success(_) => None,
            RecordResult::Failure(e) => Some(e.as_str()),
        }
    }

    pub fn not_found(collection: &str, id: &str) -> Self {
        RecordResult::Failure(format!("{}: {}/{}", NOT_FOUND, collection, id))
    }

    /// The record does not exist. Every other failure (auth, transport,
    /// conflicts) is a real error.
    pub fn is_not_found(&self) -> bool {
        matches!(self, RecordResult::Failure(e) if e.starts_with(NOT_FOUND))
    }
}

impl Serialize for RecordResult {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let wire = match self {
            RecordResult::Success(data) => WireResult {
                success: true,
                data: Some(data.clone()),
                error: None,
            },
            RecordResult::Failure(e) => WireResult {
                success: false,
                data: None,
                error: Some(e.clone()),
            },
        };
        wire.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for RecordResult {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let wire = WireResult::deserialize(deserializer)?;
        Ok(if wire.success {
            RecordResult::Success(wire.data.unwrap_or(serde_json::Value::Null))
        } else {
            RecordResult::Failure(
                wire.error
                    .unwrap_or_else(|| "record store reported failure".to_string()),
            )
        })
    }
}
