use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Field name → value for one workflow record.
pub type Fields = BTreeMap<String, FieldValue>;

/// A selectable option as rendered by a dropdown: the stored `value` plus the
/// human-readable `label`.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ChoiceOption {
    pub value: String,
    pub label: String,
}

/// Value of a single form field.
///
/// Serialized untagged so submitted JSON stays natural: `"text"`, `true`,
/// `["a", "b"]` or `{"value": "x", "label": "X"}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Flag(bool),
    Text(String),
    List(Vec<String>),
    Choice(ChoiceOption),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Flag,
    Text,
    List,
    Choice,
}

impl FieldKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Flag => "flag",
            Self::Text => "text",
            Self::List => "list",
            Self::Choice => "choice",
        }
    }
}

impl FieldValue {
    pub fn kind(&self) -> FieldKind {
        match self {
            Self::Flag(_) => FieldKind::Flag,
            Self::Text(_) => FieldKind::Text,
            Self::List(_) => FieldKind::List,
            Self::Choice(_) => FieldKind::Choice,
        }
    }

    /// Key used when a branch step routes on this value.
    ///
    /// Flags map to `"yes"` / `"no"`, choices route on their stored value.
    /// Lists have no branch key.
    pub fn branch_key(&self) -> Option<&str> {
        match self {
            Self::Flag(true) => Some("yes"),
            Self::Flag(false) => Some("no"),
            Self::Text(s) => Some(s.as_str()),
            Self::Choice(c) => Some(c.value.as_str()),
            Self::List(_) => None,
        }
    }

    /// True for the empty value of each kind (`false` is not blank).
    pub fn is_blank(&self) -> bool {
        match self {
            Self::Flag(_) => false,
            Self::Text(s) => s.trim().is_empty(),
            Self::List(items) => items.is_empty(),
            Self::Choice(c) => c.value.trim().is_empty(),
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s.as_str()),
            Self::Choice(c) => Some(c.value.as_str()),
            _ => None,
        }
    }
}

impl From<&str> for FieldValue {
    fn from(s: &str) -> Self {
        FieldValue::Text(s.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(s: String) -> Self {
        FieldValue::Text(s)
    }
}

impl From<bool> for FieldValue {
    fn from(b: bool) -> Self {
        FieldValue::Flag(b)
    }
}

impl From<Vec<String>> for FieldValue {
    fn from(items: Vec<String>) -> Self {
        FieldValue::List(items)
    }
}

/// Build a `Fields` map from `(name, value)` pairs.
pub fn fields<I, K, V>(pairs: I) -> Fields
where
    I: IntoIterator<Item = (K, V)>,
    K: Into<String>,
    V: Into<FieldValue>,
{
    pairs
        .into_iter()
        .map(|(k, v)| (k.into(), v.into()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_untagged_json_shapes() {
        let parsed: Fields = serde_json::from_value(serde_json::json!({
            "remote": true,
            "city": "Boston",
            "services": ["therapy", "coaching"],
            "category": { "value": "lcsw", "label": "LCSW" }
        }))
        .unwrap();

        assert_eq!(parsed["remote"], FieldValue::Flag(true));
        assert_eq!(parsed["city"], FieldValue::Text("Boston".into()));
        assert_eq!(parsed["services"].kind(), FieldKind::List);
        assert_eq!(parsed["category"].branch_key(), Some("lcsw"));
    }

    #[test]
    fn test_branch_keys() {
        assert_eq!(FieldValue::Flag(true).branch_key(), Some("yes"));
        assert_eq!(FieldValue::Flag(false).branch_key(), Some("no"));
        assert_eq!(FieldValue::List(vec![]).branch_key(), None);
    }

    #[test]
    fn test_blank_values() {
        assert!(FieldValue::Text("  ".into()).is_blank());
        assert!(FieldValue::Choice(ChoiceOption::default()).is_blank());
        assert!(!FieldValue::Flag(false).is_blank());
    }
}
