//! # Snapshot
//!
//! The full portable state of a store: ledger, scope declarations,
//! encrypted branches and the operator registry. The index is not part of
//! it; importers rebuild it from the ledger.
//!
//! ## Lenient JSON import
//!
//! [`Snapshot::from_json_value`] never fails. Each missing or malformed field
//! falls back to empty, and malformed entries inside a field are dropped one
//! by one, each with a warning.

use crate::{OperatorKind, Thought, Value};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::str::FromStr;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub ledger: Vec<Thought>,
    pub secrets: BTreeMap<String, String>,
    pub noises: BTreeMap<String, String>,
    pub encrypted_branches: BTreeMap<String, Value>,
    pub operators: BTreeMap<String, OperatorKind>,
}

impl Snapshot {
    /// JSON form, as written by `export -t json`.
    pub fn to_json_value(&self) -> Result<serde_json::Value, crate::MemexError> {
        serde_json::to_value(self).map_err(|e| crate::MemexError::SerializationError(e.to_string()))
    }

    /// Parse a JSON snapshot, defaulting whatever is missing or malformed.
    #[must_use]
    pub fn from_json_value(json: &serde_json::Value) -> Self {
        let Some(fields) = json.as_object() else {
            tracing::warn!("snapshot is not an object, importing an empty one");
            return Self::default();
        };

        let ledger = match fields.get("ledger") {
            Some(serde_json::Value::Array(records)) => records
                .iter()
                .enumerate()
                .filter_map(|(i, record)| {
                    serde_json::from_value::<Thought>(record.clone())
                        .map_err(|e| {
                            tracing::warn!(record = i, error = %e, "dropping malformed ledger record");
                        })
                        .ok()
                })
                .collect(),
            other => {
                warn_defaulted("ledger", other);
                Vec::new()
            }
        };

        Self {
            ledger,
            secrets: lenient_map(fields.get("secrets"), "secrets", parse_entry::<String>),
            noises: lenient_map(fields.get("noises"), "noises", parse_entry::<String>),
            encrypted_branches: lenient_map(
                fields.get("encrypted_branches"),
                "encrypted_branches",
                parse_entry::<Value>,
            ),
            operators: lenient_map(fields.get("operators"), "operators", parse_operator),
        }
    }
}

fn warn_defaulted(field: &str, found: Option<&serde_json::Value>) {
    if found.is_some() {
        tracing::warn!(field, "malformed snapshot field, defaulting to empty");
    }
}

fn lenient_map<T>(
    found: Option<&serde_json::Value>,
    field: &str,
    parse: impl Fn(&serde_json::Value) -> Option<T>,
) -> BTreeMap<String, T> {
    let Some(serde_json::Value::Object(entries)) = found else {
        warn_defaulted(field, found);
        return BTreeMap::new();
    };
    entries
        .iter()
        .filter_map(|(key, raw)| match parse(raw) {
            Some(value) => Some((key.clone(), value)),
            None => {
                tracing::warn!(field, key = %key, "dropping malformed snapshot entry");
                None
            }
        })
        .collect()
}

fn parse_entry<T: DeserializeOwned>(raw: &serde_json::Value) -> Option<T> {
    serde_json::from_value(raw.clone()).ok()
}

/// Accepts `"kind"` as well as `{"kind": "kind"}`.
fn parse_operator(raw: &serde_json::Value) -> Option<OperatorKind> {
    let name = match raw {
        serde_json::Value::String(name) => name.as_str(),
        serde_json::Value::Object(map) => map.get("kind")?.as_str()?,
        _ => return None,
    };
    OperatorKind::from_str(name).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn json_roundtrip() {
        let mut snapshot = Snapshot::default();
        snapshot.secrets.insert("vault".into(), "k".into());
        snapshot.operators.insert("%".into(), OperatorKind::Remove);
        let json = snapshot.to_json_value().expect("json");
        assert_eq!(Snapshot::from_json_value(&json), snapshot);
    }

    #[test]
    fn malformed_fields_default_to_empty() {
        let json = json!({
            "ledger": "not a list",
            "secrets": {"a": "s", "b": 7},
            "noises": null,
            "operators": {"%": {"kind": "remove"}, "!": "teleport", "?": "collect"},
        });
        let snapshot = Snapshot::from_json_value(&json);
        assert!(snapshot.ledger.is_empty());
        assert_eq!(snapshot.secrets.len(), 1);
        assert!(snapshot.noises.is_empty());
        assert!(snapshot.encrypted_branches.is_empty());
        assert_eq!(snapshot.operators.get("%"), Some(&OperatorKind::Remove));
        assert_eq!(snapshot.operators.get("?"), Some(&OperatorKind::Query));
        assert!(!snapshot.operators.contains_key("!"));
    }

    #[test]
    fn malformed_records_are_dropped_individually() {
        let good = Thought {
            path: "a".into(),
            operator: None,
            expression: Value::from(1),
            value: Value::from(1),
            effective_secret: String::new(),
            hash: "h".into(),
            prev_hash: String::new(),
            timestamp: 1,
        };
        let json = json!({ "ledger": [serde_json::to_value(&good).expect("json"), {"path": 3}] });
        let snapshot = Snapshot::from_json_value(&json);
        assert_eq!(snapshot.ledger, vec![good]);
    }

    #[test]
    fn non_object_imports_empty() {
        assert_eq!(Snapshot::from_json_value(&json!([1, 2])), Snapshot::default());
    }
}
