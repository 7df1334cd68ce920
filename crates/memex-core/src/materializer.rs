//! # Materializer
//!
//! Folds the ledger into the flat path → value index.
//!
//! ## Ordering (last-writer-wins)
//!
//! Thoughts are applied in `(timestamp, hash, insertion order)` ascending
//! order, so same-path collisions resolve identically on every rebuild,
//! including exact timestamp ties.
//!
//! ## Fold rules
//!
//! - remove at the root clears the index
//! - remove at `P` deletes `P` and every key under `P.`
//! - secret/noise declarations carry no data and are skipped
//! - a path hidden by a non-root secret scope is skipped
//! - anything else sets `index[path] = value`

use crate::path::key_at_or_under;
use crate::secrets::ScopeRegistry;
use crate::{OperatorKind, SemanticPath, Thought, Value};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};

/// The materialized index. Never persisted on its own.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Index {
    entries: BTreeMap<String, Value>,
}

impl Index {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn get(&self, path: &SemanticPath) -> Option<&Value> {
        self.entries.get(&path.key())
    }

    #[must_use]
    pub fn entries(&self) -> &BTreeMap<String, Value> {
        &self.entries
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries strictly under `prefix` (every entry for the root).
    fn descendants<'a>(
        &'a self,
        prefix: &'a SemanticPath,
    ) -> impl Iterator<Item = (&'a String, &'a Value)> + 'a {
        let key = prefix.key();
        let start = if key.is_empty() {
            String::new()
        } else {
            format!("{}.", key)
        };
        self.entries
            .range(start.clone()..)
            .take_while(move |(k, _)| k.starts_with(&start))
            .filter(|(k, _)| !k.is_empty())
    }

    /// Distinct immediate child segments under `prefix`.
    #[must_use]
    pub fn children_of(&self, prefix: &SemanticPath) -> Vec<String> {
        let depth = prefix.len();
        let children: BTreeSet<String> = self
            .descendants(prefix)
            .filter_map(|(k, _)| SemanticPath::from_key(k).segments().get(depth).cloned())
            .collect();
        children.into_iter().collect()
    }

    /// The public view at `prefix`: the leaf value if one is stored exactly
    /// there, otherwise a nested object of everything under it.
    #[must_use]
    pub fn subtree(&self, prefix: &SemanticPath) -> Option<Value> {
        if let Some(leaf) = self.entries.get(&prefix.key()) {
            if !prefix.is_root() {
                return Some(leaf.clone());
            }
        }

        let depth = prefix.len();
        let mut root = BTreeMap::new();
        let mut wrote_any = false;
        for (key, value) in self.descendants(prefix) {
            let rel = SemanticPath::from_key(key).suffix(depth);
            insert_nested(&mut root, rel.segments(), value.clone());
            wrote_any = true;
        }
        wrote_any.then_some(Value::Object(root))
    }
}

pub(crate) fn insert_nested(map: &mut BTreeMap<String, Value>, rel: &[String], value: Value) {
    let Some((head, rest)) = rel.split_first() else {
        return;
    };
    if rest.is_empty() {
        map.insert(head.clone(), value);
        return;
    }
    let slot = map
        .entry(head.clone())
        .or_insert_with(|| Value::Object(BTreeMap::new()));
    if !matches!(slot, Value::Object(_)) {
        *slot = Value::Object(BTreeMap::new());
    }
    if let Value::Object(child) = slot {
        insert_nested(child, rest, value);
    }
}

/// Rebuild the index from the full ledger under the current scope declarations.
#[must_use]
pub fn materialize(thoughts: &[Thought], scopes: &ScopeRegistry) -> Index {
    let mut ordered: Vec<(usize, &Thought)> = thoughts.iter().enumerate().collect();
    ordered.sort_by(|(ia, a), (ib, b)| {
        a.timestamp
            .cmp(&b.timestamp)
            .then_with(|| a.hash.cmp(&b.hash))
            .then_with(|| ia.cmp(ib))
    });

    let mut entries = BTreeMap::new();
    for (_, thought) in ordered {
        match thought.operator {
            Some(OperatorKind::Remove) => {
                if thought.path.is_empty() {
                    entries.clear();
                } else {
                    entries.retain(|k: &String, _| !key_at_or_under(k, &thought.path));
                }
            }
            Some(OperatorKind::Secret | OperatorKind::Noise) => {}
            _ => {
                let path = SemanticPath::from_key(&thought.path);
                if scopes.hiding_scope(&path).is_some() {
                    continue;
                }
                entries.insert(thought.path.clone(), thought.value.clone());
            }
        }
    }
    Index { entries }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;

    fn thought(path: &str, op: Option<OperatorKind>, value: Value, ts: u64, hash: &str) -> Thought {
        Thought {
            path: path.to_string(),
            operator: op,
            expression: value.clone(),
            value,
            effective_secret: String::new(),
            hash: hash.to_string(),
            prev_hash: String::new(),
            timestamp: ts,
        }
    }

    #[test]
    fn later_timestamp_wins() {
        let thoughts = vec![
            thought("a", None, Value::from(2), 20, "aa"),
            thought("a", None, Value::from(1), 10, "ff"),
        ];
        let index = materialize(&thoughts, &ScopeRegistry::new());
        assert_eq!(index.get(&SemanticPath::canonical("a")), Some(&Value::from(2)));
    }

    #[test]
    fn equal_timestamps_resolve_by_hash() {
        let thoughts = vec![
            thought("a", None, Value::from("high"), 10, "ff01"),
            thought("a", None, Value::from("low"), 10, "0a01"),
        ];
        let index = materialize(&thoughts, &ScopeRegistry::new());
        assert_eq!(
            index.get(&SemanticPath::canonical("a")),
            Some(&Value::from("high"))
        );
    }

    #[test]
    fn remove_deletes_subtree_only() {
        let thoughts = vec![
            thought("a.b", None, Value::from(1), 1, "1"),
            thought("a.b.c", None, Value::from(2), 2, "2"),
            thought("a.bc", None, Value::from(3), 3, "3"),
            thought("a.b", Some(OperatorKind::Remove), Value::from("-"), 4, "4"),
        ];
        let index = materialize(&thoughts, &ScopeRegistry::new());
        assert_eq!(index.len(), 1);
        assert!(index.entries().contains_key("a.bc"));
    }

    #[test]
    fn root_remove_clears_everything() {
        let thoughts = vec![
            thought("a", None, Value::from(1), 1, "1"),
            thought("", Some(OperatorKind::Remove), Value::from("-"), 2, "2"),
            thought("b", None, Value::from(2), 3, "3"),
        ];
        let index = materialize(&thoughts, &ScopeRegistry::new());
        assert_eq!(index.len(), 1);
        assert!(index.entries().contains_key("b"));
    }

    #[test]
    fn secret_scopes_are_excluded() {
        let mut scopes = ScopeRegistry::new();
        scopes.declare_secret(&SemanticPath::canonical("wallet"), "k");
        let thoughts = vec![
            thought("wallet", Some(OperatorKind::Secret), Value::from("***"), 1, "1"),
            thought("wallet.balance", None, Value::from(10), 2, "2"),
            thought("public", None, Value::from(1), 3, "3"),
        ];
        let index = materialize(&thoughts, &scopes);
        assert_eq!(index.len(), 1);
        assert!(index.entries().keys().all(|k| !key_at_or_under(k, "wallet")));
    }

    #[test]
    fn children_and_subtree() {
        let thoughts = vec![
            thought("fleet.trucks.1.km", None, Value::from(1000), 1, "1"),
            thought("fleet.trucks.1.fuel", None, Value::from(200), 2, "2"),
            thought("fleet.trucks.2.km", None, Value::from(1200), 3, "3"),
        ];
        let index = materialize(&thoughts, &ScopeRegistry::new());
        assert_eq!(
            index.children_of(&SemanticPath::canonical("fleet.trucks")),
            ["1", "2"]
        );

        let subtree = index
            .subtree(&SemanticPath::canonical("fleet.trucks.1"))
            .expect("subtree");
        let Value::Object(map) = subtree else {
            panic!("expected object");
        };
        assert_eq!(map.get("km"), Some(&Value::from(1000)));
        assert_eq!(
            index.subtree(&SemanticPath::canonical("fleet.trucks.2.km")),
            Some(Value::from(1200))
        );
        assert!(index.subtree(&SemanticPath::canonical("nope")).is_none());
    }
}
