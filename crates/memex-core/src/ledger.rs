//! # Ledger
//!
//! Append-only, hash-chained sequence of thoughts.
//!
//! - Every record's `prev_hash` is its predecessor's `hash` (empty for the first)
//! - `hash` is the BLAKE3 hex digest of the canonical JSON of
//!   `{path, operator, expression, value, effective_secret, prev_hash}`
//! - Records are never mutated or removed; deletion is itself a record

use crate::cipher::digest_hex;
use crate::{MemexError, OperatorKind, SemanticPath, Thought, Value};
use serde::{Deserialize, Serialize};

/// A record about to be committed.
#[derive(Debug, Clone, PartialEq)]
pub struct Draft {
    pub path: SemanticPath,
    pub operator: Option<OperatorKind>,
    pub expression: Value,
    pub value: Value,
}

/// Field order here is the canonical hash input order.
#[derive(Serialize)]
struct HashInput<'a> {
    path: &'a str,
    operator: Option<OperatorKind>,
    expression: &'a Value,
    value: &'a Value,
    effective_secret: &'a str,
    prev_hash: &'a str,
}

impl Thought {
    /// Recompute the content hash from this record's fields.
    pub fn compute_hash(&self) -> Result<String, MemexError> {
        let input = HashInput {
            path: &self.path,
            operator: self.operator,
            expression: &self.expression,
            value: &self.value,
            effective_secret: &self.effective_secret,
            prev_hash: &self.prev_hash,
        };
        let json = serde_json::to_string(&input)
            .map_err(|e| MemexError::SerializationError(e.to_string()))?;
        Ok(digest_hex(&json))
    }
}

/// The append-only thought log.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Ledger {
    thoughts: Vec<Thought>,
}

impl Ledger {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adopt an existing record sequence as-is (no verification).
    #[must_use]
    pub fn from_thoughts(thoughts: Vec<Thought>) -> Self {
        Self { thoughts }
    }

    /// Hash of the last record, or empty.
    #[must_use]
    pub fn last_hash(&self) -> &str {
        self.thoughts.last().map(|t| t.hash.as_str()).unwrap_or("")
    }

    /// Seal a draft into a chained record and append it.
    pub fn append(
        &mut self,
        draft: Draft,
        effective_secret: String,
        timestamp: u64,
    ) -> Result<&Thought, MemexError> {
        let mut thought = Thought {
            path: draft.path.key(),
            operator: draft.operator,
            expression: draft.expression,
            value: draft.value,
            effective_secret,
            hash: String::new(),
            prev_hash: self.last_hash().to_string(),
            timestamp,
        };
        thought.hash = thought.compute_hash()?;

        let index = self.thoughts.len();
        self.thoughts.push(thought);
        self.thoughts
            .get(index)
            .ok_or_else(|| MemexError::IoError("ledger append lost its record".to_string()))
    }

    /// Check every chain link and every content hash.
    pub fn verify(&self) -> Result<(), MemexError> {
        let mut prev = "";
        for (i, thought) in self.thoughts.iter().enumerate() {
            if thought.prev_hash != prev {
                return Err(MemexError::ChainBroken(i));
            }
            if thought.compute_hash()? != thought.hash {
                return Err(MemexError::HashMismatch(i));
            }
            prev = &thought.hash;
        }
        Ok(())
    }

    #[must_use]
    pub fn thoughts(&self) -> &[Thought] {
        &self.thoughts
    }

    /// The last `n` records (all of them when `n` is 0 or exceeds the length).
    #[must_use]
    pub fn tail(&self, n: usize) -> &[Thought] {
        if n == 0 || n >= self.thoughts.len() {
            return &self.thoughts;
        }
        &self.thoughts[self.thoughts.len() - n..]
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.thoughts.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.thoughts.is_empty()
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn draft(path: &str, value: Value) -> Draft {
        Draft {
            path: SemanticPath::canonical(path),
            operator: None,
            expression: value.clone(),
            value,
        }
    }

    #[test]
    fn chain_links_records() {
        let mut ledger = Ledger::new();
        ledger
            .append(draft("a", Value::from(1)), String::new(), 10)
            .expect("append");
        ledger
            .append(draft("b", Value::from(2)), String::new(), 11)
            .expect("append");

        let thoughts = ledger.thoughts();
        assert_eq!(thoughts[0].prev_hash, "");
        assert_eq!(thoughts[1].prev_hash, thoughts[0].hash);
        ledger.verify().expect("intact chain");
    }

    #[test]
    fn tampering_is_detected() {
        let mut ledger = Ledger::new();
        ledger
            .append(draft("a", Value::from(1)), String::new(), 10)
            .expect("append");
        ledger
            .append(draft("b", Value::from(2)), String::new(), 11)
            .expect("append");

        let mut thoughts = ledger.thoughts().to_vec();
        thoughts[0].value = Value::from(99);
        let tampered = Ledger::from_thoughts(thoughts.clone());
        assert!(matches!(tampered.verify(), Err(MemexError::HashMismatch(0))));

        thoughts[0].value = Value::from(1);
        thoughts[1].prev_hash = "deadbeef".to_string();
        let relinked = Ledger::from_thoughts(thoughts);
        assert!(matches!(relinked.verify(), Err(MemexError::ChainBroken(1))));
    }

    #[test]
    fn hash_covers_effective_secret() {
        let mut a = Ledger::new();
        let mut b = Ledger::new();
        let ha = a
            .append(draft("x", Value::from(1)), String::new(), 5)
            .expect("append")
            .hash
            .clone();
        let hb = b
            .append(draft("x", Value::from(1)), "k".to_string(), 5)
            .expect("append")
            .hash
            .clone();
        assert_ne!(ha, hb);
    }

    #[test]
    fn tail_returns_last_records() {
        let mut ledger = Ledger::new();
        for i in 0..5 {
            ledger
                .append(draft("n", Value::from(i)), String::new(), i as u64)
                .expect("append");
        }
        assert_eq!(ledger.tail(2).len(), 2);
        assert_eq!(ledger.tail(2)[1].value, Value::from(4));
        assert_eq!(ledger.tail(0).len(), 5);
        assert_eq!(ledger.tail(50).len(), 5);
    }
}
