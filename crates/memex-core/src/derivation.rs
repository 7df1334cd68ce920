//! # Derivation Graph
//!
//! Live formulas bound to target paths, and the reverse subscriptions that
//! drive incremental recomputation.
//!
//! ## Structure
//!
//! - `derivations`: target key → expression, evaluation scope, resolved
//!   references, last computation time
//! - `subscribers`: reference key → dependent target keys
//!
//! One derivation per target. Registering a target again replaces the old
//! entry together with its subscriptions.
//!
//! ## Invalidation
//!
//! An [`InvalidationPass`] walks subscribers breadth-first from a changed
//! path. Each target is visited at most once per pass; a recomputed target is
//! itself treated as changed. Cycles are not rejected, only cut by the
//! visited set.

use crate::evaluator::{Resolve, extract_references};
use crate::path::key_at_or_under;
use crate::primitives::POINTER_NAMESPACE;
use crate::{SemanticPath, Value};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, VecDeque};

/// One reference of a derivation: the label as written and where it binds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Reference {
    pub label: String,
    pub path: String,
}

/// A registered formula.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Derivation {
    pub expression: String,
    pub scope: SemanticPath,
    pub refs: Vec<Reference>,
    pub last_computed_at: u64,
}

/// Formulas plus reverse subscriptions.
#[derive(Debug, Clone, Default)]
pub struct DerivationGraph {
    derivations: BTreeMap<String, Derivation>,
    subscribers: BTreeMap<String, Vec<String>>,
}

impl DerivationGraph {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `derivation` at `target`, replacing any previous one.
    pub fn register(&mut self, target: &SemanticPath, derivation: Derivation) {
        let target_key = target.key();
        self.unregister(&target_key);

        for reference in &derivation.refs {
            let subs = self.subscribers.entry(reference.path.clone()).or_default();
            if !subs.contains(&target_key) {
                subs.push(target_key.clone());
            }
        }
        self.derivations.insert(target_key, derivation);
    }

    /// Drop the derivation at `target_key` and its subscriptions.
    pub fn unregister(&mut self, target_key: &str) -> Option<Derivation> {
        let old = self.derivations.remove(target_key)?;
        for reference in &old.refs {
            if let Some(subs) = self.subscribers.get_mut(&reference.path) {
                subs.retain(|t| t != target_key);
                if subs.is_empty() {
                    self.subscribers.remove(&reference.path);
                }
            }
        }
        Some(old)
    }

    /// Drop every derivation whose target is at or under `prefix`.
    pub fn clear_under(&mut self, prefix: &SemanticPath) {
        let prefix = prefix.key();
        let doomed: Vec<String> = self
            .derivations
            .keys()
            .filter(|k| key_at_or_under(k, &prefix))
            .cloned()
            .collect();
        for target in doomed {
            self.unregister(&target);
        }
    }

    pub fn clear(&mut self) {
        self.derivations.clear();
        self.subscribers.clear();
    }

    #[must_use]
    pub fn get(&self, target_key: &str) -> Option<&Derivation> {
        self.derivations.get(target_key)
    }

    /// Record a fresh computation time for `target_key`.
    pub fn touch(&mut self, target_key: &str, now: u64) {
        if let Some(derivation) = self.derivations.get_mut(target_key) {
            derivation.last_computed_at = now;
        }
    }

    #[must_use]
    pub fn subscribers_of(&self, reference_key: &str) -> &[String] {
        self.subscribers
            .get(reference_key)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Every subscribed reference key at or under `prefix`.
    #[must_use]
    pub fn references_under(&self, prefix: &SemanticPath) -> Vec<String> {
        let prefix = prefix.key();
        self.subscribers
            .keys()
            .filter(|k| key_at_or_under(k, &prefix))
            .cloned()
            .collect()
    }

    #[must_use]
    pub fn targets(&self) -> Vec<String> {
        self.derivations.keys().cloned().collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.derivations.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.derivations.is_empty()
    }
}

// =============================================================================
// REFERENCE BINDING
// =============================================================================

/// Bind every identifier of `expression` to an absolute path.
///
/// - A label binds under `scope` when that path currently reads a value,
///   otherwise to the absolute path when that one reads a value
/// - When neither reads, bare labels bind under `scope` and dotted labels
///   bind as absolute paths
/// - `__ptr.` labels are resolved at evaluation time and never subscribed
/// - Duplicate paths keep their first label
pub fn bind_references<R: Resolve + ?Sized>(
    expression: &str,
    scope: &SemanticPath,
    resolver: &R,
) -> Vec<Reference> {
    let mut seen = BTreeSet::new();
    let mut refs = Vec::new();
    for label in extract_references(expression) {
        if label.starts_with(&format!("{}.", POINTER_NAMESPACE)) {
            continue;
        }
        let parts = SemanticPath::canonical(&label);
        if parts.is_root() {
            continue;
        }
        let relative = scope.join(&parts);
        let bound = if resolver.read_path(&relative).is_some() {
            relative
        } else if resolver.read_path(&parts).is_some() || label.contains('.') {
            parts
        } else {
            relative
        };
        let key = bound.key();
        if seen.insert(key.clone()) {
            refs.push(Reference { label, path: key });
        }
    }
    refs
}

// =============================================================================
// INVALIDATION
// =============================================================================

/// Breadth-first walk over subscribers from one changed path.
#[derive(Debug, Clone, Default)]
pub struct InvalidationPass {
    changed: VecDeque<String>,
    pending: VecDeque<String>,
    seen: BTreeSet<String>,
    recomputed: usize,
}

impl InvalidationPass {
    /// Start a pass at `changed`. The root path never has subscribers.
    #[must_use]
    pub fn new(changed: &SemanticPath) -> Self {
        let mut pass = Self::default();
        if !changed.is_root() {
            pass.changed.push_back(changed.key());
        }
        pass
    }

    /// Start a pass at every subscribed reference at or under `scope`.
    #[must_use]
    pub fn under(scope: &SemanticPath, graph: &DerivationGraph) -> Self {
        let mut pass = Self::default();
        pass.changed.extend(graph.references_under(scope));
        pass
    }

    /// The next target to recompute, or `None` once the pass is exhausted.
    pub fn next_target(&mut self, graph: &DerivationGraph) -> Option<String> {
        loop {
            if let Some(target) = self.pending.pop_front() {
                return Some(target);
            }
            let changed = self.changed.pop_front()?;
            for target in graph.subscribers_of(&changed) {
                if self.seen.insert(target.clone()) {
                    self.pending.push_back(target.clone());
                }
            }
        }
    }

    /// Mark `target` as recomputed so its own subscribers follow.
    pub fn mark_recomputed(&mut self, target: String) {
        self.recomputed += 1;
        self.changed.push_back(target);
    }

    #[must_use]
    pub fn recomputed(&self) -> usize {
        self.recomputed
    }
}

/// Value to commit for a derivation: the evaluated result, or the raw
/// expression text when it does not evaluate.
#[must_use]
pub fn value_or_expression(evaluated: Option<Value>, expression: &str) -> Value {
    evaluated.unwrap_or_else(|| Value::text(expression))
}

// =============================================================================
// TESTS
// =============================================================================
