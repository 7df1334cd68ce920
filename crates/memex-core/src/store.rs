//! # Store
//!
//! The single owner of all engine state and the facade for every public
//! operation.
//!
//! ## State
//!
//! - `ledger`: the hash-chained thought log, the only source of truth
//! - `scopes`: secret and noise declarations
//! - `branches`: one encrypted object per non-root secret scope
//! - `index`: the materialized view, rebuilt after every commit
//! - `derivations`: live formulas and their subscriptions
//! - `operators`: the symbol registry used to classify writes
//!
//! ## Commit pipeline
//!
//! ```text
//! write ─► classify ─► apply ─► commit_value ─► ledger.append ─► materialize
//!                                     │
//!                                     └─► invalidate ─► recompute ─► commit_value ...
//! ```
//!
//! Every operation runs to completion before returning; nothing here yields.
//! Wrap the store in [`crate::SharedStore`] to share it across threads.

use crate::cipher::{decrypt, encrypt};
use crate::clock::{Clock, SystemClock};
use crate::derivation::{
    Derivation, DerivationGraph, InvalidationPass, bind_references, value_or_expression,
};
use crate::evaluator::{Resolve, evaluate};
use crate::formats::Snapshot;
use crate::ledger::{Draft, Ledger};
use crate::materializer::{Index, insert_nested, materialize};
use crate::operators::{Instruction, OperatorRegistry, classify, classify_kind};
use crate::path::key_at_or_under;
use crate::pointer::{hop_budget, resolve};
use crate::primitives::{DECLARATION_MARKER, MASK_PLACEHOLDER, SCOPE_ROOT_KEY, TOMBSTONE_MARKER};
use crate::secrets::ScopeRegistry;
use crate::selector::{
    contains_filter, contains_iterator, filtered_scopes, iterator_indices, read_filter,
    read_selection, read_transform, substitute_iterator, substitute_iterator_in,
};
use crate::{MemexError, OperatorKind, SemanticPath, Thought, Value};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

// =============================================================================
// RESULT TYPES
// =============================================================================

/// What a write produced.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CommitResult {
    /// The last thought appended by the write.
    Committed(Thought),
    /// A root-level evaluation or collection; nothing was appended.
    Computed(Value),
    /// Nothing was appended (operator definition, empty broadcast).
    Nothing,
}

impl CommitResult {
    /// The appended thought, if any.
    #[must_use]
    pub fn thought(&self) -> Option<&Thought> {
        match self {
            Self::Committed(thought) => Some(thought),
            _ => None,
        }
    }
}

/// Read-only diagnostic view of the store.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Inspection {
    pub ledger: Vec<Thought>,
    pub index: BTreeMap<String, Value>,
    pub encrypted_scopes: Vec<String>,
    pub secret_scopes: Vec<String>,
    pub noise_scopes: Vec<String>,
}

/// Where an explained input lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Origin {
    Public,
    Stealth,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExplainedInput {
    pub label: String,
    pub path: String,
    /// The input's value, or the mask placeholder for stealth inputs.
    pub value: Option<Value>,
    pub origin: Origin,
    pub masked: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExplainedDerivation {
    pub expression: String,
    pub inputs: Vec<ExplainedInput>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ExplainMeta {
    pub depends_on: Vec<String>,
    pub last_computed_at: Option<u64>,
}

/// How a path's value came to be.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Explanation {
    pub path: String,
    pub value: Option<Value>,
    pub derivation: Option<ExplainedDerivation>,
    pub meta: ExplainMeta,
}

// =============================================================================
// STORE
// =============================================================================

/// The semantic data engine.
pub struct Store {
    ledger: Ledger,
    scopes: ScopeRegistry,
    branches: BTreeMap<String, Value>,
    index: Index,
    derivations: DerivationGraph,
    operators: OperatorRegistry,
    clock: Box<dyn Clock>,
}

impl fmt::Debug for Store {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Store")
            .field("thoughts", &self.ledger.len())
            .field("index_entries", &self.index.len())
            .field("secret_scopes", &self.scopes.secrets().len())
            .field("noise_scopes", &self.scopes.noises().len())
            .field("derivations", &self.derivations.len())
            .finish()
    }
}

impl Default for Store {
    fn default() -> Self {
        Self::new()
    }
}

impl Store {
    /// An empty store on the wall clock.
    #[must_use]
    pub fn new() -> Self {
        Self::with_clock(SystemClock)
    }

    /// An empty store on the given clock.
    #[must_use]
    pub fn with_clock(clock: impl Clock + 'static) -> Self {
        Self {
            ledger: Ledger::new(),
            scopes: ScopeRegistry::new(),
            branches: BTreeMap::new(),
            index: Index::new(),
            derivations: DerivationGraph::new(),
            operators: OperatorRegistry::new(),
            clock: Box::new(clock),
        }
    }

    /// A store restored from a snapshot, on the given clock.
    #[must_use]
    pub fn from_snapshot(snapshot: Snapshot, clock: impl Clock + 'static) -> Self {
        let mut store = Self::with_clock(clock);
        store.import_snapshot(snapshot);
        store
    }

    // -------------------------------------------------------------------------
    // Accessors
    // -------------------------------------------------------------------------

    #[must_use]
    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    #[must_use]
    pub fn index(&self) -> &Index {
        &self.index
    }

    #[must_use]
    pub fn scopes(&self) -> &ScopeRegistry {
        &self.scopes
    }

    #[must_use]
    pub fn operators(&self) -> &OperatorRegistry {
        &self.operators
    }

    #[must_use]
    pub fn derivations(&self) -> &DerivationGraph {
        &self.derivations
    }

    #[must_use]
    pub fn encrypted_branches(&self) -> &BTreeMap<String, Value> {
        &self.branches
    }

    // =========================================================================
    // WRITES
    // =========================================================================

    /// Classify and commit a write at `path`.
    ///
    /// `hint` acts as if the operator symbol were appended as the leaf.
    pub fn write(
        &mut self,
        path: &str,
        value: impl Into<Value>,
        hint: Option<&str>,
    ) -> Result<CommitResult, MemexError> {
        let instruction = classify(&self.operators, &SemanticPath::parse(path), value.into(), hint)?;
        self.apply(instruction)
    }

    /// Tombstone the subtree at `path`.
    pub fn remove(&mut self, path: &str) -> Result<Thought, MemexError> {
        self.remove_subtree(&SemanticPath::canonical(path))
    }

    pub fn declare_secret(&mut self, scope: &str, secret: &str) -> Result<(), MemexError> {
        self.apply_kind(OperatorKind::Secret, scope, Value::text(secret))
            .map(|_| ())
    }

    pub fn declare_noise(&mut self, scope: &str, noise: &str) -> Result<(), MemexError> {
        self.apply_kind(OperatorKind::Noise, scope, Value::text(noise))
            .map(|_| ())
    }

    pub fn define_pointer(&mut self, path: &str, target: &str) -> Result<(), MemexError> {
        self.apply_kind(OperatorKind::Pointer, path, Value::text(target))
            .map(|_| ())
    }

    /// Claim `username` at `path`. The name is validated and lowercased first.
    pub fn declare_identity(&mut self, path: &str, username: &str) -> Result<(), MemexError> {
        self.apply_kind(OperatorKind::Identity, path, Value::text(username))
            .map(|_| ())
    }

    /// Bind `symbol` to an operator kind. Kernel-level: no thought is recorded.
    ///
    /// Kinds form a closed set: `secret`, `noise`, `pointer`, `identity`,
    /// `derive` (alias `eval`), `query` (alias `collect`) and `remove`.
    /// Plain assignment has no kind; it is what a path without an operator
    /// does. Any other kind is [`MemexError::InvalidOperator`].
    pub fn define_operator(&mut self, symbol: &str, kind: &str) -> Result<(), MemexError> {
        self.operators.define(symbol, kind).map(|_| ())
    }

    /// Derive `path` from `expression`, evaluated in the scope of `path`'s parent.
    /// At the root the expression is only evaluated.
    pub fn derive_at(&mut self, path: &str, expression: &str) -> Result<CommitResult, MemexError> {
        self.apply_kind(OperatorKind::Derive, path, Value::text(expression))
    }

    /// Read `paths` and return them as a list. Missing values read as null.
    #[must_use]
    pub fn collect(&self, paths: &[&str]) -> Value {
        self.collect_with(paths, |values| {
            Value::List(values.into_iter().map(Option::unwrap_or_default).collect())
        })
    }

    /// Read `paths` and hand the results to `combiner`.
    pub fn collect_with<F>(&self, paths: &[&str], combiner: F) -> Value
    where
        F: FnOnce(Vec<Option<Value>>) -> Value,
    {
        combiner(paths.iter().map(|p| self.read(p)).collect())
    }

    /// Read `paths` and commit the collected list at `scope`.
    pub fn collect_at(&mut self, scope: &str, paths: &[&str]) -> Result<CommitResult, MemexError> {
        let list = Value::List(paths.iter().map(|p| Value::text(*p)).collect());
        let scope = SemanticPath::parse(scope);
        let call = scope.child(OperatorKind::Query.as_str());
        self.apply(classify_kind(OperatorKind::Query, scope, &call, list)?)
    }

    fn apply_kind(
        &mut self,
        kind: OperatorKind,
        path: &str,
        value: Value,
    ) -> Result<CommitResult, MemexError> {
        let scope = SemanticPath::parse(path);
        let call = scope.child(kind.as_str());
        self.apply(classify_kind(kind, scope, &call, value)?)
    }

    fn apply(&mut self, instruction: Instruction) -> Result<CommitResult, MemexError> {
        match instruction {
            Instruction::Set { path, value } => {
                let thought = self.commit_value(&path, value, None)?;
                self.invalidate(&path)?;
                Ok(CommitResult::Committed(thought))
            }
            Instruction::DeclareSecret { scope, secret } => {
                self.scopes.declare_secret(&scope, secret);
                let thought = self.commit_declaration(&scope, OperatorKind::Secret)?;
                self.invalidate_scope(&scope)?;
                Ok(CommitResult::Committed(thought))
            }
            Instruction::DeclareNoise { scope, noise } => {
                self.scopes.declare_noise(&scope, noise);
                let thought = self.commit_declaration(&scope, OperatorKind::Noise)?;
                self.invalidate_scope(&scope)?;
                Ok(CommitResult::Committed(thought))
            }
            Instruction::Pointer { path, target } => {
                let thought =
                    self.commit_value(&path, Value::Pointer(target), Some(OperatorKind::Pointer))?;
                self.invalidate(&path)?;
                Ok(CommitResult::Committed(thought))
            }
            Instruction::Identity { path, username } => {
                let thought = self.commit_value(
                    &path,
                    Value::Identity(username),
                    Some(OperatorKind::Identity),
                )?;
                self.invalidate(&path)?;
                Ok(CommitResult::Committed(thought))
            }
            Instruction::Derive {
                scope,
                name,
                expression,
            } => self.derive(&scope, &name, &expression),
            Instruction::Evaluate { expression } => {
                let value = evaluate(&expression, &SemanticPath::root(), &*self);
                Ok(CommitResult::Computed(value_or_expression(value, &expression)))
            }
            Instruction::Collect { scope, paths } => {
                let values = Value::List(
                    paths
                        .iter()
                        .map(|p| self.read(p).unwrap_or_default())
                        .collect(),
                );
                if scope.is_root() {
                    return Ok(CommitResult::Computed(values));
                }
                let thought = self.commit_value(&scope, values, Some(OperatorKind::Query))?;
                self.invalidate(&scope)?;
                Ok(CommitResult::Committed(thought))
            }
            Instruction::Remove { target } => {
                self.remove_subtree(&target).map(CommitResult::Committed)
            }
            Instruction::DefineOperator { symbol, kind } => {
                self.operators.define(&symbol, &kind)?;
                Ok(CommitResult::Nothing)
            }
        }
    }

    // -------------------------------------------------------------------------
    // Derivations
    // -------------------------------------------------------------------------

    /// Register and evaluate `scope.name = expression`, broadcasting over
    /// iterator and filter selectors in the raw `scope`.
    fn derive(
        &mut self,
        scope: &SemanticPath,
        name: &str,
        expression: &str,
    ) -> Result<CommitResult, MemexError> {
        if contains_iterator(scope) {
            let mut last = CommitResult::Nothing;
            for idx in iterator_indices(scope, &self.index) {
                let target_scope = substitute_iterator(scope, &idx).normalize();
                let expr = substitute_iterator_in(expression, &idx);
                last = self.derive_one(&target_scope, name, &expr)?;
            }
            return Ok(last);
        }

        if contains_filter(scope) {
            let mut last = CommitResult::Nothing;
            for target_scope in filtered_scopes(scope, &self.index, &*self) {
                last = self.derive_one(&target_scope.normalize(), name, expression)?;
            }
            return Ok(last);
        }

        self.derive_one(&scope.normalize(), name, expression)
    }

    fn derive_one(
        &mut self,
        scope: &SemanticPath,
        name: &str,
        expression: &str,
    ) -> Result<CommitResult, MemexError> {
        let target = scope.join(&SemanticPath::canonical(name));
        let refs = bind_references(expression, scope, &*self);
        let derivation = Derivation {
            expression: expression.to_string(),
            scope: scope.clone(),
            refs,
            last_computed_at: self.clock.now_millis(),
        };
        self.derivations.register(&target, derivation);

        let value = value_or_expression(evaluate(expression, scope, &*self), expression);
        let thought = self.commit_value(&target, value, Some(OperatorKind::Derive))?;
        self.invalidate(&target)?;
        Ok(CommitResult::Committed(thought))
    }

    /// Recompute every derivation downstream of `changed`, each at most once.
    fn invalidate(&mut self, changed: &SemanticPath) -> Result<(), MemexError> {
        self.run_invalidation(InvalidationPass::new(changed), changed)
    }

    /// Invalidate every derivation reading at or under a re-keyed scope.
    fn invalidate_scope(&mut self, scope: &SemanticPath) -> Result<(), MemexError> {
        let pass = InvalidationPass::under(scope, &self.derivations);
        self.run_invalidation(pass, scope)
    }

    fn run_invalidation(
        &mut self,
        mut pass: InvalidationPass,
        changed: &SemanticPath,
    ) -> Result<(), MemexError> {
        while let Some(target) = pass.next_target(&self.derivations) {
            if self.recompute(&target)? {
                pass.mark_recomputed(target);
            }
        }
        if pass.recomputed() > 0 {
            tracing::debug!(
                changed = %changed,
                recomputed = pass.recomputed(),
                "invalidation cascade"
            );
        }
        Ok(())
    }

    fn recompute(&mut self, target_key: &str) -> Result<bool, MemexError> {
        let Some(derivation) = self.derivations.get(target_key).cloned() else {
            return Ok(false);
        };
        let value = value_or_expression(
            evaluate(&derivation.expression, &derivation.scope, &*self),
            &derivation.expression,
        );
        let target = SemanticPath::from_key(target_key);
        self.commit_value(&target, value, Some(OperatorKind::Derive))?;
        let now = self.clock.now_millis();
        self.derivations.touch(target_key, now);
        Ok(true)
    }

    // -------------------------------------------------------------------------
    // Commit layer
    // -------------------------------------------------------------------------

    /// Commit `expression` at `path`, routing it into its hiding branch or
    /// encrypting it in place as the scopes require.
    fn commit_value(
        &mut self,
        path: &SemanticPath,
        expression: Value,
        operator: Option<OperatorKind>,
    ) -> Result<Thought, MemexError> {
        let stored = match self.scopes.hiding_scope(path) {
            Some(scope) => {
                self.write_branch(&scope, path, expression.clone())?;
                expression.clone()
            }
            None => {
                let secret = self.scopes.effective_secret(path);
                let plain = secret.is_empty()
                    || expression.is_marker()
                    || matches!(operator, Some(OperatorKind::Derive | OperatorKind::Query));
                if plain {
                    expression.clone()
                } else {
                    encrypt(&expression, &secret, path)?
                }
            }
        };
        self.commit_thought(path, operator, expression, stored)
    }

    fn commit_declaration(
        &mut self,
        scope: &SemanticPath,
        kind: OperatorKind,
    ) -> Result<Thought, MemexError> {
        let marker = Value::text(DECLARATION_MARKER);
        self.commit_thought(scope, Some(kind), marker.clone(), marker)
    }

    fn commit_thought(
        &mut self,
        path: &SemanticPath,
        operator: Option<OperatorKind>,
        expression: Value,
        value: Value,
    ) -> Result<Thought, MemexError> {
        let draft = Draft {
            path: path.clone(),
            operator,
            expression,
            value,
        };
        let effective = self.scopes.effective_secret(path);
        let timestamp = self.clock.now_millis();
        let thought = self.ledger.append(draft, effective, timestamp)?.clone();
        tracing::debug!(
            path = %path,
            operator = ?thought.operator,
            hash = %thought.hash.get(..12).unwrap_or(&thought.hash),
            "thought committed"
        );
        self.rebuild_index();
        Ok(thought)
    }

    fn rebuild_index(&mut self) {
        self.index = materialize(self.ledger.thoughts(), &self.scopes);
    }

    // -------------------------------------------------------------------------
    // Encrypted branches
    // -------------------------------------------------------------------------

    fn open_branch(&self, scope: &SemanticPath, secret: &str) -> BTreeMap<String, Value> {
        match self
            .branches
            .get(&scope.key())
            .and_then(|blob| decrypt(blob, secret, scope))
        {
            Some(Value::Object(map)) => map,
            _ => BTreeMap::new(),
        }
    }

    fn seal_branch(
        &mut self,
        scope: &SemanticPath,
        secret: &str,
        branch: BTreeMap<String, Value>,
    ) -> Result<(), MemexError> {
        let blob = encrypt(&Value::Object(branch), secret, scope)?;
        self.branches.insert(scope.key(), blob);
        Ok(())
    }

    /// Store `value` at `path` inside the branch of `scope`.
    fn write_branch(
        &mut self,
        scope: &SemanticPath,
        path: &SemanticPath,
        value: Value,
    ) -> Result<(), MemexError> {
        let secret = self.scopes.effective_secret(scope);
        if secret.is_empty() {
            return Ok(());
        }
        let mut branch = self.open_branch(scope, &secret);
        let rel = path.suffix(scope.len());
        if rel.is_root() {
            branch.insert(SCOPE_ROOT_KEY.to_string(), value);
        } else {
            insert_nested(&mut branch, rel.segments(), value);
        }
        self.seal_branch(scope, &secret, branch)
    }

    /// Delete the key at `path` from the branch of `scope`.
    fn remove_from_branch(
        &mut self,
        scope: &SemanticPath,
        path: &SemanticPath,
    ) -> Result<(), MemexError> {
        let secret = self.scopes.effective_secret(scope);
        if secret.is_empty() {
            return Ok(());
        }
        let mut branch = self.open_branch(scope, &secret);
        let rel = path.suffix(scope.len());
        let Some((leaf, parents)) = rel.segments().split_last() else {
            return Ok(());
        };

        let mut node = &mut branch;
        for part in parents {
            match node.get_mut(part) {
                Some(Value::Object(child)) => node = child,
                _ => return Ok(()),
            }
        }
        if node.remove(leaf).is_none() {
            return Ok(());
        }
        self.seal_branch(scope, &secret, branch)
    }

    // -------------------------------------------------------------------------
    // Removal
    // -------------------------------------------------------------------------

    fn remove_subtree(&mut self, target: &SemanticPath) -> Result<Thought, MemexError> {
        self.derivations.clear_under(target);
        self.scopes.purge_under(target);

        let prefix = target.key();
        let keys: Vec<String> = self.branches.keys().cloned().collect();
        for key in keys {
            if key_at_or_under(&key, &prefix) {
                self.branches.remove(&key);
                continue;
            }
            let scope = SemanticPath::from_key(&key);
            if target.len() > scope.len() && target.starts_with(&scope) {
                self.remove_from_branch(&scope, target)?;
            }
        }

        let marker = Value::text(TOMBSTONE_MARKER);
        self.commit_thought(target, Some(OperatorKind::Remove), marker.clone(), marker)
    }

    // =========================================================================
    // READS
    // =========================================================================

    /// Resolve `path` through selectors, secret branches and pointers.
    ///
    /// `None` for missing paths, secret scope roots, undecryptable values and
    /// pointer chains longer than the hop bound.
    #[must_use]
    pub fn read(&self, path: &str) -> Option<Value> {
        let mut budget = hop_budget();
        self.read_with(&SemanticPath::parse(path), &mut budget)
    }

    fn read_with(&self, path: &SemanticPath, budget: &mut usize) -> Option<Value> {
        if let Some(projected) = read_transform(path, &self.index, self) {
            return Some(projected);
        }
        if let Some(selected) = read_selection(path, &self.index, self) {
            return Some(selected);
        }
        let path = path.normalize();
        if let Some(filtered) = read_filter(&path, &self.index, self) {
            return Some(filtered);
        }

        if let Some(scope) = self.scopes.hiding_scope(&path) {
            return self.read_branch(&scope, &path, budget);
        }

        if let Some(direct @ Value::Pointer(_)) = self.index.get(&path) {
            return Some(direct.clone());
        }

        let resolution = resolve(&self.index, &path, budget);
        if resolution.exhausted {
            return None;
        }
        match resolution.raw {
            None if resolution.path != path => self.read_with(&resolution.path, budget),
            None => None,
            Some(blob @ Value::Ciphertext(_)) => {
                let secret = self.scopes.effective_secret(&resolution.path);
                if secret.is_empty() {
                    return None;
                }
                decrypt(&blob, &secret, &resolution.path)
            }
            Some(raw) => Some(raw),
        }
    }

    fn read_branch(
        &self,
        scope: &SemanticPath,
        path: &SemanticPath,
        budget: &mut usize,
    ) -> Option<Value> {
        if path.len() == scope.len() {
            return None;
        }
        let secret = self.scopes.effective_secret(scope);
        if secret.is_empty() {
            return None;
        }
        let blob = self.branches.get(&scope.key())?;
        let mut node = decrypt(blob, &secret, scope)?;
        for part in path.suffix(scope.len()).segments() {
            node = match node {
                Value::Object(mut map) => map.remove(part)?,
                _ => return None,
            };
        }

        match node {
            Value::Pointer(target) => {
                if *budget == 0 {
                    return None;
                }
                *budget -= 1;
                self.read_with(&SemanticPath::canonical(&target), budget)
            }
            other => Some(other),
        }
    }

    // =========================================================================
    // DIAGNOSTICS
    // =========================================================================

    /// The ledger tail (everything when `last` is absent or 0), the index and
    /// the declared scope keys.
    #[must_use]
    pub fn inspect(&self, last: Option<usize>) -> Inspection {
        Inspection {
            ledger: self.ledger.tail(last.unwrap_or(0)).to_vec(),
            index: self.index.entries().clone(),
            encrypted_scopes: self.branches.keys().cloned().collect(),
            secret_scopes: self.scopes.secrets().keys().cloned().collect(),
            noise_scopes: self.scopes.noises().keys().cloned().collect(),
        }
    }

    /// The value at `path` together with its derivation, if any. Inputs that
    /// live inside a secret branch, directly or through a pointer, are masked.
    #[must_use]
    pub fn explain(&self, path: &str) -> Explanation {
        let target = SemanticPath::parse(path).normalize();
        let key = target.key();
        let value = self.read_path(&target);

        let Some(derivation) = self.derivations.get(&key) else {
            return Explanation {
                path: key,
                value,
                derivation: None,
                meta: ExplainMeta::default(),
            };
        };

        let inputs = derivation
            .refs
            .iter()
            .map(|reference| {
                let ref_path = SemanticPath::parse(&reference.path).normalize();
                let stealth = self.reaches_stealth(&ref_path);
                ExplainedInput {
                    label: reference.label.clone(),
                    path: reference.path.clone(),
                    value: if stealth {
                        Some(Value::text(MASK_PLACEHOLDER))
                    } else {
                        self.read_path(&ref_path)
                    },
                    origin: if stealth { Origin::Stealth } else { Origin::Public },
                    masked: stealth,
                }
            })
            .collect();

        Explanation {
            path: key,
            value,
            derivation: Some(ExplainedDerivation {
                expression: derivation.expression.clone(),
                inputs,
            }),
            meta: ExplainMeta {
                depends_on: derivation.refs.iter().map(|r| r.path.clone()).collect(),
                last_computed_at: Some(derivation.last_computed_at),
            },
        }
    }

    /// Whether `path` lies in a hiding scope, either literally or once
    /// pointers are followed.
    fn reaches_stealth(&self, path: &SemanticPath) -> bool {
        if self.scopes.hiding_scope(path).is_some() {
            return true;
        }
        let resolution = resolve(&self.index, path, &mut hop_budget());
        self.scopes.hiding_scope(&resolution.path).is_some()
    }

    /// Recheck every hash and chain link of the ledger.
    pub fn verify_ledger(&self) -> Result<(), MemexError> {
        self.ledger.verify()
    }

    // =========================================================================
    // PORTABILITY
    // =========================================================================

    /// Everything needed to reproduce this store's derived state.
    #[must_use]
    pub fn export_snapshot(&self) -> Snapshot {
        Snapshot {
            ledger: self.ledger.thoughts().to_vec(),
            secrets: self.scopes.secrets().clone(),
            noises: self.scopes.noises().clone(),
            encrypted_branches: self.branches.clone(),
            operators: self.operators.entries().clone(),
        }
    }

    /// Replace all state with `snapshot`. Derivations are not part of a
    /// snapshot and start empty.
    pub fn import_snapshot(&mut self, snapshot: Snapshot) {
        self.ledger = Ledger::from_thoughts(snapshot.ledger);
        self.scopes = ScopeRegistry::from_maps(snapshot.secrets, snapshot.noises);
        self.branches = snapshot.encrypted_branches;
        self.operators = OperatorRegistry::with_imported(snapshot.operators);
        self.derivations.clear();
        self.rebuild_index();
        tracing::debug!(thoughts = self.ledger.len(), "snapshot imported");
    }

    /// Clear all state and re-apply `records` through the write path.
    ///
    /// Fresh hashes and timestamps are produced; derivations are not restored.
    pub fn replay_ledger(&mut self, records: &[Thought]) -> Result<(), MemexError> {
        self.ledger = Ledger::new();
        self.scopes = ScopeRegistry::new();
        self.branches.clear();
        self.derivations.clear();
        self.rebuild_index();

        for record in records {
            let path = SemanticPath::from_key(&record.path);
            match record.operator {
                Some(OperatorKind::Secret) => {
                    let secret = record.expression.as_text().unwrap_or(DECLARATION_MARKER);
                    self.apply(Instruction::DeclareSecret {
                        scope: path,
                        secret: secret.to_string(),
                    })?;
                }
                Some(OperatorKind::Noise) => {
                    let noise = record.expression.as_text().unwrap_or(DECLARATION_MARKER);
                    self.apply(Instruction::DeclareNoise {
                        scope: path,
                        noise: noise.to_string(),
                    })?;
                }
                Some(OperatorKind::Identity) => {
                    let Some(username) = marker_text(record, |v| match v {
                        Value::Identity(name) => Some(name.as_str()),
                        _ => None,
                    }) else {
                        tracing::warn!(path = %record.path, "replay skipped identity without a name");
                        continue;
                    };
                    self.apply_kind(OperatorKind::Identity, &record.path, Value::text(username))?;
                }
                Some(OperatorKind::Pointer) => {
                    let Some(target) = marker_text(record, Value::as_pointer) else {
                        tracing::warn!(path = %record.path, "replay skipped pointer without a target");
                        continue;
                    };
                    let target = SemanticPath::canonical(target).key();
                    self.apply(Instruction::Pointer { path, target })?;
                }
                Some(OperatorKind::Remove) => {
                    self.remove_subtree(&path)?;
                }
                Some(op @ (OperatorKind::Derive | OperatorKind::Query)) => {
                    self.commit_value(&path, record.value.clone(), Some(op))?;
                    self.invalidate(&path)?;
                }
                None => {
                    self.commit_value(&path, record.expression.clone(), None)?;
                    self.invalidate(&path)?;
                }
            }
        }
        Ok(())
    }
}

/// The string carried by a marker in a record's expression or value, or a
/// plain text value.
fn marker_text<'a>(record: &'a Thought, pick: impl Fn(&'a Value) -> Option<&'a str>) -> Option<&'a str> {
    pick(&record.expression)
        .or_else(|| pick(&record.value))
        .or_else(|| record.value.as_text())
        .filter(|s| !s.is_empty())
}

// =============================================================================
// EVALUATOR SEAM
// =============================================================================

impl Resolve for Store {
    fn read_path(&self, path: &SemanticPath) -> Option<Value> {
        let mut budget = hop_budget();
        self.read_with(path, &mut budget)
    }

    fn index_entry(&self, path: &SemanticPath) -> Option<Value> {
        self.index.get(path).cloned()
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn store() -> Store {
        Store::with_clock(ManualClock::ticking(1_000, 1))
    }

    fn num(n: f64) -> Value {
        Value::Number(n)
    }

    #[test]
    fn plain_write_and_read() {
        let mut s = store();
        s.write("profile.name", "Ana", None).expect("write");
        assert_eq!(s.read("profile.name"), Some(Value::text("Ana")));
        assert_eq!(s.read("profile.missing"), None);
        assert_eq!(s.ledger().len(), 1);
    }

    #[test]
    fn bracket_and_dot_paths_address_the_same_key() {
        let mut s = store();
        s.write("fleet[\"1\"].fuel", 10, None).expect("write");
        assert_eq!(s.read("fleet.1.fuel"), Some(num(10.0)));
        assert_eq!(s.read("fleet[1].fuel"), Some(num(10.0)));
    }

    #[test]
    fn hint_acts_as_leaf_operator() {
        let mut s = store();
        s.write("vault", "k", Some("_")).expect("secret");
        assert_eq!(s.scopes().secrets().len(), 1);
        assert!(s.write("vault", "k", Some("nope")).is_err());
    }

    #[test]
    fn secret_scope_is_stealth() {
        let mut s = store();
        s.declare_secret("wallet", "hunter2").expect("secret");
        s.write("wallet.balance", 500, None).expect("write");

        assert_eq!(s.read("wallet.balance"), Some(num(500.0)));
        assert_eq!(s.read("wallet"), None);
        assert!(s.index().entries().keys().all(|k| !k.starts_with("wallet.")));
        assert!(s.encrypted_branches().contains_key("wallet"));
    }

    #[test]
    fn declaration_never_logs_the_secret() {
        let mut s = store();
        s.declare_secret("vault", "correct horse").expect("secret");
        let json = serde_json::to_string(s.ledger().thoughts()).expect("json");
        assert!(!json.contains("correct horse"));
        assert_eq!(s.ledger().thoughts()[0].value, Value::text(DECLARATION_MARKER));
    }

    #[test]
    fn writing_the_scope_root_stores_under_expression_key() {
        let mut s = store();
        s.declare_secret("vault", "k").expect("secret");
        s.write("vault", "top", None).expect("write");
        assert_eq!(s.read("vault"), None);
        assert_eq!(s.read("vault.expression"), Some(Value::text("top")));
    }

    #[test]
    fn root_secret_encrypts_in_place() {
        let mut s = store();
        s.declare_secret("", "root-key").expect("secret");
        s.write("note", "hello", None).expect("write");

        let raw = s.index().get(&SemanticPath::canonical("note")).cloned();
        assert!(matches!(raw, Some(Value::Ciphertext(_))));
        assert_eq!(s.read("note"), Some(Value::text("hello")));
    }

    #[test]
    fn noise_changes_the_effective_secret() {
        let mut s = store();
        s.declare_secret("a", "k").expect("secret");
        s.write("a.v", 1, None).expect("write");
        let before = s.ledger().thoughts().last().map(|t| t.effective_secret.clone());

        s.declare_noise("a", "n").expect("noise");
        s.write("a.w", 2, None).expect("write");
        let after = s.ledger().thoughts().last().map(|t| t.effective_secret.clone());
        assert_ne!(before, after);
    }

    #[test]
    fn pointers_redirect_and_markers_read_back() {
        let mut s = store();
        s.write("profiles.ana.city", "Lima", None).expect("write");
        s.define_pointer("me", "profiles.ana").expect("pointer");

        assert_eq!(s.read("me.city"), Some(Value::text("Lima")));
        assert_eq!(s.read("me"), Some(Value::Pointer("profiles.ana".into())));
    }

    #[test]
    fn pointer_cycle_reads_absent() {
        let mut s = store();
        s.define_pointer("a", "b").expect("pointer");
        s.define_pointer("b", "a").expect("pointer");
        assert_eq!(s.read("a.x"), None);
    }

    #[test]
    fn pointer_into_secret_scope_decrypts() {
        let mut s = store();
        s.declare_secret("vault", "k").expect("secret");
        s.write("vault.pin", 1234, None).expect("write");
        s.define_pointer("alias", "vault").expect("pointer");
        assert_eq!(s.read("alias.pin"), Some(num(1234.0)));
    }

    #[test]
    fn pointer_inside_branch_is_followed() {
        let mut s = store();
        s.write("public.rate", 3, None).expect("write");
        s.declare_secret("vault", "k").expect("secret");
        s.define_pointer("vault.link", "public.rate").expect("pointer");
        assert_eq!(s.read("vault.link"), Some(num(3.0)));
        assert!(s.index().get(&SemanticPath::canonical("vault.link")).is_none());
    }

    #[test]
    fn identity_is_validated_before_commit() {
        let mut s = store();
        assert!(matches!(
            s.declare_identity("", "No--Way"),
            Err(MemexError::InvalidIdentity(_))
        ));
        assert!(s.ledger().is_empty());

        s.declare_identity("", "Ana-Maria").expect("identity");
        assert_eq!(s.read(""), Some(Value::Identity("ana-maria".into())));
    }

    #[test]
    fn derivation_recomputes_on_input_change() {
        let mut s = store();
        s.write("trucks.1.fuel", 10, None).expect("write");
        s.write("trucks.1.price", 2, None).expect("write");
        s.derive_at("trucks.1.cost", "fuel * price").expect("derive");
        assert_eq!(s.read("trucks.1.cost"), Some(num(20.0)));

        s.write("trucks.1.fuel", 15, None).expect("write");
        assert_eq!(s.read("trucks.1.cost"), Some(num(30.0)));
    }

    #[test]
    fn shared_bare_label_binds_to_the_absolute_path() {
        let mut s = store();
        s.write("price", 2, None).expect("write");
        s.write("trucks.1.fuel", 10, None).expect("write");
        s.derive_at("trucks.1.total", "fuel * price").expect("derive");
        assert_eq!(s.read("trucks.1.total"), Some(num(20.0)));
        assert_eq!(
            s.explain("trucks.1.total").meta.depends_on,
            ["trucks.1.fuel", "price"]
        );

        s.write("price", 3, None).expect("write");
        assert_eq!(s.read("trucks.1.total"), Some(num(30.0)));
    }

    #[test]
    fn noise_invalidates_derivations_over_the_scope() {
        let mut s = store();
        s.declare_secret("vault", "k").expect("secret");
        s.write("vault.x", 5, None).expect("write");
        s.derive_at("report.total", "vault.x * 2").expect("derive");
        assert_eq!(s.read("report.total"), Some(num(10.0)));

        s.declare_noise("vault", "n").expect("noise");
        assert_eq!(s.read("vault.x"), None);
        assert_eq!(s.read("report.total"), Some(Value::text("vault.x * 2")));
    }

    #[test]
    fn operator_kinds_are_a_closed_set() {
        let mut s = store();
        assert!(matches!(
            s.define_operator("%", "define"),
            Err(MemexError::InvalidOperator(_))
        ));
        assert_eq!(s.operators().kind_of("%"), None);

        s.define_operator("%", "eval").expect("alias");
        assert_eq!(s.operators().kind_of("%"), Some(OperatorKind::Derive));
    }

    #[test]
    fn unevaluable_expression_is_stored_raw() {
        let mut s = store();
        s.derive_at("x.y", "alert('hi')").expect("derive");
        assert_eq!(s.read("x.y"), Some(Value::text("alert('hi')")));

        s.derive_at("x.z", "missing + 1").expect("derive");
        assert_eq!(s.read("x.z"), Some(Value::text("missing + 1")));
    }

    #[test]
    fn root_evaluate_does_not_commit() {
        let mut s = store();
        s.write("a", 4, None).expect("write");
        let out = s.write("", "a * 2", Some("=")).expect("eval");
        assert_eq!(out, CommitResult::Computed(num(8.0)));
        assert_eq!(s.ledger().len(), 1);
    }

    #[test]
    fn iterator_broadcast_derives_every_child() {
        let mut s = store();
        for (id, fuel) in [("1", 10), ("2", 20), ("10", 5)] {
            s.write(&format!("trucks.{}.fuel", id), fuel, None).expect("write");
        }
        s.write("trucks[i].=", Value::List(vec!["double".into(), "trucks[i].fuel * 2".into()]), None)
            .expect("derive");

        assert_eq!(s.read("trucks.1.double"), Some(num(20.0)));
        assert_eq!(s.read("trucks.2.double"), Some(num(40.0)));
        assert_eq!(s.read("trucks.10.double"), Some(num(10.0)));
    }

    #[test]
    fn filter_broadcast_derives_matching_children() {
        let mut s = store();
        s.write("trucks.1.fuel", 10, None).expect("write");
        s.write("trucks.2.fuel", 90, None).expect("write");
        s.write("trucks[fuel > 50].=", Value::List(vec!["full".into(), "true".into()]), None)
            .expect("derive");

        assert_eq!(s.read("trucks.2.full"), Some(Value::Bool(true)));
        assert_eq!(s.read("trucks.1.full"), None);
    }

    #[test]
    fn collect_at_root_and_scope() {
        let mut s = store();
        s.write("a", 1, None).expect("write");
        s.write("b", 2, None).expect("write");
        assert_eq!(
            s.collect(&["a", "b", "c"]),
            Value::List(vec![num(1.0), num(2.0), Value::Null])
        );
        let summed = s.collect_with(&["a", "b"], |values| {
            Value::Number(values.iter().flatten().filter_map(Value::to_finite_number).sum())
        });
        assert_eq!(summed, num(3.0));

        s.collect_at("report", &["a", "b"]).expect("collect");
        assert_eq!(s.read("report"), Some(Value::List(vec![num(1.0), num(2.0)])));
    }

    #[test]
    fn remove_tombstones_subtree_and_unregisters() {
        let mut s = store();
        s.write("a.x", 1, None).expect("write");
        s.write("a.y", 2, None).expect("write");
        s.write("ab", 3, None).expect("write");
        s.derive_at("a.z", "x + y").expect("derive");

        let thought = s.remove("a").expect("remove");
        assert_eq!(thought.value, Value::text(TOMBSTONE_MARKER));
        assert_eq!(s.read("a.x"), None);
        assert_eq!(s.read("ab"), Some(num(3.0)));
        assert!(s.derivations().is_empty());
    }

    #[test]
    fn remove_inside_secret_scope_edits_branch() {
        let mut s = store();
        s.declare_secret("vault", "k").expect("secret");
        s.write("vault.a", 1, None).expect("write");
        s.write("vault.b", 2, None).expect("write");
        s.remove("vault.a").expect("remove");

        assert_eq!(s.read("vault.a"), None);
        assert_eq!(s.read("vault.b"), Some(num(2.0)));
    }

    #[test]
    fn remove_with_relative_target() {
        let mut s = store();
        s.write("a.b.c", 1, None).expect("write");
        s.write("a.-", "b.c", None).expect("remove");
        assert_eq!(s.read("a.b.c"), None);
    }

    #[test]
    fn explain_masks_stealth_inputs() {
        let mut s = store();
        s.declare_secret("hidden", "k").expect("secret");
        s.write("hidden.cost", 7, None).expect("write");
        s.write("sale.price", 10, None).expect("write");
        s.derive_at("sale.margin", "price - hidden.cost").expect("derive");

        let explanation = s.explain("sale.margin");
        assert_eq!(explanation.value, Some(num(3.0)));
        let derivation = explanation.derivation.expect("derivation");
        let hidden = derivation
            .inputs
            .iter()
            .find(|i| i.path == "hidden.cost")
            .expect("hidden input");
        assert!(hidden.masked);
        assert_eq!(hidden.origin, Origin::Stealth);
        assert_eq!(hidden.value, Some(Value::text(MASK_PLACEHOLDER)));
        assert_eq!(explanation.meta.depends_on, ["sale.price", "hidden.cost"]);
    }

    #[test]
    fn explain_masks_inputs_reached_through_a_pointer() {
        let mut s = store();
        s.declare_secret("vault", "k").expect("secret");
        s.write("vault.pin", 1234, None).expect("write");
        s.define_pointer("alias", "vault").expect("pointer");
        s.derive_at("report.double", "alias.pin * 2").expect("derive");
        assert_eq!(s.read("report.double"), Some(num(2468.0)));

        let derivation = s.explain("report.double").derivation.expect("derivation");
        assert_eq!(derivation.inputs.len(), 1);
        let input = &derivation.inputs[0];
        assert_eq!(input.path, "alias.pin");
        assert!(input.masked);
        assert_eq!(input.origin, Origin::Stealth);
        assert_eq!(input.value, Some(Value::text(MASK_PLACEHOLDER)));
    }

    #[test]
    fn explain_without_derivation() {
        let mut s = store();
        s.write("a", 1, None).expect("write");
        let explanation = s.explain("a");
        assert!(explanation.derivation.is_none());
        assert!(explanation.meta.depends_on.is_empty());
    }

    #[test]
    fn inspect_tail() {
        let mut s = store();
        for i in 0..5 {
            s.write("n", i, None).expect("write");
        }
        assert_eq!(s.inspect(Some(2)).ledger.len(), 2);
        assert_eq!(s.inspect(None).ledger.len(), 5);
    }

    #[test]
    fn snapshot_roundtrip_restores_derived_state() {
        let mut s = store();
        s.declare_secret("vault", "k").expect("secret");
        s.write("vault.pin", 1, None).expect("write");
        s.write("a", 2, None).expect("write");
        s.define_operator("%", "remove").expect("operator");

        let snapshot = s.export_snapshot();
        let restored = Store::from_snapshot(snapshot.clone(), ManualClock::new(0));
        assert_eq!(restored.index(), s.index());
        assert_eq!(restored.encrypted_branches(), s.encrypted_branches());
        assert_eq!(restored.read("vault.pin"), Some(num(1.0)));
        assert_eq!(restored.operators().kind_of("%"), Some(OperatorKind::Remove));
        assert_eq!(restored.export_snapshot(), snapshot);
    }

    #[test]
    fn replay_rebuilds_equivalent_index() {
        let mut s = store();
        s.write("a.b", 1, None).expect("write");
        s.define_pointer("p", "a").expect("pointer");
        s.declare_identity("who", "ana").expect("identity");
        s.write("gone", 1, None).expect("write");
        s.remove("gone").expect("remove");
        s.derive_at("a.c", "b + 1").expect("derive");

        let records = s.ledger().thoughts().to_vec();
        let mut replayed = store();
        replayed.replay_ledger(&records).expect("replay");
        assert_eq!(replayed.index(), s.index());
        assert!(replayed.derivations().is_empty());
        replayed.verify_ledger().expect("verify");
    }

    #[test]
    fn tampering_is_detected() {
        let mut s = store();
        s.write("a", 1, None).expect("write");
        s.write("b", 2, None).expect("write");
        let mut snapshot = s.export_snapshot();
        snapshot.ledger[0].value = num(99.0);
        let tampered = Store::from_snapshot(snapshot, ManualClock::new(0));
        assert!(matches!(
            tampered.verify_ledger(),
            Err(MemexError::HashMismatch(0))
        ));
    }
}
