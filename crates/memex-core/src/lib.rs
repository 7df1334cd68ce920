//! # memex-core
//!
//! The embedded Memex engine - THE LOGIC.
//!
//! Memex stores values at dot-separated semantic paths. Every write becomes
//! a hash-chained thought in an append-only ledger; the queryable index is
//! a deterministic last-writer-wins fold of that ledger.
//!
//! ## Layers
//!
//! - `path` / `selector`: addressing, multi-select, ranges, filters, iterators
//! - `ledger` / `materializer`: the source of truth and its projection
//! - `secrets` / `cipher`: fractal secret scopes kept out of the index
//! - `pointer` / `evaluator` / `derivation`: indirection and live formulas
//! - `store` / `shared`: the facade and its lock wrapper
//! - `formats` / `storage`: snapshots in memory, in bytes and on disk
//!
//! ## Architectural Constraints
//!
//! - Deterministic: BTreeMap only, no randomness, LWW ties broken by hash
//! - Closed: expressions run in a fixed arithmetic/logic sandbox
//! - Has NO async, NO network dependencies (pure Rust)
//! - "Not found" is never an error; only malformed declarations are

// =============================================================================
// MODULES
// =============================================================================

pub mod cipher;
pub mod clock;
pub mod derivation;
pub mod evaluator;
pub mod formats;
pub mod ledger;
pub mod materializer;
pub mod operators;
pub mod path;
pub mod pointer;
pub mod primitives;
pub mod secrets;
pub mod selector;
pub mod shared;
pub mod storage;
pub mod store;
pub mod types;

// =============================================================================
// RE-EXPORTS: Core Types (from types module)
// =============================================================================

pub use clock::{Clock, ManualClock, SystemClock};
pub use path::SemanticPath;
pub use types::{MemexError, OperatorKind, Thought, Value};

// =============================================================================
// RE-EXPORTS: Engine
// =============================================================================

pub use derivation::{Derivation, DerivationGraph, Reference};
pub use evaluator::{Resolve, evaluate};
pub use ledger::Ledger;
pub use materializer::Index;
pub use operators::OperatorRegistry;
pub use secrets::ScopeRegistry;
pub use shared::SharedStore;
pub use store::{
    CommitResult, ExplainMeta, ExplainedDerivation, ExplainedInput, Explanation, Inspection,
    Origin, Store,
};

// =============================================================================
// RE-EXPORTS: Formats and Storage
// =============================================================================

pub use formats::{PersistenceHeader, Snapshot, snapshot_from_bytes, snapshot_to_bytes};
pub use storage::{RedbJournal, SaveMode};
