//! # CLI Command Implementations
//!
//! This module contains the actual implementations of CLI commands.
//!
//! Every command opens the configured database, loads the store, runs one
//! operation and, when the operation mutated the store, saves it back.
//! Registered derivations are not part of a snapshot, so they only stay live
//! for the duration of the command that created them.

use crate::config::{Backend, Settings};
use memex_core::formats::MAX_SNAPSHOT_PAYLOAD_SIZE;
use memex_core::primitives::MAGIC_BYTES;
use memex_core::{
    CommitResult, Explanation, Inspection, MemexError, Origin, RedbJournal, SaveMode, Snapshot,
    Store, SystemClock, Thought, Value, snapshot_from_bytes, snapshot_to_bytes,
};
use serde_json::json;
use std::path::{Path, PathBuf};

// =============================================================================
// FILE SIZE LIMITS
// =============================================================================

/// Maximum file size for import and replay.
///
/// Same bound as the snapshot decoder, checked before the file is read.
const MAX_IMPORT_FILE_SIZE: u64 = MAX_SNAPSHOT_PAYLOAD_SIZE as u64;

/// Validate file size before reading.
fn validate_file_size(path: &Path, max_size: u64) -> Result<(), MemexError> {
    let metadata = std::fs::metadata(path)
        .map_err(|e| MemexError::IoError(format!("Cannot read file metadata: {}", e)))?;

    if metadata.len() > max_size {
        return Err(MemexError::DeserializationError(format!(
            "File size {} bytes exceeds maximum allowed {} bytes",
            metadata.len(),
            max_size
        )));
    }
    Ok(())
}

/// Validate an input file path.
///
/// 1. Canonicalizes the path to resolve symlinks and ".."
/// 2. Ensures the path exists
/// 3. Ensures the path is a regular file
fn validate_file_path(path: &Path) -> Result<PathBuf, MemexError> {
    let canonical = path.canonicalize().map_err(|e| {
        MemexError::IoError(format!("Invalid file path '{}': {}", path.display(), e))
    })?;

    if !canonical.is_file() {
        return Err(MemexError::IoError(format!(
            "Path '{}' is not a regular file",
            path.display()
        )));
    }

    Ok(canonical)
}

/// Validate an output path: the parent directory must exist.
fn validate_output_path(path: &Path) -> Result<PathBuf, MemexError> {
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };

    let canonical_parent = parent.canonicalize().map_err(|e| {
        MemexError::IoError(format!(
            "Invalid output directory '{}': {}",
            parent.display(),
            e
        ))
    })?;

    if !canonical_parent.is_dir() {
        return Err(MemexError::IoError(format!(
            "Output directory '{}' is not a valid directory",
            parent.display()
        )));
    }

    let filename = path
        .file_name()
        .ok_or_else(|| MemexError::IoError("Output path has no filename".to_string()))?;

    Ok(canonical_parent.join(filename))
}

/// Read a snapshot file, binary or JSON, after validating it.
pub fn read_snapshot_file(path: &Path) -> Result<Snapshot, MemexError> {
    let validated = validate_file_path(path)?;
    validate_file_size(&validated, MAX_IMPORT_FILE_SIZE)?;

    let data = std::fs::read(&validated)
        .map_err(|e| MemexError::IoError(format!("Read file: {}", e)))?;

    if data.starts_with(MAGIC_BYTES) {
        return snapshot_from_bytes(&data);
    }
    let json: serde_json::Value = serde_json::from_slice(&data).map_err(|e| {
        MemexError::DeserializationError(format!("Neither a binary nor a JSON snapshot: {}", e))
    })?;
    Ok(Snapshot::from_json_value(&json))
}

// =============================================================================
// DATABASE
// =============================================================================

/// An opened database under one of the two backends.
#[derive(Debug)]
pub struct Database {
    path: PathBuf,
    journal: Option<RedbJournal>,
}

impl Database {
    /// Open (creating if needed) the database described by `settings`.
    pub fn open(settings: &Settings) -> Result<Self, MemexError> {
        let journal = match settings.backend {
            Backend::Redb => Some(RedbJournal::open(&settings.database)?),
            Backend::File => None,
        };
        Ok(Self {
            path: settings.database.clone(),
            journal,
        })
    }

    /// Load the stored state into a store on the wall clock.
    pub fn load(&self) -> Result<Store, MemexError> {
        let snapshot = match &self.journal {
            Some(journal) => journal.load()?,
            None if self.path.exists() => {
                validate_file_size(&self.path, MAX_IMPORT_FILE_SIZE)?;
                let data = std::fs::read(&self.path)
                    .map_err(|e| MemexError::IoError(format!("Read db: {}", e)))?;
                snapshot_from_bytes(&data)?
            }
            None => Snapshot::default(),
        };
        Ok(Store::from_snapshot(snapshot, SystemClock))
    }

    /// Persist `store`.
    pub fn save(&mut self, store: &Store) -> Result<(), MemexError> {
        let snapshot = store.export_snapshot();
        match &mut self.journal {
            Some(journal) => {
                let mode = journal.save(&snapshot)?;
                if let SaveMode::Rewritten(_) = mode {
                    journal.compact()?;
                }
                tracing::debug!(path = %self.path.display(), ?mode, "store saved");
            }
            None => {
                let data = snapshot_to_bytes(&snapshot)?;
                std::fs::write(&self.path, &data)
                    .map_err(|e| MemexError::IoError(format!("Write db: {}", e)))?;
                tracing::debug!(path = %self.path.display(), bytes = data.len(), "store saved");
            }
        }
        Ok(())
    }
}

/// Load, mutate, save.
fn with_store<T>(
    settings: &Settings,
    f: impl FnOnce(&mut Store) -> Result<T, MemexError>,
) -> Result<T, MemexError> {
    let mut db = Database::open(settings)?;
    let mut store = db.load()?;
    let result = f(&mut store)?;
    db.save(&store)?;
    Ok(result)
}

/// Load for reading only.
fn load_store(settings: &Settings) -> Result<Store, MemexError> {
    Database::open(settings)?.load()
}

// =============================================================================
// OUTPUT
// =============================================================================

/// A command result, in both renderings.
#[derive(Debug, Clone, PartialEq)]
pub struct Output {
    pub json: serde_json::Value,
    pub text: String,
}

impl Output {
    fn new(json: serde_json::Value, text: impl Into<String>) -> Self {
        Self {
            json,
            text: text.into(),
        }
    }

    /// Print to stdout.
    pub fn print(&self, json_mode: bool) {
        if json_mode {
            println!(
                "{}",
                serde_json::to_string_pretty(&self.json).unwrap_or_default()
            );
        } else {
            println!("{}", self.text);
        }
    }
}

/// Human rendering of a value: text as-is, everything else as JSON.
fn render(value: &Value) -> String {
    match value {
        Value::Text(s) => s.clone(),
        other => other.to_json().to_string(),
    }
}

fn thought_json(thought: &Thought) -> serde_json::Value {
    json!({
        "path": thought.path,
        "operator": thought.operator.map(|op| op.as_str()),
        "expression": thought.expression.to_json(),
        "value": thought.value.to_json(),
        "hash": thought.hash,
        "prev_hash": thought.prev_hash,
        "timestamp": thought.timestamp,
    })
}

fn short_hash(hash: &str) -> &str {
    hash.get(..12).unwrap_or(hash)
}

fn commit_output(result: &CommitResult) -> Output {
    match result {
        CommitResult::Committed(thought) => Output::new(
            json!({ "committed": thought_json(thought) }),
            format!(
                "Committed '{}' ({})",
                thought.path,
                short_hash(&thought.hash)
            ),
        ),
        CommitResult::Computed(value) => {
            Output::new(json!({ "computed": value.to_json() }), render(value))
        }
        CommitResult::Nothing => Output::new(json!({ "committed": null }), "Nothing committed"),
    }
}

fn declared(kind: &str, path: &str, store: &Store) -> Output {
    let hash = store
        .ledger()
        .thoughts()
        .last()
        .map(|t| t.hash.clone())
        .unwrap_or_default();
    Output::new(
        json!({ "declared": kind, "path": path, "hash": hash }),
        format!("Declared {} at '{}'", kind, path),
    )
}

// =============================================================================
// INIT COMMAND
// =============================================================================

/// Initialize a new database.
pub fn cmd_init(settings: &Settings, force: bool) -> Result<Output, MemexError> {
    let path = &settings.database;
    if path.exists() {
        if !force {
            return Err(MemexError::IoError(
                "Database already exists. Use --force to overwrite.".to_string(),
            ));
        }
        std::fs::remove_file(path)
            .map_err(|e| MemexError::IoError(format!("Remove db: {}", e)))?;
    }

    let mut db = Database::open(settings)?;
    db.save(&Store::new())?;
    tracing::info!(path = %path.display(), backend = settings.backend.as_str(), "database initialized");

    Ok(Output::new(
        json!({ "database": path.to_string_lossy(), "backend": settings.backend.as_str() }),
        format!(
            "Initialized new {} database at {:?}",
            settings.backend.as_str(),
            path
        ),
    ))
}

// =============================================================================
// WRITE / READ / REMOVE
// =============================================================================

/// Parse a command-line value: JSON when it parses, text otherwise.
#[must_use]
pub fn parse_value(raw: &str) -> Value {
    serde_json::from_str::<serde_json::Value>(raw)
        .map(|json| Value::from_json(&json))
        .unwrap_or_else(|_| Value::text(raw))
}

pub fn cmd_write(
    settings: &Settings,
    path: &str,
    raw: &str,
    op: Option<&str>,
) -> Result<Output, MemexError> {
    let value = parse_value(raw);
    let result = with_store(settings, |store| store.write(path, value, op))?;
    Ok(commit_output(&result))
}

pub fn cmd_read(settings: &Settings, path: &str) -> Result<Output, MemexError> {
    let store = load_store(settings)?;
    Ok(match store.read(path) {
        Some(value) => Output::new(json!({ "path": path, "value": value.to_json() }), render(&value)),
        None => Output::new(json!({ "path": path, "value": null }), "(not found)"),
    })
}

pub fn cmd_remove(settings: &Settings, path: &str) -> Result<Output, MemexError> {
    let thought = with_store(settings, |store| store.remove(path))?;
    Ok(Output::new(
        json!({ "removed": thought.path, "hash": thought.hash }),
        format!("Removed '{}'", thought.path),
    ))
}

// =============================================================================
// DECLARATIONS
// =============================================================================

pub fn cmd_secret(settings: &Settings, scope: &str, secret: &str) -> Result<Output, MemexError> {
    with_store(settings, |store| {
        store.declare_secret(scope, secret)?;
        Ok(declared("secret", scope, store))
    })
}

pub fn cmd_noise(settings: &Settings, scope: &str, noise: &str) -> Result<Output, MemexError> {
    with_store(settings, |store| {
        store.declare_noise(scope, noise)?;
        Ok(declared("noise", scope, store))
    })
}

pub fn cmd_pointer(settings: &Settings, path: &str, target: &str) -> Result<Output, MemexError> {
    with_store(settings, |store| {
        store.define_pointer(path, target)?;
        Ok(declared("pointer", path, store))
    })
}

pub fn cmd_identity(
    settings: &Settings,
    path: &str,
    username: &str,
) -> Result<Output, MemexError> {
    with_store(settings, |store| {
        store.declare_identity(path, username)?;
        Ok(declared("identity", path, store))
    })
}

/// Bind an operator symbol. Operators travel in the snapshot, not the ledger.
pub fn cmd_operator(settings: &Settings, symbol: &str, kind: &str) -> Result<Output, MemexError> {
    with_store(settings, |store| store.define_operator(symbol, kind))?;
    Ok(Output::new(
        json!({ "operator": symbol, "kind": kind }),
        format!("Operator '{}' bound to {}", symbol, kind),
    ))
}

// =============================================================================
// DERIVE / COLLECT
// =============================================================================

pub fn cmd_derive(settings: &Settings, path: &str, expression: &str) -> Result<Output, MemexError> {
    let result = with_store(settings, |store| store.derive_at(path, expression))?;
    Ok(commit_output(&result))
}

/// Collect `paths`. With `at`, the collected list is committed at that scope.
pub fn cmd_collect(
    settings: &Settings,
    paths: &[String],
    at: Option<&str>,
) -> Result<Output, MemexError> {
    let refs: Vec<&str> = paths.iter().map(String::as_str).collect();
    match at {
        Some(scope) => {
            let result = with_store(settings, |store| store.collect_at(scope, &refs))?;
            Ok(commit_output(&result))
        }
        None => {
            let collected = load_store(settings)?.collect(&refs);
            Ok(Output::new(
                json!({ "collected": collected.to_json() }),
                render(&collected),
            ))
        }
    }
}

// =============================================================================
// DIAGNOSTICS
// =============================================================================

fn explanation_json(explanation: &Explanation) -> serde_json::Value {
    let derivation = explanation.derivation.as_ref().map(|d| {
        json!({
            "expression": d.expression,
            "inputs": d.inputs.iter().map(|input| json!({
                "label": input.label,
                "path": input.path,
                "value": input.value.as_ref().map(Value::to_json),
                "origin": match input.origin {
                    Origin::Public => "public",
                    Origin::Stealth => "stealth",
                },
                "masked": input.masked,
            })).collect::<Vec<_>>(),
        })
    });
    json!({
        "path": explanation.path,
        "value": explanation.value.as_ref().map(Value::to_json),
        "derivation": derivation,
        "meta": {
            "depends_on": explanation.meta.depends_on,
            "last_computed_at": explanation.meta.last_computed_at,
        },
    })
}

pub fn cmd_explain(settings: &Settings, path: &str) -> Result<Output, MemexError> {
    let store = load_store(settings)?;
    let explanation = store.explain(path);

    let mut text = format!(
        "{} = {}",
        explanation.path,
        explanation
            .value
            .as_ref()
            .map(render)
            .unwrap_or_else(|| "(not found)".to_string())
    );
    match &explanation.derivation {
        Some(derivation) => {
            text.push_str(&format!("\n  derived from: {}", derivation.expression));
            for input in &derivation.inputs {
                text.push_str(&format!(
                    "\n    {} -> {} = {}",
                    input.label,
                    input.path,
                    input
                        .value
                        .as_ref()
                        .map(render)
                        .unwrap_or_else(|| "(not found)".to_string())
                ));
            }
        }
        None => text.push_str("\n  (no live derivation)"),
    }

    Ok(Output::new(explanation_json(&explanation), text))
}

fn inspection_json(inspection: &Inspection) -> serde_json::Value {
    json!({
        "ledger": inspection.ledger.iter().map(thought_json).collect::<Vec<_>>(),
        "index": inspection
            .index
            .iter()
            .map(|(k, v)| (k.clone(), v.to_json()))
            .collect::<serde_json::Map<_, _>>(),
        "encrypted_scopes": inspection.encrypted_scopes,
        "secret_scopes": inspection.secret_scopes,
        "noise_scopes": inspection.noise_scopes,
    })
}

pub fn cmd_inspect(settings: &Settings, last: Option<usize>) -> Result<Output, MemexError> {
    let store = load_store(settings)?;
    let inspection = store.inspect(Some(last.unwrap_or(settings.inspect_last)));

    let mut text = String::new();
    text.push_str("Memex Store\n");
    text.push_str("===========\n");
    text.push_str(&format!("Database: {:?}\n", settings.database));
    text.push_str(&format!("Backend:  {}\n", settings.backend.as_str()));
    text.push_str(&format!("Thoughts: {}\n", store.ledger().len()));
    text.push_str(&format!("Indexed:  {}\n", inspection.index.len()));
    text.push_str(&format!(
        "Secret scopes: {}\n",
        inspection.secret_scopes.join(", ")
    ));
    text.push_str(&format!(
        "Noise scopes:  {}\n",
        inspection.noise_scopes.join(", ")
    ));
    text.push_str("\nLedger tail:");
    for thought in &inspection.ledger {
        text.push_str(&format!(
            "\n  {} {:<8} {} = {}",
            short_hash(&thought.hash),
            thought.operator.map(|op| op.as_str()).unwrap_or("set"),
            if thought.path.is_empty() { "(root)" } else { thought.path.as_str() },
            render(&thought.value)
        ));
    }

    Ok(Output::new(inspection_json(&inspection), text))
}

pub fn cmd_verify(settings: &Settings) -> Result<Output, MemexError> {
    let store = load_store(settings)?;
    store.verify_ledger()?;
    let count = store.ledger().len();
    Ok(Output::new(
        json!({ "valid": true, "thoughts": count }),
        format!("Ledger intact: {} thoughts verified", count),
    ))
}

// =============================================================================
// PORTABILITY
// =============================================================================

/// Export a snapshot as `binary` (header + postcard) or `json`.
pub fn cmd_export(settings: &Settings, output: &Path, format: &str) -> Result<Output, MemexError> {
    let validated = validate_output_path(output)?;
    let snapshot = load_store(settings)?.export_snapshot();

    let data = match format {
        "binary" => snapshot_to_bytes(&snapshot)?,
        "json" => serde_json::to_vec_pretty(&snapshot.to_json_value()?)
            .map_err(|e| MemexError::SerializationError(e.to_string()))?,
        other => {
            return Err(MemexError::SerializationError(format!(
                "Unknown export format '{}' (expected 'binary' or 'json')",
                other
            )));
        }
    };
    std::fs::write(&validated, &data)
        .map_err(|e| MemexError::IoError(format!("Write file: {}", e)))?;

    Ok(Output::new(
        json!({ "output": validated.to_string_lossy(), "format": format, "bytes": data.len(), "thoughts": snapshot.ledger.len() }),
        format!(
            "Exported {} thoughts to {:?} ({} bytes)",
            snapshot.ledger.len(),
            validated,
            data.len()
        ),
    ))
}

/// Replace the store's state with a snapshot file.
pub fn cmd_import(settings: &Settings, input: &Path) -> Result<Output, MemexError> {
    let snapshot = read_snapshot_file(input)?;
    let count = with_store(settings, |store| {
        store.import_snapshot(snapshot);
        Ok(store.ledger().len())
    })?;
    Ok(Output::new(
        json!({ "imported": count }),
        format!("Imported {} thoughts", count),
    ))
}

/// Clear the store and re-apply a snapshot file's ledger through the write path.
pub fn cmd_replay(settings: &Settings, input: &Path) -> Result<Output, MemexError> {
    let snapshot = read_snapshot_file(input)?;
    let count = with_store(settings, |store| {
        store.replay_ledger(&snapshot.ledger)?;
        Ok(store.ledger().len())
    })?;
    Ok(Output::new(
        json!({ "replayed": snapshot.ledger.len(), "thoughts": count }),
        format!(
            "Replayed {} records into {} thoughts",
            snapshot.ledger.len(),
            count
        ),
    ))
}
