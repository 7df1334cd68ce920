//! # redb-backed Snapshot Journal
//!
//! Persists a [`Snapshot`] in a redb database:
//! - ACID transactions (a save is one write transaction)
//! - Crash safety (copy-on-write B-trees)
//! - Zero configuration
//!
//! ## Layout
//!
//! | table        | key           | value               |
//! |--------------|---------------|---------------------|
//! | `thoughts`   | sequence u64  | postcard `Thought`  |
//! | `secrets`    | scope key     | secret              |
//! | `noises`     | scope key     | noise               |
//! | `branches`   | scope key     | postcard `Value`    |
//! | `operators`  | symbol        | kind name           |
//!
//! The ledger is append-only, so a save only writes the records the journal
//! has not seen yet, as long as the stored prefix still matches. Anything
//! else (an import, a replay) rewrites the table.

use crate::formats::Snapshot;
use crate::{MemexError, OperatorKind, Thought, Value};
use redb::{Database, ReadableDatabase, ReadableTable, ReadableTableMetadata, TableDefinition};
use std::collections::BTreeMap;
use std::path::Path;
use std::str::FromStr;

const THOUGHTS: TableDefinition<u64, &[u8]> = TableDefinition::new("thoughts");
const SECRETS: TableDefinition<&str, &str> = TableDefinition::new("secrets");
const NOISES: TableDefinition<&str, &str> = TableDefinition::new("noises");
const BRANCHES: TableDefinition<&str, &[u8]> = TableDefinition::new("branches");
const OPERATORS: TableDefinition<&str, &str> = TableDefinition::new("operators");

fn io(e: impl std::fmt::Display) -> MemexError {
    MemexError::IoError(e.to_string())
}

/// How a save reached the disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveMode {
    /// Only this many new ledger records were written.
    Appended(usize),
    /// The ledger table was rewritten with this many records.
    Rewritten(usize),
}

/// A snapshot journal backed by redb.
pub struct RedbJournal {
    db: Database,
}

impl std::fmt::Debug for RedbJournal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedbJournal").finish_non_exhaustive()
    }
}

impl RedbJournal {
    /// Open or create a journal at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, MemexError> {
        let db = Database::create(path.as_ref()).map_err(io)?;

        let write_txn = db.begin_write().map_err(io)?;
        {
            let _ = write_txn.open_table(THOUGHTS).map_err(io)?;
            let _ = write_txn.open_table(SECRETS).map_err(io)?;
            let _ = write_txn.open_table(NOISES).map_err(io)?;
            let _ = write_txn.open_table(BRANCHES).map_err(io)?;
            let _ = write_txn.open_table(OPERATORS).map_err(io)?;
        }
        write_txn.commit().map_err(io)?;

        Ok(Self { db })
    }

    /// Number of ledger records on disk.
    pub fn thought_count(&self) -> Result<usize, MemexError> {
        let read_txn = self.db.begin_read().map_err(io)?;
        let table = read_txn.open_table(THOUGHTS).map_err(io)?;
        Ok(table.len().map_err(io)? as usize)
    }

    /// Write `snapshot` in a single transaction.
    pub fn save(&self, snapshot: &Snapshot) -> Result<SaveMode, MemexError> {
        let write_txn = self.db.begin_write().map_err(io)?;
        let mode = {
            let mut thoughts = write_txn.open_table(THOUGHTS).map_err(io)?;
            let stored = thoughts.len().map_err(io)? as usize;

            let prefix_intact = stored <= snapshot.ledger.len()
                && match thoughts.last().map_err(io)? {
                    None => true,
                    Some((_, bytes)) => {
                        let last: Thought = postcard::from_bytes(bytes.value())
                            .map_err(|e| MemexError::DeserializationError(e.to_string()))?;
                        snapshot
                            .ledger
                            .get(stored.saturating_sub(1))
                            .is_some_and(|t| t.hash == last.hash)
                    }
                };

            let start = if prefix_intact {
                stored
            } else {
                thoughts.retain(|_, _| false).map_err(io)?;
                0
            };
            for (seq, thought) in snapshot.ledger.iter().enumerate().skip(start) {
                let bytes = postcard::to_stdvec(thought)
                    .map_err(|e| MemexError::SerializationError(e.to_string()))?;
                thoughts.insert(seq as u64, bytes.as_slice()).map_err(io)?;
            }

            if prefix_intact {
                SaveMode::Appended(snapshot.ledger.len() - start)
            } else {
                SaveMode::Rewritten(snapshot.ledger.len())
            }
        };
        {
            let mut secrets = write_txn.open_table(SECRETS).map_err(io)?;
            secrets.retain(|_, _| false).map_err(io)?;
            for (scope, secret) in &snapshot.secrets {
                secrets.insert(scope.as_str(), secret.as_str()).map_err(io)?;
            }

            let mut noises = write_txn.open_table(NOISES).map_err(io)?;
            noises.retain(|_, _| false).map_err(io)?;
            for (scope, noise) in &snapshot.noises {
                noises.insert(scope.as_str(), noise.as_str()).map_err(io)?;
            }

            let mut branches = write_txn.open_table(BRANCHES).map_err(io)?;
            branches.retain(|_, _| false).map_err(io)?;
            for (scope, blob) in &snapshot.encrypted_branches {
                let bytes = postcard::to_stdvec(blob)
                    .map_err(|e| MemexError::SerializationError(e.to_string()))?;
                branches.insert(scope.as_str(), bytes.as_slice()).map_err(io)?;
            }

            let mut operators = write_txn.open_table(OPERATORS).map_err(io)?;
            operators.retain(|_, _| false).map_err(io)?;
            for (symbol, kind) in &snapshot.operators {
                operators.insert(symbol.as_str(), kind.as_str()).map_err(io)?;
            }
        }
        write_txn.commit().map_err(io)?;

        tracing::debug!(?mode, "journal saved");
        Ok(mode)
    }

    /// Read the stored snapshot back.
    pub fn load(&self) -> Result<Snapshot, MemexError> {
        let read_txn = self.db.begin_read().map_err(io)?;

        let mut ledger = Vec::new();
        let thoughts = read_txn.open_table(THOUGHTS).map_err(io)?;
        for entry in thoughts.iter().map_err(io)? {
            let (_, bytes) = entry.map_err(io)?;
            let thought: Thought = postcard::from_bytes(bytes.value())
                .map_err(|e| MemexError::DeserializationError(e.to_string()))?;
            ledger.push(thought);
        }

        let secrets = read_string_map(&read_txn, SECRETS)?;
        let noises = read_string_map(&read_txn, NOISES)?;

        let mut operators = BTreeMap::new();
        for (symbol, kind) in read_string_map(&read_txn, OPERATORS)? {
            match OperatorKind::from_str(&kind) {
                Ok(kind) => {
                    operators.insert(symbol, kind);
                }
                Err(_) => {
                    tracing::warn!(symbol = %symbol, kind = %kind, "skipping unknown operator kind");
                }
            }
        }

        let mut encrypted_branches = BTreeMap::new();
        let branches = read_txn.open_table(BRANCHES).map_err(io)?;
        for entry in branches.iter().map_err(io)? {
            let (scope, bytes) = entry.map_err(io)?;
            let blob: Value = postcard::from_bytes(bytes.value())
                .map_err(|e| MemexError::DeserializationError(e.to_string()))?;
            encrypted_branches.insert(scope.value().to_string(), blob);
        }

        Ok(Snapshot {
            ledger,
            secrets,
            noises,
            encrypted_branches,
            operators,
        })
    }

    /// Compact the database file.
    pub fn compact(&mut self) -> Result<(), MemexError> {
        self.db.compact().map_err(io)?;
        Ok(())
    }
}

fn read_string_map(
    read_txn: &redb::ReadTransaction,
    def: TableDefinition<'static, &'static str, &'static str>,
) -> Result<BTreeMap<String, String>, MemexError> {
    let table = read_txn.open_table(def).map_err(io)?;
    let mut out = BTreeMap::new();
    for entry in table.iter().map_err(io)? {
        let (key, value) = entry.map_err(io)?;
        out.insert(key.value().to_string(), value.value().to_string());
    }
    Ok(out)
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Store;
    use crate::clock::ManualClock;
    use tempfile::tempdir;

    fn populated() -> Store {
        let mut store = Store::with_clock(ManualClock::ticking(0, 1));
        store.declare_secret("vault", "k").expect("secret");
        store.write("vault.pin", 7, None).expect("write");
        store.write("a", 1, None).expect("write");
        store.define_operator("%", "remove").expect("operator");
        store
    }

    #[test]
    fn save_and_load_roundtrip() {
        let temp = tempdir().expect("temp dir");
        let journal = RedbJournal::open(temp.path().join("memex.redb")).expect("open");
        let snapshot = populated().export_snapshot();

        assert_eq!(
            journal.save(&snapshot).expect("save"),
            SaveMode::Appended(snapshot.ledger.len())
        );
        assert_eq!(journal.load().expect("load"), snapshot);
    }

    #[test]
    fn second_save_appends_only_new_records() {
        let temp = tempdir().expect("temp dir");
        let journal = RedbJournal::open(temp.path().join("memex.redb")).expect("open");
        let mut store = populated();
        journal.save(&store.export_snapshot()).expect("save");

        store.write("b", 2, None).expect("write");
        assert_eq!(
            journal.save(&store.export_snapshot()).expect("save"),
            SaveMode::Appended(1)
        );
        assert_eq!(journal.thought_count().expect("count"), store.ledger().len());
    }

    #[test]
    fn diverged_ledger_is_rewritten() {
        let temp = tempdir().expect("temp dir");
        let journal = RedbJournal::open(temp.path().join("memex.redb")).expect("open");
        journal.save(&populated().export_snapshot()).expect("save");

        let mut other = Store::with_clock(ManualClock::ticking(500, 1));
        other.write("x", 1, None).expect("write");
        let snapshot = other.export_snapshot();
        assert_eq!(journal.save(&snapshot).expect("save"), SaveMode::Rewritten(1));
        assert_eq!(journal.load().expect("load"), snapshot);
    }

    #[test]
    fn survives_reopen() {
        let temp = tempdir().expect("temp dir");
        let db_path = temp.path().join("memex.redb");
        let snapshot = populated().export_snapshot();
        {
            let journal = RedbJournal::open(&db_path).expect("open");
            journal.save(&snapshot).expect("save");
        }
        let mut journal = RedbJournal::open(&db_path).expect("reopen");
        journal.compact().expect("compact");
        let restored = Store::from_snapshot(journal.load().expect("load"), ManualClock::new(0));
        assert_eq!(restored.read("vault.pin"), Some(Value::from(7)));
    }
}
