//! # Shared Store
//!
//! A cloneable, thread-safe handle around one [`Store`].
//!
//! Every mutating call holds the write lock for the whole operation, so
//! broadcasts and invalidation cascades are never observed half-done. Reads
//! share the read lock and always see a consistent ledger/index pair.

use crate::formats::Snapshot;
use crate::store::{CommitResult, Explanation, Inspection, Store};
use crate::{MemexError, Thought, Value};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

#[derive(Debug, Clone)]
pub struct SharedStore {
    inner: Arc<RwLock<Store>>,
}

impl SharedStore {
    #[must_use]
    pub fn new(store: Store) -> Self {
        Self {
            inner: Arc::new(RwLock::new(store)),
        }
    }

    fn read_guard(&self) -> Result<RwLockReadGuard<'_, Store>, MemexError> {
        self.inner.read().map_err(|_| MemexError::LockPoisoned)
    }

    fn write_guard(&self) -> Result<RwLockWriteGuard<'_, Store>, MemexError> {
        self.inner.write().map_err(|_| MemexError::LockPoisoned)
    }

    /// Run `f` under the read lock.
    pub fn with_read<T>(&self, f: impl FnOnce(&Store) -> T) -> Result<T, MemexError> {
        Ok(f(&*self.read_guard()?))
    }

    /// Run `f` under the write lock, as one atomic operation.
    pub fn with_write<T>(
        &self,
        f: impl FnOnce(&mut Store) -> Result<T, MemexError>,
    ) -> Result<T, MemexError> {
        f(&mut *self.write_guard()?)
    }

    pub fn write(
        &self,
        path: &str,
        value: impl Into<Value>,
        hint: Option<&str>,
    ) -> Result<CommitResult, MemexError> {
        let value = value.into();
        self.with_write(|store| store.write(path, value, hint))
    }

    pub fn read(&self, path: &str) -> Result<Option<Value>, MemexError> {
        self.with_read(|store| store.read(path))
    }

    pub fn remove(&self, path: &str) -> Result<Thought, MemexError> {
        self.with_write(|store| store.remove(path))
    }

    pub fn declare_secret(&self, scope: &str, secret: &str) -> Result<(), MemexError> {
        self.with_write(|store| store.declare_secret(scope, secret))
    }

    pub fn declare_noise(&self, scope: &str, noise: &str) -> Result<(), MemexError> {
        self.with_write(|store| store.declare_noise(scope, noise))
    }

    pub fn derive_at(&self, path: &str, expression: &str) -> Result<CommitResult, MemexError> {
        self.with_write(|store| store.derive_at(path, expression))
    }

    pub fn explain(&self, path: &str) -> Result<Explanation, MemexError> {
        self.with_read(|store| store.explain(path))
    }

    pub fn inspect(&self, last: Option<usize>) -> Result<Inspection, MemexError> {
        self.with_read(|store| store.inspect(last))
    }

    pub fn export_snapshot(&self) -> Result<Snapshot, MemexError> {
        self.with_read(Store::export_snapshot)
    }

    pub fn import_snapshot(&self, snapshot: Snapshot) -> Result<(), MemexError> {
        self.with_write(|store| {
            store.import_snapshot(snapshot);
            Ok(())
        })
    }
}
