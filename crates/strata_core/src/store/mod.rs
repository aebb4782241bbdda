//! Object stores and their indexes.
//!
//! An [`ObjectStore`] is a handle borrowed from a [`Transaction`]. Reads take
//! the store's read lock; writes take its write lock, apply in place and
//! record undo and redo entries with the transaction.

mod data;
mod index;

pub(crate) use data::{StoreData, WriteOutcome};
pub use data::MAX_GENERATED_KEY;
pub(crate) use index::IndexData;
pub use index::Index;

use crate::catalog::{IndexMeta, IndexOptions};
use crate::cursor::{Cursor, Direction};
use crate::error::{CoreError, CoreResult};
use crate::key::{Key, KeyPath};
use crate::key_range::KeyRange;
use crate::transaction::{Transaction, Undo};
use crate::wal::WalOp;
use parking_lot::RwLock;
use std::sync::Arc;
use strata_codec::Value;

pub(crate) use data::{decode_value, encode_value, scan};

/// Handle to an object store, valid for the transaction it came from.
#[derive(Clone)]
pub struct ObjectStore<'t> {
    txn: &'t Transaction<'t>,
    name: String,
    data: Arc<RwLock<StoreData>>,
}

impl<'t> ObjectStore<'t> {
    pub(crate) fn new(txn: &'t Transaction<'t>, name: String, data: Arc<RwLock<StoreData>>) -> Self {
        Self { txn, name, data }
    }

    /// Store name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The transaction this handle belongs to.
    #[must_use]
    pub fn transaction(&self) -> &'t Transaction<'t> {
        self.txn
    }

    /// Runs `f` under the store's read lock while the transaction is active.
    pub(crate) fn with_data<R>(&self, f: impl FnOnce(&StoreData) -> CoreResult<R>) -> CoreResult<R> {
        self.txn.reading(|| {
            let data = self.data.read();
            data.ensure_live()?;
            f(&data)
        })
    }

    /// In-line key path, if any.
    ///
    /// # Errors
    ///
    /// Returns `TransactionInactive` once the transaction has finished.
    pub fn key_path(&self) -> CoreResult<Option<KeyPath>> {
        self.with_data(|data| Ok(data.key_path().cloned()))
    }

    /// Whether the store generates keys.
    ///
    /// # Errors
    ///
    /// Returns `TransactionInactive` once the transaction has finished.
    pub fn auto_increment(&self) -> CoreResult<bool> {
        self.with_data(|data| Ok(data.auto_increment()))
    }

    /// Names of the store's indexes, sorted.
    ///
    /// # Errors
    ///
    /// Returns `TransactionInactive` once the transaction has finished.
    pub fn index_names(&self) -> CoreResult<Vec<String>> {
        self.with_data(|data| Ok(data.index_names()))
    }

    fn write(&self, value: Value, key: Option<Key>, no_overwrite: bool) -> CoreResult<Key> {
        self.txn.writing(|log| {
            let mut data = self.data.write();
            let WriteOutcome {
                key,
                bytes,
                previous,
                previous_counter,
            } = data.put(value, key, no_overwrite)?;
            log.push(
                Undo::Record {
                    store: Arc::clone(&self.data),
                    key: key.clone(),
                    previous,
                    counter: previous_counter,
                },
                WalOp::Put {
                    store: self.name.clone(),
                    key: key.clone(),
                    value: bytes,
                },
            );
            Ok(key)
        })
    }

    /// Stores `value`, replacing any record with the same key, and returns
    /// the effective key.
    ///
    /// `key` must be `None` for stores with a key path. Without a key path
    /// it is required unless the store generates keys.
    ///
    /// # Errors
    ///
    /// - `InvalidState` in a read-only transaction
    /// - `InvalidKey` if no valid key can be determined
    /// - `Constraint` on a unique index collision or generator exhaustion
    /// - `Serialization` if the value cannot be encoded
    pub fn put(&self, value: impl Into<Value>, key: impl Into<Option<Key>>) -> CoreResult<Key> {
        self.write(value.into(), key.into(), false)
    }

    /// Like [`ObjectStore::put`], but fails with `Constraint` instead of
    /// replacing an existing record.
    ///
    /// # Errors
    ///
    /// As for [`ObjectStore::put`], plus `Constraint` if the key exists.
    pub fn add(&self, value: impl Into<Value>, key: impl Into<Option<Key>>) -> CoreResult<Key> {
        self.write(value.into(), key.into(), true)
    }

    /// The first record in `query`.
    ///
    /// # Errors
    ///
    /// Returns `TransactionInactive` once the transaction has finished.
    pub fn get(&self, query: impl Into<KeyRange>) -> CoreResult<Option<Value>> {
        let range = query.into();
        self.with_data(|data| {
            data.get(&range)
                .map(|(_, bytes)| decode_value(bytes))
                .transpose()
        })
    }

    /// The first key in `query`.
    ///
    /// # Errors
    ///
    /// Returns `TransactionInactive` once the transaction has finished.
    pub fn get_key(&self, query: impl Into<KeyRange>) -> CoreResult<Option<Key>> {
        let range = query.into();
        self.with_data(|data| Ok(data.get(&range).map(|(key, _)| key.clone())))
    }

    /// Records in `query` in ascending key order, at most `limit` of them.
    ///
    /// # Errors
    ///
    /// Returns `TransactionInactive` once the transaction has finished.
    pub fn get_all(&self, query: impl Into<KeyRange>, limit: Option<usize>) -> CoreResult<Vec<Value>> {
        let range = query.into();
        self.with_data(|data| {
            let (lower, upper) = range.as_bounds();
            data::scan(data.records(), lower, upper)
                .take(limit.unwrap_or(usize::MAX))
                .map(|(_, bytes)| decode_value(bytes))
                .collect()
        })
    }

    /// Keys in `query` in ascending order, at most `limit` of them.
    ///
    /// # Errors
    ///
    /// Returns `TransactionInactive` once the transaction has finished.
    pub fn get_all_keys(
        &self,
        query: impl Into<KeyRange>,
        limit: Option<usize>,
    ) -> CoreResult<Vec<Key>> {
        let range = query.into();
        self.with_data(|data| {
            let (lower, upper) = range.as_bounds();
            Ok(data::scan(data.records(), lower, upper)
                .take(limit.unwrap_or(usize::MAX))
                .map(|(key, _)| key.clone())
                .collect())
        })
    }

    /// Number of records in `query`.
    ///
    /// # Errors
    ///
    /// Returns `TransactionInactive` once the transaction has finished.
    pub fn count(&self, query: impl Into<KeyRange>) -> CoreResult<usize> {
        let range = query.into();
        self.with_data(|data| Ok(data.count(&range)))
    }

    /// Removes every record in `query`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` in a read-only transaction.
    pub fn delete(&self, query: impl Into<KeyRange>) -> CoreResult<()> {
        let range = query.into();
        self.txn.writing(|log| {
            let removed = self.data.write().delete(&range)?;
            if removed.is_empty() {
                return Ok(());
            }
            let redo: Vec<WalOp> = removed
                .iter()
                .map(|(key, _)| WalOp::Delete {
                    store: self.name.clone(),
                    key: key.clone(),
                })
                .collect();
            log.push_many(
                Undo::Reinsert {
                    store: Arc::clone(&self.data),
                    records: removed,
                },
                redo,
            );
            Ok(())
        })
    }

    /// Removes every record.
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` in a read-only transaction.
    pub fn clear(&self) -> CoreResult<()> {
        self.txn.writing(|log| {
            let records = self.data.write().clear()?;
            log.push(
                Undo::Refill {
                    store: Arc::clone(&self.data),
                    records,
                },
                WalOp::Clear {
                    store: self.name.clone(),
                },
            );
            Ok(())
        })
    }

    /// Handle to the index `name`.
    ///
    /// # Errors
    ///
    /// Returns `IndexNotFound` if the store has no such index.
    pub fn index(&self, name: &str) -> CoreResult<Index<'t>> {
        self.with_data(|data| {
            data.index(name)
                .map(|_| ())
                .ok_or_else(|| CoreError::index_not_found(&self.name, name))
        })?;
        Ok(Index::new(self.clone(), name.to_string()))
    }

    /// Opens a cursor over `query`; `None` when nothing matches.
    ///
    /// # Errors
    ///
    /// Returns `TransactionInactive` once the transaction has finished.
    pub fn open_cursor(
        &self,
        query: impl Into<KeyRange>,
        direction: Direction,
    ) -> CoreResult<Option<Cursor<'t>>> {
        Cursor::open(self.clone(), None, query.into(), direction)
    }

    /// Creates an index and fills it from the existing records.
    ///
    /// # Errors
    ///
    /// - `InvalidState` outside an upgrade transaction
    /// - `Constraint` if the name is taken or existing records violate a
    ///   unique index; nothing is created in that case
    pub fn create_index(
        &self,
        name: &str,
        key_path: impl Into<KeyPath>,
        options: IndexOptions,
    ) -> CoreResult<Index<'t>> {
        let meta = IndexMeta::new(name, key_path.into(), options)?;
        self.txn.upgrading(|log| {
            self.data.write().create_index(meta.clone())?;
            log.push(
                Undo::DiscardIndex {
                    store: Arc::clone(&self.data),
                    name: meta.name.clone(),
                },
                WalOp::CreateIndex {
                    store: self.name.clone(),
                    meta,
                },
            );
            Ok(())
        })?;
        tracing::debug!(store = %self.name, index = name, "index created");
        Ok(Index::new(self.clone(), name.to_string()))
    }

    /// Removes an index.
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` outside an upgrade transaction and
    /// `IndexNotFound` if there is no such index.
    pub fn delete_index(&self, name: &str) -> CoreResult<()> {
        self.txn.upgrading(|log| {
            let removed = self.data.write().delete_index(name)?;
            log.push(
                Undo::RestoreIndex {
                    store: Arc::clone(&self.data),
                    index: removed,
                },
                WalOp::DeleteIndex {
                    store: self.name.clone(),
                    name: name.to_string(),
                },
            );
            Ok(())
        })
    }
}

impl std::fmt::Debug for ObjectStore<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectStore")
            .field("name", &self.name)
            .field("transaction", &self.txn.id())
            .finish_non_exhaustive()
    }
}
