//! Secondary indexes.

use crate::catalog::IndexMeta;
use crate::cursor::{Cursor, Direction};
use crate::error::{CoreError, CoreResult};
use crate::key::{Key, KeyPath};
use crate::key_range::KeyRange;
use crate::store::data::{decode_value, scan, StoreData};
use crate::store::ObjectStore;
use std::collections::{BTreeMap, BTreeSet};
use strata_codec::Value;

/// Entries of one index: index key to the primary keys carrying it.
///
/// Primary keys under one index key are kept ascending, which gives
/// duplicate index keys their secondary order.
#[derive(Debug, Clone)]
pub(crate) struct IndexData {
    meta: IndexMeta,
    entries: BTreeMap<Key, BTreeSet<Key>>,
}

impl IndexData {
    pub(crate) fn new(meta: IndexMeta) -> Self {
        Self {
            meta,
            entries: BTreeMap::new(),
        }
    }

    pub(crate) fn meta(&self) -> &IndexMeta {
        &self.meta
    }

    pub(crate) fn entries(&self) -> &BTreeMap<Key, BTreeSet<Key>> {
        &self.entries
    }

    /// Index keys a record value produces. Values without a valid key at
    /// the path produce none and are simply not indexed.
    pub(crate) fn keys_for(&self, value: &Value) -> Vec<Key> {
        match self.meta.key_path.evaluate(value) {
            None => Vec::new(),
            Some(Value::Array(items)) if self.meta.multi_entry => items
                .iter()
                .filter_map(Key::from_value)
                .collect::<BTreeSet<_>>()
                .into_iter()
                .collect(),
            Some(found) => Key::from_value(&found).into_iter().collect(),
        }
    }

    /// For a unique index, the first of `keys` already held by a record
    /// other than `primary`.
    pub(crate) fn conflict<'k>(&self, keys: &'k [Key], primary: &Key) -> Option<&'k Key> {
        if !self.meta.unique {
            return None;
        }
        keys.iter().find(|key| {
            self.entries
                .get(*key)
                .is_some_and(|holders| holders.iter().any(|p| p != primary))
        })
    }

    pub(crate) fn insert(&mut self, keys: Vec<Key>, primary: &Key) {
        for key in keys {
            self.entries.entry(key).or_default().insert(primary.clone());
        }
    }

    pub(crate) fn remove(&mut self, keys: &[Key], primary: &Key) {
        for key in keys {
            if let Some(holders) = self.entries.get_mut(key) {
                holders.remove(primary);
                if holders.is_empty() {
                    self.entries.remove(key);
                }
            }
        }
    }

    pub(crate) fn clear(&mut self) {
        self.entries.clear();
    }

    /// `(index key, primary key)` pairs within `range`, in index order.
    pub(crate) fn iter<'a>(
        &'a self,
        range: &'a KeyRange,
    ) -> impl Iterator<Item = (&'a Key, &'a Key)> + 'a {
        let (lower, upper) = range.as_bounds();
        scan(&self.entries, lower, upper)
            .flat_map(|(key, holders)| holders.iter().map(move |primary| (key, primary)))
    }

    pub(crate) fn count(&self, range: &KeyRange) -> usize {
        let (lower, upper) = range.as_bounds();
        scan(&self.entries, lower, upper)
            .map(|(_, holders)| holders.len())
            .sum()
    }
}

/// Handle to an index, valid for the transaction it was obtained from.
#[derive(Clone)]
pub struct Index<'t> {
    store: ObjectStore<'t>,
    name: String,
}

impl<'t> Index<'t> {
    pub(crate) fn new(store: ObjectStore<'t>, name: String) -> Self {
        Self { store, name }
    }

    /// Index name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The store this index belongs to.
    #[must_use]
    pub fn object_store(&self) -> &ObjectStore<'t> {
        &self.store
    }

    /// Runs `f` against the live index under a read lock.
    pub(crate) fn with_index<R>(
        &self,
        f: impl FnOnce(&StoreData, &IndexData) -> CoreResult<R>,
    ) -> CoreResult<R> {
        self.store.with_data(|data| {
            let index = data.index(&self.name).ok_or_else(|| {
                CoreError::invalid_state(format!(
                    "index {:?} of store {:?} has been deleted",
                    self.name,
                    data.name()
                ))
            })?;
            f(data, index)
        })
    }

    fn meta(&self) -> CoreResult<IndexMeta> {
        self.with_index(|_, index| Ok(index.meta().clone()))
    }

    /// Path of the indexed field.
    ///
    /// # Errors
    ///
    /// Returns `TransactionInactive` once the transaction has finished.
    pub fn key_path(&self) -> CoreResult<KeyPath> {
        Ok(self.meta()?.key_path)
    }

    /// Whether the index enforces uniqueness.
    ///
    /// # Errors
    ///
    /// Returns `TransactionInactive` once the transaction has finished.
    pub fn unique(&self) -> CoreResult<bool> {
        Ok(self.meta()?.unique)
    }

    /// Whether array values are indexed element by element.
    ///
    /// # Errors
    ///
    /// Returns `TransactionInactive` once the transaction has finished.
    pub fn multi_entry(&self) -> CoreResult<bool> {
        Ok(self.meta()?.multi_entry)
    }

    /// The record with the lowest index key in `query` (lowest primary key
    /// among duplicates).
    ///
    /// # Errors
    ///
    /// Returns `TransactionInactive` once the transaction has finished.
    pub fn get(&self, query: impl Into<KeyRange>) -> CoreResult<Option<Value>> {
        let range = query.into();
        self.with_index(|data, index| {
            index
                .iter(&range)
                .next()
                .and_then(|(_, primary)| data.records().get(primary))
                .map(|bytes| decode_value(bytes))
                .transpose()
        })
    }

    /// The primary key of the record [`Index::get`] would return.
    ///
    /// # Errors
    ///
    /// Returns `TransactionInactive` once the transaction has finished.
    pub fn get_key(&self, query: impl Into<KeyRange>) -> CoreResult<Option<Key>> {
        let range = query.into();
        self.with_index(|_, index| Ok(index.iter(&range).next().map(|(_, p)| p.clone())))
    }

    /// Records in `query`, in index order, at most `limit` of them.
    ///
    /// # Errors
    ///
    /// Returns `TransactionInactive` once the transaction has finished.
    pub fn get_all(&self, query: impl Into<KeyRange>, limit: Option<usize>) -> CoreResult<Vec<Value>> {
        let range = query.into();
        self.with_index(|data, index| {
            index
                .iter(&range)
                .take(limit.unwrap_or(usize::MAX))
                .filter_map(|(_, primary)| data.records().get(primary))
                .map(|bytes| decode_value(bytes))
                .collect()
        })
    }

    /// Primary keys of the records in `query`, in index order.
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
        self.with_index(|_, index| {
            Ok(index
                .iter(&range)
                .take(limit.unwrap_or(usize::MAX))
                .map(|(_, primary)| primary.clone())
                .collect())
        })
    }

    /// Number of index entries in `query`.
    ///
    /// # Errors
    ///
    /// Returns `TransactionInactive` once the transaction has finished.
    pub fn count(&self, query: impl Into<KeyRange>) -> CoreResult<usize> {
        let range = query.into();
        self.with_index(|_, index| Ok(index.count(&range)))
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
        Cursor::open(
            self.store.clone(),
            Some(self.name.clone()),
            query.into(),
            direction,
        )
    }
}

impl std::fmt::Debug for Index<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Index")
            .field("store", &self.store.name())
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}
