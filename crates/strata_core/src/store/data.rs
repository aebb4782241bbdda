//! In-memory contents of one object store.
//!
//! `StoreData` owns the ordered record map, the key generator and every
//! index's entries. All mutations validate first and mutate second, so a
//! failed call leaves the store untouched.

use crate::catalog::{IndexMeta, StoreMeta};
use crate::error::{CoreError, CoreResult};
use crate::key::{Key, KeyPath};
use crate::key_range::KeyRange;
use crate::store::index::IndexData;
use std::collections::BTreeMap;
use std::ops::Bound;
use strata_codec::{from_cbor, to_canonical_cbor, Value};

/// Largest key the generator hands out (2^53).
pub const MAX_GENERATED_KEY: i64 = 1 << 53;

/// Encodes a record value to its stored form.
pub(crate) fn encode_value(value: &Value) -> CoreResult<Vec<u8>> {
    to_canonical_cbor(value).map_err(|e| CoreError::serialization(e.to_string()))
}

/// Decodes a stored record.
pub(crate) fn decode_value(bytes: &[u8]) -> CoreResult<Value> {
    Ok(from_cbor(bytes)?)
}

/// Whether `(lower, upper)` describes a range `BTreeMap::range` accepts.
fn bounds_ordered(lower: Bound<&Key>, upper: Bound<&Key>) -> bool {
    match (lower, upper) {
        (
            Bound::Included(l) | Bound::Excluded(l),
            Bound::Included(u) | Bound::Excluded(u),
        ) => l < u || (l == u && !matches!((lower, upper), (Bound::Excluded(_), Bound::Excluded(_)))),
        _ => true,
    }
}

/// Iterates `map` within the given bounds; crossing bounds yield nothing.
pub(crate) fn scan<'m, V>(
    map: &'m BTreeMap<Key, V>,
    lower: Bound<&Key>,
    upper: Bound<&Key>,
) -> impl DoubleEndedIterator<Item = (&'m Key, &'m V)> {
    bounds_ordered(lower, upper)
        .then(|| map.range::<Key, _>((lower, upper)))
        .into_iter()
        .flatten()
}

/// What a write replaced, for rollback.
#[derive(Debug)]
pub(crate) struct WriteOutcome {
    pub(crate) key: Key,
    pub(crate) bytes: Vec<u8>,
    pub(crate) previous: Option<Vec<u8>>,
    pub(crate) previous_counter: i64,
}

/// Records, generator and indexes of one store.
#[derive(Debug, Clone)]
pub(crate) struct StoreData {
    name: String,
    key_path: Option<KeyPath>,
    auto_increment: bool,
    /// Next generated key.
    counter: i64,
    records: BTreeMap<Key, Vec<u8>>,
    indexes: BTreeMap<String, IndexData>,
    /// Set once the store is removed; handles still pointing here fail.
    deleted: bool,
}

impl StoreData {
    /// An empty store. Index definitions in `meta` start out empty too.
    pub(crate) fn new(meta: StoreMeta) -> Self {
        let indexes = meta
            .indexes
            .into_values()
            .map(|index| (index.name.clone(), IndexData::new(index)))
            .collect();
        Self {
            name: meta.name,
            key_path: meta.key_path,
            auto_increment: meta.auto_increment,
            counter: 1,
            records: BTreeMap::new(),
            indexes,
            deleted: false,
        }
    }

    /// Rebuilds a store from persisted records, recomputing index entries.
    pub(crate) fn load(
        meta: StoreMeta,
        counter: i64,
        records: BTreeMap<Key, Vec<u8>>,
    ) -> CoreResult<Self> {
        let mut store = Self::new(meta);
        store.counter = counter;
        store.replace_records(records)?;
        Ok(store)
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn key_path(&self) -> Option<&KeyPath> {
        self.key_path.as_ref()
    }

    pub(crate) fn auto_increment(&self) -> bool {
        self.auto_increment
    }

    pub(crate) fn counter(&self) -> i64 {
        self.counter
    }

    pub(crate) fn set_counter(&mut self, counter: i64) {
        self.counter = counter;
    }

    pub(crate) fn records(&self) -> &BTreeMap<Key, Vec<u8>> {
        &self.records
    }

    pub(crate) fn mark_deleted(&mut self) {
        self.deleted = true;
    }

    /// Undoes [`StoreData::mark_deleted`] when an upgrade rolls back.
    pub(crate) fn revive(&mut self) {
        self.deleted = false;
    }

    /// Current definition, indexes included.
    pub(crate) fn meta(&self) -> StoreMeta {
        StoreMeta {
            name: self.name.clone(),
            key_path: self.key_path.clone(),
            auto_increment: self.auto_increment,
            indexes: self
                .indexes
                .iter()
                .map(|(name, index)| (name.clone(), index.meta().clone()))
                .collect(),
        }
    }

    pub(crate) fn index(&self, name: &str) -> Option<&IndexData> {
        self.indexes.get(name)
    }

    pub(crate) fn index_names(&self) -> Vec<String> {
        self.indexes.keys().cloned().collect()
    }

    pub(crate) fn ensure_live(&self) -> CoreResult<()> {
        if self.deleted {
            Err(CoreError::invalid_state(format!(
                "object store {:?} has been deleted",
                self.name
            )))
        } else {
            Ok(())
        }
    }

    fn next_generated(&self) -> CoreResult<Key> {
        if self.counter > MAX_GENERATED_KEY {
            return Err(CoreError::constraint(format!(
                "key generator of store {:?} is exhausted",
                self.name
            )));
        }
        Ok(Key::Number(self.counter))
    }

    /// Determines the primary key for `value`, generating and injecting one
    /// when the store allows it. Returns the key and whether it was generated.
    fn resolve_key(&self, value: &mut Value, explicit: Option<Key>) -> CoreResult<(Key, bool)> {
        match (&self.key_path, explicit) {
            (Some(path), Some(_)) => Err(CoreError::invalid_key(format!(
                "store {:?} takes keys from {path:?}; an explicit key is not allowed",
                self.name
            ))),
            (Some(path), None) => match path.evaluate(value) {
                Some(found) => Key::from_value(&found).map(|k| (k, false)).ok_or_else(|| {
                    CoreError::invalid_key(format!(
                        "value at key path {path:?} is not a valid key"
                    ))
                }),
                None if self.auto_increment => {
                    let key = self.next_generated()?;
                    path.inject(value, &key)?;
                    Ok((key, true))
                }
                None => Err(CoreError::invalid_key(format!(
                    "value has nothing at key path {path:?}"
                ))),
            },
            (None, Some(key)) => Ok((key, false)),
            (None, None) if self.auto_increment => Ok((self.next_generated()?, true)),
            (None, None) => Err(CoreError::invalid_key(format!(
                "store {:?} has neither a key path nor a key generator; a key is required",
                self.name
            ))),
        }
    }

    /// Moves the generator past `key`.
    fn advance_counter(&mut self, key: &Key, generated: bool) {
        if generated {
            self.counter += 1;
        } else if self.auto_increment {
            if let Key::Number(n) = key {
                if *n >= self.counter {
                    self.counter = n.saturating_add(1).min(MAX_GENERATED_KEY + 1);
                }
            }
        }
    }

    fn index_keys(&self, value: &Value) -> Vec<(String, Vec<Key>)> {
        self.indexes
            .iter()
            .map(|(name, index)| (name.clone(), index.keys_for(value)))
            .collect()
    }

    fn check_unique(&self, entries: &[(String, Vec<Key>)], primary: &Key) -> CoreResult<()> {
        for (name, keys) in entries {
            if let Some(index) = self.indexes.get(name) {
                if let Some(taken) = index.conflict(keys, primary) {
                    return Err(CoreError::constraint(format!(
                        "index {name:?} of store {:?} already has key {taken}",
                        self.name
                    )));
                }
            }
        }
        Ok(())
    }

    fn stored_index_keys(&self, key: &Key) -> CoreResult<Option<Vec<(String, Vec<Key>)>>> {
        self.records
            .get(key)
            .map(|bytes| decode_value(bytes).map(|value| self.index_keys(&value)))
            .transpose()
    }

    fn unindex(&mut self, primary: &Key, entries: Vec<(String, Vec<Key>)>) {
        for (name, keys) in entries {
            if let Some(index) = self.indexes.get_mut(&name) {
                index.remove(&keys, primary);
            }
        }
    }

    fn reindex(&mut self, primary: &Key, entries: Vec<(String, Vec<Key>)>) {
        for (name, keys) in entries {
            if let Some(index) = self.indexes.get_mut(&name) {
                index.insert(keys, primary);
            }
        }
    }

    /// Stores `value`, overwriting an existing record unless `no_overwrite`.
    pub(crate) fn put(
        &mut self,
        mut value: Value,
        key: Option<Key>,
        no_overwrite: bool,
    ) -> CoreResult<WriteOutcome> {
        self.ensure_live()?;
        let (key, generated) = self.resolve_key(&mut value, key)?;
        let bytes = encode_value(&value)?;

        let previous = self.records.get(&key).cloned();
        if previous.is_some() && no_overwrite {
            return Err(CoreError::constraint(format!(
                "key {key} already exists in store {:?}",
                self.name
            )));
        }

        let new_entries = self.index_keys(&value);
        self.check_unique(&new_entries, &key)?;
        let old_entries = self.stored_index_keys(&key)?;

        let previous_counter = self.counter;
        if let Some(old) = old_entries {
            self.unindex(&key, old);
        }
        self.reindex(&key, new_entries);
        self.records.insert(key.clone(), bytes.clone());
        self.advance_counter(&key, generated);

        Ok(WriteOutcome {
            key,
            bytes,
            previous,
            previous_counter,
        })
    }

    /// Sets `key` to `bytes` (or removes it), keeping indexes in step.
    ///
    /// Used for rollback and WAL replay, where uniqueness already held.
    pub(crate) fn restore_record(&mut self, key: &Key, bytes: Option<Vec<u8>>) -> CoreResult<()> {
        let new_entries = bytes
            .as_deref()
            .map(|b| decode_value(b).map(|value| self.index_keys(&value)))
            .transpose()?;
        if let Some(old) = self.stored_index_keys(key)? {
            self.unindex(key, old);
        }
        match (bytes, new_entries) {
            (Some(bytes), Some(entries)) => {
                self.reindex(key, entries);
                self.records.insert(key.clone(), bytes);
            }
            _ => {
                self.records.remove(key);
            }
        }
        Ok(())
    }

    /// WAL replay of a put: restores the record and moves the generator
    /// past a numeric key.
    pub(crate) fn replay_put(&mut self, key: Key, bytes: Vec<u8>) -> CoreResult<()> {
        self.restore_record(&key, Some(bytes))?;
        self.advance_counter(&key, false);
        Ok(())
    }

    /// Removes every record in `range`, returning what was removed.
    pub(crate) fn delete(&mut self, range: &KeyRange) -> CoreResult<Vec<(Key, Vec<u8>)>> {
        self.ensure_live()?;
        let (lower, upper) = range.as_bounds();
        let doomed: Vec<Key> = scan(&self.records, lower, upper)
            .map(|(k, _)| k.clone())
            .collect();

        let mut entries = Vec::with_capacity(doomed.len());
        for key in &doomed {
            entries.push(self.stored_index_keys(key)?.unwrap_or_default());
        }

        let mut removed = Vec::with_capacity(doomed.len());
        for (key, old) in doomed.into_iter().zip(entries) {
            self.unindex(&key, old);
            if let Some(bytes) = self.records.remove(&key) {
                removed.push((key, bytes));
            }
        }
        Ok(removed)
    }

    /// Removes every record, returning them.
    pub(crate) fn clear(&mut self) -> CoreResult<BTreeMap<Key, Vec<u8>>> {
        self.ensure_live()?;
        for index in self.indexes.values_mut() {
            index.clear();
        }
        Ok(std::mem::take(&mut self.records))
    }

    /// Replaces all records and rebuilds every index.
    pub(crate) fn replace_records(&mut self, records: BTreeMap<Key, Vec<u8>>) -> CoreResult<()> {
        let mut rebuilt: BTreeMap<String, IndexData> = self
            .indexes
            .values()
            .map(|index| (index.meta().name.clone(), IndexData::new(index.meta().clone())))
            .collect();
        for (key, bytes) in &records {
            let value = decode_value(bytes)?;
            for index in rebuilt.values_mut() {
                let keys = index.keys_for(&value);
                index.insert(keys, key);
            }
        }
        self.indexes = rebuilt;
        self.records = records;
        Ok(())
    }

    /// Adds an index and fills it from existing records.
    ///
    /// Fails without side effects if the name is taken or existing records
    /// violate a uniqueness constraint.
    pub(crate) fn create_index(&mut self, meta: IndexMeta) -> CoreResult<()> {
        self.ensure_live()?;
        if self.indexes.contains_key(&meta.name) {
            return Err(CoreError::constraint(format!(
                "index {:?} already exists on store {:?}",
                meta.name, self.name
            )));
        }

        let mut index = IndexData::new(meta);
        for (key, bytes) in &self.records {
            let keys = index.keys_for(&decode_value(bytes)?);
            if let Some(taken) = index.conflict(&keys, key) {
                return Err(CoreError::constraint(format!(
                    "existing records of store {:?} repeat key {taken} in unique index {:?}",
                    self.name,
                    index.meta().name
                )));
            }
            index.insert(keys, key);
        }

        self.indexes.insert(index.meta().name.clone(), index);
        Ok(())
    }

    /// Removes an index and returns its entries.
    pub(crate) fn delete_index(&mut self, name: &str) -> CoreResult<IndexData> {
        self.ensure_live()?;
        self.indexes
            .remove(name)
            .ok_or_else(|| CoreError::index_not_found(&self.name, name))
    }

    /// Puts back an index removed earlier in the same transaction.
    pub(crate) fn restore_index(&mut self, index: IndexData) {
        self.indexes.insert(index.meta().name.clone(), index);
    }

    /// Drops an index created earlier in the same transaction.
    pub(crate) fn discard_index(&mut self, name: &str) {
        self.indexes.remove(name);
    }

    pub(crate) fn get(&self, range: &KeyRange) -> Option<(&Key, &Vec<u8>)> {
        let (lower, upper) = range.as_bounds();
        scan(&self.records, lower, upper).next()
    }

    pub(crate) fn count(&self, range: &KeyRange) -> usize {
        let (lower, upper) = range.as_bounds();
        scan(&self.records, lower, upper).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{IndexOptions, StoreOptions};

    fn book(isbn: i64, title: &str, price: i64) -> Value {
        Value::object([
            ("isbn", Value::Integer(isbn)),
            ("title", Value::from(title)),
            ("price", Value::Integer(price)),
        ])
    }

    fn books() -> StoreData {
        let meta = StoreMeta::new("books", StoreOptions::new().key_path("isbn")).unwrap();
        StoreData::new(meta)
    }

    fn price_index(unique: bool) -> IndexMeta {
        IndexMeta::new("by_price", "price".into(), IndexOptions::new().unique(unique)).unwrap()
    }

    #[test]
    fn put_then_get() {
        let mut store = books();
        let outcome = store.put(book(1, "Dune", 10), None, false).unwrap();
        assert_eq!(outcome.key, Key::Number(1));
        assert!(outcome.previous.is_none());

        let (key, bytes) = store.get(&KeyRange::only(1)).unwrap();
        assert_eq!(key, &Key::Number(1));
        assert_eq!(decode_value(bytes).unwrap(), book(1, "Dune", 10));
    }

    #[test]
    fn add_refuses_existing_key() {
        let mut store = books();
        store.put(book(1, "Dune", 10), None, true).unwrap();
        let err = store.put(book(1, "Emma", 12), None, true).unwrap_err();
        assert!(matches!(err, CoreError::Constraint { .. }));
        assert_eq!(store.count(&KeyRange::all()), 1);
    }

    #[test]
    fn explicit_key_on_inline_store_is_invalid() {
        let mut store = books();
        let err = store
            .put(book(1, "Dune", 10), Some(Key::Number(1)), false)
            .unwrap_err();
        assert!(matches!(err, CoreError::InvalidKey { .. }));
    }

    #[test]
    fn out_of_line_store_requires_key() {
        let mut store = StoreData::new(StoreMeta::new("kv", StoreOptions::new()).unwrap());
        assert!(matches!(
            store.put(Value::from("v"), None, false),
            Err(CoreError::InvalidKey { .. })
        ));
        store.put(Value::from("v"), Some(Key::from("k")), false).unwrap();
        assert_eq!(store.count(&KeyRange::all()), 1);
    }

    #[test]
    fn generator_injects_and_tracks_explicit_keys() {
        let meta = StoreMeta::new(
            "notes",
            StoreOptions::new().key_path("id").auto_increment(true),
        )
        .unwrap();
        let mut store = StoreData::new(meta);

        let first = store.put(Value::object([("text", Value::from("a"))]), None, false).unwrap();
        assert_eq!(first.key, Key::Number(1));
        let stored = decode_value(&first.bytes).unwrap();
        assert_eq!(stored.get("id"), Some(&Value::Integer(1)));

        store
            .put(Value::object([("id", Value::Integer(10))]), None, false)
            .unwrap();
        let next = store.put(Value::Map(Vec::new()), None, false).unwrap();
        assert_eq!(next.key, Key::Number(11));

        // string keys leave the generator alone
        store
            .put(Value::object([("id", Value::from("x"))]), None, false)
            .unwrap();
        assert_eq!(store.counter(), 12);
    }

    #[test]
    fn generator_exhaustion_is_constraint() {
        let mut store = StoreData::new(
            StoreMeta::new("s", StoreOptions::new().auto_increment(true)).unwrap(),
        );
        store
            .put(Value::Null, Some(Key::Number(MAX_GENERATED_KEY)), false)
            .unwrap();
        assert!(matches!(
            store.put(Value::Null, None, false),
            Err(CoreError::Constraint { .. })
        ));
    }

    #[test]
    fn unique_index_rejects_duplicates_atomically() {
        let mut store = books();
        store.create_index(price_index(true)).unwrap();
        store.put(book(1, "Dune", 10), None, false).unwrap();

        let err = store.put(book(2, "Emma", 10), None, false).unwrap_err();
        assert!(matches!(err, CoreError::Constraint { .. }));
        assert_eq!(store.count(&KeyRange::all()), 1);
        assert_eq!(store.index("by_price").unwrap().count(&KeyRange::all()), 1);

        // same record may keep its own index key
        store.put(book(1, "Dune (2nd ed.)", 10), None, false).unwrap();
    }

    #[test]
    fn overwrite_moves_index_entries() {
        let mut store = books();
        store.create_index(price_index(false)).unwrap();
        store.put(book(1, "Dune", 10), None, false).unwrap();
        store.put(book(1, "Dune", 20), None, false).unwrap();

        let index = store.index("by_price").unwrap();
        assert_eq!(index.count(&KeyRange::only(10)), 0);
        assert_eq!(index.count(&KeyRange::only(20)), 1);
    }

    #[test]
    fn create_unique_index_over_duplicates_fails() {
        let mut store = books();
        store.put(book(1, "Dune", 10), None, false).unwrap();
        store.put(book(2, "Emma", 10), None, false).unwrap();
        assert!(matches!(
            store.create_index(price_index(true)),
            Err(CoreError::Constraint { .. })
        ));
        assert!(store.index("by_price").is_none());
        store.create_index(price_index(false)).unwrap();
        assert_eq!(store.index("by_price").unwrap().count(&KeyRange::only(10)), 2);
    }

    #[test]
    fn delete_range_and_restore() {
        let mut store = books();
        store.create_index(price_index(false)).unwrap();
        for i in 1..=5 {
            store.put(book(i, "t", i * 10), None, false).unwrap();
        }

        let removed = store.delete(&KeyRange::bound(2, 4, false, true).unwrap()).unwrap();
        assert_eq!(removed.len(), 2);
        assert_eq!(store.count(&KeyRange::all()), 3);
        assert_eq!(store.index("by_price").unwrap().count(&KeyRange::all()), 3);

        for (key, bytes) in removed {
            store.restore_record(&key, Some(bytes)).unwrap();
        }
        assert_eq!(store.count(&KeyRange::all()), 5);
        assert_eq!(store.index("by_price").unwrap().count(&KeyRange::all()), 5);
    }

    #[test]
    fn clear_then_replace_rebuilds_indexes() {
        let mut store = books();
        store.create_index(price_index(true)).unwrap();
        store.put(book(1, "Dune", 10), None, false).unwrap();
        store.put(book(2, "Emma", 20), None, false).unwrap();

        let saved = store.clear().unwrap();
        assert_eq!(store.count(&KeyRange::all()), 0);
        assert_eq!(store.index("by_price").unwrap().count(&KeyRange::all()), 0);

        store.replace_records(saved).unwrap();
        assert_eq!(store.index("by_price").unwrap().count(&KeyRange::all()), 2);
    }

    #[test]
    fn deleted_store_rejects_writes() {
        let mut store = books();
        store.mark_deleted();
        assert!(matches!(
            store.put(book(1, "Dune", 10), None, false),
            Err(CoreError::InvalidState { .. })
        ));
    }

    #[test]
    fn crossing_bounds_scan_nothing() {
        let mut map = BTreeMap::new();
        map.insert(Key::Number(1), ());
        map.insert(Key::Number(5), ());

        let five = Key::Number(5);
        let one = Key::Number(1);
        assert_eq!(scan(&map, Bound::Included(&five), Bound::Included(&one)).count(), 0);
        assert_eq!(scan(&map, Bound::Excluded(&five), Bound::Excluded(&five)).count(), 0);
        assert_eq!(scan(&map, Bound::Included(&five), Bound::Included(&five)).count(), 1);
        assert_eq!(scan(&map, Bound::Unbounded, Bound::Excluded(&five)).count(), 1);
    }
}
