//! Model-based integration helpers.
//!
//! [`ModelHarness`] applies writes to a database and to a `BTreeMap` model
//! side by side, then checks that every read path agrees with the model.

use crate::fixtures::TestFactory;
use crate::generators::StoreOperation;
use std::collections::BTreeMap;
use strata_codec::Value;
use strata_core::{
    Connection, CoreResult, Direction, ErrorKind, Key, KeyRange, StoreOptions, Transaction,
    TransactionMode,
};

/// Database the harness opens.
pub const MODEL_DB: &str = "model";
/// Out-of-line keyed store the harness writes to.
pub const ITEMS: &str = "items";

fn items_upgrade(txn: &Transaction<'_>, old: u64, _new: u64) -> CoreResult<()> {
    if old < 1 {
        txn.create_store(ITEMS, StoreOptions::new())?;
    }
    Ok(())
}

/// A harness that tracks expected store contents for verification.
pub struct ModelHarness {
    /// Connection to the model database.
    pub conn: Connection,
    /// The factory the connection came from.
    pub fixture: TestFactory,
    model: BTreeMap<Key, Value>,
}

impl ModelHarness {
    /// Creates a harness over an in-memory factory.
    pub fn new() -> Self {
        Self::over(TestFactory::memory())
    }

    /// Creates a harness over a temporary directory.
    pub fn in_dir() -> Self {
        Self::over(TestFactory::dir())
    }

    /// Creates a harness over `fixture`.
    pub fn over(fixture: TestFactory) -> Self {
        let conn = fixture
            .open(MODEL_DB, 1, items_upgrade)
            .expect("Failed to open model database");
        Self {
            conn,
            fixture,
            model: BTreeMap::new(),
        }
    }

    /// Restarts a directory-backed harness, keeping the model.
    pub fn restart(self) -> Self {
        let Self {
            conn,
            fixture,
            model,
        } = self;
        conn.close();
        let fixture = fixture.restart();
        let conn = fixture
            .open(MODEL_DB, 1, items_upgrade)
            .expect("Failed to reopen model database");
        Self {
            conn,
            fixture,
            model,
        }
    }

    /// Applies `op` in its own transaction, updating the model only when
    /// the transaction commits.
    ///
    /// # Errors
    ///
    /// Returns the error of the failed write or commit.
    ///
    /// # Panics
    ///
    /// Panics if an `Add` disagrees with the model about whether its key
    /// exists.
    pub fn apply(&mut self, op: &StoreOperation) -> CoreResult<()> {
        let result = self.conn.run(&[ITEMS], TransactionMode::ReadWrite, |txn| {
            let items = txn.store(ITEMS)?;
            match op {
                StoreOperation::Put { key, value } => {
                    items.put(value.clone(), key.clone())?;
                }
                StoreOperation::Add { key, value } => {
                    items.add(value.clone(), key.clone())?;
                }
                StoreOperation::Delete { key } => items.delete(key)?,
            }
            Ok(())
        });

        match (op, &result) {
            (StoreOperation::Add { key, .. }, Err(e)) => {
                assert!(self.model.contains_key(key), "add of new key {key} failed: {e}");
                assert_eq!(e.kind(), ErrorKind::Constraint);
            }
            (StoreOperation::Add { key, .. }, Ok(())) => {
                assert!(!self.model.contains_key(key), "add of existing key {key} succeeded");
            }
            _ => {}
        }

        if result.is_ok() {
            match op {
                StoreOperation::Put { key, value } | StoreOperation::Add { key, value } => {
                    self.model.insert(key.clone(), value.clone());
                }
                StoreOperation::Delete { key } => {
                    self.model.remove(key);
                }
            }
        }
        result
    }

    /// Stores `value` under `key`.
    pub fn put(&mut self, key: impl Into<Key>, value: impl Into<Value>) {
        let op = StoreOperation::Put {
            key: key.into(),
            value: value.into(),
        };
        self.apply(&op).expect("Failed to put record");
    }

    /// Deletes `key`.
    pub fn delete(&mut self, key: impl Into<Key>) {
        let op = StoreOperation::Delete { key: key.into() };
        self.apply(&op).expect("Failed to delete record");
    }

    /// Reads `key` and checks it against the model.
    pub fn get_and_verify(&self, key: impl Into<Key>) -> Option<Value> {
        let key = key.into();
        let actual = self
            .conn
            .run(&[ITEMS], TransactionMode::ReadOnly, |txn| {
                txn.store(ITEMS)?.get(&key)
            })
            .expect("Failed to get record");
        assert_eq!(actual.as_ref(), self.model.get(&key), "record mismatch for {key}");
        actual
    }

    /// Checks point reads, bulk reads, counts and cursor walks in both
    /// directions against the model.
    pub fn verify_all(&self) {
        self.conn
            .run(&[ITEMS], TransactionMode::ReadOnly, |txn| {
                let items = txn.store(ITEMS)?;
                for (key, expected) in &self.model {
                    assert_eq!(items.get(key)?.as_ref(), Some(expected), "record mismatch for {key}");
                }
                assert_eq!(items.count(KeyRange::all())?, self.model.len());

                let keys: Vec<Key> = self.model.keys().cloned().collect();
                let values: Vec<Value> = self.model.values().cloned().collect();
                assert_eq!(items.get_all_keys(KeyRange::all(), None)?, keys);
                assert_eq!(items.get_all(KeyRange::all(), None)?, values);

                let forward = walk(items.open_cursor(KeyRange::all(), Direction::Next)?)?;
                assert_eq!(forward, keys);
                let mut backward = walk(items.open_cursor(KeyRange::all(), Direction::Prev)?)?;
                backward.reverse();
                assert_eq!(backward, keys);
                Ok(())
            })
            .expect("Failed to verify records");
    }

    /// Returns the count of tracked records.
    pub fn tracked_count(&self) -> usize {
        self.model.len()
    }
}

impl Default for ModelHarness {
    fn default() -> Self {
        Self::new()
    }
}

fn walk(cursor: Option<strata_core::Cursor<'_>>) -> CoreResult<Vec<Key>> {
    match cursor {
        Some(cursor) => cursor
            .into_iter()
            .map(|record| record.map(|r| r.primary_key))
            .collect(),
        None => Ok(Vec::new()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::generators::{operation_sequence_strategy, PropTestConfig};
    use proptest::prelude::*;

    #[test]
    fn harness_tracks_writes() {
        let mut harness = ModelHarness::new();
        harness.put(3, "three");
        harness.put("a", Value::Integer(1));
        harness.put(1, Value::Null);
        assert_eq!(harness.tracked_count(), 3);

        assert_eq!(harness.get_and_verify(3), Some(Value::from("three")));
        harness.delete(3);
        assert_eq!(harness.get_and_verify(3), None);
        harness.verify_all();
    }

    #[test]
    fn rejected_add_leaves_model_alone() {
        let mut harness = ModelHarness::new();
        harness.put(1, "first");
        let op = StoreOperation::Add {
            key: Key::Number(1),
            value: Value::from("second"),
        };
        assert!(harness.apply(&op).is_err());
        assert_eq!(harness.get_and_verify(1), Some(Value::from("first")));
    }

    proptest! {
        #![proptest_config(PropTestConfig::quick().to_proptest_config())]

        #[test]
        fn random_operations_match_model(ops in operation_sequence_strategy(1, 40)) {
            let mut harness = ModelHarness::new();
            for op in &ops {
                let _ = harness.apply(op);
            }
            harness.verify_all();
        }
    }
}
