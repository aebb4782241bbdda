//! Property-based test generators using proptest.
//!
//! Provides strategies for generating keys, values and store operations
//! that round-trip through the database unchanged.

use proptest::prelude::*;
use strata_codec::Value;
use strata_core::Key;

fn leaf_key_strategy() -> impl Strategy<Value = Key> {
    prop_oneof![
        any::<i64>().prop_map(Key::Number),
        (-1_000_000_000_000i64..4_000_000_000_000).prop_map(Key::Date),
        "[a-z]{0,8}".prop_map(Key::String),
        prop::collection::vec(any::<u8>(), 0..8).prop_map(Key::Binary),
    ]
}

/// Strategy for generating valid keys of every type, including one level of
/// arrays.
pub fn key_strategy() -> impl Strategy<Value = Key> {
    prop_oneof![
        4 => leaf_key_strategy(),
        1 => prop::collection::vec(leaf_key_strategy(), 0..4).prop_map(Key::Array),
    ]
}

/// Strategy for numeric keys drawn from `0..space`, so that operations
/// collide often.
pub fn small_key_strategy(space: i64) -> impl Strategy<Value = Key> {
    (0..space).prop_map(Key::Number)
}

/// Strategy for generating storable values.
///
/// Maps are built through [`Value::map`] so they are already in canonical
/// order and compare equal after a round trip.
pub fn value_strategy() -> impl Strategy<Value = Value> {
    let leaf = prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        any::<i64>().prop_map(Value::Integer),
        any::<i64>().prop_map(Value::Date),
        any::<f64>().prop_map(Value::Float),
        "[a-zA-Z0-9 ]{0,16}".prop_map(Value::Text),
        prop::collection::vec(any::<u8>(), 0..16).prop_map(Value::Bytes),
    ];
    leaf.prop_recursive(3, 32, 6, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..6).prop_map(Value::Array),
            prop::collection::btree_map("[a-z]{1,6}", inner, 0..6).prop_map(|fields| {
                Value::map(
                    fields
                        .into_iter()
                        .map(|(name, value)| (Value::Text(name), value))
                        .collect(),
                )
            }),
        ]
    })
}

/// A write against an out-of-line keyed store.
#[derive(Debug, Clone)]
pub enum StoreOperation {
    /// Insert or replace.
    Put {
        /// Record key
        key: Key,
        /// Record value
        value: Value,
    },
    /// Insert, failing when the key exists.
    Add {
        /// Record key
        key: Key,
        /// Record value
        value: Value,
    },
    /// Delete one key.
    Delete {
        /// Record key
        key: Key,
    },
}

/// Strategy for generating store operations over a small key space.
pub fn store_operation_strategy() -> impl Strategy<Value = StoreOperation> {
    prop_oneof![
        3 => (small_key_strategy(16), value_strategy())
            .prop_map(|(key, value)| StoreOperation::Put { key, value }),
        2 => (small_key_strategy(16), value_strategy())
            .prop_map(|(key, value)| StoreOperation::Add { key, value }),
        1 => small_key_strategy(16).prop_map(|key| StoreOperation::Delete { key }),
    ]
}

/// Strategy for generating a sequence of operations.
pub fn operation_sequence_strategy(
    min_ops: usize,
    max_ops: usize,
) -> impl Strategy<Value = Vec<StoreOperation>> {
    prop::collection::vec(store_operation_strategy(), min_ops..max_ops)
}

/// Configuration for property tests.
#[derive(Debug, Clone)]
pub struct PropTestConfig {
    /// Number of test cases to run.
    pub cases: u32,
    /// Maximum shrink iterations.
    pub max_shrink_iters: u32,
}

impl Default for PropTestConfig {
    fn default() -> Self {
        Self {
            cases: 256,
            max_shrink_iters: 1000,
        }
    }
}

impl PropTestConfig {
    /// Creates a configuration for quick tests.
    #[must_use]
    pub fn quick() -> Self {
        Self {
            cases: 32,
            max_shrink_iters: 100,
        }
    }

    /// Creates a configuration for thorough tests.
    #[must_use]
    pub fn thorough() -> Self {
        Self {
            cases: 1024,
            max_shrink_iters: 10000,
        }
    }

    /// Converts to proptest config.
    #[must_use]
    pub fn to_proptest_config(&self) -> ProptestConfig {
        ProptestConfig {
            cases: self.cases,
            max_shrink_iters: self.max_shrink_iters,
            ..ProptestConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    proptest! {
        #![proptest_config(PropTestConfig::quick().to_proptest_config())]

        #[test]
        fn keys_survive_value_conversion(key in key_strategy()) {
            prop_assert_eq!(Key::from_value(&key.to_value()), Some(key));
        }

        #[test]
        fn small_keys_stay_in_space(key in small_key_strategy(16)) {
            let n = key.as_number().unwrap();
            prop_assert!((0..16).contains(&n));
        }
    }
}
