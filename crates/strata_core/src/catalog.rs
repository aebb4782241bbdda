//! Schema definitions: stores and their indexes.

use crate::encoding;
use crate::error::{CoreError, CoreResult};
use crate::key::KeyPath;
use std::collections::BTreeMap;
use strata_codec::Value;

/// Options for creating an object store.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoreOptions {
    /// Where keys live inside values; `None` means keys are supplied
    /// alongside each value.
    pub key_path: Option<KeyPath>,
    /// Whether the store generates keys from a counter.
    pub auto_increment: bool,
}

impl StoreOptions {
    /// Out-of-line keys, no generator.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Derives keys from `path` inside each value.
    #[must_use]
    pub fn key_path(mut self, path: impl Into<KeyPath>) -> Self {
        self.key_path = Some(path.into());
        self
    }

    /// Enables the key generator.
    #[must_use]
    pub fn auto_increment(mut self, value: bool) -> Self {
        self.auto_increment = value;
        self
    }
}

/// Options for creating an index.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IndexOptions {
    /// At most one record per index key.
    pub unique: bool,
    /// Index each element of an array value separately.
    pub multi_entry: bool,
}

impl IndexOptions {
    /// Non-unique, single-entry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the unique flag.
    #[must_use]
    pub fn unique(mut self, value: bool) -> Self {
        self.unique = value;
        self
    }

    /// Sets the multi-entry flag.
    #[must_use]
    pub fn multi_entry(mut self, value: bool) -> Self {
        self.multi_entry = value;
        self
    }
}

/// Definition of an index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexMeta {
    /// Name, unique within the store.
    pub name: String,
    /// Path of the indexed field.
    pub key_path: KeyPath,
    /// Uniqueness constraint.
    pub unique: bool,
    /// Array values produce one entry per element.
    pub multi_entry: bool,
}

impl IndexMeta {
    /// Builds and validates an index definition.
    ///
    /// # Errors
    ///
    /// Returns `InvalidKey` for a malformed key path and `InvalidArgument`
    /// for a multi-entry index over a compound key path.
    pub fn new(name: &str, key_path: KeyPath, options: IndexOptions) -> CoreResult<Self> {
        key_path.validate()?;
        if options.multi_entry && key_path.is_multi() {
            return Err(CoreError::invalid_argument(format!(
                "index {name:?}: multi-entry indexes need a single key path"
            )));
        }
        Ok(Self {
            name: name.to_string(),
            key_path,
            unique: options.unique,
            multi_entry: options.multi_entry,
        })
    }

    pub(crate) fn to_value(&self) -> Value {
        Value::object([
            ("name", Value::from(self.name.as_str())),
            ("key_path", key_path_to_value(&self.key_path)),
            ("unique", Value::Bool(self.unique)),
            ("multi_entry", Value::Bool(self.multi_entry)),
        ])
    }

    pub(crate) fn from_value(value: &Value) -> CoreResult<Self> {
        Ok(Self {
            name: encoding::text(value, "name")?,
            key_path: key_path_from_value(encoding::field(value, "key_path")?)?,
            unique: encoding::boolean(value, "unique")?,
            multi_entry: encoding::boolean(value, "multi_entry")?,
        })
    }
}

/// Definition of an object store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreMeta {
    /// Name, unique within the database.
    pub name: String,
    /// In-line key path, if any.
    pub key_path: Option<KeyPath>,
    /// Key generator enabled.
    pub auto_increment: bool,
    /// Indexes by name.
    pub indexes: BTreeMap<String, IndexMeta>,
}

impl StoreMeta {
    /// Builds and validates a store definition without indexes.
    ///
    /// # Errors
    ///
    /// Returns `InvalidKey` for a malformed key path and `InvalidArgument`
    /// for an auto-increment store with a compound or empty key path.
    pub fn new(name: &str, options: StoreOptions) -> CoreResult<Self> {
        if let Some(path) = &options.key_path {
            path.validate()?;
            let injectable = matches!(path, KeyPath::Single(p) if !p.is_empty());
            if options.auto_increment && !injectable {
                return Err(CoreError::invalid_argument(format!(
                    "store {name:?}: auto-increment needs a single, non-empty key path"
                )));
            }
        }
        Ok(Self {
            name: name.to_string(),
            key_path: options.key_path,
            auto_increment: options.auto_increment,
            indexes: BTreeMap::new(),
        })
    }

    pub(crate) fn to_value(&self) -> Value {
        Value::object([
            ("name", Value::from(self.name.as_str())),
            (
                "key_path",
                self.key_path
                    .as_ref()
                    .map_or(Value::Null, key_path_to_value),
            ),
            ("auto_increment", Value::Bool(self.auto_increment)),
            (
                "indexes",
                Value::Array(self.indexes.values().map(IndexMeta::to_value).collect()),
            ),
        ])
    }

    pub(crate) fn from_value(value: &Value) -> CoreResult<Self> {
        let key_path = match encoding::field(value, "key_path")? {
            Value::Null => None,
            other => Some(key_path_from_value(other)?),
        };
        let indexes = encoding::array(value, "indexes")?
            .iter()
            .map(|v| IndexMeta::from_value(v).map(|meta| (meta.name.clone(), meta)))
            .collect::<CoreResult<_>>()?;
        Ok(Self {
            name: encoding::text(value, "name")?,
            key_path,
            auto_increment: encoding::boolean(value, "auto_increment")?,
            indexes,
        })
    }
}

fn key_path_to_value(path: &KeyPath) -> Value {
    match path {
        KeyPath::Single(p) => Value::from(p.as_str()),
        KeyPath::Multi(paths) => {
            Value::Array(paths.iter().map(|p| Value::from(p.as_str())).collect())
        }
    }
}

fn key_path_from_value(value: &Value) -> CoreResult<KeyPath> {
    match value {
        Value::Text(p) => Ok(KeyPath::Single(p.clone())),
        Value::Array(items) => items
            .iter()
            .map(|v| {
                v.as_text()
                    .map(str::to_string)
                    .ok_or_else(|| CoreError::invalid_format("key path member is not text"))
            })
            .collect::<CoreResult<Vec<_>>>()
            .map(KeyPath::Multi),
        _ => Err(CoreError::invalid_format("key path is neither text nor array")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auto_increment_needs_injectable_path() {
        assert!(StoreMeta::new("a", StoreOptions::new().auto_increment(true)).is_ok());
        assert!(StoreMeta::new(
            "b",
            StoreOptions::new().key_path("id").auto_increment(true)
        )
        .is_ok());

        let err = StoreMeta::new(
            "c",
            StoreOptions::new()
                .key_path(KeyPath::multi(["a", "b"]))
                .auto_increment(true),
        )
        .unwrap_err();
        assert!(matches!(err, CoreError::InvalidArgument { .. }));

        assert!(StoreMeta::new(
            "d",
            StoreOptions::new().key_path("").auto_increment(true)
        )
        .is_err());
    }

    #[test]
    fn multi_entry_needs_single_path() {
        let err = IndexMeta::new(
            "tags",
            KeyPath::multi(["a", "b"]),
            IndexOptions::new().multi_entry(true),
        )
        .unwrap_err();
        assert!(matches!(err, CoreError::InvalidArgument { .. }));
        assert!(IndexMeta::new("tags", "tags".into(), IndexOptions::new().multi_entry(true)).is_ok());
    }

    #[test]
    fn meta_survives_value_conversion() {
        let mut store = StoreMeta::new("books", StoreOptions::new().key_path("id")).unwrap();
        let index = IndexMeta::new(
            "by_author",
            KeyPath::multi(["author", "year"]),
            IndexOptions::new().unique(true),
        )
        .unwrap();
        store.indexes.insert(index.name.clone(), index);

        let decoded = StoreMeta::from_value(&store.to_value()).unwrap();
        assert_eq!(decoded, store);
    }

    #[test]
    fn malformed_meta_is_invalid_format() {
        let value = Value::object([("name", Value::Integer(1))]);
        assert!(matches!(
            StoreMeta::from_value(&value),
            Err(CoreError::InvalidFormat { .. })
        ));
    }
}
