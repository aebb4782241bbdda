//! Record keys and key paths.
//!
//! Keys are totally ordered. Type classes compare first, in the order
//! **Number < Date < String < Binary < Array**; within a class numbers and
//! dates compare numerically, strings by code point, binary bytewise and
//! arrays lexicographically (a proper prefix sorts first). The derived
//! `Ord` on [`Key`] implements exactly this order, so variant order in the
//! enum is load-bearing.

use crate::error::{CoreError, CoreResult};
use std::fmt;
use strata_codec::Value;

/// A record key.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Key {
    /// Integer key.
    Number(i64),
    /// Date key, in milliseconds since the Unix epoch.
    Date(i64),
    /// String key; UTF-8 byte order equals code point order.
    String(String),
    /// Binary key.
    Binary(Vec<u8>),
    /// Compound key.
    Array(Vec<Key>),
}

impl Key {
    /// Converts a value into a key.
    ///
    /// Returns `None` for values that are not valid keys: null, booleans,
    /// floats, maps, and arrays containing any of those.
    #[must_use]
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Integer(n) => Some(Key::Number(*n)),
            Value::Date(ms) => Some(Key::Date(*ms)),
            Value::Text(s) => Some(Key::String(s.clone())),
            Value::Bytes(b) => Some(Key::Binary(b.clone())),
            Value::Array(items) => items
                .iter()
                .map(Key::from_value)
                .collect::<Option<Vec<_>>>()
                .map(Key::Array),
            Value::Null | Value::Bool(_) | Value::Float(_) | Value::Map(_) => None,
        }
    }

    /// Converts this key back into a value.
    #[must_use]
    pub fn to_value(&self) -> Value {
        match self {
            Key::Number(n) => Value::Integer(*n),
            Key::Date(ms) => Value::Date(*ms),
            Key::String(s) => Value::Text(s.clone()),
            Key::Binary(b) => Value::Bytes(b.clone()),
            Key::Array(items) => Value::Array(items.iter().map(Key::to_value).collect()),
        }
    }

    /// Returns the numeric value, if this is a number key.
    #[must_use]
    pub fn as_number(&self) -> Option<i64> {
        match self {
            Key::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// Returns the string, if this is a string key.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Key::String(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Key::Number(n) => write!(f, "{n}"),
            Key::Date(ms) => write!(f, "date({ms})"),
            Key::String(s) => write!(f, "{s:?}"),
            Key::Binary(b) => {
                f.write_str("0x")?;
                b.iter().try_for_each(|byte| write!(f, "{byte:02x}"))
            }
            Key::Array(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_str("]")
            }
        }
    }
}

impl From<i64> for Key {
    fn from(n: i64) -> Self {
        Key::Number(n)
    }
}

impl From<i32> for Key {
    fn from(n: i32) -> Self {
        Key::Number(i64::from(n))
    }
}

impl From<&str> for Key {
    fn from(s: &str) -> Self {
        Key::String(s.to_string())
    }
}

impl From<String> for Key {
    fn from(s: String) -> Self {
        Key::String(s)
    }
}

impl From<Vec<u8>> for Key {
    fn from(b: Vec<u8>) -> Self {
        Key::Binary(b)
    }
}

impl From<Vec<Key>> for Key {
    fn from(items: Vec<Key>) -> Self {
        Key::Array(items)
    }
}

/// Where a key lives inside a stored value.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum KeyPath {
    /// Dotted field path such as `"author.name"`. The empty path denotes the
    /// value itself.
    Single(String),
    /// Several paths whose values form an array key.
    Multi(Vec<String>),
}

impl KeyPath {
    /// Creates a compound key path.
    pub fn multi<I, S>(paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        KeyPath::Multi(paths.into_iter().map(Into::into).collect())
    }

    /// Checks that every segment is a non-empty name.
    ///
    /// # Errors
    ///
    /// Returns `InvalidKey` for empty segments or an empty compound path.
    pub fn validate(&self) -> CoreResult<()> {
        fn check(path: &str) -> CoreResult<()> {
            if !path.is_empty() && path.split('.').any(str::is_empty) {
                return Err(CoreError::invalid_key(format!(
                    "key path {path:?} has an empty segment"
                )));
            }
            Ok(())
        }
        match self {
            KeyPath::Single(path) => check(path),
            KeyPath::Multi(paths) if paths.is_empty() => {
                Err(CoreError::invalid_key("compound key path is empty"))
            }
            KeyPath::Multi(paths) => paths.iter().try_for_each(|p| {
                if p.is_empty() {
                    return Err(CoreError::invalid_key(
                        "compound key path has an empty member",
                    ));
                }
                check(p)
            }),
        }
    }

    /// Whether this path yields array keys.
    #[must_use]
    pub fn is_multi(&self) -> bool {
        matches!(self, KeyPath::Multi(_))
    }

    /// Evaluates the path against `value`.
    ///
    /// Returns `None` when a segment is missing or crosses a non-map.
    #[must_use]
    pub fn evaluate(&self, value: &Value) -> Option<Value> {
        match self {
            KeyPath::Single(path) => lookup(value, path).cloned(),
            KeyPath::Multi(paths) => paths
                .iter()
                .map(|p| lookup(value, p).cloned())
                .collect::<Option<Vec<_>>>()
                .map(Value::Array),
        }
    }

    /// Evaluates the path and converts the result into a key.
    #[must_use]
    pub fn extract_key(&self, value: &Value) -> Option<Key> {
        self.evaluate(value).as_ref().and_then(Key::from_value)
    }

    /// Writes `key` into `value` at this path, creating intermediate maps.
    ///
    /// # Errors
    ///
    /// Returns `InvalidKey` if the path is compound or empty, or if the
    /// value (or an intermediate segment) is not a map.
    pub fn inject(&self, value: &mut Value, key: &Key) -> CoreResult<()> {
        let path = match self {
            KeyPath::Single(path) if !path.is_empty() => path,
            _ => {
                return Err(CoreError::invalid_key(
                    "generated keys need a single, non-empty key path",
                ))
            }
        };

        let mut segments = path.split('.').peekable();
        let mut current = value;
        while let Some(segment) = segments.next() {
            if !matches!(current, Value::Map(_)) {
                return Err(CoreError::invalid_key(format!(
                    "cannot inject key at {path:?}: {} is not a map",
                    current.kind_name()
                )));
            }
            if segments.peek().is_none() {
                current.insert(segment, key.to_value());
                return Ok(());
            }
            if current.get(segment).is_none() {
                current.insert(segment, Value::Map(Vec::new()));
            }
            current = current
                .get_mut(segment)
                .ok_or_else(|| CoreError::invalid_key(format!("cannot inject key at {path:?}")))?;
        }
        Ok(())
    }
}

impl From<&str> for KeyPath {
    fn from(path: &str) -> Self {
        KeyPath::Single(path.to_string())
    }
}

impl From<String> for KeyPath {
    fn from(path: String) -> Self {
        KeyPath::Single(path)
    }
}

impl fmt::Display for KeyPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyPath::Single(path) => f.write_str(path),
            KeyPath::Multi(paths) => write!(f, "[{}]", paths.join(", ")),
        }
    }
}

fn lookup<'v>(value: &'v Value, path: &str) -> Option<&'v Value> {
    if path.is_empty() {
        return Some(value);
    }
    path.split('.').try_fold(value, |current, segment| current.get(segment))
}
