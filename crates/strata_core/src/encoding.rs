//! Helpers for reading persisted CBOR structures.
//!
//! WAL bodies and checkpoint images are CBOR maps with text field names.
//! These helpers turn a malformed structure into `InvalidFormat`.

use crate::error::{CoreError, CoreResult};
use crate::key::Key;
use strata_codec::Value;

pub(crate) fn field<'v>(value: &'v Value, name: &str) -> CoreResult<&'v Value> {
    value
        .get(name)
        .ok_or_else(|| CoreError::invalid_format(format!("missing field {name:?}")))
}

pub(crate) fn text(value: &Value, name: &str) -> CoreResult<String> {
    field(value, name)?
        .as_text()
        .map(str::to_string)
        .ok_or_else(|| CoreError::invalid_format(format!("field {name:?} is not text")))
}

pub(crate) fn boolean(value: &Value, name: &str) -> CoreResult<bool> {
    field(value, name)?
        .as_bool()
        .ok_or_else(|| CoreError::invalid_format(format!("field {name:?} is not a bool")))
}

pub(crate) fn integer(value: &Value, name: &str) -> CoreResult<i64> {
    field(value, name)?
        .as_integer()
        .ok_or_else(|| CoreError::invalid_format(format!("field {name:?} is not an integer")))
}

pub(crate) fn unsigned(value: &Value, name: &str) -> CoreResult<u64> {
    u64::try_from(integer(value, name)?)
        .map_err(|_| CoreError::invalid_format(format!("field {name:?} is negative")))
}

pub(crate) fn bytes(value: &Value, name: &str) -> CoreResult<Vec<u8>> {
    field(value, name)?
        .as_bytes()
        .map(<[u8]>::to_vec)
        .ok_or_else(|| CoreError::invalid_format(format!("field {name:?} is not bytes")))
}

pub(crate) fn array<'v>(value: &'v Value, name: &str) -> CoreResult<&'v [Value]> {
    field(value, name)?
        .as_array()
        .ok_or_else(|| CoreError::invalid_format(format!("field {name:?} is not an array")))
}

pub(crate) fn key(value: &Value, name: &str) -> CoreResult<Key> {
    Key::from_value(field(value, name)?)
        .ok_or_else(|| CoreError::invalid_format(format!("field {name:?} is not a valid key")))
}

/// Converts a `u64` for storage; values beyond `i64::MAX` cannot occur for
/// versions and sequence numbers in practice, so they saturate.
pub(crate) fn from_unsigned(n: u64) -> Value {
    Value::Integer(i64::try_from(n).unwrap_or(i64::MAX))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn typed_field_access() {
        let value = Value::object([
            ("name", Value::from("books")),
            ("unique", Value::Bool(true)),
            ("version", Value::Integer(3)),
            ("key", Value::Integer(-4)),
        ]);

        assert_eq!(text(&value, "name").unwrap(), "books");
        assert!(boolean(&value, "unique").unwrap());
        assert_eq!(unsigned(&value, "version").unwrap(), 3);
        assert_eq!(key(&value, "key").unwrap(), Key::Number(-4));
        assert!(unsigned(&value, "key").is_err());
        assert!(matches!(
            text(&value, "missing"),
            Err(CoreError::InvalidFormat { .. })
        ));
        assert!(bytes(&value, "name").is_err());
    }
}
