//! Canonical CBOR encoder.

use crate::error::{CodecError, CodecResult};
use crate::value::{canonical_float_bits, Value};

/// Maximum array/map nesting accepted by the encoder and decoder.
pub const MAX_NESTING_DEPTH: usize = 128;

/// CBOR tag for epoch-based date/time (RFC 8949 Section 3.4.2).
pub(crate) const TAG_EPOCH_DATE: u64 = 1;

/// Encode a value to canonical CBOR bytes.
///
/// This function produces deterministic output following the canonical
/// CBOR rules specified in RFC 8949 Section 4.2.1:
/// - Map keys are sorted by their encoded form (length-first, then bytewise)
/// - Integers use the shortest possible encoding
/// - No indefinite-length encoding
/// - Floats always take the 8-byte form, with a single NaN bit pattern
///
/// Dates are written as tag 1 followed by an integer count of milliseconds.
///
/// # Errors
///
/// Returns [`CodecError::NestingTooDeep`] if arrays and maps nest deeper
/// than [`MAX_NESTING_DEPTH`].
pub fn to_canonical_cbor(value: &Value) -> CodecResult<Vec<u8>> {
    let mut encoder = CanonicalEncoder::new();
    encoder.encode(value)?;
    Ok(encoder.into_bytes())
}

/// A canonical CBOR encoder.
///
/// This encoder produces deterministic CBOR output suitable for
/// durable storage and byte-level comparison in Strata.
pub struct CanonicalEncoder {
    buffer: Vec<u8>,
    depth: usize,
}

impl CanonicalEncoder {
    /// Create a new encoder.
    pub fn new() -> Self {
        Self {
            buffer: Vec::new(),
            depth: 0,
        }
    }

    /// Create a new encoder with the specified capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buffer: Vec::with_capacity(capacity),
            depth: 0,
        }
    }

    /// Encode a value.
    pub fn encode(&mut self, value: &Value) -> CodecResult<()> {
        match value {
            Value::Null => self.buffer.push(0xf6),
            Value::Bool(b) => self.buffer.push(if *b { 0xf5 } else { 0xf4 }),
            Value::Integer(n) => self.encode_integer(*n),
            Value::Float(f) => {
                self.buffer.push(0xfb);
                self.buffer
                    .extend_from_slice(&canonical_float_bits(*f).to_be_bytes());
            }
            Value::Date(ms) => {
                self.encode_unsigned(6, TAG_EPOCH_DATE);
                self.encode_integer(*ms);
            }
            Value::Bytes(b) => self.encode_bytes(b),
            Value::Text(s) => self.encode_text(s),
            Value::Array(arr) => self.nested(|enc| enc.encode_array(arr))?,
            Value::Map(pairs) => self.nested(|enc| enc.encode_map(pairs))?,
        }
        Ok(())
    }

    /// Consume this encoder and return the encoded bytes.
    pub fn into_bytes(self) -> Vec<u8> {
        self.buffer
    }

    /// Get a reference to the encoded bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.buffer
    }

    fn nested(&mut self, f: impl FnOnce(&mut Self) -> CodecResult<()>) -> CodecResult<()> {
        if self.depth >= MAX_NESTING_DEPTH {
            return Err(CodecError::NestingTooDeep {
                max_depth: MAX_NESTING_DEPTH,
            });
        }
        self.depth += 1;
        let result = f(self);
        self.depth -= 1;
        result
    }

    #[allow(clippy::cast_sign_loss)]
    fn encode_integer(&mut self, n: i64) {
        if n >= 0 {
            self.encode_unsigned(0, n as u64);
        } else {
            // -1 encodes as 0, -2 as 1, and so on
            let abs_minus_one = (-(n + 1)) as u64;
            self.encode_unsigned(1, abs_minus_one);
        }
    }

    #[allow(clippy::cast_possible_truncation)]
    fn encode_unsigned(&mut self, major_type: u8, value: u64) {
        let mt = major_type << 5;

        if value < 24 {
            self.buffer.push(mt | (value as u8));
        } else if u8::try_from(value).is_ok() {
            self.buffer.push(mt | 24);
            self.buffer.push(value as u8);
        } else if u16::try_from(value).is_ok() {
            self.buffer.push(mt | 25);
            self.buffer.extend_from_slice(&(value as u16).to_be_bytes());
        } else if u32::try_from(value).is_ok() {
            self.buffer.push(mt | 26);
            self.buffer.extend_from_slice(&(value as u32).to_be_bytes());
        } else {
            self.buffer.push(mt | 27);
            self.buffer.extend_from_slice(&value.to_be_bytes());
        }
    }

    fn encode_bytes(&mut self, bytes: &[u8]) {
        self.encode_unsigned(2, bytes.len() as u64);
        self.buffer.extend_from_slice(bytes);
    }

    fn encode_text(&mut self, text: &str) {
        self.encode_unsigned(3, text.len() as u64);
        self.buffer.extend_from_slice(text.as_bytes());
    }

    fn encode_array(&mut self, arr: &[Value]) -> CodecResult<()> {
        self.encode_unsigned(4, arr.len() as u64);
        for item in arr {
            self.encode(item)?;
        }
        Ok(())
    }

    fn encode_map(&mut self, pairs: &[(Value, Value)]) -> CodecResult<()> {
        let mut encoded_pairs: Vec<(Vec<u8>, &Value)> = Vec::with_capacity(pairs.len());

        for (key, value) in pairs {
            let mut key_encoder = CanonicalEncoder {
                buffer: Vec::new(),
                depth: self.depth,
            };
            key_encoder.encode(key)?;
            encoded_pairs.push((key_encoder.into_bytes(), value));
        }

        // Length-first, then bytewise
        encoded_pairs.sort_by(|a, b| match a.0.len().cmp(&b.0.len()) {
            std::cmp::Ordering::Equal => a.0.cmp(&b.0),
            other => other,
        });

        self.encode_unsigned(5, pairs.len() as u64);
        for (encoded_key, value) in encoded_pairs {
            self.buffer.extend_from_slice(&encoded_key);
            self.encode(value)?;
        }

        Ok(())
    }
}

impl Default for CanonicalEncoder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn nest(depth: usize) -> Value {
        let mut value = Value::Integer(0);
        for _ in 0..depth {
            value = Value::Array(vec![value]);
        }
        value
    }

    #[test]
    fn encode_null_and_bool() {
        assert_eq!(to_canonical_cbor(&Value::Null).unwrap(), vec![0xf6]);
        assert_eq!(to_canonical_cbor(&Value::Bool(false)).unwrap(), vec![0xf4]);
        assert_eq!(to_canonical_cbor(&Value::Bool(true)).unwrap(), vec![0xf5]);
    }

    #[test]
    fn encode_integers_shortest_form() {
        assert_eq!(to_canonical_cbor(&Value::Integer(0)).unwrap(), vec![0x00]);
        assert_eq!(to_canonical_cbor(&Value::Integer(23)).unwrap(), vec![0x17]);
        assert_eq!(
            to_canonical_cbor(&Value::Integer(24)).unwrap(),
            vec![0x18, 24]
        );
        assert_eq!(
            to_canonical_cbor(&Value::Integer(256)).unwrap(),
            vec![0x19, 0x01, 0x00]
        );
        assert_eq!(
            to_canonical_cbor(&Value::Integer(65536)).unwrap(),
            vec![0x1a, 0x00, 0x01, 0x00, 0x00]
        );
    }

    #[test]
    fn encode_negative_integers() {
        assert_eq!(to_canonical_cbor(&Value::Integer(-1)).unwrap(), vec![0x20]);
        assert_eq!(to_canonical_cbor(&Value::Integer(-24)).unwrap(), vec![0x37]);
        assert_eq!(
            to_canonical_cbor(&Value::Integer(-100)).unwrap(),
            vec![0x38, 99]
        );
    }

    #[test]
    fn encode_floats_as_doubles() {
        assert_eq!(
            to_canonical_cbor(&Value::Float(1.5)).unwrap(),
            vec![0xfb, 0x3f, 0xf8, 0, 0, 0, 0, 0, 0]
        );
        let nan = f64::from_bits(0x7ff0_0000_0000_0001);
        assert_eq!(
            to_canonical_cbor(&Value::Float(nan)).unwrap(),
            vec![0xfb, 0x7f, 0xf8, 0, 0, 0, 0, 0, 0]
        );
    }

    #[test]
    fn encode_date_as_tag_one() {
        assert_eq!(to_canonical_cbor(&Value::Date(5)).unwrap(), vec![0xc1, 0x05]);
        assert_eq!(
            to_canonical_cbor(&Value::Date(1_000)).unwrap(),
            vec![0xc1, 0x19, 0x03, 0xe8]
        );
        assert_eq!(to_canonical_cbor(&Value::Date(-1)).unwrap(), vec![0xc1, 0x20]);
    }

    #[test]
    fn encode_bytes_and_text() {
        assert_eq!(
            to_canonical_cbor(&Value::Bytes(vec![1, 2, 3])).unwrap(),
            vec![0x43, 1, 2, 3]
        );
        assert_eq!(
            to_canonical_cbor(&Value::Text("a".to_string())).unwrap(),
            vec![0x61, b'a']
        );
    }

    #[test]
    fn encode_array() {
        assert_eq!(
            to_canonical_cbor(&Value::Array(vec![Value::Integer(1), Value::Integer(2)])).unwrap(),
            vec![0x82, 0x01, 0x02]
        );
    }

    #[test]
    fn encode_map_sorted() {
        let map = Value::Map(vec![
            (Value::Text("bb".to_string()), Value::Integer(2)),
            (Value::Text("a".to_string()), Value::Integer(1)),
        ]);
        let bytes = to_canonical_cbor(&map).unwrap();

        assert_eq!(bytes, vec![0xa2, 0x61, b'a', 0x01, 0x62, b'b', b'b', 0x02]);
    }

    #[test]
    fn deterministic_encoding() {
        let map1 = Value::Map(vec![
            (Value::Text("z".to_string()), Value::Integer(1)),
            (Value::Text("a".to_string()), Value::Integer(2)),
        ]);
        let map2 = Value::Map(vec![
            (Value::Text("a".to_string()), Value::Integer(2)),
            (Value::Text("z".to_string()), Value::Integer(1)),
        ]);

        assert_eq!(
            to_canonical_cbor(&map1).unwrap(),
            to_canonical_cbor(&map2).unwrap()
        );
    }

    #[test]
    fn nesting_limit() {
        assert!(to_canonical_cbor(&nest(MAX_NESTING_DEPTH)).is_ok());
        assert_eq!(
            to_canonical_cbor(&nest(MAX_NESTING_DEPTH + 1)),
            Err(CodecError::NestingTooDeep {
                max_depth: MAX_NESTING_DEPTH
            })
        );
    }
}
