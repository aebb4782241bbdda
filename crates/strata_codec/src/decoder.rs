//! Canonical CBOR decoder.

use crate::encoder::{MAX_NESTING_DEPTH, TAG_EPOCH_DATE};
use crate::error::{CodecError, CodecResult};
use crate::value::{Value, CANONICAL_NAN_BITS};

/// Decode a single value from CBOR bytes.
///
/// The input must contain exactly one value.
///
/// # Errors
///
/// Returns an error if the bytes are not valid canonical CBOR, contain
/// forbidden constructs (short floats, indefinite-length items, unknown tags),
/// or carry trailing bytes after the value.
pub fn from_cbor(bytes: &[u8]) -> CodecResult<Value> {
    let mut decoder = CanonicalDecoder::new(bytes);
    let value = decoder.decode()?;
    if !decoder.is_empty() {
        return Err(CodecError::TrailingBytes {
            remaining: decoder.remaining().len(),
        });
    }
    Ok(value)
}

/// A canonical CBOR decoder.
///
/// This decoder validates that input follows canonical CBOR rules
/// and rejects forbidden constructs.
pub struct CanonicalDecoder<'a> {
    data: &'a [u8],
    pos: usize,
    depth: usize,
}

/// Maximum allowed element count for arrays and maps.
const MAX_CONTAINER_ELEMENTS: u64 = 16 * 1024 * 1024;

/// Maximum allowed byte/string length.
const MAX_BYTES_LENGTH: u64 = 256 * 1024 * 1024;

impl<'a> CanonicalDecoder<'a> {
    /// Create a new decoder for the given bytes.
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            data,
            pos: 0,
            depth: 0,
        }
    }

    /// Decode the next value.
    pub fn decode(&mut self) -> CodecResult<Value> {
        let initial_byte = self.read_byte()?;
        let major_type = initial_byte >> 5;
        let additional_info = initial_byte & 0x1f;

        match major_type {
            0 | 1 => self.decode_integer(major_type, additional_info).map(Value::Integer),
            2 => self.decode_bytes(additional_info),
            3 => self.decode_text(additional_info),
            4 => self.decode_array(additional_info),
            5 => self.decode_map(additional_info),
            6 => self.decode_tagged(additional_info),
            7 => self.decode_simple(additional_info),
            _ => Err(CodecError::invalid_structure("invalid major type")),
        }
    }

    /// Check if all bytes have been consumed.
    pub fn is_empty(&self) -> bool {
        self.pos >= self.data.len()
    }

    /// Get remaining bytes.
    pub fn remaining(&self) -> &[u8] {
        &self.data[self.pos..]
    }

    #[inline]
    fn read_byte(&mut self) -> CodecResult<u8> {
        let byte = *self.data.get(self.pos).ok_or(CodecError::UnexpectedEof)?;
        self.pos += 1;
        Ok(byte)
    }

    #[inline]
    fn read_bytes(&mut self, len: usize) -> CodecResult<&'a [u8]> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|end| *end <= self.data.len())
            .ok_or(CodecError::UnexpectedEof)?;
        let bytes = &self.data[self.pos..end];
        self.pos = end;
        Ok(bytes)
    }

    #[inline]
    fn decode_unsigned(&mut self, additional_info: u8) -> CodecResult<u64> {
        const NON_CANONICAL: &str = "non-canonical: value could be encoded in fewer bytes";
        match additional_info {
            0..=23 => Ok(u64::from(additional_info)),
            24 => {
                let byte = self.read_byte()?;
                if byte < 24 {
                    return Err(CodecError::invalid_structure(NON_CANONICAL));
                }
                Ok(u64::from(byte))
            }
            25 => {
                let bytes = self.read_bytes(2)?;
                let value = u16::from_be_bytes([bytes[0], bytes[1]]);
                if u8::try_from(value).is_ok() {
                    return Err(CodecError::invalid_structure(NON_CANONICAL));
                }
                Ok(u64::from(value))
            }
            26 => {
                let bytes = self.read_bytes(4)?;
                let value = u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
                if u16::try_from(value).is_ok() {
                    return Err(CodecError::invalid_structure(NON_CANONICAL));
                }
                Ok(u64::from(value))
            }
            27 => {
                let bytes = self.read_bytes(8)?;
                let value = u64::from_be_bytes([
                    bytes[0], bytes[1], bytes[2], bytes[3], bytes[4], bytes[5], bytes[6], bytes[7],
                ]);
                if u32::try_from(value).is_ok() {
                    return Err(CodecError::invalid_structure(NON_CANONICAL));
                }
                Ok(value)
            }
            28..=30 => Err(CodecError::invalid_structure("reserved additional info")),
            _ => Err(CodecError::IndefiniteLengthForbidden),
        }
    }

    fn decode_integer(&mut self, major_type: u8, additional_info: u8) -> CodecResult<i64> {
        let n = self.decode_unsigned(additional_info)?;
        let magnitude = i64::try_from(n)
            .map_err(|_| CodecError::unsupported_type("integer outside the i64 range"))?;
        if major_type == 0 {
            Ok(magnitude)
        } else {
            Ok(-magnitude - 1)
        }
    }

    fn decode_length(&mut self, additional_info: u8, max_allowed: u64) -> CodecResult<usize> {
        let claimed = self.decode_unsigned(additional_info)?;
        if claimed > max_allowed {
            return Err(CodecError::SizeLimitExceeded {
                claimed,
                max_allowed,
            });
        }
        usize::try_from(claimed).map_err(|_| CodecError::SizeLimitExceeded {
            claimed,
            max_allowed,
        })
    }

    fn decode_bytes(&mut self, additional_info: u8) -> CodecResult<Value> {
        let len = self.decode_length(additional_info, MAX_BYTES_LENGTH)?;
        let bytes = self.read_bytes(len)?;
        Ok(Value::Bytes(bytes.to_vec()))
    }

    fn decode_text(&mut self, additional_info: u8) -> CodecResult<Value> {
        let len = self.decode_length(additional_info, MAX_BYTES_LENGTH)?;
        let bytes = self.read_bytes(len)?;
        let text = std::str::from_utf8(bytes).map_err(|_| CodecError::InvalidUtf8)?;
        Ok(Value::Text(text.to_string()))
    }

    fn enter(&mut self) -> CodecResult<()> {
        if self.depth >= MAX_NESTING_DEPTH {
            return Err(CodecError::NestingTooDeep {
                max_depth: MAX_NESTING_DEPTH,
            });
        }
        self.depth += 1;
        Ok(())
    }

    fn decode_array(&mut self, additional_info: u8) -> CodecResult<Value> {
        let len = self.decode_length(additional_info, MAX_CONTAINER_ELEMENTS)?;
        self.enter()?;
        // Each element needs at least one byte, so cap the preallocation.
        let mut items = Vec::with_capacity(len.min(self.data.len() - self.pos));
        for _ in 0..len {
            items.push(self.decode()?);
        }
        self.depth -= 1;
        Ok(Value::Array(items))
    }

    fn decode_map(&mut self, additional_info: u8) -> CodecResult<Value> {
        let len = self.decode_length(additional_info, MAX_CONTAINER_ELEMENTS)?;
        self.enter()?;
        let mut pairs = Vec::with_capacity(len.min(self.data.len() - self.pos));
        let data = self.data;
        let mut prev_key: Option<&'a [u8]> = None;

        for _ in 0..len {
            let key_start = self.pos;
            let key = self.decode()?;
            let key_bytes = &data[key_start..self.pos];

            // Keys must be strictly increasing
            if let Some(prev) = prev_key {
                if compare_cbor_bytes(prev, key_bytes) != std::cmp::Ordering::Less {
                    return Err(CodecError::invalid_structure(
                        "non-canonical: map keys not in sorted order",
                    ));
                }
            }
            prev_key = Some(key_bytes);

            let value = self.decode()?;
            pairs.push((key, value));
        }

        self.depth -= 1;
        Ok(Value::Map(pairs))
    }

    fn decode_tagged(&mut self, additional_info: u8) -> CodecResult<Value> {
        let tag = self.decode_unsigned(additional_info)?;
        if tag != TAG_EPOCH_DATE {
            return Err(CodecError::unsupported_type(format!("tag {tag}")));
        }
        let initial_byte = self.read_byte()?;
        match initial_byte >> 5 {
            major_type @ (0 | 1) => self
                .decode_integer(major_type, initial_byte & 0x1f)
                .map(Value::Date),
            _ => Err(CodecError::invalid_structure(
                "date tag must wrap an integer",
            )),
        }
    }

    fn decode_simple(&mut self, additional_info: u8) -> CodecResult<Value> {
        match additional_info {
            20 => Ok(Value::Bool(false)),
            21 => Ok(Value::Bool(true)),
            22 => Ok(Value::Null),
            24 => {
                let simple = self.read_byte()?;
                match simple {
                    0..=31 => Err(CodecError::invalid_structure(
                        "non-canonical: simple value should use direct encoding",
                    )),
                    _ => Err(CodecError::unsupported_type(format!(
                        "simple value {simple}"
                    ))),
                }
            }
            25 | 26 => Err(CodecError::NonCanonicalFloat),
            27 => {
                let bytes = self.read_bytes(8)?;
                let bits = u64::from_be_bytes([
                    bytes[0], bytes[1], bytes[2], bytes[3], bytes[4], bytes[5], bytes[6], bytes[7],
                ]);
                let value = f64::from_bits(bits);
                if value.is_nan() && bits != CANONICAL_NAN_BITS {
                    return Err(CodecError::NonCanonicalFloat);
                }
                Ok(Value::Float(value))
            }
            28..=30 => Err(CodecError::invalid_structure("reserved additional info")),
            31 => Err(CodecError::invalid_structure("break without indefinite")),
            _ => Err(CodecError::unsupported_type(format!(
                "simple value {additional_info}"
            ))),
        }
    }
}

/// Length-first, then bytewise comparison of encoded items.
fn compare_cbor_bytes(a: &[u8], b: &[u8]) -> std::cmp::Ordering {
    match a.len().cmp(&b.len()) {
        std::cmp::Ordering::Equal => a.cmp(b),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_scalars() {
        assert_eq!(from_cbor(&[0xf6]).unwrap(), Value::Null);
        assert_eq!(from_cbor(&[0xf4]).unwrap(), Value::Bool(false));
        assert_eq!(from_cbor(&[0xf5]).unwrap(), Value::Bool(true));
        assert_eq!(from_cbor(&[0x17]).unwrap(), Value::Integer(23));
        assert_eq!(from_cbor(&[0x18, 255]).unwrap(), Value::Integer(255));
        assert_eq!(from_cbor(&[0x19, 0x01, 0x00]).unwrap(), Value::Integer(256));
        assert_eq!(from_cbor(&[0x20]).unwrap(), Value::Integer(-1));
        assert_eq!(from_cbor(&[0x38, 99]).unwrap(), Value::Integer(-100));
    }

    #[test]
    fn decode_extreme_integers() {
        let max = [0x1b, 0x7f, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff];
        assert_eq!(from_cbor(&max).unwrap(), Value::Integer(i64::MAX));
        let min = [0x3b, 0x7f, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff];
        assert_eq!(from_cbor(&min).unwrap(), Value::Integer(i64::MIN));

        let too_big = [0x1b, 0x80, 0, 0, 0, 0, 0, 0, 0];
        assert!(matches!(
            from_cbor(&too_big),
            Err(CodecError::UnsupportedType { .. })
        ));
    }

    #[test]
    fn decode_strings_and_containers() {
        assert_eq!(
            from_cbor(&[0x43, 1, 2, 3]).unwrap(),
            Value::Bytes(vec![1, 2, 3])
        );
        assert_eq!(
            from_cbor(&[0x65, b'h', b'e', b'l', b'l', b'o']).unwrap(),
            Value::Text("hello".to_string())
        );
        assert_eq!(
            from_cbor(&[0x82, 0x01, 0x02]).unwrap(),
            Value::Array(vec![Value::Integer(1), Value::Integer(2)])
        );
        assert_eq!(
            from_cbor(&[0xa1, 0x61, b'a', 0x01]).unwrap(),
            Value::Map(vec![(Value::Text("a".to_string()), Value::Integer(1))])
        );
    }

    #[test]
    fn decode_date() {
        assert_eq!(from_cbor(&[0xc1, 0x05]).unwrap(), Value::Date(5));
        assert_eq!(
            from_cbor(&[0xc1, 0x19, 0x03, 0xe8]).unwrap(),
            Value::Date(1_000)
        );
    }

    #[test]
    fn reject_unknown_tags_and_bad_dates() {
        // tag 0 (date/time string)
        assert!(matches!(
            from_cbor(&[0xc0, 0x61, b'a']),
            Err(CodecError::UnsupportedType { .. })
        ));
        // tag 1 wrapping text
        assert!(matches!(
            from_cbor(&[0xc1, 0x61, b'a']),
            Err(CodecError::InvalidStructure { .. })
        ));
    }

    #[test]
    fn decode_double_precision_floats() {
        assert_eq!(
            from_cbor(&[0xfb, 0x40, 0x23, 0xfa, 0xe1, 0x47, 0xae, 0x14, 0x7b]).unwrap(),
            Value::Float(9.99)
        );
        assert_eq!(
            from_cbor(&[0xfb, 0x7f, 0xf8, 0, 0, 0, 0, 0, 0]).unwrap(),
            Value::Float(f64::NAN)
        );
    }

    #[test]
    fn reject_short_or_noncanonical_float() {
        assert_eq!(from_cbor(&[0xf9, 0x00, 0x00]), Err(CodecError::NonCanonicalFloat));
        assert_eq!(
            from_cbor(&[0xfa, 0x00, 0x00, 0x00, 0x00]),
            Err(CodecError::NonCanonicalFloat)
        );
        assert_eq!(
            from_cbor(&[0xfb, 0x7f, 0xf0, 0, 0, 0, 0, 0, 1]),
            Err(CodecError::NonCanonicalFloat)
        );
    }

    #[test]
    fn reject_indefinite_length() {
        for bytes in [
            &[0x5f, 0x41, b'a', 0xff][..],
            &[0x7f, 0x61, b'a', 0xff][..],
            &[0x9f, 0x01, 0xff][..],
            &[0xbf, 0x61, b'a', 0x01, 0xff][..],
        ] {
            assert_eq!(from_cbor(bytes), Err(CodecError::IndefiniteLengthForbidden));
        }
    }

    #[test]
    fn reject_non_shortest_encoding() {
        assert!(matches!(
            from_cbor(&[0x18, 23]),
            Err(CodecError::InvalidStructure { .. })
        ));
        assert!(matches!(
            from_cbor(&[0x19, 0x00, 0xff]),
            Err(CodecError::InvalidStructure { .. })
        ));
    }

    #[test]
    fn reject_unsorted_map_keys() {
        assert!(matches!(
            from_cbor(&[0xa2, 0x61, b'b', 0x01, 0x61, b'a', 0x02]),
            Err(CodecError::InvalidStructure { .. })
        ));
    }

    #[test]
    fn reject_trailing_bytes() {
        assert_eq!(
            from_cbor(&[0x01, 0x02, 0x03]),
            Err(CodecError::TrailingBytes { remaining: 2 })
        );
    }

    #[test]
    fn reject_deep_nesting() {
        let mut bytes = vec![0x81; MAX_NESTING_DEPTH + 1];
        bytes.push(0x00);
        assert_eq!(
            from_cbor(&bytes),
            Err(CodecError::NestingTooDeep {
                max_depth: MAX_NESTING_DEPTH
            })
        );

        let mut ok = vec![0x81; MAX_NESTING_DEPTH];
        ok.push(0x00);
        assert!(from_cbor(&ok).is_ok());
    }

    #[test]
    fn unexpected_eof() {
        assert_eq!(from_cbor(&[]), Err(CodecError::UnexpectedEof));
        assert_eq!(from_cbor(&[0x18]), Err(CodecError::UnexpectedEof));
        assert_eq!(from_cbor(&[0x19, 0x01]), Err(CodecError::UnexpectedEof));
        assert_eq!(from_cbor(&[0x82, 0x01]), Err(CodecError::UnexpectedEof));
    }

    #[test]
    fn invalid_utf8_rejected() {
        assert_eq!(from_cbor(&[0x62, 0xff, 0xfe]), Err(CodecError::InvalidUtf8));
    }
}
