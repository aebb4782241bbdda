//! # Strata Codec
//!
//! The value model stored in Strata object stores, and its canonical CBOR
//! encoding.
//!
//! Canonical encoding guarantees that equal values produce identical bytes,
//! so record images in the write-ahead log and checkpoints are stable
//! across runs and platforms.
//!
//! ## Canonical CBOR Rules
//!
//! - Maps are sorted by key (length-first, then bytewise on encoded keys)
//! - Integers use shortest encoding
//! - Floats are always 8-byte doubles; every NaN uses one bit pattern
//! - Strings must be UTF-8
//! - No indefinite-length items
//! - Dates are tag 1 over an integer count of milliseconds
//! - Arrays and maps nest at most [`MAX_NESTING_DEPTH`] levels
//!
//! ## Usage
//!
//! ```
//! use strata_codec::{from_cbor, to_canonical_cbor, Value};
//!
//! let value = Value::object([("title", Value::from("Dune")), ("year", Value::Integer(1965))]);
//! let bytes = to_canonical_cbor(&value).unwrap();
//!
//! let decoded = from_cbor(&bytes).unwrap();
//! assert_eq!(value, decoded);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod decoder;
mod encoder;
mod error;
mod value;

pub use decoder::{from_cbor, CanonicalDecoder};
pub use encoder::{to_canonical_cbor, CanonicalEncoder, MAX_NESTING_DEPTH};
pub use error::{CodecError, CodecResult};
pub use value::Value;

/// Trait for types that can be encoded to canonical CBOR.
pub trait Encode {
    /// Encode this value to canonical CBOR bytes.
    fn encode(&self) -> CodecResult<Vec<u8>>;
}

/// Trait for types that can be decoded from CBOR.
pub trait Decode: Sized {
    /// Decode this value from CBOR bytes.
    fn decode(bytes: &[u8]) -> CodecResult<Self>;
}

impl Encode for Value {
    fn encode(&self) -> CodecResult<Vec<u8>> {
        to_canonical_cbor(self)
    }
}

impl Decode for Value {
    fn decode(bytes: &[u8]) -> CodecResult<Self> {
        from_cbor(bytes)
    }
}
