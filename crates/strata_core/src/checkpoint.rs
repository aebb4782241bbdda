//! Checkpoint images.
//!
//! A checkpoint captures the whole database (catalog, key generators and
//! records) as one CBOR document:
//!
//! ```text
//! | magic "SCKP" (4) | crc32 of body (4, LE) | body (canonical CBOR) |
//! ```
//!
//! The image is written with an atomic replace, after which the WAL is
//! emptied. Indexes are not stored; they are rebuilt from records on load.

use crate::catalog::StoreMeta;
use crate::encoding;
use crate::error::{CoreError, CoreResult};
use crate::key::Key;
use crate::types::SequenceNumber;
use crate::wal::compute_crc32;
use std::collections::BTreeMap;
use strata_codec::{from_cbor, to_canonical_cbor, Value};

/// Magic bytes identifying a checkpoint file.
pub const CHECKPOINT_MAGIC: [u8; 4] = *b"SCKP";

const HEADER_SIZE: usize = 8;

/// One store inside a checkpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct StoreImage {
    pub(crate) meta: StoreMeta,
    pub(crate) counter: i64,
    pub(crate) records: BTreeMap<Key, Vec<u8>>,
}

/// Full database state at a commit boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct CheckpointImage {
    pub(crate) format: (u16, u16),
    pub(crate) version: u64,
    /// Last commit reflected in the image.
    pub(crate) sequence: SequenceNumber,
    pub(crate) stores: Vec<StoreImage>,
}

impl CheckpointImage {
    pub(crate) fn encode(&self) -> CoreResult<Vec<u8>> {
        let stores = self
            .stores
            .iter()
            .map(|store| {
                Value::object([
                    ("meta", store.meta.to_value()),
                    ("counter", Value::Integer(store.counter)),
                    (
                        "records",
                        Value::Array(
                            store
                                .records
                                .iter()
                                .map(|(key, bytes)| {
                                    Value::Array(vec![key.to_value(), Value::Bytes(bytes.clone())])
                                })
                                .collect(),
                        ),
                    ),
                ])
            })
            .collect();

        let body = Value::object([
            (
                "format",
                Value::Array(vec![
                    Value::Integer(i64::from(self.format.0)),
                    Value::Integer(i64::from(self.format.1)),
                ]),
            ),
            ("version", encoding::from_unsigned(self.version)),
            ("sequence", encoding::from_unsigned(self.sequence.as_u64())),
            ("stores", Value::Array(stores)),
        ]);
        let body = to_canonical_cbor(&body).map_err(|e| CoreError::serialization(e.to_string()))?;

        let mut out = Vec::with_capacity(HEADER_SIZE + body.len());
        out.extend_from_slice(&CHECKPOINT_MAGIC);
        out.extend_from_slice(&compute_crc32(&body).to_le_bytes());
        out.extend_from_slice(&body);
        Ok(out)
    }

    /// Decodes an image, refusing a different major format version.
    pub(crate) fn decode(bytes: &[u8], expected_major: u16) -> CoreResult<Self> {
        if bytes.len() < HEADER_SIZE || bytes[0..4] != CHECKPOINT_MAGIC {
            return Err(CoreError::invalid_format("not a checkpoint file"));
        }
        let expected = u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]);
        let body = &bytes[HEADER_SIZE..];
        let actual = compute_crc32(body);
        if expected != actual {
            return Err(CoreError::ChecksumMismatch { expected, actual });
        }

        let root = from_cbor(body)?;
        let format = match encoding::array(&root, "format")? {
            [Value::Integer(major), Value::Integer(minor)] => (
                u16::try_from(*major).map_err(|_| CoreError::invalid_format("bad major version"))?,
                u16::try_from(*minor).map_err(|_| CoreError::invalid_format("bad minor version"))?,
            ),
            _ => return Err(CoreError::invalid_format("malformed format version")),
        };
        if format.0 != expected_major {
            return Err(CoreError::invalid_format(format!(
                "checkpoint format {}.{} is not supported (expected major {expected_major})",
                format.0, format.1
            )));
        }

        let stores = encoding::array(&root, "stores")?
            .iter()
            .map(decode_store)
            .collect::<CoreResult<_>>()?;

        Ok(Self {
            format,
            version: encoding::unsigned(&root, "version")?,
            sequence: SequenceNumber::new(encoding::unsigned(&root, "sequence")?),
            stores,
        })
    }
}

fn decode_store(value: &Value) -> CoreResult<StoreImage> {
    let records = encoding::array(value, "records")?
        .iter()
        .map(|pair| match pair {
            Value::Array(items) => match items.as_slice() {
                [key, Value::Bytes(bytes)] => Key::from_value(key)
                    .map(|key| (key, bytes.clone()))
                    .ok_or_else(|| CoreError::invalid_format("record key is not a valid key")),
                _ => Err(CoreError::invalid_format("malformed record entry")),
            },
            _ => Err(CoreError::invalid_format("record entry is not an array")),
        })
        .collect::<CoreResult<_>>()?;

    Ok(StoreImage {
        meta: StoreMeta::from_value(encoding::field(value, "meta")?)?,
        counter: encoding::integer(value, "counter")?,
        records,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{IndexMeta, IndexOptions, StoreOptions};

    fn sample() -> CheckpointImage {
        let mut meta = StoreMeta::new("books", StoreOptions::new().key_path("id")).unwrap();
        let index = IndexMeta::new("by_price", "price".into(), IndexOptions::new()).unwrap();
        meta.indexes.insert(index.name.clone(), index);

        let mut records = BTreeMap::new();
        records.insert(Key::from("js"), vec![0xa0]);
        records.insert(Key::Number(3), vec![0xf6]);

        CheckpointImage {
            format: (1, 0),
            version: 4,
            sequence: SequenceNumber::new(17),
            stores: vec![StoreImage {
                meta,
                counter: 9,
                records,
            }],
        }
    }

    #[test]
    fn image_decodes_to_itself() {
        let image = sample();
        let bytes = image.encode().unwrap();
        assert_eq!(&bytes[0..4], &CHECKPOINT_MAGIC);
        assert_eq!(CheckpointImage::decode(&bytes, 1).unwrap(), image);
    }

    #[test]
    fn corrupted_body_fails_checksum() {
        let mut bytes = sample().encode().unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0x01;
        assert!(matches!(
            CheckpointImage::decode(&bytes, 1),
            Err(CoreError::ChecksumMismatch { .. })
        ));
    }

    #[test]
    fn other_major_version_is_rejected() {
        let mut image = sample();
        image.format = (2, 0);
        let bytes = image.encode().unwrap();
        assert!(matches!(
            CheckpointImage::decode(&bytes, 1),
            Err(CoreError::InvalidFormat { .. })
        ));
    }

    #[test]
    fn garbage_is_invalid_format() {
        assert!(matches!(
            CheckpointImage::decode(b"nope", 1),
            Err(CoreError::InvalidFormat { .. })
        ));
    }
}
