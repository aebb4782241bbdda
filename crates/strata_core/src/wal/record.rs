//! WAL record types and serialization.

use crate::catalog::{IndexMeta, StoreMeta};
use crate::encoding;
use crate::error::{CoreError, CoreResult};
use crate::key::Key;
use crate::types::{SequenceNumber, TransactionId};
use strata_codec::{from_cbor, to_canonical_cbor, Value};

/// Magic bytes identifying a WAL record.
pub const WAL_MAGIC: [u8; 4] = *b"SWAL";

/// Current WAL format version.
pub const WAL_VERSION: u16 = 1;

/// Type of WAL record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum WalRecordType {
    /// Start of a committed batch.
    Begin = 1,
    /// Record written.
    Put = 2,
    /// Record removed.
    Delete = 3,
    /// Store emptied.
    Clear = 4,
    /// Store created.
    CreateStore = 5,
    /// Store removed.
    DeleteStore = 6,
    /// Index created.
    CreateIndex = 7,
    /// Index removed.
    DeleteIndex = 8,
    /// Schema version changed.
    SetVersion = 9,
    /// End of a committed batch.
    Commit = 10,
}

impl WalRecordType {
    /// Converts a byte to a record type.
    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            1 => Some(Self::Begin),
            2 => Some(Self::Put),
            3 => Some(Self::Delete),
            4 => Some(Self::Clear),
            5 => Some(Self::CreateStore),
            6 => Some(Self::DeleteStore),
            7 => Some(Self::CreateIndex),
            8 => Some(Self::DeleteIndex),
            9 => Some(Self::SetVersion),
            10 => Some(Self::Commit),
            _ => None,
        }
    }

    /// Converts the record type to a byte.
    #[must_use]
    pub const fn as_byte(self) -> u8 {
        self as u8
    }
}

/// A single redo operation. Every operation sets absolute state, so
/// replaying one twice has no further effect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WalOp {
    /// Set `key` in `store` to the encoded value.
    Put {
        /// Store name.
        store: String,
        /// Primary key.
        key: Key,
        /// Canonical CBOR of the record value.
        value: Vec<u8>,
    },
    /// Remove `key` from `store`.
    Delete {
        /// Store name.
        store: String,
        /// Primary key.
        key: Key,
    },
    /// Remove every record of `store`.
    Clear {
        /// Store name.
        store: String,
    },
    /// Create an empty store.
    CreateStore {
        /// Store definition (without indexes).
        meta: StoreMeta,
    },
    /// Remove a store and its records.
    DeleteStore {
        /// Store name.
        name: String,
    },
    /// Create and populate an index.
    CreateIndex {
        /// Owning store.
        store: String,
        /// Index definition.
        meta: IndexMeta,
    },
    /// Remove an index.
    DeleteIndex {
        /// Owning store.
        store: String,
        /// Index name.
        name: String,
    },
    /// Set the schema version.
    SetVersion {
        /// New version.
        version: u64,
    },
}

impl WalOp {
    /// Returns the record type used for this operation.
    #[must_use]
    pub fn record_type(&self) -> WalRecordType {
        match self {
            Self::Put { .. } => WalRecordType::Put,
            Self::Delete { .. } => WalRecordType::Delete,
            Self::Clear { .. } => WalRecordType::Clear,
            Self::CreateStore { .. } => WalRecordType::CreateStore,
            Self::DeleteStore { .. } => WalRecordType::DeleteStore,
            Self::CreateIndex { .. } => WalRecordType::CreateIndex,
            Self::DeleteIndex { .. } => WalRecordType::DeleteIndex,
            Self::SetVersion { .. } => WalRecordType::SetVersion,
        }
    }

    fn to_body(&self) -> Value {
        match self {
            Self::Put { store, key, value } => Value::object([
                ("store", Value::from(store.as_str())),
                ("key", key.to_value()),
                ("value", Value::Bytes(value.clone())),
            ]),
            Self::Delete { store, key } => Value::object([
                ("store", Value::from(store.as_str())),
                ("key", key.to_value()),
            ]),
            Self::Clear { store } => Value::object([("store", Value::from(store.as_str()))]),
            Self::CreateStore { meta } => meta.to_value(),
            Self::DeleteStore { name } => Value::object([("name", Value::from(name.as_str()))]),
            Self::CreateIndex { store, meta } => Value::object([
                ("store", Value::from(store.as_str())),
                ("index", meta.to_value()),
            ]),
            Self::DeleteIndex { store, name } => Value::object([
                ("store", Value::from(store.as_str())),
                ("name", Value::from(name.as_str())),
            ]),
            Self::SetVersion { version } => {
                Value::object([("version", encoding::from_unsigned(*version))])
            }
        }
    }

    fn from_body(record_type: WalRecordType, body: &Value) -> CoreResult<Self> {
        Ok(match record_type {
            WalRecordType::Put => Self::Put {
                store: encoding::text(body, "store")?,
                key: encoding::key(body, "key")?,
                value: encoding::bytes(body, "value")?,
            },
            WalRecordType::Delete => Self::Delete {
                store: encoding::text(body, "store")?,
                key: encoding::key(body, "key")?,
            },
            WalRecordType::Clear => Self::Clear {
                store: encoding::text(body, "store")?,
            },
            WalRecordType::CreateStore => Self::CreateStore {
                meta: StoreMeta::from_value(body)?,
            },
            WalRecordType::DeleteStore => Self::DeleteStore {
                name: encoding::text(body, "name")?,
            },
            WalRecordType::CreateIndex => Self::CreateIndex {
                store: encoding::text(body, "store")?,
                meta: IndexMeta::from_value(encoding::field(body, "index")?)?,
            },
            WalRecordType::DeleteIndex => Self::DeleteIndex {
                store: encoding::text(body, "store")?,
                name: encoding::text(body, "name")?,
            },
            WalRecordType::SetVersion => Self::SetVersion {
                version: encoding::unsigned(body, "version")?,
            },
            WalRecordType::Begin | WalRecordType::Commit => {
                return Err(CoreError::wal_corruption(format!(
                    "{record_type:?} record carries no operation"
                )))
            }
        })
    }
}

/// A WAL record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WalRecord {
    /// Start of a transaction's batch.
    Begin {
        /// Transaction ID.
        txid: TransactionId,
    },
    /// One operation of the batch.
    Op {
        /// Transaction ID.
        txid: TransactionId,
        /// The operation.
        op: WalOp,
    },
    /// End of the batch; the transaction is durable once this is on disk.
    Commit {
        /// Transaction ID.
        txid: TransactionId,
        /// Sequence number assigned to this commit.
        sequence: SequenceNumber,
    },
}

impl WalRecord {
    /// Returns the record type.
    #[must_use]
    pub fn record_type(&self) -> WalRecordType {
        match self {
            Self::Begin { .. } => WalRecordType::Begin,
            Self::Op { op, .. } => op.record_type(),
            Self::Commit { .. } => WalRecordType::Commit,
        }
    }

    /// Returns the transaction ID.
    #[must_use]
    pub fn txid(&self) -> TransactionId {
        match self {
            Self::Begin { txid } | Self::Op { txid, .. } | Self::Commit { txid, .. } => *txid,
        }
    }

    /// Serializes the record payload (without envelope).
    ///
    /// The payload is the little-endian transaction ID, followed by the
    /// commit sequence for `Commit` or a canonical CBOR body for operations.
    ///
    /// # Errors
    ///
    /// Returns an error if the operation body cannot be encoded.
    pub fn encode_payload(&self) -> CoreResult<Vec<u8>> {
        let mut buf = Vec::new();
        buf.extend_from_slice(&self.txid().as_u64().to_le_bytes());

        match self {
            Self::Begin { .. } => {}
            Self::Op { op, .. } => {
                let body = to_canonical_cbor(&op.to_body())
                    .map_err(|e| CoreError::serialization(e.to_string()))?;
                buf.extend_from_slice(&body);
            }
            Self::Commit { sequence, .. } => {
                buf.extend_from_slice(&sequence.as_u64().to_le_bytes());
            }
        }

        Ok(buf)
    }

    /// Deserializes a record from its type and payload.
    ///
    /// # Errors
    ///
    /// Returns `WalCorruption` if the payload does not match the type.
    pub fn decode_payload(record_type: WalRecordType, payload: &[u8]) -> CoreResult<Self> {
        let read_u64 = |at: usize| -> CoreResult<u64> {
            payload
                .get(at..at + 8)
                .and_then(|bytes| <[u8; 8]>::try_from(bytes).ok())
                .map(u64::from_le_bytes)
                .ok_or_else(|| CoreError::wal_corruption("unexpected end of payload"))
        };

        let txid = TransactionId::new(read_u64(0)?);
        let expect_len = |len: usize| -> CoreResult<()> {
            if payload.len() == len {
                Ok(())
            } else {
                Err(CoreError::wal_corruption(format!(
                    "{record_type:?} record: expected {len} payload bytes, got {}",
                    payload.len()
                )))
            }
        };

        match record_type {
            WalRecordType::Begin => {
                expect_len(8)?;
                Ok(Self::Begin { txid })
            }
            WalRecordType::Commit => {
                expect_len(16)?;
                Ok(Self::Commit {
                    txid,
                    sequence: SequenceNumber::new(read_u64(8)?),
                })
            }
            _ => {
                let body = from_cbor(&payload[8..])
                    .map_err(|e| CoreError::wal_corruption(format!("operation body: {e}")))?;
                let op = WalOp::from_body(record_type, &body).map_err(|e| match e {
                    CoreError::InvalidFormat { message } => CoreError::wal_corruption(message),
                    other => other,
                })?;
                Ok(Self::Op { txid, op })
            }
        }
    }
}

/// Computes CRC32 checksum for data.
#[allow(clippy::cast_possible_truncation)]
pub fn compute_crc32(data: &[u8]) -> u32 {
    // IEEE polynomial, reflected
    const CRC32_TABLE: [u32; 256] = {
        let mut table = [0u32; 256];
        let mut i = 0;
        while i < 256 {
            let mut crc = i as u32;
            let mut j = 0;
            while j < 8 {
                if crc & 1 != 0 {
                    crc = (crc >> 1) ^ 0xEDB8_8320;
                } else {
                    crc >>= 1;
                }
                j += 1;
            }
            table[i] = crc;
            i += 1;
        }
        table
    };

    let mut crc = 0xFFFF_FFFF_u32;
    for &byte in data {
        let index = ((crc ^ u32::from(byte)) & 0xFF) as usize;
        crc = (crc >> 8) ^ CRC32_TABLE[index];
    }
    !crc
}
