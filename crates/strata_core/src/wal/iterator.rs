//! Streaming WAL record iterator.
//!
//! Records are read one at a time from the storage backend, so recovery
//! memory stays proportional to the largest record rather than the log.

use crate::error::{CoreError, CoreResult};
use crate::wal::record::{compute_crc32, WalRecord, WalRecordType, WAL_MAGIC, WAL_VERSION};
use strata_storage::StorageBackend;

/// magic (4) + version (2) + type (1) + length (4)
pub(crate) const HEADER_SIZE: usize = 11;

pub(crate) const CRC_SIZE: usize = 4;

/// A streaming iterator over WAL records.
///
/// Yields `(offset, record)` pairs. A truncated header or payload at the
/// tail ends iteration cleanly; bad magic, an unknown type, an unsupported
/// version or a checksum mismatch is returned as an error and ends it.
pub struct WalRecordIterator<'a> {
    backend: &'a dyn StorageBackend,
    total_size: u64,
    offset: u64,
    finished: bool,
}

impl<'a> WalRecordIterator<'a> {
    /// Creates an iterator starting at `start_offset`.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend size cannot be determined.
    pub fn new(backend: &'a dyn StorageBackend, start_offset: u64) -> CoreResult<Self> {
        Ok(Self {
            backend,
            total_size: backend.size()?,
            offset: start_offset,
            finished: false,
        })
    }

    /// Offset just past the last complete, valid record read so far.
    #[must_use]
    pub fn valid_end(&self) -> u64 {
        self.offset
    }

    fn remaining(&self) -> u64 {
        self.total_size.saturating_sub(self.offset)
    }

    fn read_next(&mut self) -> CoreResult<Option<(u64, WalRecord)>> {
        let start = self.offset;
        if self.remaining() < HEADER_SIZE as u64 {
            return Ok(None);
        }

        let header = self.backend.read_at(start, HEADER_SIZE)?;
        if header[0..4] != WAL_MAGIC {
            return Err(CoreError::wal_corruption(format!(
                "invalid magic at offset {start}"
            )));
        }

        let version = u16::from_le_bytes([header[4], header[5]]);
        if version > WAL_VERSION {
            return Err(CoreError::wal_corruption(format!(
                "unsupported version {version} at offset {start}"
            )));
        }

        let type_byte = header[6];
        let record_type = WalRecordType::from_byte(type_byte).ok_or_else(|| {
            CoreError::wal_corruption(format!(
                "unknown record type {type_byte} at offset {start}"
            ))
        })?;

        let payload_len = u32::from_le_bytes([header[7], header[8], header[9], header[10]]);
        let body_len = payload_len as usize + CRC_SIZE;
        if self.remaining() < (HEADER_SIZE + body_len) as u64 {
            // torn write at the tail
            return Ok(None);
        }

        let body = self.backend.read_at(start + HEADER_SIZE as u64, body_len)?;
        let (payload, crc_bytes) = body.split_at(payload_len as usize);

        let mut checked = header;
        checked.extend_from_slice(payload);
        let actual = compute_crc32(&checked);
        let expected = u32::from_le_bytes([crc_bytes[0], crc_bytes[1], crc_bytes[2], crc_bytes[3]]);
        if expected != actual {
            return Err(CoreError::ChecksumMismatch { expected, actual });
        }

        let record = WalRecord::decode_payload(record_type, payload)?;
        self.offset = start + (HEADER_SIZE + body_len) as u64;
        Ok(Some((start, record)))
    }
}

impl Iterator for WalRecordIterator<'_> {
    type Item = CoreResult<(u64, WalRecord)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        match self.read_next() {
            Ok(Some(item)) => Some(Ok(item)),
            Ok(None) => {
                self.finished = true;
                None
            }
            Err(e) => {
                self.finished = true;
                Some(Err(e))
            }
        }
    }
}
