//! WAL writer.

use crate::error::{CoreError, CoreResult};
use crate::wal::iterator::{WalRecordIterator, CRC_SIZE, HEADER_SIZE};
use crate::wal::record::{compute_crc32, WalRecord, WAL_MAGIC, WAL_VERSION};
use strata_storage::StorageBackend;

/// Append-only writer over the WAL backend.
///
/// A committing transaction's records are framed into one buffer and
/// appended with a single write, followed by a flush or sync.
pub struct WalWriter {
    backend: Box<dyn StorageBackend>,
    sync_on_commit: bool,
}

impl WalWriter {
    /// Creates a writer over `backend`.
    pub fn new(backend: Box<dyn StorageBackend>, sync_on_commit: bool) -> Self {
        Self {
            backend,
            sync_on_commit,
        }
    }

    /// Frames a single record with its envelope and checksum.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload cannot be encoded or exceeds 4 GiB.
    pub fn frame(record: &WalRecord) -> CoreResult<Vec<u8>> {
        let payload = record.encode_payload()?;
        let len = u32::try_from(payload.len())
            .map_err(|_| CoreError::invalid_argument("WAL record payload too large"))?;

        let mut data = Vec::with_capacity(HEADER_SIZE + payload.len() + CRC_SIZE);
        data.extend_from_slice(&WAL_MAGIC);
        data.extend_from_slice(&WAL_VERSION.to_le_bytes());
        data.push(record.record_type().as_byte());
        data.extend_from_slice(&len.to_le_bytes());
        data.extend_from_slice(&payload);

        let crc = compute_crc32(&data);
        data.extend_from_slice(&crc.to_le_bytes());
        Ok(data)
    }

    /// Frames a sequence of records into one contiguous buffer.
    ///
    /// # Errors
    ///
    /// Returns an error if any record cannot be framed.
    pub fn encode_batch(records: &[WalRecord]) -> CoreResult<Vec<u8>> {
        let mut out = Vec::new();
        for record in records {
            out.extend_from_slice(&Self::frame(record)?);
        }
        Ok(out)
    }

    /// Frames and appends `records`, then makes them durable.
    ///
    /// Returns the offset of the first record.
    ///
    /// # Errors
    ///
    /// See [`WalWriter::append_encoded`].
    pub fn append_batch(&mut self, records: &[WalRecord]) -> CoreResult<u64> {
        let bytes = Self::encode_batch(records)?;
        self.append_encoded(&bytes)
    }

    /// Appends an already framed batch, then flushes (or syncs, when
    /// configured).
    ///
    /// On failure the log is truncated back to its previous length when
    /// possible, so a partially written batch never precedes later commits.
    ///
    /// # Errors
    ///
    /// Returns the storage error of the failed write or flush.
    pub fn append_encoded(&mut self, bytes: &[u8]) -> CoreResult<u64> {
        let before = self.backend.size()?;
        let result = self.backend.append(bytes).and_then(|offset| {
            if self.sync_on_commit {
                self.backend.sync()?;
            } else {
                self.backend.flush()?;
            }
            Ok(offset)
        });

        match result {
            Ok(offset) => Ok(offset),
            Err(e) => {
                if let Err(undo) = self.backend.truncate(before) {
                    tracing::warn!(error = %undo, "failed to trim partial WAL batch");
                }
                Err(e.into())
            }
        }
    }

    /// Returns the current WAL size in bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend size cannot be read.
    pub fn size(&self) -> CoreResult<u64> {
        Ok(self.backend.size()?)
    }

    /// Truncates the log to `offset`, discarding everything after it.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be truncated.
    pub fn truncate(&mut self, offset: u64) -> CoreResult<()> {
        self.backend.truncate(offset)?;
        self.backend.sync()?;
        Ok(())
    }

    /// Empties the log after a checkpoint.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be truncated.
    pub fn clear(&mut self) -> CoreResult<()> {
        self.truncate(0)
    }

    /// Returns a streaming iterator over all records.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be accessed.
    pub fn iter(&self) -> CoreResult<WalRecordIterator<'_>> {
        WalRecordIterator::new(self.backend.as_ref(), 0)
    }
}

impl std::fmt::Debug for WalWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WalWriter")
            .field("sync_on_commit", &self.sync_on_commit)
            .finish_non_exhaustive()
    }
}
