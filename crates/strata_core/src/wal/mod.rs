//! Write-ahead log for durability and crash recovery.
//!
//! Every committing read-write or upgrade transaction appends one batch:
//! a `Begin` record, one record per operation, then a `Commit` record
//! carrying the commit sequence number. The commit is acknowledged only
//! after the batch is flushed (or synced).
//!
//! ## Record Format
//!
//! ```text
//! | magic (4) | version (2) | type (1) | length (4) | payload (N) | crc32 (4) |
//! ```
//!
//! All integers are little-endian. The CRC covers everything before it.
//!
//! ## Recovery Policy
//!
//! - A truncated header or payload at the tail is a torn write and ends the
//!   log cleanly. Recovery truncates the file back to the last complete
//!   batch.
//! - A checksum mismatch, bad magic, unknown record type or future version
//!   is corruption, and the database refuses to open.
//! - Batches without a `Commit` record are discarded.
//! - Operations carry absolute state, so replaying a batch that is already
//!   reflected in the checkpoint image is harmless; recovery still skips
//!   batches whose sequence number the image already covers.

mod iterator;
mod record;
mod writer;

pub use iterator::WalRecordIterator;
pub use record::{compute_crc32, WalOp, WalRecord, WalRecordType, WAL_MAGIC, WAL_VERSION};
pub use writer::WalWriter;
