//! Error types for Strata core.

use std::io;
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Broad category of a [`CoreError`].
///
/// Lets callers branch on what went wrong without matching payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Requested a version lower than the stored one.
    Version,
    /// An upgrade is waiting on open connections.
    Blocked,
    /// Uniqueness violation.
    Constraint,
    /// Operation on a transaction that is no longer active.
    TransactionInactive,
    /// Operation not legal in the current state.
    InvalidState,
    /// Value cannot be durably encoded.
    Serialization,
    /// Referenced database, store or index does not exist.
    NotFound,
    /// Storage quota exhausted at commit.
    QuotaExceeded,
    /// Storage or filesystem failure.
    Io,
    /// Database still has open connections.
    InUse,
    /// Invalid key, key path or key range.
    Data,
    /// Invalid argument supplied by the caller.
    InvalidArgument,
    /// Transaction was aborted.
    Aborted,
    /// Persistent state is damaged or unreadable.
    Corruption,
    /// Timed out waiting for a lock.
    Timeout,
}

/// Errors that can occur in Strata core operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Storage backend error.
    #[error("storage error: {0}")]
    Storage(#[from] strata_storage::StorageError),

    /// CBOR codec error on persisted bytes.
    #[error("codec error: {0}")]
    Codec(#[from] strata_codec::CodecError),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Requested version is older than the stored version.
    #[error("requested version {requested} is lower than current version {current}")]
    Version {
        /// Version passed to `open`.
        requested: u64,
        /// Version currently stored.
        current: u64,
    },

    /// Other connections did not close in time for an upgrade.
    ///
    /// This is a pending signal, not a failure: retry the open once the
    /// other connections are gone.
    #[error("open of {name:?} is blocked by {open_connections} open connection(s)")]
    Blocked {
        /// Database name.
        name: String,
        /// Number of connections still open.
        open_connections: usize,
    },

    /// A write would break a uniqueness invariant.
    #[error("constraint violation: {message}")]
    Constraint {
        /// Description of the violation.
        message: String,
    },

    /// The transaction has already committed or aborted.
    #[error("transaction is not active")]
    TransactionInactive,

    /// Operation is not legal in the current state.
    #[error("invalid state: {message}")]
    InvalidState {
        /// Why the operation is not permitted.
        message: String,
    },

    /// The value cannot be durably encoded.
    #[error("serialization failed: {message}")]
    Serialization {
        /// Description of the failure.
        message: String,
    },

    /// Named store does not exist (or is outside the transaction scope).
    #[error("object store not found: {name}")]
    StoreNotFound {
        /// Store name.
        name: String,
    },

    /// Named index does not exist on the store.
    #[error("index not found: {store}.{name}")]
    IndexNotFound {
        /// Owning store.
        store: String,
        /// Index name.
        name: String,
    },

    /// Named database does not exist.
    #[error("database not found: {name}")]
    DatabaseNotFound {
        /// Database name.
        name: String,
    },

    /// Committing would exceed the configured storage quota.
    #[error("quota exceeded: {required} bytes required, limit is {limit}")]
    QuotaExceeded {
        /// Configured limit in bytes.
        limit: u64,
        /// Bytes the commit would have needed.
        required: u64,
    },

    /// Database cannot be deleted while connections are open.
    #[error("database {name:?} is in use by {open_connections} connection(s)")]
    DatabaseInUse {
        /// Database name.
        name: String,
        /// Number of open connections.
        open_connections: usize,
    },

    /// Invalid key, key path or key range.
    #[error("invalid key: {message}")]
    InvalidKey {
        /// Description of the problem.
        message: String,
    },

    /// Invalid argument.
    #[error("invalid argument: {message}")]
    InvalidArgument {
        /// Description of the problem.
        message: String,
    },

    /// Transaction was aborted.
    #[error("transaction aborted: {reason}")]
    TransactionAborted {
        /// Reason for abort.
        reason: String,
    },

    /// Commit failed and the transaction was rolled back.
    #[error("commit failed: {source}")]
    CommitFailed {
        /// The failure that triggered the rollback.
        #[source]
        source: Box<CoreError>,
    },

    /// WAL is corrupted or invalid.
    #[error("WAL corruption: {message}")]
    WalCorruption {
        /// Description of the corruption.
        message: String,
    },

    /// Checksum mismatch detected.
    #[error("checksum mismatch: expected {expected:08x}, got {actual:08x}")]
    ChecksumMismatch {
        /// Expected checksum.
        expected: u32,
        /// Actual checksum.
        actual: u32,
    },

    /// Invalid database format or version.
    #[error("invalid database format: {message}")]
    InvalidFormat {
        /// Description of the format issue.
        message: String,
    },

    /// Database directory is locked by another process.
    #[error("database locked: another process has exclusive access")]
    DatabaseLocked,

    /// Waiting for store locks exceeded the configured timeout.
    #[error("timed out waiting for locks on {scope:?}")]
    LockTimeout {
        /// Stores the transaction asked for.
        scope: Vec<String>,
    },
}

impl CoreError {
    /// Returns the category of this error.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Storage(_) | Self::Io(_) => ErrorKind::Io,
            Self::Codec(_)
            | Self::WalCorruption { .. }
            | Self::ChecksumMismatch { .. }
            | Self::InvalidFormat { .. } => ErrorKind::Corruption,
            Self::Version { .. } => ErrorKind::Version,
            Self::Blocked { .. } => ErrorKind::Blocked,
            Self::Constraint { .. } => ErrorKind::Constraint,
            Self::TransactionInactive => ErrorKind::TransactionInactive,
            Self::InvalidState { .. } | Self::DatabaseLocked => ErrorKind::InvalidState,
            Self::Serialization { .. } => ErrorKind::Serialization,
            Self::StoreNotFound { .. }
            | Self::IndexNotFound { .. }
            | Self::DatabaseNotFound { .. } => ErrorKind::NotFound,
            Self::QuotaExceeded { .. } => ErrorKind::QuotaExceeded,
            Self::DatabaseInUse { .. } => ErrorKind::InUse,
            Self::InvalidKey { .. } => ErrorKind::Data,
            Self::InvalidArgument { .. } => ErrorKind::InvalidArgument,
            Self::TransactionAborted { .. } => ErrorKind::Aborted,
            Self::CommitFailed { source } => source.kind(),
            Self::LockTimeout { .. } => ErrorKind::Timeout,
        }
    }

    /// Whether this is the non-fatal "blocked by open connections" signal.
    #[must_use]
    pub fn is_blocked(&self) -> bool {
        matches!(self, Self::Blocked { .. })
    }

    /// Creates a constraint error.
    pub fn constraint(message: impl Into<String>) -> Self {
        Self::Constraint {
            message: message.into(),
        }
    }

    /// Creates an invalid state error.
    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::InvalidState {
            message: message.into(),
        }
    }

    /// Creates a serialization error.
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization {
            message: message.into(),
        }
    }

    /// Creates a store-not-found error.
    pub fn store_not_found(name: impl Into<String>) -> Self {
        Self::StoreNotFound { name: name.into() }
    }

    /// Creates an index-not-found error.
    pub fn index_not_found(store: impl Into<String>, name: impl Into<String>) -> Self {
        Self::IndexNotFound {
            store: store.into(),
            name: name.into(),
        }
    }

    /// Creates an invalid key error.
    pub fn invalid_key(message: impl Into<String>) -> Self {
        Self::InvalidKey {
            message: message.into(),
        }
    }

    /// Creates an invalid argument error.
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument {
            message: message.into(),
        }
    }

    /// Creates a transaction aborted error.
    pub fn transaction_aborted(reason: impl Into<String>) -> Self {
        Self::TransactionAborted {
            reason: reason.into(),
        }
    }

    /// Wraps a commit-time failure.
    pub fn commit_failed(source: CoreError) -> Self {
        Self::CommitFailed {
            source: Box::new(source),
        }
    }

    /// Creates a WAL corruption error.
    pub fn wal_corruption(message: impl Into<String>) -> Self {
        Self::WalCorruption {
            message: message.into(),
        }
    }

    /// Creates an invalid format error.
    pub fn invalid_format(message: impl Into<String>) -> Self {
        Self::InvalidFormat {
            message: message.into(),
        }
    }

    pub(crate) fn read_only() -> Self {
        Self::invalid_state("transaction is read-only")
    }

    pub(crate) fn not_upgrade() -> Self {
        Self::invalid_state("schema changes require an upgrade transaction")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_group_variants() {
        assert_eq!(CoreError::constraint("dup").kind(), ErrorKind::Constraint);
        assert_eq!(
            CoreError::store_not_found("books").kind(),
            ErrorKind::NotFound
        );
        assert_eq!(
            CoreError::index_not_found("books", "by_price").kind(),
            ErrorKind::NotFound
        );
        assert_eq!(CoreError::read_only().kind(), ErrorKind::InvalidState);
    }

    #[test]
    fn commit_failed_reports_cause_kind() {
        let err = CoreError::commit_failed(CoreError::QuotaExceeded {
            limit: 10,
            required: 20,
        });
        assert_eq!(err.kind(), ErrorKind::QuotaExceeded);
        assert!(err.to_string().contains("quota exceeded"));
    }

    #[test]
    fn blocked_is_not_fatal() {
        let err = CoreError::Blocked {
            name: "library".into(),
            open_connections: 2,
        };
        assert!(err.is_blocked());
        assert!(!CoreError::TransactionInactive.is_blocked());
    }
}
