//! Connections to an open database.

use crate::database::factory::DatabaseFactory;
use crate::database::shared::DatabaseShared;
use crate::error::CoreResult;
use crate::transaction::{Transaction, TransactionState};
use crate::types::{SequenceNumber, TransactionMode};
use parking_lot::Mutex;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::sync::Arc;
use std::time::Duration;

/// Sent to open connections when another caller wants to upgrade or delete
/// the database. The polite response is to close the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VersionChangeEvent {
    /// Version the database has now.
    pub old_version: u64,
    /// Version requested, or `None` when the database is being deleted.
    pub new_version: Option<u64>,
}

/// A handle to an open database at a fixed version.
///
/// Connections are cheap; each one can run any number of transactions.
/// Dropping the connection closes it.
///
/// ```rust,ignore
/// let conn = factory.open("library", 1, |txn, _old, _new| {
///     txn.create_store("books", StoreOptions::new().key_path("isbn"))?;
///     Ok(())
/// })?;
///
/// conn.run(&["books"], TransactionMode::ReadWrite, |txn| {
///     txn.store("books")?.put(book, None)?;
///     Ok(())
/// })?;
/// ```
pub struct Connection {
    id: u64,
    db: Arc<DatabaseShared>,
    factory: DatabaseFactory,
    events: Mutex<Receiver<VersionChangeEvent>>,
}

impl Connection {
    pub(crate) fn new(db: Arc<DatabaseShared>, factory: DatabaseFactory) -> Self {
        let (sender, events) = mpsc::channel();
        let id = db.register(sender);
        tracing::debug!(db = %db.name(), connection = id, "connection opened");
        Self {
            id,
            db,
            factory,
            events: Mutex::new(events),
        }
    }

    pub(crate) fn shared(&self) -> &DatabaseShared {
        &self.db
    }

    /// Database name.
    #[must_use]
    pub fn name(&self) -> &str {
        self.db.name()
    }

    /// Current database version.
    #[must_use]
    pub fn version(&self) -> u64 {
        self.db.version()
    }

    /// Sequence number of the last durable commit.
    #[must_use]
    pub fn committed_sequence(&self) -> SequenceNumber {
        self.db.last_sequence()
    }

    /// Names of all stores, sorted.
    #[must_use]
    pub fn store_names(&self) -> Vec<String> {
        self.db.store_names()
    }

    /// Starts a transaction over `scope`, waiting for its locks.
    ///
    /// # Errors
    ///
    /// - `InvalidArgument` for an empty scope or `TransactionMode::Upgrade`
    /// - `StoreNotFound` if a store in `scope` does not exist
    /// - `LockTimeout` if a lock timeout is configured and elapses
    pub fn transaction(&self, scope: &[&str], mode: TransactionMode) -> CoreResult<Transaction<'_>> {
        Transaction::begin(self, scope, mode)
    }

    /// Runs `f` in a new transaction.
    ///
    /// Commits when `f` returns `Ok`. When it returns `Err` the transaction
    /// is aborted and that error is returned, so a `?`-propagated failure
    /// rolls back every write `f` made.
    ///
    /// # Errors
    ///
    /// Returns the error of `f`, or of starting or committing the
    /// transaction.
    pub fn run<T>(
        &self,
        scope: &[&str],
        mode: TransactionMode,
        f: impl FnOnce(&Transaction<'_>) -> CoreResult<T>,
    ) -> CoreResult<T> {
        let txn = self.transaction(scope, mode)?;
        match f(&txn) {
            Ok(value) => {
                txn.commit()?;
                Ok(value)
            }
            Err(e) => {
                if txn.state() == TransactionState::Active {
                    txn.abort()?;
                }
                Err(e)
            }
        }
    }

    /// Next pending version-change notification, without waiting.
    #[must_use]
    pub fn next_version_change(&self) -> Option<VersionChangeEvent> {
        self.events.lock().try_recv().ok()
    }

    /// Waits up to `timeout` for a version-change notification.
    #[must_use]
    pub fn wait_version_change(&self, timeout: Duration) -> Option<VersionChangeEvent> {
        match self.events.lock().recv_timeout(timeout) {
            Ok(event) => Some(event),
            Err(RecvTimeoutError::Timeout | RecvTimeoutError::Disconnected) => None,
        }
    }

    /// Deletes database `name`; see [`DatabaseFactory::delete_database`].
    ///
    /// # Errors
    ///
    /// As for [`DatabaseFactory::delete_database`]. Deleting the database
    /// of this connection reports `DatabaseInUse` until it is closed.
    pub fn delete_database(&self, name: &str) -> CoreResult<()> {
        self.factory.delete_database(name)
    }

    /// Writes a checkpoint and empties the WAL, waiting for running
    /// transactions to finish.
    ///
    /// # Errors
    ///
    /// Returns `LockTimeout` if a lock timeout is configured and elapses,
    /// or the storage error of a failed write.
    pub fn checkpoint(&self) -> CoreResult<()> {
        self.db.checkpoint()
    }

    /// Closes the connection.
    pub fn close(self) {
        drop(self);
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.db.unregister(self.id);
        tracing::debug!(db = %self.db.name(), connection = self.id, "connection closed");
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("name", &self.db.name())
            .field("version", &self.version())
            .finish_non_exhaustive()
    }
}
