//! Transactions.
//!
//! A transaction owns its scope's locks from creation until it commits or
//! aborts. Writes apply directly to the live stores under those locks; each
//! one leaves an undo entry (for rollback) and a redo entry (for the WAL).
//!
//! Commit appends the redo entries as one batch framed by `Begin` and
//! `Commit` records and returns once the batch is durable. If that fails the
//! undo entries are replayed in reverse and the transaction ends `Aborted`.
//!
//! A failed write leaves the transaction active but marks it failed. Unless
//! the caller calls [`Transaction::acknowledge`], the next commit rolls
//! everything back instead and reports `TransactionAborted`.
//!
//! Dropping an active transaction commits it, unless a write failure is
//! pending or the thread is panicking; then it aborts. Prefer
//! [`Connection::run`](crate::Connection::run) or an explicit
//! [`Transaction::commit`] when the outcome matters.

mod lock;
mod state;

pub use lock::{LockManager, LockRequest, LockTicket};
pub use state::TransactionState;

use crate::catalog::{IndexOptions, StoreMeta, StoreOptions};
use crate::database::{Connection, DatabaseShared, Snapshot};
use crate::error::{CoreError, CoreResult, ErrorKind};
use crate::key::{Key, KeyPath};
use crate::store::{IndexData, ObjectStore, StoreData};
use crate::types::{TransactionId, TransactionMode};
use crate::wal::WalOp;
use parking_lot::{Mutex, MutexGuard, RwLock};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

/// How to reverse one write.
pub(crate) enum Undo {
    /// Put `previous` back under `key` (or remove it) and restore the
    /// generator.
    Record {
        store: Arc<RwLock<StoreData>>,
        key: Key,
        previous: Option<Vec<u8>>,
        counter: i64,
    },
    /// Reinsert records removed by a range delete.
    Reinsert {
        store: Arc<RwLock<StoreData>>,
        records: Vec<(Key, Vec<u8>)>,
    },
    /// Refill a cleared store.
    Refill {
        store: Arc<RwLock<StoreData>>,
        records: BTreeMap<Key, Vec<u8>>,
    },
    /// Drop an index created by an upgrade.
    DiscardIndex {
        store: Arc<RwLock<StoreData>>,
        name: String,
    },
    /// Put back an index deleted by an upgrade.
    RestoreIndex {
        store: Arc<RwLock<StoreData>>,
        index: IndexData,
    },
}

impl Undo {
    fn apply(self) -> CoreResult<()> {
        match self {
            Self::Record {
                store,
                key,
                previous,
                counter,
            } => {
                let mut data = store.write();
                data.restore_record(&key, previous)?;
                data.set_counter(counter);
            }
            Self::Reinsert { store, records } => {
                let mut data = store.write();
                for (key, bytes) in records {
                    data.restore_record(&key, Some(bytes))?;
                }
            }
            Self::Refill { store, records } => store.write().replace_records(records)?,
            Self::DiscardIndex { store, name } => store.write().discard_index(&name),
            Self::RestoreIndex { store, index } => store.write().restore_index(index),
        }
        Ok(())
    }
}

/// Undo and redo entries of a transaction, in issue order.
#[derive(Default)]
pub(crate) struct TxnLog {
    undo: Vec<Undo>,
    redo: Vec<WalOp>,
}

impl TxnLog {
    pub(crate) fn push(&mut self, undo: Undo, redo: WalOp) {
        self.undo.push(undo);
        self.redo.push(redo);
    }

    pub(crate) fn push_many(&mut self, undo: Undo, redo: Vec<WalOp>) {
        self.undo.push(undo);
        self.redo.extend(redo);
    }

    /// Store creation and deletion are undone by the upgrade's catalog
    /// snapshot, not per entry.
    pub(crate) fn redo(&mut self, op: WalOp) {
        self.redo.push(op);
    }
}

type CompletionHook = Box<dyn FnOnce(TransactionState) + Send>;

struct TxnInner {
    state: TransactionState,
    ticket: Option<LockTicket>,
    log: TxnLog,
    /// Pre-upgrade catalog, restored if an upgrade rolls back.
    snapshot: Option<Snapshot>,
    hooks: Vec<CompletionHook>,
    /// Write failure the caller has not acknowledged.
    failure: Option<(ErrorKind, String)>,
}

/// A unit of work over a fixed set of stores.
pub struct Transaction<'c> {
    conn: &'c Connection,
    id: TransactionId,
    mode: TransactionMode,
    scope: Vec<String>,
    inner: Mutex<TxnInner>,
}

impl<'c> Transaction<'c> {
    fn new(
        conn: &'c Connection,
        mode: TransactionMode,
        scope: Vec<String>,
        ticket: LockTicket,
        snapshot: Option<Snapshot>,
    ) -> Self {
        let id = conn.shared().next_txid();
        tracing::trace!(txn = %id, %mode, ?scope, "transaction started");
        Self {
            conn,
            id,
            mode,
            scope,
            inner: Mutex::new(TxnInner {
                state: TransactionState::Active,
                ticket: Some(ticket),
                log: TxnLog::default(),
                snapshot,
                hooks: Vec::new(),
                failure: None,
            }),
        }
    }

    /// Starts a read-only or read-write transaction, waiting for its locks.
    pub(crate) fn begin(
        conn: &'c Connection,
        scope: &[&str],
        mode: TransactionMode,
    ) -> CoreResult<Self> {
        if mode == TransactionMode::Upgrade {
            return Err(CoreError::invalid_argument(
                "upgrade transactions are only created by open",
            ));
        }
        if scope.is_empty() {
            return Err(CoreError::invalid_argument("transaction scope is empty"));
        }

        let db = conn.shared();
        let names: BTreeSet<String> = scope.iter().map(|s| (*s).to_string()).collect();
        {
            let catalog = db.catalog();
            if let Some(missing) = names.iter().find(|n| !catalog.stores.contains_key(*n)) {
                return Err(CoreError::store_not_found(missing.as_str()));
            }
        }

        let ticket = db.locks().acquire(
            LockRequest::Stores {
                names: names.clone(),
                exclusive: mode == TransactionMode::ReadWrite,
            },
            db.config().lock_timeout,
        )?;
        Ok(Self::new(conn, mode, names.into_iter().collect(), ticket, None))
    }

    /// Starts the upgrade transaction of an `open` call and moves the
    /// version to `new_version`.
    pub(crate) fn begin_upgrade(conn: &'c Connection, new_version: u64) -> CoreResult<Self> {
        let db = conn.shared();
        let ticket = db
            .locks()
            .acquire(LockRequest::Database, db.config().lock_timeout)?;
        let snapshot = db.snapshot();
        let txn = Self::new(conn, TransactionMode::Upgrade, Vec::new(), ticket, Some(snapshot));

        db.catalog_mut().version = new_version;
        txn.inner.lock().log.redo(WalOp::SetVersion {
            version: new_version,
        });
        Ok(txn)
    }

    fn db(&self) -> &DatabaseShared {
        self.conn.shared()
    }

    /// Transaction ID.
    #[must_use]
    pub fn id(&self) -> TransactionId {
        self.id
    }

    /// Isolation mode.
    #[must_use]
    pub fn mode(&self) -> TransactionMode {
        self.mode
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> TransactionState {
        self.inner.lock().state
    }

    /// Store names in scope, sorted. Empty for upgrade transactions, which
    /// cover the whole database.
    #[must_use]
    pub fn scope(&self) -> &[String] {
        &self.scope
    }

    /// The connection this transaction runs on.
    #[must_use]
    pub fn connection(&self) -> &'c Connection {
        self.conn
    }

    /// Registers a callback run once the transaction commits or aborts.
    ///
    /// It receives the terminal state. Callbacks registered after that
    /// point run immediately.
    pub fn on_complete(&self, hook: impl FnOnce(TransactionState) + Send + 'static) {
        let mut inner = self.inner.lock();
        if inner.state.is_terminal() {
            let state = inner.state;
            drop(inner);
            hook(state);
        } else {
            inner.hooks.push(Box::new(hook));
        }
    }

    /// Kind of the write failure that will abort this transaction at
    /// commit, if one is pending.
    #[must_use]
    pub fn pending_failure(&self) -> Option<ErrorKind> {
        self.inner.lock().failure.as_ref().map(|(kind, _)| *kind)
    }

    /// Marks a failed write as handled, so the transaction can still
    /// commit the writes that succeeded. Returns the kind of the failure
    /// that was pending.
    pub fn acknowledge(&self) -> Option<ErrorKind> {
        self.inner.lock().failure.take().map(|(kind, _)| kind)
    }

    fn active(&self) -> CoreResult<MutexGuard<'_, TxnInner>> {
        let inner = self.inner.lock();
        if inner.state == TransactionState::Active {
            Ok(inner)
        } else {
            Err(CoreError::TransactionInactive)
        }
    }

    /// Runs a read while the transaction is active.
    pub(crate) fn reading<R>(&self, f: impl FnOnce() -> CoreResult<R>) -> CoreResult<R> {
        let _inner = self.active()?;
        f()
    }

    /// Runs a record write while the transaction is active.
    pub(crate) fn writing<R>(&self, f: impl FnOnce(&mut TxnLog) -> CoreResult<R>) -> CoreResult<R> {
        let mut inner = self.active()?;
        if !self.mode.can_write() {
            return Err(CoreError::read_only());
        }
        let result = f(&mut inner.log);
        if let Err(e) = &result {
            inner.failure = Some((e.kind(), e.to_string()));
        }
        result
    }

    /// Runs a schema change; only upgrade transactions may.
    pub(crate) fn upgrading<R>(
        &self,
        f: impl FnOnce(&mut TxnLog) -> CoreResult<R>,
    ) -> CoreResult<R> {
        if self.mode != TransactionMode::Upgrade {
            return Err(CoreError::not_upgrade());
        }
        let mut inner = self.active()?;
        let result = f(&mut inner.log);
        if let Err(e) = &result {
            inner.failure = Some((e.kind(), e.to_string()));
        }
        result
    }

    /// Handle to a store in scope.
    ///
    /// # Errors
    ///
    /// Returns `StoreNotFound` if the store is outside the scope or does
    /// not exist, and `TransactionInactive` once the transaction finished.
    pub fn store(&self, name: &str) -> CoreResult<ObjectStore<'_>> {
        let data = self.reading(|| {
            if self.mode != TransactionMode::Upgrade && !self.scope.iter().any(|s| s == name) {
                return Err(CoreError::store_not_found(name));
            }
            self.db()
                .catalog()
                .stores
                .get(name)
                .cloned()
                .ok_or_else(|| CoreError::store_not_found(name))
        })?;
        Ok(ObjectStore::new(self, name.to_string(), data))
    }

    /// Names of all stores in the database, sorted.
    ///
    /// # Errors
    ///
    /// Returns `TransactionInactive` once the transaction has finished.
    pub fn store_names(&self) -> CoreResult<Vec<String>> {
        self.reading(|| Ok(self.db().catalog().stores.keys().cloned().collect()))
    }

    /// Creates an empty store.
    ///
    /// # Errors
    ///
    /// - `InvalidState` outside an upgrade transaction
    /// - `Constraint` if the name is taken
    /// - `InvalidArgument`/`InvalidKey` for invalid options
    pub fn create_store(&self, name: &str, options: StoreOptions) -> CoreResult<ObjectStore<'_>> {
        let meta = StoreMeta::new(name, options)?;
        let data = self.upgrading(|log| {
            let mut catalog = self.db().catalog_mut();
            if catalog.stores.contains_key(name) {
                return Err(CoreError::constraint(format!(
                    "object store {name:?} already exists"
                )));
            }
            let data = Arc::new(RwLock::new(StoreData::new(meta.clone())));
            catalog.stores.insert(name.to_string(), Arc::clone(&data));
            log.redo(WalOp::CreateStore { meta });
            Ok(data)
        })?;
        tracing::debug!(db = %self.db().name(), store = name, "object store created");
        Ok(ObjectStore::new(self, name.to_string(), data))
    }

    /// Removes a store with its records and indexes.
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` outside an upgrade transaction and
    /// `StoreNotFound` if there is no such store.
    pub fn delete_store(&self, name: &str) -> CoreResult<()> {
        self.upgrading(|log| {
            let removed = self
                .db()
                .catalog_mut()
                .stores
                .remove(name)
                .ok_or_else(|| CoreError::store_not_found(name))?;
            removed.write().mark_deleted();
            log.redo(WalOp::DeleteStore {
                name: name.to_string(),
            });
            Ok(())
        })?;
        tracing::debug!(db = %self.db().name(), store = name, "object store deleted");
        Ok(())
    }

    /// Creates an index on `store`; see [`ObjectStore::create_index`].
    ///
    /// # Errors
    ///
    /// As for [`ObjectStore::create_index`], plus `StoreNotFound`.
    pub fn create_index(
        &self,
        store: &str,
        name: &str,
        key_path: impl Into<KeyPath>,
        options: IndexOptions,
    ) -> CoreResult<()> {
        if self.mode != TransactionMode::Upgrade {
            return Err(CoreError::not_upgrade());
        }
        self.store(store)?.create_index(name, key_path, options)?;
        Ok(())
    }

    /// Removes an index from `store`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` outside an upgrade transaction, and
    /// `StoreNotFound`/`IndexNotFound` for unknown names.
    pub fn delete_index(&self, store: &str, name: &str) -> CoreResult<()> {
        if self.mode != TransactionMode::Upgrade {
            return Err(CoreError::not_upgrade());
        }
        self.store(store)?.delete_index(name)
    }

    /// Commits and reports the outcome.
    ///
    /// # Errors
    ///
    /// - `TransactionAborted` if the transaction was already aborted, or if
    ///   a write failed and was not acknowledged (the transaction is then
    ///   rolled back)
    /// - `QuotaExceeded` if the batch would exceed the configured quota
    /// - `CommitFailed` if the batch could not be made durable
    ///
    /// On error every write of the transaction has been rolled back.
    pub fn commit(self) -> CoreResult<()> {
        self.finish()
    }

    /// Rolls back every write and ends the transaction.
    ///
    /// # Errors
    ///
    /// Returns `TransactionInactive` if the transaction already finished.
    pub fn abort(&self) -> CoreResult<()> {
        let inner = self.active()?;
        self.abort_locked(inner);
        Ok(())
    }

    fn abort_locked(&self, mut inner: MutexGuard<'_, TxnInner>) {
        self.rollback(&mut inner);
        let hooks = self.settle(&mut inner, TransactionState::Aborted);
        drop(inner);
        tracing::debug!(txn = %self.id, "transaction aborted");
        run_hooks(hooks, TransactionState::Aborted);
    }

    fn finish(&self) -> CoreResult<()> {
        let mut inner = self.inner.lock();
        match inner.state {
            TransactionState::Active => {}
            TransactionState::Aborted => {
                return Err(CoreError::transaction_aborted("transaction was aborted"))
            }
            TransactionState::Committing | TransactionState::Committed => return Ok(()),
        }
        let failure = inner.failure.take();
        if let Some((kind, message)) = failure {
            self.abort_locked(inner);
            return Err(CoreError::transaction_aborted(format!(
                "unhandled {kind:?} failure: {message}"
            )));
        }
        inner.state = TransactionState::Committing;

        let redo = std::mem::take(&mut inner.log.redo);
        let result = if redo.is_empty() {
            Ok(None)
        } else {
            self.db().persist(self.id, redo).map(Some)
        };

        match result {
            Ok(sequence) => {
                inner.log.undo.clear();
                inner.snapshot = None;
                let hooks = self.settle(&mut inner, TransactionState::Committed);
                drop(inner);
                if let Some(sequence) = sequence {
                    tracing::debug!(txn = %self.id, %sequence, "transaction committed");
                    self.db().maybe_checkpoint();
                }
                run_hooks(hooks, TransactionState::Committed);
                Ok(())
            }
            Err(e) => {
                self.rollback(&mut inner);
                let hooks = self.settle(&mut inner, TransactionState::Aborted);
                drop(inner);
                tracing::warn!(txn = %self.id, error = %e, "commit failed; transaction rolled back");
                run_hooks(hooks, TransactionState::Aborted);
                Err(match e {
                    quota @ CoreError::QuotaExceeded { .. } => quota,
                    other => CoreError::commit_failed(other),
                })
            }
        }
    }

    fn rollback(&self, inner: &mut TxnInner) {
        inner.log.redo.clear();
        for undo in inner.log.undo.drain(..).rev() {
            if let Err(e) = undo.apply() {
                tracing::error!(txn = %self.id, error = %e, "failed to undo write");
            }
        }
        if let Some(snapshot) = inner.snapshot.take() {
            self.db().restore(snapshot);
        }
    }

    /// Moves to a terminal state and releases the locks.
    fn settle(&self, inner: &mut TxnInner, state: TransactionState) -> Vec<CompletionHook> {
        inner.state = state;
        if let Some(ticket) = inner.ticket.take() {
            self.db().locks().release(ticket);
        }
        std::mem::take(&mut inner.hooks)
    }
}

fn run_hooks(hooks: Vec<CompletionHook>, state: TransactionState) {
    for hook in hooks {
        hook(state);
    }
}

impl Drop for Transaction<'_> {
    fn drop(&mut self) {
        if self.inner.get_mut().state != TransactionState::Active {
            return;
        }
        if std::thread::panicking() {
            let inner = self.inner.lock();
            tracing::warn!(txn = %self.id, "transaction dropped during a panic; rolling back");
            self.abort_locked(inner);
            return;
        }
        if let Err(e) = self.finish() {
            tracing::warn!(txn = %self.id, error = %e, "auto-commit on drop failed");
        }
    }
}

impl std::fmt::Debug for Transaction<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transaction")
            .field("id", &self.id)
            .field("mode", &self.mode)
            .field("scope", &self.scope)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}
