//! State shared by every connection to one database.

use crate::checkpoint::{CheckpointImage, StoreImage};
use crate::config::Config;
use crate::database::connection::VersionChangeEvent;
use crate::dir::DatabaseDir;
use crate::error::{CoreError, CoreResult};
use crate::store::StoreData;
use crate::transaction::{LockManager, LockRequest};
use crate::types::{SequenceNumber, TransactionId};
use crate::wal::{WalOp, WalRecord, WalWriter};
use parking_lot::{Condvar, Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::Sender;
use std::sync::Arc;
use std::time::{Duration, Instant};
use strata_storage::StorageBackend;

/// Version and stores of a database.
pub(crate) struct Catalog {
    pub(crate) version: u64,
    pub(crate) stores: BTreeMap<String, Arc<RwLock<StoreData>>>,
}

/// Catalog as it stood before an upgrade. Store contents are not copied;
/// writes made during the upgrade are reversed through its undo log.
pub(crate) struct Snapshot {
    version: u64,
    stores: BTreeMap<String, Arc<RwLock<StoreData>>>,
}

/// Log, checkpoint and the last committed sequence; guarded together so
/// commits and checkpoints never interleave.
pub(crate) struct Durability {
    pub(crate) wal: WalWriter,
    pub(crate) checkpoint: Box<dyn StorageBackend>,
    pub(crate) sequence: SequenceNumber,
}

#[derive(Default)]
struct Registry {
    next_id: u64,
    senders: HashMap<u64, Sender<VersionChangeEvent>>,
}

/// One loaded database.
pub(crate) struct DatabaseShared {
    name: String,
    config: Config,
    catalog: RwLock<Catalog>,
    durability: Mutex<Durability>,
    locks: LockManager,
    next_txid: AtomicU64,
    connections: Mutex<Registry>,
    closed: Condvar,
    dir: Mutex<Option<DatabaseDir>>,
}

impl DatabaseShared {
    pub(crate) fn new(
        name: &str,
        config: Config,
        catalog: Catalog,
        durability: Durability,
        next_txid: u64,
        dir: Option<DatabaseDir>,
    ) -> Self {
        Self {
            name: name.to_string(),
            config,
            catalog: RwLock::new(catalog),
            durability: Mutex::new(durability),
            locks: LockManager::new(),
            next_txid: AtomicU64::new(next_txid),
            connections: Mutex::new(Registry::default()),
            closed: Condvar::new(),
            dir: Mutex::new(dir),
        }
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn config(&self) -> &Config {
        &self.config
    }

    pub(crate) fn catalog(&self) -> RwLockReadGuard<'_, Catalog> {
        self.catalog.read()
    }

    pub(crate) fn catalog_mut(&self) -> RwLockWriteGuard<'_, Catalog> {
        self.catalog.write()
    }

    pub(crate) fn locks(&self) -> &LockManager {
        &self.locks
    }

    pub(crate) fn next_txid(&self) -> TransactionId {
        TransactionId::new(self.next_txid.fetch_add(1, Ordering::SeqCst))
    }

    pub(crate) fn version(&self) -> u64 {
        self.catalog.read().version
    }

    pub(crate) fn store_names(&self) -> Vec<String> {
        self.catalog.read().stores.keys().cloned().collect()
    }

    pub(crate) fn last_sequence(&self) -> SequenceNumber {
        self.durability.lock().sequence
    }

    /// Takes the directory lock out, so the directory can be destroyed.
    pub(crate) fn take_dir(&self) -> Option<DatabaseDir> {
        self.dir.lock().take()
    }

    pub(crate) fn snapshot(&self) -> Snapshot {
        let catalog = self.catalog.read();
        Snapshot {
            version: catalog.version,
            stores: catalog.stores.clone(),
        }
    }

    /// Puts a snapshot's catalog back. Stores created since stop working;
    /// stores deleted since come back.
    pub(crate) fn restore(&self, snapshot: Snapshot) {
        let mut catalog = self.catalog.write();
        for data in catalog.stores.values() {
            if !snapshot.stores.values().any(|kept| Arc::ptr_eq(kept, data)) {
                data.write().mark_deleted();
            }
        }
        for data in snapshot.stores.values() {
            data.write().revive();
        }
        catalog.version = snapshot.version;
        catalog.stores = snapshot.stores;
    }

    /// Appends one committed batch and makes it durable.
    ///
    /// # Errors
    ///
    /// - `QuotaExceeded` if the batch does not fit the configured quota;
    ///   nothing is written in that case
    /// - the storage error of a failed write or flush
    pub(crate) fn persist(
        &self,
        txid: TransactionId,
        ops: Vec<WalOp>,
    ) -> CoreResult<SequenceNumber> {
        let mut durability = self.durability.lock();
        let sequence = durability.sequence.next();

        let mut records = Vec::with_capacity(ops.len() + 2);
        records.push(WalRecord::Begin { txid });
        records.extend(ops.into_iter().map(|op| WalRecord::Op { txid, op }));
        records.push(WalRecord::Commit { txid, sequence });
        let batch = WalWriter::encode_batch(&records)?;

        if let Some(limit) = self.config.quota_bytes {
            let required =
                durability.wal.size()? + durability.checkpoint.size()? + batch.len() as u64;
            if required > limit {
                return Err(CoreError::QuotaExceeded { limit, required });
            }
        }

        durability.wal.append_encoded(&batch)?;
        durability.sequence = sequence;
        Ok(sequence)
    }

    /// Writes a checkpoint image and empties the WAL, waiting for every
    /// transaction to finish first.
    ///
    /// # Errors
    ///
    /// Returns `LockTimeout` if the configured lock timeout elapses, or the
    /// storage error of a failed write. A failed image leaves the previous
    /// checkpoint and the WAL untouched.
    pub(crate) fn checkpoint(&self) -> CoreResult<()> {
        let ticket = self
            .locks
            .acquire(LockRequest::Database, self.config.lock_timeout)?;
        let result = self.write_checkpoint();
        self.locks.release(ticket);
        result
    }

    /// Checkpoints after a commit once the WAL has grown past the configured
    /// size. Skipped while other transactions hold locks.
    pub(crate) fn maybe_checkpoint(&self) {
        let threshold = self.config.auto_checkpoint_bytes;
        if threshold == 0 {
            return;
        }
        let size = self.durability.lock().wal.size();
        match size {
            Ok(size) if size > threshold => {}
            Ok(_) => return,
            Err(e) => {
                tracing::warn!(db = %self.name, error = %e, "cannot read WAL size");
                return;
            }
        }

        let Some(ticket) = self.locks.try_acquire(LockRequest::Database) else {
            tracing::debug!(db = %self.name, "automatic checkpoint deferred; database busy");
            return;
        };
        if let Err(e) = self.write_checkpoint() {
            tracing::warn!(db = %self.name, error = %e, "automatic checkpoint failed");
        }
        self.locks.release(ticket);
    }

    /// Caller holds the database-exclusive lock.
    fn write_checkpoint(&self) -> CoreResult<()> {
        let (version, stores) = {
            let catalog = self.catalog.read();
            let stores = catalog
                .stores
                .values()
                .map(|data| {
                    let data = data.read();
                    StoreImage {
                        meta: data.meta(),
                        counter: data.counter(),
                        records: data.records().clone(),
                    }
                })
                .collect::<Vec<_>>();
            (catalog.version, stores)
        };

        let mut durability = self.durability.lock();
        let image = CheckpointImage {
            format: self.config.format_version,
            version,
            sequence: durability.sequence,
            stores,
        };
        let bytes = image.encode()?;
        durability.checkpoint.replace(&bytes)?;
        let wal_bytes = durability.wal.size()?;
        durability.wal.clear()?;

        tracing::info!(
            db = %self.name,
            sequence = %image.sequence,
            checkpoint_bytes = bytes.len(),
            wal_bytes,
            "checkpoint written"
        );
        Ok(())
    }

    /// Registers a connection's event channel; returns its ID.
    pub(crate) fn register(&self, sender: Sender<VersionChangeEvent>) -> u64 {
        let mut registry = self.connections.lock();
        registry.next_id += 1;
        let id = registry.next_id;
        registry.senders.insert(id, sender);
        id
    }

    pub(crate) fn unregister(&self, id: u64) {
        self.connections.lock().senders.remove(&id);
        self.closed.notify_all();
    }

    pub(crate) fn connection_count(&self) -> usize {
        self.connections.lock().senders.len()
    }

    /// Sends `event` to every open connection, then waits up to `timeout`
    /// for all of them to close. Returns how many are still open.
    pub(crate) fn notify_and_wait(&self, event: &VersionChangeEvent, timeout: Duration) -> usize {
        let deadline = Instant::now() + timeout;
        let mut registry = self.connections.lock();
        if registry.senders.is_empty() {
            return 0;
        }

        tracing::info!(
            db = %self.name,
            connections = registry.senders.len(),
            old_version = event.old_version,
            new_version = ?event.new_version,
            "notifying open connections of version change"
        );
        for (id, sender) in &registry.senders {
            if sender.send(event.clone()).is_err() {
                tracing::trace!(db = %self.name, connection = id, "event receiver gone");
            }
        }

        while !registry.senders.is_empty() {
            if self.closed.wait_until(&mut registry, deadline).timed_out() {
                break;
            }
        }
        registry.senders.len()
    }
}

impl std::fmt::Debug for DatabaseShared {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatabaseShared")
            .field("name", &self.name)
            .field("version", &self.version())
            .field("connections", &self.connection_count())
            .finish_non_exhaustive()
    }
}
