//! Test fixtures and database helpers.
//!
//! Provides factories over temporary storage, a fault-injecting provider
//! and the "library" schema most scenarios start from.

use std::ops::Deref;
use std::path::Path;
use strata_codec::Value;
use strata_core::{
    BackendProvider, Config, Connection, CoreResult, DatabaseBackends, DatabaseDir,
    DatabaseFactory, IndexOptions, MemoryProvider, StoreOptions, Transaction, TransactionMode,
};
use strata_storage::{FaultSwitch, FaultyBackend};
use tempfile::TempDir;
use tracing_subscriber::EnvFilter;

/// Name of the library database.
pub const LIBRARY: &str = "library";
/// Store created at version 1, keyed by `id`.
pub const BOOKS: &str = "books";
/// Unique index on `price`, added at version 2.
pub const PRICE_IDX: &str = "price_idx";

/// Installs a `fmt` subscriber honoring `RUST_LOG`. Safe to call from every
/// test.
pub fn init_tracing() {
    // Fails only when a subscriber is already installed.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Upgrade callback of the library schema.
///
/// Version 1 creates `books` keyed by `id`; version 2 adds the unique
/// `price_idx` index.
///
/// # Errors
///
/// Propagates schema errors.
pub fn library_upgrade(txn: &Transaction<'_>, old: u64, new: u64) -> CoreResult<()> {
    if old < 1 && new >= 1 {
        txn.create_store(BOOKS, StoreOptions::new().key_path("id"))?;
    }
    if old < 2 && new >= 2 {
        txn.create_index(BOOKS, PRICE_IDX, "price", IndexOptions::new().unique(true))?;
    }
    Ok(())
}

/// A book record.
#[must_use]
pub fn book(id: &str, price: i64) -> Value {
    Value::object([("id", Value::from(id)), ("price", Value::Integer(price))])
}

/// Provider over process memory whose backends fail on demand.
#[derive(Debug, Default)]
pub struct FaultyProvider {
    inner: MemoryProvider,
    switch: FaultSwitch,
}

impl FaultyProvider {
    /// Creates a provider controlled by `switch`.
    #[must_use]
    pub fn new(switch: FaultSwitch) -> Self {
        Self {
            inner: MemoryProvider::new(),
            switch,
        }
    }
}

impl BackendProvider for FaultyProvider {
    fn exists(&self, name: &str) -> CoreResult<bool> {
        self.inner.exists(name)
    }

    fn open(&self, name: &str) -> CoreResult<DatabaseBackends> {
        let backends = self.inner.open(name)?;
        Ok(DatabaseBackends {
            wal: Box::new(FaultyBackend::new(backends.wal, self.switch.clone())),
            checkpoint: Box::new(FaultyBackend::new(backends.checkpoint, self.switch.clone())),
            dir: None,
        })
    }

    fn destroy(&self, name: &str, held: Option<DatabaseDir>) -> CoreResult<()> {
        self.inner.destroy(name, held)
    }

    fn list(&self) -> CoreResult<Vec<String>> {
        self.inner.list()
    }
}

/// A factory with automatic cleanup of its storage.
pub struct TestFactory {
    /// The factory instance.
    pub factory: DatabaseFactory,
    /// Fault switch, for factories built with [`TestFactory::faulty`].
    pub switch: Option<FaultSwitch>,
    /// The temporary directory (kept alive to prevent cleanup).
    temp_dir: Option<TempDir>,
}

impl TestFactory {
    /// An in-memory factory.
    pub fn memory() -> Self {
        Self::memory_with(Config::default())
    }

    /// An in-memory factory with `config`.
    pub fn memory_with(config: Config) -> Self {
        init_tracing();
        Self {
            factory: DatabaseFactory::in_memory(config),
            switch: None,
            temp_dir: None,
        }
    }

    /// A factory over a fresh temporary directory.
    pub fn dir() -> Self {
        Self::dir_with(Config::default())
    }

    /// A factory over a fresh temporary directory, with `config`.
    pub fn dir_with(config: Config) -> Self {
        init_tracing();
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let factory =
            DatabaseFactory::open_dir(temp_dir.path(), config).expect("Failed to open factory");
        Self {
            factory,
            switch: None,
            temp_dir: Some(temp_dir),
        }
    }

    /// An in-memory factory whose storage fails when told to.
    pub fn faulty(config: Config) -> Self {
        init_tracing();
        let switch = FaultSwitch::new();
        let provider = FaultyProvider::new(switch.clone());
        Self {
            factory: DatabaseFactory::with_backends(config, Box::new(provider)),
            switch: Some(switch),
            temp_dir: None,
        }
    }

    /// The storage directory, for directory-backed factories.
    pub fn path(&self) -> Option<&Path> {
        self.temp_dir.as_ref().map(TempDir::path)
    }

    /// Drops the factory and opens a new one over the same directory, as a
    /// process restart would. Every connection must be closed first.
    ///
    /// # Panics
    ///
    /// Panics for in-memory factories.
    pub fn restart(self) -> Self {
        let Self {
            factory, temp_dir, ..
        } = self;
        let config = factory.config().clone();
        drop(factory);
        let temp_dir = temp_dir.expect("only directory factories can restart");
        let factory =
            DatabaseFactory::open_dir(temp_dir.path(), config).expect("Failed to reopen factory");
        Self {
            factory,
            switch: None,
            temp_dir: Some(temp_dir),
        }
    }

    /// Opens the library database at `version`.
    ///
    /// # Errors
    ///
    /// As for [`DatabaseFactory::open`].
    pub fn open_library(&self, version: u64) -> CoreResult<Connection> {
        self.factory.open(LIBRARY, version, library_upgrade)
    }

    /// Stores `value` in `store` in its own transaction.
    ///
    /// # Errors
    ///
    /// Propagates the write or commit error.
    pub fn put(conn: &Connection, store: &str, value: Value) -> CoreResult<()> {
        conn.run(&[store], TransactionMode::ReadWrite, |txn| {
            txn.store(store)?.put(value, None)?;
            Ok(())
        })
    }
}

impl Deref for TestFactory {
    type Target = DatabaseFactory;

    fn deref(&self) -> &Self::Target {
        &self.factory
    }
}

/// Test scenario helpers.
pub mod scenarios {
    use super::*;

    /// A library at version 1 holding `count` books `b000`, `b001`, ...
    /// priced 0, 1, ...
    pub fn populated_library(count: usize) -> (TestFactory, Connection) {
        let fixture = TestFactory::memory();
        let conn = fixture.open_library(1).expect("Failed to open library");
        conn.run(&[BOOKS], TransactionMode::ReadWrite, |txn| {
            let books = txn.store(BOOKS)?;
            for i in 0..count {
                books.add(book(&format!("b{i:03}"), i as i64), None)?;
            }
            Ok(())
        })
        .expect("Failed to populate library");
        (fixture, conn)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_core::KeyRange;

    #[test]
    fn memory_factory_opens_library() {
        let fixture = TestFactory::memory();
        let conn = fixture.open_library(1).unwrap();
        assert_eq!(conn.store_names(), vec![BOOKS.to_string()]);
        assert!(fixture.path().is_none());
    }

    #[test]
    fn populated_scenario() {
        let (_fixture, conn) = scenarios::populated_library(12);
        let count = conn
            .run(&[BOOKS], TransactionMode::ReadOnly, |txn| {
                txn.store(BOOKS)?.count(KeyRange::all())
            })
            .unwrap();
        assert_eq!(count, 12);
    }

    #[test]
    fn restart_keeps_directory() {
        let fixture = TestFactory::dir();
        drop(fixture.open_library(1).unwrap());
        let path = fixture.path().unwrap().to_path_buf();

        let fixture = fixture.restart();
        assert_eq!(fixture.path(), Some(path.as_path()));
        assert_eq!(fixture.databases().unwrap(), vec![(LIBRARY.to_string(), 1)]);
    }
}
