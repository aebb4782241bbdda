//! Opening, upgrading and deleting databases.

use crate::config::Config;
use crate::database::connection::{Connection, VersionChangeEvent};
use crate::database::provider::{BackendProvider, DirectoryProvider, MemoryProvider};
use crate::database::shared::DatabaseShared;
use crate::error::{CoreError, CoreResult};
use crate::transaction::{Transaction, TransactionState};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

struct FactoryInner {
    config: Config,
    provider: Box<dyn BackendProvider>,
    /// Databases loaded into memory, by name.
    loaded: Mutex<HashMap<String, Arc<DatabaseShared>>>,
    /// Serializes open and delete calls per name.
    gates: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

/// Namespace of named, versioned databases.
///
/// Every database a factory opens stays loaded until it is deleted, so
/// later `open` calls share its state. Clones share the same namespace.
///
/// # Example
///
/// ```rust,ignore
/// use strata_core::{Config, DatabaseFactory, StoreOptions};
///
/// let factory = DatabaseFactory::open_dir(Path::new("data"), Config::default())?;
/// let conn = factory.open("library", 1, |txn, old, _new| {
///     if old < 1 {
///         txn.create_store("books", StoreOptions::new().key_path("isbn"))?;
///     }
///     Ok(())
/// })?;
/// ```
#[derive(Clone)]
pub struct DatabaseFactory {
    inner: Arc<FactoryInner>,
}

impl DatabaseFactory {
    /// A factory whose databases live only in memory.
    #[must_use]
    pub fn in_memory(config: Config) -> Self {
        Self::with_backends(config, Box::new(MemoryProvider::new()))
    }

    /// A factory keeping one directory per database under `path`.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if `path` cannot be created.
    pub fn open_dir(path: &Path, config: Config) -> CoreResult<Self> {
        Ok(Self::with_backends(
            config,
            Box::new(DirectoryProvider::new(path)?),
        ))
    }

    /// A factory over custom storage.
    #[must_use]
    pub fn with_backends(config: Config, provider: Box<dyn BackendProvider>) -> Self {
        Self {
            inner: Arc::new(FactoryInner {
                config,
                provider,
                loaded: Mutex::new(HashMap::new()),
                gates: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Configuration shared by every database of this factory.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    fn gate(&self, name: &str) -> Arc<Mutex<()>> {
        Arc::clone(
            self.inner
                .gates
                .lock()
                .entry(name.to_string())
                .or_default(),
        )
    }

    /// Returns the loaded database, recovering it from storage first if
    /// needed. The flag is set when the database did not exist before.
    /// Callers hold the gate of `name`.
    fn load(&self, name: &str) -> CoreResult<(Arc<DatabaseShared>, bool)> {
        if let Some(db) = self.inner.loaded.lock().get(name) {
            return Ok((Arc::clone(db), false));
        }

        let created = !self.inner.provider.exists(name)?;
        let backends = self.inner.provider.open(name)?;
        let db = Arc::new(DatabaseShared::recover(
            name,
            self.inner.config.clone(),
            backends,
        )?);
        if created {
            tracing::info!(db = name, "database created");
        }
        self.inner
            .loaded
            .lock()
            .insert(name.to_string(), Arc::clone(&db));
        Ok((db, created))
    }

    /// Unloads `name` and removes its storage. Callers hold the gate.
    fn remove(&self, name: &str) -> CoreResult<()> {
        let held = match self.inner.loaded.lock().remove(name) {
            Some(db) => db.take_dir(),
            None => None,
        };
        self.inner.provider.destroy(name, held)
    }

    /// Opens database `name` at `version`, upgrading it first if it is
    /// older.
    ///
    /// An unknown database is created at version 0. When `version` is
    /// newer than the stored version, every open connection receives a
    /// [`VersionChangeEvent`]; once they have all closed, `upgrade` runs
    /// exactly once inside an upgrade transaction with the old and new
    /// versions. It is the only place stores and indexes can be created
    /// or removed.
    ///
    /// # Errors
    ///
    /// - `InvalidArgument` for version 0
    /// - `Version` if `version` is lower than the stored version; `upgrade`
    ///   is not called
    /// - `Blocked` if connections are still open after the configured
    ///   blocked timeout; retry once they close
    /// - the error returned by `upgrade`, after the upgrade has been rolled
    ///   back (a database created by this call is removed again)
    /// - `CommitFailed`/`QuotaExceeded` if the upgrade cannot be committed
    pub fn open<F>(&self, name: &str, version: u64, upgrade: F) -> CoreResult<Connection>
    where
        F: FnOnce(&Transaction<'_>, u64, u64) -> CoreResult<()>,
    {
        if version == 0 {
            return Err(CoreError::invalid_argument("database version must be positive"));
        }

        let gate = self.gate(name);
        let _serial = gate.lock();
        let (db, created) = self.load(name)?;
        let current = db.version();

        if version < current {
            return Err(CoreError::Version {
                requested: version,
                current,
            });
        }
        if version == current {
            return Ok(Connection::new(db, self.clone()));
        }

        let event = VersionChangeEvent {
            old_version: current,
            new_version: Some(version),
        };
        let open_connections = db.notify_and_wait(&event, self.inner.config.blocked_timeout);
        if open_connections > 0 {
            tracing::info!(db = name, open_connections, "upgrade blocked");
            return Err(CoreError::Blocked {
                name: name.to_string(),
                open_connections,
            });
        }

        tracing::info!(db = name, old_version = current, new_version = version, "upgrade started");
        let conn = Connection::new(db, self.clone());
        match Self::upgrade(&conn, current, version, upgrade) {
            Ok(()) => {
                tracing::info!(db = name, version, "upgrade finished");
                Ok(conn)
            }
            Err(e) => {
                tracing::warn!(db = name, error = %e, "upgrade aborted");
                drop(conn);
                if created {
                    if let Err(cleanup) = self.remove(name) {
                        tracing::error!(db = name, error = %cleanup, "failed to remove database");
                    }
                }
                Err(e)
            }
        }
    }

    fn upgrade<F>(conn: &Connection, old: u64, new: u64, upgrade: F) -> CoreResult<()>
    where
        F: FnOnce(&Transaction<'_>, u64, u64) -> CoreResult<()>,
    {
        let txn = Transaction::begin_upgrade(conn, new)?;
        match upgrade(&txn, old, new) {
            Ok(()) => txn.commit(),
            Err(e) => {
                if txn.state() == TransactionState::Active {
                    txn.abort()?;
                }
                Err(e)
            }
        }
    }

    /// Deletes database `name` with all its stores.
    ///
    /// Open connections are sent a [`VersionChangeEvent`] with
    /// `new_version: None` first. Deleting an unknown database does
    /// nothing.
    ///
    /// # Errors
    ///
    /// Returns `DatabaseInUse` if connections are still open after the
    /// configured blocked timeout, or an I/O error if the storage cannot be
    /// removed.
    pub fn delete_database(&self, name: &str) -> CoreResult<()> {
        let gate = self.gate(name);
        let _serial = gate.lock();

        let loaded = self.inner.loaded.lock().get(name).cloned();
        match loaded {
            Some(db) => {
                let event = VersionChangeEvent {
                    old_version: db.version(),
                    new_version: None,
                };
                let open_connections =
                    db.notify_and_wait(&event, self.inner.config.blocked_timeout);
                if open_connections > 0 {
                    return Err(CoreError::DatabaseInUse {
                        name: name.to_string(),
                        open_connections,
                    });
                }
            }
            None if !self.inner.provider.exists(name)? => return Ok(()),
            None => {}
        }

        self.remove(name)?;
        tracing::info!(db = name, "database deleted");
        Ok(())
    }

    /// Names and versions of every existing database, sorted by name.
    ///
    /// # Errors
    ///
    /// Returns an error if storage cannot be listed or a database cannot
    /// be loaded.
    pub fn databases(&self) -> CoreResult<Vec<(String, u64)>> {
        let mut names = self.inner.provider.list()?;
        names.sort();
        names
            .into_iter()
            .map(|name| {
                let gate = self.gate(&name);
                let _serial = gate.lock();
                let (db, _) = self.load(&name)?;
                let version = db.version();
                Ok((name, version))
            })
            .collect()
    }
}

impl std::fmt::Debug for DatabaseFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatabaseFactory")
            .field("config", &self.inner.config)
            .field("loaded", &self.inner.loaded.lock().len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{IndexOptions, StoreOptions};
    use crate::key_range::KeyRange;
    use crate::types::TransactionMode;
    use std::time::Duration;
    use strata_codec::Value;

    fn factory() -> DatabaseFactory {
        DatabaseFactory::in_memory(Config::default())
    }

    fn create_books(txn: &Transaction<'_>, _old: u64, _new: u64) -> CoreResult<()> {
        txn.create_store("books", StoreOptions::new().key_path("isbn"))?;
        Ok(())
    }

    #[test]
    fn version_zero_is_rejected() {
        assert!(matches!(
            factory().open("library", 0, |_, _, _| Ok(())),
            Err(CoreError::InvalidArgument { .. })
        ));
    }

    #[test]
    fn first_open_runs_upgrade_once() {
        let factory = factory();
        let mut calls = Vec::new();
        let conn = factory
            .open("library", 1, |txn, old, new| {
                calls.push((old, new));
                create_books(txn, old, new)
            })
            .unwrap();
        assert_eq!(calls, vec![(0, 1)]);
        assert_eq!(conn.version(), 1);
        assert_eq!(conn.store_names(), vec!["books".to_string()]);
        drop(conn);

        let again = factory
            .open("library", 1, |_, _, _| panic!("upgrade must not run"))
            .unwrap();
        assert_eq!(again.version(), 1);
    }

    #[test]
    fn lower_version_is_version_error() {
        let factory = factory();
        drop(factory.open("library", 2, create_books).unwrap());
        assert!(matches!(
            factory.open("library", 1, |_, _, _| panic!("must not run")),
            Err(CoreError::Version {
                requested: 1,
                current: 2
            })
        ));
    }

    #[test]
    fn failed_first_upgrade_removes_database() {
        let factory = factory();
        let result = factory.open("library", 1, |txn, old, new| {
            create_books(txn, old, new)?;
            Err(CoreError::invalid_state("not today"))
        });
        assert!(matches!(result, Err(CoreError::InvalidState { .. })));
        assert!(factory.databases().unwrap().is_empty());
    }

    #[test]
    fn failed_upgrade_restores_previous_schema() {
        let factory = factory();
        drop(factory.open("library", 1, create_books).unwrap());

        let result = factory.open("library", 2, |txn, _, _| {
            txn.delete_store("books")?;
            txn.create_store("magazines", StoreOptions::new())?;
            Err(CoreError::constraint("abandon"))
        });
        assert!(matches!(result, Err(CoreError::Constraint { .. })));

        let conn = factory.open("library", 1, |_, _, _| Ok(())).unwrap();
        assert_eq!(conn.version(), 1);
        assert_eq!(conn.store_names(), vec!["books".to_string()]);
    }

    #[test]
    fn failed_upgrade_reverses_record_and_index_changes() {
        let factory = factory();
        let conn = factory
            .open("library", 1, |txn, old, new| {
                create_books(txn, old, new)?;
                txn.store("books")?
                    .create_index("by_title", "title", IndexOptions::new())?;
                Ok(())
            })
            .unwrap();
        conn.run(&["books"], TransactionMode::ReadWrite, |txn| {
            txn.store("books")?.put(
                Value::object([("isbn", Value::Integer(1)), ("title", Value::from("Dune"))]),
                None,
            )?;
            Ok(())
        })
        .unwrap();
        drop(conn);

        let result = factory.open("library", 2, |txn, _, _| {
            let books = txn.store("books")?;
            books.put(
                Value::object([("isbn", Value::Integer(1)), ("title", Value::from("Emma"))]),
                None,
            )?;
            books.put(
                Value::object([("isbn", Value::Integer(2)), ("title", Value::from("Ubik"))]),
                None,
            )?;
            books.create_index("by_isbn", "isbn", IndexOptions::new())?;
            books.delete_index("by_title")?;
            txn.delete_store("books")?;
            Err(CoreError::constraint("abandon"))
        });
        assert!(matches!(result, Err(CoreError::Constraint { .. })));

        let conn = factory.open("library", 1, |_, _, _| Ok(())).unwrap();
        conn.run(&["books"], TransactionMode::ReadOnly, |txn| {
            let books = txn.store("books")?;
            assert_eq!(books.index_names()?, vec!["by_title".to_string()]);
            assert_eq!(books.count(KeyRange::all())?, 1);
            let by_title = books.index("by_title")?;
            assert_eq!(by_title.count("Dune")?, 1);
            assert_eq!(by_title.count("Emma")?, 0);
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn open_connection_blocks_upgrade() {
        let factory = factory();
        let conn = factory.open("library", 1, create_books).unwrap();

        let result = factory.open("library", 2, |_, _, _| panic!("must not run"));
        assert!(matches!(
            result,
            Err(CoreError::Blocked {
                open_connections: 1,
                ..
            })
        ));
        assert_eq!(
            conn.next_version_change(),
            Some(VersionChangeEvent {
                old_version: 1,
                new_version: Some(2)
            })
        );

        conn.close();
        let upgraded = factory.open("library", 2, |_, _, _| Ok(())).unwrap();
        assert_eq!(upgraded.version(), 2);
    }

    #[test]
    fn closing_within_blocked_timeout_unblocks_upgrade() {
        let factory =
            DatabaseFactory::in_memory(Config::default().blocked_timeout(Duration::from_secs(10)));
        let conn = factory.open("library", 1, create_books).unwrap();

        let closer = std::thread::spawn(move || {
            let event = conn.wait_version_change(Duration::from_secs(10));
            assert_eq!(event.and_then(|e| e.new_version), Some(2));
            conn.close();
        });

        let upgraded = factory.open("library", 2, |_, _, _| Ok(())).unwrap();
        assert_eq!(upgraded.version(), 2);
        closer.join().unwrap();
    }

    #[test]
    fn delete_database_in_use_then_gone() {
        let factory = factory();
        let conn = factory.open("library", 1, create_books).unwrap();
        conn.run(&["books"], TransactionMode::ReadWrite, |txn| {
            txn.store("books")?
                .put(Value::object([("isbn", Value::Integer(1))]), None)?;
            Ok(())
        })
        .unwrap();

        assert!(matches!(
            factory.delete_database("library"),
            Err(CoreError::DatabaseInUse { .. })
        ));
        assert_eq!(
            conn.next_version_change().map(|e| e.new_version),
            Some(None)
        );

        drop(conn);
        factory.delete_database("library").unwrap();
        assert!(factory.databases().unwrap().is_empty());
        factory.delete_database("never-existed").unwrap();

        let fresh = factory.open("library", 1, create_books).unwrap();
        let count = fresh
            .run(&["books"], TransactionMode::ReadOnly, |txn| {
                txn.store("books")?.count(KeyRange::all())
            })
            .unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn databases_lists_names_and_versions() {
        let factory = factory();
        drop(factory.open("b-side", 3, |_, _, _| Ok(())).unwrap());
        drop(factory.open("a-side", 1, |_, _, _| Ok(())).unwrap());
        assert_eq!(
            factory.databases().unwrap(),
            vec![("a-side".to_string(), 1), ("b-side".to_string(), 3)]
        );
    }
}
