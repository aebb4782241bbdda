//! Where a factory keeps each database's bytes.
//!
//! A [`BackendProvider`] maps database names to a WAL backend and a
//! checkpoint backend. The factory never touches files directly, so tests
//! can swap in failing or pre-seeded backends.

use crate::dir::{dir_name, name_from_dir, DatabaseDir};
use crate::error::CoreResult;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use strata_storage::{FileBackend, InMemoryBackend, StorageBackend};

/// Storage handed to one database while it is loaded.
pub struct DatabaseBackends {
    /// Write-ahead log.
    pub wal: Box<dyn StorageBackend>,
    /// Latest checkpoint image (empty when none was written yet).
    pub checkpoint: Box<dyn StorageBackend>,
    /// Locked directory, for directory-backed databases.
    pub dir: Option<DatabaseDir>,
}

impl std::fmt::Debug for DatabaseBackends {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatabaseBackends")
            .field("dir", &self.dir)
            .finish_non_exhaustive()
    }
}

/// Source of per-database storage.
pub trait BackendProvider: Send + Sync {
    /// Whether a database called `name` has been created.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying storage cannot be inspected.
    fn exists(&self, name: &str) -> CoreResult<bool>;

    /// Opens (creating if needed) the storage of `name`.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage cannot be opened or is locked.
    fn open(&self, name: &str) -> CoreResult<DatabaseBackends>;

    /// Removes everything stored for `name`.
    ///
    /// `held` is the directory lock of a database that was loaded until
    /// now; providers without directories ignore it.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage cannot be removed.
    fn destroy(&self, name: &str, held: Option<DatabaseDir>) -> CoreResult<()>;

    /// Names of every existing database.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage cannot be listed.
    fn list(&self) -> CoreResult<Vec<String>>;
}

/// Keeps every database in process memory.
#[derive(Debug, Default)]
pub struct MemoryProvider {
    databases: Mutex<BTreeMap<String, (InMemoryBackend, InMemoryBackend)>>,
}

impl MemoryProvider {
    /// Creates an empty provider.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl BackendProvider for MemoryProvider {
    fn exists(&self, name: &str) -> CoreResult<bool> {
        Ok(self.databases.lock().contains_key(name))
    }

    fn open(&self, name: &str) -> CoreResult<DatabaseBackends> {
        let mut databases = self.databases.lock();
        let (wal, checkpoint) = databases.entry(name.to_string()).or_default();
        Ok(DatabaseBackends {
            wal: Box::new(wal.share()),
            checkpoint: Box::new(checkpoint.share()),
            dir: None,
        })
    }

    fn destroy(&self, name: &str, _held: Option<DatabaseDir>) -> CoreResult<()> {
        self.databases.lock().remove(name);
        Ok(())
    }

    fn list(&self) -> CoreResult<Vec<String>> {
        Ok(self.databases.lock().keys().cloned().collect())
    }
}

/// Keeps one locked directory per database under a root directory.
#[derive(Debug)]
pub struct DirectoryProvider {
    root: PathBuf,
}

impl DirectoryProvider {
    /// Uses `root`, creating it if missing.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the root cannot be created.
    pub fn new(root: &Path) -> CoreResult<Self> {
        fs::create_dir_all(root)?;
        Ok(Self {
            root: root.to_path_buf(),
        })
    }

    /// Root directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory holding database `name`, whether or not it exists.
    #[must_use]
    pub fn database_path(&self, name: &str) -> PathBuf {
        self.root.join(dir_name(name))
    }
}

impl BackendProvider for DirectoryProvider {
    fn exists(&self, name: &str) -> CoreResult<bool> {
        Ok(self.database_path(name).is_dir())
    }

    fn open(&self, name: &str) -> CoreResult<DatabaseBackends> {
        let dir = DatabaseDir::open(&self.database_path(name), true)?;
        let wal = FileBackend::open(&dir.wal_path())?;
        let checkpoint = FileBackend::open(&dir.checkpoint_path())?;
        Ok(DatabaseBackends {
            wal: Box::new(wal),
            checkpoint: Box::new(checkpoint),
            dir: Some(dir),
        })
    }

    fn destroy(&self, name: &str, held: Option<DatabaseDir>) -> CoreResult<()> {
        match held {
            Some(dir) => dir.destroy(),
            None => {
                let path = self.database_path(name);
                if path.exists() {
                    DatabaseDir::open(&path, false)?.destroy()?;
                }
                Ok(())
            }
        }
    }

    fn list(&self) -> CoreResult<Vec<String>> {
        let mut names = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            if let Some(name) = entry.file_name().to_str().and_then(name_from_dir) {
                names.push(name);
            }
        }
        names.sort();
        Ok(names)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn memory_provider_shares_buffers() {
        let provider = MemoryProvider::new();
        assert!(!provider.exists("library").unwrap());

        let mut first = provider.open("library").unwrap();
        first.wal.append(b"abc").unwrap();
        let second = provider.open("library").unwrap();
        assert_eq!(second.wal.read_all().unwrap(), b"abc");
        assert_eq!(provider.list().unwrap(), vec!["library".to_string()]);

        provider.destroy("library", None).unwrap();
        assert!(!provider.exists("library").unwrap());
    }

    #[test]
    fn directory_provider_lists_and_destroys() {
        let temp = tempdir().unwrap();
        let provider = DirectoryProvider::new(temp.path()).unwrap();

        let backends = provider.open("library").unwrap();
        assert!(provider.exists("library").unwrap());
        std::fs::write(temp.path().join("stray-file"), b"x").unwrap();
        assert_eq!(provider.list().unwrap(), vec!["library".to_string()]);

        provider.destroy("library", backends.dir).unwrap();
        assert!(!provider.exists("library").unwrap());
        assert!(provider.list().unwrap().is_empty());
    }

    #[test]
    fn directory_provider_destroys_unloaded_database() {
        let temp = tempdir().unwrap();
        let provider = DirectoryProvider::new(temp.path()).unwrap();
        drop(provider.open("archive").unwrap());

        provider.destroy("archive", None).unwrap();
        assert!(!provider.exists("archive").unwrap());
        provider.destroy("never-created", None).unwrap();
    }
}
