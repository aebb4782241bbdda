//! Database directory management.
//!
//! A directory-backed factory keeps one directory per database:
//!
//! ```text
//! <root>/
//! └─ db-<hex name>/
//!    ├─ LOCK          # Advisory lock, held while the database is loaded
//!    ├─ wal.log       # Write-ahead log
//!    └─ CHECKPOINT    # Latest checkpoint image
//! ```
//!
//! Database names are hex-encoded so any string is a valid name.

use crate::error::{CoreError, CoreResult};
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};

const LOCK_FILE: &str = "LOCK";
const WAL_FILE: &str = "wal.log";
const CHECKPOINT_FILE: &str = "CHECKPOINT";
const DIR_PREFIX: &str = "db-";

/// Directory name used for database `name`.
pub(crate) fn dir_name(name: &str) -> String {
    let mut out = String::with_capacity(DIR_PREFIX.len() + name.len() * 2);
    out.push_str(DIR_PREFIX);
    for byte in name.bytes() {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}

/// Database name encoded in a directory name, if it is one of ours.
pub(crate) fn name_from_dir(dir: &str) -> Option<String> {
    let hex = dir.strip_prefix(DIR_PREFIX)?;
    if hex.len() % 2 != 0 {
        return None;
    }
    let bytes = (0..hex.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(hex.get(i..i + 2)?, 16).ok())
        .collect::<Option<Vec<u8>>>()?;
    String::from_utf8(bytes).ok()
}

/// A locked database directory.
///
/// The LOCK file is held exclusively for the lifetime of this value, so a
/// second process (or a second factory in this process) cannot load the
/// same database concurrently.
#[derive(Debug)]
pub struct DatabaseDir {
    path: PathBuf,
    _lock_file: File,
}

impl DatabaseDir {
    /// Opens (and optionally creates) a database directory and locks it.
    ///
    /// # Errors
    ///
    /// - `InvalidFormat` if the directory is missing and `create_if_missing`
    ///   is false, or the path is not a directory
    /// - `DatabaseLocked` if another holder has the lock
    pub fn open(path: &Path, create_if_missing: bool) -> CoreResult<Self> {
        if !path.exists() {
            if create_if_missing {
                fs::create_dir_all(path)?;
                if let Some(parent) = path.parent() {
                    sync_directory(parent)?;
                }
            } else {
                return Err(CoreError::invalid_format(format!(
                    "database directory does not exist: {}",
                    path.display()
                )));
            }
        }

        if !path.is_dir() {
            return Err(CoreError::invalid_format(format!(
                "path is not a directory: {}",
                path.display()
            )));
        }

        let lock_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path.join(LOCK_FILE))?;
        if lock_file.try_lock_exclusive().is_err() {
            return Err(CoreError::DatabaseLocked);
        }

        Ok(Self {
            path: path.to_path_buf(),
            _lock_file: lock_file,
        })
    }

    /// Directory path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Path of the WAL file.
    #[must_use]
    pub fn wal_path(&self) -> PathBuf {
        self.path.join(WAL_FILE)
    }

    /// Path of the checkpoint file.
    #[must_use]
    pub fn checkpoint_path(&self) -> PathBuf {
        self.path.join(CHECKPOINT_FILE)
    }

    /// Releases the lock and removes the directory with everything in it.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the directory cannot be removed.
    pub fn destroy(self) -> CoreResult<()> {
        let Self { path, _lock_file } = self;
        drop(_lock_file);
        fs::remove_dir_all(&path)?;
        if let Some(parent) = path.parent() {
            sync_directory(parent)?;
        }
        Ok(())
    }
}

/// Makes directory entry changes (create, rename, remove) durable.
#[cfg(unix)]
fn sync_directory(path: &Path) -> CoreResult<()> {
    File::open(path)?.sync_all()?;
    Ok(())
}

#[cfg(not(unix))]
fn sync_directory(_path: &Path) -> CoreResult<()> {
    Ok(())
}
