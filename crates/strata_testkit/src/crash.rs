//! Crash recovery testing.
//!
//! Each scenario commits work through a directory-backed factory, drops
//! every handle (the process "crashes"), optionally damages the WAL the way
//! an interrupted write would, then reopens and checks what survived.
//!
//! ## Test Strategy
//!
//! 1. **Crash after commit** - committed data survives
//! 2. **Crash mid-batch** - a torn final batch is discarded
//! 3. **Crash after checkpoint** - checkpoint plus WAL tail are combined
//! 4. **Crash after delete** - deletions survive
//! 5. **Crash after upgrade** - schema changes survive
//!
//! ## Usage
//!
//! ```rust,ignore
//! use strata_testkit::crash::CrashRecoveryHarness;
//!
//! let mut harness = CrashRecoveryHarness::new();
//! harness.run_all_tests();
//! assert!(harness.all_passed(), "{}", harness.summary());
//! ```

use crate::fixtures::{book, init_tracing, library_upgrade, BOOKS, LIBRARY, PRICE_IDX};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;
use strata_core::{
    Config, Connection, CoreResult, DatabaseDir, DatabaseFactory, DirectoryProvider, KeyRange,
    TransactionMode,
};
use tempfile::TempDir;

/// Result of a crash recovery test.
#[derive(Debug, Clone)]
pub struct CrashRecoveryResult {
    /// Whether the test passed.
    pub passed: bool,
    /// Description of what was tested.
    pub description: String,
    /// Expected records after recovery.
    pub expected_records: usize,
    /// Actual records after recovery.
    pub actual_records: usize,
    /// Any error message.
    pub error: Option<String>,
}

impl CrashRecoveryResult {
    /// Creates a passing result.
    pub fn pass(description: &str, records: usize) -> Self {
        Self {
            passed: true,
            description: description.to_string(),
            expected_records: records,
            actual_records: records,
            error: None,
        }
    }

    /// Creates a failing result.
    pub fn fail(description: &str, expected: usize, actual: usize, error: &str) -> Self {
        Self {
            passed: false,
            description: description.to_string(),
            expected_records: expected,
            actual_records: actual,
            error: Some(error.to_string()),
        }
    }

    fn check(description: &str, expected: usize, actual: usize) -> Self {
        if expected == actual {
            Self::pass(description, expected)
        } else {
            Self::fail(description, expected, actual, "record count differs after recovery")
        }
    }
}

/// Test harness for crash recovery scenarios.
pub struct CrashRecoveryHarness {
    root: TempDir,
    config: Config,
    /// Results of crash recovery tests.
    pub results: Vec<CrashRecoveryResult>,
}

impl CrashRecoveryHarness {
    /// Creates a harness over a fresh temporary directory.
    pub fn new() -> Self {
        Self::with_config(Config::default())
    }

    /// Creates a harness whose factories use `config`.
    pub fn with_config(config: Config) -> Self {
        init_tracing();
        Self {
            root: TempDir::new().expect("Failed to create temp directory"),
            config,
            results: Vec::new(),
        }
    }

    fn factory(&self) -> CoreResult<DatabaseFactory> {
        DatabaseFactory::open_dir(self.root.path(), self.config.clone())
    }

    /// Opens a factory with the library database deleted.
    fn fresh(&self) -> CoreResult<DatabaseFactory> {
        let factory = self.factory()?;
        factory.delete_database(LIBRARY)?;
        Ok(factory)
    }

    /// WAL file of the library. Only valid while no factory holds it.
    fn wal_path(&self) -> CoreResult<PathBuf> {
        let provider = DirectoryProvider::new(self.root.path())?;
        let dir = DatabaseDir::open(&provider.database_path(LIBRARY), false)?;
        Ok(dir.wal_path())
    }

    fn wal_len(&self) -> CoreResult<u64> {
        Ok(std::fs::metadata(self.wal_path()?)?.len())
    }

    fn add_books(conn: &Connection, ids: std::ops::Range<usize>) -> CoreResult<()> {
        conn.run(&[BOOKS], TransactionMode::ReadWrite, |txn| {
            let books = txn.store(BOOKS)?;
            for i in ids {
                books.add(book(&format!("b{i:03}"), i as i64), None)?;
            }
            Ok(())
        })
    }

    fn count_books(conn: &Connection) -> CoreResult<usize> {
        conn.run(&[BOOKS], TransactionMode::ReadOnly, |txn| {
            txn.store(BOOKS)?.count(KeyRange::all())
        })
    }

    fn record(
        &mut self,
        description: &str,
        expected: usize,
        result: CoreResult<usize>,
    ) -> CrashRecoveryResult {
        let result = match result {
            Ok(actual) => CrashRecoveryResult::check(description, expected, actual),
            Err(e) => CrashRecoveryResult::fail(description, expected, 0, &e.to_string()),
        };
        tracing::info!(
            scenario = description,
            passed = result.passed,
            records = result.actual_records,
            "crash scenario finished"
        );
        self.results.push(result.clone());
        result
    }

    /// Tests that committed data survives a crash.
    pub fn test_committed_data_survives(&mut self) -> CrashRecoveryResult {
        let result = (|| -> CoreResult<usize> {
            let factory = self.fresh()?;
            let conn = factory.open(LIBRARY, 1, library_upgrade)?;
            for i in 0..10 {
                Self::add_books(&conn, i..i + 1)?;
            }
            drop(conn);
            drop(factory);

            // Reopening at the same version must not rerun the upgrade.
            let factory = self.factory()?;
            let conn = factory.open(LIBRARY, 1, library_upgrade)?;
            Self::count_books(&conn)
        })();
        self.record("Committed data survives crash", 10, result)
    }

    /// Tests that a batch cut short by the crash is discarded, and that the
    /// log accepts new commits afterwards.
    pub fn test_torn_batch_discarded(&mut self) -> CrashRecoveryResult {
        let result = (|| -> CoreResult<usize> {
            let factory = self.fresh()?;
            let conn = factory.open(LIBRARY, 1, library_upgrade)?;
            Self::add_books(&conn, 0..5)?;
            drop(conn);
            drop(factory);
            let committed = self.wal_len()?;

            let factory = self.factory()?;
            let conn = factory.open(LIBRARY, 1, library_upgrade)?;
            Self::add_books(&conn, 5..8)?;
            drop(conn);
            drop(factory);

            // Cut the last batch in half.
            let full = self.wal_len()?;
            OpenOptions::new()
                .write(true)
                .open(self.wal_path()?)?
                .set_len(committed + (full - committed) / 2)?;

            let factory = self.factory()?;
            let conn = factory.open(LIBRARY, 1, library_upgrade)?;
            let survived = Self::count_books(&conn)?;
            Self::add_books(&conn, 100..101)?;
            drop(conn);
            drop(factory);

            let factory = self.factory()?;
            let conn = factory.open(LIBRARY, 1, library_upgrade)?;
            let after = Self::count_books(&conn)?;
            Ok(if after == survived + 1 { survived } else { after })
        })();
        self.record("Torn batch is discarded", 5, result)
    }

    /// Tests that garbage shorter than a record header is dropped.
    pub fn test_partial_header_discarded(&mut self) -> CrashRecoveryResult {
        let result = (|| -> CoreResult<usize> {
            let factory = self.fresh()?;
            let conn = factory.open(LIBRARY, 1, library_upgrade)?;
            Self::add_books(&conn, 0..3)?;
            drop(conn);
            drop(factory);

            let mut wal = OpenOptions::new().append(true).open(self.wal_path()?)?;
            wal.write_all(b"SWAL\x01")?;
            wal.sync_all()?;
            drop(wal);

            let factory = self.factory()?;
            let conn = factory.open(LIBRARY, 1, library_upgrade)?;
            Self::count_books(&conn)
        })();
        self.record("Partial record header is discarded", 3, result)
    }

    /// Tests recovery from a checkpoint followed by more WAL batches.
    pub fn test_checkpoint_then_wal(&mut self) -> CrashRecoveryResult {
        let result = (|| -> CoreResult<usize> {
            let factory = self.fresh()?;
            let conn = factory.open(LIBRARY, 1, library_upgrade)?;
            Self::add_books(&conn, 0..5)?;
            conn.checkpoint()?;
            Self::add_books(&conn, 5..8)?;
            drop(conn);
            drop(factory);

            let factory = self.factory()?;
            let conn = factory.open(LIBRARY, 1, library_upgrade)?;
            Self::count_books(&conn)
        })();
        self.record("Checkpoint plus WAL tail recover", 8, result)
    }

    /// Tests that deletions survive a crash.
    pub fn test_delete_survives_crash(&mut self) -> CrashRecoveryResult {
        let result = (|| -> CoreResult<usize> {
            let factory = self.fresh()?;
            let conn = factory.open(LIBRARY, 1, library_upgrade)?;
            Self::add_books(&conn, 0..6)?;
            conn.run(&[BOOKS], TransactionMode::ReadWrite, |txn| {
                let books = txn.store(BOOKS)?;
                books.delete("b001")?;
                books.delete(KeyRange::bound("b003", "b004", false, false)?)
            })?;
            drop(conn);
            drop(factory);

            let factory = self.factory()?;
            let conn = factory.open(LIBRARY, 1, library_upgrade)?;
            let gone = conn.run(&[BOOKS], TransactionMode::ReadOnly, |txn| {
                let books = txn.store(BOOKS)?;
                Ok(books.get("b001")?.is_none() && books.get("b004")?.is_none())
            })?;
            let count = Self::count_books(&conn)?;
            Ok(if gone { count } else { usize::MAX })
        })();
        self.record("Deletes survive crash", 3, result)
    }

    /// Tests that a completed upgrade survives a crash.
    pub fn test_upgrade_survives_crash(&mut self) -> CrashRecoveryResult {
        let result = (|| -> CoreResult<usize> {
            let factory = self.fresh()?;
            let conn = factory.open(LIBRARY, 1, library_upgrade)?;
            Self::add_books(&conn, 0..4)?;
            drop(conn);
            let conn = factory.open(LIBRARY, 2, library_upgrade)?;
            drop(conn);
            drop(factory);

            let factory = self.factory()?;
            let conn = factory.open(LIBRARY, 2, library_upgrade)?;
            let indexed = conn.run(&[BOOKS], TransactionMode::ReadOnly, |txn| {
                txn.store(BOOKS)?.index(PRICE_IDX)?.count(KeyRange::all())
            })?;
            Ok(if conn.version() == 2 { indexed } else { 0 })
        })();
        self.record("Upgrade survives crash", 4, result)
    }

    /// Runs all crash recovery tests.
    pub fn run_all_tests(&mut self) -> Vec<CrashRecoveryResult> {
        self.results.clear();

        self.test_committed_data_survives();
        self.test_torn_batch_discarded();
        self.test_partial_header_discarded();
        self.test_checkpoint_then_wal();
        self.test_delete_survives_crash();
        self.test_upgrade_survives_crash();

        self.results.clone()
    }

    /// Returns a summary of test results.
    pub fn summary(&self) -> String {
        let passed = self.results.iter().filter(|r| r.passed).count();
        let total = self.results.len();

        let mut summary = format!(
            "\n=== Crash Recovery Test Summary ===\n\
             Passed: {passed}/{total}\n\n"
        );

        for result in &self.results {
            let status = if result.passed { "ok" } else { "FAILED" };
            summary.push_str(&format!(
                "[{status}] {}\n  Expected: {} records, Actual: {} records\n",
                result.description, result.expected_records, result.actual_records
            ));
            if let Some(ref error) = result.error {
                summary.push_str(&format!("  Error: {error}\n"));
            }
        }

        summary
    }

    /// Returns whether all tests passed.
    pub fn all_passed(&self) -> bool {
        self.results.iter().all(|r| r.passed)
    }
}

impl Default for CrashRecoveryHarness {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn committed_data_survives() {
        let mut harness = CrashRecoveryHarness::new();
        let result = harness.test_committed_data_survives();
        assert!(result.passed, "{}", harness.summary());
    }

    #[test]
    fn all_crash_recovery_scenarios() {
        let mut harness = CrashRecoveryHarness::new();
        let results = harness.run_all_tests();
        assert_eq!(results.len(), 6);
        assert!(harness.all_passed(), "{}", harness.summary());
    }

    #[test]
    fn scenarios_hold_without_sync() {
        let mut harness = CrashRecoveryHarness::with_config(Config::default().sync_on_commit(false));
        harness.run_all_tests();
        assert!(harness.all_passed(), "{}", harness.summary());
    }

    #[test]
    fn results_report_mismatch() {
        let result = CrashRecoveryResult::check("count", 3, 2);
        assert!(!result.passed);
        assert_eq!(result.actual_records, 2);
        assert!(CrashRecoveryResult::check("count", 3, 3).passed);
    }
}
