//! Stress tests.
//!
//! These tests verify behavior under heavy load and concurrent access.
//! Concurrent runs share one connection across scoped threads; store locks
//! are what keeps them apart.

use std::thread;
use std::time::{Duration, Instant};
use strata_codec::Value;
use strata_core::{
    Connection, CoreError, CoreResult, DatabaseFactory, Key, KeyRange, StoreOptions,
    TransactionMode,
};

/// Database the stress runs use.
pub const STRESS_DB: &str = "stress";
/// Auto-increment store every writer appends to.
pub const SHARED: &str = "shared";
/// Store holding the `hits` counter.
pub const COUNTER: &str = "counter";

/// Result of a stress test run.
#[derive(Debug, Clone)]
pub struct StressTestResult {
    /// Total operations performed.
    pub total_ops: usize,
    /// Successful operations.
    pub successful_ops: usize,
    /// Failed operations.
    pub failed_ops: usize,
    /// Total duration.
    pub duration: Duration,
    /// Operations per second.
    pub ops_per_second: f64,
}

impl StressTestResult {
    /// Creates a new result.
    pub fn new(successful: usize, failed: usize, duration: Duration) -> Self {
        let total = successful + failed;
        let ops_per_second = if duration.as_secs_f64() > 0.0 {
            total as f64 / duration.as_secs_f64()
        } else {
            0.0
        };

        Self {
            total_ops: total,
            successful_ops: successful,
            failed_ops: failed,
            duration,
            ops_per_second,
        }
    }

    fn merge(results: impl IntoIterator<Item = (usize, usize)>, duration: Duration) -> Self {
        let (ok, failed) = results
            .into_iter()
            .fold((0, 0), |(a, b), (ok, failed)| (a + ok, b + failed));
        Self::new(ok, failed, duration)
    }

    /// Prints a summary of the test.
    pub fn print_summary(&self, name: &str) {
        println!("\n=== {name} ===");
        println!("Total operations: {}", self.total_ops);
        println!("Successful: {}", self.successful_ops);
        println!("Failed: {}", self.failed_ops);
        println!("Duration: {:?}", self.duration);
        println!("Throughput: {:.2} ops/sec", self.ops_per_second);
    }
}

/// Configuration for stress tests.
#[derive(Debug, Clone)]
pub struct StressConfig {
    /// Number of operations to perform (per thread for concurrent tests).
    pub operations: usize,
    /// Number of concurrent threads (for concurrent tests).
    pub threads: usize,
    /// Size of record payloads in bytes.
    pub record_size: usize,
    /// Number of distinct keys.
    pub key_count: usize,
}

impl Default for StressConfig {
    fn default() -> Self {
        Self {
            operations: 2_000,
            threads: 4,
            record_size: 256,
            key_count: 500,
        }
    }
}

impl StressConfig {
    /// A configuration small enough for unit tests.
    #[must_use]
    pub fn quick() -> Self {
        Self {
            operations: 100,
            threads: 4,
            record_size: 64,
            key_count: 50,
        }
    }
}

/// Name of the private store of writer `thread`.
#[must_use]
pub fn thread_store(thread: usize) -> String {
    format!("t{thread}")
}

/// Opens the stress database with one private store per thread plus the
/// shared and counter stores.
///
/// # Errors
///
/// As for [`DatabaseFactory::open`].
pub fn open_stress_db(factory: &DatabaseFactory, config: &StressConfig) -> CoreResult<Connection> {
    let threads = config.threads;
    factory.open(STRESS_DB, 1, move |txn, _old, _new| {
        for t in 0..threads {
            txn.create_store(&thread_store(t), StoreOptions::new())?;
        }
        txn.create_store(SHARED, StoreOptions::new().auto_increment(true))?;
        txn.create_store(COUNTER, StoreOptions::new())?;
        Ok(())
    })
}

fn payload(config: &StressConfig) -> Value {
    Value::Bytes(vec![0xAB; config.record_size])
}

/// Run a sequential write stress test.
pub fn stress_sequential_writes(conn: &Connection, config: &StressConfig) -> StressTestResult {
    let store = thread_store(0);
    let data = payload(config);

    let start = Instant::now();
    let mut successful = 0usize;
    let mut failed = 0usize;

    for i in 0..config.operations {
        let key = (i % config.key_count) as i64;
        match conn.run(&[store.as_str()], TransactionMode::ReadWrite, |txn| {
            txn.store(&store)?.put(data.clone(), Key::Number(key))?;
            Ok(())
        }) {
            Ok(()) => successful += 1,
            Err(_) => failed += 1,
        }
    }

    StressTestResult::new(successful, failed, start.elapsed())
}

/// Every thread writes to its own store and appends to the shared store.
pub fn stress_concurrent_writers(conn: &Connection, config: &StressConfig) -> StressTestResult {
    let data = payload(config);
    let start = Instant::now();

    let results = thread::scope(|scope| {
        let handles: Vec<_> = (0..config.threads)
            .map(|t| {
                let data = data.clone();
                scope.spawn(move || {
                    let own = thread_store(t);
                    let mut counts = (0usize, 0usize);
                    for i in 0..config.operations {
                        let key = (i % config.key_count) as i64;
                        let scope_names = [own.as_str(), SHARED];
                        let result = conn.run(&scope_names, TransactionMode::ReadWrite, |txn| {
                            txn.store(&own)?.put(data.clone(), Key::Number(key))?;
                            txn.store(SHARED)?.add(Value::from(t as i64), None)?;
                            Ok(())
                        });
                        match result {
                            Ok(()) => counts.0 += 1,
                            Err(_) => counts.1 += 1,
                        }
                    }
                    counts
                })
            })
            .collect();
        handles
            .into_iter()
            .map(|h| h.join().unwrap_or((0, config.operations)))
            .collect::<Vec<_>>()
    });

    StressTestResult::merge(results, start.elapsed())
}

/// Every thread increments one counter with read-modify-write
/// transactions; no increment may be lost.
pub fn stress_shared_counter(conn: &Connection, config: &StressConfig) -> StressTestResult {
    let start = Instant::now();

    let results = thread::scope(|scope| {
        let handles: Vec<_> = (0..config.threads)
            .map(|_| {
                scope.spawn(move || {
                    let mut counts = (0usize, 0usize);
                    for _ in 0..config.operations {
                        match increment(conn) {
                            Ok(()) => counts.0 += 1,
                            Err(_) => counts.1 += 1,
                        }
                    }
                    counts
                })
            })
            .collect();
        handles
            .into_iter()
            .map(|h| h.join().unwrap_or((0, config.operations)))
            .collect::<Vec<_>>()
    });

    StressTestResult::merge(results, start.elapsed())
}

fn increment(conn: &Connection) -> CoreResult<()> {
    conn.run(&[COUNTER], TransactionMode::ReadWrite, |txn| {
        let counter = txn.store(COUNTER)?;
        let hits = counter
            .get("hits")?
            .and_then(|v| v.as_integer())
            .unwrap_or(0);
        counter.put(Value::Integer(hits + 1), Key::from("hits"))?;
        Ok(())
    })
}

/// Current value of the shared counter.
///
/// # Errors
///
/// Propagates read errors.
pub fn counter_value(conn: &Connection) -> CoreResult<i64> {
    conn.run(&[COUNTER], TransactionMode::ReadOnly, |txn| {
        Ok(txn
            .store(COUNTER)?
            .get("hits")?
            .and_then(|v| v.as_integer())
            .unwrap_or(0))
    })
}

/// Readers scan a populated store from several threads at once.
pub fn stress_concurrent_reads(conn: &Connection, config: &StressConfig) -> StressTestResult {
    let store = thread_store(0);
    let data = payload(config);
    let populated = conn.run(&[store.as_str()], TransactionMode::ReadWrite, |txn| {
        let records = txn.store(&store)?;
        for key in 0..config.key_count as i64 {
            records.put(data.clone(), Key::Number(key))?;
        }
        Ok(())
    });
    if populated.is_err() {
        return StressTestResult::new(0, config.operations * config.threads, Duration::ZERO);
    }

    let start = Instant::now();
    let results = thread::scope(|scope| {
        let handles: Vec<_> = (0..config.threads)
            .map(|t| {
                let store = store.as_str();
                scope.spawn(move || {
                    let mut counts = (0usize, 0usize);
                    for i in 0..config.operations {
                        let key = ((i * (t + 1)) % config.key_count) as i64;
                        let result = conn.run(&[store], TransactionMode::ReadOnly, |txn| {
                            let records = txn.store(store)?;
                            match records.get(key)? {
                                Some(_) => Ok(records.count(KeyRange::all())?),
                                None => Err(CoreError::invalid_state(format!("key {key} missing"))),
                            }
                        });
                        match result {
                            Ok(n) if n == config.key_count => counts.0 += 1,
                            _ => counts.1 += 1,
                        }
                    }
                    counts
                })
            })
            .collect();
        handles
            .into_iter()
            .map(|h| h.join().unwrap_or((0, config.operations)))
            .collect::<Vec<_>>()
    });

    StressTestResult::merge(results, start.elapsed())
}

/// Every transaction writes and then fails; nothing may persist.
pub fn stress_transaction_aborts(conn: &Connection, config: &StressConfig) -> StressTestResult {
    let store = thread_store(0);
    let data = payload(config);

    let start = Instant::now();
    let mut aborted = 0usize;
    let mut committed = 0usize;

    for i in 0..config.operations {
        let result: CoreResult<()> = conn.run(&[store.as_str()], TransactionMode::ReadWrite, |txn| {
            txn.store(&store)?.put(data.clone(), Key::Number(i as i64))?;
            Err(CoreError::invalid_state("simulated failure"))
        });
        match result {
            Err(_) => aborted += 1,
            Ok(()) => committed += 1,
        }
    }

    StressTestResult::new(aborted, committed, start.elapsed())
}

/// Writes `config.operations` records in a single transaction.
pub fn stress_large_transaction(conn: &Connection, config: &StressConfig) -> StressTestResult {
    let data = payload(config);
    let start = Instant::now();
    let result = conn.run(&[SHARED], TransactionMode::ReadWrite, |txn| {
        let shared = txn.store(SHARED)?;
        for _ in 0..config.operations {
            shared.add(data.clone(), None)?;
        }
        Ok(())
    });
    match result {
        Ok(()) => StressTestResult::new(config.operations, 0, start.elapsed()),
        Err(_) => StressTestResult::new(0, config.operations, start.elapsed()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::TestFactory;

    fn setup(config: &StressConfig) -> (TestFactory, Connection) {
        let fixture = TestFactory::memory();
        let conn = open_stress_db(&fixture, config).unwrap();
        (fixture, conn)
    }

    fn count(conn: &Connection, store: &str) -> usize {
        conn.run(&[store], TransactionMode::ReadOnly, |txn| {
            txn.store(store)?.count(KeyRange::all())
        })
        .unwrap()
    }

    #[test]
    fn sequential_writes() {
        let config = StressConfig::quick();
        let (_fixture, conn) = setup(&config);
        let result = stress_sequential_writes(&conn, &config);
        result.print_summary("Sequential Writes");
        assert_eq!(result.failed_ops, 0);
        assert_eq!(count(&conn, &thread_store(0)), config.key_count);
    }

    #[test]
    fn concurrent_writers() {
        let config = StressConfig::quick();
        let (_fixture, conn) = setup(&config);
        let result = stress_concurrent_writers(&conn, &config);
        result.print_summary("Concurrent Writers");
        assert_eq!(result.failed_ops, 0);
        assert_eq!(count(&conn, SHARED), config.threads * config.operations);
        for t in 0..config.threads {
            assert_eq!(count(&conn, &thread_store(t)), config.key_count);
        }
    }

    #[test]
    fn shared_counter_loses_no_increment() {
        let config = StressConfig::quick();
        let (_fixture, conn) = setup(&config);
        let result = stress_shared_counter(&conn, &config);
        assert_eq!(result.failed_ops, 0);
        assert_eq!(
            counter_value(&conn).unwrap(),
            (config.threads * config.operations) as i64
        );
    }

    #[test]
    fn concurrent_reads() {
        let config = StressConfig::quick();
        let (_fixture, conn) = setup(&config);
        let result = stress_concurrent_reads(&conn, &config);
        result.print_summary("Concurrent Reads");
        assert_eq!(result.failed_ops, 0);
        assert_eq!(result.total_ops, config.threads * config.operations);
    }

    #[test]
    fn aborted_transactions_leave_nothing() {
        let config = StressConfig::quick();
        let (_fixture, conn) = setup(&config);
        let result = stress_transaction_aborts(&conn, &config);
        assert_eq!(result.successful_ops, config.operations);
        assert_eq!(count(&conn, &thread_store(0)), 0);
    }

    #[test]
    fn large_transaction_on_disk() {
        let config = StressConfig::quick();
        let fixture = TestFactory::dir();
        let conn = open_stress_db(&fixture, &config).unwrap();
        let result = stress_large_transaction(&conn, &config);
        assert_eq!(result.failed_ops, 0);
        assert_eq!(count(&conn, SHARED), config.operations);
    }
}
