//! Storage failures, quotas, checkpoints and restarts.

use strata_codec::Value;
use strata_core::{Config, CoreError, ErrorKind, KeyRange, SequenceNumber, TransactionMode};
use strata_testkit::crash::CrashRecoveryHarness;
use strata_testkit::fixtures::{book, BOOKS, LIBRARY, PRICE_IDX};
use strata_testkit::TestFactory;

fn count_books(conn: &strata_core::Connection) -> usize {
    conn.run(&[BOOKS], TransactionMode::ReadOnly, |txn| {
        txn.store(BOOKS)?.count(KeyRange::all())
    })
    .unwrap()
}

fn big_book(id: &str, price: i64, size: usize) -> Value {
    Value::object([
        ("id", Value::from(id)),
        ("price", Value::Integer(price)),
        ("text", Value::from("x".repeat(size))),
    ])
}

#[test]
fn quota_exceeded_rolls_back() {
    let fixture = TestFactory::memory_with(Config::default().quota_bytes(16 * 1024));
    let conn = fixture.open_library(1).unwrap();
    TestFactory::put(&conn, BOOKS, book("small", 1)).unwrap();
    let sequence = conn.committed_sequence();

    let err = TestFactory::put(&conn, BOOKS, big_book("huge", 2, 32 * 1024)).unwrap_err();
    assert!(matches!(err, CoreError::QuotaExceeded { limit: 16_384, .. }));
    assert_eq!(err.kind(), ErrorKind::QuotaExceeded);
    assert_eq!(conn.committed_sequence(), sequence);
    assert_eq!(count_books(&conn), 1);

    TestFactory::put(&conn, BOOKS, big_book("fits", 3, 1024)).unwrap();
    assert_eq!(count_books(&conn), 2);
}

#[test]
fn failed_append_fails_commit_and_rolls_back() {
    let fixture = TestFactory::faulty(Config::default());
    let switch = fixture.switch.clone().unwrap();
    let conn = fixture.open_library(1).unwrap();
    TestFactory::put(&conn, BOOKS, book("kept", 1)).unwrap();

    switch.fail_appends(true);
    let err = TestFactory::put(&conn, BOOKS, book("lost", 2)).unwrap_err();
    assert!(matches!(err, CoreError::CommitFailed { .. }));
    assert_eq!(err.kind(), ErrorKind::Io);
    assert_eq!(count_books(&conn), 1);

    switch.heal();
    TestFactory::put(&conn, BOOKS, book("later", 3)).unwrap();
    assert_eq!(count_books(&conn), 2);
}

#[test]
fn failed_sync_fails_commit() {
    let fixture = TestFactory::faulty(Config::default());
    let switch = fixture.switch.clone().unwrap();
    let conn = fixture.open_library(2).unwrap();

    switch.fail_flushes(true);
    let err = TestFactory::put(&conn, BOOKS, book("b1", 10)).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Io);
    switch.heal();

    // The unique index entry was rolled back with the record.
    TestFactory::put(&conn, BOOKS, book("b2", 10)).unwrap();
    conn.run(&[BOOKS], TransactionMode::ReadOnly, |txn| {
        let books = txn.store(BOOKS)?;
        assert_eq!(books.get("b1")?, None);
        assert_eq!(books.index(PRICE_IDX)?.get_key(10i64)?, Some("b2".into()));
        Ok(())
    })
    .unwrap();
}

#[test]
fn failed_checkpoint_keeps_data() {
    let fixture = TestFactory::faulty(Config::default());
    let switch = fixture.switch.clone().unwrap();
    let conn = fixture.open_library(1).unwrap();
    TestFactory::put(&conn, BOOKS, book("b1", 1)).unwrap();

    switch.fail_replaces(true);
    assert_eq!(conn.checkpoint().unwrap_err().kind(), ErrorKind::Io);
    switch.heal();

    conn.checkpoint().unwrap();
    assert_eq!(count_books(&conn), 1);
}

#[test]
fn data_survives_restart() {
    let fixture = TestFactory::dir();
    let conn = fixture.open_library(2).unwrap();
    conn.run(&[BOOKS], TransactionMode::ReadWrite, |txn| {
        let books = txn.store(BOOKS)?;
        for i in 0..20 {
            books.add(book(&format!("b{i:02}"), i), None)?;
        }
        books.delete("b05")?;
        Ok(())
    })
    .unwrap();
    let sequence = conn.committed_sequence();
    conn.close();

    let fixture = fixture.restart();
    let conn = fixture.open_library(2).unwrap();
    assert_eq!(conn.committed_sequence(), sequence);
    assert_eq!(count_books(&conn), 19);
    conn.run(&[BOOKS], TransactionMode::ReadOnly, |txn| {
        let by_price = txn.store(BOOKS)?.index(PRICE_IDX)?;
        assert_eq!(by_price.count(KeyRange::all())?, 19);
        assert_eq!(by_price.get_key(7i64)?, Some("b07".into()));
        assert_eq!(by_price.get_key(5i64)?, None);
        Ok(())
    })
    .unwrap();
}

#[test]
fn float_fields_survive_restart() {
    let fixture = TestFactory::dir();
    let conn = fixture.open_library(1).unwrap();
    let priced = Value::object([
        ("id", Value::from("f1")),
        ("price", Value::Float(9.99)),
        ("rating", Value::Float(f64::NAN)),
    ]);
    TestFactory::put(&conn, BOOKS, priced.clone()).unwrap();
    conn.close();

    let fixture = fixture.restart();
    let conn = fixture.open_library(1).unwrap();
    conn.run(&[BOOKS], TransactionMode::ReadOnly, |txn| {
        assert_eq!(txn.store(BOOKS)?.get("f1")?, Some(priced.clone()));
        Ok(())
    })
    .unwrap();
}

#[test]
fn automatic_checkpoint_bounds_the_log() {
    let fixture = TestFactory::dir_with(Config::default().auto_checkpoint_bytes(4 * 1024));
    let conn = fixture.open_library(1).unwrap();
    for i in 0..50 {
        TestFactory::put(&conn, BOOKS, big_book(&format!("b{i:02}"), i, 512)).unwrap();
    }
    conn.close();

    let wal = fixture
        .path()
        .unwrap()
        .read_dir()
        .unwrap()
        .filter_map(Result::ok)
        .map(|entry| entry.path().join("wal.log"))
        .find(|path| path.exists())
        .unwrap();
    assert!(std::fs::metadata(wal).unwrap().len() <= 4 * 1024 + 1024);

    let fixture = fixture.restart();
    let conn = fixture.open_library(1).unwrap();
    assert_eq!(count_books(&conn), 50);
    assert!(conn.committed_sequence() > SequenceNumber::default());
}

#[test]
fn databases_lists_versions() {
    let fixture = TestFactory::dir();
    drop(fixture.open_library(2).unwrap());
    drop(fixture.open("other", 5, |_, _, _| Ok(())).unwrap());

    let fixture = fixture.restart();
    let mut listed = fixture.databases().unwrap();
    listed.sort();
    assert_eq!(
        listed,
        vec![(LIBRARY.to_string(), 2), ("other".to_string(), 5)]
    );
}

#[test]
fn crash_scenarios_recover() {
    let mut harness = CrashRecoveryHarness::new();
    harness.run_all_tests();
    assert!(harness.all_passed(), "{}", harness.summary());
}
