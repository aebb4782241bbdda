//! # Strata Core
//!
//! Embedded, versioned, transactional object-store database.
//!
//! This crate provides:
//! - Named databases with an integer version, upgraded through a callback
//!   that alone may change the schema
//! - Object stores holding CBOR values under totally ordered keys, with
//!   in-line key paths and key generators
//! - Secondary indexes (unique, multi-entry) and cursors over stores and
//!   indexes
//! - Scoped transactions with FIFO store locks and rollback
//! - A write-ahead log and checkpoints for crash recovery
//!
//! ## Example
//!
//! ```rust,ignore
//! use strata_core::{Config, DatabaseFactory, IndexOptions, StoreOptions, TransactionMode};
//! use strata_codec::Value;
//!
//! let factory = DatabaseFactory::in_memory(Config::default());
//! let conn = factory.open("library", 1, |txn, _old, _new| {
//!     let books = txn.create_store("books", StoreOptions::new().key_path("isbn"))?;
//!     books.create_index("by_author", "author", IndexOptions::new())?;
//!     Ok(())
//! })?;
//!
//! conn.run(&["books"], TransactionMode::ReadWrite, |txn| {
//!     let book = Value::object([
//!         ("isbn", Value::Integer(9_780_441_013_593)),
//!         ("author", Value::from("Herbert")),
//!     ]);
//!     txn.store("books")?.add(book, None)?;
//!     Ok(())
//! })?;
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod catalog;
mod checkpoint;
mod config;
mod cursor;
mod database;
mod dir;
mod encoding;
mod error;
mod key;
mod key_range;
mod store;
mod transaction;
mod types;
pub mod wal;

pub use catalog::{IndexMeta, IndexOptions, StoreMeta, StoreOptions};
pub use checkpoint::CHECKPOINT_MAGIC;
pub use config::Config;
pub use cursor::{Cursor, CursorIter, CursorRecord, Direction};
pub use database::{
    BackendProvider, Connection, DatabaseBackends, DatabaseFactory, DirectoryProvider,
    MemoryProvider, VersionChangeEvent,
};
pub use dir::DatabaseDir;
pub use error::{CoreError, CoreResult, ErrorKind};
pub use key::{Key, KeyPath};
pub use key_range::KeyRange;
pub use store::{Index, ObjectStore, MAX_GENERATED_KEY};
pub use transaction::{LockManager, LockRequest, LockTicket, Transaction, TransactionState};
pub use types::{SequenceNumber, TransactionId, TransactionMode};
