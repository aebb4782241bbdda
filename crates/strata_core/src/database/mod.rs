//! Databases, connections and the factory that opens them.
//!
//! A [`DatabaseFactory`] is the namespace databases are named in. Opening a
//! database yields a [`Connection`]; every connection to the same name
//! shares one loaded copy of the database.
//!
//! Schema changes happen only while a database is opened at a newer
//! version. The factory asks the other connections to close, then runs the
//! caller's upgrade callback inside an upgrade transaction.

mod connection;
mod factory;
mod provider;
mod recovery;
mod shared;

pub use connection::{Connection, VersionChangeEvent};
pub use factory::DatabaseFactory;
pub use provider::{BackendProvider, DatabaseBackends, DirectoryProvider, MemoryProvider};
pub(crate) use shared::{DatabaseShared, Snapshot};
