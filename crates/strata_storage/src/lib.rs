//! # Strata Storage
//!
//! Byte-store backends underneath Strata.
//!
//! Storage backends are **opaque byte stores** - they do not interpret
//! the data they store. Strata's core crate owns the write-ahead log and
//! checkpoint formats and drives backends through [`StorageBackend`].
//!
//! ## Available Backends
//!
//! - [`InMemoryBackend`] - For ephemeral databases and tests
//! - [`FileBackend`] - For persistent storage using OS file APIs
//! - [`FaultyBackend`] - Wrapper that fails chosen operations on demand
//!
//! ## Example
//!
//! ```rust
//! use strata_storage::{StorageBackend, InMemoryBackend};
//!
//! let mut backend = InMemoryBackend::new();
//! let offset = backend.append(b"hello world").unwrap();
//! let data = backend.read_at(offset, 11).unwrap();
//! assert_eq!(&data, b"hello world");
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod backend;
mod error;
mod faulty;
mod file;
mod memory;

pub use backend::StorageBackend;
pub use error::{StorageError, StorageResult};
pub use faulty::{FaultSwitch, FaultyBackend};
pub use file::FileBackend;
pub use memory::InMemoryBackend;
