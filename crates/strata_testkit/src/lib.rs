//! # Strata Testkit
//!
//! Test utilities for Strata.
//!
//! This crate provides:
//! - Factory fixtures (in-memory, on-disk, fault-injecting)
//! - Property-based test generators using proptest
//! - A model harness that checks a store against a plain map
//! - Crash recovery and concurrency harnesses
//!
//! ## Usage
//!
//! ```rust,ignore
//! use strata_testkit::*;
//!
//! #[test]
//! fn books_survive() {
//!     let fixture = TestFactory::memory();
//!     let conn = fixture.open_library(1).unwrap();
//!     // ... test operations
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod crash;
pub mod fixtures;
pub mod generators;
pub mod integration;
pub mod stress;

pub use crash::*;
pub use fixtures::*;
pub use generators::*;
pub use integration::*;
pub use stress::*;
