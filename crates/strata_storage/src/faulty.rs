//! Fault-injecting backend wrapper.
//!
//! Wraps any backend and fails selected operations on demand, so durability
//! paths (commit failure, checkpoint failure) can be exercised in tests.

use crate::backend::StorageBackend;
use crate::error::{StorageError, StorageResult};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Switches controlling which operations a [`FaultyBackend`] fails.
///
/// Cloning yields a handle onto the same switches.
#[derive(Debug, Clone, Default)]
pub struct FaultSwitch {
    inner: Arc<Switches>,
}

#[derive(Debug, Default)]
struct Switches {
    append: AtomicBool,
    flush: AtomicBool,
    replace: AtomicBool,
}

impl FaultSwitch {
    /// Creates a switch with every fault disabled.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fails (or stops failing) `append`.
    pub fn fail_appends(&self, on: bool) {
        self.inner.append.store(on, Ordering::SeqCst);
    }

    /// Fails (or stops failing) `flush` and `sync`.
    pub fn fail_flushes(&self, on: bool) {
        self.inner.flush.store(on, Ordering::SeqCst);
    }

    /// Fails (or stops failing) `replace`.
    pub fn fail_replaces(&self, on: bool) {
        self.inner.replace.store(on, Ordering::SeqCst);
    }

    /// Disables every fault.
    pub fn heal(&self) {
        self.fail_appends(false);
        self.fail_flushes(false);
        self.fail_replaces(false);
    }

    fn check(flag: &AtomicBool, operation: &'static str) -> StorageResult<()> {
        if flag.load(Ordering::SeqCst) {
            Err(StorageError::InjectedFault { operation })
        } else {
            Ok(())
        }
    }
}

/// A backend that forwards to `B` unless its [`FaultSwitch`] says otherwise.
///
/// Reads, `size` and `truncate` are never failed.
#[derive(Debug)]
pub struct FaultyBackend<B> {
    inner: B,
    switch: FaultSwitch,
}

impl<B: StorageBackend> FaultyBackend<B> {
    /// Wraps `inner`, controlled by `switch`.
    pub fn new(inner: B, switch: FaultSwitch) -> Self {
        Self { inner, switch }
    }

    /// Returns the wrapped backend.
    pub fn into_inner(self) -> B {
        self.inner
    }
}

impl<B: StorageBackend> StorageBackend for FaultyBackend<B> {
    fn read_at(&self, offset: u64, len: usize) -> StorageResult<Vec<u8>> {
        self.inner.read_at(offset, len)
    }

    fn append(&mut self, data: &[u8]) -> StorageResult<u64> {
        FaultSwitch::check(&self.switch.inner.append, "append")?;
        self.inner.append(data)
    }

    fn flush(&mut self) -> StorageResult<()> {
        FaultSwitch::check(&self.switch.inner.flush, "flush")?;
        self.inner.flush()
    }

    fn size(&self) -> StorageResult<u64> {
        self.inner.size()
    }

    fn sync(&mut self) -> StorageResult<()> {
        FaultSwitch::check(&self.switch.inner.flush, "sync")?;
        self.inner.sync()
    }

    fn truncate(&mut self, new_size: u64) -> StorageResult<()> {
        self.inner.truncate(new_size)
    }

    fn replace(&mut self, data: &[u8]) -> StorageResult<()> {
        FaultSwitch::check(&self.switch.inner.replace, "replace")?;
        self.inner.replace(data)
    }
}
