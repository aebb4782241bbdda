//! Store-level lock manager.
//!
//! Requests are granted in FIFO order: a request proceeds only when it is
//! compatible with every granted request and with every request queued
//! ahead of it. Read-only scopes share store locks; read-write scopes hold
//! them exclusively; the database-wide request conflicts with everything.

use crate::error::{CoreError, CoreResult};
use parking_lot::{Condvar, Mutex};
use std::collections::{BTreeSet, HashMap, VecDeque};
use std::time::{Duration, Instant};

/// What a transaction needs locked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LockRequest {
    /// A set of stores, shared or exclusive.
    Stores {
        /// Store names in scope.
        names: BTreeSet<String>,
        /// Whether the stores are held exclusively.
        exclusive: bool,
    },
    /// The whole database, exclusively.
    Database,
}

impl LockRequest {
    fn conflicts_with(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Database, _) | (_, Self::Database) => true,
            (
                Self::Stores {
                    names: a,
                    exclusive: ea,
                },
                Self::Stores {
                    names: b,
                    exclusive: eb,
                },
            ) => (*ea || *eb) && !a.is_disjoint(b),
        }
    }

    fn describe(&self) -> Vec<String> {
        match self {
            Self::Stores { names, .. } => names.iter().cloned().collect(),
            Self::Database => vec!["*".to_string()],
        }
    }
}

/// Proof of a granted request; hand it back to [`LockManager::release`].
#[derive(Debug, PartialEq, Eq, Hash)]
pub struct LockTicket(u64);

#[derive(Debug, Default)]
struct LockTable {
    next_id: u64,
    granted: HashMap<u64, LockRequest>,
    waiting: VecDeque<(u64, LockRequest)>,
}

impl LockTable {
    /// Whether the queued request `id` may be granted now.
    fn grantable(&self, id: u64) -> bool {
        let Some(position) = self.waiting.iter().position(|(w, _)| *w == id) else {
            return false;
        };
        let request = &self.waiting[position].1;
        self.granted.values().all(|g| !request.conflicts_with(g))
            && self
                .waiting
                .iter()
                .take(position)
                .all(|(_, earlier)| !request.conflicts_with(earlier))
    }

    fn grant(&mut self, id: u64) {
        if let Some(position) = self.waiting.iter().position(|(w, _)| *w == id) {
            if let Some((id, request)) = self.waiting.remove(position) {
                self.granted.insert(id, request);
            }
        }
    }
}

/// Grants and releases transaction locks.
#[derive(Debug, Default)]
pub struct LockManager {
    table: Mutex<LockTable>,
    changed: Condvar,
}

impl LockManager {
    /// Creates an empty lock manager.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn enqueue(table: &mut LockTable, request: LockRequest) -> u64 {
        table.next_id += 1;
        let id = table.next_id;
        table.waiting.push_back((id, request));
        id
    }

    /// Blocks until `request` is granted, or until `timeout` elapses.
    ///
    /// # Errors
    ///
    /// Returns `LockTimeout` if the timeout elapses first.
    pub fn acquire(
        &self,
        request: LockRequest,
        timeout: Option<Duration>,
    ) -> CoreResult<LockTicket> {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut table = self.table.lock();
        let id = Self::enqueue(&mut table, request);

        while !table.grantable(id) {
            match deadline {
                None => self.changed.wait(&mut table),
                Some(deadline) => {
                    if self.changed.wait_until(&mut table, deadline).timed_out()
                        && !table.grantable(id)
                    {
                        let scope = table
                            .waiting
                            .iter()
                            .find(|(w, _)| *w == id)
                            .map(|(_, r)| r.describe())
                            .unwrap_or_default();
                        table.waiting.retain(|(w, _)| *w != id);
                        drop(table);
                        // our departure may unblock requests queued behind us
                        self.changed.notify_all();
                        return Err(CoreError::LockTimeout { scope });
                    }
                }
            }
        }

        table.grant(id);
        drop(table);
        // compatible requests queued behind this one may proceed too
        self.changed.notify_all();
        Ok(LockTicket(id))
    }

    /// Grants `request` only if that is possible without waiting.
    pub fn try_acquire(&self, request: LockRequest) -> Option<LockTicket> {
        let mut table = self.table.lock();
        let id = Self::enqueue(&mut table, request);
        if table.grantable(id) {
            table.grant(id);
            Some(LockTicket(id))
        } else {
            table.waiting.retain(|(w, _)| *w != id);
            None
        }
    }

    /// Releases a granted request and wakes waiters.
    pub fn release(&self, ticket: LockTicket) {
        self.table.lock().granted.remove(&ticket.0);
        self.changed.notify_all();
    }

    /// Number of granted requests.
    #[must_use]
    pub fn granted_count(&self) -> usize {
        self.table.lock().granted.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::sync::Arc;
    use std::thread;

    fn stores(names: &[&str], exclusive: bool) -> LockRequest {
        LockRequest::Stores {
            names: names.iter().map(|s| (*s).to_string()).collect(),
            exclusive,
        }
    }

    #[test]
    fn readers_share() {
        let locks = LockManager::new();
        let a = locks.try_acquire(stores(&["books"], false)).unwrap();
        let b = locks.try_acquire(stores(&["books"], false)).unwrap();
        assert_eq!(locks.granted_count(), 2);
        locks.release(a);
        locks.release(b);
        assert_eq!(locks.granted_count(), 0);
    }

    #[test]
    fn writers_exclude_overlapping_scopes() {
        let locks = LockManager::new();
        let w = locks.try_acquire(stores(&["books", "authors"], true)).unwrap();
        assert!(locks.try_acquire(stores(&["books"], false)).is_none());
        assert!(locks.try_acquire(stores(&["authors"], true)).is_none());
        let other = locks.try_acquire(stores(&["notes"], true)).unwrap();
        locks.release(w);
        assert!(locks.try_acquire(stores(&["books"], false)).is_some());
        locks.release(other);
    }

    #[test]
    fn database_lock_conflicts_with_everything() {
        let locks = LockManager::new();
        let r = locks.try_acquire(stores(&["a"], false)).unwrap();
        assert!(locks.try_acquire(LockRequest::Database).is_none());
        locks.release(r);
        let db = locks.try_acquire(LockRequest::Database).unwrap();
        assert!(locks.try_acquire(stores(&["z"], false)).is_none());
        locks.release(db);
    }

    #[test]
    fn timeout_reports_scope() {
        let locks = LockManager::new();
        let _held = locks.try_acquire(stores(&["books"], true)).unwrap();
        let err = locks
            .acquire(stores(&["books"], true), Some(Duration::from_millis(20)))
            .unwrap_err();
        match err {
            CoreError::LockTimeout { scope } => assert_eq!(scope, vec!["books".to_string()]),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn waiters_are_granted_in_order() {
        let locks = Arc::new(LockManager::new());
        let first = locks.try_acquire(stores(&["books"], true)).unwrap();
        let (tx, rx) = mpsc::channel();

        let mut handles = Vec::new();
        for n in 0..3 {
            let thread_locks = Arc::clone(&locks);
            let tx = tx.clone();
            handles.push(thread::spawn(move || {
                let ticket = thread_locks.acquire(stores(&["books"], true), None).unwrap();
                tx.send(n).unwrap();
                thread_locks.release(ticket);
            }));
            // let each waiter enqueue before the next
            while locks.table.lock().waiting.len() < n + 1 {
                thread::yield_now();
            }
        }

        locks.release(first);
        for handle in handles {
            handle.join().unwrap();
        }
        let order: Vec<_> = rx.try_iter().collect();
        assert_eq!(order, vec![0, 1, 2]);
    }

    #[test]
    fn queued_writer_blocks_later_reader() {
        let locks = Arc::new(LockManager::new());
        let reader = locks.try_acquire(stores(&["books"], false)).unwrap();

        let waiter = {
            let locks = Arc::clone(&locks);
            thread::spawn(move || {
                let t = locks.acquire(stores(&["books"], true), None).unwrap();
                locks.release(t);
            })
        };
        while locks.table.lock().waiting.is_empty() {
            thread::yield_now();
        }

        // a new reader must not overtake the queued writer
        assert!(locks.try_acquire(stores(&["books"], false)).is_none());
        locks.release(reader);
        waiter.join().unwrap();
    }
}
