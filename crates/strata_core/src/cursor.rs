//! Cursors over stores and indexes.
//!
//! A cursor remembers only its current position and record. Every step
//! re-seeks the ordered map from that position, so concurrent writes made
//! through the same transaction are observed and memory stays constant.

use crate::error::{CoreError, CoreResult};
use crate::key::Key;
use crate::key_range::KeyRange;
use crate::store::{decode_value, scan, IndexData, ObjectStore, StoreData};
use std::ops::Bound;
use strata_codec::Value;

/// Iteration direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Direction {
    /// Ascending, every record.
    #[default]
    Next,
    /// Ascending, one record per distinct index key.
    NextUnique,
    /// Descending, every record.
    Prev,
    /// Descending, one record per distinct index key.
    PrevUnique,
}

impl Direction {
    /// Whether keys ascend.
    #[must_use]
    pub const fn is_forward(self) -> bool {
        matches!(self, Self::Next | Self::NextUnique)
    }

    /// Whether duplicate index keys are skipped.
    #[must_use]
    pub const fn is_unique(self) -> bool {
        matches!(self, Self::NextUnique | Self::PrevUnique)
    }
}

/// A record produced by a cursor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CursorRecord {
    /// Index key for index cursors, primary key otherwise.
    pub key: Key,
    /// Primary key.
    pub primary_key: Key,
    /// Record value.
    pub value: Value,
}

enum Seek<'a> {
    Start,
    /// Strictly past the current position.
    After { key: &'a Key, primary: &'a Key },
    /// First position at or beyond `key` in the cursor direction.
    AtOrBeyond(&'a Key),
}

/// A positioned cursor.
pub struct Cursor<'t> {
    store: ObjectStore<'t>,
    index: Option<String>,
    range: KeyRange,
    direction: Direction,
    current: Option<CursorRecord>,
}

impl<'t> Cursor<'t> {
    pub(crate) fn open(
        store: ObjectStore<'t>,
        index: Option<String>,
        range: KeyRange,
        direction: Direction,
    ) -> CoreResult<Option<Self>> {
        let mut cursor = Self {
            store,
            index,
            range,
            direction,
            current: None,
        };
        cursor.current = cursor.seek(&Seek::Start)?;
        Ok(cursor.current.is_some().then_some(cursor))
    }

    /// Current key: the index key for index cursors.
    #[must_use]
    pub fn key(&self) -> Option<&Key> {
        self.current.as_ref().map(|r| &r.key)
    }

    /// Current primary key.
    #[must_use]
    pub fn primary_key(&self) -> Option<&Key> {
        self.current.as_ref().map(|r| &r.primary_key)
    }

    /// Current record value.
    #[must_use]
    pub fn value(&self) -> Option<&Value> {
        self.current.as_ref().map(|r| &r.value)
    }

    /// Current record, if the cursor is positioned.
    #[must_use]
    pub fn record(&self) -> Option<&CursorRecord> {
        self.current.as_ref()
    }

    /// Cursor direction.
    #[must_use]
    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// Moves `count` positions; `false` once the cursor runs off the end.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` for a zero count and `TransactionInactive`
    /// once the transaction has finished.
    pub fn advance(&mut self, count: u32) -> CoreResult<bool> {
        if count == 0 {
            return Err(CoreError::invalid_argument("advance count must be positive"));
        }
        for _ in 0..count {
            let next = match &self.current {
                Some(current) => self.seek(&Seek::After {
                    key: &current.key,
                    primary: &current.primary_key,
                })?,
                None => return self.store.with_data(|_| Ok(false)),
            };
            self.current = next;
            if self.current.is_none() {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Moves to the next position, or to the first position at or beyond
    /// `target` in the cursor direction.
    ///
    /// # Errors
    ///
    /// Returns `InvalidKey` if `target` does not lie ahead of the current
    /// key, and `TransactionInactive` once the transaction has finished.
    pub fn continue_to(&mut self, target: Option<&Key>) -> CoreResult<bool> {
        let Some(target) = target else {
            return self.advance(1);
        };
        let Some(current) = &self.current else {
            return self.store.with_data(|_| Ok(false));
        };

        let ahead = if self.direction.is_forward() {
            target > &current.key
        } else {
            target < &current.key
        };
        if !ahead {
            return Err(CoreError::invalid_key(format!(
                "continue target {target} is not {} current key {}",
                if self.direction.is_forward() { "after" } else { "before" },
                current.key
            )));
        }

        self.current = self.seek(&Seek::AtOrBeyond(target))?;
        Ok(self.current.is_some())
    }

    /// Replaces the current record's value.
    ///
    /// # Errors
    ///
    /// - `InvalidState` in a read-only transaction or on an exhausted cursor
    /// - `InvalidKey` if the value's in-line key differs from the primary key
    pub fn update(&mut self, value: impl Into<Value>) -> CoreResult<Key> {
        let value = value.into();
        let primary = self
            .primary_key()
            .cloned()
            .ok_or_else(|| CoreError::invalid_state("cursor is not positioned on a record"))?;

        let key = match self.store.key_path()? {
            Some(path) => {
                if path.extract_key(&value).as_ref() != Some(&primary) {
                    return Err(CoreError::invalid_key(format!(
                        "updated value must keep primary key {primary}"
                    )));
                }
                self.store.put(value.clone(), None)?
            }
            None => self.store.put(value.clone(), primary)?,
        };

        if let Some(current) = self.current.as_mut() {
            current.value = value;
        }
        Ok(key)
    }

    /// Deletes the current record. The cursor stays positioned and the next
    /// step moves past it.
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` in a read-only transaction or on an exhausted
    /// cursor.
    pub fn delete(&mut self) -> CoreResult<()> {
        let primary = self
            .primary_key()
            .cloned()
            .ok_or_else(|| CoreError::invalid_state("cursor is not positioned on a record"))?;
        self.store.delete(primary)
    }

    fn seek(&self, seek: &Seek<'_>) -> CoreResult<Option<CursorRecord>> {
        self.store.with_data(|data| {
            let found = match &self.index {
                None => self.seek_store(data, seek),
                Some(name) => {
                    let index = data.index(name).ok_or_else(|| {
                        CoreError::invalid_state(format!("index {name:?} has been deleted"))
                    })?;
                    self.seek_index(index, seek)
                }
            };
            let Some((key, primary_key)) = found else {
                return Ok(None);
            };
            let bytes = data.records().get(&primary_key).ok_or_else(|| {
                CoreError::invalid_state(format!("index entry {key} points at missing record"))
            })?;
            Ok(Some(CursorRecord {
                key,
                primary_key,
                value: decode_value(bytes)?,
            }))
        })
    }

    /// Bounds to search for the next position.
    fn window<'a>(&'a self, seek: &Seek<'a>) -> (Bound<&'a Key>, Bound<&'a Key>) {
        let (lower, upper) = self.range.as_bounds();
        match (seek, self.direction.is_forward()) {
            (Seek::Start, _) => (lower, upper),
            (Seek::After { key, .. }, true) => (Bound::Excluded(*key), upper),
            (Seek::After { key, .. }, false) => (lower, Bound::Excluded(*key)),
            (Seek::AtOrBeyond(target), true) => (Bound::Included(*target), upper),
            (Seek::AtOrBeyond(target), false) => (lower, Bound::Included(*target)),
        }
    }

    fn seek_store(&self, data: &StoreData, seek: &Seek<'_>) -> Option<(Key, Key)> {
        let (lower, upper) = self.window(seek);
        let mut hits = scan(data.records(), lower, upper).map(|(key, _)| key);
        let key = if self.direction.is_forward() {
            hits.next()
        } else {
            hits.next_back()
        }?;
        Some((key.clone(), key.clone()))
    }

    fn seek_index(&self, index: &IndexData, seek: &Seek<'_>) -> Option<(Key, Key)> {
        let forward = self.direction.is_forward();
        let unique = self.direction.is_unique();

        // next primary key under the same index key
        if let (Seek::After { key, primary }, false) = (seek, unique) {
            if let Some(holders) = index.entries().get(*key) {
                let sibling = if forward {
                    holders
                        .range::<Key, _>((Bound::Excluded(*primary), Bound::Unbounded))
                        .next()
                } else {
                    holders
                        .range::<Key, _>((Bound::Unbounded, Bound::Excluded(*primary)))
                        .next_back()
                };
                if let Some(primary) = sibling {
                    return Some(((*key).clone(), primary.clone()));
                }
            }
        }

        let (lower, upper) = self.window(seek);
        let mut hits = scan(index.entries(), lower, upper);
        let (key, holders) = if forward { hits.next() } else { hits.next_back() }?;
        let primary = if forward || unique {
            holders.first()
        } else {
            holders.last()
        }?;
        Some((key.clone(), primary.clone()))
    }
}

impl std::fmt::Debug for Cursor<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cursor")
            .field("store", &self.store.name())
            .field("index", &self.index)
            .field("direction", &self.direction)
            .field("key", &self.key())
            .finish_non_exhaustive()
    }
}

/// Iterator over the records a cursor visits, starting at its current one.
pub struct CursorIter<'t> {
    cursor: Cursor<'t>,
    started: bool,
    finished: bool,
}

impl Iterator for CursorIter<'_> {
    type Item = CoreResult<CursorRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        if self.started {
            match self.cursor.advance(1) {
                Ok(true) => {}
                Ok(false) => {
                    self.finished = true;
                    return None;
                }
                Err(e) => {
                    self.finished = true;
                    return Some(Err(e));
                }
            }
        }
        self.started = true;
        match self.cursor.record() {
            Some(record) => Some(Ok(record.clone())),
            None => {
                self.finished = true;
                None
            }
        }
    }
}

impl<'t> IntoIterator for Cursor<'t> {
    type Item = CoreResult<CursorRecord>;
    type IntoIter = CursorIter<'t>;

    fn into_iter(self) -> Self::IntoIter {
        CursorIter {
            cursor: self,
            started: false,
            finished: false,
        }
    }
}
