//! Key ranges used by every search operation.

use crate::error::{CoreError, CoreResult};
use crate::key::Key;
use std::ops::Bound;

/// An interval over keys. Either end may be absent (unbounded) or open
/// (exclusive).
///
/// A range is immutable once built; constructors guarantee `lower <= upper`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyRange {
    lower: Bound<Key>,
    upper: Bound<Key>,
}

impl KeyRange {
    /// The range covering every key.
    #[must_use]
    pub fn all() -> Self {
        Self {
            lower: Bound::Unbounded,
            upper: Bound::Unbounded,
        }
    }

    /// The range containing exactly `key`.
    #[must_use]
    pub fn only(key: impl Into<Key>) -> Self {
        let key = key.into();
        Self {
            lower: Bound::Included(key.clone()),
            upper: Bound::Included(key),
        }
    }

    /// Keys at or above (`open` = strictly above) `key`.
    #[must_use]
    pub fn lower_bound(key: impl Into<Key>, open: bool) -> Self {
        Self {
            lower: bound(key.into(), open),
            upper: Bound::Unbounded,
        }
    }

    /// Keys at or below (`open` = strictly below) `key`.
    #[must_use]
    pub fn upper_bound(key: impl Into<Key>, open: bool) -> Self {
        Self {
            lower: Bound::Unbounded,
            upper: bound(key.into(), open),
        }
    }

    /// Keys between `lower` and `upper`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidKey` if `lower > upper`, or if they are equal and
    /// either side is open.
    pub fn bound(
        lower: impl Into<Key>,
        upper: impl Into<Key>,
        lower_open: bool,
        upper_open: bool,
    ) -> CoreResult<Self> {
        let (lower, upper) = (lower.into(), upper.into());
        if lower > upper {
            return Err(CoreError::invalid_key(format!(
                "lower bound {lower} is greater than upper bound {upper}"
            )));
        }
        if lower == upper && (lower_open || upper_open) {
            return Err(CoreError::invalid_key(format!(
                "range around {lower} is empty"
            )));
        }
        Ok(Self {
            lower: bound(lower, lower_open),
            upper: bound(upper, upper_open),
        })
    }

    /// Whether `key` falls inside the range.
    #[must_use]
    pub fn includes(&self, key: &Key) -> bool {
        let above_lower = match &self.lower {
            Bound::Included(l) => key >= l,
            Bound::Excluded(l) => key > l,
            Bound::Unbounded => true,
        };
        let below_upper = match &self.upper {
            Bound::Included(u) => key <= u,
            Bound::Excluded(u) => key < u,
            Bound::Unbounded => true,
        };
        above_lower && below_upper
    }

    /// Lower end of the range.
    #[must_use]
    pub fn lower(&self) -> Bound<&Key> {
        self.lower.as_ref()
    }

    /// Upper end of the range.
    #[must_use]
    pub fn upper(&self) -> Bound<&Key> {
        self.upper.as_ref()
    }

    /// The bounds in the form `BTreeMap::range` accepts.
    #[must_use]
    pub fn as_bounds(&self) -> (Bound<&Key>, Bound<&Key>) {
        (self.lower.as_ref(), self.upper.as_ref())
    }

    /// The key this range pins down, if it is a single-key range.
    #[must_use]
    pub fn as_single(&self) -> Option<&Key> {
        match (&self.lower, &self.upper) {
            (Bound::Included(l), Bound::Included(u)) if l == u => Some(l),
            _ => None,
        }
    }
}

impl Default for KeyRange {
    fn default() -> Self {
        Self::all()
    }
}

impl From<Key> for KeyRange {
    fn from(key: Key) -> Self {
        Self::only(key)
    }
}

impl From<&Key> for KeyRange {
    fn from(key: &Key) -> Self {
        Self::only(key.clone())
    }
}

impl From<i64> for KeyRange {
    fn from(n: i64) -> Self {
        Self::only(n)
    }
}

impl From<&str> for KeyRange {
    fn from(s: &str) -> Self {
        Self::only(s)
    }
}

impl From<&KeyRange> for KeyRange {
    fn from(range: &KeyRange) -> Self {
        range.clone()
    }
}

fn bound(key: Key, open: bool) -> Bound<Key> {
    if open {
        Bound::Excluded(key)
    } else {
        Bound::Included(key)
    }
}
