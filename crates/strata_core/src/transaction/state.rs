//! Transaction lifecycle state.

use std::fmt;

/// State of a transaction.
///
/// `Active → Committing → Committed` on success, `Active → Aborted` (or
/// `Committing → Aborted` when the commit itself fails) otherwise. Terminal
/// states are final.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransactionState {
    /// Accepting operations.
    Active,
    /// Writing its batch to the log.
    Committing,
    /// Durable.
    Committed,
    /// Rolled back.
    Aborted,
}

impl TransactionState {
    /// Whether no further transition is possible.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Committed | Self::Aborted)
    }
}

impl fmt::Display for TransactionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Active => "active",
            Self::Committing => "committing",
            Self::Committed => "committed",
            Self::Aborted => "aborted",
        })
    }
}
