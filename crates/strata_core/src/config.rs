//! Database configuration.

use std::time::Duration;

/// Configuration shared by every database a factory opens.
#[derive(Debug, Clone)]
pub struct Config {
    /// Whether to sync the WAL on every commit (safer but slower).
    pub sync_on_commit: bool,

    /// Maximum bytes of WAL plus checkpoint per database.
    pub quota_bytes: Option<u64>,

    /// Checkpoint after a commit once the WAL grows past this size (0 = never).
    pub auto_checkpoint_bytes: u64,

    /// How long `open` and `delete_database` wait for notified connections
    /// to close before reporting them.
    pub blocked_timeout: Duration,

    /// Upper bound on waiting for store locks. `None` waits indefinitely.
    pub lock_timeout: Option<Duration>,

    /// Format version written to checkpoints.
    pub format_version: (u16, u16),
}

impl Default for Config {
    fn default() -> Self {
        Self {
            sync_on_commit: true,
            quota_bytes: None,
            auto_checkpoint_bytes: 8 * 1024 * 1024, // 8 MB
            blocked_timeout: Duration::ZERO,
            lock_timeout: None,
            format_version: (1, 0),
        }
    }
}

impl Config {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets whether to sync the WAL on every commit.
    #[must_use]
    pub const fn sync_on_commit(mut self, value: bool) -> Self {
        self.sync_on_commit = value;
        self
    }

    /// Sets the per-database storage quota.
    #[must_use]
    pub const fn quota_bytes(mut self, limit: u64) -> Self {
        self.quota_bytes = Some(limit);
        self
    }

    /// Sets the WAL size that triggers an automatic checkpoint.
    #[must_use]
    pub const fn auto_checkpoint_bytes(mut self, size: u64) -> Self {
        self.auto_checkpoint_bytes = size;
        self
    }

    /// Sets how long upgrades wait on connections that were asked to close.
    #[must_use]
    pub const fn blocked_timeout(mut self, timeout: Duration) -> Self {
        self.blocked_timeout = timeout;
        self
    }

    /// Bounds how long a transaction waits for its store locks.
    #[must_use]
    pub const fn lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = Some(timeout);
        self
    }
}
