//! Work unit configuration.

use std::time::Duration;

/// What happens to ancestors when a nested commit fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NestedFailurePolicy {
    /// Only the failing nested unit is rolled back. Ancestors may still
    /// commit.
    #[default]
    Isolated,
    /// The whole transaction is poisoned. Ancestors can only roll back; a
    /// later commit of any ancestor fails.
    AbortAncestors,
}

/// Configuration shared by all units of a transaction context.
#[derive(Debug, Clone)]
pub struct Config {
    /// How long `begin` waits for a conflicting lock held by another
    /// transaction. Zero means fail immediately.
    pub lock_timeout: Duration,

    /// Whether every top-level commit syncs the journal, regardless of the
    /// `wait_for_sync` argument.
    pub sync_on_commit: bool,

    /// Upper bound on the staged writes of one level, counting writes merged
    /// in from committed nested units.
    pub max_pending_writes: usize,

    /// Maximum encoded size of a single document.
    pub max_document_size: usize,

    /// Ancestor behaviour on nested commit failure.
    pub nested_failure_policy: NestedFailurePolicy,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            lock_timeout: Duration::from_secs(30),
            sync_on_commit: false,
            max_pending_writes: 100_000,
            max_document_size: 16 * 1024 * 1024, // 16 MB
            nested_failure_policy: NestedFailurePolicy::Isolated,
        }
    }
}

impl Config {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the lock wait timeout.
    #[must_use]
    pub const fn lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    /// Sets whether to sync the journal on every top-level commit.
    #[must_use]
    pub const fn sync_on_commit(mut self, value: bool) -> Self {
        self.sync_on_commit = value;
        self
    }

    /// Sets the maximum number of staged writes per transaction.
    #[must_use]
    pub const fn max_pending_writes(mut self, limit: usize) -> Self {
        self.max_pending_writes = limit;
        self
    }

    /// Sets the maximum document size.
    #[must_use]
    pub const fn max_document_size(mut self, size: usize) -> Self {
        self.max_document_size = size;
        self
    }

    /// Sets the nested commit failure policy.
    #[must_use]
    pub const fn nested_failure_policy(mut self, policy: NestedFailurePolicy) -> Self {
        self.nested_failure_policy = policy;
        self
    }
}
