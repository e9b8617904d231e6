//! Lifecycle states and the generic transaction contract.

use crate::error::CoreResult;
use std::fmt;

/// Lifecycle state of a work unit.
///
/// `Constructed → Begun → {Committed | RolledBack}`. A unit that reached
/// `Committed` or `RolledBack` is also done; a never-begun unit may go
/// straight from `Constructed` to `RolledBack`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkUnitState {
    /// Created, collections may be registered.
    Constructed,
    /// Locks are held, documents may be written.
    Begun,
    /// Effects were committed (durably at level 0, provisionally above).
    Committed,
    /// Effects were discarded.
    RolledBack,
}

impl WorkUnitState {
    /// Whether this is a terminal state.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Committed | Self::RolledBack)
    }
}

impl fmt::Display for WorkUnitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Constructed => "constructed",
            Self::Begun => "begun",
            Self::Committed => "committed",
            Self::RolledBack => "rolled back",
        };
        f.write_str(name)
    }
}

/// The begin/commit/rollback contract shared by transaction states.
///
/// [`crate::WorkUnit`] is the implementation used by the engine; the trait
/// lets callers drive a unit without knowing its nesting level.
pub trait TransactionState {
    /// Returns the current lifecycle state.
    fn status(&self) -> WorkUnitState;

    /// Whether the unit reached its terminal state and was torn down.
    fn is_done(&self) -> bool;

    /// Acquires all registered collections and starts the unit.
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` if the unit was already begun or is done,
    /// `LockFailed` if a collection lock could not be acquired.
    fn begin(&mut self) -> CoreResult<()>;

    /// Commits the unit.
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` if the unit is not begun, `CommitFailed` if
    /// finalization failed (the unit is then rolled back).
    fn commit(&mut self, wait_for_sync: bool) -> CoreResult<()>;

    /// Discards the unit's effects.
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` if the unit is already done.
    fn rollback(&mut self) -> CoreResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_states() {
        assert!(!WorkUnitState::Constructed.is_terminal());
        assert!(!WorkUnitState::Begun.is_terminal());
        assert!(WorkUnitState::Committed.is_terminal());
        assert!(WorkUnitState::RolledBack.is_terminal());
    }

    #[test]
    fn display() {
        assert_eq!(WorkUnitState::RolledBack.to_string(), "rolled back");
    }
}
