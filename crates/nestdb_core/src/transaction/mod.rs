//! Nested units of work.
//!
//! A [`TransactionContext`] represents one logical transaction. Every
//! [`WorkUnit`] created from it opens one nesting level:
//! - **Top-level units** (level 0) commit durably through the collection
//!   store and release the transaction's locks
//! - **Nested units** act as savepoints: their commit is provisional and
//!   only becomes durable when the top-level unit commits
//! - **Access arbitration** registers each collection once per unit with an
//!   [`AccessType`] that can be escalated but never lowered

mod access;
mod context;
mod participant;
mod state;
mod work_unit;

pub use access::{AccessType, CollectionKind};
pub use context::TransactionContext;
pub use participant::CollectionParticipant;
pub use state::{TransactionState, WorkUnitState};
pub use work_unit::{AddOptions, WorkUnit};
