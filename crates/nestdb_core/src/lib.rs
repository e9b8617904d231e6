//! # NestDB Core
//!
//! Nested transaction control for a document database.
//!
//! This crate provides:
//! - Work units with savepoint-style nesting
//! - Collection access arbitration (read, write, exclusive) with escalation
//! - Deadlock-free lock acquisition in collection-ID order
//! - A journaled collection store for durable top-level commits
//!
//! ## Example
//!
//! ```rust
//! use nestdb_core::{
//!     AccessType, Document, DocumentVariant, JournaledStore, MemoryJournal, TransactionContext,
//!     WorkUnit,
//! };
//! use std::sync::Arc;
//!
//! let store = Arc::new(JournaledStore::open(Box::new(MemoryJournal::new())).unwrap());
//! let ctx = TransactionContext::new(store.clone());
//!
//! let mut unit = WorkUnit::new(&ctx, true);
//! let users = unit.add_collection("users", AccessType::Write).unwrap();
//! unit.begin().unwrap();
//! unit.save_document(&users, Document::encode("alice").unwrap(), DocumentVariant::Document)
//!     .unwrap();
//! unit.commit(false).unwrap();
//!
//! assert_eq!(store.entries(users.id()).unwrap().len(), 1);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod document;
mod error;
pub mod store;
pub mod transaction;
mod types;

pub use config::{Config, NestedFailurePolicy};
pub use document::{Document, DocumentVariant};
pub use error::{CoreError, CoreResult, ErrorCode};
pub use store::{
    CollectionHandle, CollectionStore, FileJournal, JournalBackend, JournaledStore, LockOwner,
    MemoryJournal, StagedWrite,
};
pub use transaction::{
    AccessType, AddOptions, CollectionKind, CollectionParticipant, TransactionContext,
    TransactionState, WorkUnit, WorkUnitState,
};
pub use types::{CollectionId, ContextId, WorkUnitId};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
