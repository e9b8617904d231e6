//! The collection layer.
//!
//! Work units never touch collections directly. They resolve names to
//! [`CollectionHandle`]s, request locks, and hand finished batches to a
//! [`CollectionStore`]. The store is the only authority on lock state and
//! durability.
//!
//! ## Available Stores
//!
//! - [`JournaledStore`] - In-memory collections made durable by an
//!   append-only journal ([`MemoryJournal`] or [`FileJournal`])

mod journal;
mod journaled;
mod lock;

pub use journal::{FileJournal, JournalBackend, JournalEntry, JournalWrite, MemoryJournal};
pub use journaled::JournaledStore;
pub use lock::LockTable;

use crate::document::{Document, DocumentVariant};
use crate::error::CoreResult;
use crate::transaction::{AccessType, CollectionKind};
use crate::types::{CollectionId, ContextId, WorkUnitId};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, PartialEq, Eq)]
struct CollectionInfo {
    id: CollectionId,
    name: String,
    kind: CollectionKind,
}

/// Shared, read-only reference to a physical collection.
///
/// Handles are cheap to clone. Two handles are equal when they name the
/// same collection ID.
#[derive(Clone)]
pub struct CollectionHandle {
    info: Arc<CollectionInfo>,
}

impl CollectionHandle {
    /// Creates a handle for a collection.
    #[must_use]
    pub fn new(id: CollectionId, name: impl Into<String>, kind: CollectionKind) -> Self {
        Self {
            info: Arc::new(CollectionInfo {
                id,
                name: name.into(),
                kind,
            }),
        }
    }

    /// Returns the collection ID.
    #[must_use]
    pub fn id(&self) -> CollectionId {
        self.info.id
    }

    /// Returns the collection name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.info.name
    }

    /// Returns the collection kind.
    #[must_use]
    pub fn kind(&self) -> CollectionKind {
        self.info.kind
    }
}

impl PartialEq for CollectionHandle {
    fn eq(&self, other: &Self) -> bool {
        self.info.id == other.info.id
    }
}

impl Eq for CollectionHandle {}

impl fmt::Debug for CollectionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CollectionHandle")
            .field("id", &self.info.id)
            .field("name", &self.info.name)
            .field("kind", &self.info.kind)
            .finish()
    }
}

/// The holder of a lock claim: one unit inside one transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LockOwner {
    /// Transaction the claim belongs to.
    pub context: ContextId,
    /// Unit that took the claim.
    pub unit: WorkUnitId,
}

/// A document write waiting for its top-level commit.
#[derive(Debug, Clone)]
pub struct StagedWrite {
    /// Target collection.
    pub collection: CollectionHandle,
    /// Encoded document.
    pub document: Document,
    /// Whether the document is written as an edge.
    pub variant: DocumentVariant,
}

/// Contract between work units and the physical collection layer.
///
/// # Invariants
///
/// - `acquire` never blocks on claims of the same [`ContextId`]
/// - `apply` is atomic: either every write of the batch becomes visible or
///   none does
/// - after `apply(.., true)` returns, the batch survives process termination
pub trait CollectionStore: Send + Sync {
    /// Resolves a collection by name.
    ///
    /// With `create` set, a missing collection is created with that kind.
    ///
    /// # Errors
    ///
    /// Returns `CollectionNotFound` if the collection is missing and `create`
    /// is `None`.
    fn resolve(&self, name: &str, create: Option<CollectionKind>) -> CoreResult<CollectionHandle>;

    /// Looks up a collection by ID.
    fn lookup(&self, id: CollectionId) -> Option<CollectionHandle>;

    /// Acquires (or upgrades) a claim on a collection, waiting up to
    /// `timeout` for conflicting claims of other transactions.
    ///
    /// # Errors
    ///
    /// Returns `LockFailed` on timeout and `CollectionNotFound` if the
    /// collection no longer exists.
    fn acquire(
        &self,
        handle: &CollectionHandle,
        owner: LockOwner,
        access: AccessType,
        timeout: Duration,
    ) -> CoreResult<()>;

    /// Releases the claim `owner` holds on a collection. Releasing a claim
    /// that is not held is a no-op.
    fn release(&self, handle: &CollectionHandle, owner: LockOwner);

    /// Validates that a document may be written to a collection.
    ///
    /// # Errors
    ///
    /// Returns `CollectionNotFound` if the collection no longer exists.
    fn check_write(&self, handle: &CollectionHandle, document: &Document) -> CoreResult<()>;

    /// Durably applies a batch of writes.
    ///
    /// # Errors
    ///
    /// Returns an error if the batch could not be made durable; in that
    /// case nothing was applied.
    fn apply(&self, batch: &[StagedWrite], sync: bool) -> CoreResult<()>;

    /// Returns the committed documents of a collection in commit order.
    ///
    /// # Errors
    ///
    /// Returns `CollectionNotFound` if the collection does not exist.
    fn documents(&self, id: CollectionId) -> CoreResult<Vec<Document>>;
}

/// Journal backend with switchable failures, shared by the store and work
/// unit tests.
#[cfg(test)]
pub(crate) mod testing {
    use super::{JournalBackend, MemoryJournal};
    use crate::error::{CoreError, CoreResult};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    #[derive(Debug, Clone, Default)]
    pub(crate) struct FlakyJournal {
        inner: MemoryJournal,
        fail_sync: Arc<AtomicBool>,
        tear_append: Arc<AtomicBool>,
        fail_truncate: Arc<AtomicBool>,
    }

    impl FlakyJournal {
        pub(crate) fn new() -> Self {
            Self::default()
        }

        /// The bytes written so far, as a plain journal for reopening.
        pub(crate) fn memory(&self) -> MemoryJournal {
            MemoryJournal::with_data(self.inner.data())
        }

        pub(crate) fn fail_syncs(&self, on: bool) {
            self.fail_sync.store(on, Ordering::SeqCst);
        }

        /// Appends write half of the frame and then fail.
        pub(crate) fn tear_appends(&self, on: bool) {
            self.tear_append.store(on, Ordering::SeqCst);
        }

        pub(crate) fn fail_truncates(&self, on: bool) {
            self.fail_truncate.store(on, Ordering::SeqCst);
        }
    }

    impl JournalBackend for FlakyJournal {
        fn append(&mut self, frame: &[u8]) -> CoreResult<u64> {
            if self.tear_append.load(Ordering::SeqCst) {
                self.inner.append(&frame[..frame.len() / 2])?;
                return Err(CoreError::journal("append torn"));
            }
            self.inner.append(frame)
        }

        fn flush(&mut self) -> CoreResult<()> {
            self.inner.flush()
        }

        fn sync(&mut self) -> CoreResult<()> {
            if self.fail_sync.load(Ordering::SeqCst) {
                return Err(CoreError::journal("sync failed"));
            }
            self.inner.sync()
        }

        fn read_all(&self) -> CoreResult<Vec<u8>> {
            self.inner.read_all()
        }

        fn truncate(&mut self, len: u64) -> CoreResult<()> {
            if self.fail_truncate.load(Ordering::SeqCst) {
                return Err(CoreError::journal("truncate failed"));
            }
            self.inner.truncate(len)
        }

        fn size(&self) -> CoreResult<u64> {
            self.inner.size()
        }
    }
}
