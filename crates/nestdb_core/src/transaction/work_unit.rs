//! The work unit state machine.

use crate::config::NestedFailurePolicy;
use crate::document::{Document, DocumentVariant};
use crate::error::{CoreError, CoreResult};
use crate::store::{CollectionHandle, StagedWrite};
use crate::transaction::context::TransactionContext;
use crate::transaction::participant::CollectionParticipant;
use crate::transaction::state::{TransactionState, WorkUnitState};
use crate::transaction::{AccessType, CollectionKind};
use crate::types::{CollectionId, WorkUnitId};
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// Options for registering a collection by name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AddOptions {
    /// Create the collection if it does not exist.
    pub create_if_missing: bool,
    /// Re-resolve the collection even if it is already registered.
    pub force_reload: bool,
}

impl Default for AddOptions {
    fn default() -> Self {
        Self {
            create_if_missing: true,
            force_reload: false,
        }
    }
}

impl AddOptions {
    /// Creates the default options.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets whether a missing collection is created.
    #[must_use]
    pub const fn create_if_missing(mut self, value: bool) -> Self {
        self.create_if_missing = value;
        self
    }

    /// Sets whether the collection is re-resolved.
    #[must_use]
    pub const fn force_reload(mut self, value: bool) -> Self {
        self.force_reload = value;
        self
    }
}

/// One nesting level of a transaction.
///
/// A unit registers the collections it needs, locks them all in
/// collection-ID order on [`begin`](Self::begin), stages document writes, and
/// finishes with [`commit`](Self::commit) or [`rollback`](Self::rollback).
///
/// Only a top-level unit (level 0) commits durably. A nested unit's commit
/// merges its staged writes into its parent's pending state; they become
/// durable when the top-level unit commits and are discarded if any ancestor
/// rolls back.
///
/// A unit dropped before it finished is rolled back.
///
/// # Example
///
/// ```rust
/// use nestdb_core::{
///     AccessType, Document, DocumentVariant, JournaledStore, MemoryJournal, TransactionContext,
///     WorkUnit,
/// };
/// use std::sync::Arc;
///
/// let store = Arc::new(JournaledStore::open(Box::new(MemoryJournal::new())).unwrap());
/// let ctx = TransactionContext::new(store.clone());
///
/// let mut outer = WorkUnit::new(&ctx, false);
/// let docs = outer.add_collection("docs", AccessType::Write).unwrap();
/// outer.begin().unwrap();
///
/// {
///     let mut inner = WorkUnit::new(&ctx, false);
///     let docs = inner.add_collection("docs", AccessType::Write).unwrap();
///     inner.begin().unwrap();
///     inner
///         .save_document(&docs, Document::encode("inner").unwrap(), DocumentVariant::Document)
///         .unwrap();
///     inner.commit(false).unwrap();
/// }
///
/// outer.commit(true).unwrap();
/// assert_eq!(store.entries(docs.id()).unwrap().len(), 1);
/// ```
pub struct WorkUnit<'ctx> {
    context: &'ctx TransactionContext,
    collections: BTreeMap<CollectionId, CollectionParticipant>,
    id: WorkUnitId,
    level: u32,
    single_operation: bool,
    state: WorkUnitState,
    done: bool,
    saves: usize,
}

impl<'ctx> WorkUnit<'ctx> {
    /// Creates a unit at the context's current nesting depth.
    ///
    /// A single-operation unit is a top-level fast path for exactly one
    /// write. Requested on a nested level the flag is ignored and an
    /// ordinary nested unit is created.
    pub fn new(context: &'ctx TransactionContext, single_operation: bool) -> Self {
        let id = context.allocate_id();
        let level = context.current_depth();
        let single = single_operation && level == 0;
        if single_operation && !single {
            debug!(%id, level, "single-operation requested on a nested unit, ignoring");
        }
        context.enter_level();
        debug!(context = %context.id(), %id, level, single_operation = single, "work unit created");

        Self {
            context,
            collections: BTreeMap::new(),
            id,
            level,
            single_operation: single,
            state: WorkUnitState::Constructed,
            done: false,
            saves: 0,
        }
    }

    /// Returns the unit ID.
    #[must_use]
    pub fn id(&self) -> WorkUnitId {
        self.id
    }

    /// Returns the nesting level (0 = top-level).
    #[must_use]
    pub fn level(&self) -> u32 {
        self.level
    }

    /// Whether this is the outermost unit of its transaction.
    #[must_use]
    pub fn is_top_level(&self) -> bool {
        self.level == 0
    }

    /// Whether the unit is a single-operation unit.
    #[must_use]
    pub fn is_single_operation(&self) -> bool {
        self.single_operation
    }

    /// Returns the lifecycle state.
    #[must_use]
    pub fn state(&self) -> WorkUnitState {
        self.state
    }

    /// Whether the unit has finished.
    #[must_use]
    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Returns the transaction context.
    #[must_use]
    pub fn context(&self) -> &'ctx TransactionContext {
        self.context
    }

    /// Returns the registered participants in collection-ID order.
    pub fn collections(&self) -> impl Iterator<Item = &CollectionParticipant> {
        self.collections.values()
    }

    /// Registers a collection by name, creating it if missing.
    ///
    /// # Errors
    ///
    /// See [`add_collection_with`](Self::add_collection_with).
    pub fn add_collection(
        &mut self,
        name: &str,
        access: AccessType,
    ) -> CoreResult<CollectionParticipant> {
        self.add_collection_with(name, access, None, AddOptions::default())
    }

    /// Registers a collection by name and asserts its kind.
    ///
    /// # Errors
    ///
    /// See [`add_collection_with`](Self::add_collection_with).
    pub fn add_collection_of_kind(
        &mut self,
        name: &str,
        access: AccessType,
        kind: CollectionKind,
    ) -> CoreResult<CollectionParticipant> {
        self.add_collection_with(name, access, Some(kind), AddOptions::default())
    }

    /// Registers a collection by name.
    ///
    /// Registering an already registered collection returns the existing
    /// participant, escalated if `access` is broader than what was granted.
    /// While the unit is begun the new or escalated claim is locked
    /// immediately; otherwise locking waits for [`begin`](Self::begin).
    ///
    /// # Errors
    ///
    /// - `InvalidState` if the unit is done
    /// - `CollectionNotFound` if the collection is missing and
    ///   `create_if_missing` is off
    /// - `TypeMismatch` if `kind` is given and differs from the collection
    /// - `TooManyOperations` if a single-operation unit already has another
    ///   write-capable collection
    /// - `LockFailed` if the unit is begun and the lock cannot be acquired
    pub fn add_collection_with(
        &mut self,
        name: &str,
        access: AccessType,
        kind: Option<CollectionKind>,
        options: AddOptions,
    ) -> CoreResult<CollectionParticipant> {
        self.ensure_not_done("add a collection")?;

        let registered = self
            .collections
            .values()
            .find(|p| p.name() == name)
            .map(|p| p.handle().clone());

        let handle = match registered {
            Some(handle) if !options.force_reload => handle,
            _ => {
                let create = options
                    .create_if_missing
                    .then(|| kind.unwrap_or(CollectionKind::Document));
                self.context.store().resolve(name, create)?
            }
        };

        if let Some(expected) = kind {
            if handle.kind() != expected {
                return Err(CoreError::TypeMismatch {
                    name: name.to_string(),
                    expected,
                    actual: handle.kind(),
                });
            }
        }

        self.register(handle, access, kind, options.create_if_missing)
    }

    /// Registers a collection through a handle the caller already holds.
    ///
    /// # Errors
    ///
    /// Same as [`add_collection_with`](Self::add_collection_with); the
    /// collection must still exist.
    pub fn add_collection_handle(
        &mut self,
        handle: &CollectionHandle,
        access: AccessType,
    ) -> CoreResult<CollectionParticipant> {
        self.ensure_not_done("add a collection")?;
        let handle = self
            .context
            .store()
            .lookup(handle.id())
            .ok_or_else(|| CoreError::not_found(handle.name()))?;
        self.register(handle, access, None, false)
    }

    /// Looks up a registered participant.
    #[must_use]
    pub fn find_collection(&self, id: CollectionId) -> Option<&CollectionParticipant> {
        self.collections.get(&id)
    }

    /// Acquires every registered collection and starts the unit.
    ///
    /// Locks are requested in ascending collection-ID order. If any request
    /// fails, the claims taken so far are released and the unit stays
    /// constructed, so the caller may retry.
    ///
    /// # Errors
    ///
    /// - `InvalidState` if the unit is not in the constructed state
    /// - `LockFailed` if a lock could not be acquired in time
    /// - `CollectionNotFound` if a collection vanished since registration
    pub fn begin(&mut self) -> CoreResult<()> {
        self.ensure_not_done("begin")?;
        if self.state != WorkUnitState::Constructed {
            return Err(CoreError::invalid_state(format!(
                "cannot begin {} in state {}",
                self.id, self.state
            )));
        }

        let store = self.context.store();
        let owner = self.context.owner(self.id);
        let timeout = self.context.config().lock_timeout;

        for participant in self.collections.values() {
            if let Err(err) = store.acquire(participant.handle(), owner, participant.access(), timeout) {
                let released = self.context.release_unit(self.id);
                warn!(unit = %self.id, collection = %participant.id(), released, error = %err, "begin failed");
                return Err(err);
            }
            self.context.record_claim(participant.handle(), self.id);
        }

        self.state = WorkUnitState::Begun;
        debug!(
            unit = %self.id,
            level = self.level,
            collections = self.collections.len(),
            "work unit begun"
        );
        Ok(())
    }

    /// Commits the unit.
    ///
    /// At level 0 the staged writes of this unit and of every nested unit
    /// that committed into it are applied to the store as one batch; the
    /// call waits for durability if `wait_for_sync` is set or the context is
    /// configured to sync on commit. Afterwards every lock of the
    /// transaction is released.
    ///
    /// On a nested level the staged writes move into the parent's pending
    /// state and the locks stay held for the enclosing transaction.
    ///
    /// # Errors
    ///
    /// - `InvalidState` if the unit is not begun or is not the innermost
    ///   open unit
    /// - `CommitFailed` if finalization failed; the unit has then been
    ///   rolled back and is done
    pub fn commit(&mut self, wait_for_sync: bool) -> CoreResult<()> {
        self.ensure_not_done("commit")?;
        self.ensure_begun("commit")?;
        self.ensure_innermost("commit")?;

        let outcome = if self.is_top_level() {
            self.commit_top_level(wait_for_sync)
        } else {
            self.commit_nested()
        };

        match outcome {
            Ok(writes) => {
                self.state = WorkUnitState::Committed;
                self.finish();
                debug!(unit = %self.id, level = self.level, writes, "work unit committed");
                Ok(())
            }
            Err(reason) => {
                warn!(unit = %self.id, level = self.level, %reason, "commit failed, rolling back");
                if !self.is_top_level()
                    && self.context.config().nested_failure_policy
                        == NestedFailurePolicy::AbortAncestors
                {
                    self.context.poison();
                }
                self.abort();
                Err(CoreError::commit_failed(self.id, reason))
            }
        }
    }

    /// Discards the unit's effects and finishes it.
    ///
    /// Rolling back a unit that was never begun only finishes it. Rolling
    /// back a nested unit leaves its ancestors' pending state untouched and
    /// releases the locks it holds, including those its committed children
    /// handed up to it.
    ///
    /// # Errors
    ///
    /// Returns `InvalidState` if the unit is already done; nothing is
    /// changed in that case.
    pub fn rollback(&mut self) -> CoreResult<()> {
        self.ensure_not_done("roll back")?;
        self.abort();
        Ok(())
    }

    /// Stages a document write to a registered collection.
    ///
    /// # Errors
    ///
    /// - `InvalidState` if the unit is not begun or is not the innermost
    ///   open unit, or the document is too large
    /// - `CollectionNotFound` if the participant belongs to another unit
    /// - `AccessDenied` if the participant was not granted write access
    /// - `TypeMismatch` if `variant` does not match the collection kind
    /// - `TooManyOperations` if a write limit of the unit is reached
    pub fn save_document(
        &mut self,
        participant: &CollectionParticipant,
        document: Document,
        variant: DocumentVariant,
    ) -> CoreResult<()> {
        self.ensure_not_done("save a document")?;
        self.ensure_begun("save a document")?;
        self.ensure_innermost("save a document")?;

        let registered = self
            .collections
            .get(&participant.id())
            .filter(|_| participant.unit() == self.id)
            .ok_or_else(|| CoreError::not_found(participant.name()))?;

        if !registered.can_write() {
            return Err(CoreError::AccessDenied {
                collection: registered.id(),
                granted: registered.access(),
            });
        }

        let expected = match variant {
            DocumentVariant::Document => CollectionKind::Document,
            DocumentVariant::Edge => CollectionKind::Edge,
        };
        if registered.kind() != expected {
            return Err(CoreError::TypeMismatch {
                name: registered.name().to_string(),
                expected,
                actual: registered.kind(),
            });
        }

        if self.single_operation && self.saves >= 1 {
            return Err(CoreError::too_many_operations(
                self.id,
                "single-operation unit already saved a document",
            ));
        }

        let config = self.context.config();
        if self.context.frame_len(self.level) >= config.max_pending_writes {
            return Err(CoreError::too_many_operations(
                self.id,
                format!("pending write limit of {} reached", config.max_pending_writes),
            ));
        }
        if document.len() > config.max_document_size {
            return Err(CoreError::DocumentTooLarge {
                size: document.len(),
                limit: config.max_document_size,
            });
        }

        self.context.store().check_write(registered.handle(), &document)?;
        self.context.stage(
            self.level,
            StagedWrite {
                collection: registered.handle().clone(),
                document,
                variant,
            },
        );
        self.saves += 1;
        Ok(())
    }

    fn register(
        &mut self,
        handle: CollectionHandle,
        access: AccessType,
        asserted_kind: Option<CollectionKind>,
        allow_creation: bool,
    ) -> CoreResult<CollectionParticipant> {
        let id = handle.id();
        let existing = self.collections.get(&id).cloned();

        if self.single_operation && access.is_write_capable() {
            let other_writer = self
                .collections
                .values()
                .any(|p| p.id() != id && p.can_write());
            if other_writer {
                return Err(CoreError::too_many_operations(
                    self.id,
                    "single-operation unit already has a write-capable collection",
                ));
            }
        }

        let (participant, escalated) = match existing {
            Some(mut participant) => {
                let escalated = participant.escalate(access);
                participant.refresh(handle);
                (participant, escalated)
            }
            None => (
                CollectionParticipant::new(handle, access, self.id, asserted_kind, allow_creation),
                true,
            ),
        };

        if escalated && self.state == WorkUnitState::Begun {
            self.context.store().acquire(
                participant.handle(),
                self.context.owner(self.id),
                participant.access(),
                self.context.config().lock_timeout,
            )?;
            self.context.record_claim(participant.handle(), self.id);
        }

        if escalated {
            debug!(
                unit = %self.id,
                collection = %id,
                access = %participant.access(),
                "collection registered"
            );
        }
        self.collections.insert(id, participant.clone());
        Ok(participant)
    }

    fn commit_top_level(&mut self, wait_for_sync: bool) -> Result<usize, String> {
        if self.context.is_poisoned() {
            return Err("transaction was poisoned by a failed nested commit".to_string());
        }

        let batch = self.context.take_frame(self.level);
        let sync = wait_for_sync || self.context.config().sync_on_commit;
        self.context
            .store()
            .apply(&batch, sync)
            .map_err(|e| e.to_string())?;
        Ok(batch.len())
    }

    fn commit_nested(&mut self) -> Result<usize, String> {
        self.context
            .merge_into_parent(self.level, self.context.config().max_pending_writes)
    }

    /// Moves a non-terminal unit to `RolledBack` and finishes it.
    fn abort(&mut self) {
        if self.state == WorkUnitState::Begun {
            let discarded = self.context.discard_frame(self.level);
            debug!(unit = %self.id, level = self.level, discarded, "work unit rolled back");
        }
        self.state = WorkUnitState::RolledBack;
        self.finish();
    }

    /// Releases locks, leaves the nesting level and marks the unit done.
    ///
    /// Runs at most once per unit.
    fn finish(&mut self) {
        if self.done {
            return;
        }

        if self.is_top_level() {
            self.context.release_all();
        } else if self.state == WorkUnitState::RolledBack {
            self.context.release_from(self.id);
        }

        if self.context.current_depth() != self.level + 1 {
            warn!(
                unit = %self.id,
                level = self.level,
                depth = self.context.current_depth(),
                "work unit finished out of nesting order"
            );
        }
        self.context.exit_level();
        self.done = true;
    }

    fn ensure_not_done(&self, operation: &str) -> CoreResult<()> {
        if self.done {
            return Err(CoreError::invalid_state(format!(
                "cannot {operation}: {} is already {}",
                self.id, self.state
            )));
        }
        Ok(())
    }

    fn ensure_begun(&self, operation: &str) -> CoreResult<()> {
        if self.state != WorkUnitState::Begun {
            return Err(CoreError::invalid_state(format!(
                "cannot {operation}: {} is {}",
                self.id, self.state
            )));
        }
        Ok(())
    }

    fn ensure_innermost(&self, operation: &str) -> CoreResult<()> {
        let depth = self.context.current_depth();
        if depth != self.level + 1 {
            return Err(CoreError::invalid_state(format!(
                "cannot {operation}: {} at level {} is not the innermost unit (depth {depth})",
                self.id, self.level
            )));
        }
        Ok(())
    }
}

impl TransactionState for WorkUnit<'_> {
    fn status(&self) -> WorkUnitState {
        self.state
    }

    fn is_done(&self) -> bool {
        self.done
    }

    fn begin(&mut self) -> CoreResult<()> {
        WorkUnit::begin(self)
    }

    fn commit(&mut self, wait_for_sync: bool) -> CoreResult<()> {
        WorkUnit::commit(self, wait_for_sync)
    }

    fn rollback(&mut self) -> CoreResult<()> {
        WorkUnit::rollback(self)
    }
}

impl Drop for WorkUnit<'_> {
    fn drop(&mut self) {
        if !self.done {
            warn!(unit = %self.id, level = self.level, state = %self.state, "work unit dropped unfinished, rolling back");
            self.abort();
        }
    }
}

impl std::fmt::Debug for WorkUnit<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkUnit")
            .field("id", &self.id)
            .field("level", &self.level)
            .field("single_operation", &self.single_operation)
            .field("state", &self.state)
            .field("done", &self.done)
            .field("collections", &self.collections.len())
            .finish()
    }
}
