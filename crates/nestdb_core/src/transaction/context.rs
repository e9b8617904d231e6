//! Transaction context shared by all nesting levels.

use crate::config::Config;
use crate::store::{CollectionHandle, CollectionStore, LockOwner, StagedWrite};
use crate::types::{ContextId, WorkUnitId};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{trace, warn};

#[derive(Debug)]
struct HeldClaim {
    handle: CollectionHandle,
    unit: WorkUnitId,
}

/// State shared by every work unit of one logical transaction.
///
/// The context allocates unit IDs, tracks the nesting depth, and keeps the
/// pending state of each open level: one frame of staged writes per level,
/// plus a ledger of every lock claim taken on behalf of the transaction.
///
/// Units borrow the context, so it always outlives them. Units must be
/// created and finished in strict LIFO order; the context does not support
/// two levels being driven concurrently from different threads.
///
/// # Example
///
/// ```rust
/// use nestdb_core::{AccessType, JournaledStore, MemoryJournal, TransactionContext, WorkUnit};
/// use std::sync::Arc;
///
/// let store = Arc::new(JournaledStore::open(Box::new(MemoryJournal::new())).unwrap());
/// let ctx = TransactionContext::new(store);
///
/// let mut unit = WorkUnit::new(&ctx, false);
/// unit.add_collection("docs", AccessType::Write).unwrap();
/// unit.begin().unwrap();
/// unit.commit(false).unwrap();
/// assert_eq!(ctx.current_depth(), 0);
/// ```
pub struct TransactionContext {
    id: ContextId,
    store: Arc<dyn CollectionStore>,
    config: Config,
    next_id: AtomicU64,
    depth: AtomicU32,
    frames: Mutex<Vec<Vec<StagedWrite>>>,
    claims: Mutex<Vec<HeldClaim>>,
    poisoned: AtomicBool,
}

impl TransactionContext {
    /// Creates a context with the default configuration.
    pub fn new(store: Arc<dyn CollectionStore>) -> Self {
        Self::with_config(store, Config::default())
    }

    /// Creates a context with an explicit configuration.
    pub fn with_config(store: Arc<dyn CollectionStore>, config: Config) -> Self {
        Self {
            id: ContextId::generate(),
            store,
            config,
            next_id: AtomicU64::new(1),
            depth: AtomicU32::new(0),
            frames: Mutex::new(Vec::new()),
            claims: Mutex::new(Vec::new()),
            poisoned: AtomicBool::new(false),
        }
    }

    /// Returns the context ID.
    #[must_use]
    pub fn id(&self) -> ContextId {
        self.id
    }

    /// Returns the collection store.
    #[must_use]
    pub fn store(&self) -> &dyn CollectionStore {
        self.store.as_ref()
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Allocates the next unit ID.
    pub fn allocate_id(&self) -> WorkUnitId {
        WorkUnitId::new(self.next_id.fetch_add(1, Ordering::SeqCst))
    }

    /// Returns the current nesting depth (number of open units).
    #[must_use]
    pub fn current_depth(&self) -> u32 {
        self.depth.load(Ordering::SeqCst)
    }

    /// Opens a new nesting level with an empty pending frame.
    pub fn enter_level(&self) {
        self.frames.lock().push(Vec::new());
        self.depth.fetch_add(1, Ordering::SeqCst);
    }

    /// Closes the innermost nesting level, discarding whatever is left in
    /// its pending frame.
    pub fn exit_level(&self) {
        let mut frames = self.frames.lock();
        if frames.pop().is_none() {
            warn!(context = %self.id, "exit_level called without an open level");
            return;
        }
        self.depth.fetch_sub(1, Ordering::SeqCst);
        if frames.is_empty() {
            self.poisoned.store(false, Ordering::SeqCst);
        }
    }

    /// Returns the number of staged writes across all open levels.
    #[must_use]
    pub fn pending_writes(&self) -> usize {
        self.frames.lock().iter().map(Vec::len).sum()
    }

    /// Whether a failed nested commit poisoned the transaction.
    #[must_use]
    pub fn is_poisoned(&self) -> bool {
        self.poisoned.load(Ordering::SeqCst)
    }

    pub(crate) fn poison(&self) {
        self.poisoned.store(true, Ordering::SeqCst);
    }

    pub(crate) fn owner(&self, unit: WorkUnitId) -> LockOwner {
        LockOwner {
            context: self.id,
            unit,
        }
    }

    pub(crate) fn frame_len(&self, level: u32) -> usize {
        self.frames
            .lock()
            .get(level as usize)
            .map_or(0, Vec::len)
    }

    pub(crate) fn stage(&self, level: u32, write: StagedWrite) {
        if let Some(frame) = self.frames.lock().get_mut(level as usize) {
            frame.push(write);
        }
    }

    /// Moves the frame of `level` into the frame below it.
    ///
    /// Fails without moving anything if the merged frame would exceed
    /// `limit` writes.
    pub(crate) fn merge_into_parent(&self, level: u32, limit: usize) -> Result<usize, String> {
        let level = level as usize;
        let mut frames = self.frames.lock();
        if level == 0 || level >= frames.len() {
            return Err(format!("no parent frame for level {level}"));
        }

        let own = frames[level].len();
        let parent = frames[level - 1].len();
        if own + parent > limit {
            return Err(format!(
                "merging {own} writes into {parent} pending writes exceeds the limit of {limit}"
            ));
        }

        let moved = std::mem::take(&mut frames[level]);
        frames[level - 1].extend(moved);
        Ok(own)
    }

    pub(crate) fn take_frame(&self, level: u32) -> Vec<StagedWrite> {
        self.frames
            .lock()
            .get_mut(level as usize)
            .map(std::mem::take)
            .unwrap_or_default()
    }

    pub(crate) fn discard_frame(&self, level: u32) -> usize {
        self.take_frame(level).len()
    }

    pub(crate) fn record_claim(&self, handle: &CollectionHandle, unit: WorkUnitId) {
        let mut claims = self.claims.lock();
        if !claims.iter().any(|c| c.unit == unit && c.handle == *handle) {
            claims.push(HeldClaim {
                handle: handle.clone(),
                unit,
            });
        }
    }

    /// Releases every claim taken by `unit`.
    pub(crate) fn release_unit(&self, unit: WorkUnitId) -> usize {
        let released: Vec<HeldClaim> = {
            let mut claims = self.claims.lock();
            let (mine, rest): (Vec<HeldClaim>, Vec<HeldClaim>) = std::mem::take(&mut *claims)
                .into_iter()
                .partition(|c| c.unit == unit);
            *claims = rest;
            mine
        };
        for claim in &released {
            self.store.release(&claim.handle, self.owner(claim.unit));
        }
        trace!(context = %self.id, %unit, released = released.len(), "unit claims released");
        released.len()
    }

    /// Releases every claim taken by `unit` or by any unit allocated after
    /// it.
    ///
    /// While `unit` is open, every later unit of the context is one of its
    /// descendants, so this also releases claims its committed children
    /// handed up to it.
    pub(crate) fn release_from(&self, unit: WorkUnitId) -> usize {
        let released: Vec<HeldClaim> = {
            let mut claims = self.claims.lock();
            let (mine, rest): (Vec<HeldClaim>, Vec<HeldClaim>) = std::mem::take(&mut *claims)
                .into_iter()
                .partition(|c| c.unit >= unit);
            *claims = rest;
            mine
        };
        for claim in &released {
            self.store.release(&claim.handle, self.owner(claim.unit));
        }
        trace!(context = %self.id, %unit, released = released.len(), "subtree claims released");
        released.len()
    }

    /// Releases every claim held by the transaction.
    pub(crate) fn release_all(&self) -> usize {
        let released = std::mem::take(&mut *self.claims.lock());
        for claim in &released {
            self.store.release(&claim.handle, self.owner(claim.unit));
        }
        trace!(context = %self.id, released = released.len(), "transaction claims released");
        released.len()
    }

    /// Returns the number of lock claims held by the transaction.
    #[must_use]
    pub fn held_claims(&self) -> usize {
        self.claims.lock().len()
    }
}

impl std::fmt::Debug for TransactionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionContext")
            .field("id", &self.id)
            .field("depth", &self.current_depth())
            .field("pending_writes", &self.pending_writes())
            .field("held_claims", &self.held_claims())
            .finish_non_exhaustive()
    }
}
