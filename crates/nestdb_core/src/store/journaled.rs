//! Journal-backed collection store.

use crate::document::{Document, DocumentVariant};
use crate::error::{CoreError, CoreResult};
use crate::store::journal::{JournalBackend, JournalEntry, JournalWrite};
use crate::store::lock::LockTable;
use crate::store::{CollectionHandle, CollectionStore, LockOwner, StagedWrite};
use crate::transaction::{AccessType, CollectionKind};
use crate::types::CollectionId;
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{debug, error, info, warn};

#[derive(Debug, Default)]
struct Catalog {
    by_name: HashMap<String, CollectionHandle>,
    by_id: BTreeMap<CollectionId, CollectionHandle>,
    next_id: u32,
}

impl Catalog {
    fn insert(&mut self, handle: CollectionHandle) {
        self.next_id = self.next_id.max(handle.id().as_u32());
        self.by_name.insert(handle.name().to_string(), handle.clone());
        self.by_id.insert(handle.id(), handle);
    }

    fn remove(&mut self, id: CollectionId) -> Option<CollectionHandle> {
        let handle = self.by_id.remove(&id)?;
        self.by_name.remove(handle.name());
        Some(handle)
    }
}

/// Collection store keeping documents in memory and making every catalog
/// change and committed batch durable through a [`JournalBackend`].
///
/// Opening a store replays its journal, so a store reopened over the same
/// journal sees exactly the collections and batches that were written.
///
/// A failed append is cut back off the journal before the error is
/// returned. If that cut fails too, the store refuses every later append.
pub struct JournaledStore {
    catalog: RwLock<Catalog>,
    documents: RwLock<HashMap<CollectionId, Vec<(DocumentVariant, Document)>>>,
    journal: Mutex<Box<dyn JournalBackend>>,
    locks: LockTable,
    unusable: AtomicBool,
}

impl JournaledStore {
    /// Opens a store over a journal, replaying its contents.
    ///
    /// # Errors
    ///
    /// Returns an error if the journal cannot be read or contains a corrupt
    /// frame.
    pub fn open(mut journal: Box<dyn JournalBackend>) -> CoreResult<Self> {
        let bytes = journal.read_all()?;
        let (entries, valid) = JournalEntry::decode_prefix(&bytes)?;
        if valid < bytes.len() {
            warn!(valid, dropped = bytes.len() - valid, "truncating torn journal tail");
            journal.truncate(valid as u64)?;
        }

        let mut catalog = Catalog::default();
        let mut documents: HashMap<CollectionId, Vec<(DocumentVariant, Document)>> = HashMap::new();
        let mut batches = 0usize;

        for entry in entries {
            match entry {
                JournalEntry::CreateCollection { id, name, kind } => {
                    let id = CollectionId::new(id);
                    catalog.insert(CollectionHandle::new(id, name, kind));
                    documents.entry(id).or_default();
                }
                JournalEntry::DropCollection { id } => {
                    let id = CollectionId::new(id);
                    catalog.remove(id);
                    documents.remove(&id);
                }
                JournalEntry::Batch { writes } => {
                    batches += 1;
                    for write in writes {
                        let id = CollectionId::new(write.collection);
                        let docs = documents.get_mut(&id).ok_or_else(|| {
                            CoreError::journal(format!("batch writes to unknown collection {id}"))
                        })?;
                        docs.push((write.variant, Document::from_bytes(write.document)));
                    }
                }
            }
        }

        info!(
            collections = catalog.by_id.len(),
            batches, "collection store opened"
        );

        Ok(Self {
            catalog: RwLock::new(catalog),
            documents: RwLock::new(documents),
            journal: Mutex::new(journal),
            locks: LockTable::new(),
            unusable: AtomicBool::new(false),
        })
    }

    /// Creates a collection, or returns the existing one of the same kind.
    ///
    /// # Errors
    ///
    /// Returns `TypeMismatch` if a collection with that name exists with a
    /// different kind, or a journal error if the creation cannot be written.
    pub fn create_collection(&self, name: &str, kind: CollectionKind) -> CoreResult<CollectionHandle> {
        let mut catalog = self.catalog.write();
        if let Some(existing) = catalog.by_name.get(name) {
            if existing.kind() != kind {
                return Err(CoreError::TypeMismatch {
                    name: name.to_string(),
                    expected: kind,
                    actual: existing.kind(),
                });
            }
            return Ok(existing.clone());
        }

        let id = CollectionId::new(catalog.next_id + 1);
        self.append(
            &JournalEntry::CreateCollection {
                id: id.as_u32(),
                name: name.to_string(),
                kind,
            },
            false,
        )?;

        let handle = CollectionHandle::new(id, name, kind);
        catalog.insert(handle.clone());
        self.documents.write().entry(id).or_default();
        debug!(%id, name, %kind, "collection created");
        Ok(handle)
    }

    /// Drops a collection and all of its documents.
    ///
    /// # Errors
    ///
    /// Returns `CollectionNotFound` if no such collection exists.
    pub fn drop_collection(&self, name: &str) -> CoreResult<()> {
        let mut catalog = self.catalog.write();
        let id = catalog
            .by_name
            .get(name)
            .map(CollectionHandle::id)
            .ok_or_else(|| CoreError::not_found(name))?;

        self.append(&JournalEntry::DropCollection { id: id.as_u32() }, false)?;
        catalog.remove(id);
        self.documents.write().remove(&id);
        debug!(%id, name, "collection dropped");
        Ok(())
    }

    /// Returns all collections in ID order.
    #[must_use]
    pub fn collections(&self) -> Vec<CollectionHandle> {
        self.catalog.read().by_id.values().cloned().collect()
    }

    /// Returns the committed documents of a collection with their variants.
    ///
    /// # Errors
    ///
    /// Returns `CollectionNotFound` if the collection does not exist.
    pub fn entries(&self, id: CollectionId) -> CoreResult<Vec<(DocumentVariant, Document)>> {
        self.documents
            .read()
            .get(&id)
            .cloned()
            .ok_or_else(|| CoreError::not_found(id.to_string()))
    }

    /// Returns the claims currently held on a collection.
    #[must_use]
    pub fn lock_holders(&self, id: CollectionId) -> Vec<(LockOwner, AccessType)> {
        self.locks.holders(id)
    }

    /// Returns the number of collections with at least one lock claim.
    #[must_use]
    pub fn locked_collections(&self) -> usize {
        self.locks.locked_count()
    }

    /// Returns true if a failed append could not be cut off the journal.
    #[must_use]
    pub fn is_unusable(&self) -> bool {
        self.unusable.load(Ordering::Acquire)
    }

    fn append(&self, entry: &JournalEntry, sync: bool) -> CoreResult<()> {
        let frame = entry.to_frame()?;
        let mut journal = self.journal.lock();
        if self.is_unusable() {
            return Err(CoreError::journal(
                "store is unusable after a failed journal rollback",
            ));
        }

        let start = journal.size()?;
        let Err(err) = write_frame(&mut **journal, &frame, sync) else {
            return Ok(());
        };

        if let Err(cut) = journal.truncate(start) {
            self.unusable.store(true, Ordering::Release);
            error!(offset = start, error = %err, cut_error = %cut, "journal rollback failed");
            return Err(CoreError::journal(format!(
                "{err}; rolling back the journal failed: {cut}"
            )));
        }
        warn!(offset = start, error = %err, "journal append rolled back");
        Err(err)
    }

    fn ensure_exists(&self, handle: &CollectionHandle) -> CoreResult<()> {
        if self.catalog.read().by_id.contains_key(&handle.id()) {
            Ok(())
        } else {
            Err(CoreError::not_found(handle.name()))
        }
    }
}

fn write_frame(journal: &mut dyn JournalBackend, frame: &[u8], sync: bool) -> CoreResult<()> {
    journal.append(frame)?;
    journal.flush()?;
    if sync {
        journal.sync()?;
    }
    Ok(())
}

impl CollectionStore for JournaledStore {
    fn resolve(&self, name: &str, create: Option<CollectionKind>) -> CoreResult<CollectionHandle> {
        if let Some(handle) = self.catalog.read().by_name.get(name) {
            return Ok(handle.clone());
        }
        match create {
            Some(kind) => self.create_collection(name, kind),
            None => Err(CoreError::not_found(name)),
        }
    }

    fn lookup(&self, id: CollectionId) -> Option<CollectionHandle> {
        self.catalog.read().by_id.get(&id).cloned()
    }

    fn acquire(
        &self,
        handle: &CollectionHandle,
        owner: LockOwner,
        access: AccessType,
        timeout: Duration,
    ) -> CoreResult<()> {
        self.ensure_exists(handle)?;
        self.locks.acquire(handle.id(), owner, access, timeout)
    }

    fn release(&self, handle: &CollectionHandle, owner: LockOwner) {
        self.locks.release(handle.id(), owner);
    }

    fn check_write(&self, handle: &CollectionHandle, _document: &Document) -> CoreResult<()> {
        self.ensure_exists(handle)
    }

    fn apply(&self, batch: &[StagedWrite], sync: bool) -> CoreResult<()> {
        if batch.is_empty() && !sync {
            return Ok(());
        }

        // Holding the catalog read lock keeps collections from being dropped
        // between validation and publication.
        let catalog = self.catalog.read();
        for write in batch {
            if !catalog.by_id.contains_key(&write.collection.id()) {
                return Err(CoreError::not_found(write.collection.name()));
            }
        }

        let entry = JournalEntry::Batch {
            writes: batch
                .iter()
                .map(|w| JournalWrite {
                    collection: w.collection.id().as_u32(),
                    variant: w.variant,
                    document: w.document.as_bytes().to_vec(),
                })
                .collect(),
        };
        self.append(&entry, sync)?;

        let mut documents = self.documents.write();
        for write in batch {
            documents
                .entry(write.collection.id())
                .or_default()
                .push((write.variant, write.document.clone()));
        }
        drop(catalog);

        debug!(writes = batch.len(), sync, "batch applied");
        Ok(())
    }

    fn documents(&self, id: CollectionId) -> CoreResult<Vec<Document>> {
        Ok(self.entries(id)?.into_iter().map(|(_, doc)| doc).collect())
    }
}

impl std::fmt::Debug for JournaledStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JournaledStore")
            .field("collections", &self.catalog.read().by_id.len())
            .field("locked", &self.locks.locked_count())
            .field("unusable", &self.is_unusable())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::testing::FlakyJournal;
    use crate::store::MemoryJournal;
    use crate::types::{ContextId, WorkUnitId};

    fn create_store() -> (JournaledStore, MemoryJournal) {
        let journal = MemoryJournal::new();
        let store = JournaledStore::open(Box::new(journal.clone())).unwrap();
        (store, journal)
    }

    fn staged(handle: &CollectionHandle, byte: u8) -> StagedWrite {
        StagedWrite {
            collection: handle.clone(),
            document: Document::from_bytes(vec![byte]),
            variant: DocumentVariant::Document,
        }
    }

    #[test]
    fn resolve_missing_without_create_fails() {
        let (store, _) = create_store();
        let result = store.resolve("docs", None);
        assert!(matches!(result, Err(CoreError::CollectionNotFound { .. })));
    }

    #[test]
    fn resolve_creates_when_allowed() {
        let (store, _) = create_store();
        let a = store.resolve("docs", Some(CollectionKind::Document)).unwrap();
        let b = store.resolve("docs", None).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.id(), CollectionId::new(1));
        assert_eq!(store.collections().len(), 1);
    }

    #[test]
    fn create_with_other_kind_is_mismatch() {
        let (store, _) = create_store();
        store.create_collection("links", CollectionKind::Edge).unwrap();
        let result = store.create_collection("links", CollectionKind::Document);
        assert!(matches!(result, Err(CoreError::TypeMismatch { .. })));
    }

    #[test]
    fn apply_makes_batch_visible() {
        let (store, _) = create_store();
        let docs = store.create_collection("docs", CollectionKind::Document).unwrap();

        store.apply(&[staged(&docs, 1), staged(&docs, 2)], false).unwrap();

        let stored = store.documents(docs.id()).unwrap();
        assert_eq!(stored.len(), 2);
        assert_eq!(stored[1].as_bytes(), &[2]);
    }

    #[test]
    fn apply_to_dropped_collection_applies_nothing() {
        let (store, _) = create_store();
        let docs = store.create_collection("docs", CollectionKind::Document).unwrap();
        let gone = store.create_collection("gone", CollectionKind::Document).unwrap();
        store.drop_collection("gone").unwrap();

        let result = store.apply(&[staged(&docs, 1), staged(&gone, 2)], false);
        assert!(result.is_err());
        assert!(store.documents(docs.id()).unwrap().is_empty());
    }

    #[test]
    fn apply_with_sync_syncs_journal() {
        let (store, journal) = create_store();
        let docs = store.create_collection("docs", CollectionKind::Document).unwrap();

        store.apply(&[staged(&docs, 1)], false).unwrap();
        assert_eq!(journal.sync_count(), 0);

        store.apply(&[staged(&docs, 2)], true).unwrap();
        assert_eq!(journal.sync_count(), 1);
        assert_eq!(journal.synced_len(), journal.data().len());
    }

    #[test]
    fn reopen_replays_journal() {
        let (store, journal) = create_store();
        let docs = store.create_collection("docs", CollectionKind::Document).unwrap();
        let edges = store.create_collection("edges", CollectionKind::Edge).unwrap();
        store.drop_collection("edges").unwrap();
        store.apply(&[staged(&docs, 7)], true).unwrap();
        drop(store);

        let reopened = JournaledStore::open(Box::new(MemoryJournal::with_data(journal.data()))).unwrap();
        assert_eq!(reopened.collections(), vec![docs.clone()]);
        assert!(reopened.lookup(edges.id()).is_none());
        assert_eq!(reopened.documents(docs.id()).unwrap()[0].as_bytes(), &[7]);

        // IDs are not reused after a drop.
        let next = reopened.create_collection("more", CollectionKind::Document).unwrap();
        assert_eq!(next.id(), CollectionId::new(3));
    }

    #[test]
    fn torn_tail_is_cut_before_new_appends() {
        let (store, journal) = create_store();
        let docs = store.create_collection("docs", CollectionKind::Document).unwrap();
        store.apply(&[staged(&docs, 1)], false).unwrap();
        drop(store);

        let mut bytes = journal.data();
        let intact = bytes.len();
        bytes.extend([9, 0, 0, 0, 0xa0]);
        let torn = MemoryJournal::with_data(bytes);

        let store = JournaledStore::open(Box::new(torn.clone())).unwrap();
        assert_eq!(torn.data().len(), intact);
        store.apply(&[staged(&docs, 2)], false).unwrap();
        drop(store);

        let reopened = JournaledStore::open(Box::new(torn)).unwrap();
        assert_eq!(reopened.documents(docs.id()).unwrap().len(), 2);
    }

    #[test]
    fn failed_sync_is_cut_from_journal() {
        let journal = FlakyJournal::new();
        let store = JournaledStore::open(Box::new(journal.clone())).unwrap();
        let docs = store.create_collection("docs", CollectionKind::Document).unwrap();
        store.apply(&[staged(&docs, 1)], true).unwrap();
        let before = journal.memory().data().len();

        journal.fail_syncs(true);
        assert!(store.apply(&[staged(&docs, 2)], true).is_err());
        assert_eq!(journal.memory().data().len(), before);
        assert_eq!(store.documents(docs.id()).unwrap().len(), 1);

        journal.fail_syncs(false);
        store.apply(&[staged(&docs, 3)], true).unwrap();
        drop(store);

        let reopened = JournaledStore::open(Box::new(journal.memory())).unwrap();
        let bytes: Vec<u8> = reopened
            .documents(docs.id())
            .unwrap()
            .iter()
            .map(|d| d.as_bytes()[0])
            .collect();
        assert_eq!(bytes, vec![1, 3]);
    }

    #[test]
    fn torn_append_does_not_hide_later_batches() {
        let journal = FlakyJournal::new();
        let store = JournaledStore::open(Box::new(journal.clone())).unwrap();
        let docs = store.create_collection("docs", CollectionKind::Document).unwrap();
        store.apply(&[staged(&docs, 1)], false).unwrap();

        journal.tear_appends(true);
        assert!(store.apply(&[staged(&docs, 2)], false).is_err());
        journal.tear_appends(false);
        store.apply(&[staged(&docs, 3)], false).unwrap();
        drop(store);

        let reopened = JournaledStore::open(Box::new(journal.memory())).unwrap();
        let bytes: Vec<u8> = reopened
            .documents(docs.id())
            .unwrap()
            .iter()
            .map(|d| d.as_bytes()[0])
            .collect();
        assert_eq!(bytes, vec![1, 3]);
    }

    #[test]
    fn failed_rollback_makes_store_unusable() {
        let journal = FlakyJournal::new();
        let store = JournaledStore::open(Box::new(journal.clone())).unwrap();
        let docs = store.create_collection("docs", CollectionKind::Document).unwrap();

        journal.fail_syncs(true);
        journal.fail_truncates(true);
        let result = store.apply(&[staged(&docs, 1)], true);
        assert!(matches!(result, Err(CoreError::Journal { .. })));
        assert!(store.is_unusable());

        journal.fail_syncs(false);
        journal.fail_truncates(false);
        assert!(store.apply(&[staged(&docs, 2)], true).is_err());
        assert!(store.create_collection("more", CollectionKind::Document).is_err());
        assert!(store.documents(docs.id()).unwrap().is_empty());
    }

    #[test]
    fn acquire_on_dropped_collection_is_not_found() {
        let (store, _) = create_store();
        let docs = store.create_collection("docs", CollectionKind::Document).unwrap();
        store.drop_collection("docs").unwrap();

        let owner = LockOwner {
            context: ContextId::generate(),
            unit: WorkUnitId::new(1),
        };
        let result = store.acquire(&docs, owner, AccessType::Read, Duration::ZERO);
        assert!(matches!(result, Err(CoreError::CollectionNotFound { .. })));
        assert_eq!(store.locked_collections(), 0);
    }
}
