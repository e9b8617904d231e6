//! Store fixtures and journal fault injection.

use nestdb_core::{
    CoreError, CoreResult, Config, FileJournal, JournalBackend, JournaledStore, MemoryJournal,
    TransactionContext,
};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tempfile::TempDir;

enum Backing {
    Memory(MemoryJournal),
    File { _dir: TempDir, path: PathBuf },
    Failing {
        journal: MemoryJournal,
        switch: FaultSwitch,
    },
}

/// A journaled store with automatic cleanup.
pub struct TestStore {
    /// The store instance.
    pub store: Arc<JournaledStore>,
    backing: Backing,
}

impl TestStore {
    /// Creates a store over an in-memory journal.
    pub fn memory() -> Self {
        let journal = MemoryJournal::new();
        let store = JournaledStore::open(Box::new(journal.clone()))
            .expect("Failed to open in-memory store");
        Self {
            store: Arc::new(store),
            backing: Backing::Memory(journal),
        }
    }

    /// Creates a store over a file journal in a temporary directory.
    pub fn file() -> Self {
        let dir = TempDir::new().expect("Failed to create temp directory");
        let path = dir.path().join("journal.ndb");
        let journal = FileJournal::open(&path).expect("Failed to open file journal");
        let store = JournaledStore::open(Box::new(journal)).expect("Failed to open file store");
        Self {
            store: Arc::new(store),
            backing: Backing::File { _dir: dir, path },
        }
    }

    /// Creates a store whose journal fails on demand.
    pub fn failing() -> (Self, FaultSwitch) {
        let journal = MemoryJournal::new();
        let switch = FaultSwitch::default();
        let failing = FailingJournal::over(journal.clone(), switch.clone());
        let store = JournaledStore::open(Box::new(failing)).expect("Failed to open failing store");
        let test_store = Self {
            store: Arc::new(store),
            backing: Backing::Failing {
                journal,
                switch: switch.clone(),
            },
        };
        (test_store, switch)
    }

    /// Returns the journal path if file-based.
    pub fn path(&self) -> Option<&Path> {
        match &self.backing {
            Backing::File { path, .. } => Some(path),
            _ => None,
        }
    }

    /// Returns the in-memory journal if memory-based or failing.
    pub fn memory_journal(&self) -> Option<&MemoryJournal> {
        match &self.backing {
            Backing::Memory(journal) | Backing::Failing { journal, .. } => Some(journal),
            Backing::File { .. } => None,
        }
    }

    /// Creates a transaction context with the default configuration.
    pub fn context(&self) -> TransactionContext {
        TransactionContext::new(self.store.clone())
    }

    /// Creates a transaction context with an explicit configuration.
    pub fn context_with(&self, config: Config) -> TransactionContext {
        TransactionContext::with_config(self.store.clone(), config)
    }

    /// Closes the store and opens it again from the same journal.
    ///
    /// Every context created from this fixture must be dropped first, since
    /// a file journal is locked while open.
    pub fn reopen(self) -> Self {
        let Self { store, backing } = self;
        drop(store);

        let journal: Box<dyn JournalBackend> = match &backing {
            Backing::Memory(journal) => Box::new(journal.clone()),
            Backing::File { path, .. } => {
                Box::new(FileJournal::open(path).expect("Failed to reopen file journal"))
            }
            Backing::Failing { journal, switch } => {
                Box::new(FailingJournal::over(journal.clone(), switch.clone()))
            }
        };
        let store = JournaledStore::open(journal).expect("Failed to replay journal");
        Self {
            store: Arc::new(store),
            backing,
        }
    }
}

impl std::ops::Deref for TestStore {
    type Target = JournaledStore;

    fn deref(&self) -> &Self::Target {
        &self.store
    }
}

impl std::fmt::Debug for TestStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = match &self.backing {
            Backing::Memory(_) => "memory",
            Backing::File { .. } => "file",
            Backing::Failing { .. } => "failing",
        };
        f.debug_struct("TestStore")
            .field("store", &self.store)
            .field("backing", &kind)
            .finish()
    }
}

/// Runs a test with a temporary in-memory store.
pub fn with_memory_store<F, R>(f: F) -> R
where
    F: FnOnce(&TestStore) -> R,
{
    let store = TestStore::memory();
    f(&store)
}

/// Runs a test with a temporary file-backed store.
pub fn with_file_store<F, R>(f: F) -> R
where
    F: FnOnce(&TestStore) -> R,
{
    let store = TestStore::file();
    f(&store)
}

/// Shared switches controlling a [`FailingJournal`].
#[derive(Debug, Clone, Default)]
pub struct FaultSwitch {
    append: Arc<AtomicBool>,
    tear: Arc<AtomicBool>,
    sync: Arc<AtomicBool>,
    truncate: Arc<AtomicBool>,
    failures: Arc<AtomicUsize>,
}

impl FaultSwitch {
    /// Makes every subsequent append fail (or succeed again).
    pub fn fail_appends(&self, fail: bool) {
        self.append.store(fail, Ordering::SeqCst);
    }

    /// Makes every subsequent append write half of its frame and then fail.
    pub fn tear_appends(&self, tear: bool) {
        self.tear.store(tear, Ordering::SeqCst);
    }

    /// Makes every subsequent truncate fail (or succeed again).
    pub fn fail_truncates(&self, fail: bool) {
        self.truncate.store(fail, Ordering::SeqCst);
    }

    /// Makes every subsequent sync fail (or succeed again).
    pub fn fail_syncs(&self, fail: bool) {
        self.sync.store(fail, Ordering::SeqCst);
    }

    /// Returns how many operations were failed on purpose.
    pub fn failures(&self) -> usize {
        self.failures.load(Ordering::SeqCst)
    }

    fn check(&self, flag: &AtomicBool, operation: &str) -> CoreResult<()> {
        if flag.load(Ordering::SeqCst) {
            self.failures.fetch_add(1, Ordering::SeqCst);
            return Err(CoreError::journal(format!("injected {operation} failure")));
        }
        Ok(())
    }
}

/// A memory journal that fails appends, syncs or truncates when switched on.
#[derive(Debug, Default)]
pub struct FailingJournal {
    inner: MemoryJournal,
    switch: FaultSwitch,
}

impl FailingJournal {
    /// Creates a journal with all faults off.
    pub fn new() -> Self {
        Self::default()
    }

    /// Wraps a shared memory journal; faults are driven by `switch`.
    pub fn over(inner: MemoryJournal, switch: FaultSwitch) -> Self {
        Self { inner, switch }
    }

    /// Returns the switch controlling this journal.
    pub fn switch(&self) -> FaultSwitch {
        self.switch.clone()
    }

    /// Returns the bytes written so far.
    pub fn data(&self) -> Vec<u8> {
        self.inner.data()
    }
}

impl JournalBackend for FailingJournal {
    fn append(&mut self, frame: &[u8]) -> CoreResult<u64> {
        self.switch.check(&self.switch.append, "append")?;
        if let Err(err) = self.switch.check(&self.switch.tear, "torn append") {
            self.inner.append(&frame[..frame.len() / 2])?;
            return Err(err);
        }
        self.inner.append(frame)
    }

    fn flush(&mut self) -> CoreResult<()> {
        self.inner.flush()
    }

    fn sync(&mut self) -> CoreResult<()> {
        self.switch.check(&self.switch.sync, "sync")?;
        self.inner.sync()
    }

    fn read_all(&self) -> CoreResult<Vec<u8>> {
        self.inner.read_all()
    }

    fn truncate(&mut self, len: u64) -> CoreResult<()> {
        self.switch.check(&self.switch.truncate, "truncate")?;
        self.inner.truncate(len)
    }

    fn size(&self) -> CoreResult<u64> {
        self.inner.size()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nestdb_core::{CollectionKind, ErrorCode};

    #[test]
    fn memory_store_reopens_from_journal() {
        let store = TestStore::memory();
        store.create_collection("docs", CollectionKind::Document).unwrap();

        let store = store.reopen();
        assert_eq!(store.collections().len(), 1);
        assert!(store.memory_journal().is_some());
    }

    #[test]
    fn file_store_has_path() {
        with_file_store(|store| {
            let path = store.path().unwrap();
            store.create_collection("docs", CollectionKind::Edge).unwrap();
            assert!(path.exists());
        });
    }

    #[test]
    fn failing_journal_rejects_appends() {
        let (store, switch) = TestStore::failing();
        switch.fail_appends(true);

        let result = store.create_collection("docs", CollectionKind::Document);
        assert_eq!(ErrorCode::of(&result), ErrorCode::Internal);
        assert_eq!(switch.failures(), 1);
        assert!(store.collections().is_empty());

        switch.fail_appends(false);
        store.create_collection("docs", CollectionKind::Document).unwrap();
    }

    #[test]
    fn torn_append_leaves_no_bytes_behind() {
        let (store, switch) = TestStore::failing();
        store.create_collection("docs", CollectionKind::Document).unwrap();
        let intact = store.memory_journal().unwrap().data().len();

        switch.tear_appends(true);
        assert!(store.create_collection("more", CollectionKind::Document).is_err());
        assert_eq!(store.memory_journal().unwrap().data().len(), intact);
    }

    #[test]
    fn failing_store_reopens_with_switch() {
        let (store, switch) = TestStore::failing();
        store.create_collection("docs", CollectionKind::Document).unwrap();

        let store = store.reopen();
        assert_eq!(store.collections().len(), 1);

        switch.fail_appends(true);
        assert!(store.create_collection("more", CollectionKind::Document).is_err());
        assert_eq!(switch.failures(), 1);
    }
}
