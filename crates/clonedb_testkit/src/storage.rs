//! In-memory storage engine.
//!
//! Implements the full local storage contract: an exclusive lock per
//! database, write units that apply atomically at commit, unique index
//! enforcement and the index build lifecycle. Tests can inject write
//! conflicts and run code on every lock release to simulate concurrent
//! operations.

use clonedb_codec::{encode_compound_key, Document, Value};
use clonedb_core::{
    CollectionEntry, CollectionOptions, CollectionUuid, CommitHook, IndexBuild, IndexBuildEntry,
    IndexSpec, LockTicket, Namespace, StorageEngine, StorageError, StorageResult, WriteUnit,
};
use parking_lot::{Condvar, Mutex};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::Arc;
use tracing::debug;

type ReleaseHook = Arc<dyn Fn(&MemoryStorage) + Send + Sync>;

#[derive(Debug, Clone)]
struct IndexEntry {
    spec: IndexSpec,
    /// Build that registered the index; `None` once ready.
    pending_build: Option<u64>,
}

#[derive(Debug, Clone)]
struct CollectionData {
    uuid: CollectionUuid,
    options: CollectionOptions,
    indexes: Vec<IndexEntry>,
    documents: Vec<Document>,
}

impl CollectionData {
    fn ready_indexes(&self) -> impl Iterator<Item = &IndexSpec> {
        self.indexes
            .iter()
            .filter(|entry| entry.pending_build.is_none())
            .map(|entry| &entry.spec)
    }
}

#[derive(Debug, Clone, Default)]
struct State {
    databases: BTreeSet<String>,
    collections: BTreeMap<Namespace, CollectionData>,
    build_entries: Vec<IndexBuildEntry>,
    pending_conflicts: u32,
    next_build: u64,
    aborted_builds: u64,
    commits: u64,
}

#[derive(Debug, Default)]
struct LockTable {
    held: BTreeMap<String, u64>,
    next_id: u64,
    releases: u64,
}

struct Inner {
    state: Mutex<State>,
    locks: Mutex<LockTable>,
    lock_released: Condvar,
    release_hook: Mutex<Option<ReleaseHook>>,
}

/// In-memory storage engine shared by clones of this handle.
#[derive(Clone)]
pub struct MemoryStorage {
    inner: Arc<Inner>,
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MemoryStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStorage").finish_non_exhaustive()
    }
}

/// Computes the key of `doc` in `spec`, or `None` if a sparse index skips it.
fn index_key(spec: &IndexSpec, doc: &Document) -> Option<Vec<u8>> {
    let values: Vec<Option<&Value>> = spec.key.iter().map(|k| doc.get_path(&k.field)).collect();
    if spec.sparse && values.iter().all(Option::is_none) {
        return None;
    }
    encode_compound_key(&values).ok()
}

fn key_description(spec: &IndexSpec, doc: &Document) -> String {
    let parts: Vec<String> = spec
        .key
        .iter()
        .map(|k| format!("{}: {:?}", k.field, doc.get_path(&k.field)))
        .collect();
    format!("{{ {} }}", parts.join(", "))
}

fn check_unique(nss: &Namespace, data: &CollectionData, doc: &Document) -> StorageResult<()> {
    for spec in data.ready_indexes().filter(|spec| spec.unique) {
        let Some(key) = index_key(spec, doc) else {
            continue;
        };
        if data
            .documents
            .iter()
            .any(|existing| index_key(spec, existing).as_ref() == Some(&key))
        {
            return Err(StorageError::DuplicateKey {
                nss: nss.clone(),
                index: spec.name.clone(),
                key: key_description(spec, doc),
            });
        }
    }
    Ok(())
}

impl MemoryStorage {
    /// Creates an empty storage engine.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(State::default()),
                locks: Mutex::new(LockTable::default()),
                lock_released: Condvar::new(),
                release_hook: Mutex::new(None),
            }),
        }
    }

    /// Runs `hook` after every exclusive lock release.
    ///
    /// The hook runs with no lock held, the way a concurrent operation
    /// would get in while the cloner yields.
    pub fn on_release(&self, hook: impl Fn(&MemoryStorage) + Send + Sync + 'static) {
        *self.inner.release_hook.lock() = Some(Arc::new(hook));
    }

    /// Makes the next `count` commits fail with a write conflict.
    pub fn inject_write_conflicts(&self, count: u32) {
        self.inner.state.lock().pending_conflicts += count;
    }

    /// Creates a collection directly, outside any clone.
    pub fn create_collection(
        &self,
        nss: &Namespace,
        options: CollectionOptions,
    ) -> StorageResult<CollectionUuid> {
        let mut state = self.inner.state.lock();
        state.databases.insert(nss.db().to_string());
        apply_create(&mut state, nss, &options, None, true)
    }

    /// Inserts a document directly, outside any clone.
    pub fn insert(&self, nss: &Namespace, doc: Document) -> StorageResult<()> {
        let mut state = self.inner.state.lock();
        apply_insert(&mut state, nss, doc)
    }

    /// Builds and readies an index directly, outside any clone.
    pub fn create_index(&self, nss: &Namespace, spec: IndexSpec) -> StorageResult<()> {
        let mut state = self.inner.state.lock();
        let data = state
            .collections
            .get_mut(nss)
            .ok_or_else(|| StorageError::NamespaceNotFound(nss.clone()))?;
        data.indexes.push(IndexEntry {
            spec,
            pending_build: None,
        });
        Ok(())
    }

    /// Drops a collection.
    pub fn drop_collection(&self, nss: &Namespace) -> bool {
        self.inner.state.lock().collections.remove(nss).is_some()
    }

    /// Drops a database and all its collections.
    pub fn drop_database(&self, db: &str) -> bool {
        let mut state = self.inner.state.lock();
        state.collections.retain(|nss, _| nss.db() != db);
        state.databases.remove(db)
    }

    /// Documents of a collection in insertion order.
    #[must_use]
    pub fn documents(&self, nss: &Namespace) -> Vec<Document> {
        self.inner
            .state
            .lock()
            .collections
            .get(nss)
            .map(|data| data.documents.clone())
            .unwrap_or_default()
    }

    /// Number of documents in a collection; 0 if it does not exist.
    #[must_use]
    pub fn document_count(&self, nss: &Namespace) -> usize {
        self.inner
            .state
            .lock()
            .collections
            .get(nss)
            .map_or(0, |data| data.documents.len())
    }

    /// Names of every registered index, ready or not.
    #[must_use]
    pub fn index_names(&self, nss: &Namespace) -> Vec<String> {
        self.inner
            .state
            .lock()
            .collections
            .get(nss)
            .map(|data| data.indexes.iter().map(|e| e.spec.name.clone()).collect())
            .unwrap_or_default()
    }

    /// Collection names of `db`.
    #[must_use]
    pub fn collection_names(&self, db: &str) -> Vec<String> {
        self.inner
            .state
            .lock()
            .collections
            .keys()
            .filter(|nss| nss.db() == db)
            .map(|nss| nss.coll().to_string())
            .collect()
    }

    /// Recorded two-phase index build entries.
    #[must_use]
    pub fn index_build_entries(&self) -> Vec<IndexBuildEntry> {
        self.inner.state.lock().build_entries.clone()
    }

    /// Number of index builds that were aborted before committing.
    #[must_use]
    pub fn aborted_builds(&self) -> u64 {
        self.inner.state.lock().aborted_builds
    }

    /// Number of write units that committed.
    #[must_use]
    pub fn commits(&self) -> u64 {
        self.inner.state.lock().commits
    }

    /// Returns true if `db` is exclusively locked.
    #[must_use]
    pub fn is_locked(&self, db: &str) -> bool {
        self.inner.locks.lock().held.contains_key(db)
    }

    /// Number of exclusive lock releases so far.
    #[must_use]
    pub fn lock_releases(&self) -> u64 {
        self.inner.locks.lock().releases
    }

    fn commit_unit(&self, ops: Vec<UnitOp>) -> StorageResult<()> {
        let mut state = self.inner.state.lock();
        if state.pending_conflicts > 0 {
            state.pending_conflicts -= 1;
            debug!(remaining = state.pending_conflicts, "injecting write conflict");
            return Err(StorageError::write_conflict("commit"));
        }
        let mut next = state.clone();
        for op in ops {
            match op {
                UnitOp::Create {
                    nss,
                    options,
                    id_index,
                    create_default_indexes,
                } => {
                    apply_create(
                        &mut next,
                        &nss,
                        &options,
                        id_index.as_ref(),
                        create_default_indexes,
                    )?;
                }
                UnitOp::Insert { nss, doc } => apply_insert(&mut next, &nss, doc)?,
            }
        }
        next.commits += 1;
        *state = next;
        Ok(())
    }

    fn finish_build(&self, nss: &Namespace, build: u64) {
        let mut state = self.inner.state.lock();
        if let Some(data) = state.collections.get_mut(nss) {
            for entry in &mut data.indexes {
                if entry.pending_build == Some(build) {
                    entry.pending_build = None;
                }
            }
        }
    }

    fn abort_build(&self, nss: &Namespace, build: u64) {
        let mut state = self.inner.state.lock();
        if let Some(data) = state.collections.get_mut(nss) {
            data.indexes.retain(|entry| entry.pending_build != Some(build));
        }
        state.aborted_builds += 1;
        debug!(ns = %nss, build, "index build aborted");
    }
}

fn apply_create(
    state: &mut State,
    nss: &Namespace,
    options: &CollectionOptions,
    id_index: Option<&IndexSpec>,
    create_default_indexes: bool,
) -> StorageResult<CollectionUuid> {
    if !state.databases.contains(nss.db()) {
        return Err(StorageError::DatabaseNotFound(nss.db().to_string()));
    }
    if state.collections.contains_key(nss) {
        return Err(StorageError::NamespaceExists(nss.clone()));
    }
    if options.capped && options.size.is_none() {
        return Err(StorageError::InvalidOptions(
            "capped collections require a size".into(),
        ));
    }
    let uuid = options.uuid.unwrap_or_else(CollectionUuid::generate);
    if state.collections.values().any(|data| data.uuid == uuid) {
        return Err(StorageError::InvalidOptions(format!(
            "collection uuid {uuid} already in use"
        )));
    }

    let indexes = match id_index {
        Some(spec) => vec![spec.clone()],
        None if create_default_indexes => vec![IndexSpec::identity()],
        None => Vec::new(),
    };
    state.collections.insert(
        nss.clone(),
        CollectionData {
            uuid,
            options: options.clone(),
            indexes: indexes
                .into_iter()
                .map(|spec| IndexEntry {
                    spec,
                    pending_build: None,
                })
                .collect(),
            documents: Vec::new(),
        },
    );
    Ok(uuid)
}

fn apply_insert(state: &mut State, nss: &Namespace, doc: Document) -> StorageResult<()> {
    let data = state
        .collections
        .get_mut(nss)
        .ok_or_else(|| StorageError::NamespaceNotFound(nss.clone()))?;
    check_unique(nss, data, &doc)?;
    data.documents.push(doc);
    Ok(())
}

impl StorageEngine for MemoryStorage {
    fn acquire_exclusive(&self, db: &str) -> StorageResult<LockTicket> {
        let mut locks = self.inner.locks.lock();
        while locks.held.contains_key(db) {
            self.inner.lock_released.wait(&mut locks);
        }
        locks.next_id += 1;
        let id = locks.next_id;
        locks.held.insert(db.to_string(), id);
        Ok(LockTicket::new(db, id))
    }

    fn release_exclusive(&self, ticket: LockTicket) {
        {
            let mut locks = self.inner.locks.lock();
            if locks.held.get(ticket.db()) == Some(&ticket.id()) {
                locks.held.remove(ticket.db());
                locks.releases += 1;
            }
        }
        self.inner.lock_released.notify_all();

        let hook = self.inner.release_hook.lock().clone();
        if let Some(hook) = hook {
            hook(self);
        }
    }

    fn open_database(&self, db: &str) -> StorageResult<()> {
        self.inner.state.lock().databases.insert(db.to_string());
        Ok(())
    }

    fn database_exists(&self, db: &str) -> bool {
        self.inner.state.lock().databases.contains(db)
    }

    fn lookup_collection(&self, nss: &Namespace) -> Option<CollectionEntry> {
        self.inner
            .state
            .lock()
            .collections
            .get(nss)
            .map(|data| CollectionEntry {
                uuid: data.uuid,
                options: data.options.clone(),
            })
    }

    fn list_indexes(&self, nss: &Namespace) -> StorageResult<Vec<IndexSpec>> {
        let state = self.inner.state.lock();
        let data = state
            .collections
            .get(nss)
            .ok_or_else(|| StorageError::NamespaceNotFound(nss.clone()))?;
        Ok(data.ready_indexes().cloned().collect())
    }

    fn begin_unit(&self) -> Box<dyn WriteUnit + '_> {
        Box::new(MemoryUnit {
            storage: self,
            ops: Vec::new(),
            hooks: Vec::new(),
        })
    }

    fn start_index_build(
        &self,
        nss: &Namespace,
        specs: &[IndexSpec],
    ) -> StorageResult<Box<dyn IndexBuild + '_>> {
        let mut state = self.inner.state.lock();
        state.next_build += 1;
        let build = state.next_build;
        let data = state
            .collections
            .get_mut(nss)
            .ok_or_else(|| StorageError::NamespaceNotFound(nss.clone()))?;

        let mut names = HashSet::new();
        for spec in specs {
            if !names.insert(spec.name.as_str())
                || data.indexes.iter().any(|e| e.spec.name == spec.name)
            {
                return Err(StorageError::IndexConflict {
                    nss: nss.clone(),
                    message: format!("index {} already exists", spec.name),
                });
            }
        }
        for spec in specs {
            data.indexes.push(IndexEntry {
                spec: spec.clone(),
                pending_build: Some(build),
            });
        }

        Ok(Box::new(MemoryIndexBuild {
            storage: self,
            nss: nss.clone(),
            build,
            specs: specs.to_vec(),
            keys: Vec::new(),
            committed: Arc::new(Mutex::new(false)),
            finished: false,
        }))
    }

    fn record_index_build(&self, entry: &IndexBuildEntry) -> StorageResult<()> {
        self.inner.state.lock().build_entries.push(entry.clone());
        Ok(())
    }
}

enum UnitOp {
    Create {
        nss: Namespace,
        options: CollectionOptions,
        id_index: Option<IndexSpec>,
        create_default_indexes: bool,
    },
    Insert {
        nss: Namespace,
        doc: Document,
    },
}

struct MemoryUnit<'s> {
    storage: &'s MemoryStorage,
    ops: Vec<UnitOp>,
    hooks: Vec<CommitHook>,
}

impl WriteUnit for MemoryUnit<'_> {
    fn create_collection(
        &mut self,
        nss: &Namespace,
        options: &CollectionOptions,
        id_index: Option<&IndexSpec>,
        create_default_indexes: bool,
    ) -> StorageResult<()> {
        if self.storage.lookup_collection(nss).is_some() {
            return Err(StorageError::NamespaceExists(nss.clone()));
        }
        self.ops.push(UnitOp::Create {
            nss: nss.clone(),
            options: options.clone(),
            id_index: id_index.cloned(),
            create_default_indexes,
        });
        Ok(())
    }

    fn insert_document(&mut self, nss: &Namespace, doc: &Document) -> StorageResult<()> {
        {
            let state = self.storage.inner.state.lock();
            let data = state
                .collections
                .get(nss)
                .ok_or_else(|| StorageError::NamespaceNotFound(nss.clone()))?;
            check_unique(nss, data, doc)?;
        }
        self.ops.push(UnitOp::Insert {
            nss: nss.clone(),
            doc: doc.clone(),
        });
        Ok(())
    }

    fn on_commit(&mut self, hook: CommitHook) {
        self.hooks.push(hook);
    }

    fn commit(self: Box<Self>) -> StorageResult<()> {
        let this = *self;
        this.storage.commit_unit(this.ops)?;
        for hook in this.hooks {
            hook();
        }
        Ok(())
    }
}

struct MemoryIndexBuild<'s> {
    storage: &'s MemoryStorage,
    nss: Namespace,
    build: u64,
    specs: Vec<IndexSpec>,
    keys: Vec<Vec<Option<Vec<u8>>>>,
    committed: Arc<Mutex<bool>>,
    finished: bool,
}

impl IndexBuild for MemoryIndexBuild<'_> {
    fn index_names(&self) -> Vec<String> {
        self.specs.iter().map(|spec| spec.name.clone()).collect()
    }

    fn insert_all_documents(&mut self) -> StorageResult<u64> {
        let documents = self.storage.documents(&self.nss);
        self.keys = self
            .specs
            .iter()
            .map(|spec| documents.iter().map(|doc| index_key(spec, doc)).collect())
            .collect();
        Ok(documents.len() as u64)
    }

    fn check_constraints(&mut self) -> StorageResult<()> {
        for (spec, keys) in self.specs.iter().zip(&self.keys) {
            if !spec.unique {
                continue;
            }
            let mut seen = HashSet::new();
            for key in keys.iter().flatten() {
                if !seen.insert(key) {
                    return Err(StorageError::DuplicateKey {
                        nss: self.nss.clone(),
                        index: spec.name.clone(),
                        key: format!("{key:02x?}"),
                    });
                }
            }
        }
        Ok(())
    }

    fn commit(&mut self, unit: &mut dyn WriteUnit) -> StorageResult<()> {
        let storage = self.storage.clone();
        let nss = self.nss.clone();
        let build = self.build;
        let committed = Arc::clone(&self.committed);
        unit.on_commit(Box::new(move || {
            storage.finish_build(&nss, build);
            *committed.lock() = true;
        }));
        Ok(())
    }

    fn abort(&mut self) {
        if self.finished || *self.committed.lock() {
            return;
        }
        self.finished = true;
        self.storage.abort_build(&self.nss, self.build);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::doc_with_id;

    fn nss() -> Namespace {
        Namespace::new("shop", "orders")
    }

    fn validated(id: i64) -> Document {
        clonedb_codec::DocumentValidator::default()
            .validate(&doc_with_id(id, &[]))
            .unwrap()
    }

    #[test]
    fn unit_applies_atomically() {
        let storage = MemoryStorage::new();
        storage.open_database("shop").unwrap();

        let mut unit = storage.begin_unit();
        unit.create_collection(&nss(), &CollectionOptions::default(), None, true)
            .unwrap();
        assert!(storage.lookup_collection(&nss()).is_none());
        unit.commit().unwrap();
        assert!(storage.lookup_collection(&nss()).is_some());

        let mut unit = storage.begin_unit();
        unit.insert_document(&nss(), &validated(1)).unwrap();
        drop(unit);
        assert_eq!(storage.document_count(&nss()), 0);
    }

    #[test]
    fn duplicate_identity_is_reported() {
        let storage = MemoryStorage::new();
        storage
            .create_collection(&nss(), CollectionOptions::default())
            .unwrap();
        storage.insert(&nss(), validated(1)).unwrap();

        let mut unit = storage.begin_unit();
        let err = unit.insert_document(&nss(), &validated(1)).unwrap_err();
        assert!(err.is_duplicate_key());
    }

    #[test]
    fn injected_conflicts_fail_commits() {
        let storage = MemoryStorage::new();
        storage
            .create_collection(&nss(), CollectionOptions::default())
            .unwrap();
        storage.inject_write_conflicts(1);

        let mut unit = storage.begin_unit();
        unit.insert_document(&nss(), &validated(1)).unwrap();
        assert!(unit.commit().unwrap_err().is_write_conflict());

        let mut unit = storage.begin_unit();
        unit.insert_document(&nss(), &validated(1)).unwrap();
        unit.commit().unwrap();
        assert_eq!(storage.document_count(&nss()), 1);
    }

    #[test]
    fn aborted_build_removes_metadata() {
        let storage = MemoryStorage::new();
        storage
            .create_collection(&nss(), CollectionOptions::default())
            .unwrap();
        let spec = IndexSpec::new("x_1").ascending("x");

        let mut build = storage.start_index_build(&nss(), &[spec]).unwrap();
        assert_eq!(storage.index_names(&nss()), vec!["_id_", "x_1"]);
        assert_eq!(storage.list_indexes(&nss()).unwrap().len(), 1);
        build.abort();
        drop(build);
        assert_eq!(storage.index_names(&nss()), vec!["_id_"]);
        assert_eq!(storage.aborted_builds(), 1);
    }

    #[test]
    fn committed_build_survives_abort() {
        let storage = MemoryStorage::new();
        storage
            .create_collection(&nss(), CollectionOptions::default())
            .unwrap();
        let spec = IndexSpec::new("x_1").ascending("x");

        let mut build = storage.start_index_build(&nss(), &[spec]).unwrap();
        build.insert_all_documents().unwrap();
        build.check_constraints().unwrap();
        let mut unit = storage.begin_unit();
        build.commit(unit.as_mut()).unwrap();
        unit.commit().unwrap();
        build.abort();
        drop(build);

        assert_eq!(storage.list_indexes(&nss()).unwrap().len(), 2);
        assert_eq!(storage.aborted_builds(), 0);
    }

    #[test]
    fn release_hook_runs_without_lock() {
        let storage = MemoryStorage::new();
        storage.on_release(|s| assert!(!s.is_locked("shop")));
        let ticket = storage.acquire_exclusive("shop").unwrap();
        assert!(storage.is_locked("shop"));
        storage.release_exclusive(ticket);
        assert_eq!(storage.lock_releases(), 1);
    }
}
