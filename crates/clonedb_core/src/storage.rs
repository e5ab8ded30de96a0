//! Local storage contract consumed by the cloning engine.
//!
//! The engine never touches storage internals. It drives the local node
//! through four seams:
//!
//! - the exclusive per-database lock ([`StorageEngine::acquire_exclusive`])
//! - atomic write units ([`WriteUnit`]) that commit or abort as a whole
//! - catalog lookups ([`StorageEngine::lookup_collection`])
//! - the index build lifecycle ([`IndexBuild`])
//!
//! Storage engines use optimistic concurrency: a write unit may fail to
//! commit with [`StorageError::WriteConflict`], in which case the caller is
//! expected to retry the whole unit.

use crate::catalog::{CollectionOptions, CollectionUuid, IndexSpec};
use crate::namespace::Namespace;
use crate::replication::BuildId;
use clonedb_codec::Document;
use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors reported by the local storage engine.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Optimistic-concurrency collision with another local operation.
    #[error("write conflict during {operation}")]
    WriteConflict {
        /// The operation that collided.
        operation: String,
    },

    /// A unique index already holds the key.
    #[error("duplicate key in {nss} index {index}: {key}")]
    DuplicateKey {
        /// Namespace of the collection.
        nss: Namespace,
        /// Name of the violated index.
        index: String,
        /// Human-readable key description.
        key: String,
    },

    /// The namespace already exists.
    #[error("namespace {0} already exists")]
    NamespaceExists(Namespace),

    /// The namespace does not exist.
    #[error("namespace {0} not found")]
    NamespaceNotFound(Namespace),

    /// The database does not exist.
    #[error("database {0} not found")]
    DatabaseNotFound(String),

    /// Index metadata conflicts with an existing index.
    #[error("index conflict on {nss}: {message}")]
    IndexConflict {
        /// Namespace of the collection.
        nss: Namespace,
        /// Description of the conflict.
        message: String,
    },

    /// Options rejected by the storage engine.
    #[error("invalid collection options: {0}")]
    InvalidOptions(String),

    /// Any other storage failure.
    #[error("storage failure: {0}")]
    Internal(String),
}

impl StorageError {
    /// Creates a write conflict error.
    pub fn write_conflict(operation: impl Into<String>) -> Self {
        Self::WriteConflict {
            operation: operation.into(),
        }
    }

    /// Returns true if this is a duplicate key outcome.
    #[must_use]
    pub fn is_duplicate_key(&self) -> bool {
        matches!(self, StorageError::DuplicateKey { .. })
    }

    /// Returns true if this is a write conflict.
    #[must_use]
    pub fn is_write_conflict(&self) -> bool {
        matches!(self, StorageError::WriteConflict { .. })
    }
}

/// Proof of an exclusive database lock acquisition.
///
/// Returned by [`StorageEngine::acquire_exclusive`] and handed back to
/// [`StorageEngine::release_exclusive`]. The engine wraps tickets in
/// [`crate::lock::DatabaseLock`], which guarantees the release.
#[derive(Debug, PartialEq, Eq)]
pub struct LockTicket {
    db: String,
    id: u64,
}

impl LockTicket {
    /// Creates a ticket. Only storage engines should call this.
    pub fn new(db: impl Into<String>, id: u64) -> Self {
        Self { db: db.into(), id }
    }

    /// Returns the locked database name.
    #[must_use]
    pub fn db(&self) -> &str {
        &self.db
    }

    /// Returns the engine-assigned acquisition id.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }
}

/// A live collection as seen by the local catalog.
#[derive(Debug, Clone, PartialEq)]
pub struct CollectionEntry {
    /// Persisted identity.
    pub uuid: CollectionUuid,
    /// Options the collection was created with.
    pub options: CollectionOptions,
}

/// Commit quorum recorded for an index build.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitQuorum {
    /// No votes are collected; the builder commits on its own.
    Disabled,
    /// A majority of voting members must be ready.
    Majority,
}

/// Durable record of an in-progress two-phase index build.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexBuildEntry {
    /// Build identifier.
    pub build_id: BuildId,
    /// Identity of the collection being indexed.
    pub collection_uuid: CollectionUuid,
    /// Commit quorum for the build.
    pub commit_quorum: CommitQuorum,
    /// Names of the indexes being built.
    pub index_names: Vec<String>,
}

/// Callback run after a write unit commits.
pub type CommitHook = Box<dyn FnOnce() + Send>;

/// An atomic unit of local writes.
///
/// Nothing staged in a unit is visible until [`WriteUnit::commit`]
/// succeeds. Dropping a unit without committing aborts it.
pub trait WriteUnit {
    /// Stages creation of a collection.
    ///
    /// When `id_index` is provided it replaces the engine's default identity
    /// index; otherwise a default one is created if
    /// `create_default_indexes` is set.
    fn create_collection(
        &mut self,
        nss: &Namespace,
        options: &CollectionOptions,
        id_index: Option<&IndexSpec>,
        create_default_indexes: bool,
    ) -> StorageResult<()>;

    /// Stages insertion of a document.
    ///
    /// Fails immediately with [`StorageError::DuplicateKey`] if a unique
    /// index already holds one of the document's keys.
    fn insert_document(&mut self, nss: &Namespace, doc: &Document) -> StorageResult<()>;

    /// Registers a callback to run once the unit has committed. Callbacks
    /// of an aborted unit never run.
    fn on_commit(&mut self, hook: CommitHook);

    /// Commits the unit.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::WriteConflict`] if the unit collided with a
    /// concurrent operation; nothing was applied and the caller may retry.
    fn commit(self: Box<Self>) -> StorageResult<()>;
}

/// A multi-index build over one collection.
///
/// The lifecycle is `insert_all_documents`, `check_constraints`, then
/// `commit` inside a write unit. `abort` removes index metadata and any
/// partially built entries; once the unit holding the commit has committed
/// it does nothing, so callers may abort unconditionally on exit.
pub trait IndexBuild {
    /// Names of the indexes in this build.
    fn index_names(&self) -> Vec<String>;

    /// Inserts every existing document into the new index structures.
    /// Returns the number of documents scanned.
    fn insert_all_documents(&mut self) -> StorageResult<u64>;

    /// Verifies constraints such as uniqueness across all built entries.
    fn check_constraints(&mut self) -> StorageResult<()>;

    /// Stages the build so that index metadata and entries become visible
    /// when `unit` commits.
    fn commit(&mut self, unit: &mut dyn WriteUnit) -> StorageResult<()>;

    /// Removes index metadata and partial entries unless already committed.
    fn abort(&mut self);
}

/// The local storage engine.
pub trait StorageEngine: Send + Sync {
    /// Blocks until the exclusive lock on `db` is held.
    fn acquire_exclusive(&self, db: &str) -> StorageResult<LockTicket>;

    /// Releases a lock obtained from [`StorageEngine::acquire_exclusive`].
    fn release_exclusive(&self, ticket: LockTicket);

    /// Opens `db`, creating it if it does not exist.
    fn open_database(&self, db: &str) -> StorageResult<()>;

    /// Returns true if `db` exists.
    fn database_exists(&self, db: &str) -> bool;

    /// Looks up a live collection.
    fn lookup_collection(&self, nss: &Namespace) -> Option<CollectionEntry>;

    /// Lists the ready indexes of a collection.
    fn list_indexes(&self, nss: &Namespace) -> StorageResult<Vec<IndexSpec>>;

    /// Begins a write unit.
    fn begin_unit(&self) -> Box<dyn WriteUnit + '_>;

    /// Registers metadata for a set of new indexes and returns the build.
    fn start_index_build(
        &self,
        nss: &Namespace,
        specs: &[IndexSpec],
    ) -> StorageResult<Box<dyn IndexBuild + '_>>;

    /// Durably records a two-phase index build intent.
    fn record_index_build(&self, entry: &IndexBuildEntry) -> StorageResult<()>;
}
