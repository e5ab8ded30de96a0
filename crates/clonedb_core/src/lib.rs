//! # clonedb core
//!
//! Database cloning engine for bootstrapping a node of a replicated
//! document store from a remote source.
//!
//! A clone runs in four phases over one database:
//!
//! 1. **Plan**: fetch the remote catalog and index specs, drop views and
//!    restricted system collections, resolve identity indexes
//! 2. **Create**: create every planned collection under the exclusive
//!    database lock, reconciling sharded collections by identity
//! 3. **Copy**: stream each unsharded collection's documents and insert
//!    them one write unit at a time, yielding the lock periodically
//! 4. **Index**: build missing secondary indexes, all or nothing
//!
//! ## Key Invariants
//!
//! - Remote calls never run with the exclusive lock held
//! - Write conflicts are retried until they clear or the clone is cancelled
//! - A failed index build leaves no index metadata or partial entries
//! - Sharded collections are created but never loaded with documents
//!
//! ## Collaborators
//!
//! The engine owns no I/O. The remote source ([`RemoteConnector`]), the
//! local storage engine ([`StorageEngine`]), the replication role oracle
//! ([`ReplicationCoordinator`]) and the operation log ([`OpObserver`]) are
//! supplied at construction.

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod catalog;
mod cloner;
mod config;
mod context;
mod copier;
mod creator;
mod error;
mod fail_point;
mod index_builder;
mod lock;
mod namespace;
mod planner;
mod progress;
mod remote;
mod replication;
mod retry;
mod stats;
mod storage;

pub use catalog::{
    find_identity_index, CollectionInfoBlock, CollectionKind, CollectionOptions, CollectionUuid,
    IndexDirection, IndexKeyField, IndexSpec, OptionsDocument, RemoteCollectionDescriptor,
    IDENTITY_INDEX_NAME,
};
pub use cloner::Cloner;
pub use config::{
    ClonerConfig, DuplicateKeyPolicy, DEFAULT_PROGRESS_INTERVAL, DEFAULT_YIELD_INTERVAL,
};
pub use context::{CancellationHandle, OperationContext};
pub use copier::DocumentCopier;
pub use creator::{CollectionCreator, CreateOutcome};
pub use error::{CloneError, CloneResult};
pub use fail_point::{FailPoint, FailPointSite, NoFailPoints};
pub use index_builder::{missing_indexes, IndexBuilder};
pub use lock::DatabaseLock;
pub use namespace::{Namespace, MAX_NAMESPACE_LEN};
pub use planner::{filter_collections, plan_clone, ClonePlan, CreationPlanEntry};
pub use progress::ProgressMeter;
pub use remote::{
    BatchStream, CollectionFilter, DocumentCursor, Endpoint, HostAndPort, InternalCredential,
    QueryRequest, RemoteConnector, RemoteError, RemoteResult, RemoteSource,
};
pub use replication::{
    BuildId, IndexBuildProtocol, NoopObserver, OpObserver, ReplicationCoordinator,
    StandaloneCoordinator,
};
pub use retry::write_conflict_retry;
pub use stats::{CloneStats, ClonedNamespaces, NamespaceStats};
pub use storage::{
    CollectionEntry, CommitHook, CommitQuorum, IndexBuild, IndexBuildEntry, LockTicket,
    StorageEngine, StorageError, StorageResult, WriteUnit,
};
