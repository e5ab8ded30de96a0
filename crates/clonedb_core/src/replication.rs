//! Replication-facing collaborators: the role oracle and the operation log
//! observer that makes index builds visible to replicas.

use crate::catalog::{CollectionUuid, IndexSpec};
use crate::namespace::Namespace;
use crate::storage::StorageResult;
use std::fmt;
use uuid::Uuid;

/// Identifier of a two-phase index build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BuildId(Uuid);

impl BuildId {
    /// Generates a fresh build identifier.
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    /// Returns the underlying UUID.
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Display for BuildId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// How index builds are announced in the operation log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexBuildProtocol {
    /// One "create index" entry per index, written at commit.
    SinglePhase,
    /// A "start index build" entry before work begins and a single
    /// "commit index build" entry at commit.
    TwoPhase,
}

/// Answers whether this node may currently accept writes.
pub trait ReplicationCoordinator: Send + Sync {
    /// Returns true if local writes must be replicated to other nodes.
    fn writes_are_replicated(&self) -> bool;

    /// Returns true if this node can accept writes for `nss`.
    fn can_accept_writes_for(&self, nss: &Namespace) -> bool;

    /// Returns true if this node can accept writes for every collection of
    /// `db`.
    fn can_accept_writes_for_database(&self, db: &str) -> bool;
}

/// Writes replication-visible operation log entries.
pub trait OpObserver: Send + Sync {
    /// Announces the start of a two-phase index build.
    fn on_start_index_build(
        &self,
        nss: &Namespace,
        collection_uuid: CollectionUuid,
        build_id: BuildId,
        specs: &[IndexSpec],
    ) -> StorageResult<()>;

    /// Announces the commit of a two-phase index build.
    fn on_commit_index_build(
        &self,
        nss: &Namespace,
        collection_uuid: CollectionUuid,
        build_id: BuildId,
        specs: &[IndexSpec],
    ) -> StorageResult<()>;

    /// Announces a single index created under the single-phase protocol.
    fn on_create_index(
        &self,
        nss: &Namespace,
        collection_uuid: CollectionUuid,
        spec: &IndexSpec,
    ) -> StorageResult<()>;
}

/// A coordinator for a standalone node: writes are local only and always
/// accepted.
#[derive(Debug, Clone, Copy, Default)]
pub struct StandaloneCoordinator;

impl ReplicationCoordinator for StandaloneCoordinator {
    fn writes_are_replicated(&self) -> bool {
        false
    }

    fn can_accept_writes_for(&self, _nss: &Namespace) -> bool {
        true
    }

    fn can_accept_writes_for_database(&self, _db: &str) -> bool {
        true
    }
}

/// An observer that discards every entry.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopObserver;

impl OpObserver for NoopObserver {
    fn on_start_index_build(
        &self,
        _nss: &Namespace,
        _collection_uuid: CollectionUuid,
        _build_id: BuildId,
        _specs: &[IndexSpec],
    ) -> StorageResult<()> {
        Ok(())
    }

    fn on_commit_index_build(
        &self,
        _nss: &Namespace,
        _collection_uuid: CollectionUuid,
        _build_id: BuildId,
        _specs: &[IndexSpec],
    ) -> StorageResult<()> {
        Ok(())
    }

    fn on_create_index(
        &self,
        _nss: &Namespace,
        _collection_uuid: CollectionUuid,
        _spec: &IndexSpec,
    ) -> StorageResult<()> {
        Ok(())
    }
}
