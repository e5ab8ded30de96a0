//! Index builder: builds the secondary indexes of a loaded collection.

use crate::catalog::{find_identity_index, CollectionUuid, IndexSpec};
use crate::config::ClonerConfig;
use crate::context::OperationContext;
use crate::error::{CloneError, CloneResult};
use crate::lock::DatabaseLock;
use crate::namespace::Namespace;
use crate::planner::CreationPlanEntry;
use crate::replication::{BuildId, IndexBuildProtocol, OpObserver, ReplicationCoordinator};
use crate::retry::write_conflict_retry;
use crate::stats::NamespaceStats;
use crate::storage::{CommitQuorum, IndexBuild, IndexBuildEntry, StorageEngine, StorageResult};
use tracing::{debug, info};

/// Aborts the wrapped build when dropped.
///
/// Abort is unconditional; after a committed build it has no effect.
struct AbortOnExit<'s> {
    build: Box<dyn IndexBuild + 's>,
}

impl Drop for AbortOnExit<'_> {
    fn drop(&mut self) {
        self.build.abort();
    }
}

/// Returns the specs of `remote` that have no counterpart in `local`.
///
/// A local index counts as a counterpart if it has the same name or the
/// same defining fields and options.
#[must_use]
pub fn missing_indexes(remote: &[IndexSpec], local: &[IndexSpec]) -> Vec<IndexSpec> {
    remote
        .iter()
        .filter(|spec| {
            !local
                .iter()
                .any(|existing| existing.name == spec.name || existing.is_equivalent(spec))
        })
        .cloned()
        .collect()
}

/// Builds missing secondary indexes, all or nothing.
pub struct IndexBuilder<'a> {
    config: &'a ClonerConfig,
    storage: &'a dyn StorageEngine,
    replication: &'a dyn ReplicationCoordinator,
    observer: &'a dyn OpObserver,
    ctx: &'a OperationContext,
}

impl<'a> IndexBuilder<'a> {
    /// Creates an index builder.
    pub fn new(
        config: &'a ClonerConfig,
        storage: &'a dyn StorageEngine,
        replication: &'a dyn ReplicationCoordinator,
        observer: &'a dyn OpObserver,
        ctx: &'a OperationContext,
    ) -> Self {
        Self {
            config,
            storage,
            replication,
            observer,
            ctx,
        }
    }

    /// Builds every index of `remote_specs` missing on `entry.nss`.
    pub fn build(
        &self,
        lock: &DatabaseLock<'_>,
        entry: &CreationPlanEntry,
        remote_specs: &[IndexSpec],
        stats: &mut NamespaceStats,
    ) -> CloneResult<()> {
        debug_assert!(lock.is_held());
        let nss = &entry.nss;

        let replicated = self.replication.writes_are_replicated();
        if replicated && !self.replication.can_accept_writes_for(nss) {
            return Err(CloneError::role_changed(nss, "while copying indexes"));
        }

        if remote_specs.is_empty() {
            return Ok(());
        }

        self.storage.open_database(nss.db())?;
        let collection_uuid = self.ensure_collection(entry, remote_specs)?;

        let local = self.storage.list_indexes(nss)?;
        let to_build = missing_indexes(remote_specs, &local);
        if to_build.is_empty() {
            return Ok(());
        }

        self.ctx.check_for_interrupt()?;
        let build_id = match self.config.index_build_protocol {
            IndexBuildProtocol::TwoPhase => Some(BuildId::generate()),
            IndexBuildProtocol::SinglePhase => None,
        };

        self.run_build(nss, collection_uuid, &to_build, replicated, build_id)
            .map_err(|source| CloneError::IndexBuild {
                nss: nss.clone(),
                source,
            })?;

        stats.indexes_built += to_build.len() as u64;
        info!(ns = %nss, count = to_build.len(), "built indexes");
        Ok(())
    }

    /// Re-creates the collection if it disappeared after the copy phase.
    fn ensure_collection(
        &self,
        entry: &CreationPlanEntry,
        remote_specs: &[IndexSpec],
    ) -> CloneResult<CollectionUuid> {
        if let Some(existing) = self.storage.lookup_collection(&entry.nss) {
            return Ok(existing.uuid);
        }

        debug!(ns = %entry.nss, "collection missing before index build; creating it");
        let options = entry.creation_options()?;
        let id_index = find_identity_index(remote_specs);
        write_conflict_retry(self.ctx, "createCollection", &entry.nss, || {
            self.ctx.check_for_interrupt()?;
            let mut unit = self.storage.begin_unit();
            unit.create_collection(&entry.nss, &options, id_index, true)?;
            unit.commit()?;
            Ok(())
        })?;

        self.storage
            .lookup_collection(&entry.nss)
            .map(|created| created.uuid)
            .ok_or_else(|| CloneError::CollectionDropped {
                nss: entry.nss.clone(),
            })
    }

    fn run_build(
        &self,
        nss: &Namespace,
        collection_uuid: CollectionUuid,
        specs: &[IndexSpec],
        replicated: bool,
        build_id: Option<BuildId>,
    ) -> StorageResult<()> {
        let mut guard = AbortOnExit {
            build: self.storage.start_index_build(nss, specs)?,
        };

        if let (true, Some(build_id)) = (replicated, build_id) {
            self.storage.record_index_build(&IndexBuildEntry {
                build_id,
                collection_uuid,
                commit_quorum: CommitQuorum::Disabled,
                index_names: guard.build.index_names(),
            })?;
            self.observer
                .on_start_index_build(nss, collection_uuid, build_id, specs)?;
        }

        let scanned = guard.build.insert_all_documents()?;
        debug!(ns = %nss, scanned, "inserted documents into new indexes");
        guard.build.check_constraints()?;

        let mut unit = self.storage.begin_unit();
        guard.build.commit(unit.as_mut())?;
        unit.commit()?;
        drop(guard);

        if replicated {
            match build_id {
                Some(build_id) => {
                    self.observer
                        .on_commit_index_build(nss, collection_uuid, build_id, specs)?;
                }
                None => {
                    for spec in specs {
                        self.observer.on_create_index(nss, collection_uuid, spec)?;
                    }
                }
            }
        }
        Ok(())
    }
}
