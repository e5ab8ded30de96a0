//! The cloner: drives planning, creation, copy and index build for one
//! database.

use crate::config::ClonerConfig;
use crate::context::{CancellationHandle, OperationContext};
use crate::copier::DocumentCopier;
use crate::creator::CollectionCreator;
use crate::error::{CloneError, CloneResult};
use crate::fail_point::{FailPoint, NoFailPoints};
use crate::index_builder::IndexBuilder;
use crate::lock::DatabaseLock;
use crate::namespace::Namespace;
use crate::planner::{plan_clone, ClonePlan};
use crate::remote::{Endpoint, QueryRequest, RemoteConnector, RemoteSource};
use crate::replication::{OpObserver, ReplicationCoordinator};
use crate::stats::{CloneStats, ClonedNamespaces};
use crate::storage::StorageEngine;
use std::sync::Arc;
use tracing::{debug, info};

/// Clones databases from a remote source into the local storage engine.
///
/// # Example
///
/// ```rust,ignore
/// let cloner = Cloner::new(config, connector, storage, replication, observer);
/// let mut cloned = ClonedNamespaces::new();
/// let stats = cloner.copy_database("shop", &Endpoint::single("donor", 27017), &[], &mut cloned)?;
/// ```
pub struct Cloner {
    config: ClonerConfig,
    connector: Arc<dyn RemoteConnector>,
    storage: Arc<dyn StorageEngine>,
    replication: Arc<dyn ReplicationCoordinator>,
    observer: Arc<dyn OpObserver>,
    fail_point: Arc<dyn FailPoint>,
    cancellation: CancellationHandle,
}

impl Cloner {
    /// Creates a cloner over the given collaborators.
    pub fn new(
        config: ClonerConfig,
        connector: Arc<dyn RemoteConnector>,
        storage: Arc<dyn StorageEngine>,
        replication: Arc<dyn ReplicationCoordinator>,
        observer: Arc<dyn OpObserver>,
    ) -> Self {
        Self {
            config,
            connector,
            storage,
            replication,
            observer,
            fail_point: Arc::new(NoFailPoints),
            cancellation: CancellationHandle::new(),
        }
    }

    /// Installs a fault injection strategy.
    #[must_use]
    pub fn with_fail_point(mut self, fail_point: Arc<dyn FailPoint>) -> Self {
        self.fail_point = fail_point;
        self
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &ClonerConfig {
        &self.config
    }

    /// Returns a handle that cancels clones run by this cloner.
    #[must_use]
    pub fn cancellation_handle(&self) -> CancellationHandle {
        self.cancellation.clone()
    }

    /// Clones database `target_db` from `source` into the local node.
    ///
    /// Collections listed in `sharded` are created with their source
    /// identity but never loaded with documents. `cloned` is cleared, then
    /// receives each namespace right before its documents are copied; on
    /// failure it holds the namespaces reached so far.
    ///
    /// # Errors
    ///
    /// The first failure aborts the whole clone. Collections created and
    /// documents copied before it stay in place.
    pub fn copy_database(
        &self,
        target_db: &str,
        source: &Endpoint,
        sharded: &[Namespace],
        cloned: &mut ClonedNamespaces,
    ) -> CloneResult<CloneStats> {
        cloned.clear();

        if source.hosts().iter().any(|host| self.config.is_local_host(host)) {
            return Err(CloneError::illegal_operation("can't clone from self (localhost)"));
        }

        let ctx = OperationContext::new(self.cancellation.clone());
        ctx.check_for_interrupt()?;

        let mut conn = self.connect(source)?;
        info!(db = target_db, source = %conn.server_address(), "cloning database");

        let mut lock = DatabaseLock::acquire(self.storage.as_ref(), target_db)?;
        let plan = plan_clone(conn.as_mut(), &mut lock, target_db, sharded)?;
        debug!(db = target_db, collections = plan.entries.len(), "clone planned");

        if self.replication.writes_are_replicated()
            && !self.replication.can_accept_writes_for_database(target_db)
        {
            return Err(CloneError::role_changed(
                target_db,
                "after getting list of collections to clone",
            ));
        }

        let mut stats = CloneStats::default();
        let result = self.run(&ctx, conn.as_mut(), &mut lock, &plan, cloned, &mut stats);
        stats.write_conflict_retries = ctx.write_conflict_retries();
        result?;

        info!(
            db = target_db,
            collections = plan.entries.len(),
            documents = stats.documents_inserted(),
            indexes = stats.indexes_built(),
            "database cloned"
        );
        Ok(stats)
    }

    fn connect(&self, source: &Endpoint) -> CloneResult<Box<dyn RemoteSource>> {
        let mut conn = self
            .connector
            .connect(source)
            .map_err(|e| CloneError::Connection {
                address: source.to_string(),
                source: e,
            })?;

        if let Some(credential) = &self.config.internal_credential {
            conn.authenticate_internal(credential)
                .map_err(|e| CloneError::Connection {
                    address: conn.server_address(),
                    source: e,
                })?;
        }
        Ok(conn)
    }

    fn run(
        &self,
        ctx: &OperationContext,
        conn: &mut dyn RemoteSource,
        lock: &mut DatabaseLock<'_>,
        plan: &ClonePlan,
        cloned: &mut ClonedNamespaces,
        stats: &mut CloneStats,
    ) -> CloneResult<()> {
        let storage = self.storage.as_ref();
        let replication = self.replication.as_ref();

        CollectionCreator::new(storage, ctx, self.fail_point.as_ref()).create_all(
            lock,
            &plan.entries,
            stats,
        )?;

        let copier = DocumentCopier::new(
            &self.config,
            storage,
            replication,
            self.fail_point.as_ref(),
            ctx,
        );
        let request = QueryRequest::all_documents(self.config.batch_size);
        for entry in plan.entries.iter().filter(|entry| !entry.sharded) {
            debug!(ns = %entry.nss, "really will clone");
            cloned.insert(entry.nss.clone());
            copier.copy(conn, lock, &entry.nss, &request, stats.namespace_mut(&entry.nss))?;
        }

        let builder = IndexBuilder::new(
            &self.config,
            storage,
            replication,
            self.observer.as_ref(),
            ctx,
        );
        for entry in &plan.entries {
            info!(ns = %entry.nss, "copying indexes");
            builder.build(
                lock,
                entry,
                plan.index_specs_for(&entry.nss),
                stats.namespace_mut(&entry.nss),
            )?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for Cloner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cloner")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
